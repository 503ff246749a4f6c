use std::time::Duration;

use intent_dispatch::{
    reply, DispatchConfig, DispatchService, Limits, Registry, FALLBACK_COMMAND,
};

fn config(debounce_ms: u64) -> DispatchConfig {
    DispatchConfig {
        group_threshold: 2,
        debounce_ms,
        limits: Some(Limits {
            max_warmed_groups: 10,
            max_warmed_regex_commands: 100,
        }),
        ..DispatchConfig::default()
    }
}

#[tokio::test]
async fn clear_leaves_no_timer_behind() {
    let registry = Registry::new(config(30)).expect("registry");
    let handle = DispatchService::spawn(registry);

    handle
        .add_command("one", ["^один$"], None, true)
        .await
        .expect("add one");
    handle
        .add_command("two", ["^два$"], None, true)
        .await
        .expect("add two");
    assert!(handle
        .stats()
        .await
        .expect("stats")
        .pending_compile
        .is_some());
    assert_eq!(
        handle.resolve("один").await.expect("resolve").as_deref(),
        Some("one")
    );

    handle.clear_commands().await.expect("clear");
    let cleared = handle.stats().await.expect("stats");
    tokio::time::sleep(Duration::from_millis(120)).await;
    let later = handle.stats().await.expect("stats");

    assert_eq!(cleared, later);
    assert_eq!(later.groups, 0);
    assert_eq!(later.pending_compile, None);
    assert_eq!(handle.resolve("два").await.expect("resolve"), None);
}

#[tokio::test]
async fn handles_share_one_registry() {
    let handle = DispatchService::spawn(Registry::new(config(10)).expect("registry"));
    let other = handle.clone();

    handle
        .add_command("greet", ["hello"], Some(reply("Hi!")), false)
        .await
        .expect("add greet");
    other
        .add_command(FALLBACK_COMMAND, Vec::<String>::new(), Some(reply("?")), false)
        .await
        .expect("add fallback");

    let hit = other.dispatch("hello world").await.expect("dispatch");
    assert_eq!(hit.and_then(|d| d.reply).as_deref(), Some("Hi!"));
    let miss = handle.dispatch("xyz").await.expect("dispatch").expect("fallback");
    assert_eq!(miss.command, FALLBACK_COMMAND);

    assert!(handle.remove_command("greet").await.expect("remove"));
    assert!(!handle.flush().await.expect("flush"));
    handle.shutdown().await.expect("shutdown");
}
