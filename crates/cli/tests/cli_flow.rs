use predicates::prelude::*;
use std::path::PathBuf;
use assert_cmd::Command;
use tempfile::TempDir;

const COMMANDS_TOML: &str = r#"
fallback = "Не понял"

[[commands]]
name = "greet"
triggers = ["привет", "hello"]
reply = "Здравствуйте!"

[[commands]]
name = "weather"
triggers = ['погод', '\bweather\b']
pattern = true

[[commands]]
name = "broken"
triggers = ["(a+)+"]
pattern = true
"#;

fn write_commands(dir: &TempDir, name: &str, body: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, body).expect("write commands");
    path
}

fn bin() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("intent-dispatch"))
}

#[test]
fn resolve_prints_names_and_dash_for_fallback_free_miss() {
    let temp = TempDir::new().expect("tempdir");
    let path = write_commands(
        &temp,
        "commands.toml",
        "[[commands]]\nname = \"greet\"\ntriggers = [\"hello\"]\n",
    );

    bin()
        .args(["--quiet", "resolve", "--commands"])
        .arg(&path)
        .args(["hello world", "nothing here"])
        .assert()
        .success()
        .stdout("greet\n-\n");
}

#[test]
fn resolve_reads_stdin_and_uses_fallback() {
    let temp = TempDir::new().expect("tempdir");
    let path = write_commands(&temp, "commands.toml", COMMANDS_TOML);

    bin()
        .args(["--quiet", "resolve", "--commands"])
        .arg(&path)
        .write_stdin("Привет!\nкакая погода\nчто-то ещё\n")
        .assert()
        .success()
        .stdout("greet\nweather\n*\n");
}

#[test]
fn resolve_json_includes_reply() {
    let temp = TempDir::new().expect("tempdir");
    let path = write_commands(&temp, "commands.toml", COMMANDS_TOML);

    let output = bin()
        .args(["--quiet", "--json", "resolve", "--commands"])
        .arg(&path)
        .arg("hello")
        .output()
        .expect("run");
    assert!(output.status.success());
    let line: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("json output");
    assert_eq!(line["command"], "greet");
    assert_eq!(line["reply"], "Здравствуйте!");
}

#[test]
fn strict_mode_rejection_is_logged() {
    let temp = TempDir::new().expect("tempdir");
    let path = write_commands(&temp, "commands.toml", COMMANDS_TOML);

    bin()
        .args(["resolve", "--commands"])
        .arg(&path)
        .arg("aaaa")
        .assert()
        .success()
        .stdout("*\n")
        .stderr(predicate::str::contains("broken"));
}

#[test]
fn check_exits_nonzero_on_unsafe_pattern() {
    bin()
        .args(["check", r"\bhello\b", "[0-9]{3}"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("ok\t"));

    bin()
        .args(["check", r"\bhello\b", "(a+)+"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("unsafe\t(a+)+"));
}

#[test]
fn stats_reports_json_from_json_command_file() {
    let temp = TempDir::new().expect("tempdir");
    let path = write_commands(
        &temp,
        "commands.json",
        r#"{"commands":[{"name":"a","triggers":["^a$"],"pattern":true},{"name":"b","triggers":["bee"]}],"fallback":"?"}"#,
    );

    let output = bin()
        .args(["--quiet", "stats", "--commands"])
        .arg(&path)
        .output()
        .expect("run");
    assert!(output.status.success());
    let stats: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json stats");
    assert_eq!(stats["commands"], 2);
    assert_eq!(stats["pattern_commands"], 1);
    assert_eq!(stats["literal_commands"], 1);
    assert_eq!(stats["has_fallback"], true);
}

#[test]
fn malformed_command_file_fails() {
    let temp = TempDir::new().expect("tempdir");
    let path = write_commands(&temp, "commands.toml", "commands = 5\n");

    bin()
        .args(["stats", "--commands"])
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid TOML command file"));
}
