//! Async front for a [`Registry`].
//!
//! One task owns the registry and serializes every request, so mutation and
//! resolution never race. The same task drives the debounced group compile:
//! while a compile is pending it also waits on the deadline and runs the
//! compile when nothing else arrived first.

use std::time::Instant;

use log::{debug, info};
use tokio::sync::{mpsc, oneshot};
use tokio::time;

use crate::command::{CommandCallback, Dispatch, Registration, Trigger};
use crate::error::{DispatchError, Result};
use crate::registry::{CustomResolver, Registry, RegistryStats};

const CHANNEL_CAPACITY: usize = 64;

enum ServiceCommand {
    Add {
        name: String,
        triggers: Vec<Trigger>,
        callback: Option<CommandCallback>,
        reply: oneshot::Sender<Registration>,
    },
    Remove {
        name: String,
        reply: oneshot::Sender<bool>,
    },
    Clear {
        reply: oneshot::Sender<()>,
    },
    SetResolver {
        resolver: Option<CustomResolver>,
        reply: oneshot::Sender<()>,
    },
    Resolve {
        text: String,
        reply: oneshot::Sender<Option<String>>,
    },
    Dispatch {
        text: String,
        reply: oneshot::Sender<Option<Dispatch>>,
    },
    Stats {
        reply: oneshot::Sender<RegistryStats>,
    },
    Flush {
        reply: oneshot::Sender<bool>,
    },
    Shutdown,
}

/// Task that owns a registry; talk to it through a [`DispatchHandle`].
pub struct DispatchService {
    registry: Registry,
    rx: mpsc::Receiver<ServiceCommand>,
}

impl DispatchService {
    /// Move `registry` into a background task. Must be called inside a tokio runtime.
    pub fn spawn(registry: Registry) -> DispatchHandle {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let service = Self { registry, rx };
        tokio::spawn(service.run());
        DispatchHandle { tx }
    }

    async fn run(mut self) {
        info!("dispatch service started with {} commands", self.registry.len());
        loop {
            let deadline = self.registry.pending_deadline();

            tokio::select! {
                cmd = self.rx.recv() => {
                    let Some(cmd) = cmd else { break };
                    if !self.handle(cmd) {
                        break;
                    }
                }
                () = async {
                    if let Some(deadline) = deadline {
                        time::sleep_until(time::Instant::from_std(deadline)).await;
                    }
                }, if deadline.is_some() => {
                    if self.registry.flush_pending() {
                        debug!("debounced group compile finished");
                    }
                }
            }
        }
        info!("dispatch service stopped");
    }

    /// Returns `false` once the service should stop.
    fn handle(&mut self, cmd: ServiceCommand) -> bool {
        let registry = &mut self.registry;
        match cmd {
            ServiceCommand::Add {
                name,
                triggers,
                callback,
                reply,
            } => {
                let _ = reply.send(registry.add_triggers(&name, triggers, callback));
            }
            ServiceCommand::Remove { name, reply } => {
                let _ = reply.send(registry.remove_command(&name));
            }
            ServiceCommand::Clear { reply } => {
                registry.clear_commands();
                let _ = reply.send(());
            }
            ServiceCommand::SetResolver { resolver, reply } => {
                registry.set_resolver(resolver);
                let _ = reply.send(());
            }
            ServiceCommand::Resolve { text, reply } => {
                registry.run_due(Instant::now());
                let _ = reply.send(registry.resolve(&text));
            }
            ServiceCommand::Dispatch { text, reply } => {
                registry.run_due(Instant::now());
                let _ = reply.send(registry.dispatch(&text));
            }
            ServiceCommand::Stats { reply } => {
                let _ = reply.send(registry.stats());
            }
            ServiceCommand::Flush { reply } => {
                let _ = reply.send(registry.flush_pending());
            }
            ServiceCommand::Shutdown => return false,
        }
        true
    }
}

/// Cloneable client of a running [`DispatchService`]
#[derive(Clone)]
pub struct DispatchHandle {
    tx: mpsc::Sender<ServiceCommand>,
}

impl DispatchHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> ServiceCommand,
    ) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| DispatchError::ServiceStopped)?;
        rx.await.map_err(|_| DispatchError::ServiceStopped)
    }

    /// See [`Registry::add_command`].
    pub async fn add_command<I, S>(
        &self,
        name: &str,
        triggers: I,
        callback: Option<CommandCallback>,
        is_pattern: bool,
    ) -> Result<Registration>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let triggers = triggers
            .into_iter()
            .map(|t| {
                if is_pattern {
                    Trigger::Pattern(t.into())
                } else {
                    Trigger::Literal(t.into())
                }
            })
            .collect();
        self.add_triggers(name, triggers, callback).await
    }

    pub async fn add_triggers(
        &self,
        name: &str,
        triggers: Vec<Trigger>,
        callback: Option<CommandCallback>,
    ) -> Result<Registration> {
        let name = name.to_string();
        self.request(|reply| ServiceCommand::Add {
            name,
            triggers,
            callback,
            reply,
        })
        .await
    }

    pub async fn remove_command(&self, name: &str) -> Result<bool> {
        let name = name.to_string();
        self.request(|reply| ServiceCommand::Remove { name, reply })
            .await
    }

    pub async fn clear_commands(&self) -> Result<()> {
        self.request(|reply| ServiceCommand::Clear { reply }).await
    }

    pub async fn set_resolver(&self, resolver: Option<CustomResolver>) -> Result<()> {
        self.request(|reply| ServiceCommand::SetResolver { resolver, reply })
            .await
    }

    pub async fn resolve(&self, text: &str) -> Result<Option<String>> {
        let text = text.to_string();
        self.request(|reply| ServiceCommand::Resolve { text, reply })
            .await
    }

    pub async fn dispatch(&self, text: &str) -> Result<Option<Dispatch>> {
        let text = text.to_string();
        self.request(|reply| ServiceCommand::Dispatch { text, reply })
            .await
    }

    pub async fn stats(&self) -> Result<RegistryStats> {
        self.request(|reply| ServiceCommand::Stats { reply }).await
    }

    /// Run the pending group compile without waiting for its deadline.
    pub async fn flush(&self) -> Result<bool> {
        self.request(|reply| ServiceCommand::Flush { reply }).await
    }

    /// Stop the service. Later requests fail with [`DispatchError::ServiceStopped`].
    pub async fn shutdown(&self) -> Result<()> {
        self.tx
            .send(ServiceCommand::Shutdown)
            .await
            .map_err(|_| DispatchError::ServiceStopped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::reply;
    use crate::config::DispatchConfig;
    use crate::limits::Limits;
    use std::time::Duration;

    fn grouping_registry() -> Registry {
        Registry::new(DispatchConfig {
            group_threshold: 1,
            debounce_ms: 20,
            limits: Some(Limits {
                max_warmed_groups: 10,
                max_warmed_regex_commands: 10,
            }),
            ..DispatchConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn timer_runs_debounced_compile() {
        let handle = DispatchService::spawn(grouping_registry());
        handle
            .add_command("a", ["^alpha$"], Some(reply("A")), true)
            .await
            .unwrap();
        handle.add_command("b", ["^beta$"], None, true).await.unwrap();

        let before = handle.stats().await.unwrap();
        assert_eq!(before.groups, 1);
        assert_eq!(before.pending_compile.as_deref(), Some("a"));
        assert_eq!(before.compiled_groups, 0);

        time::sleep(Duration::from_millis(80)).await;
        let after = handle.stats().await.unwrap();
        assert_eq!(after.pending_compile, None);
        assert_eq!(after.compiled_groups, 1);

        let dispatched = handle.dispatch("alpha").await.unwrap().unwrap();
        assert_eq!(dispatched.reply.as_deref(), Some("A"));
        assert_eq!(handle.resolve("beta").await.unwrap().as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn clear_cancels_the_timer() {
        let handle = DispatchService::spawn(grouping_registry());
        handle.add_command("a", ["^alpha$"], None, true).await.unwrap();
        handle.clear_commands().await.unwrap();

        time::sleep(Duration::from_millis(60)).await;
        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.groups, 0);
        assert_eq!(stats.compiled_groups, 0);
        assert_eq!(stats.pending_compile, None);
        assert_eq!(handle.resolve("alpha").await.unwrap(), None);
    }

    #[tokio::test]
    async fn requests_fail_after_shutdown() {
        let handle = DispatchService::spawn(grouping_registry());
        handle.shutdown().await.unwrap();
        time::sleep(Duration::from_millis(10)).await;
        assert!(matches!(
            handle.resolve("x").await,
            Err(DispatchError::ServiceStopped)
        ));
    }
}
