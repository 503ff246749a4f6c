//! # Intent Dispatch
//!
//! Maps free-form user text to registered command names.
//!
//! ## Pipeline
//!
//! ```text
//! add_command(name, triggers)
//!     │
//!     ├──> Safety screen (ReDoS shapes)
//!     │      └─> unsafe triggers dropped (strict) or warned (lenient)
//!     │
//!     ├──> Literal commands ──> exact + substring index
//!     │
//!     └──> Pattern commands
//!            ├─> below threshold: own matcher (warm up to a memory-derived limit)
//!            └─> from threshold: shared group alternation (debounced compile)
//!
//! resolve(text)
//!     override hook → reserved intents → literals → groups → patterns → "*"
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use intent_dispatch::{reply, DispatchConfig, Registry, FALLBACK_COMMAND};
//!
//! fn main() -> intent_dispatch::Result<()> {
//!     let mut registry = Registry::new(DispatchConfig::from_env())?;
//!     registry.add_command("greet", ["hello", "hi"], Some(reply("Hi!")), false);
//!     registry.add_command("weather", [r"\bпогод"], None, true);
//!     registry.add_command(FALLBACK_COMMAND, Vec::<String>::new(), Some(reply("?")), false);
//!
//!     assert_eq!(registry.resolve("Какая погода?").as_deref(), Some("weather"));
//!     Ok(())
//! }
//! ```

mod command;
mod compiler;
mod config;
mod deferred;
mod error;
mod grouping;
mod limits;
mod registry;
mod safety;
mod service;

pub use command::{
    callback, normalize, reply, CommandCallback, CommandContext, CommandInfo, CommandKind,
    Dispatch, Outcome, RejectReason, RejectedTrigger, Registration, Trigger, TriggerIssue,
    FALLBACK_COMMAND,
};
pub use compiler::{compose, compose_slot, CompiledPattern, PatternCompiler};
pub use config::{DispatchConfig, EngineKind, ReservedIntent};
pub use error::{CompileError, DispatchError, Result};
pub use grouping::{GroupBudget, GroupInfo};
pub use limits::{total_memory_bytes, Limits};
pub use registry::{resolver, CommandTable, CustomResolver, Registry, RegistryStats};
pub use safety::{check_pattern, is_likely_safe, SafetyLimits, SafetyViolation};
pub use service::{DispatchHandle, DispatchService};
