use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use intent_dispatch::{
    reply, DispatchConfig, DispatchHandle, Outcome, Registration, FALLBACK_COMMAND,
};
use log::{info, warn};
use serde::Deserialize;

/// Command table as stored on disk (TOML, or JSON for `.json` files)
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandFile {
    #[serde(default)]
    pub commands: Vec<CommandEntry>,
    /// Reply for unmatched text; registers the fallback command when set
    pub fallback: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandEntry {
    pub name: String,
    #[serde(default)]
    pub triggers: Vec<String>,
    /// Treat every trigger as a regex source
    #[serde(default)]
    pub pattern: bool,
    pub reply: Option<String>,
}

impl CommandFile {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read command file {}", path.display()))?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            serde_json::from_str(&raw)
                .with_context(|| format!("Invalid JSON command file {}", path.display()))
        } else {
            toml::from_str(&raw)
                .with_context(|| format!("Invalid TOML command file {}", path.display()))
        }
    }

    /// Register every entry, then the fallback. Rejections are logged, not fatal.
    pub async fn register(self, handle: &DispatchHandle) -> Result<Vec<Registration>> {
        let mut reports = Vec::with_capacity(self.commands.len() + 1);
        for entry in self.commands {
            let callback = entry.reply.map(reply);
            let report = handle
                .add_command(&entry.name, entry.triggers, callback, entry.pattern)
                .await?;
            reports.push(report);
        }
        if let Some(text) = self.fallback {
            let report = handle
                .add_command(FALLBACK_COMMAND, Vec::<String>::new(), Some(reply(text)), false)
                .await?;
            reports.push(report);
        }

        let rejected = reports
            .iter()
            .filter(|r| matches!(r.outcome, Outcome::Rejected { .. }))
            .count();
        let dropped: usize = reports.iter().map(|r| r.dropped.len()).sum();
        if rejected > 0 || dropped > 0 {
            warn!("{rejected} commands rejected, {dropped} triggers dropped");
        }
        info!("registered {} commands", reports.len() - rejected);
        Ok(reports)
    }
}

/// Defaults, then the optional TOML file, then `INTENT_DISPATCH_*` variables.
pub fn load_config(path: Option<&Path>) -> Result<DispatchConfig> {
    let base = match path {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            toml::from_str::<DispatchConfig>(&raw)
                .with_context(|| format!("Invalid config {}", path.display()))?
        }
        None => DispatchConfig::default(),
    };
    Ok(base.with_env_overrides(|key| std::env::var(key).ok()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_toml_table() {
        let file: CommandFile = toml::from_str(
            r#"
fallback = "Не понял"

[[commands]]
name = "greet"
triggers = ["привет", "hello"]
reply = "Здравствуйте!"

[[commands]]
name = "weather"
triggers = ['\bпогод']
pattern = true
"#,
        )
        .unwrap();
        assert_eq!(file.commands.len(), 2);
        assert!(file.commands[1].pattern);
        assert_eq!(file.commands[0].reply.as_deref(), Some("Здравствуйте!"));
        assert_eq!(file.fallback.as_deref(), Some("Не понял"));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let parsed = serde_json::from_str::<CommandFile>(
            r#"{"commands":[{"name":"x","trigger":["a"]}]}"#,
        );
        assert!(parsed.is_err());
    }
}
