//! Range checks run after extraction.

use std::path::Path;

use super::error::{ConfigError, ConfigResult};
use super::schema::{ReconnectConfig, YuzuConfig};

pub fn validate_config(config: &YuzuConfig) -> ConfigResult<()> {
    check_prefix(&config.bot.prefix)?;
    require_dir("bot.data_dir", &config.bot.data_dir)?;
    require_dir("bot.session_dir", &config.bot.session_dir)?;
    check_reconnect(&config.reconnect)?;

    for (name, section) in &config.plugins {
        if !(section.is_object() || section.is_null()) {
            return Err(ConfigError::invalid(
                format!("plugins.{name}"),
                "plugin section must be a table",
            ));
        }
    }
    Ok(())
}

fn check_prefix(prefix: &str) -> ConfigResult<()> {
    if prefix.is_empty() {
        return Err(ConfigError::invalid("bot.prefix", "needs at least one character"));
    }
    if let Some(c) = prefix.chars().find(|c| c.is_whitespace()) {
        return Err(ConfigError::invalid(
            "bot.prefix",
            format!("{c:?} is whitespace and can never start a command"),
        ));
    }
    Ok(())
}

fn require_dir(field: &str, dir: &Path) -> ConfigResult<()> {
    if dir.as_os_str().is_empty() {
        return Err(ConfigError::invalid(field, "must not be empty"));
    }
    Ok(())
}

fn check_reconnect(reconnect: &ReconnectConfig) -> ConfigResult<()> {
    if reconnect.initial_delay_ms == 0 {
        return Err(ConfigError::invalid(
            "reconnect.initial_delay_ms",
            "must be greater than 0",
        ));
    }
    if reconnect.max_delay_ms < reconnect.initial_delay_ms {
        return Err(ConfigError::invalid(
            "reconnect.max_delay_ms",
            format!(
                "{} is below initial_delay_ms ({})",
                reconnect.max_delay_ms, reconnect.initial_delay_ms
            ),
        ));
    }
    let multiplier = reconnect.backoff_multiplier;
    if multiplier.is_nan() || multiplier < 1.0 {
        return Err(ConfigError::invalid(
            "reconnect.backoff_multiplier",
            format!("{multiplier} is below 1.0"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn rejected_field(config: &YuzuConfig) -> String {
        let err = validate_config(config).unwrap_err();
        err.field().unwrap().to_owned()
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(validate_config(&YuzuConfig::default()).is_ok());
    }

    #[test]
    fn test_bot_rules() {
        let mut config = YuzuConfig::default();
        config.bot.prefix = String::new();
        assert_eq!(rejected_field(&config), "bot.prefix");

        config.bot.prefix = "/ .".into();
        assert_eq!(rejected_field(&config), "bot.prefix");

        config.bot.prefix = "!".into();
        config.bot.session_dir = PathBuf::new();
        assert_eq!(rejected_field(&config), "bot.session_dir");
    }

    #[test]
    fn test_reconnect_rules() {
        let mut config = YuzuConfig::default();
        config.reconnect.initial_delay_ms = 0;
        assert_eq!(rejected_field(&config), "reconnect.initial_delay_ms");

        config.reconnect.initial_delay_ms = 5000;
        config.reconnect.max_delay_ms = 1000;
        assert_eq!(rejected_field(&config), "reconnect.max_delay_ms");

        config.reconnect.max_delay_ms = 5000;
        config.reconnect.backoff_multiplier = f64::NAN;
        assert_eq!(rejected_field(&config), "reconnect.backoff_multiplier");
    }

    #[test]
    fn test_plugin_section_must_be_table() {
        let mut config = YuzuConfig::default();
        config
            .plugins
            .insert("chat".into(), serde_json::json!({ "disabled": true }));
        assert!(validate_config(&config).is_ok());

        config.plugins.insert("ping".into(), serde_json::json!(3));
        assert_eq!(rejected_field(&config), "plugins.ping");
    }
}
