//! Settings loader for anvil.
//!
//! Reads `anvil.toml` and deserializes it into [`ForgeSettings`]. Falls back
//! to defaults when the file is missing or malformed, then lets `ANVIL_*`
//! environment variables override individual toggles.

use std::path::Path;

use anvil_types::config::ForgeSettings;

/// Conventional settings file name.
pub const CONFIG_FILE_NAME: &str = "anvil.toml";

/// Load orchestrator settings from `path`.
///
/// - If the file does not exist, returns [`ForgeSettings::default()`].
/// - If the file exists but fails to parse, logs a warning and returns the default.
/// - Otherwise returns the parsed settings.
pub async fn load_forge_settings(path: &Path) -> ForgeSettings {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No settings file at {}, using defaults", path.display());
            return ForgeSettings::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", path.display());
            return ForgeSettings::default();
        }
    };

    match toml::from_str::<ForgeSettings>(&content) {
        Ok(settings) => settings,
        Err(err) => {
            tracing::warn!("Failed to parse {}: {err}, using defaults", path.display());
            ForgeSettings::default()
        }
    }
}

/// File settings with environment overrides applied on top.
pub async fn resolve_forge_settings(path: &Path) -> ForgeSettings {
    apply_env_overrides(load_forge_settings(path).await)
}

/// Override toggles from the process environment.
///
/// | Variable | Field |
/// |---|---|
/// | `ANVIL_MAX_CONCURRENT_WORKFLOWS` | `max_concurrent_workflows` |
/// | `ANVIL_CONTINUE_ON_ERROR` | `continue_on_error` |
/// | `ANVIL_FAIL_FAST_COMPENSATION` | `fail_fast_compensation` |
/// | `ANVIL_THROW_ON_COMPENSATION_ERROR` | `throw_on_compensation_error` |
/// | `ANVIL_ENABLE_OUTPUT_CHAINING` | `enable_output_chaining` |
/// | `ANVIL_RECOVERY_MAX_ATTEMPTS` | `recovery.max_attempts` |
pub fn apply_env_overrides(settings: ForgeSettings) -> ForgeSettings {
    apply_overrides(settings, |name| std::env::var(name).ok())
}

/// Same as [`apply_env_overrides`] with an explicit variable lookup.
/// Unparseable values are logged and ignored.
pub fn apply_overrides(mut settings: ForgeSettings, lookup: impl Fn(&str) -> Option<String>) -> ForgeSettings {
    if let Some(v) = parsed(&lookup, "ANVIL_MAX_CONCURRENT_WORKFLOWS", |s| s.parse::<usize>().ok()) {
        settings.max_concurrent_workflows = v;
    }
    if let Some(v) = parsed(&lookup, "ANVIL_CONTINUE_ON_ERROR", parse_bool) {
        settings.continue_on_error = v;
    }
    if let Some(v) = parsed(&lookup, "ANVIL_FAIL_FAST_COMPENSATION", parse_bool) {
        settings.fail_fast_compensation = v;
    }
    if let Some(v) = parsed(&lookup, "ANVIL_THROW_ON_COMPENSATION_ERROR", parse_bool) {
        settings.throw_on_compensation_error = v;
    }
    if let Some(v) = parsed(&lookup, "ANVIL_ENABLE_OUTPUT_CHAINING", parse_bool) {
        settings.enable_output_chaining = v;
    }
    if let Some(v) = parsed(&lookup, "ANVIL_RECOVERY_MAX_ATTEMPTS", |s| s.parse::<u32>().ok()) {
        settings.recovery.max_attempts = v;
    }
    settings
}

fn parsed<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Option<T> {
    let raw = lookup(name)?;
    let value = parse(raw.trim());
    if value.is_none() {
        tracing::warn!(variable = name, value = %raw, "ignoring unparseable override");
    }
    value
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use anvil_types::config::RetryStrategyKind;
    use tempfile::TempDir;

    #[tokio::test]
    async fn missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let settings = load_forge_settings(&tmp.path().join(CONFIG_FILE_NAME)).await;
        assert_eq!(settings, ForgeSettings::default());
    }

    #[tokio::test]
    async fn valid_toml_returns_parsed() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(CONFIG_FILE_NAME);
        tokio::fs::write(
            &path,
            r#"
max_concurrent_workflows = 8
continue_on_error = true

[retry]
strategy = "fixed_interval"
max_attempts = 4
interval_ms = 250
"#,
        )
        .await
        .unwrap();

        let settings = load_forge_settings(&path).await;
        assert_eq!(settings.max_concurrent_workflows, 8);
        assert!(settings.continue_on_error);
        assert!(settings.enable_output_chaining);
        let retry = settings.retry.unwrap();
        assert_eq!(retry.strategy, RetryStrategyKind::FixedInterval);
        assert_eq!(retry.interval_ms, 250);
    }

    #[tokio::test]
    async fn invalid_toml_returns_default() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(CONFIG_FILE_NAME);
        tokio::fs::write(&path, "this is not { valid toml !!!").await.unwrap();

        assert_eq!(load_forge_settings(&path).await, ForgeSettings::default());
    }

    #[test]
    fn overrides_replace_individual_toggles() {
        let env = HashMap::from([
            ("ANVIL_MAX_CONCURRENT_WORKFLOWS", "2"),
            ("ANVIL_THROW_ON_COMPENSATION_ERROR", "yes"),
            ("ANVIL_ENABLE_OUTPUT_CHAINING", "off"),
            ("ANVIL_RECOVERY_MAX_ATTEMPTS", "7"),
        ]);
        let settings = apply_overrides(ForgeSettings::default(), |name| {
            env.get(name).map(|v| v.to_string())
        });

        assert_eq!(settings.max_concurrent_workflows, 2);
        assert!(settings.throw_on_compensation_error);
        assert!(!settings.enable_output_chaining);
        assert!(!settings.continue_on_error);
        assert_eq!(settings.recovery.max_attempts, 7);
    }

    #[test]
    fn unparseable_overrides_are_ignored() {
        let settings = apply_overrides(ForgeSettings::default(), |name| {
            (name == "ANVIL_MAX_CONCURRENT_WORKFLOWS").then(|| "many".to_string())
        });
        assert_eq!(settings.max_concurrent_workflows, 0);
    }
}
