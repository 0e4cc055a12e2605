//! Loading the allocator configuration from TOML.

use std::path::Path;

use anyhow::Context;
use tally_alloc::AllocatorConfig;

/// Table used when the file does not name one.
pub const DEFAULT_TABLE: &str = "tally";

/// Load and validate the configuration at `path`, or the defaults when no
/// file is given.
pub fn load(path: Option<&Path>) -> anyhow::Result<AllocatorConfig> {
    let config = match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            parse(&text).with_context(|| format!("parsing config {}", path.display()))?
        }
        None => AllocatorConfig::new(DEFAULT_TABLE),
    };
    config.validate()?;
    Ok(config)
}

fn parse(text: &str) -> anyhow::Result<AllocatorConfig> {
    let mut table: toml::Table = text.parse()?;
    table
        .entry("table")
        .or_insert(toml::Value::from(DEFAULT_TABLE));
    Ok(toml::Value::Table(table).try_into()?)
}

/// Render a configuration back to TOML.
pub fn render(config: &AllocatorConfig) -> anyhow::Result<String> {
    Ok(toml::to_string_pretty(config)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tally_alloc::{RetryConfig, Strategy};

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn no_file_means_defaults() {
        let config = load(None).unwrap();
        assert_eq!(config, AllocatorConfig::new(DEFAULT_TABLE));
    }

    #[test]
    fn empty_file_means_defaults() {
        let file = write_config("");
        assert_eq!(load(Some(file.path())).unwrap(), AllocatorConfig::new(DEFAULT_TABLE));
    }

    #[test]
    fn full_file() {
        let file = write_config(
            r#"
table = "orders"
counter_key = "order-counter"
strategy = "transactional"
guard_collisions = true
consistent_reads = false

[retry]
unbounded = true
base_delay_ms = 1
max_delay_ms = 20
jitter = false
deadline_ms = 5000
"#,
        );
        let config = load(Some(file.path())).unwrap();
        assert_eq!(config.table, "orders");
        assert_eq!(config.counter_key, "order-counter");
        assert_eq!(config.key_attribute, "pk");
        assert_eq!(config.strategy, Strategy::Transactional);
        assert!(config.guard_collisions);
        assert!(!config.consistent_reads);
        assert!(config.retry.unbounded);
        assert!(!config.retry.jitter);
        assert_eq!(config.retry.deadline_ms, Some(5000));
        assert_eq!(config.retry.max_retries, RetryConfig::default().max_retries);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let file = write_config("strategy = \"pessimistic\"\n");
        assert!(load(Some(file.path())).is_err());

        let file = write_config("[retry]\nbase_delay_ms = 50\nmax_delay_ms = 5\n");
        let err = load(Some(file.path())).unwrap_err();
        assert!(err.to_string().contains("max_delay_ms"));
    }

    #[test]
    fn missing_file_names_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let err = load(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("absent.toml"));
    }

    #[test]
    fn render_round_trips() {
        let config = AllocatorConfig::new("orders")
            .with_strategy(Strategy::CasUpdate)
            .with_retry(RetryConfig::unbounded().with_deadline(std::time::Duration::from_secs(3)));
        let rendered = render(&config).unwrap();
        assert_eq!(parse(&rendered).unwrap(), config);
    }
}
