use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

pub const DEFAULT_DETAILS_ENDPOINT: &str =
    "https://store.steampowered.com/api/appdetails?appids={id}";
pub const DEFAULT_STATS_ENDPOINT: &str =
    "https://steamspy.com/api.php?request=appdetails&appid={id}";
pub const DEFAULT_SHARD_WIDTH: u64 = 1000;

const ID_PLACEHOLDER: &str = "{id}";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("shard width must be greater than zero")]
    ZeroShardWidth,
    #[error("endpoint template has no {{id}} placeholder: {0}")]
    MissingPlaceholder(String),
    #[error("endpoint template is not a valid URL: {template}: {source}")]
    InvalidUrl {
        template: String,
        source: url::ParseError,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub root: PathBuf,
    pub ids_file: PathBuf,
    pub shard_width: u64,
    pub details_endpoint: String,
    pub stats_endpoint: Option<String>,
    pub max_retries: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            ids_file: PathBuf::from("ids.txt"),
            shard_width: DEFAULT_SHARD_WIDTH,
            details_endpoint: DEFAULT_DETAILS_ENDPOINT.to_string(),
            stats_endpoint: Some(DEFAULT_STATS_ENDPOINT.to_string()),
            max_retries: 1,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.shard_width == 0 {
            return Err(ConfigError::ZeroShardWidth);
        }

        check_template(&self.details_endpoint)?;
        if let Some(stats) = &self.stats_endpoint {
            check_template(stats)?;
        }

        Ok(())
    }

    pub fn log_paths(&self) -> LogPaths {
        LogPaths::new(&self.root)
    }
}

/// Expand an endpoint template for one identifier.
pub fn expand_template(template: &str, id: &str) -> String {
    template.replace(ID_PLACEHOLDER, id)
}

fn check_template(template: &str) -> Result<(), ConfigError> {
    if !template.contains(ID_PLACEHOLDER) {
        return Err(ConfigError::MissingPlaceholder(template.to_string()));
    }

    Url::parse(&expand_template(template, "1")).map_err(|source| ConfigError::InvalidUrl {
        template: template.to_string(),
        source,
    })?;

    Ok(())
}

/// Locations of the checkpoint logs under `<root>/logs`.
#[derive(Debug, Clone)]
pub struct LogPaths {
    pub fetched: PathBuf,
    pub succeeded: PathBuf,
    pub failed: PathBuf,
    pub retried: PathBuf,
    pub report: PathBuf,
}

impl LogPaths {
    pub fn new(root: &Path) -> Self {
        let dir = root.join("logs");
        Self {
            fetched: dir.join("fetched_ids.txt"),
            succeeded: dir.join("succeeded_ids.txt"),
            failed: dir.join("failed_ids.txt"),
            retried: dir.join("retried_ids.txt"),
            report: dir.join("last_run.json"),
        }
    }
}

pub fn load(path: &Path) -> anyhow::Result<Config> {
    let text = fs::read_to_string(path)?;
    let config: Config = serde_json::from_str(&text)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let config: Config =
            serde_json::from_str(r#"{ "root": "/data", "stats_endpoint": null }"#).unwrap();

        assert_eq!(config.root, PathBuf::from("/data"));
        assert_eq!(config.shard_width, 1000);
        assert_eq!(config.max_retries, 1);
        assert!(config.stats_endpoint.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_zero_shard_width() {
        let config = Config {
            shard_width: 0,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::ZeroShardWidth)));
    }

    #[test]
    fn rejects_template_without_placeholder() {
        let config = Config {
            details_endpoint: "https://example.com/api".into(),
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingPlaceholder(_))
        ));
    }

    #[test]
    fn rejects_unparseable_template() {
        let config = Config {
            stats_endpoint: Some("not a url {id}".into()),
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn log_paths_live_under_root() {
        let paths = LogPaths::new(Path::new("/tmp/run"));
        assert_eq!(paths.fetched, PathBuf::from("/tmp/run/logs/fetched_ids.txt"));
        assert_eq!(paths.retried, PathBuf::from("/tmp/run/logs/retried_ids.txt"));
    }
}
