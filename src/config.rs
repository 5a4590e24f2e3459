use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct AppConfig {
    /// Root of the comment API, e.g. "http://localhost:8000/api/".
    pub base_url: String,
    /// Rows per feed page; also the cap applied to push-prepended entries.
    pub page_size: usize,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
    /// When true the feed accumulates pages ("load more") instead of
    /// replacing the visible page on navigation.
    pub infinite_scroll: bool,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    /// Base level, overridable per module via `module_levels`.
    pub level: String,
    /// Directory for the rolling log file; "logs" when unset.
    pub log_directory: Option<String>,
    pub module_levels: Vec<(String, String)>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/api/".to_string(),
            page_size: 25,
            request_timeout_secs: 15,
            infinite_scroll: false,
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_directory: None,
            module_levels: Vec::new(),
        }
    }
}

impl AppConfig {
    pub fn load() -> Self {
        // Look for config.ron in the current directory or next to the
        // executable.
        let mut candidates = Vec::new();
        candidates.push(PathBuf::from("config.ron"));
        if let Ok(exe) = std::env::current_exe()
            && let Some(dir) = exe.parent()
        {
            candidates.push(dir.join("config.ron"));
        }

        for path in candidates {
            if path.exists()
                && let Ok(content) = fs::read_to_string(&path)
            {
                match ron::from_str::<AppConfig>(&content) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        tracing::error!("Failed to parse config at {}: {}", path.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = AppConfig::default();
        assert_eq!(config.page_size, 25);
        assert!(!config.infinite_scroll);
        assert!(config.base_url.ends_with('/'));
    }

    #[test]
    fn partial_config_files_fill_in_defaults() {
        let config: AppConfig =
            ron::from_str(r#"(base_url: "https://comments.example.com/api")"#).unwrap();
        assert_eq!(config.base_url, "https://comments.example.com/api");
        assert_eq!(config.page_size, 25);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn logging_section_parses_module_levels() {
        let config: AppConfig = ron::from_str(
            r#"(logging: (level: "debug", module_levels: [("reqwest", "warn")]))"#,
        )
        .unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.module_levels.len(), 1);
    }
}
