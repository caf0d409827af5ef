use anyhow::Context;
use serde::Deserialize;
use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

pub const DEFAULT_MINECRAFT_DELAY: Duration = Duration::from_secs(300);
const DEFAULT_POLL_INTERVAL_MS: u64 = 900;
const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 900;
const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub minecraft: MinecraftConfig,
    pub session: SessionConfig,
    pub ui: UiConfig,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            minecraft: MinecraftConfig::default(),
            session: SessionConfig::default(),
            ui: UiConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let mut candidates = Vec::new();

        if let Ok(current_dir) = env::current_dir() {
            push_candidates(&mut candidates, &current_dir);
        }

        if let Ok(exe) = env::current_exe() {
            if let Some(dir) = exe.parent() {
                push_candidates(&mut candidates, dir);
            }
        }

        for path in candidates {
            if path.exists() {
                return Self::load_from(&path);
            }
        }

        Ok(Config::default())
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&data).with_context(|| format!("Failed to parse config: {}", path.display()))
    }

    pub fn parse(data: &str) -> anyhow::Result<Self> {
        let doc: ConfigDocument = toml::from_str(data)?;
        Ok(doc.into())
    }
}

fn push_candidates(candidates: &mut Vec<PathBuf>, dir: &Path) {
    candidates.push(dir.join("config.toml"));
    candidates.push(dir.join("config").join("config.toml"));
    candidates.push(dir.join("config").join("better_media_controller.toml"));
}

#[derive(Debug, Clone, PartialEq)]
pub struct MinecraftConfig {
    pub delay: Duration,
    pub enabled: bool,
}

impl Default for MinecraftConfig {
    fn default() -> Self {
        Self {
            delay: DEFAULT_MINECRAFT_DELAY,
            enabled: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub poll_interval: Duration,
    pub command_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            command_timeout: Duration::from_millis(DEFAULT_COMMAND_TIMEOUT_MS),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UiConfig {
    pub always_on_top: bool,
    pub show_console: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoggingConfig {
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigDocument {
    #[serde(default)]
    minecraft: MinecraftSection,
    #[serde(default)]
    session: SessionSection,
    #[serde(default)]
    ui: UiSection,
    #[serde(default)]
    logging: LoggingSection,
}

impl From<ConfigDocument> for Config {
    fn from(value: ConfigDocument) -> Self {
        let minecraft = MinecraftConfig {
            delay: value
                .minecraft
                .delay_secs
                .map(|secs| Duration::from_secs(secs.max(1)))
                .unwrap_or(DEFAULT_MINECRAFT_DELAY),
            enabled: value.minecraft.enabled.unwrap_or(false),
        };

        let session = SessionConfig {
            poll_interval: Duration::from_millis(
                value
                    .session
                    .poll_interval_ms
                    .unwrap_or(DEFAULT_POLL_INTERVAL_MS)
                    .clamp(100, 10_000),
            ),
            command_timeout: Duration::from_millis(
                value
                    .session
                    .command_timeout_ms
                    .unwrap_or(DEFAULT_COMMAND_TIMEOUT_MS)
                    .clamp(50, 5_000),
            ),
        };

        let logging = LoggingConfig {
            filter: value
                .logging
                .filter
                .filter(|f| !f.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
        };

        Config {
            minecraft,
            session,
            ui: UiConfig {
                always_on_top: value.ui.always_on_top.unwrap_or(false),
                show_console: value.ui.show_console.unwrap_or(false),
            },
            logging,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct MinecraftSection {
    delay_secs: Option<u64>,
    enabled: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct SessionSection {
    poll_interval_ms: Option<u64>,
    command_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct UiSection {
    always_on_top: Option<bool>,
    show_console: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingSection {
    filter: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.minecraft.delay, Duration::from_secs(300));
    }

    #[test]
    fn sections_override_defaults() {
        let config = Config::parse(
            r#"
            [minecraft]
            delay_secs = 5
            enabled = true

            [session]
            poll_interval_ms = 250

            [ui]
            always_on_top = true
            show_console = true

            [logging]
            filter = "debug"
            "#,
        )
        .unwrap();

        assert_eq!(config.minecraft.delay, Duration::from_secs(5));
        assert!(config.minecraft.enabled);
        assert_eq!(config.session.poll_interval, Duration::from_millis(250));
        assert_eq!(config.session.command_timeout, Duration::from_millis(900));
        assert!(config.ui.always_on_top);
        assert!(config.ui.show_console);
        assert_eq!(config.logging.filter, "debug");
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        let config = Config::parse(
            r#"
            [minecraft]
            delay_secs = 0

            [session]
            poll_interval_ms = 1
            command_timeout_ms = 60000
            "#,
        )
        .unwrap();

        assert_eq!(config.minecraft.delay, Duration::from_secs(1));
        assert_eq!(config.session.poll_interval, Duration::from_millis(100));
        assert_eq!(config.session.command_timeout, Duration::from_millis(5_000));
    }

    #[test]
    fn malformed_document_is_an_error() {
        assert!(Config::parse("[minecraft\ndelay_secs = ").is_err());
        assert!(Config::parse("[minecraft]\ndelay_secs = \"long\"").is_err());
    }
}
