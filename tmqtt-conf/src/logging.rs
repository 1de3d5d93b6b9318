use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;

/// `[log]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Log {
    pub to: To,
    pub level: Level,
    pub dir: String,
    pub file: String,
}

impl Default for Log {
    fn default() -> Self {
        Self {
            to: To::Console,
            level: Level(slog::Level::Info),
            dir: "/var/log/tmqtt".into(),
            file: "tmqtt.log".into(),
        }
    }
}

impl Log {
    /// Log file path, `dir` joined with `file`. Empty when no file is configured.
    pub fn filename(&self) -> String {
        if self.file.is_empty() {
            return String::new();
        }
        Path::new(&self.dir).join(&self.file).to_string_lossy().into_owned()
    }
}

/// Where log lines go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum To {
    Off,
    File,
    Console,
    Both,
}

impl To {
    #[inline]
    pub fn file(&self) -> bool {
        matches!(self, To::Both | To::File)
    }

    #[inline]
    pub fn console(&self) -> bool {
        matches!(self, To::Both | To::Console)
    }
}

/// Minimum level written, parsed from names like `info` or `debug`.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(try_from = "String")]
pub struct Level(slog::Level);

impl Level {
    #[inline]
    pub fn inner(&self) -> slog::Level {
        self.0
    }
}

impl TryFrom<String> for Level {
    type Error = String;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        slog::Level::from_str(&name).map(Level).map_err(|_| format!("invalid log level: {name}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Wrap {
        log: Log,
    }

    fn parse(toml: &str) -> Result<Log, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()?
            .try_deserialize::<Wrap>()
            .map(|w| w.log)
    }

    #[test]
    fn test_log_settings() {
        let log = parse("[log]\nto = \"both\"\nlevel = \"debug\"\ndir = \"/tmp/tmqtt/\"").unwrap();
        assert!(log.to.file() && log.to.console());
        assert_eq!(log.level.inner(), slog::Level::Debug);
        assert_eq!(log.filename(), "/tmp/tmqtt/tmqtt.log");

        let log = parse("[log]\nto = \"off\"\nfile = \"\"").unwrap();
        assert_eq!(log.to, To::Off);
        assert_eq!(log.level.inner(), slog::Level::Info);
        assert_eq!(log.filename(), "");

        assert!(parse("[log]\nto = \"nowhere\"").is_err());
        assert!(parse("[log]\nlevel = \"loud\"").is_err());

        let log = Log::default();
        assert!(log.to.console() && !log.to.file());
    }
}
