//! Process-wide configuration.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warning,
    Info,
    Debug,
}

impl LogLevel {
    /// Filter directive for the tracing subscriber.
    pub fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warning => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        }
    }
}

#[derive(Clone, Debug, Parser)]
#[command(name = "chromad", about = "RGB control daemon for Razer Chroma peripherals")]
pub struct Config {
    /// Log verbosity
    #[arg(long, value_enum, env = "CHROMAD_LOG_LEVEL", default_value = "info")]
    pub log_level: LogLevel,

    /// Directory for preferences and profiles
    #[arg(long, env = "CHROMAD_CONFIG_DIR", default_value = "/var/lib/chromad")]
    pub config_dir: PathBuf,

    /// Advisory frame rate for preview consumers (does not bind the compositor)
    #[arg(long, env = "CHROMAD_LIVE_PREVIEW_FPS", default_value_t = 15,
          value_parser = clap::value_parser!(u8).range(1..=25))]
    pub live_preview_fps: u8,

    /// Enable diagnostic endpoints
    #[arg(long, env = "CHROMAD_DEV_MODE")]
    pub dev_mode: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_level: LogLevel::Info,
            config_dir: PathBuf::from("/var/lib/chromad"),
            live_preview_fps: 15,
            dev_mode: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse() {
        let config = Config::parse_from(["chromad"]);
        assert_eq!(config.log_level, LogLevel::Info);
        assert_eq!(config.live_preview_fps, 15);
        assert!(!config.dev_mode);
    }

    #[test]
    fn preview_fps_is_bounded() {
        assert!(Config::try_parse_from(["chromad", "--live-preview-fps", "30"]).is_err());
        assert!(Config::try_parse_from(["chromad", "--live-preview-fps", "0"]).is_err());
        let config = Config::parse_from(["chromad", "--live-preview-fps", "25"]);
        assert_eq!(config.live_preview_fps, 25);
    }

    #[test]
    fn log_levels_map_to_filters() {
        assert_eq!(LogLevel::Warning.as_filter(), "warn");
        assert_eq!(LogLevel::Debug.as_filter(), "debug");
    }
}
