//! TOML-backed configuration (A4, §4.11): a `serde`-derived `ReplayConfig` mirroring the option set
//! field-for-field, loadable from disk, converting into the core's [`Options`] builder.
//!
//! Grounded on the teacher's own `config.rs` (`serde` struct + `Default` + file loader), adapted
//! from JSON to TOML since this crate's config is a small flat document better suited to it.

use crate::bitmap::Bitmap;
use crate::context::Options;
use crate::error::ReplayError;
use crate::rate::SpeedMode;
use crate::source::SourceSpec;
use crate::timing::TimingStrategy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// TOML-friendly mirror of [`SpeedMode`] (§3 "Speed mode"). `into_speed_mode` is the only place
/// this ever needs to become the core's tagged union.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SpeedConfig {
    Multiplier { k: f64 },
    Mbps { rate: f64 },
    Pps { rate: f64, burst: u32 },
    Topspeed,
    Oneatatime,
}

impl SpeedConfig {
    pub fn into_speed_mode(self) -> SpeedMode {
        match self {
            SpeedConfig::Multiplier { k } => SpeedMode::Multiplier(k),
            SpeedConfig::Mbps { rate } => SpeedMode::Mbps(rate),
            SpeedConfig::Pps { rate, burst } => SpeedMode::Pps { rate, burst },
            SpeedConfig::Topspeed => SpeedMode::Topspeed,
            SpeedConfig::Oneatatime => SpeedMode::OneAtATime,
        }
    }
}

impl Default for SpeedConfig {
    fn default() -> Self {
        SpeedConfig::Topspeed
    }
}

/// TOML-friendly mirror of [`TimingStrategy`] (§3 "Timing-accuracy strategy").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TimingConfig {
    AbsoluteTime,
    GettimeofdaySpin,
    Nanosleep,
    SelectSleep,
    RdtscSpin,
    IoportSleep,
}

impl Default for TimingConfig {
    fn default() -> Self {
        TimingConfig::AbsoluteTime
    }
}

impl From<TimingConfig> for TimingStrategy {
    fn from(value: TimingConfig) -> Self {
        match value {
            TimingConfig::AbsoluteTime => TimingStrategy::AbsoluteTime,
            TimingConfig::GettimeofdaySpin => TimingStrategy::GettimeofdaySpin,
            TimingConfig::Nanosleep => TimingStrategy::Nanosleep,
            TimingConfig::SelectSleep => TimingStrategy::SelectSleep,
            TimingConfig::RdtscSpin => TimingStrategy::RdtscSpin,
            TimingConfig::IoportSleep => TimingStrategy::IoportSleep,
        }
    }
}

/// On-disk configuration document, one field per entry in the §3 option set.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ReplayConfig {
    pub loop_count: u32,
    pub speed: SpeedConfig,
    pub timing_strategy: TimingConfig,
    pub mtu: u32,
    pub limit_send: i64,
    pub enable_file_cache: bool,
    pub use_pkthdr_len: bool,
    pub sleep_accel_us: u32,
    pub interface_a: String,
    pub interface_b: Option<String>,
    pub sources: Vec<PathBuf>,
    pub bitmap_path: Option<PathBuf>,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        ReplayConfig {
            loop_count: 1,
            speed: SpeedConfig::default(),
            timing_strategy: TimingConfig::default(),
            mtu: 1500,
            limit_send: -1,
            enable_file_cache: false,
            use_pkthdr_len: false,
            sleep_accel_us: 0,
            interface_a: String::new(),
            interface_b: None,
            sources: Vec::new(),
            bitmap_path: None,
        }
    }
}

impl ReplayConfig {
    pub fn from_file(path: &Path) -> Result<Self, ReplayError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ReplayError::config(format!("read {}: {e}", path.display())))?;
        toml::from_str(&text)
            .map_err(|e| ReplayError::config(format!("parse {}: {e}", path.display())))
    }

    /// Load `path`, falling back to [`ReplayConfig::default`] (with a logged warning) if it can't
    /// be read or parsed, matching the teacher's own tolerant startup behavior.
    pub fn from_file_or_default(path: &Path) -> Self {
        Self::from_file(path).unwrap_or_else(|e| {
            log::warn!("using default configuration ({e})");
            Self::default()
        })
    }

    /// Convert into the core's [`Options`] builder, running the same validation `Options::new`
    /// and `add_source`/`set_bitmap` already enforce.
    pub fn into_options(self) -> Result<Options, ReplayError> {
        if self.interface_a.is_empty() {
            return Err(ReplayError::config("interface_a is required"));
        }

        let mut options = Options::new(
            self.speed.into_speed_mode(),
            self.timing_strategy.into(),
            self.interface_a,
        )?;
        options.set_loop_count(self.loop_count);
        options.set_limit_send(self.limit_send)?;
        options.mtu = self.mtu;
        options.enable_file_cache = self.enable_file_cache;
        options.use_pkthdr_len = self.use_pkthdr_len;
        options.sleep_accel_us = self.sleep_accel_us;
        options.interface_b = self.interface_b;

        for path in self.sources {
            options.add_source(SourceSpec::Filename(path))?;
        }

        if let Some(bitmap_path) = self.bitmap_path {
            let bytes = std::fs::read(&bitmap_path).map_err(|e| {
                ReplayError::resource(format!("bitmap {}: {e}", bitmap_path.display()))
            })?;
            options.set_bitmap(Bitmap::parse(&bytes)?)?;
        }

        Ok(options)
    }
}
