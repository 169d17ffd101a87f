//! Settings loading and validation.
//!
//! Layered configuration: `settings.toml` (optional) plus `FRAME_*`
//! environment overrides. Every field has a documented default so the kiosk
//! starts with no config file at all; validation runs after deserialization
//! and reports every violation at once.

use anyhow::{bail, Context, Result};
use chrono::{NaiveTime, Weekday};
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Base URL of the remote media folder (JSON index + files).
    pub remote_url: String,
    /// Optional mirror command (e.g. "rclone") used as bulk-download fallback
    /// when the HTTP provider cannot serve a listing. Empty disables it.
    pub mirror_command: String,
    /// Remote name for the mirror command, e.g. "remote:frame-media".
    pub mirror_remote: String,
    pub supported_formats: Vec<String>,
    pub schedule: ScheduleSettings,
    pub sync: SyncSettings,
    pub cache: CacheSettings,
    pub slideshow: SlideshowSettings,
    pub helpers: HelperSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScheduleSettings {
    pub enabled: bool,
    /// Day abbreviations: Mon, Tue, Wed, Thu, Fri, Sat, Sun.
    pub days: Vec<String>,
    /// Active window start, "HH:MM".
    pub start: String,
    /// Active window stop, "HH:MM". A stop before start wraps past midnight.
    pub stop: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub check_interval_minutes: u64,
    pub local_cache_dir: PathBuf,
    pub download_on_start: bool,
    /// Hours relative to UTC used for schedule evaluation, -12..=14.
    pub timezone_offset: i32,
    pub sync_system_time: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub max_count: usize,
    pub max_memory_mb: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SlideshowSettings {
    pub interval_seconds: u64,
    /// "fit", "fill", or "stretch".
    pub scale_mode: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HelperSettings {
    /// Timeout for quick status helpers (signal query), seconds.
    pub quick_timeout_secs: u64,
    /// Timeout for normal helpers (time sync), seconds.
    pub normal_timeout_secs: u64,
    /// Timeout for long-running helpers (mirror download), seconds.
    pub long_timeout_secs: u64,
    /// How often the Wi-Fi signal reading is refreshed, seconds.
    pub signal_refresh_secs: u64,
    /// External audio player spawned alongside each video. Empty disables
    /// audio (the video pipeline itself renders no sound).
    pub audio_command: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            remote_url: String::new(),
            mirror_command: String::new(),
            mirror_remote: String::new(),
            supported_formats: [
                ".jpg", ".jpeg", ".png", ".gif", ".bmp", ".webp", ".mp4", ".mov", ".mkv", ".webm",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            schedule: ScheduleSettings::default(),
            sync: SyncSettings::default(),
            cache: CacheSettings::default(),
            slideshow: SlideshowSettings::default(),
            helpers: HelperSettings::default(),
        }
    }
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            days: ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            start: "08:00".into(),
            stop: "22:00".into(),
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            check_interval_minutes: 10,
            local_cache_dir: PathBuf::from("./media"),
            download_on_start: true,
            timezone_offset: 0,
            sync_system_time: false,
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_count: 16,
            max_memory_mb: 256,
        }
    }
}

impl Default for SlideshowSettings {
    fn default() -> Self {
        Self {
            interval_seconds: 10,
            scale_mode: "fit".into(),
        }
    }
}

impl Default for HelperSettings {
    fn default() -> Self {
        Self {
            quick_timeout_secs: 1,
            normal_timeout_secs: 2,
            long_timeout_secs: 300,
            signal_refresh_secs: 30,
            audio_command: String::new(),
        }
    }
}

/// Parse "HH:MM" into a `NaiveTime`.
pub fn parse_clock_time(s: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M").with_context(|| format!("'{s}' is not HH:MM"))
}

/// Parse a day abbreviation (Mon..Sun) into a `Weekday`.
pub fn parse_day(s: &str) -> Result<Weekday> {
    match s {
        "Mon" => Ok(Weekday::Mon),
        "Tue" => Ok(Weekday::Tue),
        "Wed" => Ok(Weekday::Wed),
        "Thu" => Ok(Weekday::Thu),
        "Fri" => Ok(Weekday::Fri),
        "Sat" => Ok(Weekday::Sat),
        "Sun" => Ok(Weekday::Sun),
        other => bail!("invalid day '{other}' (expected Mon..Sun)"),
    }
}

impl Settings {
    /// Load settings from an optional TOML file plus `FRAME_*` env overrides.
    /// A missing file falls back to defaults.
    pub fn load(path: &str) -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("FRAME").separator("__"))
            .build()
            .context("failed to build configuration")?;

        let settings: Settings = cfg
            .try_deserialize()
            .context("failed to deserialize configuration")?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate the whole tree, collecting every violation into one error.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if let Err(e) = parse_clock_time(&self.schedule.start) {
            errors.push(format!("schedule.start: {e}"));
        }
        if let Err(e) = parse_clock_time(&self.schedule.stop) {
            errors.push(format!("schedule.stop: {e}"));
        }
        for day in &self.schedule.days {
            if let Err(e) = parse_day(day) {
                errors.push(format!("schedule.days: {e}"));
            }
        }

        if !(1..=3600).contains(&self.slideshow.interval_seconds) {
            errors.push(format!(
                "slideshow.interval_seconds must be 1-3600, got {}",
                self.slideshow.interval_seconds
            ));
        }
        if !matches!(self.slideshow.scale_mode.as_str(), "fit" | "fill" | "stretch") {
            errors.push(format!(
                "slideshow.scale_mode must be fit, fill, or stretch, got '{}'",
                self.slideshow.scale_mode
            ));
        }

        if !(1..=60).contains(&self.sync.check_interval_minutes) {
            errors.push(format!(
                "sync.check_interval_minutes must be 1-60, got {}",
                self.sync.check_interval_minutes
            ));
        }
        if !(-12..=14).contains(&self.sync.timezone_offset) {
            errors.push(format!(
                "sync.timezone_offset must be -12..14, got {}",
                self.sync.timezone_offset
            ));
        }

        if self.cache.max_count == 0 {
            errors.push("cache.max_count must be at least 1".into());
        }
        if self.cache.max_memory_mb == 0 {
            errors.push("cache.max_memory_mb must be at least 1".into());
        }

        for fmt in &self.supported_formats {
            if !fmt.starts_with('.') {
                errors.push(format!("supported_formats entry '{fmt}' must start with '.'"));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            bail!("configuration validation failed:\n  - {}", errors.join("\n  - "))
        }
    }

    pub fn max_cache_bytes(&self) -> u64 {
        self.cache.max_memory_mb * 1024 * 1024
    }
}
