use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::FixedOffset;

use crate::clock::{offset_from_hours, DEFAULT_UTC_OFFSET_HOURS};
use crate::limits::MAX_WEEKS_AHEAD;

pub const DEFAULT_WEEKS_AHEAD: u32 = 4;
pub const DEFAULT_CANCEL_CUTOFF_MINUTES: i64 = 60;

/// Runtime settings, read from `SLOTKEEPER_*` environment variables.
/// Unparseable values fall back to their defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    pub utc_offset_hours: i32,
    /// Forward window of the fixed-booking materializer, in weeks.
    pub weeks_ahead: u32,
    pub cancel_cutoff_minutes: i64,
    /// Base URL that confirmation links point at.
    pub public_origin: String,
    pub schedule_file: Option<PathBuf>,
    /// JSON object of user id to profile.
    pub profiles_file: Option<PathBuf>,
    pub sweep_interval: Duration,
    /// Journal appends between compactions.
    pub compact_threshold: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            metrics_port: None,
            utc_offset_hours: DEFAULT_UTC_OFFSET_HOURS,
            weeks_ahead: DEFAULT_WEEKS_AHEAD,
            cancel_cutoff_minutes: DEFAULT_CANCEL_CUTOFF_MINUTES,
            public_origin: "http://localhost:5173/".into(),
            schedule_file: None,
            profiles_file: None,
            sweep_interval: Duration::from_secs(3600),
            compact_threshold: 1000,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let lookup = &lookup;

        Self {
            data_dir: lookup("SLOTKEEPER_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            metrics_port: parse_var(lookup, "SLOTKEEPER_METRICS_PORT"),
            utc_offset_hours: parse_var(lookup, "SLOTKEEPER_UTC_OFFSET_HOURS")
                .filter(|h: &i32| (-23..=23).contains(h))
                .unwrap_or(defaults.utc_offset_hours),
            weeks_ahead: parse_var(lookup, "SLOTKEEPER_WEEKS_AHEAD")
                .map(|w: u32| w.clamp(1, MAX_WEEKS_AHEAD))
                .unwrap_or(defaults.weeks_ahead),
            cancel_cutoff_minutes: parse_var(lookup, "SLOTKEEPER_CANCEL_CUTOFF_MINUTES")
                .filter(|m: &i64| *m >= 0)
                .unwrap_or(defaults.cancel_cutoff_minutes),
            public_origin: lookup("SLOTKEEPER_PUBLIC_ORIGIN").unwrap_or(defaults.public_origin),
            schedule_file: lookup("SLOTKEEPER_SCHEDULE_FILE").map(PathBuf::from),
            profiles_file: lookup("SLOTKEEPER_PROFILES_FILE").map(PathBuf::from),
            sweep_interval: parse_var(lookup, "SLOTKEEPER_SWEEP_SECS")
                .filter(|s: &u64| *s > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
            compact_threshold: parse_var(lookup, "SLOTKEEPER_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
        }
    }

    pub fn offset(&self) -> FixedOffset {
        offset_from_hours(self.utc_offset_hours)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("slotkeeper.wal")
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    lookup(name).and_then(|s| s.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn empty_environment_gives_defaults() {
        assert_eq!(from_pairs(&[]), Config::default());
        assert_eq!(Config::default().offset().local_minus_utc(), -3 * 3600);
    }

    #[test]
    fn reads_every_variable() {
        let cfg = from_pairs(&[
            ("SLOTKEEPER_DATA_DIR", "/var/lib/slotkeeper"),
            ("SLOTKEEPER_METRICS_PORT", "9100"),
            ("SLOTKEEPER_UTC_OFFSET_HOURS", "1"),
            ("SLOTKEEPER_WEEKS_AHEAD", "6"),
            ("SLOTKEEPER_CANCEL_CUTOFF_MINUTES", "120"),
            ("SLOTKEEPER_PUBLIC_ORIGIN", "https://club.example/"),
            ("SLOTKEEPER_SCHEDULE_FILE", "/etc/slotkeeper/schedule.json"),
            ("SLOTKEEPER_PROFILES_FILE", "/etc/slotkeeper/profiles.json"),
            ("SLOTKEEPER_SWEEP_SECS", "60"),
            ("SLOTKEEPER_COMPACT_THRESHOLD", "50"),
        ]);
        assert_eq!(cfg.data_dir, PathBuf::from("/var/lib/slotkeeper"));
        assert_eq!(cfg.wal_path(), PathBuf::from("/var/lib/slotkeeper/slotkeeper.wal"));
        assert_eq!(cfg.metrics_port, Some(9100));
        assert_eq!(cfg.offset().local_minus_utc(), 3600);
        assert_eq!(cfg.weeks_ahead, 6);
        assert_eq!(cfg.cancel_cutoff_minutes, 120);
        assert_eq!(cfg.public_origin, "https://club.example/");
        assert_eq!(cfg.schedule_file, Some(PathBuf::from("/etc/slotkeeper/schedule.json")));
        assert_eq!(cfg.profiles_file, Some(PathBuf::from("/etc/slotkeeper/profiles.json")));
        assert_eq!(cfg.sweep_interval, Duration::from_secs(60));
        assert_eq!(cfg.compact_threshold, 50);
    }

    #[test]
    fn bad_values_fall_back() {
        let cfg = from_pairs(&[
            ("SLOTKEEPER_METRICS_PORT", "not-a-port"),
            ("SLOTKEEPER_UTC_OFFSET_HOURS", "40"),
            ("SLOTKEEPER_CANCEL_CUTOFF_MINUTES", "-5"),
            ("SLOTKEEPER_SWEEP_SECS", "0"),
        ]);
        assert_eq!(cfg.metrics_port, None);
        assert_eq!(cfg.utc_offset_hours, DEFAULT_UTC_OFFSET_HOURS);
        assert_eq!(cfg.cancel_cutoff_minutes, DEFAULT_CANCEL_CUTOFF_MINUTES);
        assert_eq!(cfg.sweep_interval, Config::default().sweep_interval);
    }

    #[test]
    fn weeks_ahead_is_clamped() {
        assert_eq!(from_pairs(&[("SLOTKEEPER_WEEKS_AHEAD", "0")]).weeks_ahead, 1);
        assert_eq!(
            from_pairs(&[("SLOTKEEPER_WEEKS_AHEAD", "500")]).weeks_ahead,
            MAX_WEEKS_AHEAD
        );
    }
}
