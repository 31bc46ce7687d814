//! Link configuration

use std::time::Duration;
use tracing::warn;
use ttt_link_core::BaudRate;

/// Timing and rate settings for a `GameLink`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkConfig {
    /// Rate used by `connect` when none is given (default: 9600)
    pub rate: BaudRate,
    /// Device I/O timeout; also bounds one send (default: 1s)
    pub io_timeout: Duration,
    /// Longest wait for a line within one poll tick (default: 50ms)
    pub receive_timeout: Duration,
    /// Interval between worker ticks (default: 100ms)
    pub poll_period: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            rate: BaudRate::B9600,
            io_timeout: Duration::from_secs(1),
            receive_timeout: Duration::from_millis(50),
            poll_period: Duration::from_millis(100),
        }
    }
}

impl LinkConfig {
    /// Defaults overridden by `TTT_LINK_*` environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(raw) = lookup("TTT_LINK_BAUD") {
            match raw.parse() {
                Ok(rate) => config.rate = rate,
                Err(e) => warn!("Ignoring TTT_LINK_BAUD={}: {}", raw, e),
            }
        }
        if let Some(ms) = millis(&lookup, "TTT_LINK_IO_TIMEOUT_MS") {
            config.io_timeout = ms;
        }
        if let Some(ms) = millis(&lookup, "TTT_LINK_RECEIVE_TIMEOUT_MS") {
            config.receive_timeout = ms;
        }
        if let Some(ms) = millis(&lookup, "TTT_LINK_POLL_MS") {
            config.poll_period = ms;
        }

        config
    }
}

fn millis(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<Duration> {
    let raw = lookup(key)?;
    match raw.trim().parse::<u64>() {
        Ok(ms) if ms > 0 => Some(Duration::from_millis(ms)),
        _ => {
            warn!("Ignoring {}={}: expected a positive number of milliseconds", key, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = LinkConfig::default();
        assert_eq!(config.rate, BaudRate::B9600);
        assert_eq!(config.poll_period, Duration::from_millis(100));
        assert!(config.receive_timeout < config.poll_period);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("TTT_LINK_BAUD", "115200"),
            ("TTT_LINK_POLL_MS", "250"),
            ("TTT_LINK_RECEIVE_TIMEOUT_MS", "soon"),
        ]);
        let config = LinkConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.rate, BaudRate::B115200);
        assert_eq!(config.poll_period, Duration::from_millis(250));
        assert_eq!(config.receive_timeout, Duration::from_millis(50));
        assert_eq!(config.io_timeout, Duration::from_secs(1));
    }
}
