use otpgate_models::DEFAULT_COUNTRY_CODE;
use std::time::Duration;

/// Timing and presentation defaults for client sessions.
#[derive(Debug, Clone)]
pub struct GateConfig {
    /// How often a waiting session re-reads its record.
    pub poll_interval: Duration,
    /// How long the approved confirmation stays up before the full reset.
    pub reset_delay: Duration,
    /// Consecutive failed reads before the connection banner is shown.
    pub read_failure_banner_threshold: u32,
    pub default_country_code: String,
    /// A session with no commands, no state reads and no attached stream
    /// for this long is closed.
    pub session_idle_timeout: Duration,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(3000),
            reset_delay: Duration::from_millis(2000),
            read_failure_banner_threshold: 3,
            default_country_code: DEFAULT_COUNTRY_CODE.to_string(),
            session_idle_timeout: Duration::from_secs(900),
        }
    }
}

impl GateConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            poll_interval: positive_millis(std::env::var("POLL_INTERVAL_MS").ok())
                .unwrap_or(defaults.poll_interval),
            reset_delay: std::env::var("RESET_DELAY_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.reset_delay),
            read_failure_banner_threshold: std::env::var("READ_FAILURE_BANNER_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.read_failure_banner_threshold),
            default_country_code: std::env::var("DEFAULT_COUNTRY_CODE")
                .unwrap_or(defaults.default_country_code),
            session_idle_timeout: std::env::var("SESSION_IDLE_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.trim().parse::<u64>().ok())
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.session_idle_timeout),
        }
    }
}

/// Parse a millisecond count, refusing zero and anything unparsable.
fn positive_millis(raw: Option<String>) -> Option<Duration> {
    raw.and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positive_millis() {
        assert_eq!(positive_millis(Some("1500".to_string())), Some(Duration::from_millis(1500)));
        assert_eq!(positive_millis(Some("0".to_string())), None);
        assert_eq!(positive_millis(Some("soon".to_string())), None);
        assert_eq!(positive_millis(None), None);
    }

    #[test]
    fn test_zero_poll_interval_keeps_default() {
        std::env::set_var("POLL_INTERVAL_MS", "0");
        let config = GateConfig::from_env();
        std::env::remove_var("POLL_INTERVAL_MS");

        assert_eq!(config.poll_interval, GateConfig::default().poll_interval);
    }
}
