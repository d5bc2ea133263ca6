use std::time::Duration;

use crate::error::{Error, Result};
use crate::key::Key;
use crate::{MAINTENANCE_INTERVAL, REQUEST_TIMEOUT, SUCCESSOR_LIST_SIZE};

/// Startup parameters of a node.
#[derive(Clone, Debug)]
pub struct Config {
    /// Address to bind, `ip:port`. Port `0` picks a free port.
    pub address: String,
    /// Explicit identifier. When `None` the identifier is the hash of the bound address.
    pub id: Option<Key>,
    pub stabilize_interval: Duration,
    pub fix_fingers_interval: Duration,
    pub fix_successors_interval: Duration,
    pub check_predecessor_interval: Duration,
    /// Number of entries in the successor list (`r`).
    pub successor_list_size: usize,
    /// How long a caller waits for any answer, including a relay's lookup hop.
    pub request_timeout: Duration,
    /// How long a liveness probe waits. Must be shorter than `request_timeout`, since a relay
    /// may probe dead candidates while its caller waits. Defaults to a quarter of it.
    pub probe_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        let interval = Duration::from_millis(MAINTENANCE_INTERVAL);
        Config {
            address: "127.0.0.1:0".to_string(),
            id: None,
            stabilize_interval: interval,
            fix_fingers_interval: interval,
            fix_successors_interval: interval,
            check_predecessor_interval: interval,
            successor_list_size: SUCCESSOR_LIST_SIZE,
            request_timeout: Duration::from_millis(REQUEST_TIMEOUT),
            probe_timeout: None,
        }
    }
}

impl Config {
    /// Constructs a default `Config` bound to `address`.
    pub fn new(address: &str) -> Self {
        Config {
            address: address.to_string(),
            ..Config::default()
        }
    }

    /// Sets all four maintenance intervals at once.
    pub fn with_intervals(mut self, interval: Duration) -> Self {
        self.stabilize_interval = interval;
        self.fix_fingers_interval = interval;
        self.fix_successors_interval = interval;
        self.check_predecessor_interval = interval;
        self
    }

    pub fn probe_timeout(&self) -> Duration {
        self.probe_timeout.unwrap_or(self.request_timeout / 4)
    }

    pub fn validate(&self) -> Result<()> {
        if self.address.is_empty() {
            return Err(Error::Config("missing address".to_string()));
        }
        if self.successor_list_size == 0 {
            return Err(Error::Config(
                "successor list size must be at least 1".to_string(),
            ));
        }
        if self.request_timeout == Duration::from_secs(0) {
            return Err(Error::Config("request timeout must be positive".to_string()));
        }
        let probe_timeout = self.probe_timeout();
        if probe_timeout == Duration::from_secs(0) || probe_timeout >= self.request_timeout {
            return Err(Error::Config(
                "probe timeout must be positive and shorter than the request timeout".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::Config;

    #[test]
    fn test_validate() {
        assert!(Config::default().validate().is_ok());

        let mut config = Config::new("127.0.0.1:8000");
        config.successor_list_size = 0;
        assert!(config.validate().is_err());

        assert!(Config::new("").validate().is_err());
    }

    #[test]
    fn test_probe_timeout() {
        let mut config = Config::default();
        config.request_timeout = Duration::from_millis(400);
        assert_eq!(config.probe_timeout(), Duration::from_millis(100));
        assert!(config.validate().is_ok());

        config.probe_timeout = Some(Duration::from_millis(400));
        assert!(config.validate().is_err());
        config.probe_timeout = Some(Duration::from_millis(0));
        assert!(config.validate().is_err());
        config.probe_timeout = Some(Duration::from_millis(50));
        assert_eq!(config.probe_timeout(), Duration::from_millis(50));
        assert!(config.validate().is_ok());
    }
}
