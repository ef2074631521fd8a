use crate::error::{ClientError, ClientResult};
use std::path::PathBuf;
use std::time::Duration;

/// API base used when nothing else is configured (local backend).
pub const DEFAULT_API_URL: &str = "http://localhost:3000/api/v1";

const DEFAULT_STATE_DIR: &str = ".local/state/meetup";

/// Where the client talks to.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the JSON API, without a trailing slash.
    pub api_url: String,
    /// WebSocket URL of the cable endpoint (token is appended at connect time).
    pub cable_url: String,
    pub poll: PollPolicy,
}

impl ClientConfig {
    /// Build a config for `api_url`, deriving the cable URL from it.
    pub fn new(api_url: &str) -> ClientResult<Self> {
        let api_url = api_url.trim_end_matches('/').to_string();
        let cable_url = cable_url_for(&api_url)?;
        Ok(Self {
            api_url,
            cable_url,
            poll: PollPolicy::default(),
        })
    }

    /// Resolve from an explicit URL, then `$MEETUP_API_URL`, then the default.
    /// `$MEETUP_CABLE_URL` overrides the derived cable URL.
    pub fn resolve(api_url: Option<&str>) -> ClientResult<Self> {
        let from_env = std::env::var("MEETUP_API_URL").ok();
        let api_url = api_url
            .map(str::to_string)
            .or(from_env)
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let mut config = Self::new(&api_url)?;
        if let Ok(cable) = std::env::var("MEETUP_CABLE_URL") {
            config.cable_url = cable;
        }
        Ok(config)
    }
}

/// Turn `http(s)://host/api/v1` into `ws(s)://host/api/v1/cable`.
pub fn cable_url_for(api_url: &str) -> ClientResult<String> {
    let rest = if let Some(rest) = api_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = api_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        return Err(ClientError::Protocol {
            message: format!("api url must start with http:// or https://: {api_url}"),
        });
    };
    Ok(format!("{}/cable", rest.trim_end_matches('/')))
}

/// Schedule for polling a generation task.
#[derive(Debug, Clone)]
pub struct PollPolicy {
    /// Wait before the first poll so the backend has started work.
    pub initial_delay: Duration,
    /// Status polls before giving up. `0` is treated as `1`: a submitted
    /// request is always polled at least once.
    pub max_attempts: u32,
    /// Fixed wait between consecutive polls.
    pub interval: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(1000),
            max_attempts: 5,
            interval: Duration::from_millis(2000),
        }
    }
}

impl PollPolicy {
    pub(crate) fn normalized_attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Return the meetup state directory path.
///
/// Priority: `$MEETUP_STATE_DIR` env var, then `~/.local/state/meetup`.
pub fn default_state_dir() -> ClientResult<PathBuf> {
    if let Ok(dir) = std::env::var("MEETUP_STATE_DIR") {
        return Ok(PathBuf::from(dir));
    }
    let home = std::env::var("HOME").map_err(|_| ClientError::Io {
        message: "HOME env var not set".to_string(),
    })?;
    Ok(PathBuf::from(home).join(DEFAULT_STATE_DIR))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cable_url_follows_scheme() {
        assert_eq!(
            cable_url_for("http://localhost:3000/api/v1").unwrap(),
            "ws://localhost:3000/api/v1/cable"
        );
        assert_eq!(
            cable_url_for("https://example.org/api/v1/").unwrap(),
            "wss://example.org/api/v1/cable"
        );
        assert!(cable_url_for("ftp://nope").is_err());
    }

    #[test]
    fn new_trims_trailing_slash() {
        let config = ClientConfig::new("http://127.0.0.1:9000/api/v1/").unwrap();
        assert_eq!(config.api_url, "http://127.0.0.1:9000/api/v1");
        assert_eq!(config.cable_url, "ws://127.0.0.1:9000/api/v1/cable");
    }

    #[test]
    fn explicit_url_wins() {
        let config = ClientConfig::resolve(Some("https://meetups.test/api/v1")).unwrap();
        assert_eq!(config.api_url, "https://meetups.test/api/v1");
    }

    #[test]
    fn poll_defaults() {
        let policy = PollPolicy::default();
        assert_eq!(policy.initial_delay, Duration::from_millis(1000));
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.interval, Duration::from_millis(2000));

        let zero = PollPolicy {
            max_attempts: 0,
            ..PollPolicy::default()
        };
        assert_eq!(zero.normalized_attempts(), 1);
    }
}
