use thiserror::Error;

pub type ClientResult<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("not authenticated: no session token")]
    NotAuthenticated,
    #[error("transport error: {message}")]
    Transport { message: String },
    #[error("http {status}: {message}")]
    Http { status: u16, message: String },
    #[error("protocol error: {message}")]
    Protocol { message: String },
    #[error("submission failed: {message}")]
    SubmissionFailed { message: String },
    #[error("{message}")]
    Domain { message: String },
    #[error("polling timed out after {attempts} attempts{}", last_error_suffix(.last_error))]
    PollingTimedOut {
        attempts: u32,
        last_error: Option<String>,
    },
    #[error("cancelled")]
    Cancelled,
    #[error("io error: {message}")]
    Io { message: String },
}

fn last_error_suffix(last_error: &Option<String>) -> String {
    last_error
        .as_deref()
        .map(|e| format!(": {e}"))
        .unwrap_or_default()
}

impl ClientError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Io { .. })
            || matches!(self, Self::Http { status, .. } if *status >= 500)
    }

    pub(crate) fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport {
            message: err.to_string(),
        }
    }

    pub(crate) fn protocol(err: impl std::fmt::Display) -> Self {
        Self::Protocol {
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_includes_last_error() {
        let err = ClientError::PollingTimedOut {
            attempts: 5,
            last_error: Some("polling failed with HTTP 502".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "polling timed out after 5 attempts: polling failed with HTTP 502"
        );

        let err = ClientError::PollingTimedOut {
            attempts: 5,
            last_error: None,
        };
        assert_eq!(err.to_string(), "polling timed out after 5 attempts");
    }

    #[test]
    fn transient_classification() {
        assert!(ClientError::transport("reset").is_transient());
        assert!(
            ClientError::Http {
                status: 503,
                message: "busy".to_string()
            }
            .is_transient()
        );
        assert!(
            !ClientError::Http {
                status: 404,
                message: "missing".to_string()
            }
            .is_transient()
        );
        assert!(
            !ClientError::Domain {
                message: "boom".to_string()
            }
            .is_transient()
        );
        assert!(!ClientError::NotAuthenticated.is_transient());
    }
}
