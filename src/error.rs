//! Failure taxonomy for controller calls.
//!
//! Every failed call ends up as an [`RpcError`] carrying the structured
//! fields of the layer that failed; [`RpcError::kind`] is the classification
//! the aggregator branches on.

use core::fmt;
use log::{debug, error, warn};

/// Application error code the controller uses for "no such method".
pub const CODE_UNSUPPORTED: i64 = 404;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    /// Rejected by the allow-list; nothing was sent.
    NotAllowed { method: String },
    /// Network failure, timeout, non-2xx reply or undecodable body.
    Transport {
        method: String,
        status: Option<u16>,
        message: String,
    },
    /// 2xx reply carrying an `error` object.
    Application { method: String, code: i64, message: String },
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotAllowed,
    /// HTTP 401/403. Terminal for the call.
    Authentication,
    /// Application code 404: the firmware lacks this capability.
    UnsupportedMethod,
    Transport,
    Application,
}

impl RpcError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RpcError::NotAllowed { .. } => ErrorKind::NotAllowed,
            RpcError::Transport {
                status: Some(401 | 403),
                ..
            } => ErrorKind::Authentication,
            RpcError::Transport { .. } => ErrorKind::Transport,
            RpcError::Application {
                code: CODE_UNSUPPORTED,
                ..
            } => ErrorKind::UnsupportedMethod,
            RpcError::Application { .. } => ErrorKind::Application,
        }
    }

    pub fn method(&self) -> &str {
        match self {
            RpcError::NotAllowed { method }
            | RpcError::Transport { method, .. }
            | RpcError::Application { method, .. } => method,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            RpcError::Transport { status, .. } => *status,
            _ => None,
        }
    }

    pub fn code(&self) -> Option<i64> {
        match self {
            RpcError::Application { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn message(&self) -> String {
        match self {
            RpcError::NotAllowed { method } => format!("method {} is not allowed", method),
            RpcError::Transport { message, .. } | RpcError::Application { message, .. } => message.clone(),
        }
    }

    /// Text shown to the user when the controller refuses our credentials.
    pub fn auth_message(&self) -> String {
        match self.status() {
            Some(403) => format!("Access to the controller was denied while calling {}", self.method()),
            _ => format!(
                "Authentication with the controller failed while calling {}; check the configured username and password",
                self.method()
            ),
        }
    }

    /// Log at the level its class deserves.
    pub fn log(&self) {
        match self.kind() {
            ErrorKind::UnsupportedMethod => debug!("{} is not supported by this firmware", self.method()),
            ErrorKind::Authentication => warn!("{}", self),
            ErrorKind::Application => warn!(
                "{} failed with code {}: {}",
                self.method(),
                self.code().unwrap_or_default(),
                self.message()
            ),
            ErrorKind::Transport | ErrorKind::NotAllowed => error!("{}", self),
        }
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RpcError::NotAllowed { method } => write!(f, "method {} is not in the allow-list", method),
            RpcError::Transport {
                method,
                status: Some(status),
                message,
            } => write!(f, "{} failed: http {}: {}", method, status, message),
            RpcError::Transport {
                method,
                status: None,
                message,
            } => write!(f, "{} failed: transport error: {}", method, message),
            RpcError::Application { method, code, message } => {
                write!(f, "{} failed: rpc error {}: {}", method, code, message)
            }
        }
    }
}

impl std::error::Error for RpcError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport(status: Option<u16>) -> RpcError {
        RpcError::Transport {
            method: "Shelly.GetDeviceInfo".into(),
            status,
            message: "boom".into(),
        }
    }

    fn application(code: i64) -> RpcError {
        RpcError::Application {
            method: "Schedule.List".into(),
            code,
            message: "nope".into(),
        }
    }

    #[test]
    fn classification() {
        assert_eq!(transport(Some(401)).kind(), ErrorKind::Authentication);
        assert_eq!(transport(Some(403)).kind(), ErrorKind::Authentication);
        assert_eq!(transport(Some(500)).kind(), ErrorKind::Transport);
        assert_eq!(transport(None).kind(), ErrorKind::Transport);
        assert_eq!(application(404).kind(), ErrorKind::UnsupportedMethod);
        assert_eq!(application(-103).kind(), ErrorKind::Application);
        assert_eq!(
            RpcError::NotAllowed {
                method: "Sys.Reboot".into()
            }
            .kind(),
            ErrorKind::NotAllowed
        );
    }

    #[test]
    fn structured_fields_follow_the_failing_layer() {
        let t = transport(Some(502));
        assert_eq!((t.status(), t.code()), (Some(502), None));
        let a = application(-1);
        assert_eq!((a.status(), a.code()), (None, Some(-1)));
        assert_eq!(a.method(), "Schedule.List");
        assert_eq!(a.to_string(), "Schedule.List failed: rpc error -1: nope");
    }
}
