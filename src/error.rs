use std::io;
use std::sync::Arc;

use crate::resolver::AddressStyle;
use crate::session::SessionState;

/// Prefix std puts in front of the getaddrinfo message when a lookup fails.
const LOOKUP_FAILURE_PREFIX: &str = "failed to lookup address information: ";

/// Why a hostname could not be turned into a usable address.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ResolutionError {
    #[error("hostname is empty")]
    EmptyHostname,

    #[error("cannot resolve {host}: {source}")]
    HostUnresolvable {
        host: String,
        #[source]
        source: Arc<io::Error>,
    },

    #[error("{host} has no address matching {style}")]
    NoAddressOfRequestedFamily { host: String, style: AddressStyle },
}

/// Every failure a session can report.
///
/// I/O errors are shared behind `Arc` so one failure can be handed to any
/// number of listeners.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PingError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error("cannot open ICMP socket: {0}")]
    SocketOpen(#[source] Arc<io::Error>),

    #[error("send failed: {0}")]
    Send(#[source] Arc<io::Error>),

    #[error("receive failed: {0}")]
    Receive(#[source] Arc<io::Error>),

    #[error("{operation} is not allowed while the session is {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    #[error("no tokio runtime is available to drive the session")]
    NoRuntime,

    #[error("session driver panicked")]
    DriverPanicked,
}

impl PingError {
    /// True for failures that end a session (delivered through `on_failed`).
    pub fn is_fatal(&self) -> bool {
        !matches!(self, PingError::Send(_) | PingError::InvalidState { .. })
    }
}

/// Renders a failure as a short human-readable string.
///
/// Resolution failures prefer the resolver's own (gai_strerror) wording, OS
/// failures the bare strerror text.
pub fn short_error_string(error: &PingError) -> String {
    match error {
        PingError::Resolution(ResolutionError::HostUnresolvable { source, .. }) => {
            lookup_error_text(source)
        }
        PingError::SocketOpen(source) | PingError::Send(source) | PingError::Receive(source) => {
            io_error_text(source)
        }
        other => other.to_string(),
    }
}

/// strerror text for a raw OS error code.
pub fn os_error_string(code: i32) -> String {
    strip_os_error_suffix(io::Error::from_raw_os_error(code).to_string())
}

fn lookup_error_text(error: &io::Error) -> String {
    if error.raw_os_error().is_some() {
        return io_error_text(error);
    }
    let text = error.to_string();
    match text.strip_prefix(LOOKUP_FAILURE_PREFIX) {
        Some(reason) => reason.to_string(),
        None => text,
    }
}

fn io_error_text(error: &io::Error) -> String {
    match error.raw_os_error() {
        Some(code) => os_error_string(code),
        None => error.to_string(),
    }
}

fn strip_os_error_suffix(text: String) -> String {
    match text.rsplit_once(" (os error ") {
        Some((reason, _)) => reason.to_string(),
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_failure_uses_resolver_wording() {
        let error = PingError::Resolution(ResolutionError::HostUnresolvable {
            host: "nowhere.invalid".to_string(),
            source: Arc::new(io::Error::other(
                "failed to lookup address information: Name or service not known",
            )),
        });
        assert_eq!(short_error_string(&error), "Name or service not known");
    }

    #[test]
    fn missing_family_renders_display_text() {
        let error = PingError::Resolution(ResolutionError::NoAddressOfRequestedFamily {
            host: "localhost".to_string(),
            style: AddressStyle::Ipv6Only,
        });
        assert_eq!(
            short_error_string(&error),
            "localhost has no address matching IPv6 only"
        );
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn os_errors_drop_the_code_suffix() {
        let error = PingError::SocketOpen(Arc::new(io::Error::from_raw_os_error(13)));
        assert_eq!(short_error_string(&error), "Permission denied");
        assert_eq!(os_error_string(1), "Operation not permitted");
    }

    #[test]
    fn custom_io_errors_pass_through() {
        let error = PingError::Send(Arc::new(io::Error::other("short write")));
        assert_eq!(short_error_string(&error), "short write");
    }

    #[test]
    fn fatality() {
        let send = PingError::Send(Arc::new(io::Error::other("x")));
        let receive = PingError::Receive(Arc::new(io::Error::other("x")));
        assert!(!send.is_fatal());
        assert!(receive.is_fatal());
        assert!(PingError::from(ResolutionError::EmptyHostname).is_fatal());
        assert!(PingError::DriverPanicked.is_fatal());
    }
}
