//! ICMP echo sessions: resolve a host, ping it on a fixed interval and
//! correlate replies by identifier and sequence number.
//!
//! A [`PingSession`] reports each step through a [`PingEventHandler`]:
//! started, failed, packet sent, send failed, reply received and unexpected
//! packet. Statistics are left to the handler.

pub mod config;
pub mod error;
pub mod event;
pub mod packet;
pub mod resolver;
pub mod scheduler;
pub mod sequence;
pub mod session;
pub mod socket;

pub use config::{AppConfig, SessionOptions};
pub use error::{PingError, ResolutionError, os_error_string, short_error_string};
pub use event::{ChannelHandler, PingEvent, PingEventHandler};
pub use resolver::{AddressFamily, AddressStyle, HostTarget, ResolvedAddress, display_address};
pub use session::{PingSession, SessionState};
