use tokio::sync::mpsc;

use crate::error::PingError;
use crate::resolver::ResolvedAddress;
use crate::session::PingSession;

/// Receives a session's events.
///
/// Events for one session are delivered one at a time, in order, and never
/// re-entrantly. Handlers run on the session's driver (or on whichever
/// thread called `send_one`) and must not block. Calling
/// [`PingSession::stop`] from any handler is allowed.
///
/// Every method defaults to doing nothing.
pub trait PingEventHandler: Send + Sync + 'static {
    /// The address was resolved and the socket is open. Pinging follows.
    fn on_started(&self, _session: &PingSession, _address: &ResolvedAddress) {}

    /// The session failed and is now stopped. No further events follow.
    fn on_failed(&self, _session: &PingSession, _error: &PingError) {}

    fn on_packet_sent(&self, _session: &PingSession, _sequence: u16, _packet: &[u8]) {}

    /// A single send failed; the session keeps running.
    fn on_send_failed(
        &self,
        _session: &PingSession,
        _sequence: u16,
        _packet: &[u8],
        _error: &PingError,
    ) {
    }

    /// `packet` is the ICMP message with any IP header removed.
    fn on_reply_received(&self, _session: &PingSession, _sequence: u16, _packet: &[u8]) {}

    /// `packet` is the datagram exactly as read from the socket.
    fn on_unexpected_packet(&self, _session: &PingSession, _packet: &[u8]) {}
}

/// Owned form of a session event.
#[derive(Debug, Clone)]
pub enum PingEvent {
    Started(ResolvedAddress),
    Failed(PingError),
    PacketSent { sequence: u16, size: usize },
    SendFailed { sequence: u16, error: PingError },
    ReplyReceived { sequence: u16, size: usize },
    UnexpectedPacket { size: usize },
}

impl PingEvent {
    /// Whether the session is stopped once this event has been raised.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PingEvent::Failed(_))
    }
}

/// Forwards events over an unbounded channel for async consumers.
#[derive(Debug, Clone)]
pub struct ChannelHandler {
    tx: mpsc::UnboundedSender<PingEvent>,
}

impl ChannelHandler {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PingEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, event: PingEvent) {
        // receiver gone means nobody is listening any more
        let _ = self.tx.send(event);
    }
}

impl PingEventHandler for ChannelHandler {
    fn on_started(&self, _session: &PingSession, address: &ResolvedAddress) {
        self.forward(PingEvent::Started(*address));
    }

    fn on_failed(&self, _session: &PingSession, error: &PingError) {
        self.forward(PingEvent::Failed(error.clone()));
    }

    fn on_packet_sent(&self, _session: &PingSession, sequence: u16, packet: &[u8]) {
        self.forward(PingEvent::PacketSent {
            sequence,
            size: packet.len(),
        });
    }

    fn on_send_failed(
        &self,
        _session: &PingSession,
        sequence: u16,
        _packet: &[u8],
        error: &PingError,
    ) {
        self.forward(PingEvent::SendFailed {
            sequence,
            error: error.clone(),
        });
    }

    fn on_reply_received(&self, _session: &PingSession, sequence: u16, packet: &[u8]) {
        self.forward(PingEvent::ReplyReceived {
            sequence,
            size: packet.len(),
        });
    }

    fn on_unexpected_packet(&self, _session: &PingSession, packet: &[u8]) {
        self.forward(PingEvent::UnexpectedPacket { size: packet.len() });
    }
}
