use std::cell::RefCell;
use std::fmt;
use std::io;
use std::sync::{Arc, Weak};

use parking_lot::ReentrantMutex;
use tokio_util::sync::CancellationToken;

use crate::config::SessionOptions;
use crate::error::{PingError, short_error_string};
use crate::event::PingEventHandler;
use crate::packet::{self, Incoming};
use crate::resolver::{self, AddressFamily, HostTarget, ResolvedAddress};
use crate::scheduler::Scheduler;
use crate::sequence::SequenceWindow;
use crate::socket::{self, IcmpSocket, RECV_BUFFER_LEN};

/// Lifecycle of a [`PingSession`].
///
/// `Created -> Resolving` on `start()`, `Resolving -> Ready` once the address
/// is resolved and the socket is open, anything live `-> Stopped` on `stop()`
/// or a fatal error. `Stopped` is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Resolving,
    Ready,
    Stopped,
}

impl SessionState {
    fn is_live(self) -> bool {
        matches!(self, SessionState::Resolving | SessionState::Ready)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Created => "created",
            SessionState::Resolving => "resolving",
            SessionState::Ready => "ready",
            SessionState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

struct Inner {
    state: SessionState,
    identifier: u16,
    address: Option<ResolvedAddress>,
    socket: Option<Arc<IcmpSocket>>,
    sequence: SequenceWindow,
}

type SocketOpener = fn(AddressFamily, u16) -> io::Result<IcmpSocket>;

struct Shared {
    target: HostTarget,
    options: SessionOptions,
    handler: Arc<dyn PingEventHandler>,
    open_socket: SocketOpener,
    // Held for every state change and for the whole of each event dispatch.
    // Re-entrant so handlers may call back into the session; the RefCell is
    // never borrowed while a handler runs.
    inner: ReentrantMutex<RefCell<Inner>>,
    cancel: CancellationToken,
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Pings one host: resolves it, opens an ICMP socket, sends an echo request
/// every interval and reports what comes back to its [`PingEventHandler`].
///
/// Cloning yields another handle to the same session. The session's driver
/// runs on the tokio runtime `start()` was called from and ends once the
/// session stops or every handle is dropped.
#[derive(Clone)]
pub struct PingSession {
    shared: Arc<Shared>,
}

impl PingSession {
    pub fn new(target: HostTarget, handler: Arc<dyn PingEventHandler>) -> Self {
        Self::with_options(target, SessionOptions::default(), handler)
    }

    pub fn with_options(
        target: HostTarget,
        options: SessionOptions,
        handler: Arc<dyn PingEventHandler>,
    ) -> Self {
        Self::with_socket_opener(target, options, handler, IcmpSocket::open)
    }

    fn with_socket_opener(
        target: HostTarget,
        options: SessionOptions,
        handler: Arc<dyn PingEventHandler>,
        open_socket: SocketOpener,
    ) -> Self {
        let inner = Inner {
            state: SessionState::Created,
            identifier: rand::random::<u16>(),
            address: None,
            socket: None,
            sequence: SequenceWindow::new(options.correlation_window),
        };
        Self {
            shared: Arc::new(Shared {
                target,
                options,
                handler,
                open_socket,
                inner: ReentrantMutex::new(RefCell::new(inner)),
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn target(&self) -> &HostTarget {
        &self.shared.target
    }

    pub fn options(&self) -> &SessionOptions {
        &self.shared.options
    }

    pub fn state(&self) -> SessionState {
        self.with_inner(|inner| inner.state)
    }

    /// Echo identifier stamped on this session's packets.
    pub fn identifier(&self) -> u16 {
        self.with_inner(|inner| inner.identifier)
    }

    /// The address being pinged, once resolved.
    pub fn address(&self) -> Option<ResolvedAddress> {
        self.with_inner(|inner| inner.address)
    }

    /// Sequence number the next echo request will carry.
    pub fn next_sequence(&self) -> u16 {
        self.with_inner(|inner| inner.sequence.next())
    }

    /// Begins resolving the target. Must be called from within a tokio
    /// runtime, and only once per session.
    pub fn start(&self) -> Result<(), PingError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| PingError::NoRuntime)?;

        self.with_inner(|inner| {
            if inner.state != SessionState::Created {
                return Err(PingError::InvalidState {
                    operation: "start",
                    state: inner.state,
                });
            }
            inner.state = SessionState::Resolving;
            Ok(())
        })?;

        log::info!(
            "start: resolving {} ({})",
            self.shared.target.hostname,
            self.shared.target.address_style
        );
        let driver = runtime.spawn(drive(
            Arc::downgrade(&self.shared),
            self.shared.cancel.clone(),
        ));

        // a panicking driver fails the session
        let shared = Arc::downgrade(&self.shared);
        runtime.spawn(async move {
            if let Err(e) = driver.await {
                if e.is_panic() {
                    log::error!("driver panicked: {e}");
                    if let Some(session) = upgrade(&shared) {
                        session.fail(PingError::DriverPanicked);
                    }
                }
            }
        });
        Ok(())
    }

    /// Stops the session: cancels resolution or pinging and closes the
    /// socket. No event is raised once this returns. A no-op unless the
    /// session is resolving or ready; safe to call from any event handler.
    pub fn stop(&self) {
        let stopped = self.with_inner(|inner| {
            if !inner.state.is_live() {
                return false;
            }
            inner.state = SessionState::Stopped;
            inner.socket = None;
            true
        });

        if stopped {
            self.shared.cancel.cancel();
            log::info!("stop: {}", self.shared.target.hostname);
        }
    }

    /// Sends one echo request, with `payload` or the configured one.
    ///
    /// Returns the sequence number used. A failed write is reported through
    /// `on_send_failed` and does not stop the session; `Err` only means the
    /// session is not ready.
    pub fn send_one(&self, payload: Option<&[u8]>) -> Result<u16, PingError> {
        let guard = self.shared.inner.lock();
        let (sequence, packet, written) = {
            let mut inner = guard.borrow_mut();
            let (SessionState::Ready, Some(address), Some(socket)) =
                (inner.state, inner.address, inner.socket.clone())
            else {
                return Err(PingError::InvalidState {
                    operation: "send",
                    state: inner.state,
                });
            };

            let sequence = inner.sequence.advance();
            let payload = payload.unwrap_or(self.shared.options.payload.as_slice());
            let packet =
                packet::build_echo_request(address.family(), inner.identifier, sequence, payload);
            let written = socket.send_to(&packet, &address.to_sock_addr());
            (sequence, packet, written)
        };

        let handler = &self.shared.handler;
        match written {
            Ok(()) => {
                log::debug!("#{sequence} sent");
                handler.on_packet_sent(self, sequence, &packet);
            }
            Err(e) => {
                let error = PingError::Send(Arc::new(e));
                log::warn!("#{sequence} send failed: {}", short_error_string(&error));
                handler.on_send_failed(self, sequence, &packet, &error);
            }
        }
        drop(guard);
        Ok(sequence)
    }

    fn with_inner<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> R {
        let guard = self.shared.inner.lock();
        let mut inner = guard.borrow_mut();
        f(&mut inner)
    }

    /// Resolving -> Ready. False if the session stopped meanwhile, including
    /// from inside `on_started`.
    fn become_ready(&self, address: ResolvedAddress, socket: Arc<IcmpSocket>) -> bool {
        let guard = self.shared.inner.lock();
        {
            let mut inner = guard.borrow_mut();
            if inner.state != SessionState::Resolving {
                return false;
            }
            inner.identifier = socket.identifier();
            inner.address = Some(address);
            inner.socket = Some(socket);
            inner.state = SessionState::Ready;
        }

        log::info!("pinging {address}");
        self.shared.handler.on_started(self, &address);

        let still_ready = guard.borrow().state == SessionState::Ready;
        still_ready
    }

    /// Classifies one received datagram and raises the matching event.
    fn handle_datagram(&self, datagram: &[u8]) {
        let guard = self.shared.inner.lock();
        let correlated = {
            let inner = guard.borrow();
            let (SessionState::Ready, Some(address)) = (inner.state, inner.address) else {
                return;
            };
            match packet::parse_incoming(datagram, address.family(), inner.identifier) {
                Incoming::Reply(reply) if inner.sequence.contains(reply.sequence) => Some(reply),
                Incoming::Reply(reply) => {
                    log::debug!("reply #{} was never sent or is too old", reply.sequence);
                    None
                }
                Incoming::Unexpected(anomaly) => {
                    log::debug!("unexpected packet ({anomaly:?})");
                    None
                }
            }
        };

        let handler = &self.shared.handler;
        match correlated {
            Some(reply) => {
                let icmp = &datagram[datagram.len() - reply.size..];
                log::debug!("#{} received, size={}", reply.sequence, reply.size);
                handler.on_reply_received(self, reply.sequence, icmp);
            }
            None => handler.on_unexpected_packet(self, datagram),
        }
        drop(guard);
    }

    /// Ends a live session with a fatal error.
    fn fail(&self, error: PingError) {
        let guard = self.shared.inner.lock();
        let was_live = {
            let mut inner = guard.borrow_mut();
            let was_live = inner.state.is_live();
            if was_live {
                inner.state = SessionState::Stopped;
                inner.socket = None;
            }
            was_live
        };
        if !was_live {
            return;
        }

        self.shared.cancel.cancel();
        log::warn!(
            "{} failed: {}",
            self.shared.target.hostname,
            short_error_string(&error)
        );
        self.shared.handler.on_failed(self, &error);
        drop(guard);
    }
}

impl fmt::Debug for PingSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PingSession")
            .field("target", &self.shared.target)
            .field("state", &self.state())
            .field("identifier", &self.identifier())
            .finish_non_exhaustive()
    }
}

fn upgrade(shared: &Weak<Shared>) -> Option<PingSession> {
    shared.upgrade().map(|shared| PingSession { shared })
}

/// Runs a started session: resolve, open the socket, then interleave
/// scheduled sends with reads until cancelled. Holds only a weak reference
/// between events so dropping every handle ends it.
async fn drive(shared: Weak<Shared>, cancel: CancellationToken) {
    let Some((target, interval, mut remaining, open_socket)) = shared.upgrade().map(|shared| {
        (
            shared.target.clone(),
            shared.options.interval,
            shared.options.count,
            shared.open_socket,
        )
    }) else {
        return;
    };

    let resolved = tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        resolved = resolver::resolve(&target) => resolved,
    };

    let Some(session) = upgrade(&shared) else {
        return;
    };
    let address = match resolved {
        Ok(address) => address,
        Err(e) => {
            session.fail(e.into());
            return;
        }
    };
    let socket = match open_socket(address.family(), session.identifier()) {
        Ok(socket) => Arc::new(socket),
        Err(e) => {
            session.fail(PingError::SocketOpen(Arc::new(e)));
            return;
        }
    };
    if !session.become_ready(address, Arc::clone(&socket)) {
        return;
    }
    drop(session);

    let mut scheduler = Scheduler::new(interval);
    let mut buf = vec![0u8; RECV_BUFFER_LEN];
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = scheduler.tick(), if remaining != Some(0) => {
                let Some(session) = upgrade(&shared) else { break };
                if session.send_one(None).is_err() {
                    break;
                }
                remaining = remaining.map(|count| count - 1);
            }
            received = socket.recv(&mut buf) => {
                let Some(session) = upgrade(&shared) else { break };
                match received {
                    Ok(len) => session.handle_datagram(&buf[..len]),
                    Err(e) if socket::is_transient(&e) => {
                        log::debug!("transient receive error: {e}");
                    }
                    Err(e) => {
                        session.fail(PingError::Receive(Arc::new(e)));
                        break;
                    }
                }
            }
        }
    }
    log::debug!("driver for {} finished", target.hostname);
}
