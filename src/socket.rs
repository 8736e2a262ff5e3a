use std::io::{self, Read};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tokio::io::unix::AsyncFd;

use crate::resolver::AddressFamily;

/// Large enough for any datagram the kernel hands back.
pub const RECV_BUFFER_LEN: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketKind {
    /// Unprivileged ping socket (`SOCK_DGRAM`).
    Datagram,
    /// `SOCK_RAW`, usually needs elevated privileges.
    Raw,
}

/// Non-blocking ICMP socket registered with the tokio reactor.
#[derive(Debug)]
pub struct IcmpSocket {
    inner: AsyncFd<Socket>,
    family: AddressFamily,
    kind: SocketKind,
    identifier: u16,
}

impl IcmpSocket {
    /// Opens an ICMP socket for `family`, preferring a datagram ping socket
    /// and falling back to a raw one.
    ///
    /// Linux datagram ping sockets stamp outgoing echoes with the socket's
    /// local "port" and only deliver replies carrying it, so the socket is
    /// bound to `identifier`. If that identifier is taken the kernel picks
    /// one; `identifier()` reports whichever ended up in use.
    pub fn open(family: AddressFamily, identifier: u16) -> io::Result<Self> {
        let (domain, protocol) = match family {
            AddressFamily::V4 => (Domain::IPV4, Protocol::ICMPV4),
            AddressFamily::V6 => (Domain::IPV6, Protocol::ICMPV6),
        };

        let (socket, kind) = match Socket::new(domain, Type::DGRAM, Some(protocol)) {
            Ok(socket) => (socket, SocketKind::Datagram),
            Err(dgram_err) => {
                log::debug!("datagram {family} ICMP socket unavailable ({dgram_err}), trying raw");
                (Socket::new(domain, Type::RAW, Some(protocol))?, SocketKind::Raw)
            }
        };

        let identifier = if kind == SocketKind::Datagram && cfg!(target_os = "linux") {
            bind_identifier(&socket, family, identifier)?
        } else {
            identifier
        };

        log::debug!("opened {kind:?} {family} ICMP socket, identifier {identifier:#06x}");
        Self::from_socket(socket, family, kind, identifier)
    }

    /// Registers an already configured socket with the reactor.
    pub(crate) fn from_socket(
        socket: Socket,
        family: AddressFamily,
        kind: SocketKind,
        identifier: u16,
    ) -> io::Result<Self> {
        socket.set_nonblocking(true)?;
        Ok(Self {
            inner: AsyncFd::new(socket)?,
            family,
            kind,
            identifier,
        })
    }

    pub fn family(&self) -> AddressFamily {
        self.family
    }

    pub fn kind(&self) -> SocketKind {
        self.kind
    }

    /// Echo identifier replies will carry.
    pub fn identifier(&self) -> u16 {
        self.identifier
    }

    /// Writes one packet without waiting. A would-block or partial write is
    /// an error for the caller to report.
    pub fn send_to(&self, packet: &[u8], addr: &SockAddr) -> io::Result<()> {
        let written = self.inner.get_ref().send_to(packet, addr)?;
        if written != packet.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short write: {written} of {} bytes", packet.len()),
            ));
        }
        Ok(())
    }

    /// Waits for the next datagram. Cancel-safe.
    pub async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let mut guard = self.inner.readable().await?;
            match guard.try_io(|inner| {
                let mut socket: &Socket = inner.get_ref();
                socket.read(buf)
            }) {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }
}

fn bind_identifier(socket: &Socket, family: AddressFamily, identifier: u16) -> io::Result<u16> {
    match socket.bind(&unspecified(family, identifier)) {
        Ok(()) => Ok(identifier),
        Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
            log::debug!("identifier {identifier:#06x} in use, letting the kernel choose");
            socket.bind(&unspecified(family, 0))?;
            socket
                .local_addr()?
                .as_socket()
                .map(|addr| addr.port())
                .ok_or_else(|| io::Error::other("ICMP socket has no local address"))
        }
        Err(e) => Err(e),
    }
}

pub(crate) fn unspecified(family: AddressFamily, port: u16) -> SockAddr {
    let addr = match family {
        AddressFamily::V4 => SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), port),
        AddressFamily::V6 => SocketAddr::new(Ipv6Addr::UNSPECIFIED.into(), port),
    };
    SockAddr::from(addr)
}

/// Receive errors that concern one datagram rather than the socket.
pub fn is_transient(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::WouldBlock
            | io::ErrorKind::Interrupted
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::HostUnreachable
            | io::ErrorKind::NetworkUnreachable
    )
}
