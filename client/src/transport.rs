//! Blocking network transport under the protocol engine.
//!
//! The engine needs exactly three things from a transport: write one frame,
//! wait up to the configured deadline for one reply frame, and adjust that
//! deadline. A missed deadline is an ordinary outcome ([`Recv::Timeout`])
//! that drives the retransmission loop; a closed or broken socket is a
//! fatal error.

use std::io::{self, Read as _, Write as _};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, TcpStream, ToSocketAddrs as _, UdpSocket};
use std::time::Duration;

/// Default TNFS server port, for UDP and TCP alike.
pub const DEFAULT_PORT: u16 = 16384;

/// Outcome of waiting for a reply frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recv {
    /// A frame of this many bytes arrived.
    Data(usize),
    /// The deadline expired without data.
    Timeout,
}

/// One send/receive unit per exchange, with an explicit receive deadline.
///
/// Implemented by [`NetTransport`] for real sockets; tests substitute a
/// scripted implementation to exercise the engine without a network.
pub trait Transport {
    /// Writes one complete frame.
    fn send(&mut self, frame: &[u8]) -> io::Result<()>;

    /// Waits up to the current deadline and reads one frame into `buf`.
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<Recv>;

    /// Replaces the receive deadline used by subsequent [`Transport::recv`] calls.
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()>;
}

/// Wire transport selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Protocol {
    /// One datagram per frame. The protocol's native transport.
    #[default]
    Udp,
    /// Same framing over a stream socket. The client reads a single
    /// transport unit per response, which presumes the server writes each
    /// response with a single send; the known server implementations do.
    Tcp,
}

/// [`Transport`] over a connected OS socket.
///
/// Dropping the value releases the socket.
pub struct NetTransport {
    socket: Socket,
}

enum Socket {
    Udp(UdpSocket),
    Tcp(TcpStream),
}

impl NetTransport {
    /// Resolves `host` (IP literal or DNS name) and connects.
    pub fn connect(
        host: &str,
        port: u16,
        protocol: Protocol,
        timeout: Duration,
    ) -> io::Result<Self> {
        let addr = (host, port).to_socket_addrs()?.next().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no address found for {host}"),
            )
        })?;

        let socket = match protocol {
            Protocol::Udp => {
                let bind_addr: SocketAddr = match addr {
                    SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
                    SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
                };

                let socket = UdpSocket::bind(bind_addr)?;
                socket.connect(addr)?;
                socket.set_read_timeout(Some(timeout))?;

                Socket::Udp(socket)
            }
            Protocol::Tcp => {
                let stream = TcpStream::connect(addr)?;
                stream.set_nodelay(true)?;
                stream.set_read_timeout(Some(timeout))?;

                Socket::Tcp(stream)
            }
        };

        tracing::debug!(%addr, ?protocol, "connected");

        Ok(Self { socket })
    }
}

impl Transport for NetTransport {
    fn send(&mut self, frame: &[u8]) -> io::Result<()> {
        match &mut self.socket {
            Socket::Udp(socket) => {
                socket.send(frame)?;
            }
            Socket::Tcp(stream) => {
                stream.write_all(frame)?;
            }
        }

        Ok(())
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<Recv> {
        let result = match &mut self.socket {
            Socket::Udp(socket) => socket.recv(buf),
            Socket::Tcp(stream) => match stream.read(buf) {
                Ok(0) => Err(io::Error::new(
                    io::ErrorKind::ConnectionAborted,
                    "server closed the connection",
                )),
                other => other,
            },
        };

        match result {
            Ok(len) => Ok(Recv::Data(len)),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Ok(Recv::Timeout)
            }
            Err(e) => Err(e),
        }
    }

    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        match &self.socket {
            Socket::Udp(socket) => socket.set_read_timeout(Some(timeout)),
            Socket::Tcp(stream) => stream.set_read_timeout(Some(timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn udp_round_trip_and_timeout() {
        let server = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = server.local_addr().unwrap().port();

        let mut transport = NetTransport::connect(
            "127.0.0.1",
            port,
            Protocol::Udp,
            Duration::from_millis(50),
        )
        .unwrap();

        transport.send(b"ping").unwrap();

        let mut server_buf = [0u8; 16];
        let (len, peer) = server.recv_from(&mut server_buf).unwrap();
        assert_eq!(&server_buf[..len], b"ping");

        server.send_to(b"pong", peer).unwrap();

        let mut buf = [0u8; 16];
        assert_eq!(transport.recv(&mut buf).unwrap(), Recv::Data(4));
        assert_eq!(&buf[..4], b"pong");

        // Nothing else in flight, so the next wait must report a timeout.
        assert_eq!(transport.recv(&mut buf).unwrap(), Recv::Timeout);
    }

    #[test]
    fn unresolvable_host_is_an_error() {
        let result = NetTransport::connect(
            "host.invalid.",
            DEFAULT_PORT,
            Protocol::Udp,
            Duration::from_millis(50),
        );

        assert!(result.is_err());
    }
}
