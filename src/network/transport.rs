//! Transports
//!
//! A session talks to the server through a `Transport`: a byte stream that
//! can hand out an independent read handle for the receive loop and can be
//! shut down from the writing side.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::config::ClientConfig;
use crate::error::{LdapError, Result};

/// Bidirectional byte stream owned by one session
pub trait Transport: Read + Write + Send {
    /// Independent read handle used by the receive loop
    fn try_clone_reader(&self) -> io::Result<Box<dyn Read + Send>>;

    /// Close both directions, unblocking any reader
    fn shutdown(&self) -> io::Result<()>;

    /// Bound blocking reads on this handle (`None` = wait forever)
    fn set_read_timeout(&self, _timeout: Option<Duration>) -> io::Result<()> {
        Ok(())
    }

    /// Peer description for logging
    fn peer(&self) -> String {
        "unknown".to_string()
    }
}

/// Wraps an established connection in a secure channel
///
/// Called after the server accepted StartTLS and before any other message
/// is exchanged. The TLS stack itself lives outside this crate.
pub trait SecurityUpgrade: Send + Sync {
    fn upgrade(&self, transport: Box<dyn Transport>) -> Result<Box<dyn Transport>>;
}

/// Plain TCP transport
pub struct TcpTransport {
    stream: TcpStream,
    peer: String,
}

impl TcpTransport {
    /// Connect to `address` (`host:port`), trying every resolved address
    pub fn connect(address: &str, config: &ClientConfig) -> Result<Self> {
        let addrs = address
            .to_socket_addrs()
            .map_err(|e| LdapError::Connection(format!("cannot resolve {}: {}", address, e)))?;

        let mut last_error = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, config.connect_timeout()) {
                Ok(stream) => {
                    tracing::debug!("Connected to {}", addr);
                    return Self::from_stream(stream, config.tcp_nodelay);
                }
                Err(e) => {
                    tracing::debug!("Connect to {} failed: {}", addr, e);
                    last_error = Some(e);
                }
            }
        }

        Err(LdapError::Connection(match last_error {
            Some(e) => format!("cannot connect to {}: {}", address, e),
            None => format!("no addresses resolved for {}", address),
        }))
    }

    /// Wrap an already connected stream
    pub fn from_stream(stream: TcpStream, nodelay: bool) -> Result<Self> {
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        // Disable Nagle's algorithm for low latency
        stream
            .set_nodelay(nodelay)
            .map_err(|e| LdapError::Connection(e.to_string()))?;

        Ok(Self { stream, peer })
    }

    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }
}

impl Read for TcpTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for TcpTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl Transport for TcpTransport {
    fn try_clone_reader(&self) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(self.stream.try_clone()?))
    }

    fn shutdown(&self) -> io::Result<()> {
        match self.stream.shutdown(Shutdown::Both) {
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.stream.set_read_timeout(timeout)
    }

    fn peer(&self) -> String {
        self.peer.clone()
    }
}
