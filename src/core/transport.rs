//! Network transport
//!
//! A [`Transport`] is a non-blocking byte pipe owned by one session worker.
//! [`TcpTransport::connect`] is the only blocking step and it can be cut
//! short by a deadline or a [`CancelToken`].

use std::io::{self, ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, trace};

/// Read iterations allowed while draining an orderly close
pub const DRAIN_LIMIT: usize = 1000;
/// Wait slices before a send is considered stalled
pub const SEND_SPIN_LIMIT: usize = 5000;

const CONNECT_SLICE: Duration = Duration::from_millis(20);
const IO_PAUSE: Duration = Duration::from_millis(1);

/// Errors on an open transport
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection reset by peer.")]
    PeerReset,
    #[error("Connection reset.")]
    Reset,
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl TransportError {
    fn from_io(e: io::Error) -> Self {
        match e.kind() {
            ErrorKind::ConnectionReset => TransportError::PeerReset,
            ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe => TransportError::Reset,
            _ => TransportError::Io(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;

fn os_code(e: &io::Error) -> i32 {
    e.raw_os_error().unwrap_or(-1)
}

/// Connect outcomes other than success. Display text is the status suffix
/// printed after `Connecting to "host:port"... `.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("timed out.")]
    TimedOut,
    #[error("cancelled.")]
    Cancelled,
    #[error("connection refused.")]
    Refused,
    #[error("failed (could not resolve host)")]
    Resolve(String),
    #[error("failed (err={})", os_code(.0))]
    Failed(io::Error),
}

/// Result of a non-blocking send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    Accepted(usize),
    WouldBlock,
    Closed,
}

/// Result of a non-blocking receive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvStatus {
    Data(usize),
    NoData,
    Closed,
}

/// Non-blocking byte stream
pub trait Transport: Send {
    fn send(&mut self, bytes: &[u8]) -> Result<SendStatus>;
    fn receive(&mut self, buf: &mut [u8]) -> Result<RecvStatus>;
    /// Release the stream; an orderly close drains in-flight bytes first
    fn close(&mut self, orderly: bool);
    fn is_open(&self) -> bool;
}

/// Shared cancel flag for in-flight blocking calls
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// TCP transport
pub struct TcpTransport {
    stream: Option<TcpStream>,
    peer: Option<SocketAddr>,
}

impl TcpTransport {
    /// Resolve and connect, giving up at `timeout` or when `cancel` fires
    pub fn connect(
        host: &str,
        port: u16,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> std::result::Result<Self, ConnectError> {
        let deadline = Instant::now() + timeout;
        let (tx, rx) = mpsc::channel();
        let target = host.to_string();

        // The helper owns the blocking resolve/connect. If we stop waiting it
        // finishes on its own within `timeout` and its result is dropped.
        thread::Builder::new()
            .name(format!("connect {}:{}", host, port))
            .spawn(move || {
                let _ = tx.send(connect_blocking(&target, port, timeout));
            })
            .map_err(ConnectError::Failed)?;

        loop {
            if cancel.is_cancelled() {
                return Err(ConnectError::Cancelled);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(ConnectError::TimedOut);
            }
            match rx.recv_timeout(CONNECT_SLICE.min(deadline - now)) {
                Ok(Ok(stream)) => {
                    if cancel.is_cancelled() {
                        let _ = stream.shutdown(Shutdown::Both);
                        return Err(ConnectError::Cancelled);
                    }
                    return Self::from_stream(stream).map_err(ConnectError::Failed);
                }
                Ok(Err(e)) => return Err(e),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(ConnectError::Failed(io::Error::new(
                        ErrorKind::Other,
                        "connect helper exited",
                    )))
                }
            }
        }
    }

    /// Wrap a connected stream, switching it to non-blocking mode
    pub fn from_stream(stream: TcpStream) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr().ok();
        Ok(Self {
            stream: Some(stream),
            peer,
        })
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }
}

fn connect_blocking(
    host: &str,
    port: u16,
    timeout: Duration,
) -> std::result::Result<TcpStream, ConnectError> {
    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|_| ConnectError::Resolve(host.to_string()))?
        .collect();
    if addrs.is_empty() {
        return Err(ConnectError::Resolve(host.to_string()));
    }

    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                debug!("connect to {} failed: {}", addr, e);
                last_err = Some(e);
            }
        }
    }

    Err(match last_err {
        Some(e) if e.kind() == ErrorKind::ConnectionRefused => ConnectError::Refused,
        Some(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
            ConnectError::TimedOut
        }
        Some(e) => ConnectError::Failed(e),
        None => ConnectError::Resolve(host.to_string()),
    })
}

impl Transport for TcpTransport {
    fn send(&mut self, bytes: &[u8]) -> Result<SendStatus> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(SendStatus::Closed);
        };
        match stream.write(bytes) {
            Ok(0) if !bytes.is_empty() => Ok(SendStatus::Closed),
            Ok(n) => Ok(SendStatus::Accepted(n)),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {
                Ok(SendStatus::WouldBlock)
            }
            Err(e) => Err(TransportError::from_io(e)),
        }
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<RecvStatus> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(RecvStatus::Closed);
        };
        match stream.read(buf) {
            Ok(0) if !buf.is_empty() => Ok(RecvStatus::Closed),
            Ok(n) => Ok(RecvStatus::Data(n)),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {
                Ok(RecvStatus::NoData)
            }
            Err(e) => Err(TransportError::from_io(e)),
        }
    }

    fn close(&mut self, orderly: bool) {
        let Some(mut stream) = self.stream.take() else {
            return;
        };
        if !orderly {
            let _ = stream.shutdown(Shutdown::Both);
            return;
        }

        let _ = stream.shutdown(Shutdown::Write);
        let mut scratch = [0u8; 512];
        for _ in 0..DRAIN_LIMIT {
            match stream.read(&mut scratch) {
                Ok(0) => break,
                Ok(n) => trace!("drained {} bytes on close", n),
                Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(IO_PAUSE),
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(_) => break,
            }
        }
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.close(false);
    }
}

/// Send every byte, waiting out `WouldBlock`. Returns `Ok(false)` if the
/// transport closed or `cancel` fired first.
pub fn send_all(transport: &mut dyn Transport, bytes: &[u8], cancel: &CancelToken) -> Result<bool> {
    let mut sent = 0;
    let mut spins = 0;
    while sent < bytes.len() {
        if cancel.is_cancelled() {
            return Ok(false);
        }
        match transport.send(&bytes[sent..])? {
            SendStatus::Accepted(n) => {
                sent += n;
                spins = 0;
            }
            SendStatus::WouldBlock => {
                spins += 1;
                if spins > SEND_SPIN_LIMIT {
                    return Err(TransportError::Io(io::Error::new(
                        ErrorKind::TimedOut,
                        "send stalled",
                    )));
                }
                thread::sleep(IO_PAUSE);
            }
            SendStatus::Closed => return Ok(false),
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn receive_some(transport: &mut TcpTransport) -> Vec<u8> {
        let mut buf = [0u8; 64];
        let deadline = Instant::now() + TIMEOUT;
        while Instant::now() < deadline {
            match transport.receive(&mut buf) {
                Ok(RecvStatus::Data(n)) => return buf[..n].to_vec(),
                Ok(RecvStatus::NoData) => thread::sleep(Duration::from_millis(5)),
                _ => break,
            }
        }
        Vec::new()
    }

    #[test]
    fn test_connect_and_exchange() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            stream.write_all(b"hello").unwrap();
            let mut buf = [0u8; 4];
            stream.read_exact(&mut buf).unwrap();
            buf
        });

        let mut transport =
            TcpTransport::connect("127.0.0.1", port, TIMEOUT, &CancelToken::new()).unwrap();
        assert!(transport.is_open());
        assert_eq!(receive_some(&mut transport), b"hello".to_vec());
        assert!(send_all(&mut transport, b"ping", &CancelToken::new()).unwrap());

        assert_eq!(&server.join().unwrap(), b"ping");
        transport.close(false);
        assert!(!transport.is_open());
        assert_eq!(transport.receive(&mut [0u8; 4]).unwrap(), RecvStatus::Closed);
    }

    #[test]
    fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = TcpTransport::connect("127.0.0.1", port, TIMEOUT, &CancelToken::new())
            .err()
            .unwrap();
        assert!(matches!(err, ConnectError::Refused));
        assert_eq!(err.to_string(), "connection refused.");
    }

    #[test]
    fn test_cancelled_connect() {
        let token = CancelToken::new();
        token.cancel();
        let err = TcpTransport::connect("127.0.0.1", 9, TIMEOUT, &token).err().unwrap();
        assert!(matches!(err, ConnectError::Cancelled));
    }

    #[test]
    fn test_peer_close_is_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            drop(stream);
        });

        let mut transport =
            TcpTransport::connect("127.0.0.1", port, TIMEOUT, &CancelToken::new()).unwrap();
        server.join().unwrap();

        let mut buf = [0u8; 16];
        let deadline = Instant::now() + TIMEOUT;
        let mut status = RecvStatus::NoData;
        while Instant::now() < deadline {
            match transport.receive(&mut buf) {
                Ok(RecvStatus::NoData) => thread::sleep(Duration::from_millis(5)),
                Ok(other) => {
                    status = other;
                    break;
                }
                Err(_) => {
                    status = RecvStatus::Closed;
                    break;
                }
            }
        }
        assert_eq!(status, RecvStatus::Closed);
    }

    #[test]
    fn test_orderly_close_is_bounded() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let (done_tx, done_rx) = mpsc::channel::<()>();
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            // Hold the connection open until the client finished closing
            let _ = done_rx.recv_timeout(TIMEOUT);
            drop(stream);
        });

        let mut transport =
            TcpTransport::connect("127.0.0.1", port, TIMEOUT, &CancelToken::new()).unwrap();
        let started = Instant::now();
        transport.close(true);
        assert!(started.elapsed() < TIMEOUT);
        assert!(!transport.is_open());

        done_tx.send(()).unwrap();
        server.join().unwrap();
    }

    #[test]
    fn test_connect_error_messages() {
        assert_eq!(ConnectError::TimedOut.to_string(), "timed out.");
        assert_eq!(ConnectError::Cancelled.to_string(), "cancelled.");
        assert_eq!(
            ConnectError::Resolve("nowhere".into()).to_string(),
            "failed (could not resolve host)"
        );
        assert_eq!(
            ConnectError::Failed(io::Error::from_raw_os_error(13)).to_string(),
            "failed (err=13)"
        );
        assert_eq!(TransportError::PeerReset.to_string(), "Connection reset by peer.");
    }
}
