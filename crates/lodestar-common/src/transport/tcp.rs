use std::io::Write;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::debug;

use crate::buffer::ByteBuffer;
use crate::protocol::{Result, RpcError};
use crate::transport::framing;

/// Default timeout for connect and per-read/write socket operations.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum body size accepted on the client receive path (10 MB). Tighter
/// than the server-side frame ceiling: a reply this large means something is
/// wrong.
pub const MAX_RECEIVE_SIZE: usize = 10 * 1024 * 1024;

/// A blocking client-side connection speaking the framed wire protocol.
///
/// # Wire Protocol
///
/// Messages are sent with a 4-byte length prefix (big-endian u32) followed
/// by the body:
///
/// ```text
/// [4-byte length] [body]
/// ```
///
/// # Example
///
/// ```no_run
/// use lodestar_common::transport::ClientConnection;
///
/// let mut conn = ClientConnection::connect("127.0.0.1:9000").unwrap();
/// conn.send(b"framed body").unwrap();
/// let reply = conn.receive().unwrap();
/// ```
pub struct ClientConnection {
    stream: TcpStream,
    addr: String,
    /// Bytes received past the last complete message; drained before the
    /// next socket read.
    residue: ByteBuffer,
}

impl ClientConnection {
    /// Connects with the default 5 second timeout.
    pub fn connect(addr: &str) -> Result<Self> {
        Self::connect_timeout(addr, DEFAULT_TIMEOUT)
    }

    /// Connects to `addr`, trying every resolved socket address until one
    /// succeeds, and arms read/write timeouts on the stream.
    pub fn connect_timeout(addr: &str, timeout: Duration) -> Result<Self> {
        let socket_addrs = addr
            .to_socket_addrs()
            .map_err(|e| RpcError::Connection(format!("invalid address '{}': {}", addr, e)))?;

        let mut last_err = None;
        for socket_addr in socket_addrs {
            match TcpStream::connect_timeout(&socket_addr, timeout) {
                Ok(stream) => {
                    stream
                        .set_read_timeout(Some(timeout))
                        .map_err(|e| RpcError::Connection(format!("set read timeout: {}", e)))?;
                    stream
                        .set_write_timeout(Some(timeout))
                        .map_err(|e| RpcError::Connection(format!("set write timeout: {}", e)))?;
                    stream.set_nodelay(true).ok();
                    debug!(%socket_addr, "connected");
                    return Ok(ClientConnection {
                        stream,
                        addr: addr.to_string(),
                        residue: ByteBuffer::new(),
                    });
                }
                Err(e) => last_err = Some(e),
            }
        }

        Err(RpcError::Connection(format!(
            "failed to connect to {}: {}",
            addr,
            last_err
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no addresses resolved".to_string())
        )))
    }

    /// The address this connection was opened against.
    pub fn peer(&self) -> &str {
        &self.addr
    }

    /// Frames `body` and writes it out, flushing so the request leaves now.
    pub fn send(&mut self, body: &[u8]) -> Result<()> {
        if body.is_empty() {
            return Err(RpcError::Protocol("refusing to send an empty frame".into()));
        }
        let frame = framing::encode(body);
        self.stream
            .write_all(&frame)
            .map_err(|e| map_io_error(e, "writing frame"))?;
        self.stream
            .flush()
            .map_err(|e| map_io_error(e, "flushing stream"))?;
        Ok(())
    }

    /// Receives one framed message.
    ///
    /// Reads exactly 4 bytes for the length, rejects zero and oversize
    /// lengths, then reads exactly that many body bytes.
    pub fn receive(&mut self) -> Result<Vec<u8>> {
        let header = self.read_exactly(framing::FRAME_HEADER_LEN)?;
        let len = u32::from_be_bytes(header.try_into().unwrap()) as usize;

        if len == 0 || len > MAX_RECEIVE_SIZE {
            return Err(RpcError::Protocol(format!(
                "invalid response frame length {} (max {})",
                len, MAX_RECEIVE_SIZE
            )));
        }

        self.read_exactly(len)
    }

    /// Reads exactly `n` bytes, draining residue buffered past an earlier
    /// message before touching the socket. A read of zero bytes means the
    /// peer closed the connection.
    fn read_exactly(&mut self, n: usize) -> Result<Vec<u8>> {
        loop {
            if self.residue.readable_bytes() >= n {
                return self.residue.take(n);
            }
            match self.residue.read_from(&mut self.stream) {
                Ok(0) => {
                    return Err(RpcError::Connection(
                        "peer closed the connection mid-message".into(),
                    ));
                }
                Ok(_) => {}
                Err(RpcError::Io(e)) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(RpcError::Io(e)) => return Err(map_io_error(e, "reading message")),
                Err(e) => return Err(e),
            }
        }
    }
}

/// Maps IO errors to the protocol error taxonomy: timeouts and would-block
/// become `Timeout`, connection-class errors become `Connection`, anything
/// else stays `Io`.
pub fn map_io_error(err: std::io::Error, context: &str) -> RpcError {
    match err.kind() {
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
            RpcError::Timeout(DEFAULT_TIMEOUT.as_millis() as u64)
        }
        std::io::ErrorKind::ConnectionReset
        | std::io::ErrorKind::ConnectionAborted
        | std::io::ErrorKind::BrokenPipe
        | std::io::ErrorKind::NotConnected => {
            RpcError::Connection(format!("{}: connection lost", context))
        }
        _ => RpcError::Io(err),
    }
}
