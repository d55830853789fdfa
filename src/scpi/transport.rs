//! Byte-channel abstraction underneath the SCPI transaction engine.
//!
//! A [`Transport`] moves whole lines and exact byte counts over an already
//! opened link. It never retries and never buffers beyond the reply currently
//! being assembled. How a link is found and opened is the job of a
//! [`Connector`]; the crate ships [`DefaultConnector`] for raw SCPI sockets and
//! local-bus character devices, other discovery mechanisms plug in through the
//! same trait.

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

use log::{debug, info, warn};

use super::block::{self, BlockError};
use crate::error::ScopeError;
use crate::types::Endpoint;

/// Line terminator used in both directions.
pub const LINE_TERMINATOR: u8 = b'\n';

/// Smallest read timeout handed to the OS; a zero timeout means "block forever" to std.
const MIN_READ_TIMEOUT: Duration = Duration::from_millis(1);

/// Duplex byte channel to one instrument.
pub trait Transport: Send {
    /// Write `line` followed by the line terminator.
    fn write_line(&mut self, line: &str) -> io::Result<()>;

    /// Read one line and return it without its terminator (`\n` or `\r\n`).
    fn read_line(&mut self, timeout: Duration) -> io::Result<String>;

    /// Fill `buf` completely.
    fn read_exact(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<()>;

    /// Release the link. Calling it again is a no-op.
    fn close(&mut self) -> io::Result<()>;

    /// Handle that can unblock a pending read from another thread.
    fn interrupter(&self) -> Option<Box<dyn Interrupt>> {
        None
    }

    /// Read one `#<n><len><payload>` block and its trailing terminator.
    fn read_binary_block(&mut self, timeout: Duration) -> Result<Vec<u8>, BlockError> {
        block::read_block(self, timeout)
    }
}

/// Aborts in-flight I/O on a transport. After interruption every pending and
/// future read fails.
pub trait Interrupt: Send + Sync {
    fn interrupt(&self);
}

/// Resolves an endpoint into an open transport.
pub trait Connector {
    fn connect(
        &self,
        endpoint: &Endpoint,
        connect_timeout: Duration,
    ) -> Result<Box<dyn Transport>, ScopeError>;
}

/// Opens [`TcpTransport`] for network endpoints and [`DeviceFileTransport`]
/// for local-bus endpoints.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultConnector;

impl Connector for DefaultConnector {
    fn connect(
        &self,
        endpoint: &Endpoint,
        connect_timeout: Duration,
    ) -> Result<Box<dyn Transport>, ScopeError> {
        let failure = |e: io::Error| {
            warn!("Failed to connect to {endpoint}: {e}");
            ScopeError::ConnectionFailure {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            }
        };

        match endpoint {
            Endpoint::Network { host, port } => {
                let transport = TcpTransport::connect(host, *port, connect_timeout).map_err(failure)?;
                Ok(Box::new(transport))
            }
            Endpoint::LocalBus { path } => {
                let transport = DeviceFileTransport::open(path).map_err(failure)?;
                Ok(Box::new(transport))
            }
        }
    }
}

fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "transport is closed")
}

/// Strip the terminator from a raw line, failing if the channel ended before it arrived.
fn finish_line(mut raw: Vec<u8>) -> io::Result<String> {
    if raw.last() != Some(&LINE_TERMINATOR) {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("channel closed after {} bytes of an unterminated line", raw.len()),
        ));
    }
    raw.pop();
    if raw.last() == Some(&b'\r') {
        raw.pop();
    }
    String::from_utf8(raw).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Raw SCPI socket (port 5555 on Rigol instruments).
pub struct TcpTransport {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    peer: SocketAddr,
    closed: bool,
}

impl TcpTransport {
    pub const DEFAULT_PORT: u16 = 5555;

    pub fn connect(host: &str, port: u16, connect_timeout: Duration) -> io::Result<Self> {
        let mut last_error = io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("{host}:{port} did not resolve to any address"),
        );

        for addr in (host, port).to_socket_addrs()? {
            debug!("Connecting to {addr}");
            match TcpStream::connect_timeout(&addr, connect_timeout) {
                Ok(stream) => return Self::from_stream(stream),
                Err(e) => last_error = e,
            }
        }

        Err(last_error)
    }

    pub fn from_stream(stream: TcpStream) -> io::Result<Self> {
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        let writer = stream.try_clone()?;
        info!("Connected to instrument at {peer}");
        Ok(Self {
            reader: BufReader::new(stream),
            writer,
            peer,
            closed: false,
        })
    }

    fn arm_timeout(&self, timeout: Duration) -> io::Result<()> {
        self.reader
            .get_ref()
            .set_read_timeout(Some(timeout.max(MIN_READ_TIMEOUT)))
    }
}

impl Transport for TcpTransport {
    fn write_line(&mut self, line: &str) -> io::Result<()> {
        if self.closed {
            return Err(not_connected());
        }
        let mut frame = Vec::with_capacity(line.len() + 1);
        frame.extend_from_slice(line.as_bytes());
        frame.push(LINE_TERMINATOR);
        self.writer.write_all(&frame)?;
        self.writer.flush()
    }

    fn read_line(&mut self, timeout: Duration) -> io::Result<String> {
        if self.closed {
            return Err(not_connected());
        }
        self.arm_timeout(timeout)?;
        let mut raw = Vec::new();
        self.reader.read_until(LINE_TERMINATOR, &mut raw)?;
        finish_line(raw)
    }

    fn read_exact(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<()> {
        if self.closed {
            return Err(not_connected());
        }
        self.arm_timeout(timeout)?;
        self.reader.read_exact(buf)
    }

    fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        info!("Closing connection to {}", self.peer);
        match self.writer.shutdown(Shutdown::Both) {
            Err(e) if e.kind() != io::ErrorKind::NotConnected => Err(e),
            _ => Ok(()),
        }
    }

    fn interrupter(&self) -> Option<Box<dyn Interrupt>> {
        self.writer
            .try_clone()
            .ok()
            .map(|stream| Box::new(SocketInterrupt(stream)) as Box<dyn Interrupt>)
    }
}

struct SocketInterrupt(TcpStream);

impl Interrupt for SocketInterrupt {
    fn interrupt(&self) {
        let _ = self.0.shutdown(Shutdown::Both);
    }
}

/// Local-bus instrument exposed as a character device, e.g. `/dev/usbtmc0`.
///
/// Read timeouts are governed by the kernel driver, the `timeout` arguments are
/// ignored. A blocking read on a device file cannot be aborted from another
/// thread, so this transport has no [`Interrupt`]; closing waits for the
/// pending read to return.
pub struct DeviceFileTransport {
    reader: Option<BufReader<File>>,
    writer: Option<File>,
}

impl DeviceFileTransport {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let writer = file.try_clone()?;
        info!("Opened local-bus instrument at {}", path.display());
        Ok(Self {
            reader: Some(BufReader::new(file)),
            writer: Some(writer),
        })
    }

    fn reader(&mut self) -> io::Result<&mut BufReader<File>> {
        self.reader.as_mut().ok_or_else(not_connected)
    }
}

impl Transport for DeviceFileTransport {
    fn write_line(&mut self, line: &str) -> io::Result<()> {
        let writer = self.writer.as_mut().ok_or_else(not_connected)?;
        let mut frame = Vec::with_capacity(line.len() + 1);
        frame.extend_from_slice(line.as_bytes());
        frame.push(LINE_TERMINATOR);
        writer.write_all(&frame)?;
        writer.flush()
    }

    fn read_line(&mut self, _timeout: Duration) -> io::Result<String> {
        let mut raw = Vec::new();
        self.reader()?.read_until(LINE_TERMINATOR, &mut raw)?;
        finish_line(raw)
    }

    fn read_exact(&mut self, buf: &mut [u8], _timeout: Duration) -> io::Result<()> {
        self.reader()?.read_exact(buf)
    }

    fn close(&mut self) -> io::Result<()> {
        self.writer = None;
        if self.reader.take().is_some() {
            info!("Closed local-bus instrument");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn test_finish_line_strips_terminators() {
        assert_eq!(finish_line(b"1\n".to_vec()).unwrap(), "1");
        assert_eq!(finish_line(b"RIGOL,DHO914S\r\n".to_vec()).unwrap(), "RIGOL,DHO914S");
    }

    #[test]
    fn test_finish_line_rejects_truncation() {
        let err = finish_line(b"0.04".to_vec()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
        let err = finish_line(Vec::new()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_tcp_line_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            assert_eq!(line, "*IDN?\n");
            let mut stream = stream;
            stream.write_all(b"RIGOL TECHNOLOGIES,DHO914S,X,1\n").unwrap();
        });

        let mut transport =
            TcpTransport::connect("127.0.0.1", port, Duration::from_secs(1)).unwrap();
        transport.write_line("*IDN?").unwrap();
        let reply = transport.read_line(Duration::from_secs(2)).unwrap();
        assert_eq!(reply, "RIGOL TECHNOLOGIES,DHO914S,X,1");

        server.join().unwrap();
        transport.close().unwrap();
        transport.close().unwrap();
        assert_eq!(
            transport.write_line("*IDN?").unwrap_err().kind(),
            io::ErrorKind::NotConnected
        );
    }

    #[test]
    fn test_tcp_read_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            thread::sleep(Duration::from_millis(300));
            drop(stream);
        });

        let mut transport =
            TcpTransport::connect("127.0.0.1", port, Duration::from_secs(1)).unwrap();
        let err = transport.read_line(Duration::from_millis(50)).unwrap_err();
        assert!(matches!(
            err.kind(),
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
        ));
        server.join().unwrap();
    }

    #[test]
    fn test_default_connector_reports_connection_failure() {
        let missing = Endpoint::LocalBus {
            path: "/nonexistent/usbtmc42".into(),
        };
        let result = DefaultConnector.connect(&missing, Duration::from_millis(100));
        assert!(matches!(result, Err(ScopeError::ConnectionFailure { .. })));
    }

    #[test]
    fn test_device_file_close_releases_handles() {
        let path = std::env::temp_dir().join(format!("rusty-scope-usbtmc-{}", std::process::id()));
        std::fs::write(&path, b"RIGOL TECHNOLOGIES,DHO914S,X,1\n").unwrap();

        let mut transport = DeviceFileTransport::open(&path).unwrap();
        assert_eq!(
            transport.read_line(Duration::ZERO).unwrap(),
            "RIGOL TECHNOLOGIES,DHO914S,X,1"
        );
        assert!(transport.interrupter().is_none());

        transport.close().unwrap();
        assert!(transport.reader.is_none());
        assert!(transport.writer.is_none());
        transport.close().unwrap();
        assert_eq!(
            transport.write_line("*IDN?").unwrap_err().kind(),
            io::ErrorKind::NotConnected
        );
        assert_eq!(
            transport.read_line(Duration::ZERO).unwrap_err().kind(),
            io::ErrorKind::NotConnected
        );

        std::fs::remove_file(&path).unwrap();
    }
}
