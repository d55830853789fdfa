use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use log::{debug, info, warn};
use parking_lot::Mutex;

use super::block::BlockError;
use super::commands::{self, Command, ReplyShape};
use super::transport::{Connector, DefaultConnector, Interrupt, TcpTransport, Transport};
use crate::error::ScopeError;
use crate::types::{Arg, Endpoint, Identity, Reply, TransportKind};

pub mod acquisition;
pub mod channel;
pub mod measure;
pub mod status;
pub mod waveform;

pub use measure::{TimeMeasurements, VoltageMeasurements};
pub use status::{ChannelStatus, SystemStatus, MAX_ERROR_DRAIN};

/// Immutable session configuration.
///
/// Holds everything needed to open a link but owns no resources; opening
/// happens in [`ScopeClientBuilder::build`] or [`ScopeClient::with_transport`].
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use rusty_scope::ConnectionConfig;
///
/// let config = ConnectionConfig {
///     timeout: Duration::from_secs(20),
///     ..ConnectionConfig::network("192.168.1.100")
/// };
/// assert_eq!(config.endpoint.to_string(), "192.168.1.100:5555");
/// ```
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub endpoint: Endpoint,
    /// Default bound on each reply read
    pub timeout: Duration,
    pub connect_timeout: Duration,
    /// Interval between `*OPC?` polls while waiting for completion
    pub opc_poll_interval: Duration,
    /// Reject instruments whose `*IDN?` model differs
    pub expected_model: Option<String>,
}

impl ConnectionConfig {
    pub fn network(host: &str) -> Self {
        Self {
            endpoint: Endpoint::Network {
                host: host.to_string(),
                port: TcpTransport::DEFAULT_PORT,
            },
            ..Self::default()
        }
    }

    pub fn local_bus(path: impl AsRef<Path>) -> Self {
        Self {
            endpoint: Endpoint::LocalBus {
                path: path.as_ref().to_path_buf(),
            },
            ..Self::default()
        }
    }

    pub fn kind(&self) -> TransportKind {
        self.endpoint.kind()
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::Network {
                host: "127.0.0.1".to_string(),
                port: TcpTransport::DEFAULT_PORT,
            },
            timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
            opc_poll_interval: Duration::from_millis(100),
            expected_model: None,
        }
    }
}

/// Builder for [`ScopeClient`].
///
/// ```no_run
/// use std::time::Duration;
/// use rusty_scope::ScopeClient;
///
/// let scope = ScopeClient::builder()
///     .network("192.168.1.100")
///     .timeout(Duration::from_secs(15))
///     .expect_model("DHO914S")
///     .build()?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Default)]
pub struct ScopeClientBuilder {
    host: Option<String>,
    port: Option<u16>,
    device: Option<std::path::PathBuf>,
    config: ConnectionConfig,
}

impl ScopeClientBuilder {
    pub fn network(mut self, host: &str) -> Self {
        self.host = Some(host.to_string());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Use a local-bus character device such as `/dev/usbtmc0`
    pub fn local_bus(mut self, path: impl AsRef<Path>) -> Self {
        self.device = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn opc_poll_interval(mut self, interval: Duration) -> Self {
        self.config.opc_poll_interval = interval;
        self
    }

    pub fn expect_model(mut self, model: &str) -> Self {
        self.config.expected_model = Some(model.to_string());
        self
    }

    /// Resolve the endpoint without opening anything.
    pub fn into_config(mut self) -> Result<ConnectionConfig, ScopeError> {
        self.config.endpoint = match (self.host, self.device) {
            (Some(_), Some(_)) => {
                return Err(ScopeError::InvalidArgument(
                    "Specify either a network host or a local-bus device, not both".to_string(),
                ))
            }
            (Some(host), None) => Endpoint::Network {
                host,
                port: self.port.unwrap_or(TcpTransport::DEFAULT_PORT),
            },
            (None, Some(path)) => Endpoint::LocalBus { path },
            (None, None) => {
                return Err(ScopeError::InvalidArgument(
                    "A network host or local-bus device must be specified".to_string(),
                ))
            }
        };
        Ok(self.config)
    }

    pub fn build(self) -> Result<ScopeClient, ScopeError> {
        ScopeClient::open(self.into_config()?, &DefaultConnector)
    }
}

/// Live connection to one oscilloscope.
///
/// All traffic goes through [`ScopeClient::execute`], which performs exactly
/// one transaction under a session-wide lock, so a client can be shared
/// between threads behind an `Arc`. Replies are read according to the reply
/// shape declared in the command vocabulary.
///
/// A reply read that fails part way leaves unknown bytes in flight, and a late
/// reply would otherwise be taken as the answer to the next query. The session
/// is then marked desynchronized and every later transaction fails with
/// [`ScopeError::LinkFailure`] until the caller opens a new session.
///
/// The transport is released by [`ScopeClient::close`] or when the client is
/// dropped.
pub struct ScopeClient {
    config: ConnectionConfig,
    transport: Mutex<Box<dyn Transport>>,
    interrupter: Option<Box<dyn Interrupt>>,
    closed: AtomicBool,
    desynchronized: AtomicBool,
}

impl ScopeClient {
    pub fn builder() -> ScopeClientBuilder {
        ScopeClientBuilder::default()
    }

    /// Open the configured endpoint through `connector`.
    pub fn open(config: ConnectionConfig, connector: &dyn Connector) -> Result<Self, ScopeError> {
        debug!("Opening session to {}", config.endpoint);
        let transport = connector.connect(&config.endpoint, config.connect_timeout)?;
        Self::with_transport(config, transport)
    }

    /// Wrap an already opened transport.
    ///
    /// When the configuration names an expected model the identity is checked
    /// here, and a mismatch is a connection failure.
    pub fn with_transport(
        config: ConnectionConfig,
        transport: Box<dyn Transport>,
    ) -> Result<Self, ScopeError> {
        let interrupter = transport.interrupter();
        let client = Self {
            config,
            transport: Mutex::new(transport),
            interrupter,
            closed: AtomicBool::new(false),
            desynchronized: AtomicBool::new(false),
        };

        if let Some(expected) = client.config.expected_model.clone() {
            client.verify_model(&expected)?;
        }

        Ok(client)
    }

    fn verify_model(&self, expected: &str) -> Result<(), ScopeError> {
        let endpoint = self.config.endpoint.to_string();
        let identity = self.identity().map_err(|e| ScopeError::ConnectionFailure {
            endpoint: endpoint.clone(),
            reason: format!("identity query failed: {e}"),
        })?;

        if !identity.model.contains(expected) {
            return Err(ScopeError::ConnectionFailure {
                endpoint,
                reason: format!("connected device is not a {expected}: {identity}"),
            });
        }

        info!("Connected to {identity}");
        Ok(())
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    /// `false` once a failed reply read has left the request/reply pairing
    /// unknown. Such a session must be closed and reopened.
    pub fn is_synchronized(&self) -> bool {
        !self.desynchronized.load(Ordering::SeqCst)
    }

    /// Release the transport. Unblocks a transaction pending on another thread,
    /// which then fails with a link failure. Calling it again does nothing.
    ///
    /// Transports without an interrupter (local-bus device files) cannot be
    /// unblocked; close then waits for the pending read to end, which the
    /// kernel driver bounds with its own timeout.
    pub fn close(&self) -> Result<(), ScopeError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Some(interrupter) = &self.interrupter {
            interrupter.interrupt();
        }

        info!("Closing session to {}", self.config.endpoint);
        self.transport
            .lock()
            .close()
            .map_err(|e| ScopeError::LinkFailure {
                command: "close".to_string(),
                source: e,
            })
    }

    /// Run the vocabulary operation `name` with `args`.
    ///
    /// `timeout` bounds each read of the reply; `None` uses the session default.
    /// Write-only commands return [`Reply::Empty`] as soon as the line is sent
    /// and never read, so they cannot time out.
    pub fn execute(
        &self,
        name: &str,
        args: &[Arg],
        timeout: Option<Duration>,
    ) -> Result<Reply, ScopeError> {
        let command = commands::lookup(name)?;
        self.execute_command(command, args, timeout)
    }

    pub fn execute_command(
        &self,
        command: &Command,
        args: &[Arg],
        timeout: Option<Duration>,
    ) -> Result<Reply, ScopeError> {
        let line = command.render(args)?;
        let timeout = timeout.unwrap_or(self.config.timeout);

        let mut transport = self.transport.lock();
        if self.closed.load(Ordering::SeqCst) {
            return Err(ScopeError::LinkFailure {
                command: line,
                source: io::Error::new(io::ErrorKind::NotConnected, "session is closed"),
            });
        }
        if self.desynchronized.load(Ordering::SeqCst) {
            return Err(ScopeError::LinkFailure {
                command: line,
                source: io::Error::other(
                    "reply framing lost after an earlier failed read, reopen the session",
                ),
            });
        }

        debug!("-> {line}");
        transport.write_line(&line).map_err(|e| {
            self.desynchronize(&line);
            ScopeError::from_io(&line, e)
        })?;

        let reply = match command.reply {
            ReplyShape::None => Reply::Empty,
            ReplyShape::SingleLine => {
                let text = transport.read_line(timeout).map_err(|e| {
                    // A line that arrived whole but is not UTF-8 was consumed entirely
                    if e.kind() != io::ErrorKind::InvalidData {
                        self.desynchronize(&line);
                    }
                    ScopeError::from_io(&line, e)
                })?;
                debug!("<- {text}");
                Reply::Text(text)
            }
            ReplyShape::BinaryBlock => {
                let payload = transport.read_binary_block(timeout).map_err(|e| {
                    self.desynchronize(&line);
                    match e {
                        BlockError::Io(source) => ScopeError::from_io(&line, source),
                        BlockError::Malformed { reason, raw } => ScopeError::MalformedReply {
                            command: line.clone(),
                            reason,
                            raw,
                        },
                    }
                })?;
                debug!("<- block of {} bytes", payload.len());
                Reply::Block(payload)
            }
        };

        Ok(reply)
    }

    fn desynchronize(&self, line: &str) {
        if !self.desynchronized.swap(true, Ordering::SeqCst) {
            warn!("Lost reply framing during '{line}', session must be reopened");
        }
    }

    /// Run a write-only operation.
    pub fn send(&self, name: &str, args: &[Arg]) -> Result<(), ScopeError> {
        self.execute(name, args, None).map(|_| ())
    }

    /// Run a single-line query and return the text.
    pub fn query(&self, name: &str, args: &[Arg]) -> Result<String, ScopeError> {
        let reply = self.execute(name, args, None)?;
        reply.into_text().ok_or_else(|| {
            ScopeError::InvalidArgument(format!("'{name}' does not produce a text reply"))
        })
    }

    /// Run a single-line query and parse the reply as a number.
    pub fn query_f64(&self, name: &str, args: &[Arg]) -> Result<f64, ScopeError> {
        let text = self.query(name, args)?;
        text.trim()
            .parse::<f64>()
            .map_err(|_| ScopeError::malformed(name, format!("'{text}' is not a number"), text.as_bytes()))
    }

    /// Run a single-line query and parse the reply; a reply that does not parse is malformed.
    pub(crate) fn query_parsed<T>(&self, name: &str, args: &[Arg]) -> Result<T, ScopeError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        let text = self.query(name, args)?;
        text.trim()
            .parse::<T>()
            .map_err(|e| ScopeError::malformed(name, e.to_string(), text.as_bytes()))
    }

    /// Run a binary-block query and return the payload.
    pub fn query_block(&self, name: &str, args: &[Arg]) -> Result<Vec<u8>, ScopeError> {
        let reply = self.execute(name, args, None)?;
        reply.into_block().ok_or_else(|| {
            ScopeError::InvalidArgument(format!("'{name}' does not produce a block reply"))
        })
    }

    pub fn identity(&self) -> Result<Identity, ScopeError> {
        Identity::parse(&self.query("identity", &[])?)
    }

    /// Restore factory defaults. Completion is not awaited.
    pub fn reset(&self) -> Result<(), ScopeError> {
        self.send("reset", &[])
    }

    /// Run the instrument self test, returning its result code (0 = pass).
    pub fn self_test(&self) -> Result<i32, ScopeError> {
        let text = self.query("self_test", &[])?;
        text.trim()
            .parse()
            .map_err(|_| ScopeError::malformed("*TST?", format!("'{text}' is not a result code"), text.as_bytes()))
    }
}

impl Drop for ScopeClient {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Error while closing session: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scpi::mock::MockTransport;
    use std::sync::Arc;
    use std::thread;

    pub(crate) fn client_with(transport: MockTransport) -> ScopeClient {
        let config = ConnectionConfig {
            timeout: Duration::from_millis(50),
            opc_poll_interval: Duration::from_millis(5),
            ..ConnectionConfig::default()
        };
        ScopeClient::with_transport(config, Box::new(transport)).unwrap()
    }

    #[test]
    fn test_write_only_command_never_reads() {
        let transport = MockTransport::new();
        let handle = transport.handle();
        let client = client_with(transport);

        let reply = client
            .execute("channel_scale", &[Arg::Int(1), Arg::Float(0.5)], Some(Duration::ZERO))
            .unwrap();

        assert_eq!(reply, Reply::Empty);
        assert_eq!(handle.written(), vec!["CHAN1:SCAL 0.5"]);
        assert_eq!(handle.reads(), 0);
    }

    #[test]
    fn test_single_line_query() {
        let transport = MockTransport::with_responder(|line| {
            (line == "CHAN2:SCAL?").then(|| b"5.000000e-01\n".to_vec())
        });
        let client = client_with(transport);
        assert_eq!(client.query_f64("channel_scale_query", &[Arg::Int(2)]).unwrap(), 0.5);
    }

    #[test]
    fn test_single_line_reply_is_never_parsed_as_block() {
        let transport = MockTransport::with_input(b"#15hello\n");
        let client = client_with(transport);
        let reply = client.execute("identity", &[], None).unwrap();
        assert_eq!(reply, Reply::Text("#15hello".to_string()));
    }

    #[test]
    fn test_block_query() {
        let transport = MockTransport::with_input(b"#9000000002\x80\x8a\n");
        let client = client_with(transport);
        let reply = client.execute("waveform_data", &[], None).unwrap();
        assert_eq!(reply, Reply::Block(vec![0x80, 0x8a]));
    }

    #[test]
    fn test_block_query_with_bad_header_is_malformed() {
        let transport = MockTransport::with_input(b"0.125\n");
        let client = client_with(transport);
        let err = client.execute("waveform_data", &[], None).unwrap_err();
        match err {
            ScopeError::MalformedReply { command, .. } => assert_eq!(command, "WAV:DATA?"),
            other => panic!("expected malformed reply, got {other:?}"),
        }
    }

    #[test]
    fn test_block_closed_mid_payload_is_malformed() {
        let transport = MockTransport::with_input(b"#3100abc").closing_when_drained();
        let client = client_with(transport);
        assert!(matches!(
            client.execute("display_data", &[], None),
            Err(ScopeError::MalformedReply { .. })
        ));
    }

    #[test]
    fn test_missing_reply_is_link_timeout() {
        let client = client_with(MockTransport::new());
        assert!(matches!(
            client.execute("identity", &[], None),
            Err(ScopeError::LinkTimeout { command }) if command == "*IDN?"
        ));
    }

    #[test]
    fn test_timed_out_read_desynchronizes_session() {
        let transport = MockTransport::with_responder(|line| {
            (line == "TIM:SCAL?").then(|| b"1.0e-03\n".to_vec())
        });
        let handle = transport.handle();
        let client = client_with(transport);

        assert!(matches!(
            client.identity(),
            Err(ScopeError::LinkTimeout { .. })
        ));
        assert!(!client.is_synchronized());
        assert!(client.is_open());

        assert!(matches!(
            client.query("timebase_scale_query", &[]),
            Err(ScopeError::LinkFailure { .. })
        ));
        assert_eq!(handle.written(), vec!["*IDN?"]);
    }

    #[test]
    fn test_unparsable_line_keeps_session_in_sync() {
        let transport = MockTransport::with_input(b"abc\n1\n");
        let client = client_with(transport);

        assert!(matches!(
            client.query_f64("timebase_scale_query", &[]),
            Err(ScopeError::MalformedReply { .. })
        ));
        assert!(client.is_synchronized());
        assert_eq!(client.query("operation_complete", &[]).unwrap(), "1");
    }

    #[test]
    fn test_broken_block_desynchronizes_session() {
        let transport = MockTransport::with_input(b"#A123\n1\n");
        let client = client_with(transport);

        assert!(matches!(
            client.query_block("waveform_data", &[]),
            Err(ScopeError::MalformedReply { .. })
        ));
        assert!(!client.is_synchronized());
        assert!(client.query("operation_complete", &[]).is_err());
    }

    #[test]
    fn test_late_reply_is_never_paired_with_next_query() {
        use std::io::{BufRead, BufReader, Write};
        use std::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut writer = stream;
            let mut line = String::new();
            while matches!(reader.read_line(&mut line), Ok(n) if n > 0) {
                let reply: &[u8] = match line.trim_end() {
                    "*IDN?" => {
                        thread::sleep(Duration::from_millis(200));
                        b"RIGOL TECHNOLOGIES,DHO914S,X,1\n"
                    }
                    "TIM:SCAL?" => b"1.0e-03\n",
                    _ => b"",
                };
                if writer.write_all(reply).is_err() {
                    break;
                }
                line.clear();
            }
        });

        let client = ScopeClient::builder()
            .network("127.0.0.1")
            .port(port)
            .timeout(Duration::from_millis(50))
            .build()
            .unwrap();

        assert!(matches!(
            client.identity(),
            Err(ScopeError::LinkTimeout { .. })
        ));
        thread::sleep(Duration::from_millis(300));

        match client.query("timebase_scale_query", &[]) {
            Err(ScopeError::LinkFailure { .. }) => {}
            other => panic!("expected link failure, got {other:?}"),
        }

        client.close().unwrap();
        server.join().unwrap();
    }

    #[test]
    fn test_argument_mismatch_fails_before_io() {
        let transport = MockTransport::new();
        let handle = transport.handle();
        let client = client_with(transport);

        let result = client.execute("channel_scale", &[Arg::Int(1)], None);
        assert!(matches!(result, Err(ScopeError::MalformedReply { .. })));

        let result = client.execute("channel_scale", &[Arg::Int(1), Arg::Float(1.0), Arg::Int(3)], None);
        assert!(matches!(result, Err(ScopeError::MalformedReply { .. })));

        assert!(handle.written().is_empty());
        assert_eq!(handle.reads(), 0);
    }

    #[test]
    fn test_unknown_operation_fails_before_io() {
        let transport = MockTransport::new();
        let handle = transport.handle();
        let client = client_with(transport);
        assert!(matches!(
            client.execute("launch_rocket", &[], None),
            Err(ScopeError::UnknownOperation(_))
        ));
        assert!(handle.written().is_empty());
    }

    #[test]
    fn test_commands_are_sent_in_order() {
        let transport = MockTransport::new();
        let handle = transport.handle();
        let client = client_with(transport);

        client.send("stop", &[]).unwrap();
        client.send("waveform_source", &["CHAN1".into()]).unwrap();
        client.send("run", &[]).unwrap();

        assert_eq!(handle.written(), vec!["STOP", "WAV:SOUR CHAN1", "RUN"]);
    }

    #[test]
    fn test_expected_model_checked_on_open() {
        let config = ConnectionConfig {
            expected_model: Some("DHO914S".to_string()),
            ..ConnectionConfig::default()
        };
        let good = MockTransport::with_input(b"RIGOL TECHNOLOGIES,DHO914S,DHO9A1,00.01.02\n");
        assert!(ScopeClient::with_transport(config.clone(), Box::new(good)).is_ok());

        let wrong = MockTransport::with_input(b"RIGOL TECHNOLOGIES,DHO804,DHO8A1,00.01.02\n");
        assert!(matches!(
            ScopeClient::with_transport(config, Box::new(wrong)),
            Err(ScopeError::ConnectionFailure { .. })
        ));
    }

    #[test]
    fn test_close_is_idempotent_and_fails_later_calls() {
        let transport = MockTransport::new();
        let handle = transport.handle();
        let client = client_with(transport);

        client.close().unwrap();
        client.close().unwrap();
        assert!(!client.is_open());
        assert!(handle.is_closed());
        assert!(matches!(
            client.send("run", &[]),
            Err(ScopeError::LinkFailure { .. })
        ));
        assert!(handle.written().is_empty());
    }

    #[test]
    fn test_drop_releases_transport() {
        let transport = MockTransport::new();
        let handle = transport.handle();
        drop(client_with(transport));
        assert!(handle.is_closed());
    }

    #[test]
    fn test_shared_client_serializes_transactions() {
        let transport = MockTransport::with_responder(|line| match line {
            "*OPC?" => Some(b"1\n".to_vec()),
            "*IDN?" => Some(b"RIGOL TECHNOLOGIES,DHO914S,X,1\n".to_vec()),
            _ => None,
        });
        let client = Arc::new(client_with(transport));

        let workers: Vec<_> = (0..4)
            .map(|i| {
                let client = client.clone();
                thread::spawn(move || {
                    for _ in 0..25 {
                        if i % 2 == 0 {
                            assert_eq!(client.query("operation_complete", &[]).unwrap(), "1");
                        } else {
                            assert_eq!(client.identity().unwrap().model, "DHO914S");
                        }
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }
    }

    #[test]
    fn test_close_unblocks_pending_socket_read() {
        use std::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            thread::sleep(Duration::from_millis(500));
            drop(stream);
        });

        let client = Arc::new(
            ScopeClient::builder()
                .network("127.0.0.1")
                .port(port)
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap(),
        );

        let closer = {
            let client = client.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                client.close().unwrap();
            })
        };

        let result = client.execute("identity", &[], None);
        assert!(matches!(result, Err(ScopeError::LinkFailure { .. })));

        closer.join().unwrap();
        server.join().unwrap();
    }

    #[test]
    fn test_builder_requires_an_endpoint() {
        assert!(ScopeClient::builder().into_config().is_err());
        assert!(ScopeClient::builder()
            .network("10.0.0.2")
            .local_bus("/dev/usbtmc0")
            .into_config()
            .is_err());

        let config = ScopeClient::builder()
            .local_bus("/dev/usbtmc0")
            .into_config()
            .unwrap();
        assert_eq!(config.kind(), TransportKind::LocalBus);
    }
}
