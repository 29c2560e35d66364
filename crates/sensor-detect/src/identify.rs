//! Device identification handshake
//!
//! A freshly opened port is given a short settle delay (most boards reset
//! when the port opens), then sent `TYPEID\n`. The device answers with
//! `TYPEID=<id>\r\n`; the id is matched against the supported types.
//!
//! The handshake is an explicit state machine, [`IdentificationSession`],
//! fed with bytes and timestamps. [`Identifier::identify`] drives it from a
//! stream with timers for the settle delay and the overall deadline.
//!
//! ```text
//! Started --TYPEID sent--> WaitingResponse --TYPEID=<supported>--> Identified
//!    |                          |          --TYPEID=<other>------> Closed
//!    +--------------------------+--deadline--> TimedOut
//!    +--------------------------+--end of stream--> Closed
//! ```

use std::time::Duration;

use sensor_protocol::{
    EncodeCommand, ProtocolCodec, Request, SensorCodec, Verb, DEFAULT_MAX_LINE_LEN,
    DEVICE_LOG_TARGET,
};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, trace};

use crate::device::{SupportedType, SupportedTypes};
use crate::error::DetectError;
use crate::registry::PortRegistry;
use crate::transport::{PortTransport, SerialSettings};

/// Identification timing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifyConfig {
    /// Delay between opening the port and sending `TYPEID` (milliseconds)
    pub settle_delay_ms: u64,
    /// Total time allowed for a response, measured from session start
    /// (milliseconds)
    pub timeout_ms: u64,
    /// Cap for a single unterminated line; `None` for no cap
    #[serde(default = "default_max_line_len")]
    pub max_line_len: Option<usize>,
}

fn default_max_line_len() -> Option<usize> {
    Some(DEFAULT_MAX_LINE_LEN)
}

impl Default for IdentifyConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: 3_000,
            timeout_ms: 30_000,
            max_line_len: default_max_line_len(),
        }
    }
}

impl IdentifyConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// State of one identification attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Port open, waiting for the settle delay
    Started,
    /// `TYPEID` sent
    WaitingResponse,
    /// Device reported a supported type
    Identified(SupportedType),
    /// No answer within the time budget
    TimedOut,
    /// Device answered with an unsupported type, or the stream ended
    Closed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Identified(_) | SessionState::TimedOut | SessionState::Closed
        )
    }
}

/// Final result of an identification attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentifyOutcome {
    /// A supported device answered
    Identified(SupportedType),
    /// A device answered with a type we do not handle
    Unsupported(String),
    /// Nothing usable arrived before the deadline
    TimedOut,
    /// The stream ended before an answer
    Closed,
}

/// Per-port identification state machine
#[derive(Debug)]
pub struct IdentificationSession {
    port: String,
    codec: SensorCodec,
    supported: SupportedTypes,
    started_at: Instant,
    timeout: Duration,
    state: SessionState,
    rejected: Option<String>,
}

impl IdentificationSession {
    /// Start a session at `now`
    pub fn new(
        port: impl Into<String>,
        supported: SupportedTypes,
        config: &IdentifyConfig,
        now: Instant,
    ) -> Self {
        Self {
            port: port.into(),
            codec: SensorCodec::with_max_line_len(config.max_line_len),
            supported,
            started_at: now,
            timeout: config.timeout(),
            state: SessionState::Started,
            rejected: None,
        }
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// When the session gives up
    pub fn deadline(&self) -> Instant {
        self.started_at + self.timeout
    }

    /// The identification request was written
    pub fn request_sent(&mut self) {
        if self.state == SessionState::Started {
            trace!("{}: TYPEID requested", self.port);
            self.state = SessionState::WaitingResponse;
        }
    }

    /// Move to `TimedOut` if the budget is used up; returns whether it did
    pub fn check_timeout(&mut self, now: Instant) -> bool {
        if self.is_terminal() {
            return false;
        }
        if now.saturating_duration_since(self.started_at) >= self.timeout {
            debug!("{}: identification timed out", self.port);
            self.state = SessionState::TimedOut;
            return true;
        }
        false
    }

    /// Feed bytes read from the port
    pub fn on_data(&mut self, data: &[u8], now: Instant) {
        if self.is_terminal() || self.check_timeout(now) {
            return;
        }

        self.codec.push_bytes(data);
        while let Some(cmd) = self.codec.next_command() {
            match cmd.verb {
                Verb::TypeId => {
                    self.resolve(&cmd.value);
                    return;
                }
                Verb::Log => debug!(target: DEVICE_LOG_TARGET, "{}: {}", self.port, cmd.value),
                _ => debug!(
                    "{}: unexpected line during identification: {} ({} bytes queued)",
                    self.port,
                    cmd,
                    self.codec.buffered_len()
                ),
            }
        }
    }

    /// The stream reached end of file
    pub fn on_closed(&mut self) {
        if !self.is_terminal() {
            debug!("{}: port closed during identification", self.port);
            self.state = SessionState::Closed;
        }
    }

    /// Result once the session is terminal
    pub fn outcome(&self) -> Option<IdentifyOutcome> {
        match &self.state {
            SessionState::Started | SessionState::WaitingResponse => None,
            SessionState::Identified(ty) => Some(IdentifyOutcome::Identified(ty.clone())),
            SessionState::TimedOut => Some(IdentifyOutcome::TimedOut),
            SessionState::Closed => Some(match &self.rejected {
                Some(id) => IdentifyOutcome::Unsupported(id.clone()),
                None => IdentifyOutcome::Closed,
            }),
        }
    }

    fn resolve(&mut self, type_id: &str) {
        match self.supported.find(type_id) {
            Some(ty) => {
                info!("{}: identified as {} ({})", self.port, ty.label, ty.id);
                self.state = SessionState::Identified(ty.clone());
            }
            None => {
                debug!("{}: unsupported type id {:?}", self.port, type_id);
                self.rejected = Some(type_id.to_string());
                self.state = SessionState::Closed;
            }
        }
    }
}

/// Runs identification sessions against streams
#[derive(Debug, Clone, Default)]
pub struct Identifier {
    config: IdentifyConfig,
    supported: SupportedTypes,
}

impl Identifier {
    pub fn new(config: IdentifyConfig, supported: SupportedTypes) -> Self {
        Self { config, supported }
    }

    pub fn config(&self) -> &IdentifyConfig {
        &self.config
    }

    pub fn supported(&self) -> &SupportedTypes {
        &self.supported
    }

    /// Run the handshake on an already opened stream
    ///
    /// Only write failures and read errors are reported as errors; a silent
    /// or foreign device is a normal outcome.
    pub async fn identify<S>(&self, port: &str, stream: &mut S) -> Result<IdentifyOutcome, DetectError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut session =
            IdentificationSession::new(port, self.supported.clone(), &self.config, Instant::now());
        let settle = sleep_until(Instant::now() + self.config.settle_delay());
        let deadline = sleep_until(session.deadline());
        tokio::pin!(settle);
        tokio::pin!(deadline);

        let mut buf = [0u8; 256];

        loop {
            tokio::select! {
                _ = &mut settle, if *session.state() == SessionState::Started => {
                    let request = Request::TypeId.encode();
                    stream.write_all(&request).await.map_err(|e| io_error(port, e))?;
                    stream.flush().await.map_err(|e| io_error(port, e))?;
                    session.request_sent();
                }

                _ = &mut deadline => {
                    session.check_timeout(Instant::now());
                }

                result = stream.read(&mut buf) => {
                    match result {
                        Ok(0) => session.on_closed(),
                        Ok(n) => {
                            trace!("{}: read {} bytes", port, n);
                            session.on_data(&buf[..n], Instant::now());
                        }
                        Err(e) => return Err(io_error(port, e)),
                    }
                }
            }

            if let Some(outcome) = session.outcome() {
                return Ok(outcome);
            }
        }
    }

    /// Claim, open, and identify a single port
    ///
    /// The port is released before this returns, whatever the outcome.
    pub async fn identify_port<T: PortTransport>(
        &self,
        transport: &T,
        registry: &PortRegistry,
        port: &str,
        settings: &SerialSettings,
    ) -> Result<IdentifyOutcome, DetectError> {
        let _lease = registry.claim(port)?;
        let mut stream = transport.open(port, settings)?;
        self.identify(port, &mut stream).await
    }
}

fn io_error(port: &str, e: std::io::Error) -> DetectError {
    DetectError::IoError {
        port: port.to_string(),
        reason: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, DuplexStream};

    fn start() -> (IdentificationSession, Instant) {
        let now = Instant::now();
        let session = IdentificationSession::new(
            "/dev/ttyACM0",
            SupportedTypes::default(),
            &IdentifyConfig::default(),
            now,
        );
        (session, now)
    }

    #[tokio::test]
    async fn test_session_identifies_supported_type() {
        let (mut session, now) = start();
        session.request_sent();
        assert_eq!(*session.state(), SessionState::WaitingResponse);

        session.on_data(b"LOG=booted\r\nTYPEID=room", now);
        assert_eq!(*session.state(), SessionState::WaitingResponse);
        session.on_data(b"sensor\r\n", now + Duration::from_secs(1));

        assert_eq!(
            session.outcome(),
            Some(IdentifyOutcome::Identified(SupportedType::new(
                "roomsensor",
                "Room Sensor"
            )))
        );
    }

    #[tokio::test]
    async fn test_session_rejects_unsupported_type() {
        let (mut session, now) = start();
        session.request_sent();
        session.on_data(b"TYPEID=toaster\r\n", now);
        assert_eq!(*session.state(), SessionState::Closed);
        assert_eq!(
            session.outcome(),
            Some(IdentifyOutcome::Unsupported("toaster".into()))
        );
    }

    #[tokio::test]
    async fn test_session_times_out_on_late_data() {
        let (mut session, now) = start();
        session.request_sent();
        session.on_data(b"LOG=still booting\r\n", now + Duration::from_secs(10));
        assert!(!session.is_terminal());

        session.on_data(b"TYPEID=roomsensor\r\n", now + Duration::from_secs(31));
        assert_eq!(*session.state(), SessionState::TimedOut);
        assert_eq!(session.outcome(), Some(IdentifyOutcome::TimedOut));
    }

    #[tokio::test]
    async fn test_terminal_state_is_sticky() {
        let (mut session, now) = start();
        session.on_data(b"TYPEID=doorbell\r\n", now);
        assert!(matches!(session.state(), SessionState::Identified(t) if t.id == "doorbell"));

        session.on_data(b"TYPEID=roomsensor\r\n", now);
        session.on_closed();
        assert!(!session.check_timeout(now + Duration::from_secs(3600)));
        assert!(matches!(session.state(), SessionState::Identified(t) if t.id == "doorbell"));
    }

    #[tokio::test]
    async fn test_session_closed_on_eof() {
        let (mut session, _) = start();
        session.on_closed();
        assert_eq!(session.outcome(), Some(IdentifyOutcome::Closed));
    }

    /// Answer the first `TYPEID\n` with `response`
    async fn fake_device(mut stream: DuplexStream, response: &'static [u8]) {
        let mut buf = [0u8; 64];
        let mut seen = Vec::new();
        loop {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(n) => {
                    seen.extend_from_slice(&buf[..n]);
                    if seen.ends_with(b"TYPEID\n") {
                        let _ = stream.write_all(response).await;
                    }
                }
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_identify_waits_for_settle_delay() {
        let (mut host, mut device) = duplex(256);
        let identifier = Identifier::default();

        let started = Instant::now();
        let probe =
            tokio::spawn(async move { identifier.identify("/dev/ttyACM0", &mut host).await });

        let mut buf = [0u8; 16];
        let n = device.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"TYPEID\n");
        assert!(started.elapsed() >= Duration::from_secs(3));

        device.write_all(b"TYPEID=doorbell\r\n").await.unwrap();
        let outcome = probe.await.unwrap();
        assert!(matches!(outcome, Ok(IdentifyOutcome::Identified(t)) if t.id == "doorbell"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_identify_unsupported_device() {
        let (mut host, device) = duplex(256);
        tokio::spawn(fake_device(device, b"TYPEID=ledcontrol\r\n"));

        let outcome = Identifier::default()
            .identify("/dev/ttyUSB0", &mut host)
            .await
            .unwrap();
        assert_eq!(outcome, IdentifyOutcome::Unsupported("ledcontrol".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_identify_silent_device_times_out() {
        let (mut host, _device) = duplex(256);
        let started = Instant::now();

        let outcome = Identifier::default()
            .identify("/dev/ttyUSB0", &mut host)
            .await
            .unwrap();

        assert_eq!(outcome, IdentifyOutcome::TimedOut);
        assert!(started.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_identify_is_repeatable() {
        for _ in 0..2 {
            let (mut host, device) = duplex(256);
            tokio::spawn(fake_device(device, b"TYPEID=roomsensor\r\n"));
            let outcome = Identifier::default()
                .identify("/dev/ttyACM0", &mut host)
                .await
                .unwrap();
            assert!(matches!(outcome, IdentifyOutcome::Identified(t) if t.id == "roomsensor"));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_identify_reports_closed_stream() {
        let (mut host, device) = duplex(256);
        drop(device);
        let result = Identifier::default().identify("/dev/ttyACM0", &mut host).await;
        // Writing to a closed duplex fails once the settle delay elapses,
        // unless the read side sees EOF first
        match result {
            Ok(IdentifyOutcome::Closed) | Err(DetectError::IoError { .. }) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
