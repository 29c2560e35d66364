//! Async connection to an identified device
//!
//! Each link runs in its own spawned task. The task reads the port, frames
//! and decodes lines, and dispatches readings to a [`SensorHandler`]. It
//! also writes host requests: the deferred `CURRENTVALUES` after connecting,
//! periodic `REFRESH` when configured, and on-demand requests sent through
//! the command channel.
//!
//! Generic over the I/O type so virtual devices can use `DuplexStream` from
//! `tokio::io::duplex()`.

use std::sync::Arc;
use std::time::Duration;

use sensor_detect::{PortLease, SerialSettings};
use sensor_protocol::{
    dispatch, DoorbellMatch, EncodeCommand, ProtocolCodec, Request, SensorCodec, SensorHandler,
    DEFAULT_MAX_LINE_LEN,
};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, sleep, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::LinkError;

/// Steady-state link configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Delay between opening the port and requesting current values
    /// (milliseconds)
    pub current_values_delay_ms: u64,
    /// Send `REFRESH` at this interval (milliseconds)
    #[serde(default)]
    pub refresh_interval_ms: Option<u64>,
    /// Interpretation of `DOORBELL_PRESSED` payloads
    #[serde(default)]
    pub doorbell: DoorbellMatch,
    /// Cap for an unterminated line; `None` for no cap
    #[serde(default = "default_max_line_len")]
    pub max_line_len: Option<usize>,
    /// Line settings
    #[serde(default)]
    pub serial: SerialSettings,
}

fn default_max_line_len() -> Option<usize> {
    Some(DEFAULT_MAX_LINE_LEN)
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            current_values_delay_ms: 2000,
            refresh_interval_ms: None,
            doorbell: DoorbellMatch::default(),
            max_line_len: default_max_line_len(),
            serial: SerialSettings::default(),
        }
    }
}

/// Commands that can be sent to a link task
#[derive(Debug)]
pub enum LinkCommand {
    /// Write a request to the device and report the write result
    Send {
        request: Request,
        reply: oneshot::Sender<Result<(), LinkError>>,
    },
    /// Shutdown the task
    Shutdown,
}

/// Connection to one device
pub struct SensorConnection<T> {
    port: String,
    io: T,
    codec: SensorCodec,
    handler: Arc<dyn SensorHandler>,
    config: LinkConfig,
    buffer: Vec<u8>,
    _lease: Option<PortLease>,
}

impl<T> SensorConnection<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(
        port: impl Into<String>,
        io: T,
        handler: Arc<dyn SensorHandler>,
        config: LinkConfig,
    ) -> Self {
        Self {
            port: port.into(),
            io,
            codec: SensorCodec::with_max_line_len(config.max_line_len),
            handler,
            config,
            buffer: vec![0u8; 256],
            _lease: None,
        }
    }

    /// Keep the port claimed for as long as the connection exists
    pub fn with_lease(mut self, lease: PortLease) -> Self {
        self._lease = Some(lease);
        self
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    /// Write a request to the device
    pub async fn send(&mut self, request: Request) -> Result<(), LinkError> {
        debug!("{}: sending {}", self.port, request.keyword());
        self.io.write_all(&request.encode()).await?;
        self.io.flush().await?;
        Ok(())
    }

    /// Write a timer-driven request; failures are logged, the read side
    /// notices a dead port
    async fn send_scheduled(&mut self, request: Request) {
        if let Err(e) = self.send(request).await {
            warn!("{}: failed to send {}: {}", self.port, request.keyword(), e);
        }
    }

    fn on_data(&mut self, n: usize) {
        trace!("{}: read {} bytes", self.port, n);
        self.codec.push_bytes(&self.buffer[..n]);
        while let Some(cmd) = self.codec.next_command() {
            trace!("{}: line {}", self.port, cmd);
            dispatch(&cmd, self.handler.as_ref(), self.config.doorbell);
        }
    }

    /// Main read loop
    ///
    /// Runs until shutdown is requested, the command channel closes, the
    /// device closes the stream, or a read fails. Dropping the connection
    /// at the end closes the port and releases its lease.
    pub async fn run(mut self, mut cmd_rx: mpsc::Receiver<LinkCommand>) -> Result<(), LinkError> {
        info!("Starting link on {}", self.port);

        let current_values = sleep(Duration::from_millis(self.config.current_values_delay_ms));
        tokio::pin!(current_values);
        let mut current_values_pending = true;

        let mut refresh = self.config.refresh_interval_ms.map(|ms| {
            let period = Duration::from_millis(ms.max(1));
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        let result = loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(LinkCommand::Send { request, reply }) => {
                            let result = self.send(request).await;
                            let _ = reply.send(result);
                        }
                        Some(LinkCommand::Shutdown) | None => {
                            info!("Shutdown requested for link on {}", self.port);
                            break Ok(());
                        }
                    }
                }

                _ = &mut current_values, if current_values_pending => {
                    current_values_pending = false;
                    self.send_scheduled(Request::CurrentValues).await;
                }

                _ = next_tick(&mut refresh) => {
                    self.send_scheduled(Request::Refresh).await;
                }

                result = self.io.read(&mut self.buffer) => {
                    match result {
                        Ok(0) => {
                            info!("Device on {} closed the connection", self.port);
                            break Err(LinkError::Closed);
                        }
                        Ok(n) => self.on_data(n),
                        Err(e) => {
                            warn!("Read error on {}: {}", self.port, e);
                            break Err(LinkError::Io(e));
                        }
                    }
                }
            }
        };

        info!("Link ended on {}", self.port);
        result
    }
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
