//! Opening links and controlling running ones

use std::sync::Arc;

use sensor_detect::{select_port, PortRegistry, PortTransport};
use sensor_protocol::{Request, SensorHandler};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::info;

use crate::connection::{LinkCommand, LinkConfig, SensorConnection};
use crate::LinkError;

/// Handle to a running link task
#[derive(Debug)]
pub struct SensorLinkHandle {
    port: String,
    cmd_tx: mpsc::Sender<LinkCommand>,
    task: JoinHandle<Result<(), LinkError>>,
}

impl SensorLinkHandle {
    /// Port the link is connected to
    pub fn port(&self) -> &str {
        &self.port
    }

    /// Whether the link task has ended
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Write a request to the device
    pub async fn request(&self, request: Request) -> Result<(), LinkError> {
        let (reply, result) = oneshot::channel();
        self.cmd_tx
            .send(LinkCommand::Send { request, reply })
            .await
            .map_err(|_| LinkError::Closed)?;
        result.await.map_err(|_| LinkError::Closed)?
    }

    /// Ask the device for all current readings
    pub async fn request_current_values(&self) -> Result<(), LinkError> {
        self.request(Request::CurrentValues).await
    }

    /// Ask the device to refresh its readings
    pub async fn refresh(&self) -> Result<(), LinkError> {
        self.request(Request::Refresh).await
    }

    /// Switch an LED controller on or off
    pub async fn set_led(&self, on: bool) -> Result<(), LinkError> {
        let request = if on {
            Request::SwitchOn
        } else {
            Request::SwitchOff
        };
        self.request(request).await
    }

    /// Stop the link and wait for it to end
    ///
    /// When this returns the port is closed and released, and no deferred
    /// request can fire any more. Returns how the link ended if it had
    /// already stopped on its own.
    pub async fn shutdown(self) -> Result<(), LinkError> {
        let _ = self.cmd_tx.send(LinkCommand::Shutdown).await;
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(LinkError::TaskFailed(e.to_string())),
        }
    }
}

/// Spawn a link task over an already opened stream
pub fn spawn<S>(
    port: impl Into<String>,
    io: S,
    handler: Arc<dyn SensorHandler>,
    config: LinkConfig,
) -> SensorLinkHandle
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    start(SensorConnection::new(port, io, handler, config))
}

fn start<S>(conn: SensorConnection<S>) -> SensorLinkHandle
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let port = conn.port().to_string();
    let (cmd_tx, cmd_rx) = mpsc::channel(16);
    let task = tokio::spawn(conn.run(cmd_rx));
    SensorLinkHandle { port, cmd_tx, task }
}

/// Claim, open, and start a link
///
/// With `port` unset, the first enumerated port that appears in `fallback`
/// is used. The port stays claimed in `registry` until the link ends, so
/// discovery will not probe it meanwhile.
pub fn connect<T: PortTransport>(
    transport: &T,
    registry: &PortRegistry,
    port: Option<&str>,
    fallback: &[String],
    handler: Arc<dyn SensorHandler>,
    config: LinkConfig,
) -> Result<SensorLinkHandle, LinkError> {
    let port = match port {
        Some(port) => port.to_string(),
        None => select_port(&transport.enumerate_ports()?, None, fallback)?,
    };

    let lease = registry.claim(&port)?;
    let stream = transport.open(&port, &config.serial)?;
    info!("Connected to {}", port);

    Ok(start(
        SensorConnection::new(port, stream, handler, config).with_lease(lease),
    ))
}
