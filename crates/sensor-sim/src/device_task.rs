//! Virtual device actor task
//!
//! Owns a [`VirtualDevice`] and connects it to an async stream: host
//! requests read from the stream are answered, and reading changes sent over
//! the command channel are written back as protocol lines.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::VirtualDevice;

/// Commands that can be sent to a virtual device actor
#[derive(Debug, Clone)]
pub enum VirtualDeviceCommand {
    SetBrightness(i32),
    SetTemperature(i32),
    SetHumidity(i32),
    PressDoorbell(bool),
    /// Emit a `LOG=` line
    Log(String),
    /// Write raw bytes as-is
    SendRaw(Vec<u8>),
    /// Stop answering requests
    SetSilent(bool),
    /// Close the connection
    Shutdown,
}

/// Run the virtual device actor task
///
/// Ends when the host closes the stream, on `Shutdown`, or when the command
/// channel closes. Returns the device so callers can inspect what it
/// received.
pub async fn run_virtual_device_task<S>(
    mut stream: S,
    mut device: VirtualDevice,
    mut cmd_rx: mpsc::Receiver<VirtualDeviceCommand>,
) -> io::Result<VirtualDevice>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = [0u8; 256];

    info!("Starting virtual device task for {}", device.type_id());

    loop {
        tokio::select! {
            result = stream.read(&mut buf) => {
                match result {
                    Ok(0) => {
                        debug!("Virtual device stream closed for {}", device.type_id());
                        break;
                    }
                    Ok(n) => {
                        debug!(
                            "Virtual device {} received {:?}",
                            device.type_id(),
                            String::from_utf8_lossy(&buf[..n])
                        );
                        device.process_input(&buf[..n]);
                    }
                    Err(e) => {
                        warn!("Virtual device {} stream error: {}", device.type_id(), e);
                        return Err(e);
                    }
                }
            }

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(VirtualDeviceCommand::SetBrightness(v)) => device.set_brightness(v),
                    Some(VirtualDeviceCommand::SetTemperature(v)) => device.set_temperature(v),
                    Some(VirtualDeviceCommand::SetHumidity(v)) => device.set_humidity(v),
                    Some(VirtualDeviceCommand::PressDoorbell(p)) => device.press_doorbell(p),
                    Some(VirtualDeviceCommand::Log(msg)) => device.log(&msg),
                    Some(VirtualDeviceCommand::SendRaw(bytes)) => device.queue_raw(bytes),
                    Some(VirtualDeviceCommand::SetSilent(silent)) => device.set_silent(silent),
                    Some(VirtualDeviceCommand::Shutdown) => {
                        info!("Shutdown requested for virtual device {}", device.type_id());
                        break;
                    }
                    None => {
                        debug!("Command channel closed for virtual device {}", device.type_id());
                        break;
                    }
                }
            }
        }

        while let Some(out) = device.take_output() {
            stream.write_all(&out).await?;
        }
        stream.flush().await?;
    }

    info!("Virtual device task ended for {}", device.type_id());
    Ok(device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VirtualDeviceConfig;
    use std::time::Duration;
    use tokio::io::duplex;

    async fn read_text<S: AsyncRead + Unpin>(stream: &mut S, expected: usize) -> String {
        let mut out = Vec::new();
        let mut buf = [0u8; 64];
        while out.len() < expected {
            let n = tokio::time::timeout(Duration::from_secs(1), stream.read(&mut buf))
                .await
                .unwrap()
                .unwrap();
            assert!(n > 0, "stream closed early");
            out.extend_from_slice(&buf[..n]);
        }
        String::from_utf8(out).unwrap()
    }

    #[tokio::test]
    async fn test_answers_identification() {
        let (mut host, dev_stream) = duplex(256);
        let device = VirtualDevice::new(VirtualDeviceConfig::room_sensor());
        let (_cmd_tx, cmd_rx) = mpsc::channel(8);
        let task = tokio::spawn(run_virtual_device_task(dev_stream, device, cmd_rx));

        host.write_all(b"TYPEID\n").await.unwrap();
        assert_eq!(read_text(&mut host, 19).await, "TYPEID=roomsensor\r\n");

        drop(host);
        let device = task.await.unwrap().unwrap();
        assert_eq!(device.received(), ["TYPEID"]);
    }

    #[tokio::test]
    async fn test_commands_produce_lines() {
        let (mut host, dev_stream) = duplex(256);
        let device = VirtualDevice::new(VirtualDeviceConfig::doorbell());
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let task = tokio::spawn(run_virtual_device_task(dev_stream, device, cmd_rx));

        cmd_tx.send(VirtualDeviceCommand::PressDoorbell(true)).await.unwrap();
        assert_eq!(read_text(&mut host, 23).await, "DOORBELL_PRESSED=true\r\n");

        cmd_tx
            .send(VirtualDeviceCommand::SendRaw(b"garbage\r\n".to_vec()))
            .await
            .unwrap();
        assert_eq!(read_text(&mut host, 9).await, "garbage\r\n");

        cmd_tx.send(VirtualDeviceCommand::Shutdown).await.unwrap();
        let result = tokio::time::timeout(Duration::from_millis(100), task)
            .await
            .unwrap();
        assert!(result.unwrap().is_ok());

        let mut buf = [0u8; 8];
        assert_eq!(host.read(&mut buf).await.unwrap(), 0);
    }
}
