//! Remote Client (§4.F): one method per operation, request/response over a
//! serialized TCP connection.

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::error::{Result, SchedulerError};
use crate::protocol::{self, DeviceSummary, RemoteOperation, Response};

/// Connects to a remote manager and offers one call per wire operation.
/// Requests are serialized onto the single underlying connection — only
/// one request may be in flight at a time (an internal lock enforces
/// this), matching the server's serial per-client processing in §4.E.
pub struct RemoteClient {
    reader: Mutex<BufReader<tokio::net::tcp::OwnedReadHalf>>,
    writer: Mutex<tokio::net::tcp::OwnedWriteHalf>,
}

impl RemoteClient {
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        let stream = TcpStream::connect((host, port)).await?;
        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            reader: Mutex::new(BufReader::new(read_half)),
            writer: Mutex::new(write_half),
        })
    }

    async fn roundtrip(&self, op: RemoteOperation) -> Result<Response> {
        let line = protocol::encode(&op)?;

        let mut writer = self.writer.lock().await;
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        drop(writer);

        let mut reader = self.reader.lock().await;
        let mut response_line = String::new();
        let n = reader.read_line(&mut response_line).await?;
        if n == 0 {
            return Err(SchedulerError::RemoteWireError(
                "connection closed by peer".to_string(),
            ));
        }
        let response = protocol::decode_response(response_line.trim_end())?;
        Ok(response)
    }

    pub async fn send_allocate_device(&self, serial: &str) -> Result<bool> {
        let response = self
            .roundtrip(RemoteOperation::AllocateDevice {
                serial: serial.to_string(),
            })
            .await?;
        Ok(response.result.unwrap_or(false))
    }

    pub async fn send_free_device(&self, serial: &str) -> Result<bool> {
        let response = self
            .roundtrip(RemoteOperation::FreeDevice {
                serial: serial.to_string(),
            })
            .await?;
        Ok(response.result.unwrap_or(false))
    }

    pub async fn send_close(&self) -> Result<bool> {
        let response = self.roundtrip(RemoteOperation::Close).await?;
        Ok(response.result.unwrap_or(true))
    }

    pub async fn send_add_command(&self, total_exec_time_ms: f64, args: &[String]) -> Result<bool> {
        let response = self
            .roundtrip(RemoteOperation::AddCommand {
                time: total_exec_time_ms,
                command_args: args.to_vec(),
            })
            .await?;
        Ok(response.result.unwrap_or(false))
    }

    pub async fn send_handover_close(&self, port: u16) -> Result<bool> {
        let response = self.roundtrip(RemoteOperation::HandoverClose { port }).await?;
        Ok(response.result.unwrap_or(false))
    }

    pub async fn send_list_devices(&self) -> Result<Vec<DeviceSummary>> {
        let response = self.roundtrip(RemoteOperation::ListDevices).await?;
        Ok(response.devices.unwrap_or_default())
    }

    pub async fn send_exec_command(&self, serial: &str, args: &[String]) -> Result<bool> {
        let response = self
            .roundtrip(RemoteOperation::ExecCommand {
                serial: serial.to_string(),
                command_args: args.to_vec(),
            })
            .await?;
        if let Some(err) = response.error {
            return Err(SchedulerError::RemoteWireError(err));
        }
        Ok(response.result.unwrap_or(false))
    }

    pub async fn send_get_last_command_result(&self, serial: &str) -> Result<Response> {
        self.roundtrip(RemoteOperation::GetLastCommandResult {
            serial: serial.to_string(),
        })
        .await
    }

    /// Closes the underlying connection. Best-effort: sends `CLOSE` first
    /// so the server observes a clean disconnect, but the socket is torn
    /// down regardless of whether that round-trip succeeds.
    pub async fn close(&mut self) -> Result<()> {
        let _ = self.send_close().await;
        Ok(())
    }
}
