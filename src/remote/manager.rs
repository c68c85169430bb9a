//! Remote Manager (§4.E): accepts at most one client at a time, decodes
//! each request line, dispatches it against the scheduler/device tracker,
//! and writes back a response line.

use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::device::{DeviceManager, DeviceTracker, FreeDeviceState};
use crate::error::Result;
use crate::protocol::{self, CommandResultStatus, DeviceSummary, RemoteOperation, Response, FREE_ALL_SERIAL};
use crate::remote::client::RemoteClient;
use crate::scheduler::CommandScheduler;

/// The remote-control server (§4.E). Bound to one TCP port, serving one
/// client connection at a time.
pub struct RemoteManager {
    scheduler: Arc<CommandScheduler>,
    device_manager: Arc<dyn DeviceManager>,
    device_tracker: Arc<DeviceTracker>,
    config: ServerConfig,
    cancelled: AtomicBool,
    cancel_notify: Notify,
}

impl RemoteManager {
    pub fn new(
        scheduler: Arc<CommandScheduler>,
        device_manager: Arc<dyn DeviceManager>,
        device_tracker: Arc<DeviceTracker>,
        config: ServerConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            scheduler,
            device_manager,
            device_tracker,
            config,
            cancelled: AtomicBool::new(false),
            cancel_notify: Notify::new(),
        })
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, AtomicOrdering::SeqCst);
        self.cancel_notify.notify_one();
    }

    /// Binds the configured port, performing auto-handover against the
    /// current occupant first if the port is already taken and
    /// `auto_handover` is enabled (§4.E start-up sequence).
    async fn bind(&self) -> Result<TcpListener> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        match TcpListener::bind(&addr).await {
            Ok(listener) => Ok(listener),
            Err(err) if self.config.auto_handover => {
                warn!(error = %err, "remote manager port busy, requesting handover from occupant");
                let mut client = RemoteClient::connect(&self.config.host, self.config.port).await?;
                client.send_handover_close(self.config.port).await?;
                client.close().await?;

                // Retry binding until the outgoing process has released
                // the port.
                for attempt in 0..50 {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    if let Ok(listener) = TcpListener::bind(&addr).await {
                        return Ok(listener);
                    }
                    if attempt == 49 {
                        return Err(err.into());
                    }
                }
                unreachable!()
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Runs the accept loop until `cancel()` is called. On cancellation,
    /// frees every device held in the device tracker back to the device
    /// manager as `Available`.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let listener = self.bind().await?;
        info!(addr = %listener.local_addr().map(|a| a.to_string()).unwrap_or_default(), "remote manager listening");

        loop {
            if self.cancelled.load(AtomicOrdering::SeqCst) {
                break;
            }

            let accept = tokio::time::timeout(
                Duration::from_millis(self.config.accept_timeout_ms),
                listener.accept(),
            )
            .await;

            match accept {
                Ok(Ok((stream, peer))) => {
                    info!(peer = %peer, "remote client connected");
                    if let Err(err) = self.serve_client(stream).await {
                        warn!(error = %err, "remote client session ended with error");
                    }
                }
                Ok(Err(err)) => {
                    warn!(error = %err, "accept failed");
                }
                Err(_timeout) => {
                    // bounded-timeout accept: loop back and re-check
                    // cancellation.
                }
            }
        }

        let handles = self.device_tracker.free_all().await;
        for handle in handles {
            self.device_manager
                .free_device(handle, FreeDeviceState::Available)
                .await;
        }
        info!("remote manager stopped");
        Ok(())
    }

    async fn serve_client(&self, stream: TcpStream) -> Result<()> {
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        let mut line = String::new();

        loop {
            line.clear();
            let read = tokio::select! {
                r = reader.read_line(&mut line) => r,
                _ = self.cancel_notify.notified() => break,
            };
            let n = read?;
            if n == 0 {
                break; // client disconnected
            }

            let response = self.dispatch_line(line.trim_end()).await;
            let encoded = protocol::encode_response(&response)?;
            write_half.write_all(encoded.as_bytes()).await?;
            write_half.write_all(b"\n").await?;
            write_half.flush().await?;
        }

        Ok(())
    }

    async fn dispatch_line(&self, line: &str) -> Response {
        let op = match protocol::decode(line) {
            Ok(op) => op,
            Err(err) => return Response::error(err.to_string()),
        };
        self.dispatch(op).await
    }

    async fn dispatch(&self, op: RemoteOperation) -> Response {
        match op {
            RemoteOperation::AllocateDevice { serial } => self.handle_allocate(&serial).await,
            RemoteOperation::FreeDevice { serial } => self.handle_free(&serial).await,
            RemoteOperation::Close => {
                self.cancel();
                Response::ok(true)
            }
            RemoteOperation::AddCommand { time, command_args } => {
                match self
                    .scheduler
                    .add_command(&command_args, time as u64)
                    .await
                {
                    Ok(ok) => Response::ok(ok),
                    Err(err) => Response::error(err.to_string()),
                }
            }
            RemoteOperation::HandoverClose { port } => {
                match self.scheduler.handover_shutdown("127.0.0.1", port).await {
                    Ok(ok) => {
                        self.cancel();
                        Response::ok(ok)
                    }
                    Err(err) => Response::error(err.to_string()),
                }
            }
            RemoteOperation::ListDevices => {
                let descriptors = self.device_manager.list_all_devices().await;
                let summaries = descriptors
                    .into_iter()
                    .map(|d| DeviceSummary {
                        serial: d.serial,
                        state: d.state,
                        variant: d.product_variant,
                    })
                    .collect();
                Response::devices(summaries)
            }
            RemoteOperation::ExecCommand { serial, command_args } => {
                self.handle_exec_command(&serial, &command_args).await
            }
            RemoteOperation::GetLastCommandResult { serial } => {
                self.handle_get_last_result(&serial).await
            }
        }
    }

    async fn handle_allocate(&self, serial: &str) -> Response {
        match self.device_manager.force_allocate_device(serial).await {
            Some(handle) => {
                self.device_tracker.allocate(handle).await;
                Response::ok(true)
            }
            None => Response::ok(false),
        }
    }

    async fn handle_free(&self, serial: &str) -> Response {
        if serial == FREE_ALL_SERIAL {
            let handles = self.device_tracker.free_all().await;
            let any = !handles.is_empty();
            for handle in handles {
                self.device_manager
                    .free_device(handle, FreeDeviceState::Available)
                    .await;
            }
            return Response::ok(any);
        }

        match self.device_tracker.free(serial).await {
            Some(handle) => {
                self.device_manager
                    .free_device(handle, FreeDeviceState::Available)
                    .await;
                Response::ok(true)
            }
            None => Response::ok(false),
        }
    }

    async fn handle_exec_command(&self, serial: &str, args: &[String]) -> Response {
        if !self.device_tracker.is_tracked(serial).await {
            return Response::error(format!("device {serial} is not allocated in this session"));
        }
        let handle = match self.device_manager.force_allocate_device(serial).await {
            Some(handle) => handle,
            None => return Response::error(format!("device {serial} is not available")),
        };
        match self.scheduler.exec_command(handle, args).await {
            Ok(ok) => Response::ok(ok),
            Err(err) => Response::error(err.to_string()),
        }
    }

    async fn handle_get_last_result(&self, serial: &str) -> Response {
        if !self.device_tracker.is_tracked(serial).await {
            return Response::command_result(CommandResultStatus::NotAllocated, None);
        }
        match self.scheduler.get_execution_tracker(serial).await {
            Some(tracker) => {
                let (status, free_state) = tracker.get_command_result().await;
                Response::command_result(status, free_state)
            }
            None => Response::command_result(CommandResultStatus::NoActiveCommand, None),
        }
    }
}
