//! [`CommandServer`] – arm and chassis listeners.
//!
//! Each accepted connection is served in its own task.  Handlers are generic
//! over the byte stream so they can be driven by in-memory pipes in tests.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use duobot_kernel::{CommandDispatcher, Dispatched, DriveSession};
use duobot_types::{Device, RoverError};
use serde_json::json;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, BufReader, ReadHalf, WriteHalf};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::http::{self, CONTENT_NDJSON, HttpRequest};

pub const DEFAULT_ARM_PORT: u16 = 8080;
pub const DEFAULT_CHASSIS_PORT: u16 = 8081;

/// Serves the arm and chassis endpoints from one [`CommandDispatcher`].
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use duobot_hal::sim::SimHardware;
/// use duobot_kernel::CommandDispatcher;
/// use duobot_server::CommandServer;
/// use duobot_types::config::{ArmConfig, AvoidanceConfig, MotionTiming};
///
/// #[tokio::main(flavor = "current_thread")]
/// async fn main() {
///     let (hardware, _handles) = SimHardware::new().build();
///     let dispatcher = CommandDispatcher::from_hardware(
///         hardware,
///         &ArmConfig::default(),
///         MotionTiming::default(),
///         1000,
///         AvoidanceConfig::default(),
///     )
///     .unwrap();
///     CommandServer::new(Arc::new(dispatcher)).run().await.unwrap();
/// }
/// ```
pub struct CommandServer {
    dispatcher: Arc<CommandDispatcher>,
    bind: IpAddr,
    arm_port: u16,
    chassis_port: u16,
}

impl CommandServer {
    /// Listen on all interfaces on the default ports.
    pub fn new(dispatcher: Arc<CommandDispatcher>) -> Self {
        Self {
            dispatcher,
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            arm_port: DEFAULT_ARM_PORT,
            chassis_port: DEFAULT_CHASSIS_PORT,
        }
    }

    pub fn with_bind(mut self, bind: IpAddr) -> Self {
        self.bind = bind;
        self
    }

    pub fn with_ports(mut self, arm_port: u16, chassis_port: u16) -> Self {
        self.arm_port = arm_port;
        self.chassis_port = chassis_port;
        self
    }

    /// Bind both listeners.
    ///
    /// # Errors
    ///
    /// [`RoverError::Io`] if either address cannot be bound.
    pub async fn bind(&self) -> Result<(TcpListener, TcpListener), RoverError> {
        let bind = |port| async move {
            let addr = SocketAddr::new(self.bind, port);
            TcpListener::bind(addr)
                .await
                .map_err(|e| RoverError::Io(format!("bind error on {addr}: {e}")))
        };
        Ok((bind(self.arm_port).await?, bind(self.chassis_port).await?))
    }

    /// Bind and serve until an accept loop fails.
    pub async fn run(self) -> Result<(), RoverError> {
        let (arm, chassis) = self.bind().await?;
        self.serve(arm, chassis).await
    }

    /// Serve already-bound listeners.
    pub async fn serve(self, arm: TcpListener, chassis: TcpListener) -> Result<(), RoverError> {
        for (device, listener) in [(Device::Arm, &arm), (Device::Chassis, &chassis)] {
            if let Ok(addr) = listener.local_addr() {
                info!(%device, %addr, "listening");
            }
        }
        tokio::try_join!(
            accept_loop(Device::Arm, arm, Arc::clone(&self.dispatcher)),
            accept_loop(Device::Chassis, chassis, Arc::clone(&self.dispatcher)),
        )?;
        Ok(())
    }
}

async fn accept_loop(
    device: Device,
    listener: TcpListener,
    dispatcher: Arc<CommandDispatcher>,
) -> Result<(), RoverError> {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!(%device, %peer, "connection");
                let dispatcher = Arc::clone(&dispatcher);
                tokio::spawn(async move {
                    let served = match device {
                        Device::Arm => handle_arm(stream, dispatcher).await,
                        Device::Chassis => handle_chassis(stream, dispatcher).await,
                    };
                    if let Err(e) = served {
                        warn!(%device, %peer, error = %e, "connection error");
                    }
                });
            }
            Err(e) => warn!(%device, error = %e, "accept error"),
        }
    }
}

type Halves<S> = (BufReader<ReadHalf<S>>, WriteHalf<S>);

/// Read the request, answering parse failures and non-GET methods directly.
/// `Ok(None)` means the connection is finished.
async fn accept_request<S>(stream: S) -> Result<Option<(HttpRequest, Halves<S>)>, RoverError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (read, mut write) = tokio::io::split(stream);
    let mut reader = BufReader::new(read);
    let request = match http::read_request(&mut reader).await {
        Ok(Some(request)) => request,
        Ok(None) => return Ok(None),
        Err(e) => {
            http::write_error(&mut write, &e).await?;
            return Ok(None);
        }
    };
    if request.method != "GET" {
        let err = RoverError::NotFound(format!("{} {}", request.method, request.path));
        http::write_error(&mut write, &err).await?;
        return Ok(None);
    }
    Ok(Some((request, (reader, write))))
}

// ────────────────────────────────────────────────────────────────────────────
// Arm endpoint
// ────────────────────────────────────────────────────────────────────────────

/// `GET /state` or `GET /<action>`.
pub async fn handle_arm<S>(
    stream: S,
    dispatcher: Arc<CommandDispatcher>,
) -> Result<(), RoverError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let Some((request, (_, mut write))) = accept_request(stream).await? else {
        return Ok(());
    };

    if request.action() == "state" {
        return http::write_json(&mut write, 200, &dispatcher.arm_state()).await;
    }

    match dispatcher.dispatch_request("arm", request.action(), &request.query).await {
        Ok(Dispatched::Arm(outcome)) => {
            http::write_json(&mut write, 200, &json!({ "message": outcome.message })).await
        }
        Ok(Dispatched::Chassis(_)) => {
            let err = RoverError::NotFound(request.path.clone());
            http::write_error(&mut write, &err).await
        }
        Err(e) => {
            log_failure(&e);
            http::write_error(&mut write, &e).await
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Chassis endpoint
// ────────────────────────────────────────────────────────────────────────────

/// `GET /move?direction=..&speed=..`, answered with one JSON line per
/// avoidance cycle until the client disconnects or the command is
/// superseded.
pub async fn handle_chassis<S>(
    stream: S,
    dispatcher: Arc<CommandDispatcher>,
) -> Result<(), RoverError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let Some((request, (mut reader, mut write))) = accept_request(stream).await? else {
        return Ok(());
    };

    let mut session = match dispatcher
        .dispatch_request("chassis", request.action(), &request.query)
        .await
    {
        Ok(Dispatched::Chassis(session)) => session,
        Ok(Dispatched::Arm(_)) => {
            let err = RoverError::NotFound(request.path.clone());
            return http::write_error(&mut write, &err).await;
        }
        Err(e) => {
            log_failure(&e);
            return http::write_error(&mut write, &e).await;
        }
    };

    // Hold the status line until the first cycle so an immediate hardware
    // fault can still be answered with a 500.
    let Some(first) = session.next_report().await else {
        return match session.finish().await {
            Err(e) => {
                log_failure(&e);
                http::write_error(&mut write, &e).await
            }
            Ok(_) => http::write_head(&mut write, 200, CONTENT_NDJSON).await,
        };
    };

    http::write_head(&mut write, 200, CONTENT_NDJSON).await?;
    http::write_ndjson_line(&mut write, &first).await?;
    stream_reports(&mut session, &mut reader, &mut write).await;

    let id = session.command_id;
    match session.finish().await {
        Ok(exit) => info!(command = %id, ?exit, "chassis stream closed"),
        Err(e) => log_failure(&e),
    }
    Ok(())
}

async fn stream_reports<R, W>(session: &mut DriveSession, reader: &mut R, write: &mut W)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut scratch = [0u8; 64];
    loop {
        tokio::select! {
            report = session.next_report() => {
                let Some(report) = report else { break };
                if http::write_ndjson_line(&mut *write, &report).await.is_err() {
                    break;
                }
            }
            // Anything but more request bytes means the client is gone.
            read = reader.read(&mut scratch) => {
                if !matches!(read, Ok(n) if n > 0) {
                    break;
                }
            }
        }
    }
}

fn log_failure(err: &RoverError) {
    match err {
        RoverError::HardwareFault { .. } => error!(error = %err, "command failed"),
        _ => debug!(error = %err, "command rejected"),
    }
}
