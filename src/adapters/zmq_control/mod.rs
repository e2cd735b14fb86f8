// ZeroMQ control adapter - REQ/PUSH transport for the control channels

use std::fmt;
use std::io;
use std::net::{Ipv4Addr, TcpListener};
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Sender};
use tempfile::TempDir;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};
use zeromq::{PushSocket, RepSocket, ReqSocket, Socket, SocketRecv, SocketSend, ZmqMessage};

use crate::control::Endpoint;
use crate::error::{MosherError, MosherResult};
use crate::ports::ControlTransport;

/// Bound on dialing and on handing a message to the socket
const DIAL_TIMEOUT: Duration = Duration::from_millis(200);
const LOOPBACK_TIMEOUT: Duration = Duration::from_secs(1);

/// ZeroMQ socket pattern of a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketKind {
    /// Request/reply, one outstanding request at a time
    Req,
    /// Fire-and-forget
    Push,
}

enum Job {
    Connect {
        url: String,
        done: Sender<io::Result<()>>,
    },
    Send {
        message: String,
        done: Sender<io::Result<()>>,
    },
    Receive {
        timeout: Duration,
        done: Sender<io::Result<Option<String>>>,
    },
    Disconnect,
}

enum ControlSocket {
    Req(ReqSocket),
    Push(PushSocket),
}

impl ControlSocket {
    async fn dial(kind: SocketKind, url: &str) -> io::Result<Self> {
        match kind {
            SocketKind::Req => {
                let mut socket = ReqSocket::new();
                connect(&mut socket, url).await?;
                Ok(ControlSocket::Req(socket))
            }
            SocketKind::Push => {
                let mut socket = PushSocket::new();
                connect(&mut socket, url).await?;
                Ok(ControlSocket::Push(socket))
            }
        }
    }

    async fn send(&mut self, message: String) -> io::Result<()> {
        let message = ZmqMessage::from(message);
        let sent = match self {
            ControlSocket::Req(socket) => tokio::time::timeout(DIAL_TIMEOUT, socket.send(message)).await,
            ControlSocket::Push(socket) => tokio::time::timeout(DIAL_TIMEOUT, socket.send(message)).await,
        };
        match sent {
            Ok(result) => result.map_err(zmq_error),
            Err(_) => Err(io::ErrorKind::TimedOut.into()),
        }
    }

    async fn receive(&mut self, timeout: Duration) -> io::Result<Option<String>> {
        let ControlSocket::Req(socket) = self else {
            return Err(io::Error::new(io::ErrorKind::Unsupported, "push sockets have no replies"));
        };
        match tokio::time::timeout(timeout, socket.recv()).await {
            Err(_) => Ok(None),
            Ok(Err(e)) => Err(zmq_error(e)),
            Ok(Ok(message)) => String::try_from(message)
                .map(Some)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e)),
        }
    }
}

async fn connect<S: Socket>(socket: &mut S, url: &str) -> io::Result<()> {
    match tokio::time::timeout(DIAL_TIMEOUT, socket.connect(url)).await {
        Ok(result) => result.map_err(zmq_error),
        Err(_) => Err(io::ErrorKind::TimedOut.into()),
    }
}

fn zmq_error(e: impl fmt::Display) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e.to_string())
}

fn worker_gone() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "control socket worker stopped")
}

fn current_thread_runtime() -> io::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread().enable_all().build()
}

/// Owns the socket on its own runtime, so callers may block on a reply even
/// from inside the host's async loop
fn run_worker(kind: SocketKind, mut jobs: UnboundedReceiver<Job>) {
    let runtime = match current_thread_runtime() {
        Ok(runtime) => runtime,
        Err(e) => {
            warn!(error = %e, "Failed to start the control socket runtime");
            return;
        }
    };
    runtime.block_on(async move {
        let mut socket: Option<ControlSocket> = None;
        while let Some(job) = jobs.recv().await {
            match job {
                Job::Connect { url, done } => {
                    socket = None;
                    let result = match ControlSocket::dial(kind, &url).await {
                        Ok(dialed) => {
                            socket = Some(dialed);
                            Ok(())
                        }
                        Err(e) => Err(e),
                    };
                    let _ = done.send(result);
                }
                Job::Send { message, done } => {
                    let result = match socket.as_mut() {
                        Some(socket) => socket.send(message).await,
                        None => Err(io::ErrorKind::NotConnected.into()),
                    };
                    let _ = done.send(result);
                }
                Job::Receive { timeout, done } => {
                    let result = match socket.as_mut() {
                        Some(socket) => socket.receive(timeout).await,
                        None => Err(io::ErrorKind::NotConnected.into()),
                    };
                    let _ = done.send(result);
                }
                Job::Disconnect => socket = None,
            }
        }
    });
}

/// ZeroMQ transport: REQ for the renderers, PUSH for the MIDI sink.
///
/// The socket lives on a worker thread started on first use. A REQ socket
/// that timed out waiting for its reply is unusable, so the channel drops it
/// and dials a fresh one on the next request.
pub struct ZmqTransport {
    kind: SocketKind,
    jobs: Option<UnboundedSender<Job>>,
    worker: Option<JoinHandle<()>>,
}

impl ZmqTransport {
    pub fn request() -> Self {
        Self::new(SocketKind::Req)
    }

    pub fn push() -> Self {
        Self::new(SocketKind::Push)
    }

    fn new(kind: SocketKind) -> Self {
        Self {
            kind,
            jobs: None,
            worker: None,
        }
    }

    pub fn kind(&self) -> SocketKind {
        self.kind
    }

    fn jobs(&mut self) -> io::Result<&UnboundedSender<Job>> {
        if self.jobs.is_none() {
            let (sender, receiver) = unbounded_channel();
            let kind = self.kind;
            let handle = thread::Builder::new()
                .name("mosher-zmq".to_string())
                .spawn(move || run_worker(kind, receiver))?;
            self.jobs = Some(sender);
            self.worker = Some(handle);
        }
        self.jobs.as_ref().ok_or_else(worker_gone)
    }

    fn call<R>(&mut self, job: impl FnOnce(Sender<io::Result<R>>) -> Job) -> io::Result<R> {
        let (done, result) = bounded(1);
        self.jobs()?.send(job(done)).map_err(|_| worker_gone())?;
        result.recv().map_err(|_| worker_gone())?
    }

    /// `tcp://*:port` binds every interface; dial it over loopback
    fn url(endpoint: &Endpoint) -> String {
        match endpoint {
            Endpoint::Ipc(_) => endpoint.connect_url(),
            Endpoint::Tcp(port) => format!("tcp://{}:{}", Ipv4Addr::LOCALHOST, port),
        }
    }
}

impl fmt::Debug for ZmqTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZmqTransport")
            .field("kind", &self.kind)
            .field("running", &self.worker.is_some())
            .finish()
    }
}

impl ControlTransport for ZmqTransport {
    fn connect(&mut self, endpoint: &Endpoint) -> io::Result<()> {
        let url = Self::url(endpoint);
        self.call(|done| Job::Connect { url, done })?;
        debug!(%endpoint, kind = ?self.kind, "Control socket connected");
        Ok(())
    }

    fn send(&mut self, message: &str) -> io::Result<()> {
        let message = message.to_string();
        self.call(|done| Job::Send { message, done })
    }

    fn receive(&mut self, timeout: Duration) -> io::Result<Option<String>> {
        self.call(|done| Job::Receive { timeout, done })
    }

    fn disconnect(&mut self) {
        if let Some(jobs) = &self.jobs {
            let _ = jobs.send(Job::Disconnect);
        }
    }
}

impl Drop for ZmqTransport {
    fn drop(&mut self) {
        self.jobs = None;
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Control socket worker panicked");
            }
        }
    }
}

/// How endpoints are allocated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    Ipc,
    Tcp,
}

/// Hands out one endpoint per controlled process.
///
/// IPC socket files live in a private temporary directory that is removed
/// when the allocator is dropped.
#[derive(Debug)]
pub struct EndpointAllocator {
    mode: TransportMode,
    dir: Option<TempDir>,
}

impl EndpointAllocator {
    /// Prefer IPC when `prefer_ipc` is set and a loopback test succeeds
    pub fn new(prefer_ipc: bool) -> MosherResult<Self> {
        if prefer_ipc {
            let dir = tempfile::Builder::new().prefix("mosher_").tempdir()?;
            if probe_loopback_ipc(dir.path()) {
                info!(dir = %dir.path().display(), "Using IPC control endpoints");
                return Ok(Self {
                    mode: TransportMode::Ipc,
                    dir: Some(dir),
                });
            }
            warn!("Loopback IPC test failed, falling back to TCP control endpoints");
        }
        Ok(Self {
            mode: TransportMode::Tcp,
            dir: None,
        })
    }

    pub fn mode(&self) -> TransportMode {
        self.mode
    }

    /// Reserve an endpoint for the process called `name`
    pub fn allocate(&self, name: &str) -> MosherResult<Endpoint> {
        match (&self.mode, &self.dir) {
            (TransportMode::Ipc, Some(dir)) => Ok(Endpoint::Ipc(ipc_path(dir.path(), name))),
            _ => free_tcp_port()
                .map(Endpoint::Tcp)
                .map_err(|e| MosherError::ControlChannel {
                    name: name.to_string(),
                    message: format!("no free TCP port: {}", e),
                }),
        }
    }
}

fn ipc_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{}.ipc", name))
}

/// Let the OS pick an unused loopback port
pub fn free_tcp_port() -> io::Result<u16> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
    Ok(listener.local_addr()?.port())
}

/// Check that a REQ/REP pair can talk over an `ipc://` socket in `dir`
pub fn probe_loopback_ipc(dir: &Path) -> bool {
    let path = ipc_path(dir, "loopback");
    let url = Endpoint::Ipc(path.clone()).connect_url();
    let exchange = thread::spawn(move || -> io::Result<bool> {
        let runtime = current_thread_runtime()?;
        runtime.block_on(async move {
            let round_trip = async {
                let mut server = RepSocket::new();
                server.bind(&url).await.map_err(zmq_error)?;
                let mut client = ReqSocket::new();
                client.connect(&url).await.map_err(zmq_error)?;
                client.send(ZmqMessage::from("test")).await.map_err(zmq_error)?;
                let request = server.recv().await.map_err(zmq_error)?;
                server.send(request).await.map_err(zmq_error)?;
                let reply = client.recv().await.map_err(zmq_error)?;
                Ok::<bool, io::Error>(matches!(String::try_from(reply), Ok(text) if text == "test"))
            };
            match tokio::time::timeout(LOOPBACK_TIMEOUT, round_trip).await {
                Ok(result) => result,
                Err(_) => Err(io::ErrorKind::TimedOut.into()),
            }
        })
    })
    .join();
    let _ = std::fs::remove_file(&path);
    match exchange {
        Ok(Ok(ok)) => ok,
        Ok(Err(e)) => {
            debug!(error = %e, "Loopback IPC test failed");
            false
        }
        Err(_) => {
            debug!("Loopback IPC test panicked");
            false
        }
    }
}
