//! Request/reply control channel to the renderer processes
//!
//! Each controlled process binds a ZeroMQ REP socket on the endpoint handed to
//! it on the command line and answers text requests with
//! `"<status>:<payload>"`. A request that is not answered within the soft
//! timeout drops the socket; the next request dials again.

use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::ports::ControlTransport;

/// Default soft timeout for a request
pub const SOFT_TIMEOUT: Duration = Duration::from_millis(500);

/// Address of a control endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Local socket file
    Ipc(PathBuf),
    /// Loopback TCP port
    Tcp(u16),
}

impl Endpoint {
    /// Address the controlled process binds
    pub fn bind_url(&self) -> String {
        match self {
            Endpoint::Ipc(path) => format!("ipc://{}", path.display()),
            Endpoint::Tcp(port) => format!("tcp://*:{}", port),
        }
    }

    /// Address the channel connects to
    pub fn connect_url(&self) -> String {
        match self {
            Endpoint::Ipc(path) => format!("ipc://{}", path.display()),
            Endpoint::Tcp(port) => format!("tcp://localhost:{}", port),
        }
    }

    /// Parse `ipc://path`, `tcp://host:port` or `tcp://*:port`
    pub fn parse(url: &str) -> Option<Self> {
        if let Some(path) = url.strip_prefix("ipc://") {
            return (!path.is_empty()).then(|| Endpoint::Ipc(PathBuf::from(path)));
        }
        let rest = url.strip_prefix("tcp://")?;
        let (_, port) = rest.rsplit_once(':')?;
        port.trim().parse().ok().map(Endpoint::Tcp)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.connect_url())
    }
}

/// Parsed `"<status>:<payload>"` reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: i32,
    pub payload: String,
}

impl Reply {
    pub fn parse(message: &str) -> Option<Self> {
        let (status, payload) = message.split_once(':')?;
        let status = status.trim().parse().ok()?;
        Some(Self {
            status,
            payload: payload.trim_end_matches(['\r', '\n']).to_string(),
        })
    }
}

/// Result of one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOutcome {
    Reply(Reply),
    /// Sent on a push-only channel
    Pushed,
    /// No reply within the soft timeout, or the peer is not there yet
    NoAnswer,
    /// The channel is closed
    NotConnected,
    /// Reply did not follow the `status:payload` format
    Invalid(String),
}

impl RequestOutcome {
    /// Whether the peer accepted the command
    pub fn acknowledged(&self) -> bool {
        match self {
            RequestOutcome::Reply(reply) => reply.status >= 0 && !reply.payload.is_empty(),
            RequestOutcome::Pushed => true,
            _ => false,
        }
    }

    pub fn payload(&self) -> Option<&str> {
        match self {
            RequestOutcome::Reply(reply) => Some(&reply.payload),
            _ => None,
        }
    }
}

/// Connection state of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Not attached to any process
    Closed,
    /// Attached, socket dropped; the next request dials again
    Disconnected,
    /// Attached and dialed
    Connected,
}

/// One control channel per controlled process
#[derive(Debug)]
pub struct ControlChannel<T: ControlTransport> {
    name: String,
    endpoint: Option<Endpoint>,
    transport: T,
    state: ChannelState,
    soft_timeout: Duration,
    push_only: bool,
}

impl<T: ControlTransport> ControlChannel<T> {
    /// Request/reply channel
    pub fn new(name: impl Into<String>, transport: T) -> Self {
        Self {
            name: name.into(),
            endpoint: None,
            transport,
            state: ChannelState::Closed,
            soft_timeout: SOFT_TIMEOUT,
            push_only: false,
        }
    }

    /// Fire-and-forget channel, used for the MIDI emulation sink
    pub fn push(name: impl Into<String>, transport: T) -> Self {
        let mut channel = Self::new(name, transport);
        channel.push_only = true;
        channel
    }

    pub fn with_soft_timeout(mut self, timeout: Duration) -> Self {
        self.soft_timeout = timeout;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.endpoint.as_ref()
    }

    pub fn set_endpoint(&mut self, endpoint: Endpoint) {
        self.disconnect();
        self.endpoint = Some(endpoint);
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Whether the channel is attached to a live process
    pub fn is_attached(&self) -> bool {
        self.state != ChannelState::Closed
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Attach to the endpoint. Dialing happens lazily on the first request.
    pub fn connect(&mut self) {
        if self.endpoint.is_none() {
            warn!(channel = %self.name, "No endpoint to connect to");
            return;
        }
        self.transport.disconnect();
        self.state = ChannelState::Disconnected;
        debug!(channel = %self.name, endpoint = ?self.endpoint, "Control channel attached");
    }

    /// Detach and drop the socket. Idempotent.
    pub fn disconnect(&mut self) {
        if self.state != ChannelState::Closed {
            debug!(channel = %self.name, "Control channel closed");
        }
        self.transport.disconnect();
        self.state = ChannelState::Closed;
    }

    fn drop_connection(&mut self) {
        self.transport.disconnect();
        self.state = ChannelState::Disconnected;
    }

    /// Send one command and wait up to the soft timeout for the reply
    pub fn request(&mut self, message: &str) -> RequestOutcome {
        let endpoint = match (&self.endpoint, self.state) {
            (Some(endpoint), state) if state != ChannelState::Closed => endpoint.clone(),
            _ => return RequestOutcome::NotConnected,
        };

        if self.state == ChannelState::Disconnected {
            if let Err(e) = self.transport.connect(&endpoint) {
                debug!(channel = %self.name, error = %e, "Control endpoint not reachable yet");
                return RequestOutcome::NoAnswer;
            }
            self.state = ChannelState::Connected;
        }

        let started = Instant::now();
        if let Err(e) = self.transport.send(message) {
            warn!(channel = %self.name, error = %e, "Control request could not be sent");
            self.drop_connection();
            return RequestOutcome::NoAnswer;
        }
        if self.push_only {
            return RequestOutcome::Pushed;
        }

        let outcome = match self.transport.receive(self.soft_timeout) {
            Ok(Some(raw)) => match Reply::parse(&raw) {
                Some(reply) => RequestOutcome::Reply(reply),
                None => {
                    warn!(channel = %self.name, reply = %raw, "Invalid control reply");
                    RequestOutcome::Invalid(raw)
                }
            },
            Ok(None) => {
                warn!(
                    channel = %self.name,
                    request = message,
                    "No control reply within {:?}, reconnecting",
                    self.soft_timeout
                );
                self.drop_connection();
                RequestOutcome::NoAnswer
            }
            Err(e) => {
                warn!(channel = %self.name, error = %e, "Control connection lost");
                self.drop_connection();
                RequestOutcome::NoAnswer
            }
        };

        let elapsed = started.elapsed();
        if elapsed > self.soft_timeout.mul_f64(0.8) && matches!(outcome, RequestOutcome::Reply(_)) {
            warn!(channel = %self.name, request = message, ?elapsed, "Slow control reply");
        }
        outcome
    }
}

impl<T: ControlTransport> Drop for ControlChannel<T> {
    fn drop(&mut self) {
        self.transport.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io;

    /// Scripted transport: each receive pops the next canned answer
    #[derive(Debug, Default)]
    struct FakeTransport {
        answers: VecDeque<Option<String>>,
        sent: Vec<String>,
        dials: usize,
        refuse_dial: bool,
        open: bool,
    }

    impl ControlTransport for FakeTransport {
        fn connect(&mut self, _endpoint: &Endpoint) -> io::Result<()> {
            self.dials += 1;
            if self.refuse_dial {
                return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
            }
            self.open = true;
            Ok(())
        }

        fn send(&mut self, message: &str) -> io::Result<()> {
            self.sent.push(message.to_string());
            Ok(())
        }

        fn receive(&mut self, _timeout: Duration) -> io::Result<Option<String>> {
            Ok(self.answers.pop_front().flatten())
        }

        fn disconnect(&mut self) {
            self.open = false;
        }
    }

    fn channel(answers: &[Option<&str>]) -> ControlChannel<FakeTransport> {
        let transport = FakeTransport {
            answers: answers.iter().map(|a| a.map(str::to_string)).collect(),
            ..Default::default()
        };
        let mut channel = ControlChannel::new("renderer", transport);
        channel.set_endpoint(Endpoint::Tcp(5555));
        channel.connect();
        channel
    }

    #[test]
    fn test_endpoint_urls() {
        let tcp = Endpoint::Tcp(5555);
        assert_eq!(tcp.bind_url(), "tcp://*:5555");
        assert_eq!(tcp.connect_url(), "tcp://localhost:5555");

        let ipc = Endpoint::Ipc(PathBuf::from("/tmp/renderer.ipc"));
        assert_eq!(ipc.bind_url(), "ipc:///tmp/renderer.ipc");
        assert_eq!(ipc.bind_url(), ipc.connect_url());
    }

    #[test]
    fn test_endpoint_parse() {
        assert_eq!(Endpoint::parse("tcp://localhost:5557"), Some(Endpoint::Tcp(5557)));
        assert_eq!(Endpoint::parse("tcp://*:80"), Some(Endpoint::Tcp(80)));
        assert_eq!(
            Endpoint::parse("ipc:///tmp/x.ipc"),
            Some(Endpoint::Ipc(PathBuf::from("/tmp/x.ipc")))
        );
        assert_eq!(Endpoint::parse("udp://x:1"), None);
        assert_eq!(Endpoint::parse("ipc://"), None);
    }

    #[test]
    fn test_reply_parse() {
        assert_eq!(
            Reply::parse("0:ok"),
            Some(Reply { status: 0, payload: "ok".to_string() })
        );
        assert_eq!(
            Reply::parse("1:10,20,640,480"),
            Some(Reply { status: 1, payload: "10,20,640,480".to_string() })
        );
        assert_eq!(Reply::parse("garbage"), None);
        assert_eq!(Reply::parse("x:y"), None);
    }

    #[test]
    fn test_acknowledged() {
        let ok = RequestOutcome::Reply(Reply { status: 0, payload: "ok".to_string() });
        assert!(ok.acknowledged());
        let empty = RequestOutcome::Reply(Reply { status: 0, payload: String::new() });
        assert!(!empty.acknowledged());
        let failed = RequestOutcome::Reply(Reply { status: -1, payload: "err".to_string() });
        assert!(!failed.acknowledged());
        assert!(!RequestOutcome::NoAnswer.acknowledged());
    }

    #[test]
    fn test_request_reply() {
        let mut channel = channel(&[Some("0:paused")]);
        let outcome = channel.request("pause");
        assert_eq!(outcome.payload(), Some("paused"));
        assert_eq!(channel.state(), ChannelState::Connected);
        assert_eq!(channel.transport().sent, vec!["pause"]);
    }

    #[test]
    fn test_timeout_disconnects_and_redials() {
        let mut channel = channel(&[None, Some("0:ok")]);
        assert_eq!(channel.request("play"), RequestOutcome::NoAnswer);
        assert_eq!(channel.state(), ChannelState::Disconnected);
        assert!(channel.is_attached());

        assert!(channel.request("play").acknowledged());
        assert_eq!(channel.transport().dials, 2);
        assert_eq!(channel.state(), ChannelState::Connected);
    }

    #[test]
    fn test_closed_channel() {
        let mut channel = channel(&[Some("0:ok")]);
        channel.disconnect();
        channel.disconnect();
        assert_eq!(channel.request("play"), RequestOutcome::NotConnected);
        assert!(channel.transport().sent.is_empty());
    }

    #[test]
    fn test_unreachable_peer_is_no_answer() {
        let mut channel = channel(&[]);
        channel.transport.refuse_dial = true;
        assert_eq!(channel.request("volume"), RequestOutcome::NoAnswer);
        assert_eq!(channel.state(), ChannelState::Disconnected);
    }

    #[test]
    fn test_invalid_reply() {
        let mut channel = channel(&[Some("nonsense")]);
        assert_eq!(
            channel.request("step"),
            RequestOutcome::Invalid("nonsense".to_string())
        );
    }

    #[test]
    fn test_push_channel_does_not_wait() {
        let mut channel = ControlChannel::push("midi", FakeTransport::default());
        channel.set_endpoint(Endpoint::Tcp(5557));
        channel.connect();
        assert_eq!(channel.request("note_on 60"), RequestOutcome::Pushed);
    }
}
