// Adapters - External system implementations

pub mod ffglitch_cmd;
pub mod timer_queue;
pub mod toml_config;
pub mod tracing_log;
pub mod zmq_control;

// Re-export adapters
pub use ffglitch_cmd::FfglitchCommandBuilder;
pub use timer_queue::TimerQueue;
pub use toml_config::{Settings, TomlConfigAdapter};
pub use tracing_log::TracingHost;
pub use zmq_control::{free_tcp_port, EndpointAllocator, SocketKind, TransportMode, ZmqTransport};
