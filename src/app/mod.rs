// Application layer - Use case interactors

pub mod av_sync;
pub mod container;
pub mod pipeline;
pub mod playback_interactor;
pub mod probe_interactor;

// Re-export interactors
pub use av_sync::AudioSync;
pub use container::{AppContainer, DefaultAppContainer};
pub use pipeline::Pipeline;
pub use playback_interactor::{PlaybackInteractor, PlaybackOptions};
pub use probe_interactor::{ProbeInteractor, ProbeRequest, ProbeResponse, ReportFormat};
