//! Worker implementations.
//!
//! Each worker is a [`lanternproto::Service`] implementation plus the small
//! collaborator traits it drives: an LED sink and a frame or spectrum
//! source. The native integrations (screen grabbers, GStreamer spectrum
//! pipelines, the Hyperion wire clients) plug in behind those traits; the
//! implementations shipped here are synthetic so the control plane runs
//! end to end on any machine.

pub mod audio;
pub mod capture;
pub mod sink;
pub mod source;

pub use audio::AudioService;
pub use capture::CaptureService;
pub use sink::{LedSink, LogSink, Rgb, SinkError, SinkTarget};
pub use source::{FrameSource, PulseSource, SourceError, SpectrumSource, SweepSource};

/// How long a frame or color update stays valid on the Hyperion side.
pub const IMAGE_DURATION_MS: u32 = 500;
