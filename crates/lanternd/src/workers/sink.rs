//! The LED output seam.
//!
//! Workers talk to the LED server through this trait only; the wire
//! protocol lives behind it. [`LogSink`] is the in-repo implementation:
//! it "connects" unconditionally and traces what it would have sent,
//! which is enough for the supervision tests and for dry runs.

use thiserror::Error;
use tracing::debug;

/// One LED color, RGB byte triple.
pub type Rgb = [u8; 3];

/// Failures talking to the LED server. All of these are retryable from the
/// worker's point of view.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("led server unreachable: {0}")]
    Unreachable(String),

    #[error("send failed: {0}")]
    Send(String),
}

/// Where the sink should deliver to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkTarget {
    pub address: String,
    pub port: u16,
}

impl std::fmt::Display for SinkTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// An LED rendering server, as seen by a worker.
pub trait LedSink: Send {
    /// Point the sink at a new target, dropping any open connection.
    fn configure(&mut self, target: SinkTarget);

    fn connect(&mut self) -> Result<(), SinkError>;

    fn disconnect(&mut self);

    fn is_connected(&self) -> bool;

    /// Stream a scaled frame (capture worker).
    fn send_image(
        &mut self,
        width: u32,
        height: u32,
        pixels: &[Rgb],
        priority: i64,
        duration_ms: u32,
    ) -> Result<(), SinkError>;

    /// Set explicit LED colors (audio worker).
    fn send_colors(
        &mut self,
        colors: &[Rgb],
        priority: i64,
        duration_ms: u32,
    ) -> Result<(), SinkError>;
}

/// Sink that traces instead of transmitting.
pub struct LogSink {
    label: &'static str,
    target: Option<SinkTarget>,
    connected: bool,
    sent: u64,
}

impl LogSink {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            target: None,
            connected: false,
            sent: 0,
        }
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }
}

impl LedSink for LogSink {
    fn configure(&mut self, target: SinkTarget) {
        debug!(sink = self.label, %target, "sink configured");
        self.disconnect();
        self.target = Some(target);
    }

    fn connect(&mut self) -> Result<(), SinkError> {
        match &self.target {
            Some(target) => {
                debug!(sink = self.label, %target, "sink connected");
                self.connected = true;
                Ok(())
            }
            None => Err(SinkError::Unreachable("no target configured".into())),
        }
    }

    fn disconnect(&mut self) {
        if self.connected {
            debug!(sink = self.label, "sink disconnected");
        }
        self.connected = false;
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn send_image(
        &mut self,
        width: u32,
        height: u32,
        pixels: &[Rgb],
        priority: i64,
        duration_ms: u32,
    ) -> Result<(), SinkError> {
        if !self.connected {
            return Err(SinkError::Send("not connected".into()));
        }
        self.sent += 1;
        debug!(
            sink = self.label,
            width,
            height,
            pixels = pixels.len(),
            priority,
            duration_ms,
            "image frame"
        );
        Ok(())
    }

    fn send_colors(
        &mut self,
        colors: &[Rgb],
        priority: i64,
        duration_ms: u32,
    ) -> Result<(), SinkError> {
        if !self.connected {
            return Err(SinkError::Send("not connected".into()));
        }
        self.sent += 1;
        debug!(
            sink = self.label,
            colors = colors.len(),
            priority,
            duration_ms,
            "color update"
        );
        Ok(())
    }
}
