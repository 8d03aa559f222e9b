//! Input seams: where frames and spectrum levels come from.
//!
//! The shipped implementations synthesize their data so the workers run
//! without a display server or an audio stack. Real grabbers and
//! analysers implement the same traits.

use std::time::{Duration, Instant};

use thiserror::Error;

use super::sink::Rgb;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source unavailable: {0}")]
    Unavailable(String),
}

/// Produces one scaled frame per call (capture worker).
pub trait FrameSource: Send {
    fn grab(&mut self, width: u32, height: u32) -> Result<Vec<Rgb>, SourceError>;
}

/// Test-pattern frames: a gradient that drifts one step per grab, so
/// consecutive frames differ and downstream deduplication never hides a
/// stalled source.
pub struct SweepSource {
    tick: u32,
}

impl SweepSource {
    pub fn new() -> Self {
        Self { tick: 0 }
    }
}

impl Default for SweepSource {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSource for SweepSource {
    fn grab(&mut self, width: u32, height: u32) -> Result<Vec<Rgb>, SourceError> {
        self.tick = self.tick.wrapping_add(1);
        let mut pixels = Vec::with_capacity((width * height) as usize);
        for y in 0..height {
            for x in 0..width {
                let base = (x + y + self.tick) as u8;
                pixels.push([base, base.wrapping_mul(2), base.wrapping_mul(3)]);
            }
        }
        Ok(pixels)
    }
}

/// Delivers batches of per-band levels (audio worker).
///
/// `poll` blocks the caller up to `timeout`; a `None` return means the
/// analyser produced nothing in that window, which the audio worker treats
/// as a stall.
pub trait SpectrumSource: Send {
    fn start(&mut self);
    fn stop(&mut self);
    fn is_running(&self) -> bool;
    /// Pace of level delivery, in batches per second.
    fn set_rate(&mut self, rate: u32);
    fn poll(&mut self, timeout: Duration) -> Option<Vec<f32>>;
}

/// Synthesized levels: a slow pulse across a handful of bands, delivered
/// at the configured rate.
pub struct PulseSource {
    running: bool,
    rate: u32,
    bands: usize,
    phase: u32,
    last_batch: Option<Instant>,
}

impl PulseSource {
    pub fn new(bands: usize) -> Self {
        Self {
            running: false,
            rate: 30,
            bands,
            phase: 0,
            last_batch: None,
        }
    }
}

impl SpectrumSource for PulseSource {
    fn start(&mut self) {
        self.running = true;
        self.last_batch = None;
    }

    fn stop(&mut self) {
        self.running = false;
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn set_rate(&mut self, rate: u32) {
        if rate > 0 {
            self.rate = rate;
        }
    }

    fn poll(&mut self, timeout: Duration) -> Option<Vec<f32>> {
        if !self.running {
            return None;
        }
        // Pace delivery to the configured rate within the caller's window.
        let interval = Duration::from_secs(1) / self.rate;
        if interval > timeout {
            std::thread::sleep(timeout);
            return None;
        }
        let wait = match self.last_batch {
            Some(last) => interval.saturating_sub(last.elapsed()),
            None => Duration::ZERO,
        };
        std::thread::sleep(wait);
        self.last_batch = Some(Instant::now());

        self.phase = self.phase.wrapping_add(1);
        let pulse = 0.5 + 0.5 * ((self.phase as f32) * 0.2).sin();
        Some(
            (0..self.bands)
                .map(|band| pulse * (1.0 - band as f32 / self.bands.max(1) as f32))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sweep_frames_have_the_right_size_and_drift() {
        let mut source = SweepSource::new();
        let a = source.grab(8, 4).unwrap();
        let b = source.grab(8, 4).unwrap();
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
    }

    #[test]
    fn stopped_pulse_source_yields_nothing() {
        let mut source = PulseSource::new(4);
        assert!(source.poll(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn running_pulse_source_delivers_levels_in_range() {
        let mut source = PulseSource::new(4);
        source.set_rate(100);
        source.start();
        let levels = source.poll(Duration::from_secs(1)).unwrap();
        assert_eq!(levels.len(), 4);
        assert!(levels.iter().all(|l| (0.0..=1.0).contains(l)));
    }
}
