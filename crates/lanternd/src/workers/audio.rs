//! The audio effect worker.
//!
//! Drains one batch of spectrum levels per tick and turns it into a color
//! update for the LED frame. The analyser going quiet for a full second is
//! treated as a stall: the source is stopped (the next tick restarts it)
//! and the failure goes through the runtime's error/backoff path, exactly
//! like an unreachable LED server.

use std::time::Duration;

use lanternproto::settings::keys;
use lanternproto::{
    Service, ServiceContext, ServiceError, ServiceOptions, SettingUnit, StatusValue,
};
use tracing::{debug, warn};

use super::sink::{LedSink, Rgb, SinkTarget};
use super::source::SpectrumSource;
use super::IMAGE_DURATION_MS;

/// How long one tick waits for the analyser before declaring it stalled.
const ANALYSER_TIMEOUT: Duration = Duration::from_secs(1);

/// Maps a batch of band levels onto the LED frame.
///
/// The real spectrum-to-strip math lives with the analyser integrations;
/// this effect lights the whole frame uniformly, scaled by the low-band
/// energy, which is enough to see the pipeline breathe.
struct LevelEffect {
    led_count: usize,
}

impl LevelEffect {
    fn new(led_count: usize) -> Self {
        Self { led_count }
    }

    fn colors(&self, levels: &[f32]) -> Vec<Rgb> {
        let level = levels.first().copied().unwrap_or(0.0).clamp(0.0, 1.0);
        let brightness = (level * 255.0) as u8;
        vec![[brightness, brightness / 2, 0]; self.led_count]
    }
}

pub struct AudioService {
    sink: Box<dyn LedSink>,
    source: Box<dyn SpectrumSource>,
    effect: LevelEffect,
}

impl AudioService {
    pub fn new(sink: Box<dyn LedSink>, source: Box<dyn SpectrumSource>) -> Self {
        Self {
            sink,
            source,
            effect: LevelEffect::new(0),
        }
    }

    pub fn options() -> ServiceOptions {
        ServiceOptions {
            require_settings: true,
            error_backoff: Duration::from_secs(5),
            initial_status: Some(StatusValue::Ok.code()),
            ..ServiceOptions::default()
        }
    }

    fn reconfigure_sink(&mut self, ctx: &ServiceContext<'_>) {
        let address = ctx.setting::<String>(keys::HYPERION_ADDRESS);
        let port = ctx.setting::<u16>(keys::HYPERION_JSON_PORT);
        match (address, port) {
            (Ok(address), Ok(port)) => self.sink.configure(SinkTarget { address, port }),
            (address, port) => {
                warn!(?address, ?port, "incomplete hyperion settings, sink unchanged")
            }
        }
    }

    fn rebuild_effect(&mut self, ctx: &ServiceContext<'_>) {
        let counts = (
            ctx.setting::<u32>(keys::LED_COUNT_TOP),
            ctx.setting::<u32>(keys::LED_COUNT_BOTTOM),
            ctx.setting::<u32>(keys::LED_COUNT_SIDE),
        );
        match counts {
            (Ok(top), Ok(bottom), Ok(side)) => {
                let led_count = (top + bottom + 2 * side) as usize;
                self.effect = LevelEffect::new(led_count);
                debug!(led_count, "audio effect rebuilt");
            }
            other => warn!(?other, "incomplete led geometry, effect unchanged"),
        }
        if let Ok(rate) = ctx.setting::<u32>(keys::AUDIO_FRAME_RATE) {
            self.source.set_rate(rate);
        }
    }

    fn tick(&mut self, ctx: &mut ServiceContext<'_>) -> Result<(), ServiceError> {
        if !self.sink.is_connected() {
            self.sink
                .connect()
                .map_err(|e| ServiceError::recoverable(StatusValue::Error, e.to_string()))?;
            ctx.update_state(Some(StatusValue::Ok.code()), None)?;
        }

        if !self.source.is_running() {
            self.source.start();
        }

        match self.source.poll(ANALYSER_TIMEOUT) {
            Some(levels) => {
                let colors = self.effect.colors(&levels);
                let priority: i64 = ctx
                    .setting(keys::AUDIO_PRIORITY)
                    .map_err(ServiceError::fatal)?;
                self.sink
                    .send_colors(&colors, priority, IMAGE_DURATION_MS)
                    .map_err(|e| ServiceError::recoverable(StatusValue::Error, e.to_string()))?;
                Ok(())
            }
            None => {
                // Stop so the next tick restarts the analyser from scratch.
                self.source.stop();
                Err(ServiceError::recoverable(
                    StatusValue::Error,
                    "audio analyser stalled",
                ))
            }
        }
    }
}

impl Service for AudioService {
    fn name(&self) -> &'static str {
        "audio"
    }

    fn setting_units(&self) -> Vec<SettingUnit> {
        vec![
            SettingUnit::new(
                "hyperion",
                &[keys::HYPERION_ADDRESS, keys::HYPERION_JSON_PORT],
            )
            .with_callback(),
            SettingUnit::new(
                "effect",
                &[
                    keys::AUDIO_FRAME_RATE,
                    keys::LED_COUNT_TOP,
                    keys::LED_COUNT_BOTTOM,
                    keys::LED_COUNT_SIDE,
                    keys::LED_START_CORNER,
                    keys::LED_DIRECTION,
                ],
            )
            .with_callback(),
            SettingUnit::new("priority", &[keys::AUDIO_PRIORITY]),
        ]
    }

    fn setup(&mut self, ctx: &mut ServiceContext<'_>) -> Result<(), ServiceError> {
        self.reconfigure_sink(ctx);
        self.rebuild_effect(ctx);
        Ok(())
    }

    fn set_enabled(
        &mut self,
        _ctx: &mut ServiceContext<'_>,
        enable: bool,
    ) -> Result<(), ServiceError> {
        if enable {
            if let Err(e) = self.sink.connect() {
                debug!(error = %e, "sink connect deferred to first tick");
            }
            self.source.start();
        } else {
            self.sink.disconnect();
            self.source.stop();
        }
        Ok(())
    }

    fn on_shutdown(&mut self, _ctx: &mut ServiceContext<'_>) {
        self.source.stop();
        self.sink.disconnect();
    }

    fn run_once(&mut self, ctx: &mut ServiceContext<'_>) -> Result<(), ServiceError> {
        self.tick(ctx)
    }

    fn settings_changed(&mut self, ctx: &mut ServiceContext<'_>, unit: &str) {
        match unit {
            "hyperion" => self.reconfigure_sink(ctx),
            "effect" => self.rebuild_effect(ctx),
            _ => {}
        }
    }
}
