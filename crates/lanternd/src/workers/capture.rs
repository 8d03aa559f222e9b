//! The screen capture worker.
//!
//! Grabs one scaled frame per tick and streams it to the LED server,
//! paced by a drift-correcting timer derived from the configured frame
//! rate. A sink failure is reported as an ERROR state and retried after
//! the runtime's backoff.

use std::time::Duration;

use lanternproto::settings::keys;
use lanternproto::{
    DelayTimer, Service, ServiceContext, ServiceError, ServiceOptions, SettingUnit, StatusValue,
};
use tracing::{debug, warn};

use super::sink::{LedSink, SinkTarget};
use super::source::FrameSource;
use super::IMAGE_DURATION_MS;

pub struct CaptureService {
    sink: Box<dyn LedSink>,
    source: Box<dyn FrameSource>,
    timer: DelayTimer,
}

impl CaptureService {
    pub fn new(sink: Box<dyn LedSink>, source: Box<dyn FrameSource>) -> Self {
        Self {
            sink,
            source,
            timer: DelayTimer::new(Duration::from_millis(33)),
        }
    }

    /// Runtime options for this worker: it cannot do anything before the
    /// first settings arrive, and retries sink failures after 5s.
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
        let port = ctx.setting::<u16>(keys::HYPERION_PROTO_PORT);
        match (address, port) {
            (Ok(address), Ok(port)) => self.sink.configure(SinkTarget { address, port }),
            (address, port) => {
                warn!(?address, ?port, "incomplete hyperion settings, sink unchanged")
            }
        }
    }

    fn retune_timer(&mut self, ctx: &ServiceContext<'_>) {
        match ctx.setting::<u32>(keys::CAPTURE_FRAME_RATE) {
            Ok(rate) if rate > 0 => {
                self.timer.set_period(Duration::from_secs(1) / rate);
                debug!(rate, "capture pacing updated");
            }
            other => warn!(?other, "ignoring unusable capture frame rate"),
        }
    }

    fn tick(&mut self, ctx: &mut ServiceContext<'_>) -> Result<(), ServiceError> {
        // The sink may have dropped since the last tick; reconnect and
        // report recovery before doing any work.
        if !self.sink.is_connected() {
            self.sink
                .connect()
                .map_err(|e| ServiceError::recoverable(StatusValue::Error, e.to_string()))?;
            ctx.update_state(Some(StatusValue::Ok.code()), None)?;
        }

        let width: u32 = ctx
            .setting(keys::CAPTURE_SCALE_WIDTH)
            .map_err(ServiceError::fatal)?;
        let height: u32 = ctx
            .setting(keys::CAPTURE_SCALE_HEIGHT)
            .map_err(ServiceError::fatal)?;
        let priority: i64 = ctx
            .setting(keys::CAPTURE_PRIORITY)
            .map_err(ServiceError::fatal)?;

        let frame = self
            .source
            .grab(width, height)
            .map_err(|e| ServiceError::recoverable(StatusValue::Error, e.to_string()))?;

        self.sink
            .send_image(width, height, &frame, priority, IMAGE_DURATION_MS)
            .map_err(|e| ServiceError::recoverable(StatusValue::Error, e.to_string()))?;
        Ok(())
    }
}

impl Service for CaptureService {
    fn name(&self) -> &'static str {
        "capture"
    }

    fn setting_units(&self) -> Vec<SettingUnit> {
        vec![
            SettingUnit::new(
                "hyperion",
                &[keys::HYPERION_ADDRESS, keys::HYPERION_PROTO_PORT],
            )
            .with_callback(),
            SettingUnit::new("pacing", &[keys::CAPTURE_FRAME_RATE]).with_callback(),
            SettingUnit::new(
                "frame",
                &[
                    keys::CAPTURE_SCALE_WIDTH,
                    keys::CAPTURE_SCALE_HEIGHT,
                    keys::CAPTURE_PRIORITY,
                ],
            ),
        ]
    }

    fn setup(&mut self, ctx: &mut ServiceContext<'_>) -> Result<(), ServiceError> {
        self.reconfigure_sink(ctx);
        self.retune_timer(ctx);
        Ok(())
    }

    fn set_enabled(
        &mut self,
        _ctx: &mut ServiceContext<'_>,
        enable: bool,
    ) -> Result<(), ServiceError> {
        if enable {
            // First frame reconnects and reports if this fails.
            if let Err(e) = self.sink.connect() {
                debug!(error = %e, "sink connect deferred to first frame");
            }
        } else {
            self.sink.disconnect();
        }
        Ok(())
    }

    fn on_shutdown(&mut self, _ctx: &mut ServiceContext<'_>) {
        self.sink.disconnect();
    }

    fn run_once(&mut self, ctx: &mut ServiceContext<'_>) -> Result<(), ServiceError> {
        self.timer.start();
        self.tick(ctx)?;
        self.timer.delay();
        Ok(())
    }

    fn settings_changed(&mut self, ctx: &mut ServiceContext<'_>, unit: &str) {
        match unit {
            "hyperion" => self.reconfigure_sink(ctx),
            "pacing" => self.retune_timer(ctx),
            _ => {}
        }
    }
}
