//! Top-level facade: owns the mapped peripheral window, the DMA program, and
//! the scheduler, and exposes the lifecycle the rest of the world drives
//! (spec §4.5's state machine collapsed into a handful of methods).
//!
//! Shaped after `firmware/src/app.rs`'s `App` (one struct composing the
//! board's peripherals behind `setup`/`poll`), generalized from borrowed
//! peripheral references to owned ones since this core allocates its own
//! `/dev/mem` mapping and mailbox memory rather than receiving them from a
//! shared board-init routine.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use rf_hal::peripheral::{probe_processor, PeripheralWindow, Processor, RegisterIo};

use crate::callbacks::{FinishedCallback, StartedCallback};
use crate::config::TransmissionConfig;
use crate::dma_program::DmaProgram;
use crate::error::{Error, Result};
use crate::priority::raise_priority;
use crate::scheduler::{gate_ppm_update, ControlSurface, Scheduler};

/// Within the `SCHED_FIFO` range spec §5 calls out ("priority ~30-50 on POSIX").
const REALTIME_PRIORITY: i32 = 40;

/// Shared handle collaborators (a signal handler, an NTP/chrony watcher, a
/// control-plane RPC) use to steer a running [`App`] without touching its
/// borrow (spec §5: the core's thread only reads these, collaborators only
/// write them).
pub type Control = Arc<ControlSurface>;

pub struct App<R: RegisterIo> {
    scheduler: Scheduler<R>,
    config: TransmissionConfig,
    control: Control,
    frequency_cursor: usize,
}

impl App<PeripheralWindow> {
    /// Probes the processor, maps the peripheral window, allocates the DMA
    /// buffer pool, and builds the CB ring (spec §4.1-4.3). Does not touch
    /// GPIO or start any clock; that happens in [`App::transmit_once`].
    pub fn new(config: TransmissionConfig) -> Result<Self> {
        let processor = probe_processor()?;
        let io = PeripheralWindow::map()?;
        let dma = DmaProgram::create(processor.mailbox_mem_flag())?;
        Ok(App::from_parts(io, dma, processor, config))
    }
}

impl<R: RegisterIo> App<R> {
    /// Assembles an `App` over an already-constructed register-IO backend;
    /// the hardware constructor above and tests (with [`rf_hal::peripheral::FakeRegisterIo`])
    /// both funnel through here.
    pub fn from_parts(io: R, dma: DmaProgram, processor: Processor, mut config: TransmissionConfig) -> Self {
        // spec §7 `PpmOutOfRange`: an out-of-bound snapshot is treated the
        // same as an out-of-bound live update, since there is no "last good"
        // value yet to fall back to, 0.0 (no correction) stands in for it.
        config.ppm = gate_ppm_update(config.ppm, 0.0);
        App {
            scheduler: Scheduler::new(io, dma, processor),
            config,
            control: Arc::new(ControlSurface::default()),
            frequency_cursor: 0,
        }
    }

    /// A clone-able handle for requesting cancellation or pushing a new PPM
    /// value from outside this struct's owning thread.
    pub fn control(&self) -> Control {
        self.control.clone()
    }

    pub fn set_started_callback(&mut self, cb: StartedCallback) {
        self.scheduler.callbacks_mut().on_started = Some(cb);
    }

    pub fn set_finished_callback(&mut self, cb: FinishedCallback) {
        self.scheduler.callbacks_mut().on_finished = Some(cb);
    }

    fn next_center_frequency(&mut self) -> f64 {
        let f = self.config.center_frequencies[self.frequency_cursor];
        self.frequency_cursor = (self.frequency_cursor + 1) % self.config.center_frequencies.len();
        f
    }

    fn apply_pending_ppm(&mut self) {
        if self.control.ppm_reload_pending.swap(false, Ordering::Relaxed) {
            let requested = *self.control.current_ppm.lock().unwrap();
            self.config.ppm = gate_ppm_update(requested, self.config.ppm);
        }
    }

    /// Runs exactly one frame: Idle -> Armed -> KeyOn -> 162 symbols (or a
    /// free-running carrier in tone mode) -> KeyOff -> Idle. Blocks for the
    /// WSPR window wait unless `immediate` skips it.
    pub fn transmit_once(&mut self, immediate: bool) -> Result<()> {
        self.apply_pending_ppm();
        let center = self.next_center_frequency();
        let params = self.scheduler.setup_transmission(&self.config, center)?;
        self.scheduler.enable_transmission(&params, &self.control, immediate)
    }

    /// Runs frames back to back, cycling `center_frequencies`, until
    /// `control().stop_request` is set.
    pub fn run_forever(&mut self) -> Result<()> {
        raise_priority(REALTIME_PRIORITY);
        while !self.control.stop_request.load(Ordering::Relaxed) {
            match self.transmit_once(false) {
                Ok(()) => {}
                Err(Error::Cancelled) => break,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    pub fn request_stop(&self) {
        self.control.stop_request.store(true, Ordering::Relaxed);
    }

    /// Restores every register this core touched and stops DMA channel 0
    /// (spec §4.5 teardown, §8 property 10). Idempotent; also runs on drop.
    pub fn teardown(&mut self) {
        self.scheduler.teardown();
    }
}

impl<R: RegisterIo> Drop for App<R> {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Mode;
    use rf_hal::peripheral::FakeRegisterIo;

    fn fake_app(center_frequencies: Vec<f64>) -> App<FakeRegisterIo> {
        let config = TransmissionConfig {
            callsign: "K1ABC".into(),
            grid: "FN42".into(),
            power_dbm: 37,
            center_frequencies,
            drive_index: 7,
            use_offset: false,
            use_ntp: false,
            ppm: 0.0,
            mode: Mode::Wspr,
            test_tone_hz: 0.0,
        };
        App::from_parts(FakeRegisterIo::new(), DmaProgram::fake(), Processor::Bcm2711, config)
    }

    #[test]
    fn frequency_cursor_cycles() {
        let mut app = fake_app(vec![14_097_100.0, 7_040_100.0]);
        assert_eq!(app.next_center_frequency(), 14_097_100.0);
        assert_eq!(app.next_center_frequency(), 7_040_100.0);
        assert_eq!(app.next_center_frequency(), 14_097_100.0);
    }

    #[test]
    fn request_stop_is_observed_by_control_handle() {
        let app = fake_app(vec![14_097_100.0]);
        let control = app.control();
        assert!(!control.stop_request.load(Ordering::Relaxed));
        app.request_stop();
        assert!(control.stop_request.load(Ordering::Relaxed));
    }

    #[test]
    fn teardown_is_idempotent() {
        let mut app = fake_app(vec![14_097_100.0]);
        app.teardown();
        app.teardown();
    }

    #[test]
    fn out_of_range_ppm_update_is_ignored_and_logged() {
        let mut app = fake_app(vec![14_097_100.0]);
        let control = app.control();
        *control.current_ppm.lock().unwrap() = 11.135;
        control.ppm_reload_pending.store(true, Ordering::Relaxed);
        app.apply_pending_ppm();
        assert_eq!(app.config.ppm, 11.135);

        *control.current_ppm.lock().unwrap() = 250.0;
        control.ppm_reload_pending.store(true, Ordering::Relaxed);
        app.apply_pending_ppm();
        assert_eq!(app.config.ppm, 11.135, "out-of-bound update must keep the last good ppm");
    }

    #[test]
    fn out_of_range_initial_ppm_falls_back_to_zero() {
        let config = TransmissionConfig {
            callsign: "K1ABC".into(),
            grid: "FN42".into(),
            power_dbm: 37,
            center_frequencies: vec![14_097_100.0],
            drive_index: 7,
            use_offset: false,
            use_ntp: false,
            ppm: 500.0,
            mode: Mode::Wspr,
            test_tone_hz: 0.0,
        };
        let app = App::from_parts(FakeRegisterIo::new(), DmaProgram::fake(), Processor::Bcm2711, config);
        assert_eq!(app.config.ppm, 0.0);
    }
}
