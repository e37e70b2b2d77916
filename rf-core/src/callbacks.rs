//! The two user-extensible seams in the core (spec §6, Design Notes
//! "Dynamic dispatch for callbacks"): boxed closures, no trait hierarchy.

/// Invoked once KeyOn completes, before the symbol loop starts.
pub type StartedCallback = Box<dyn FnMut(&str, f64) + Send>;

/// Invoked once KeyOff completes, with the wall-clock duration of the frame.
pub type FinishedCallback = Box<dyn FnMut(&str, f64) + Send>;

#[derive(Default)]
pub struct Callbacks {
    pub on_started: Option<StartedCallback>,
    pub on_finished: Option<FinishedCallback>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fire_started(&mut self, label: &str, frequency_hz: f64) {
        if let Some(cb) = self.on_started.as_mut() {
            cb(label, frequency_hz);
        }
    }

    pub fn fire_finished(&mut self, label: &str, elapsed_s: f64) {
        if let Some(cb) = self.on_finished.as_mut() {
            cb(label, elapsed_s);
        }
    }
}
