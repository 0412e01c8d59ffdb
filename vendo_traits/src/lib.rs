pub mod clock;

pub use clock::{Clock, ManualClock, MonotonicClock};

use std::sync::Arc;

/// Callback invoked once per flow-sensor pulse. Runs on the pulse source's
/// own execution context (GPIO interrupt thread or simulation thread), so it
/// must be cheap and must not block.
pub type PulseSink = Arc<dyn Fn() + Send + Sync>;

/// Dispensing pump. `stop` must be safe to call in any state, including
/// before `start` and after a failed `start`.
pub trait Pump {
    fn start(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
    fn stop(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
    fn is_available(&self) -> bool;
}

/// Source of discrete flow pulses: a real flow sensor edge interrupt or a
/// paced simulation loop.
pub trait PulseSource {
    /// Begin delivering pulses to `sink`. Replaces any previous sink.
    fn attach(&mut self, sink: PulseSink) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
    /// Stop delivering pulses. Must return promptly (bounded by one pulse
    /// period for simulated sources) and must be idempotent.
    fn detach(&mut self);
}

/// Raw water-quality reading as reported by the external sensor board.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityReading {
    pub tds: f64,
    pub ph: f64,
    pub water_level: f64,
}

/// External water-quality sensor (ESP32 in the reference hardware).
pub trait QualityProbe {
    fn sample(
        &mut self,
        timeout: std::time::Duration,
    ) -> Result<QualityReading, Box<dyn std::error::Error + Send + Sync>>;
}

impl<P: QualityProbe + ?Sized> QualityProbe for Box<P> {
    fn sample(
        &mut self,
        timeout: std::time::Duration,
    ) -> Result<QualityReading, Box<dyn std::error::Error + Send + Sync>> {
        (**self).sample(timeout)
    }
}
