//! Pump and flow-sensor implementations.
//!
//! The simulated variants run on any host and drive development, tests and
//! bench kiosks without plumbing. The GPIO variants (feature `hardware`,
//! Raspberry Pi via `rppal`) drive the real relay and the hall-effect flow
//! sensor. Construction of the GPIO variants is fallible; callers are
//! expected to fall back to the simulated ones when the pins cannot be
//! claimed, so a broken harness degrades to a demo kiosk instead of a crash.

pub mod error;

pub use error::HwError;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use vendo_traits::{Pump, PulseSink, PulseSource};

/// Pump stand-in that only logs. Start and stop always succeed.
#[derive(Default)]
pub struct SimulatedPump {
    running: bool,
}

impl SimulatedPump {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Pump for SimulatedPump {
    fn start(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.running = true;
        tracing::info!("pump started (simulated)");
        Ok(())
    }
    fn stop(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.running = false;
        tracing::info!("pump stopped (simulated)");
        Ok(())
    }
    fn is_available(&self) -> bool {
        true
    }
}

/// Flow sensor stand-in: emits pulses at a fixed cadence on its own thread
/// while attached, so a simulated fill progresses at a realistic pace.
pub struct SimulatedPulseSource {
    period: Duration,
    running: Arc<AtomicBool>,
    join_handle: Option<std::thread::JoinHandle<()>>,
}

impl SimulatedPulseSource {
    /// `pulse_hz` is clamped to at least 1.
    pub fn new(pulse_hz: u32) -> Self {
        let hz = pulse_hz.max(1);
        Self {
            period: Duration::from_micros(1_000_000 / u64::from(hz)),
            running: Arc::new(AtomicBool::new(false)),
            join_handle: None,
        }
    }
}

impl PulseSource for SimulatedPulseSource {
    fn attach(&mut self, sink: PulseSink) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.detach();
        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let period = self.period;
        self.join_handle = Some(std::thread::spawn(move || {
            while running.load(Ordering::SeqCst) {
                std::thread::sleep(period);
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                sink();
            }
        }));
        Ok(())
    }

    /// Stops the emitter thread. Pulses cease within one emission period.
    fn detach(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.join_handle.take()
            && handle.join().is_err()
        {
            tracing::warn!("simulated pulse thread panicked");
        }
    }
}

impl Drop for SimulatedPulseSource {
    fn drop(&mut self) {
        self.detach();
    }
}

#[cfg(feature = "hardware")]
mod gpio {
    use super::HwError;
    use rppal::gpio::{Gpio, InputPin, OutputPin, Trigger};
    use vendo_traits::{Pump, PulseSink, PulseSource};

    /// Relay-driven pump on a single active-high output pin.
    pub struct GpioPump {
        pin: OutputPin,
        number: u8,
    }

    impl GpioPump {
        pub fn new(pin: u8) -> Result<Self, HwError> {
            let gpio = Gpio::new().map_err(|e| HwError::Gpio(e.to_string()))?;
            let mut out = gpio
                .get(pin)
                .map_err(|e| HwError::Pin {
                    pin,
                    reason: e.to_string(),
                })?
                .into_output();
            out.set_low();
            Ok(Self { pin: out, number: pin })
        }
    }

    impl Pump for GpioPump {
        fn start(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.pin.set_high();
            tracing::info!(pin = self.number, "pump relay energised");
            Ok(())
        }
        fn stop(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            // Driving the pin low is infallible once the pin is claimed.
            self.pin.set_low();
            tracing::info!(pin = self.number, "pump relay released");
            Ok(())
        }
        fn is_available(&self) -> bool {
            true
        }
    }

    impl Drop for GpioPump {
        fn drop(&mut self) {
            self.pin.set_low();
        }
    }

    /// Hall-effect flow sensor delivering one interrupt per rotor pulse.
    pub struct GpioPulseSource {
        pin: InputPin,
        number: u8,
        attached: bool,
    }

    impl GpioPulseSource {
        pub fn new(pin: u8) -> Result<Self, HwError> {
            let gpio = Gpio::new().map_err(|e| HwError::Gpio(e.to_string()))?;
            let input = gpio
                .get(pin)
                .map_err(|e| HwError::Pin {
                    pin,
                    reason: e.to_string(),
                })?
                .into_input_pullup();
            Ok(Self {
                pin: input,
                number: pin,
                attached: false,
            })
        }
    }

    impl PulseSource for GpioPulseSource {
        fn attach(
            &mut self,
            sink: PulseSink,
        ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.pin
                .set_async_interrupt(Trigger::FallingEdge, move |_| sink())
                .map_err(|e| HwError::Interrupt(e.to_string()))?;
            self.attached = true;
            tracing::debug!(pin = self.number, "flow sensor interrupt armed");
            Ok(())
        }

        fn detach(&mut self) {
            if self.attached {
                if let Err(e) = self.pin.clear_async_interrupt() {
                    tracing::warn!(pin = self.number, error = %e, "interrupt clear failed");
                }
                self.attached = false;
            }
        }
    }

    impl Drop for GpioPulseSource {
        fn drop(&mut self) {
            self.detach();
        }
    }
}

#[cfg(feature = "hardware")]
pub use gpio::{GpioPulseSource, GpioPump};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Instant;

    #[test]
    fn simulated_pump_start_stop() {
        let mut pump = SimulatedPump::new();
        assert!(pump.is_available());
        pump.start().unwrap();
        pump.stop().unwrap();
    }

    #[test]
    fn simulated_source_emits_at_cadence() {
        let mut source = SimulatedPulseSource::new(200);
        let count = Arc::new(AtomicU32::new(0));
        let sink_count = Arc::clone(&count);
        source
            .attach(Arc::new(move || {
                sink_count.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        std::thread::sleep(Duration::from_millis(200));
        source.detach();
        let seen = count.load(Ordering::SeqCst);
        // 200 Hz over 200ms is ~40 pulses; accept generous scheduling slack.
        assert!(seen >= 10, "only {seen} pulses in 200ms");
    }

    #[test]
    fn detach_stops_pulses_within_a_period() {
        let mut source = SimulatedPulseSource::new(100);
        let count = Arc::new(AtomicU32::new(0));
        let sink_count = Arc::clone(&count);
        source
            .attach(Arc::new(move || {
                sink_count.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        std::thread::sleep(Duration::from_millis(50));

        let begun = Instant::now();
        source.detach();
        assert!(begun.elapsed() < Duration::from_millis(100));
        let at_detach = count.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(count.load(Ordering::SeqCst), at_detach);
    }

    #[test]
    fn reattach_replaces_the_old_sink() {
        let mut source = SimulatedPulseSource::new(500);
        let first = Arc::new(AtomicU32::new(0));
        let second = Arc::new(AtomicU32::new(0));
        let a = Arc::clone(&first);
        source
            .attach(Arc::new(move || {
                a.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        std::thread::sleep(Duration::from_millis(30));
        let b = Arc::clone(&second);
        source
            .attach(Arc::new(move || {
                b.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        let first_after = first.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(50));
        source.detach();
        assert_eq!(first.load(Ordering::SeqCst), first_after);
        assert!(second.load(Ordering::SeqCst) > 0);
    }

    #[test]
    fn zero_hz_is_clamped() {
        // Must not divide by zero or spin.
        let _source = SimulatedPulseSource::new(0);
    }
}
