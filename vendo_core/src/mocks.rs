//! Test and helper doubles for vendo_core.

use crate::backend::{Backend, QualitySample, SaleRecord};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use vendo_traits::{Pump, PulseSink, PulseSource, QualityProbe, QualityReading};

/// Pump spy: counts starts/stops and can be scripted to fail on start.
#[derive(Debug, Default)]
pub struct SpyPumpState {
    pub starts: AtomicU32,
    pub stops: AtomicU32,
    pub fail_start: AtomicBool,
    pub running: AtomicBool,
}

pub struct SpyPump {
    state: Arc<SpyPumpState>,
}

impl SpyPump {
    pub fn new() -> (Self, Arc<SpyPumpState>) {
        let state = Arc::new(SpyPumpState::default());
        (
            Self {
                state: Arc::clone(&state),
            },
            state,
        )
    }
}

impl Pump for SpyPump {
    fn start(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.state.starts.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_start.load(Ordering::SeqCst) {
            return Err("motor driver fault".into());
        }
        self.state.running.store(true, Ordering::SeqCst);
        Ok(())
    }
    fn stop(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.state.stops.fetch_add(1, Ordering::SeqCst);
        self.state.running.store(false, Ordering::SeqCst);
        Ok(())
    }
    fn is_available(&self) -> bool {
        true
    }
}

/// Pulse source driven by the test instead of a thread: the probe half fires
/// pulses into whatever sink is currently attached.
#[derive(Clone, Default)]
pub struct PulseProbe {
    sink: Arc<Mutex<Option<PulseSink>>>,
}

impl PulseProbe {
    pub fn fire(&self, pulses: u32) {
        let sink = self.sink.lock().ok().and_then(|g| g.clone());
        if let Some(sink) = sink {
            for _ in 0..pulses {
                sink();
            }
        }
    }

    pub fn is_attached(&self) -> bool {
        self.sink.lock().map(|g| g.is_some()).unwrap_or(false)
    }
}

pub struct ManualPulseSource {
    sink: Arc<Mutex<Option<PulseSink>>>,
}

impl ManualPulseSource {
    pub fn new() -> (Self, PulseProbe) {
        let probe = PulseProbe::default();
        (
            Self {
                sink: Arc::clone(&probe.sink),
            },
            probe,
        )
    }
}

impl PulseSource for ManualPulseSource {
    fn attach(&mut self, sink: PulseSink) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if let Ok(mut slot) = self.sink.lock() {
            *slot = Some(sink);
        }
        Ok(())
    }
    fn detach(&mut self) {
        if let Ok(mut slot) = self.sink.lock() {
            *slot = None;
        }
    }
}

/// Pulse source whose attach always fails; for exercising sensor-dropout
/// handling at fill start.
pub struct BrokenPulseSource;

impl PulseSource for BrokenPulseSource {
    fn attach(&mut self, _sink: PulseSink) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Err("flow sensor not responding".into())
    }
    fn detach(&mut self) {}
}

#[derive(Default)]
struct RecordingInner {
    sales: Mutex<Vec<SaleRecord>>,
    quality: Mutex<Vec<QualitySample>>,
    sale_ok: AtomicBool,
    quality_ok: AtomicBool,
}

/// Backend double that records every call. Cloneable; clones share state.
#[derive(Clone)]
pub struct RecordingBackend {
    inner: Arc<RecordingInner>,
}

impl Default for RecordingBackend {
    fn default() -> Self {
        let inner = RecordingInner::default();
        inner.sale_ok.store(true, Ordering::SeqCst);
        inner.quality_ok.store(true, Ordering::SeqCst);
        Self {
            inner: Arc::new(inner),
        }
    }
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_sale_ok(&self, ok: bool) {
        self.inner.sale_ok.store(ok, Ordering::SeqCst);
    }

    pub fn sales(&self) -> Vec<SaleRecord> {
        self.inner.sales.lock().map(|g| g.clone()).unwrap_or_default()
    }

    pub fn quality(&self) -> Vec<QualitySample> {
        self.inner
            .quality
            .lock()
            .map(|g| g.clone())
            .unwrap_or_default()
    }
}

impl Backend for RecordingBackend {
    fn record_sale(&self, record: &SaleRecord) -> bool {
        if let Ok(mut g) = self.inner.sales.lock() {
            g.push(record.clone());
        }
        self.inner.sale_ok.load(Ordering::SeqCst)
    }
    fn record_quality(&self, sample: &QualitySample) -> bool {
        if let Ok(mut g) = self.inner.quality.lock() {
            g.push(sample.clone());
        }
        self.inner.quality_ok.load(Ordering::SeqCst)
    }
}

/// Probe that replays a script of outcomes, repeating the last entry.
pub struct ScriptedProbe {
    script: Vec<Result<QualityReading, String>>,
    idx: usize,
}

impl ScriptedProbe {
    pub fn new(script: Vec<Result<QualityReading, String>>) -> Self {
        Self { script, idx: 0 }
    }
}

impl QualityProbe for ScriptedProbe {
    fn sample(
        &mut self,
        _timeout: std::time::Duration,
    ) -> Result<QualityReading, Box<dyn std::error::Error + Send + Sync>> {
        let entry = self
            .script
            .get(self.idx)
            .or_else(|| self.script.last())
            .cloned()
            .unwrap_or(Err("empty probe script".into()));
        if self.idx < self.script.len() {
            self.idx += 1;
        }
        entry.map_err(Into::into)
    }
}
