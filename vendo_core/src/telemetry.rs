//! Periodic water-quality reporting, independent of the fill cycle.
//!
//! Spawns a thread that owns the `QualityProbe`, forwards each good sample
//! to the backend, and publishes display events. When a poll fails, the last
//! known good sample is republished flagged stale until the staleness
//! horizon passes, after which an explicit error state is published instead
//! of indefinitely old data.
//!
//! Safety: each `TelemetryReporter` spawns exactly one thread that is shut
//! down when the reporter is dropped, preventing thread leaks.

use crate::backend::{Backend, QualitySample};
use crossbeam_channel as xch;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime};
use vendo_traits::QualityProbe;
use vendo_traits::clock::Clock;

/// Display event for the kiosk shell.
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryEvent {
    Fresh(QualitySample),
    /// Last known good sample, republished because a fresh read failed.
    Stale(QualitySample),
    /// No fresh sample and the last good one aged out (or never existed).
    Error,
}

#[derive(Debug, Clone)]
pub struct TelemetryCfg {
    pub poll_interval: Duration,
    /// How long a last-known-good sample may be republished as stale.
    /// `None` never expires it (reference behavior).
    pub stale_after: Option<Duration>,
    pub sample_timeout: Duration,
}

impl From<&vendo_config::Telemetry> for TelemetryCfg {
    fn from(t: &vendo_config::Telemetry) -> Self {
        Self {
            poll_interval: Duration::from_millis(t.poll_interval_ms),
            stale_after: (t.stale_after_ms > 0).then(|| Duration::from_millis(t.stale_after_ms)),
            sample_timeout: Duration::from_millis(t.sample_timeout_ms),
        }
    }
}

pub struct TelemetryReporter {
    shutdown: Arc<AtomicBool>,
    join_handle: Option<std::thread::JoinHandle<()>>,
}

impl TelemetryReporter {
    pub fn spawn<P, C>(
        mut probe: P,
        backend: Arc<dyn Backend>,
        cfg: TelemetryCfg,
        clock: C,
    ) -> (Self, xch::Receiver<TelemetryEvent>)
    where
        P: QualityProbe + Send + 'static,
        C: Clock + Send + Sync + 'static,
    {
        let (tx, rx) = xch::unbounded();
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_flag = Arc::clone(&shutdown);

        let join_handle = std::thread::spawn(move || {
            let epoch = clock.now();
            let mut last_good: Option<(QualitySample, u64)> = None;
            loop {
                if shutdown_flag.load(Ordering::Relaxed) {
                    break;
                }
                match probe.sample(cfg.sample_timeout) {
                    Ok(reading) => {
                        let sample = QualitySample {
                            tds_level: reading.tds,
                            ph_level: reading.ph,
                            water_level: reading.water_level,
                            taken_at: SystemTime::now(),
                        };
                        last_good = Some((sample.clone(), clock.ms_since(epoch)));
                        if !backend.record_quality(&sample) {
                            tracing::warn!(
                                tds = sample.tds_level,
                                ph = sample.ph_level,
                                "quality report failed"
                            );
                        }
                        if tx.send(TelemetryEvent::Fresh(sample)).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "quality probe read failed");
                        let age_ms = last_good
                            .as_ref()
                            .map(|(_, at)| clock.ms_since(epoch).saturating_sub(*at));
                        let event = match (&last_good, age_ms) {
                            (Some((sample, _)), Some(age))
                                if within_staleness(cfg.stale_after, age) =>
                            {
                                TelemetryEvent::Stale(sample.clone())
                            }
                            _ => TelemetryEvent::Error,
                        };
                        if tx.send(event).is_err() {
                            break;
                        }
                    }
                }
                if !sleep_cancellable(&clock, cfg.poll_interval, &shutdown_flag) {
                    break;
                }
            }
            tracing::trace!("telemetry thread exiting cleanly");
        });

        (
            Self {
                shutdown,
                join_handle: Some(join_handle),
            },
            rx,
        )
    }
}

fn within_staleness(stale_after: Option<Duration>, age_ms: u64) -> bool {
    match stale_after {
        None => true,
        Some(limit) => age_ms <= limit.as_millis() as u64,
    }
}

/// Sleep `total` in slices, checking the shutdown flag between slices so a
/// drop lands within tens of milliseconds. Returns false when shut down.
fn sleep_cancellable<C: Clock>(clock: &C, total: Duration, shutdown: &AtomicBool) -> bool {
    const SLICE: Duration = Duration::from_millis(25);
    let mut remaining = total;
    while !remaining.is_zero() {
        if shutdown.load(Ordering::Relaxed) {
            return false;
        }
        let step = remaining.min(SLICE);
        clock.sleep(step);
        remaining -= step;
    }
    !shutdown.load(Ordering::Relaxed)
}

impl Drop for TelemetryReporter {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.join_handle.take()
            && handle.join().is_err()
        {
            tracing::warn!("telemetry thread panicked during shutdown");
        }
    }
}
