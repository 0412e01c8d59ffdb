//! Hardware assembly and the fill/telemetry/self-check command bodies.

use eyre::{Result, WrapErr};
use std::sync::Arc;
use std::time::Duration;
use vendo_config::Config;
use vendo_core::{
    AbortReason, Backend, DispenseController, FillEvent, TelemetryCfg, TelemetryEvent,
    TelemetryReporter, VolumeTable,
};
use vendo_gateway::{BackendGateway, Esp32Probe};
use vendo_hardware::{SimulatedPulseSource, SimulatedPump};
use vendo_traits::clock::MonotonicClock;
use vendo_traits::{Pump, PulseSource, QualityProbe, QualityReading};

/// Stable exit codes for scripted callers.
pub fn exit_code_for_failure(reason: &str) -> i32 {
    if reason.contains("user") {
        2
    } else if reason.contains("max fill time") {
        3
    } else {
        4
    }
}

type HwPair = (Box<dyn Pump + Send>, Box<dyn PulseSource + Send>);

fn simulated_pair(cfg: &Config) -> HwPair {
    (
        Box::new(SimulatedPump::new()),
        Box::new(SimulatedPulseSource::new(cfg.fill.sim_pulse_hz)),
    )
}

/// Select GPIO hardware when built and configured for it; any GPIO setup
/// failure degrades to simulation so the kiosk keeps demoing instead of
/// crashing on a bad harness.
pub fn build_hardware(cfg: &Config) -> HwPair {
    if cfg.hardware.simulated {
        tracing::info!("hardware.simulated set, using simulation");
        return simulated_pair(cfg);
    }
    #[cfg(feature = "hardware")]
    {
        match gpio_pair(cfg) {
            Ok(pair) => return pair,
            Err(e) => {
                tracing::warn!(error = %e, "GPIO unavailable, falling back to simulation");
            }
        }
    }
    #[cfg(not(feature = "hardware"))]
    tracing::info!("built without GPIO support, using simulation");
    simulated_pair(cfg)
}

#[cfg(feature = "hardware")]
fn gpio_pair(cfg: &Config) -> std::result::Result<HwPair, vendo_hardware::HwError> {
    let pump = vendo_hardware::GpioPump::new(cfg.hardware.motor_pin)?;
    let source = vendo_hardware::GpioPulseSource::new(cfg.hardware.flow_sensor_pin)?;
    Ok((Box::new(pump), Box::new(source)))
}

/// Quality probe stand-in for simulated kiosks: plausible tap-water values
/// with a slow drift.
struct SimulatedProbe {
    tick: u32,
}

impl QualityProbe for SimulatedProbe {
    fn sample(
        &mut self,
        _timeout: Duration,
    ) -> std::result::Result<QualityReading, Box<dyn std::error::Error + Send + Sync>> {
        self.tick = self.tick.wrapping_add(1);
        let drift = f64::from(self.tick % 10);
        Ok(QualityReading {
            tds: 140.0 + drift,
            ph: 7.0 + drift / 100.0,
            water_level: 80.0 - drift / 2.0,
        })
    }
}

fn build_probe(cfg: &Config) -> Result<Box<dyn QualityProbe + Send>> {
    if cfg.hardware.simulated {
        return Ok(Box::new(SimulatedProbe { tick: 0 }));
    }
    let probe = Esp32Probe::new(&cfg.hardware.esp32_ip, cfg.hardware.esp32_port)
        .wrap_err("sensor board client setup failed")?;
    Ok(Box::new(probe))
}

fn build_backend(cfg: &Config) -> Result<Arc<dyn Backend>> {
    let gateway = BackendGateway::from_config(&cfg.api).wrap_err("backend client setup failed")?;
    Ok(Arc::new(gateway))
}

/// Run one fill cycle to completion. Ctrl-C aborts the fill and the pump is
/// stopped before the process exits.
pub fn run_fill(cfg: &Config, size: &str, max_fill_ms: Option<u64>, json: bool) -> Result<i32> {
    let (pump, source) = build_hardware(cfg);
    let backend = build_backend(cfg)?;
    let table = VolumeTable::from_entries(&cfg.effective_volumes());
    let max_fill = Duration::from_millis(max_fill_ms.unwrap_or(cfg.fill.max_fill_ms));

    let (controller, events) = DispenseController::new(table, pump, source, backend, max_fill);
    let controller = Arc::new(controller);

    let abort_handle = Arc::clone(&controller);
    ctrlc::set_handler(move || {
        tracing::info!("interrupt received, aborting fill");
        let _ = abort_handle.abort(AbortReason::UserRequest);
    })
    .wrap_err("failed to install interrupt handler")?;

    controller.start_filling(size)?;
    let label = controller
        .session()
        .map(|s| s.option.label.clone())
        .unwrap_or_else(|| size.to_string());
    if !json {
        println!("Filling {label}...");
    }

    loop {
        let event = events
            .recv()
            .wrap_err("fill dispatcher exited unexpectedly")?;
        match event {
            FillEvent::Progress(pct) => {
                if json {
                    println!("{}", serde_json::json!({ "event": "progress", "pct": pct }));
                } else {
                    print!("\r{}", render_progress_bar(pct, 30));
                    use std::io::Write;
                    let _ = std::io::stdout().flush();
                }
            }
            FillEvent::Completed(record) => {
                if json {
                    println!(
                        "{}",
                        serde_json::json!({
                            "event": "completed",
                            "size": size,
                            "volume_ml": record.volume_ml,
                            "price": record.price,
                        })
                    );
                } else {
                    println!("\r{}", render_progress_bar(100, 30));
                    println!("Done: {} ({} ml), price {}", label, record.volume_ml, record.price);
                }
                return Ok(0);
            }
            FillEvent::Failed(reason) => {
                if json {
                    println!(
                        "{}",
                        serde_json::json!({ "event": "failed", "reason": reason })
                    );
                } else {
                    println!("\nFill failed: {reason}");
                }
                return Ok(exit_code_for_failure(&reason));
            }
        }
    }
}

fn render_progress_bar(pct: u8, width: usize) -> String {
    let filled = (usize::from(pct) * width) / 100;
    let mut bar = String::with_capacity(width + 8);
    bar.push('[');
    for i in 0..width {
        bar.push(if i < filled { '#' } else { '-' });
    }
    bar.push(']');
    bar.push_str(&format!(" {pct:>3}%"));
    bar
}

/// Print `count` quality readings, reporting each fresh one to the backend.
pub fn run_telemetry(cfg: &Config, count: u32, json: bool) -> Result<()> {
    let probe = build_probe(cfg)?;
    let backend = build_backend(cfg)?;
    let (_reporter, events) = TelemetryReporter::spawn(
        probe,
        backend,
        TelemetryCfg::from(&cfg.telemetry),
        MonotonicClock,
    );
    for _ in 0..count {
        match events.recv().wrap_err("telemetry thread exited")? {
            TelemetryEvent::Fresh(s) => {
                if json {
                    println!(
                        "{}",
                        serde_json::json!({
                            "state": "fresh",
                            "tds": s.tds_level,
                            "ph": s.ph_level,
                            "water_level": s.water_level,
                        })
                    );
                } else {
                    println!(
                        "tds {:.1} ppm | ph {:.2} | level {:.1}%",
                        s.tds_level, s.ph_level, s.water_level
                    );
                }
            }
            TelemetryEvent::Stale(s) => {
                if json {
                    println!(
                        "{}",
                        serde_json::json!({
                            "state": "stale",
                            "tds": s.tds_level,
                            "ph": s.ph_level,
                            "water_level": s.water_level,
                        })
                    );
                } else {
                    println!(
                        "tds {:.1} ppm | ph {:.2} | level {:.1}% (stale)",
                        s.tds_level, s.ph_level, s.water_level
                    );
                }
            }
            TelemetryEvent::Error => {
                if json {
                    println!("{}", serde_json::json!({ "state": "error" }));
                } else {
                    println!("quality data unavailable");
                }
            }
        }
    }
    Ok(())
}

/// Probe each subsystem once and report. Exits nonzero when anything the
/// current configuration requires is missing.
pub fn run_self_check(cfg: &Config, json: bool) -> Result<i32> {
    let (pump, mut source) = build_hardware(cfg);
    let pump_ok = pump.is_available();

    let sink: vendo_traits::PulseSink = Arc::new(|| {});
    let sensor_ok = match source.attach(sink) {
        Ok(()) => {
            source.detach();
            true
        }
        Err(e) => {
            tracing::warn!(error = %e, "flow sensor check failed");
            false
        }
    };

    let probe_ok = match build_probe(cfg) {
        Ok(mut probe) => probe
            .sample(Duration::from_millis(cfg.telemetry.sample_timeout_ms))
            .is_ok(),
        Err(_) => false,
    };

    let ok = pump_ok && sensor_ok;
    if json {
        println!(
            "{}",
            serde_json::json!({
                "pump": pump_ok,
                "flow_sensor": sensor_ok,
                "quality_probe": probe_ok,
                "ok": ok,
            })
        );
    } else {
        println!("pump:          {}", if pump_ok { "ok" } else { "FAIL" });
        println!("flow sensor:   {}", if sensor_ok { "ok" } else { "FAIL" });
        println!("quality probe: {}", if probe_ok { "ok" } else { "unreachable" });
    }
    Ok(if ok { 0 } else { 1 })
}

/// List purchasable sizes.
pub fn run_volumes(cfg: &Config, json: bool) -> Result<()> {
    let table = VolumeTable::from_entries(&cfg.effective_volumes());
    if json {
        let rows: Vec<_> = table
            .options()
            .iter()
            .map(|o| {
                serde_json::json!({
                    "name": o.name,
                    "label": o.label,
                    "milliliters": o.milliliters,
                    "price": o.price,
                    "target_pulses": o.target_pulses,
                })
            })
            .collect();
        println!("{}", serde_json::Value::Array(rows));
    } else {
        for o in table.options() {
            println!(
                "{:<10} {:>5} ml  {:>7}  ({} pulses)",
                o.name, o.milliliters, o.price, o.target_pulses
            );
        }
    }
    Ok(())
}
