use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime};

use vendo_core::{Backend, QualitySample, SaleRecord};
use vendo_gateway::{BackendGateway, Transport, TransportError};

/// Transport that replays a fixed script of outcomes and records every call.
struct ScriptedTransport {
    script: Mutex<Vec<Result<u16, TransportError>>>,
    calls: Mutex<Vec<(String, serde_json::Value)>>,
}

impl ScriptedTransport {
    fn new(script: Vec<Result<u16, TransportError>>) -> Self {
        let mut script = script;
        script.reverse();
        Self {
            script: Mutex::new(script),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl Transport for ScriptedTransport {
    fn post(&self, path: &str, body: &serde_json::Value) -> Result<u16, TransportError> {
        self.calls
            .lock()
            .unwrap()
            .push((path.to_string(), body.clone()));
        self.script
            .lock()
            .unwrap()
            .pop()
            .unwrap_or(Err(TransportError::Timeout))
    }
}

fn sale() -> SaleRecord {
    SaleRecord {
        volume_ml: 350,
        price: 5_000,
        recorded_at: SystemTime::now(),
    }
}

fn gateway(script: Vec<Result<u16, TransportError>>, delay: Duration) -> BackendGateway<ScriptedTransport> {
    BackendGateway::new(ScriptedTransport::new(script), "VM001", 3, delay)
}

#[test]
fn sale_posts_to_the_machine_endpoint_with_volume_and_price() {
    let gw = gateway(vec![Ok(201)], Duration::ZERO);
    assert!(gw.record_sale(&sale()));
    let calls = gw.transport().calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "machines/VM001/record_sale/");
    assert_eq!(calls[0].1["volume"], 350);
    assert_eq!(calls[0].1["price"], 5_000);
}

#[test]
fn transport_failures_are_retried_with_a_fixed_delay() {
    let delay = Duration::from_millis(40);
    let gw = gateway(
        vec![
            Err(TransportError::Timeout),
            Err(TransportError::Connect("refused".into())),
            Ok(200),
        ],
        delay,
    );
    let begun = Instant::now();
    assert!(gw.record_sale(&sale()));
    assert!(begun.elapsed() >= delay * 2, "retries skipped the delay");
    assert_eq!(gw.transport().calls.lock().unwrap().len(), 3);
}

#[test]
fn exhausted_retries_report_failure() {
    let gw = gateway(
        vec![
            Err(TransportError::Timeout),
            Err(TransportError::Timeout),
            Err(TransportError::Timeout),
        ],
        Duration::ZERO,
    );
    assert!(!gw.record_sale(&sale()));
    assert_eq!(gw.transport().calls.lock().unwrap().len(), 3);
}

#[test]
fn rejection_status_is_not_retried() {
    let gw = gateway(vec![Ok(404)], Duration::ZERO);
    assert!(!gw.record_sale(&sale()));
    assert_eq!(
        gw.transport().calls.lock().unwrap().len(),
        1,
        "non-2xx must not be retried"
    );
}

#[test]
fn quality_posts_all_three_readings() {
    let gw = gateway(vec![Ok(200)], Duration::ZERO);
    let ok = gw.record_quality(&QualitySample {
        tds_level: 142.0,
        ph_level: 7.2,
        water_level: 81.0,
        taken_at: SystemTime::now(),
    });
    assert!(ok);
    let calls = gw.transport().calls.lock().unwrap().clone();
    assert_eq!(calls[0].0, "machines/VM001/record_quality/");
    assert_eq!(calls[0].1["tds_level"], 142.0);
    assert_eq!(calls[0].1["ph_level"], 7.2);
    assert_eq!(calls[0].1["water_level"], 81.0);
}
