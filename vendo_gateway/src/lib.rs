//! Backend HTTP gateway and the ESP32 water-quality probe.
//!
//! `BackendGateway` implements `vendo_core::Backend` over a small
//! `Transport` seam so the retry policy is testable without a server.
//! Transport-level failures (connect, timeout) are retried a fixed number
//! of times with a fixed delay; an HTTP response that arrives with a
//! non-2xx status is a backend verdict and is not retried.

use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use vendo_core::{Backend, QualitySample, SaleRecord};
use vendo_traits::{QualityProbe, QualityReading};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("transport error: {0}")]
    Other(String),
}

/// Delivery seam for the gateway: post a JSON body, return the HTTP status.
pub trait Transport: Send + Sync {
    fn post(&self, path: &str, body: &serde_json::Value) -> Result<u16, TransportError>;
}

/// `reqwest`-backed transport with a per-request timeout.
pub struct HttpTransport {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Other(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

impl Transport for HttpTransport {
    fn post(&self, path: &str, body: &serde_json::Value) -> Result<u16, TransportError> {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let response = self.client.post(&url).json(body).send().map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout
            } else if e.is_connect() {
                TransportError::Connect(e.to_string())
            } else {
                TransportError::Other(e.to_string())
            }
        })?;
        Ok(response.status().as_u16())
    }
}

/// Per-machine backend client with a fixed-delay retry policy.
pub struct BackendGateway<T: Transport> {
    transport: T,
    machine_id: String,
    attempts: u32,
    retry_delay: Duration,
}

impl BackendGateway<HttpTransport> {
    pub fn from_config(api: &vendo_config::Api) -> Result<Self, TransportError> {
        let transport = HttpTransport::new(&api.base_url, Duration::from_millis(api.timeout_ms))?;
        Ok(Self::new(
            transport,
            &api.machine_id,
            api.retry_attempts,
            Duration::from_millis(api.retry_delay_ms),
        ))
    }
}

impl<T: Transport> BackendGateway<T> {
    pub fn new(transport: T, machine_id: &str, attempts: u32, retry_delay: Duration) -> Self {
        Self {
            transport,
            machine_id: machine_id.to_string(),
            attempts: attempts.max(1),
            retry_delay,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn submit(&self, endpoint: &str, body: &serde_json::Value) -> bool {
        let path = format!("machines/{}/{endpoint}/", self.machine_id);
        for attempt in 1..=self.attempts {
            match self.transport.post(&path, body) {
                Ok(status) if (200..300).contains(&status) => {
                    tracing::debug!(%path, status, "backend accepted");
                    return true;
                }
                Ok(status) => {
                    // The backend answered and said no. Retrying would not
                    // change the verdict and risks duplicate records.
                    tracing::warn!(%path, status, "backend rejected");
                    return false;
                }
                Err(e) => {
                    tracing::warn!(%path, attempt, error = %e, "backend unreachable");
                    if attempt < self.attempts {
                        std::thread::sleep(self.retry_delay);
                    }
                }
            }
        }
        tracing::error!(%path, attempts = self.attempts, "backend submission gave up");
        false
    }
}

impl<T: Transport> Backend for BackendGateway<T> {
    fn record_sale(&self, record: &SaleRecord) -> bool {
        self.submit(
            "record_sale",
            &serde_json::json!({
                "volume": record.volume_ml,
                "price": record.price,
            }),
        )
    }

    fn record_quality(&self, sample: &QualitySample) -> bool {
        self.submit(
            "record_quality",
            &serde_json::json!({
                "tds_level": sample.tds_level,
                "ph_level": sample.ph_level,
                "water_level": sample.water_level,
            }),
        )
    }
}

#[derive(Debug, Deserialize)]
struct Esp32Payload {
    #[serde(default)]
    tds: f64,
    #[serde(default = "default_ph")]
    ph: f64,
    #[serde(default)]
    water_level: f64,
}

fn default_ph() -> f64 {
    7.0
}

/// Quality probe backed by the ESP32 sensor board's HTTP endpoint.
///
/// The board serves `GET /data` with `{tds, ph, water_level}`; absent
/// fields fall back to neutral values rather than failing the sample.
pub struct Esp32Probe {
    client: reqwest::blocking::Client,
    url: String,
}

impl Esp32Probe {
    pub fn new(ip: &str, port: u16) -> Result<Self, TransportError> {
        let client = reqwest::blocking::Client::builder()
            .build()
            .map_err(|e| TransportError::Other(e.to_string()))?;
        Ok(Self {
            client,
            url: format!("http://{ip}:{port}/data"),
        })
    }
}

impl QualityProbe for Esp32Probe {
    fn sample(
        &mut self,
        timeout: Duration,
    ) -> Result<QualityReading, Box<dyn std::error::Error + Send + Sync>> {
        let response = self.client.get(&self.url).timeout(timeout).send()?;
        if !response.status().is_success() {
            return Err(format!("sensor board returned {}", response.status()).into());
        }
        let payload: Esp32Payload = response.json()?;
        Ok(QualityReading {
            tds: payload.tds,
            ph: payload.ph,
            water_level: payload.water_level,
        })
    }
}
