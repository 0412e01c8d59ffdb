//! Backend seam and the record types handed across it.
//!
//! The core never links an HTTP client; `vendo_gateway` provides the real
//! implementation and tests use `mocks::RecordingBackend`.

use std::time::SystemTime;

/// One completed sale. Produced exactly once per completed fill, never
/// mutated afterwards. The backend timestamps it server-side on receipt;
/// `recorded_at` exists for local logs.
#[derive(Debug, Clone, PartialEq)]
pub struct SaleRecord {
    pub volume_ml: u32,
    pub price: u32,
    pub recorded_at: SystemTime,
}

/// One water-quality poll result.
#[derive(Debug, Clone, PartialEq)]
pub struct QualitySample {
    pub tds_level: f64,
    pub ph_level: f64,
    /// Tank level percentage.
    pub water_level: f64,
    pub taken_at: SystemTime,
}

/// Fire-and-report persistence of sales and quality samples. Implementations
/// own their retry budget and must return within a bounded time; `false`
/// means the call was not persisted after exhausting that budget.
pub trait Backend: Send + Sync {
    fn record_sale(&self, record: &SaleRecord) -> bool;
    fn record_quality(&self, sample: &QualitySample) -> bool;
}
