#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Dispensing control core (hardware-agnostic).
//!
//! This crate owns the fill cycle of the vending kiosk. All hardware
//! interactions go through the `vendo_traits::Pump` and
//! `vendo_traits::PulseSource` traits; persistence goes through the
//! `Backend` trait so the core never links an HTTP client.
//!
//! ## Architecture
//!
//! - **VolumeTable**: static size -> (pulse target, price) lookup (`volume`)
//! - **PulseCounter**: lock-protected pulse accumulator (`pulse`)
//! - **DispenseController**: single-owner fill state machine (`controller`)
//! - **TelemetryReporter**: periodic quality polling (`telemetry`)
//! - **Backend**: sale/quality persistence seam (`backend`)

pub mod backend;
pub mod controller;
pub mod error;
pub mod mocks;
pub mod pulse;
pub mod telemetry;
pub mod volume;

pub use backend::{Backend, QualitySample, SaleRecord};
pub use controller::{DispenseController, FillEvent, FillSession, FillState};
pub use error::{AbortReason, DispenseError, Result};
pub use pulse::{PulseCounter, PulseOutcome};
pub use telemetry::{TelemetryCfg, TelemetryEvent, TelemetryReporter};
pub use volume::{VolumeOption, VolumeTable};
