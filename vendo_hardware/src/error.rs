use thiserror::Error;

/// Hardware access errors for the kiosk's GPIO peripherals.
#[derive(Debug, Error)]
pub enum HwError {
    #[error("gpio unavailable: {0}")]
    Gpio(String),
    #[error("pin {pin} could not be claimed: {reason}")]
    Pin { pin: u8, reason: String },
    #[error("interrupt registration failed: {0}")]
    Interrupt(String),
}
