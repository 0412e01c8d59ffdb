//! Static size table: name -> (pulse target, price, milliliters).

use crate::error::DispenseError;
use vendo_config::VolumeEntry;

/// One purchasable size. Immutable after load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeOption {
    pub name: String,
    pub target_pulses: u32,
    pub label: String,
    /// Unit price in the smallest currency denomination.
    pub price: u32,
    pub milliliters: u32,
}

impl From<&VolumeEntry> for VolumeOption {
    fn from(e: &VolumeEntry) -> Self {
        Self {
            name: e.name.clone(),
            target_pulses: e.target_pulses,
            label: e.label.clone(),
            price: e.price,
            milliliters: e.milliliters,
        }
    }
}

/// Pure lookup table; read-only after construction, so shared references can
/// be used across threads without synchronization.
#[derive(Debug, Clone)]
pub struct VolumeTable {
    options: Vec<VolumeOption>,
}

impl VolumeTable {
    /// Build from config entries. Callers validate uniqueness and nonzero
    /// targets via `Config::validate` before this point.
    pub fn from_entries(entries: &[VolumeEntry]) -> Self {
        Self {
            options: entries.iter().map(VolumeOption::from).collect(),
        }
    }

    /// Built-in five-size table.
    pub fn builtin() -> Self {
        Self::from_entries(&vendo_config::builtin_volumes())
    }

    pub fn lookup(&self, name: &str) -> Result<&VolumeOption, DispenseError> {
        self.options
            .iter()
            .find(|o| o.name == name)
            .ok_or_else(|| DispenseError::InvalidSize(name.to_string()))
    }

    pub fn options(&self) -> &[VolumeOption] {
        &self.options
    }
}
