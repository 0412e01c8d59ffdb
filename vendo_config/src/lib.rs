#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schemas for the vending kiosk.
//!
//! One `Config` is deserialized from TOML at process start, validated, and
//! passed by reference into every component. There is no global config
//! holder.
use serde::Deserialize;

/// Backend API parameters: base URL, machine identity, and the retry budget
/// applied to every outbound call.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Api {
    pub base_url: String,
    pub machine_id: String,
    /// Per-request timeout (ms). Bounds each HTTP attempt.
    pub timeout_ms: u64,
    /// Attempts per call, including the first one.
    pub retry_attempts: u32,
    /// Fixed delay between attempts (ms).
    pub retry_delay_ms: u64,
}

impl Default for Api {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".into(),
            machine_id: "VM001".into(),
            timeout_ms: 5_000,
            retry_attempts: 3,
            retry_delay_ms: 1_000,
        }
    }
}

/// Hardware wiring. Read-only after load; selects the simulated or real GPIO
/// variants once at construction.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Hardware {
    /// Force simulation even when built with GPIO support.
    pub simulated: bool,
    pub flow_sensor_pin: u8,
    pub motor_pin: u8,
    pub esp32_ip: String,
    pub esp32_port: u16,
}

impl Default for Hardware {
    fn default() -> Self {
        Self {
            simulated: false,
            flow_sensor_pin: 20,
            motor_pin: 21,
            esp32_ip: "192.168.137.82".into(),
            esp32_port: 80,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Telemetry {
    /// Interval between quality polls (ms).
    pub poll_interval_ms: u64,
    /// How long a last-known-good sample may be republished as stale before
    /// the reporter switches to an explicit error state. 0 means never
    /// expire (reference behavior).
    pub stale_after_ms: u64,
    /// Per-sample probe timeout (ms).
    pub sample_timeout_ms: u64,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2_000,
            stale_after_ms: 60_000,
            sample_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Fill {
    /// Simulated flow sensor cadence (pulses per second).
    pub sim_pulse_hz: u32,
    /// Hard cap on a single fill duration (ms). A fill that has not reached
    /// its target by then is aborted.
    pub max_fill_ms: u64,
}

impl Default for Fill {
    fn default() -> Self {
        Self {
            sim_pulse_hz: 100,
            max_fill_ms: 180_000,
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

/// One purchasable size.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct VolumeEntry {
    pub name: String,
    pub target_pulses: u32,
    pub label: String,
    /// Unit price in the smallest currency denomination (rupiah).
    pub price: u32,
    pub milliliters: u32,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct Config {
    pub api: Api,
    pub hardware: Hardware,
    pub telemetry: Telemetry,
    pub fill: Fill,
    pub logging: Logging,
    /// Purchasable sizes. Empty means use the built-in table.
    pub volumes: Vec<VolumeEntry>,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

/// Built-in size table, used when the config carries no `[[volumes]]`.
pub fn builtin_volumes() -> Vec<VolumeEntry> {
    [
        ("100 ml", 108, 3_000, 100),
        ("350 ml", 378, 5_000, 350),
        ("600 ml", 670, 7_000, 600),
        ("1 Liter", 1_080, 15_000, 1_000),
        ("1.5 Liter", 1_620, 20_000, 1_500),
    ]
    .into_iter()
    .map(|(name, target_pulses, price, milliliters)| VolumeEntry {
        name: name.to_string(),
        target_pulses,
        label: name.to_string(),
        price,
        milliliters,
    })
    .collect()
}

impl Config {
    /// Effective volume table: configured entries, or the built-in table.
    pub fn effective_volumes(&self) -> Vec<VolumeEntry> {
        if self.volumes.is_empty() {
            builtin_volumes()
        } else {
            self.volumes.clone()
        }
    }

    pub fn validate(&self) -> eyre::Result<()> {
        // API
        if self.api.base_url.is_empty() {
            eyre::bail!("api.base_url must not be empty");
        }
        if self.api.machine_id.is_empty() {
            eyre::bail!("api.machine_id must not be empty");
        }
        if self.api.timeout_ms == 0 {
            eyre::bail!("api.timeout_ms must be >= 1");
        }
        if self.api.retry_attempts == 0 {
            eyre::bail!("api.retry_attempts must be >= 1");
        }

        // Telemetry
        if self.telemetry.poll_interval_ms == 0 {
            eyre::bail!("telemetry.poll_interval_ms must be >= 1");
        }
        if self.telemetry.sample_timeout_ms == 0 {
            eyre::bail!("telemetry.sample_timeout_ms must be >= 1");
        }

        // Fill
        if self.fill.sim_pulse_hz == 0 || self.fill.sim_pulse_hz > 10_000 {
            eyre::bail!("fill.sim_pulse_hz must be in [1, 10000]");
        }
        if self.fill.max_fill_ms == 0 {
            eyre::bail!("fill.max_fill_ms must be >= 1");
        }
        if self.fill.max_fill_ms > 60 * 60 * 1000 {
            eyre::bail!("fill.max_fill_ms is unreasonably large (>1h)");
        }

        // Volumes
        let volumes = self.effective_volumes();
        let mut seen = std::collections::HashSet::new();
        for v in &volumes {
            if v.name.is_empty() {
                eyre::bail!("volume name must not be empty");
            }
            if v.target_pulses == 0 {
                eyre::bail!("volume {:?}: target_pulses must be > 0", v.name);
            }
            if v.milliliters == 0 {
                eyre::bail!("volume {:?}: milliliters must be > 0", v.name);
            }
            if !seen.insert(v.name.clone()) {
                eyre::bail!("duplicate volume name {:?}", v.name);
            }
        }

        // Logging rotation is validated where the subscriber is installed.

        Ok(())
    }
}
