//! Thread-safe pulse accumulator.
//!
//! `on_pulse` is called from the pulse source's execution context (GPIO
//! interrupt thread or simulation loop) while the controller reads progress
//! from its own context, so every read-modify-write happens under the inner
//! mutex. The returned outcome is a snapshot; publication happens outside
//! the lock.

use crate::error::DispenseError;
use std::sync::{Arc, Mutex};

/// Result of registering one pulse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PulseOutcome {
    /// Counter not armed (fill already complete or aborted); pulse dropped.
    Ignored,
    /// Still below target; carries progress in [0, 100].
    Progress(u8),
    /// Target reached. Fires exactly once per arming; the counter disarms
    /// itself before returning this.
    Complete { pulses: u32 },
}

#[derive(Debug, Default)]
struct Inner {
    count: u32,
    target: u32,
    armed: bool,
}

/// Cloneable handle to a shared pulse count. Clones observe the same state.
#[derive(Debug, Clone, Default)]
pub struct PulseCounter {
    inner: Arc<Mutex<Inner>>,
}

impl PulseCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear the count, record `target`, and arm. Arming an armed counter is
    /// an invariant violation, not a silent reset.
    pub fn reset(&self, target: u32) -> Result<(), DispenseError> {
        if target == 0 {
            return Err(DispenseError::State("pulse target must be > 0".into()));
        }
        let mut inner = self.lock();
        if inner.armed {
            return Err(DispenseError::AlreadyArmed);
        }
        inner.count = 0;
        inner.target = target;
        inner.armed = true;
        Ok(())
    }

    /// Disarm without completing. Idempotent; used on abort.
    pub fn disarm(&self) {
        self.lock().armed = false;
    }

    /// Register one pulse. Safe to call concurrently; increments by exactly
    /// one per call.
    pub fn on_pulse(&self) -> PulseOutcome {
        let mut inner = self.lock();
        if !inner.armed {
            return PulseOutcome::Ignored;
        }
        inner.count += 1;
        if inner.count >= inner.target {
            inner.armed = false;
            return PulseOutcome::Complete {
                pulses: inner.count,
            };
        }
        let progress = (inner.count as u64 * 100 / inner.target as u64).min(100) as u8;
        PulseOutcome::Progress(progress)
    }

    pub fn count(&self) -> u32 {
        self.lock().count
    }

    pub fn target(&self) -> u32 {
        self.lock().target
    }

    pub fn is_armed(&self) -> bool {
        self.lock().armed
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock means a pulse handler panicked; the count is a
        // plain integer, so continuing with it is sound.
        match self.inner.lock() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        }
    }
}
