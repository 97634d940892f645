//! Engine-wide counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct EngineStats {
    compilations: AtomicU64,
    relinks: AtomicU64,
    deoptimizations: AtomicU64,
    one_shot_calls: AtomicU64,
    guard_failures: AtomicU64,
}

impl EngineStats {
    pub fn record_compilation(&self) {
        self.compilations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_relink(&self) {
        self.relinks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_deoptimization(&self) {
        self.deoptimizations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_one_shot(&self) {
        self.one_shot_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_guard_failure(&self) {
        self.guard_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            compilations: self.compilations.load(Ordering::Relaxed),
            relinks: self.relinks.load(Ordering::Relaxed),
            deoptimizations: self.deoptimizations.load(Ordering::Relaxed),
            one_shot_calls: self.one_shot_calls.load(Ordering::Relaxed),
            guard_failures: self.guard_failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`EngineStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub compilations: u64,
    pub relinks: u64,
    pub deoptimizations: u64,
    pub one_shot_calls: u64,
    pub guard_failures: u64,
}

impl StatsSnapshot {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
