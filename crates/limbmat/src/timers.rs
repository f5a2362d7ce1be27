//! Process-wide timing registry.
//!
//! The engine records wall-clock durations at well-known labels
//! (`gemm_reduced.multiplication`, `syrk_reduced.DoubletoGMP`, ...).
//! Durations are additive across calls, so a long solve accumulates the
//! total time spent in each phase. The registry is process-wide and
//! thread-safe; it is deliberately not part of the engine's own state so
//! that several engine instances share one profile.

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

static REGISTRY: Lazy<Mutex<HashMap<&'static str, Duration>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Add `elapsed` to the accumulated duration for `label`.
pub fn record(label: &'static str, elapsed: Duration) {
    let mut map = REGISTRY.lock().unwrap();
    *map.entry(label).or_default() += elapsed;
}

/// Accumulated duration for `label`, zero if never recorded.
pub fn get(label: &str) -> Duration {
    REGISTRY
        .lock()
        .unwrap()
        .get(label)
        .copied()
        .unwrap_or_default()
}

/// All labels with their accumulated durations, sorted by label.
pub fn snapshot() -> Vec<(&'static str, Duration)> {
    let map = REGISTRY.lock().unwrap();
    let mut entries: Vec<_> = map.iter().map(|(k, v)| (*k, *v)).collect();
    entries.sort_by_key(|(k, _)| *k);
    entries
}

/// Clear every accumulated duration.
pub fn reset() {
    REGISTRY.lock().unwrap().clear();
}

/// Run `f`, recording its wall-clock time under `label`.
pub fn time<R>(label: &'static str, f: impl FnOnce() -> R) -> R {
    let start = Instant::now();
    let out = f();
    record(label, start.elapsed());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_across_records() {
        reset();
        record("test.phase", Duration::from_millis(2));
        record("test.phase", Duration::from_millis(3));
        assert_eq!(get("test.phase"), Duration::from_millis(5));
    }

    #[test]
    fn time_records_label() {
        reset();
        let x = time("test.timed", || 41 + 1);
        assert_eq!(x, 42);
        assert!(snapshot().iter().any(|(l, _)| *l == "test.timed"));
    }
}
