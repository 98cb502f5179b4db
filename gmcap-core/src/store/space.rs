//! Locally tracked drive space approximation.
//!
//! The remote store is never queried for usage; the estimate grows with
//! each confirmed upload and resets when the process restarts.

use std::sync::Mutex;

use serde::Serialize;

const BYTES_PER_GB: f64 = (1u64 << 30) as f64;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DriveSpace {
    pub used_gb: f64,
    pub total_gb: f64,
    pub free_gb: f64,
    pub percentage: f64,
}

#[derive(Debug)]
pub struct SpaceTracker {
    inner: Mutex<DriveSpace>,
}

impl SpaceTracker {
    pub fn new(total_gb: f64) -> Self {
        Self {
            inner: Mutex::new(DriveSpace {
                used_gb: 0.0,
                total_gb,
                free_gb: total_gb,
                percentage: 0.0,
            }),
        }
    }

    /// Account for a confirmed upload of `bytes`.
    pub fn record_upload(&self, bytes: u64) {
        let mut space = self.inner.lock().unwrap();
        let gb = bytes as f64 / BYTES_PER_GB;
        space.used_gb = round2(space.used_gb + gb);
        space.free_gb = round2(space.total_gb - space.used_gb);
        if space.total_gb > 0.0 {
            space.percentage = round2(space.used_gb / space.total_gb * 100.0);
        }
    }

    pub fn snapshot(&self) -> DriveSpace {
        self.inner.lock().unwrap().clone()
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uploads_accumulate_and_round() {
        let tracker = SpaceTracker::new(15.0);
        tracker.record_upload(1u64 << 30);
        tracker.record_upload(1u64 << 29);
        let space = tracker.snapshot();
        assert_eq!(space.used_gb, 1.5);
        assert_eq!(space.free_gb, 13.5);
        assert_eq!(space.percentage, 10.0);
    }

    #[test]
    fn zero_total_never_divides() {
        let tracker = SpaceTracker::new(0.0);
        tracker.record_upload(1024);
        assert_eq!(tracker.snapshot().percentage, 0.0);
    }
}
