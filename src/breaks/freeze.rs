use std::collections::HashMap;

use crate::db::AvailabilityReading;

/// Unchanged ticks (after the first reading) before counters count as frozen.
pub const FREEZE_THRESHOLD: u32 = 3;

/// The slice of an availability reading that break detection looks at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AvailabilitySnapshot {
    pub unit_id: u32,
    pub availability_percent: f64,
    pub fault_secs: f64,
}

impl From<&AvailabilityReading> for AvailabilitySnapshot {
    fn from(reading: &AvailabilityReading) -> Self {
        Self {
            unit_id: reading.unit_id,
            availability_percent: reading.availability_percent,
            fault_secs: reading.fault_secs,
        }
    }
}

/// Availability rounded to 4 places and fault time to 3, kept as scaled
/// integers so equality is exact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FreezeKey {
    availability: i64,
    fault: i64,
}

impl FreezeKey {
    fn of(snapshot: &AvailabilitySnapshot) -> Self {
        Self {
            availability: (snapshot.availability_percent * 10_000.0).round() as i64,
            fault: (snapshot.fault_secs * 1_000.0).round() as i64,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FreezeTracker {
    previous: Option<FreezeKey>,
    consecutive: u32,
}

impl FreezeTracker {
    /// Feeds one reading and returns the run of unchanged ticks so far.
    pub fn observe(&mut self, snapshot: &AvailabilitySnapshot) -> u32 {
        let key = FreezeKey::of(snapshot);
        if self.previous == Some(key) {
            self.consecutive = self.consecutive.saturating_add(1);
        } else {
            self.previous = Some(key);
            self.consecutive = 0;
        }
        self.consecutive
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }

    pub fn is_frozen(&self) -> bool {
        self.consecutive >= FREEZE_THRESHOLD
    }
}

/// Which unit(s) decide whether the line is frozen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceStrategy {
    /// First snapshot of each batch.
    FirstTracked,
    /// A fixed unit. Ticks without a reading for it leave the status unchanged.
    Unit(u32),
    /// Frozen once more than half of the reporting units are frozen.
    Quorum,
}

#[derive(Debug, Clone)]
pub struct FreezeDetector {
    strategy: ReferenceStrategy,
    trackers: HashMap<u32, FreezeTracker>,
    frozen: bool,
}

impl FreezeDetector {
    pub fn new(strategy: ReferenceStrategy) -> Self {
        Self {
            strategy,
            trackers: HashMap::new(),
            frozen: false,
        }
    }

    pub fn strategy(&self) -> ReferenceStrategy {
        self.strategy
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn tracker(&self, unit_id: u32) -> Option<&FreezeTracker> {
        self.trackers.get(&unit_id)
    }

    fn observe_unit(&mut self, snapshot: &AvailabilitySnapshot) -> bool {
        let tracker = self.trackers.entry(snapshot.unit_id).or_default();
        tracker.observe(snapshot);
        tracker.is_frozen()
    }

    /// Updates the trackers with one tick of readings and returns the frozen
    /// status of the line.
    pub fn observe(&mut self, snapshots: &[AvailabilitySnapshot]) -> bool {
        let strategy = self.strategy;
        let frozen = match strategy {
            ReferenceStrategy::FirstTracked => snapshots
                .first()
                .map(|snapshot| self.observe_unit(snapshot)),
            ReferenceStrategy::Unit(unit_id) => snapshots
                .iter()
                .find(|snapshot| snapshot.unit_id == unit_id)
                .map(|snapshot| self.observe_unit(snapshot)),
            ReferenceStrategy::Quorum => {
                if snapshots.is_empty() {
                    None
                } else {
                    let frozen_units = snapshots
                        .iter()
                        .filter(|snapshot| self.observe_unit(snapshot))
                        .count();
                    Some(frozen_units * 2 > snapshots.len())
                }
            }
        };

        if let Some(frozen) = frozen {
            self.frozen = frozen;
        }
        self.frozen
    }
}
