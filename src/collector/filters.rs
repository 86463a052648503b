use std::collections::HashSet;

use crate::{config::MachineConfig, db::CycleTimeReading};

/// Drops cycle readings that are not real cycles: non-positive values and
/// the short pass-through readings of synchronised paired stations.
#[derive(Debug, Clone)]
pub struct CycleFilter {
    paired_units: HashSet<u32>,
    pass_through_threshold_secs: f64,
}

impl CycleFilter {
    pub fn new(paired_units: impl IntoIterator<Item = u32>, pass_through_threshold_secs: f64) -> Self {
        Self {
            paired_units: paired_units.into_iter().collect(),
            pass_through_threshold_secs,
        }
    }

    pub fn from_config(machine: &MachineConfig) -> Self {
        Self::new(
            machine.paired_units.iter().copied(),
            machine.pass_through_threshold_secs,
        )
    }

    pub fn keep(&self, reading: &CycleTimeReading) -> bool {
        if reading.cycle_time_secs <= 0.0 {
            return false;
        }
        !(self.paired_units.contains(&reading.unit_id)
            && reading.cycle_time_secs < self.pass_through_threshold_secs)
    }

    /// Returns the kept readings and how many were dropped.
    pub fn apply(&self, readings: Vec<CycleTimeReading>) -> (Vec<CycleTimeReading>, usize) {
        let total = readings.len();
        let kept: Vec<CycleTimeReading> = readings
            .into_iter()
            .filter(|reading| self.keep(reading))
            .collect();
        let dropped = total - kept.len();
        (kept, dropped)
    }
}
