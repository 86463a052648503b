use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CycleTimeReading {
    pub unit_id: u32,
    pub cycle_time_secs: f64,
    pub desired_cycle_secs: f64,
}

impl CycleTimeReading {
    pub fn deviation_secs(&self) -> f64 {
        self.cycle_time_secs - self.desired_cycle_secs
    }

    pub fn deviation_percent(&self) -> f64 {
        if self.desired_cycle_secs > 0.0 {
            self.deviation_secs() / self.desired_cycle_secs * 100.0
        } else {
            0.0
        }
    }
}

/// Availability and downtime breakdown for the current hour of one unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityReading {
    pub unit_id: u32,
    pub availability_percent: f64,
    pub fault_secs: f64,
    pub blocked_secs: f64,
    pub starved_secs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QualityCounters {
    pub service_date: NaiveDate,
    pub shift_number: u8,
    pub hour_index: u8,
    pub good: i64,
    pub reject: i64,
    pub rework: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deviation_is_relative_to_desired_cycle() {
        let reading = CycleTimeReading {
            unit_id: 10,
            cycle_time_secs: 18.7,
            desired_cycle_secs: 17.0,
        };
        assert!((reading.deviation_secs() - 1.7).abs() < 1e-9);
        assert!((reading.deviation_percent() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn zero_desired_cycle_has_no_percentage() {
        let reading = CycleTimeReading {
            unit_id: 10,
            cycle_time_secs: 18.0,
            desired_cycle_secs: 0.0,
        };
        assert_eq!(reading.deviation_percent(), 0.0);
    }
}
