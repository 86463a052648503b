use std::{collections::HashMap, sync::Arc};

use tokio::task::JoinSet;

use crate::{
    config::NodeTemplates,
    connection::SessionHandle,
    db::{AvailabilityReading, CycleTimeReading, QualityCounters},
    error::SessionError,
    session::FieldId,
    shifts::ShiftSlot,
};

const ENABLE_LOGS: bool = true;

use crate::log_error;

const MILLIS_PER_SEC: f64 = 1000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldGroup {
    CycleTime,
    Availability,
    Quality,
}

impl FieldGroup {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldGroup::CycleTime => "cycle time",
            FieldGroup::Availability => "availability",
            FieldGroup::Quality => "quality counters",
        }
    }
}

/// One failed field-group read. The rest of the tick is unaffected.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadFault {
    pub group: FieldGroup,
    pub unit_id: Option<u32>,
    pub error: SessionError,
}

impl ReadFault {
    /// Stable key for log throttling.
    pub fn key(&self) -> String {
        match self.unit_id {
            Some(unit_id) => format!("{}:{unit_id}", self.group.as_str()),
            None => self.group.as_str().to_string(),
        }
    }

    pub fn is_transport(&self) -> bool {
        !self.error.is_security()
    }
}

/// Everything read during one tick, in tracked-unit order.
#[derive(Debug, Default)]
pub struct TickReadings {
    pub cycles: Vec<CycleTimeReading>,
    pub availability: Vec<AvailabilityReading>,
    pub quality: Option<QualityCounters>,
    pub faults: Vec<ReadFault>,
}

/// Substitutes `{unit}`, `{shift}` and `{hour}` in a field id template.
pub fn render_field(template: &str, unit_id: u32, shift_number: u8, hour_index: u8) -> FieldId {
    FieldId::new(
        template
            .replace("{unit}", &unit_id.to_string())
            .replace("{shift}", &shift_number.to_string())
            .replace("{hour}", &hour_index.to_string()),
    )
}

struct UnitResult {
    unit_id: u32,
    cycle: Result<Option<CycleTimeReading>, SessionError>,
    availability: Result<AvailabilityReading, SessionError>,
}

#[derive(Clone)]
pub struct FieldReader {
    nodes: Arc<NodeTemplates>,
    target_cycle_secs: f64,
}

impl FieldReader {
    pub fn new(nodes: NodeTemplates, target_cycle_secs: f64) -> Self {
        Self {
            nodes: Arc::new(nodes),
            target_cycle_secs,
        }
    }

    fn unit_field(&self, template: &str, unit_id: u32) -> FieldId {
        render_field(template, unit_id, 0, 0)
    }

    /// `None` when the controller has no completed cycle to report.
    async fn read_cycle(
        &self,
        handle: &SessionHandle,
        unit_id: u32,
    ) -> Result<Option<CycleTimeReading>, SessionError> {
        let last = handle
            .read(&self.unit_field(&self.nodes.cycle_last, unit_id))
            .await?
            .as_f64();
        if last <= 0.0 {
            return Ok(None);
        }

        let desired_cycle_secs = match handle
            .read(&self.unit_field(&self.nodes.cycle_desired, unit_id))
            .await
        {
            Ok(value) if value.as_f64() > 0.0 => value.as_f64() / MILLIS_PER_SEC,
            _ => self.target_cycle_secs,
        };

        Ok(Some(CycleTimeReading {
            unit_id,
            cycle_time_secs: last / MILLIS_PER_SEC,
            desired_cycle_secs,
        }))
    }

    async fn read_availability(
        &self,
        handle: &SessionHandle,
        unit_id: u32,
    ) -> Result<AvailabilityReading, SessionError> {
        let nodes = &self.nodes;
        let availability_percent = handle
            .read(&self.unit_field(&nodes.availability_percent, unit_id))
            .await?
            .as_f64();
        let fault_ms = handle
            .read(&self.unit_field(&nodes.fault_time, unit_id))
            .await?
            .as_f64();
        let blocked_ms = handle
            .read(&self.unit_field(&nodes.blocked_time, unit_id))
            .await?
            .as_f64();
        let starved_ms = handle
            .read(&self.unit_field(&nodes.starved_time, unit_id))
            .await?
            .as_f64();

        Ok(AvailabilityReading {
            unit_id,
            availability_percent,
            fault_secs: fault_ms / MILLIS_PER_SEC,
            blocked_secs: blocked_ms / MILLIS_PER_SEC,
            starved_secs: starved_ms / MILLIS_PER_SEC,
        })
    }

    /// Line-wide counters for the slot's shift and hour.
    async fn read_quality(
        &self,
        handle: &SessionHandle,
        slot: &ShiftSlot,
    ) -> Result<QualityCounters, SessionError> {
        let field = |template: &str| render_field(template, 0, slot.shift_number, slot.hour_index);
        let good = handle.read(&field(&self.nodes.quality_good)).await?.as_i64();
        let reject = handle.read(&field(&self.nodes.quality_reject)).await?.as_i64();
        let rework = handle.read(&field(&self.nodes.quality_rework)).await?.as_i64();

        Ok(QualityCounters {
            service_date: slot.service_date,
            shift_number: slot.shift_number,
            hour_index: slot.hour_index,
            good,
            reject,
            rework,
        })
    }

    /// Reads every unit concurrently, then the quality counters. Failed
    /// groups are reported in `faults` and left out of the results.
    pub async fn read_tick(
        &self,
        handle: &SessionHandle,
        units: &[u32],
        slot: &ShiftSlot,
    ) -> TickReadings {
        let mut tasks = JoinSet::new();
        for &unit_id in units {
            let reader = self.clone();
            let handle = handle.clone();
            tasks.spawn(async move {
                let cycle = reader.read_cycle(&handle, unit_id).await;
                let availability = reader.read_availability(&handle, unit_id).await;
                UnitResult {
                    unit_id,
                    cycle,
                    availability,
                }
            });
        }

        let mut results = Vec::with_capacity(units.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(err) => log_error!("Unit read task failed: {err}"),
            }
        }

        let order: HashMap<u32, usize> = units
            .iter()
            .enumerate()
            .map(|(index, unit_id)| (*unit_id, index))
            .collect();
        results.sort_by_key(|result| order.get(&result.unit_id).copied().unwrap_or(usize::MAX));

        let mut readings = TickReadings::default();
        for result in results {
            match result.cycle {
                Ok(Some(cycle)) => readings.cycles.push(cycle),
                Ok(None) => {}
                Err(error) => readings.faults.push(ReadFault {
                    group: FieldGroup::CycleTime,
                    unit_id: Some(result.unit_id),
                    error,
                }),
            }
            match result.availability {
                Ok(availability) => readings.availability.push(availability),
                Err(error) => readings.faults.push(ReadFault {
                    group: FieldGroup::Availability,
                    unit_id: Some(result.unit_id),
                    error,
                }),
            }
        }

        match self.read_quality(handle, slot).await {
            Ok(quality) => readings.quality = Some(quality),
            Err(error) => readings.faults.push(ReadFault {
                group: FieldGroup::Quality,
                unit_id: None,
                error,
            }),
        }

        readings
    }
}
