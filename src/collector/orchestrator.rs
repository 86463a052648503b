use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use super::{
    filters::CycleFilter,
    loop_worker::collection_loop,
    readings::{FieldReader, TickReadings},
};
use crate::{
    breaks::{AvailabilitySnapshot, BreakStateMachine, BreakTransition},
    config::{MachineConfig, NodeTemplates},
    connection::{ConnectNotice, ConnectionObserver, HandleSource},
    db::Database,
    utils::{suppressed_suffix, FaultThrottle},
};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

/// What one tick did.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TickSummary {
    /// No live session; nothing was read.
    pub skipped: bool,
    pub cycles_stored: usize,
    pub cycles_filtered: usize,
    /// Cycle persistence was suppressed by a scheduled break window.
    pub cycles_suppressed: bool,
    pub availability_stored: usize,
    pub quality_stored: bool,
    pub read_faults: usize,
    pub transition: Option<BreakTransition>,
}

/// One polling pass: acquire, read, filter, persist, detect breaks.
pub struct CollectionOrchestrator {
    store: Database,
    handles: HandleSource,
    breaks: BreakStateMachine,
    reader: FieldReader,
    filter: CycleFilter,
    tracked_units: Vec<u32>,
    throttle: FaultThrottle,
}

impl CollectionOrchestrator {
    pub fn new(
        store: Database,
        handles: HandleSource,
        breaks: BreakStateMachine,
        machine: &MachineConfig,
        nodes: NodeTemplates,
    ) -> Self {
        Self {
            store,
            handles,
            breaks,
            reader: FieldReader::new(nodes, machine.target_cycle_time_secs),
            filter: CycleFilter::from_config(machine),
            tracked_units: machine.tracked_units.clone(),
            throttle: FaultThrottle::default(),
        }
    }

    pub fn breaks(&self) -> &BreakStateMachine {
        &self.breaks
    }

    pub fn breaks_mut(&mut self) -> &mut BreakStateMachine {
        &mut self.breaks
    }

    fn warn_throttled(&mut self, key: &str, message: String) {
        if let Some(suppressed) = self.throttle.check(key) {
            log_warn!("{message}{}", suppressed_suffix(suppressed));
        }
    }

    fn error_throttled(&mut self, key: &str, message: String) {
        if let Some(suppressed) = self.throttle.check(key) {
            log_error!("{message}{}", suppressed_suffix(suppressed));
        }
    }

    /// Reloads the break schedule when the service date has moved on.
    async fn ensure_schedule(&mut self, now: NaiveDateTime) {
        let service_date = self.breaks.calendar().service_date(now);
        if self.breaks.schedule().service_date() == Some(service_date) {
            return;
        }
        match self.breaks.load_schedule(service_date).await {
            Ok(_) => self.throttle.clear("schedule"),
            Err(err) => self.error_throttled(
                "schedule",
                format!("Break schedule reload for {service_date} failed: {err:?}"),
            ),
        }
    }

    pub async fn collect_once(&mut self, now: NaiveDateTime) -> TickSummary {
        self.ensure_schedule(now).await;

        let Some(handle) = self.handles.acquire_handle() else {
            log_debug!("No live session ({}); skipping reads", self.handles.state());
            return TickSummary {
                skipped: true,
                ..TickSummary::default()
            };
        };

        let slot = self.breaks.calendar().locate(now);
        let TickReadings {
            cycles,
            availability,
            quality,
            faults,
        } = self
            .reader
            .read_tick(&handle, &self.tracked_units, &slot)
            .await;

        let mut summary = TickSummary {
            read_faults: faults.len(),
            ..TickSummary::default()
        };

        if faults.iter().any(|fault| fault.is_transport()) {
            self.handles.report_fault();
        }
        for fault in &faults {
            let message = match fault.unit_id {
                Some(unit_id) => format!(
                    "Could not read {} for unit {unit_id}: {}",
                    fault.group.as_str(),
                    fault.error
                ),
                None => format!("Could not read {}: {}", fault.group.as_str(), fault.error),
            };
            self.warn_throttled(&fault.key(), message);
        }

        let (cycles, filtered) = self.filter.apply(cycles);
        summary.cycles_filtered = filtered;
        if filtered > 0 {
            log_debug!("Filtered {filtered} pass-through cycles from paired units");
        }

        if self.breaks.in_scheduled_window(now) {
            summary.cycles_suppressed = true;
            log_debug!("Cycle times skipped (scheduled break)");
        } else if !cycles.is_empty() {
            match self.store.insert_cycle_times(&cycles, now).await {
                Ok(count) => summary.cycles_stored = count,
                Err(err) => {
                    self.error_throttled("store:cycle_times", format!("Cycle time insert failed: {err:?}"))
                }
            }
        }

        if !availability.is_empty() {
            match self.store.insert_availability(&availability, now).await {
                Ok(count) => summary.availability_stored = count,
                Err(err) => self.error_throttled(
                    "store:technical_availability",
                    format!("Availability insert failed: {err:?}"),
                ),
            }
        }

        if let Some(quality) = &quality {
            match self.store.upsert_quality_counters(quality, now).await {
                Ok(()) => summary.quality_stored = true,
                Err(err) => self.error_throttled(
                    "store:quality_counters",
                    format!("Quality counter upsert failed: {err:?}"),
                ),
            }
        }

        let snapshots: Vec<AvailabilitySnapshot> =
            availability.iter().map(AvailabilitySnapshot::from).collect();
        summary.transition = self.breaks.update(&snapshots, now).await;

        match &quality {
            Some(quality) => log_info!(
                "Shift {} hour {}: cycles={} availability={} good={} reject={} rework={}",
                slot.shift_number,
                slot.hour_index,
                summary.cycles_stored,
                summary.availability_stored,
                quality.good,
                quality.reject,
                quality.rework
            ),
            None => log_info!(
                "Shift {} hour {}: cycles={} availability={} quality=unavailable",
                slot.shift_number,
                slot.hour_index,
                summary.cycles_stored,
                summary.availability_stored
            ),
        }
        if let Some(open) = self.breaks.open_break() {
            log_debug!("Currently in break: {}", open.window.break_name);
        }

        summary
    }

    /// Polls every `interval` until `cancel_token` fires.
    pub async fn run(&mut self, interval: Duration, cancel_token: CancellationToken) {
        collection_loop(self, interval, cancel_token).await;
    }

    /// Closes any open break at `now`. Called once the loop has stopped.
    pub async fn shutdown(&mut self, now: NaiveDateTime) -> Result<()> {
        self.breaks.force_close(now).await?;
        Ok(())
    }
}

/// Logs collection pauses and resumes as the session comes and goes.
pub struct CollectionStatusObserver;

#[async_trait]
impl ConnectionObserver for CollectionStatusObserver {
    async fn on_connected(&self, notice: &ConnectNotice) -> Result<()> {
        if notice.is_reconnect() {
            log_info!("Session restored; data collection resumes");
        }
        Ok(())
    }

    async fn on_disconnected(&self, reason: &str) -> Result<()> {
        log_warn!("Session lost ({reason}); data collection paused until reconnect");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        breaks::ReferenceStrategy,
        collector::readings::render_field,
        config::SecurityConfig,
        connection::{ConnectionManager, ConnectionSettings},
        session::{FieldValue, SimulatedFactory, SimulatedLine},
        shifts::ShiftCalendar,
    };
    use chrono::{NaiveDate, NaiveTime};
    use std::sync::Arc;

    fn monday(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 4)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn machine() -> MachineConfig {
        MachineConfig {
            tracked_units: vec![10, 47],
            reference_unit: None,
            freeze_quorum: false,
            paired_units: vec![47, 48],
            pass_through_threshold_secs: 10.0,
            target_cycle_time_secs: 17.0,
        }
    }

    struct Rig {
        line: SimulatedLine,
        db: Database,
        manager: ConnectionManager,
        orchestrator: CollectionOrchestrator,
    }

    async fn rig(connect: bool) -> Rig {
        let line = SimulatedLine::new();
        let db = Database::in_memory().unwrap();
        db.insert_schedule_entry(
            1,
            1,
            "Morning",
            NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(10, 10, 0).unwrap(),
        )
        .await
        .unwrap();

        let factory = Arc::new(SimulatedFactory::new(
            "sim://line",
            line.clone(),
            &SecurityConfig::default(),
        ));
        let settings = ConnectionSettings {
            health_check_interval: Duration::from_secs(3600),
            ..ConnectionSettings::default()
        };
        let mut manager =
            ConnectionManager::new(factory, settings, db.clone(), &CancellationToken::new());
        if connect {
            manager.start().await.unwrap();
        }

        let breaks = BreakStateMachine::new(
            db.clone(),
            ShiftCalendar::default(),
            ReferenceStrategy::FirstTracked,
        );
        let orchestrator = CollectionOrchestrator::new(
            db.clone(),
            manager.handles(),
            breaks,
            &machine(),
            NodeTemplates::default(),
        );
        Rig {
            line,
            db,
            manager,
            orchestrator,
        }
    }

    fn cycle_field(unit_id: u32) -> String {
        render_field(&NodeTemplates::default().cycle_last, unit_id, 0, 0)
            .as_str()
            .to_string()
    }

    #[tokio::test]
    async fn no_session_means_no_reads_and_no_wait() {
        let mut rig = rig(false).await;

        let summary = tokio::time::timeout(
            Duration::from_secs(1),
            rig.orchestrator.collect_once(monday(8, 0, 0)),
        )
        .await
        .unwrap();
        assert!(summary.skipped);
        assert_eq!(rig.db.count_rows("technical_availability").await.unwrap(), 0);
        assert_eq!(rig.line.connect_attempts(), 0);
    }

    #[tokio::test]
    async fn paired_pass_through_cycles_are_not_stored() {
        let mut rig = rig(true).await;
        rig.line.set_field(&cycle_field(10), FieldValue::Int(8_500));
        rig.line.set_field(&cycle_field(47), FieldValue::Int(8_500));

        let summary = rig.orchestrator.collect_once(monday(8, 0, 0)).await;
        assert_eq!(summary.cycles_stored, 1);
        assert_eq!(summary.cycles_filtered, 1);
        assert_eq!(summary.availability_stored, 2);
        assert!(summary.quality_stored);

        rig.line.set_field(&cycle_field(47), FieldValue::Int(15_000));
        let summary = rig.orchestrator.collect_once(monday(8, 0, 10)).await;
        assert_eq!(summary.cycles_stored, 2);

        let rows = rig
            .db
            .query(
                "SELECT time, sequence_id, cycle_time_seconds FROM cycle_times ORDER BY rowid",
                vec![],
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].get_i64("sequence_id").unwrap(), 10);
        assert_eq!(rows[0].get_f64("cycle_time_seconds").unwrap(), 8.5);
        assert_eq!(rows[2].get_i64("sequence_id").unwrap(), 47);
        // Rows carry the tick's wall-clock time, in the break-record format.
        assert_eq!(rows[0].get_text("time").unwrap(), "2024-03-04 08:00:00");
        assert_eq!(rows[2].get_text("time").unwrap(), "2024-03-04 08:00:10");

        rig.manager.stop().await.unwrap();
    }

    #[tokio::test]
    async fn scheduled_window_suppresses_only_cycle_rows() {
        let mut rig = rig(true).await;

        for second in [0, 10] {
            let summary = rig.orchestrator.collect_once(monday(10, 5, second)).await;
            assert!(summary.cycles_suppressed);
            assert_eq!(summary.cycles_stored, 0);
            assert_eq!(summary.availability_stored, 2);
            assert!(summary.quality_stored);
        }

        assert_eq!(rig.db.count_rows("cycle_times").await.unwrap(), 0);
        assert_eq!(rig.db.count_rows("technical_availability").await.unwrap(), 4);
        // Same shift and hour: the counters row is overwritten.
        assert_eq!(rig.db.count_rows("quality_counters").await.unwrap(), 1);

        rig.manager.stop().await.unwrap();
    }

    #[tokio::test]
    async fn another_weekdays_break_does_not_suppress_cycles() {
        let mut rig = rig(true).await;
        rig.db
            .insert_schedule_entry(
                2,
                1,
                "Tuesday lunch",
                NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
                NaiveTime::from_hms_opt(12, 10, 0).unwrap(),
            )
            .await
            .unwrap();

        // Monday's schedule load also covers Tuesday, but only Tuesday may use it.
        let summary = rig.orchestrator.collect_once(monday(12, 5, 0)).await;
        assert_eq!(rig.orchestrator.breaks().schedule().entries().len(), 2);
        assert!(!summary.cycles_suppressed);
        assert_eq!(summary.cycles_stored, 2);

        let tuesday = monday(12, 5, 0) + chrono::Duration::days(1);
        let summary = rig.orchestrator.collect_once(tuesday).await;
        assert!(summary.cycles_suppressed);

        rig.manager.stop().await.unwrap();
    }

    #[tokio::test]
    async fn one_failing_unit_does_not_spoil_the_tick() {
        let mut rig = rig(true).await;
        let ta_field = render_field(&NodeTemplates::default().availability_percent, 47, 0, 0);
        rig.line.fail_field(ta_field.as_str());

        let summary = rig.orchestrator.collect_once(monday(8, 0, 0)).await;
        assert_eq!(summary.read_faults, 1);
        assert_eq!(summary.availability_stored, 1);
        assert_eq!(summary.cycles_stored, 2);
        assert!(summary.quality_stored);

        rig.manager.stop().await.unwrap();
    }

    #[tokio::test]
    async fn frozen_line_opens_and_shutdown_closes_a_break() {
        let mut rig = rig(true).await;
        rig.line.set_frozen(true);

        let mut transition = None;
        for back in (0..4).rev() {
            let summary = rig
                .orchestrator
                .collect_once(monday(9, 58, 0) - chrono::Duration::seconds(10 * back))
                .await;
            transition = summary.transition;
        }
        assert!(matches!(
            transition,
            Some(BreakTransition::Started { early_start_minutes: 0, .. })
        ));
        assert_eq!(rig.db.get_open_break_records().await.unwrap().len(), 1);

        rig.orchestrator.shutdown(monday(10, 12, 0)).await.unwrap();
        let records = rig.db.list_break_records().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].duration_minutes, Some(14));
        assert!(records[0].end_time.is_some());

        rig.manager.stop().await.unwrap();
    }

    #[tokio::test]
    async fn schedule_follows_the_service_date() {
        let mut rig = rig(false).await;
        rig.orchestrator.collect_once(monday(8, 0, 0)).await;
        assert_eq!(
            rig.orchestrator.breaks().schedule().service_date(),
            Some(monday(0, 0, 0).date())
        );
        assert_eq!(rig.orchestrator.breaks().schedule().entries().len(), 1);

        // 03:00 on Tuesday still belongs to Monday's night shift.
        let tuesday_night = monday(3, 0, 0) + chrono::Duration::days(1);
        rig.orchestrator.collect_once(tuesday_night).await;
        assert_eq!(
            rig.orchestrator.breaks().schedule().service_date(),
            Some(monday(0, 0, 0).date())
        );

        let tuesday_morning = monday(7, 0, 0) + chrono::Duration::days(1);
        rig.orchestrator.collect_once(tuesday_morning).await;
        assert_eq!(
            rig.orchestrator.breaks().schedule().service_date(),
            Some(tuesday_morning.date())
        );
        // Only Monday's entry exists, and Tuesday's schedule covers Tue/Wed.
        assert!(rig.orchestrator.breaks().schedule().entries().is_empty());
    }
}
