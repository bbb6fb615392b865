//! `rusqlite`-backed implementation of the repository traits.
//!
//! A single connection guarded by `parking_lot::Mutex` is shared by
//! every repository; the automation cycle already serializes access
//! via its try-lock, so this is never contended in practice.

use super::*;
use crate::model::{
    ActionStatus, ActionType, DayType, GlucoseQuality, PatternWindow, ProfileEstimate, RuleState, TelemetryQuality,
    TherapyKind, TimeSlot,
};
use anyhow::{anyhow, Context, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path).with_context(|| format!("opening sqlite store at {path}"))?;
        let store = Self { conn: Mutex::new(conn) };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("opening in-memory sqlite store")?;
        let store = Self { conn: Mutex::new(conn) };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS glucose (
                id INTEGER PRIMARY KEY,
                ts INTEGER NOT NULL,
                value_mmol REAL NOT NULL,
                source TEXT NOT NULL,
                quality TEXT NOT NULL,
                UNIQUE(ts)
            );
            CREATE TABLE IF NOT EXISTS therapy (
                id TEXT PRIMARY KEY,
                ts INTEGER NOT NULL,
                kind_json TEXT NOT NULL,
                raw_json TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS forecast (
                ts INTEGER NOT NULL,
                horizon_minutes INTEGER NOT NULL,
                value_mmol REAL NOT NULL,
                ci_low REAL NOT NULL,
                ci_high REAL NOT NULL,
                model_version TEXT NOT NULL,
                PRIMARY KEY (ts, horizon_minutes)
            );
            CREATE TABLE IF NOT EXISTS telemetry (
                id INTEGER PRIMARY KEY,
                ts INTEGER NOT NULL,
                source TEXT NOT NULL,
                key TEXT NOT NULL,
                value_double REAL,
                value_text TEXT,
                unit TEXT,
                quality TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS action_command (
                id TEXT PRIMARY KEY,
                idempotency_key TEXT NOT NULL UNIQUE,
                action_type TEXT NOT NULL,
                params_json TEXT NOT NULL,
                safety_snapshot_json TEXT NOT NULL,
                status TEXT NOT NULL,
                failure_reason TEXT,
                created_ts INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS rule_execution (
                rule_id TEXT NOT NULL,
                state TEXT NOT NULL,
                reasons_json TEXT NOT NULL,
                ts INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS pattern_window (
                day_type TEXT NOT NULL,
                hour INTEGER NOT NULL,
                sample_count INTEGER NOT NULL,
                active_days INTEGER NOT NULL,
                low_rate REAL NOT NULL,
                high_rate REAL NOT NULL,
                recommended_target_mmol REAL NOT NULL,
                is_risk_window INTEGER NOT NULL,
                PRIMARY KEY (day_type, hour)
            );
            CREATE TABLE IF NOT EXISTS profile_segment (
                day_type TEXT NOT NULL,
                time_slot TEXT NOT NULL,
                isf REAL NOT NULL,
                cr REAL NOT NULL,
                sample_count INTEGER NOT NULL,
                confidence REAL NOT NULL,
                lookback_days INTEGER NOT NULL,
                PRIMARY KEY (day_type, time_slot)
            );
            "#,
        )?;
        Ok(())
    }
}

fn quality_to_str(q: GlucoseQuality) -> &'static str {
    match q {
        GlucoseQuality::Ok => "OK",
        GlucoseQuality::Stale => "STALE",
        GlucoseQuality::SensorError => "SENSOR_ERROR",
    }
}

fn quality_from_str(s: &str) -> GlucoseQuality {
    match s {
        "STALE" => GlucoseQuality::Stale,
        "SENSOR_ERROR" => GlucoseQuality::SensorError,
        _ => GlucoseQuality::Ok,
    }
}

impl GlucoseRepository for SqliteStore {
    fn insert_glucose(&self, points: &[GlucosePoint]) -> Result<()> {
        let conn = self.conn.lock();
        for p in points {
            conn.execute(
                "INSERT OR REPLACE INTO glucose (id, ts, value_mmol, source, quality) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![p.id, p.ts, p.value_mmol, p.source, quality_to_str(p.quality)],
            )?;
        }
        Ok(())
    }

    fn recent(&self, limit: u32) -> Result<Vec<GlucosePoint>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT id, ts, value_mmol, source, quality FROM glucose ORDER BY ts DESC LIMIT ?1")?;
        let rows = stmt.query_map(params![limit], |row| {
            Ok(GlucosePoint {
                id: row.get(0)?,
                ts: row.get(1)?,
                value_mmol: row.get(2)?,
                source: row.get(3)?,
                quality: quality_from_str(&row.get::<_, String>(4)?),
            })
        })?;
        let mut out: Vec<GlucosePoint> = rows.collect::<rusqlite::Result<_>>()?;
        out.sort_by_key(|p| p.ts);
        Ok(out)
    }

    fn glucose_since(&self, since_ts: i64) -> Result<Vec<GlucosePoint>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT id, ts, value_mmol, source, quality FROM glucose WHERE ts >= ?1 ORDER BY ts ASC")?;
        let rows = stmt.query_map(params![since_ts], |row| {
            Ok(GlucosePoint {
                id: row.get(0)?,
                ts: row.get(1)?,
                value_mmol: row.get(2)?,
                source: row.get(3)?,
                quality: quality_from_str(&row.get::<_, String>(4)?),
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    fn latest(&self) -> Result<Option<GlucosePoint>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, ts, value_mmol, source, quality FROM glucose ORDER BY ts DESC LIMIT 1",
            [],
            |row| {
                Ok(GlucosePoint {
                    id: row.get(0)?,
                    ts: row.get(1)?,
                    value_mmol: row.get(2)?,
                    source: row.get(3)?,
                    quality: quality_from_str(&row.get::<_, String>(4)?),
                })
            },
        )
        .optional()
        .map_err(Into::into)
    }
}

impl TherapyRepository for SqliteStore {
    fn insert_therapy(&self, events: &[TherapyEvent]) -> Result<()> {
        let conn = self.conn.lock();
        for e in events {
            let kind_json = serde_json::to_string(&e.kind)?;
            let raw_json = serde_json::to_string(&e.raw)?;
            conn.execute(
                "INSERT OR REPLACE INTO therapy (id, ts, kind_json, raw_json) VALUES (?1, ?2, ?3, ?4)",
                params![e.id, e.ts, kind_json, raw_json],
            )?;
        }
        Ok(())
    }

    fn therapy_since(&self, since_ts: i64) -> Result<Vec<TherapyEvent>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT id, ts, kind_json, raw_json FROM therapy WHERE ts >= ?1 ORDER BY ts ASC")?;
        let rows = stmt.query_map(params![since_ts], |row| {
            let id: String = row.get(0)?;
            let ts: i64 = row.get(1)?;
            let kind_json: String = row.get(2)?;
            let raw_json: String = row.get(3)?;
            Ok((id, ts, kind_json, raw_json))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (id, ts, kind_json, raw_json) = row?;
            let kind: TherapyKind = serde_json::from_str(&kind_json)?;
            let raw = serde_json::from_str(&raw_json)?;
            out.push(TherapyEvent { id, ts, kind, raw });
        }
        Ok(out)
    }

    fn last_sensor_blocked_within(&self, now_ts: i64, window_ms: i64) -> Result<bool> {
        let events = self.therapy_since(now_ts - window_ms)?;
        Ok(events
            .iter()
            .rev()
            .find_map(|e| match &e.kind {
                TherapyKind::SensorState { blocked } => Some(*blocked),
                _ => None,
            })
            .unwrap_or(false))
    }
}

impl ForecastRepository for SqliteStore {
    fn insert_forecasts(&self, forecasts: &[Forecast]) -> Result<()> {
        let conn = self.conn.lock();
        for f in forecasts {
            conn.execute(
                "INSERT OR REPLACE INTO forecast (ts, horizon_minutes, value_mmol, ci_low, ci_high, model_version) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![f.ts, f.horizon_minutes, f.value_mmol, f.ci_low, f.ci_high, f.model_version],
            )?;
        }
        Ok(())
    }

    fn forecast_since(&self, since_ts: i64) -> Result<Vec<Forecast>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT ts, horizon_minutes, value_mmol, ci_low, ci_high, model_version FROM forecast WHERE ts >= ?1 ORDER BY ts ASC, horizon_minutes ASC",
        )?;
        let rows = stmt.query_map(params![since_ts], |row| {
            Ok(Forecast {
                ts: row.get(0)?,
                horizon_minutes: row.get(1)?,
                value_mmol: row.get(2)?,
                ci_low: row.get(3)?,
                ci_high: row.get(4)?,
                model_version: row.get(5)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    fn purge_older_than(&self, now_ts: i64, max_age_ms: i64) -> Result<u64> {
        let conn = self.conn.lock();
        let cutoff = now_ts - max_age_ms;
        let affected = conn.execute("DELETE FROM forecast WHERE ts < ?1", params![cutoff])?;
        Ok(affected as u64)
    }
}

fn telemetry_quality_to_str(q: TelemetryQuality) -> &'static str {
    match q {
        TelemetryQuality::Ok => "OK",
        TelemetryQuality::OutOfRange => "OUT_OF_RANGE",
    }
}

fn telemetry_quality_from_str(s: &str) -> TelemetryQuality {
    match s {
        "OUT_OF_RANGE" => TelemetryQuality::OutOfRange,
        _ => TelemetryQuality::Ok,
    }
}

impl TelemetryRepository for SqliteStore {
    fn insert_telemetry(&self, samples: &[TelemetrySample]) -> Result<()> {
        let conn = self.conn.lock();
        for s in samples {
            conn.execute(
                "INSERT OR REPLACE INTO telemetry (id, ts, source, key, value_double, value_text, unit, quality) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![s.id, s.ts, s.source, s.key, s.value_double, s.value_text, s.unit, telemetry_quality_to_str(s.quality)],
            )?;
        }
        Ok(())
    }

    fn in_window(&self, now_ts: i64, window_ms: i64) -> Result<Vec<TelemetrySample>> {
        let conn = self.conn.lock();
        let since = now_ts - window_ms;
        let mut stmt = conn.prepare(
            "SELECT id, ts, source, key, value_double, value_text, unit, quality FROM telemetry WHERE ts >= ?1 AND ts <= ?2 ORDER BY ts ASC",
        )?;
        let rows = stmt.query_map(params![since, now_ts], |row| {
            Ok(TelemetrySample {
                id: row.get(0)?,
                ts: row.get(1)?,
                source: row.get(2)?,
                key: row.get(3)?,
                value_double: row.get(4)?,
                value_text: row.get(5)?,
                unit: row.get(6)?,
                quality: telemetry_quality_from_str(&row.get::<_, String>(7)?),
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    fn purge_invalid_timestamps(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let affected = conn.execute("DELETE FROM telemetry WHERE ts <= 0", [])?;
        Ok(affected as u64)
    }
}

fn action_type_to_str(t: ActionType) -> &'static str {
    match t {
        ActionType::TempTarget => "TEMP_TARGET",
        ActionType::Carbs => "CARBS",
    }
}

fn action_type_from_str(s: &str) -> ActionType {
    match s {
        "CARBS" => ActionType::Carbs,
        _ => ActionType::TempTarget,
    }
}

fn action_status_to_str(s: ActionStatus) -> &'static str {
    match s {
        ActionStatus::Pending => "PENDING",
        ActionStatus::Sent => "SENT",
        ActionStatus::Failed => "FAILED",
    }
}

fn action_status_from_str(s: &str) -> ActionStatus {
    match s {
        "SENT" => ActionStatus::Sent,
        "FAILED" => ActionStatus::Failed,
        _ => ActionStatus::Pending,
    }
}

impl ActionRepository for SqliteStore {
    fn find_by_idempotency_key(&self, key: &str) -> Result<Option<ActionCommand>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, idempotency_key, action_type, params_json, safety_snapshot_json, status, failure_reason, created_ts FROM action_command WHERE idempotency_key = ?1",
            params![key],
            |row| {
                let action_type: String = row.get(2)?;
                let params_json: String = row.get(3)?;
                let safety_json: String = row.get(4)?;
                let status: String = row.get(5)?;
                Ok(ActionCommand {
                    id: row.get(0)?,
                    idempotency_key: row.get(1)?,
                    action_type: action_type_from_str(&action_type),
                    params: serde_json::from_str(&params_json).unwrap_or(serde_json::Value::Null),
                    safety_snapshot: serde_json::from_str(&safety_json).unwrap_or(serde_json::Value::Null),
                    status: action_status_from_str(&status),
                    failure_reason: row.get(6)?,
                    created_ts: row.get(7)?,
                })
            },
        )
        .optional()
        .map_err(Into::into)
    }

    fn insert_pending(&self, command: &ActionCommand) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO action_command (id, idempotency_key, action_type, params_json, safety_snapshot_json, status, failure_reason, created_ts) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                command.id,
                command.idempotency_key,
                action_type_to_str(command.action_type),
                serde_json::to_string(&command.params)?,
                serde_json::to_string(&command.safety_snapshot)?,
                action_status_to_str(command.status),
                command.failure_reason,
                command.created_ts,
            ],
        )?;
        Ok(())
    }

    fn mark_sent(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock();
        let affected = conn.execute("UPDATE action_command SET status = 'SENT', failure_reason = NULL WHERE id = ?1", params![id])?;
        if affected == 0 {
            return Err(anyhow!("no action command with id {id}"));
        }
        Ok(())
    }

    fn mark_failed(&self, id: &str, reason: &str) -> Result<()> {
        let conn = self.conn.lock();
        let affected = conn.execute("UPDATE action_command SET status = 'FAILED', failure_reason = ?1 WHERE id = ?2", params![reason, id])?;
        if affected == 0 {
            return Err(anyhow!("no action command with id {id}"));
        }
        Ok(())
    }

    fn count_sent_since(&self, since_ts: i64) -> Result<u32> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM action_command WHERE status = 'SENT' AND created_ts >= ?1",
            params![since_ts],
            |row| row.get(0),
        )?;
        Ok(count as u32)
    }

    fn latest_sent_ts(&self, action_type: ActionType) -> Result<Option<i64>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT created_ts FROM action_command WHERE status = 'SENT' AND action_type = ?1 ORDER BY created_ts DESC LIMIT 1",
            params![action_type_to_str(action_type)],
            |row| row.get(0),
        )
        .optional()
        .map_err(Into::into)
    }
}

impl RuleExecutionRepository for SqliteStore {
    fn record(&self, decision: &RuleDecision, ts: i64) -> Result<()> {
        let conn = self.conn.lock();
        let state = match decision.state {
            RuleState::Triggered => "TRIGGERED",
            RuleState::Blocked => "BLOCKED",
            RuleState::NoMatch => "NO_MATCH",
        };
        conn.execute(
            "INSERT INTO rule_execution (rule_id, state, reasons_json, ts) VALUES (?1, ?2, ?3, ?4)",
            params![decision.rule_id, state, serde_json::to_string(&decision.reasons)?, ts],
        )?;
        Ok(())
    }

    fn last_triggered_ts(&self, rule_id: &str) -> Result<Option<i64>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT ts FROM rule_execution WHERE rule_id = ?1 AND state = 'TRIGGERED' ORDER BY ts DESC LIMIT 1",
            params![rule_id],
            |row| row.get(0),
        )
        .optional()
        .map_err(Into::into)
    }
}

fn day_type_to_str(d: DayType) -> &'static str {
    match d {
        DayType::Weekday => "WEEKDAY",
        DayType::Weekend => "WEEKEND",
    }
}

fn day_type_from_str(s: &str) -> DayType {
    match s {
        "WEEKEND" => DayType::Weekend,
        _ => DayType::Weekday,
    }
}

fn time_slot_to_str(t: TimeSlot) -> &'static str {
    match t {
        TimeSlot::Night => "NIGHT",
        TimeSlot::Morning => "MORNING",
        TimeSlot::Afternoon => "AFTERNOON",
        TimeSlot::Evening => "EVENING",
    }
}

fn time_slot_from_str(s: &str) -> TimeSlot {
    match s {
        "MORNING" => TimeSlot::Morning,
        "AFTERNOON" => TimeSlot::Afternoon,
        "EVENING" => TimeSlot::Evening,
        _ => TimeSlot::Night,
    }
}

impl PatternRepository for SqliteStore {
    fn replace_all(&self, windows: &[PatternWindow]) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM pattern_window", [])?;
        for w in windows {
            conn.execute(
                "INSERT INTO pattern_window (day_type, hour, sample_count, active_days, low_rate, high_rate, recommended_target_mmol, is_risk_window) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    day_type_to_str(w.day_type),
                    w.hour,
                    w.sample_count,
                    w.active_days,
                    w.low_rate,
                    w.high_rate,
                    w.recommended_target_mmol,
                    w.is_risk_window as i64,
                ],
            )?;
        }
        Ok(())
    }

    fn all(&self) -> Result<Vec<PatternWindow>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT day_type, hour, sample_count, active_days, low_rate, high_rate, recommended_target_mmol, is_risk_window FROM pattern_window",
        )?;
        let rows = stmt.query_map([], |row| {
            let day_type: String = row.get(0)?;
            let risk: i64 = row.get(7)?;
            Ok(PatternWindow {
                day_type: day_type_from_str(&day_type),
                hour: row.get(1)?,
                sample_count: row.get(2)?,
                active_days: row.get(3)?,
                low_rate: row.get(4)?,
                high_rate: row.get(5)?,
                recommended_target_mmol: row.get(6)?,
                is_risk_window: risk != 0,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }
}

impl ProfileEstimateRepository for SqliteStore {
    fn replace_segments(&self, segments: &[ProfileSegmentEstimate]) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM profile_segment", [])?;
        for s in segments {
            conn.execute(
                "INSERT INTO profile_segment (day_type, time_slot, isf, cr, sample_count, confidence, lookback_days) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    day_type_to_str(s.day_type),
                    time_slot_to_str(s.time_slot),
                    s.estimate.isf,
                    s.estimate.cr,
                    s.estimate.sample_count,
                    s.estimate.confidence,
                    s.estimate.lookback_days,
                ],
            )?;
        }
        Ok(())
    }

    fn all_segments(&self) -> Result<Vec<ProfileSegmentEstimate>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT day_type, time_slot, isf, cr, sample_count, confidence, lookback_days FROM profile_segment")?;
        let rows = stmt.query_map([], |row| {
            let day_type: String = row.get(0)?;
            let time_slot: String = row.get(1)?;
            Ok(ProfileSegmentEstimate {
                day_type: day_type_from_str(&day_type),
                time_slot: time_slot_from_str(&time_slot),
                estimate: ProfileEstimate {
                    isf: row.get(2)?,
                    cr: row.get(3)?,
                    sample_count: row.get(4)?,
                    confidence: row.get(5)?,
                    lookback_days: row.get(6)?,
                },
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glucose_round_trip_dedups_on_timestamp() {
        let store = SqliteStore::open_in_memory().unwrap();
        let p = GlucosePoint::new(1, 1000, 6.0, "nightscout", GlucoseQuality::Ok);
        store.insert_glucose(&[p.clone()]).unwrap();
        store.insert_glucose(&[GlucosePoint::new(2, 1000, 6.5, "nightscout", GlucoseQuality::Ok)]).unwrap();
        let recent = store.recent(10).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].value_mmol, 6.5);
    }

    #[test]
    fn action_idempotency_key_is_unique() {
        let store = SqliteStore::open_in_memory().unwrap();
        let cmd = ActionCommand::new("a1", "K1", ActionType::TempTarget, serde_json::json!({}), serde_json::json!({}), 0);
        store.insert_pending(&cmd).unwrap();
        let dup = ActionCommand::new("a2", "K1", ActionType::TempTarget, serde_json::json!({}), serde_json::json!({}), 0);
        assert!(store.insert_pending(&dup).is_err());
        let found = store.find_by_idempotency_key("K1").unwrap().unwrap();
        assert_eq!(found.id, "a1");
    }

    #[test]
    fn forecast_purge_drops_only_old_rows() {
        let store = SqliteStore::open_in_memory().unwrap();
        let old = Forecast { ts: 0, horizon_minutes: 5, value_mmol: 6.0, ci_low: 5.5, ci_high: 6.5, model_version: "t".into() };
        let recent = Forecast { ts: 500 * 24 * 60 * 60 * 1000, horizon_minutes: 5, value_mmol: 6.0, ci_low: 5.5, ci_high: 6.5, model_version: "t".into() };
        store.insert_forecasts(&[old, recent]).unwrap();
        let purged = store.purge_older_than(500 * 24 * 60 * 60 * 1000, 400 * 24 * 60 * 60 * 1000).unwrap();
        assert_eq!(purged, 1);
        assert_eq!(store.forecast_since(0).unwrap().len(), 1);
    }

    #[test]
    fn therapy_round_trip_preserves_kind() {
        let store = SqliteStore::open_in_memory().unwrap();
        let event = TherapyEvent::new("e1", 1000, TherapyKind::CorrectionBolus { units: 2.5 });
        store.insert_therapy(&[event.clone()]).unwrap();
        let loaded = store.therapy_since(0).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].kind, event.kind);
    }

    #[test]
    fn latest_sent_ts_ignores_other_action_types() {
        let store = SqliteStore::open_in_memory().unwrap();
        let cmd = ActionCommand::new("a1", "K1", ActionType::TempTarget, serde_json::json!({}), serde_json::json!({}), 1000);
        store.insert_pending(&cmd).unwrap();
        store.mark_sent("a1").unwrap();
        assert_eq!(store.latest_sent_ts(ActionType::TempTarget).unwrap(), Some(1000));
        assert_eq!(store.latest_sent_ts(ActionType::Carbs).unwrap(), None);
    }

    #[test]
    fn rule_execution_tracks_last_triggered() {
        let store = SqliteStore::open_in_memory().unwrap();
        let decision = RuleDecision::no_match("R1");
        store.record(&decision, 0).unwrap();
        assert_eq!(store.last_triggered_ts("R1").unwrap(), None);

        let triggered = RuleDecision {
            rule_id: "R1".into(),
            state: RuleState::Triggered,
            reasons: vec!["x".into()],
            action_proposal: None,
        };
        store.record(&triggered, 1000).unwrap();
        assert_eq!(store.last_triggered_ts("R1").unwrap(), Some(1000));
    }
}
