mod daily;
mod entities;
mod keywords;

use crate::errors::{DeskError, DeskResult};
use crate::models::{Agent, AgentRole, CallRecord, DeskSettings, NewCall};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration as StdDuration;
use uuid::Uuid;

pub use entities::{CoveredClosure, EntityRecord};
pub use keywords::KeywordDraft;

const SCHEMA_SQL: &str = include_str!("schema.sql");
const SETTINGS_KEY: &str = "desk";

#[derive(Debug)]
pub struct Database {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl Database {
    pub fn new(path: &Path) -> DeskResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| DeskError::Io(err.to_string()))?;
        }
        let conn = Connection::open(path)?;
        // Several processes may share one file; writers queue instead of failing.
        conn.busy_timeout(StdDuration::from_secs(5))?;
        conn.execute_batch(SCHEMA_SQL)?;

        let db = Self {
            conn: Mutex::new(conn),
            db_path: path.to_path_buf(),
        };
        db.ensure_default_settings()?;
        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn lock(&self) -> DeskResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| DeskError::Internal("database mutex poisoned".to_string()))
    }

    pub fn get_settings(&self) -> DeskResult<DeskSettings> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                "SELECT value_json FROM settings WHERE key = ?1",
                [SETTINGS_KEY],
                |row| row.get::<_, String>(0),
            )
            .optional()?;

        match raw {
            Some(raw) => Ok(serde_json::from_str::<DeskSettings>(&raw).unwrap_or_default()),
            None => Ok(DeskSettings::default()),
        }
    }

    /// Deep-merges a partial JSON document into the stored settings.
    pub fn update_settings(&self, update: serde_json::Value) -> DeskResult<DeskSettings> {
        let current = self.get_settings()?;
        let mut merged = serde_json::to_value(current)?;
        merge_json(&mut merged, update);
        let settings: DeskSettings = serde_json::from_value(merged)
            .map_err(|err| DeskError::Validation(format!("settings update rejected: {}", err)))?;
        validate_settings(&settings)?;

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO settings (key, value_json, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json, updated_at = excluded.updated_at",
            params![SETTINGS_KEY, serde_json::to_string(&settings)?, ts(Utc::now())],
        )?;

        Ok(settings)
    }

    pub fn upsert_agent(&self, agent: &Agent) -> DeskResult<Agent> {
        if agent.id.trim().is_empty() || agent.agency_id.trim().is_empty() {
            return Err(DeskError::Validation("agent id and agency id are required".to_string()));
        }
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO agents (id, agency_id, role, utc_offset_minutes, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
               agency_id = excluded.agency_id,
               role = excluded.role,
               utc_offset_minutes = excluded.utc_offset_minutes",
            params![
                agent.id,
                agent.agency_id,
                agent.role.as_str(),
                agent.utc_offset_minutes,
                ts(agent.created_at)
            ],
        )?;
        get_agent_with(&conn, &agent.id)?
            .ok_or_else(|| DeskError::Internal(format!("agent {} vanished after upsert", agent.id)))
    }

    pub fn get_agent(&self, agent_id: &str) -> DeskResult<Option<Agent>> {
        let conn = self.lock()?;
        get_agent_with(&conn, agent_id)
    }

    pub fn list_agents(&self, agency_id: Option<&str>) -> DeskResult<Vec<Agent>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, agency_id, role, utc_offset_minutes, created_at
             FROM agents
             WHERE (?1 IS NULL OR agency_id = ?1)
             ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![agency_id], parse_agent_row)?;
        let mut agents = Vec::new();
        for row in rows {
            agents.push(row?);
        }
        Ok(agents)
    }

    pub fn insert_call(&self, payload: NewCall, now: DateTime<Utc>) -> DeskResult<CallRecord> {
        if payload.agency_id.trim().is_empty() {
            return Err(DeskError::Validation("call requires an agency id".to_string()));
        }
        if payload.external_phone.trim().is_empty() {
            return Err(DeskError::Validation("call requires an external phone".to_string()));
        }

        let record = CallRecord {
            id: Uuid::new_v4().to_string(),
            agency_id: payload.agency_id,
            agent_id: payload.agent_id,
            external_phone: payload.external_phone,
            duration_secs: payload.duration_secs,
            transcript: payload.transcript,
            is_high_intent: payload.is_high_intent,
            carrier_mc: payload.carrier_mc,
            carrier_dot: payload.carrier_dot,
            load_id: payload.load_id,
            started_at: payload.started_at.unwrap_or(now),
            ended_at: payload.ended_at,
        };

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO calls (
               id, agency_id, agent_id, external_phone, duration_secs, transcript, is_high_intent,
               carrier_mc, carrier_dot, load_id, started_at, ended_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                record.id,
                record.agency_id,
                record.agent_id,
                record.external_phone,
                record.duration_secs,
                record.transcript,
                record.is_high_intent,
                record.carrier_mc,
                record.carrier_dot,
                record.load_id,
                ts(record.started_at),
                record.ended_at.map(ts),
            ],
        )?;
        Ok(record)
    }

    pub fn get_call(&self, call_id: &str) -> DeskResult<Option<CallRecord>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {} FROM calls WHERE id = ?1", CALL_COLUMNS),
            [call_id],
            parse_call_row,
        )
        .optional()
        .map_err(DeskError::from)
    }

    /// Calls that started in `[start, end)`.
    pub fn list_calls_between(
        &self,
        agency_id: Option<&str>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> DeskResult<Vec<CallRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM calls
             WHERE (?1 IS NULL OR agency_id = ?1) AND started_at >= ?2 AND started_at < ?3
             ORDER BY started_at ASC",
            CALL_COLUMNS
        ))?;
        let rows = stmt.query_map(params![agency_id, ts(start), ts(end)], parse_call_row)?;
        collect_rows(rows)
    }

    fn ensure_default_settings(&self) -> DeskResult<()> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(1) FROM settings WHERE key = ?1",
            [SETTINGS_KEY],
            |row| row.get(0),
        )?;
        if count == 0 {
            conn.execute(
                "INSERT INTO settings (key, value_json, updated_at) VALUES (?1, ?2, ?3)",
                params![
                    SETTINGS_KEY,
                    serde_json::to_string(&DeskSettings::default())?,
                    ts(Utc::now())
                ],
            )?;
        }
        Ok(())
    }
}

pub const MAX_ATTRIBUTION_WINDOW_HOURS: u32 = 8_760;

pub(crate) fn validate_settings(settings: &DeskSettings) -> DeskResult<()> {
    if !(1..=MAX_ATTRIBUTION_WINDOW_HOURS).contains(&settings.attribution_window_hours) {
        return Err(DeskError::Validation(format!(
            "attributionWindowHours must be within 1..={}",
            MAX_ATTRIBUTION_WINDOW_HOURS
        )));
    }
    if settings.high_intent_threshold > 100 {
        return Err(DeskError::Validation("highIntentThreshold must be within 0..=100".to_string()));
    }
    if settings.maintenance_interval_secs == 0 {
        return Err(DeskError::Validation("maintenanceIntervalSecs must be at least 1".to_string()));
    }
    Ok(())
}

fn get_agent_with(conn: &Connection, agent_id: &str) -> DeskResult<Option<Agent>> {
    conn.query_row(
        "SELECT id, agency_id, role, utc_offset_minutes, created_at FROM agents WHERE id = ?1",
        [agent_id],
        parse_agent_row,
    )
    .optional()
    .map_err(DeskError::from)
}

pub(crate) const CALL_COLUMNS: &str = "id, agency_id, agent_id, external_phone, duration_secs, transcript, \
     is_high_intent, carrier_mc, carrier_dot, load_id, started_at, ended_at";

fn parse_agent_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Agent> {
    let role_raw: String = row.get(2)?;
    Ok(Agent {
        id: row.get(0)?,
        agency_id: row.get(1)?,
        role: AgentRole::parse(&role_raw).ok_or_else(|| invalid_column(2, format!("Unknown role '{}'", role_raw)))?,
        utc_offset_minutes: row.get(3)?,
        created_at: parse_time(&row.get::<_, String>(4)?)?,
    })
}

pub(crate) fn parse_call_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CallRecord> {
    Ok(CallRecord {
        id: row.get(0)?,
        agency_id: row.get(1)?,
        agent_id: row.get(2)?,
        external_phone: row.get(3)?,
        duration_secs: row.get(4)?,
        transcript: row.get(5)?,
        is_high_intent: row.get(6)?,
        carrier_mc: row.get(7)?,
        carrier_dot: row.get(8)?,
        load_id: row.get(9)?,
        started_at: parse_time(&row.get::<_, String>(10)?)?,
        ended_at: parse_optional_time(row.get(11)?)?,
    })
}

pub(crate) fn collect_rows<T>(
    rows: impl Iterator<Item = rusqlite::Result<T>>,
) -> DeskResult<Vec<T>> {
    let mut items = Vec::new();
    for row in rows {
        items.push(row?);
    }
    Ok(items)
}

/// Fixed-width UTC timestamps so string comparison in SQL orders correctly.
pub(crate) fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn invalid_column(index: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        index,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, message)),
    )
}

pub(crate) fn parse_time(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|error| invalid_column(0, error.to_string()))
}

pub(crate) fn parse_optional_time(raw: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    raw.map(|raw| parse_time(&raw)).transpose()
}

fn merge_json(target: &mut serde_json::Value, update: serde_json::Value) {
    match (target, update) {
        (serde_json::Value::Object(target_map), serde_json::Value::Object(update_map)) => {
            for (key, value) in update_map {
                merge_json(target_map.entry(key).or_insert(serde_json::Value::Null), value);
            }
        }
        (target, update) => {
            *target = update;
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::{ts, Database, MAX_ATTRIBUTION_WINDOW_HOURS};
    use crate::errors::DeskError;
    use crate::models::{Agent, AgentRole, NewCall, SeriesBucket};
    use chrono::{DateTime, Duration, TimeZone, Utc};

    pub(crate) fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 15, 0, 0).single().expect("valid time")
    }

    pub(crate) fn agent(id: &str, role: AgentRole) -> Agent {
        Agent {
            id: id.to_string(),
            agency_id: "agency-1".to_string(),
            role,
            utc_offset_minutes: 0,
            created_at: now() - Duration::days(30),
        }
    }

    pub(crate) fn open_db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::new(&dir.path().join("desk.db")).expect("db");
        (dir, db)
    }

    #[test]
    fn timestamps_sort_as_strings() {
        let earlier = now();
        let later = earlier + Duration::microseconds(1);
        assert!(ts(earlier) < ts(later));
        assert_eq!(ts(earlier), "2026-03-02T15:00:00.000000Z");
    }

    #[test]
    fn settings_default_and_merge_partial_updates() {
        let (_dir, db) = open_db();
        let defaults = db.get_settings().expect("settings");
        assert_eq!(defaults.attribution_window_hours, 24);

        let updated = db
            .update_settings(serde_json::json!({ "attributionWindowHours": 6, "seriesBucket": "day" }))
            .expect("update");
        assert_eq!(updated.attribution_window_hours, 6);
        assert_eq!(updated.series_bucket, SeriesBucket::Day);
        assert_eq!(updated.high_intent_threshold, 70);
        assert_eq!(db.get_settings().expect("reload"), updated);

        let rejected = db.update_settings(serde_json::json!({ "attributionWindowHours": 0 }));
        assert!(rejected.is_err());
    }

    #[test]
    fn attribution_window_is_capped_at_a_year() {
        let (_dir, db) = open_db();
        let at_cap = db
            .update_settings(serde_json::json!({ "attributionWindowHours": MAX_ATTRIBUTION_WINDOW_HOURS }))
            .expect("one year");
        assert_eq!(at_cap.attribution_window_hours, 8_760);

        let err = db
            .update_settings(serde_json::json!({ "attributionWindowHours": 4_000_000_000u32 }))
            .expect_err("too wide");
        assert!(matches!(err, DeskError::Validation(_)));
        assert_eq!(db.get_settings().expect("reload").attribution_window_hours, 8_760);
    }

    #[test]
    fn agents_upsert_and_calls_list_by_window() {
        let (_dir, db) = open_db();
        let mut admin = agent("admin-1", AgentRole::Admin);
        db.upsert_agent(&admin).expect("insert agent");
        admin.utc_offset_minutes = -300;
        let stored = db.upsert_agent(&admin).expect("update agent");
        assert_eq!(stored.utc_offset_minutes, -300);
        assert!(stored.is_admin());
        assert_eq!(db.list_agents(Some("agency-1")).expect("list").len(), 1);

        for minutes_ago in [90, 30] {
            db.insert_call(
                NewCall {
                    agency_id: "agency-1".to_string(),
                    external_phone: "+15550100".to_string(),
                    started_at: Some(now() - Duration::minutes(minutes_ago)),
                    ..NewCall::default()
                },
                now(),
            )
            .expect("insert call");
        }
        let recent = db
            .list_calls_between(Some("agency-1"), now() - Duration::hours(1), now())
            .expect("list calls");
        assert_eq!(recent.len(), 1);
        assert!(db.get_call(&recent[0].id).expect("get").is_some());
    }
}
