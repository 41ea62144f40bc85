use super::{collect_rows, invalid_column, parse_time, ts, Database};
use crate::errors::{DeskError, DeskResult};
use crate::models::AgentDailyState;
use chrono::NaiveDate;
use rusqlite::{params, OptionalExtension};

const DAILY_COLUMNS: &str = "agent_id, agency_id, local_date, calls, engaged_calls, leads, booked_leads, \
     high_intent_leads, aei_score, updated_at";

impl Database {
    /// One row per agent and local date; a new local day starts a fresh row.
    pub fn upsert_agent_daily_state(&self, state: &AgentDailyState) -> DeskResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO agent_daily_state (
               agent_id, agency_id, local_date, calls, engaged_calls, leads, booked_leads,
               high_intent_leads, aei_score, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(agent_id, local_date) DO UPDATE SET
               agency_id = excluded.agency_id,
               calls = excluded.calls,
               engaged_calls = excluded.engaged_calls,
               leads = excluded.leads,
               booked_leads = excluded.booked_leads,
               high_intent_leads = excluded.high_intent_leads,
               aei_score = excluded.aei_score,
               updated_at = excluded.updated_at",
            params![
                state.agent_id,
                state.agency_id,
                state.local_date.to_string(),
                state.calls,
                state.engaged_calls,
                state.leads,
                state.booked_leads,
                state.high_intent_leads,
                state.aei_score,
                ts(state.updated_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_agent_daily_state(&self, agent_id: &str, local_date: NaiveDate) -> DeskResult<Option<AgentDailyState>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!(
                "SELECT {} FROM agent_daily_state WHERE agent_id = ?1 AND local_date = ?2",
                DAILY_COLUMNS
            ),
            params![agent_id, local_date.to_string()],
            parse_daily_row,
        )
        .optional()
        .map_err(DeskError::from)
    }

    pub fn list_agent_daily_states(&self, agent_id: &str, limit: u32) -> DeskResult<Vec<AgentDailyState>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM agent_daily_state WHERE agent_id = ?1 ORDER BY local_date DESC LIMIT ?2",
            DAILY_COLUMNS
        ))?;
        let rows = stmt.query_map(params![agent_id, limit], parse_daily_row)?;
        collect_rows(rows)
    }
}

fn parse_daily_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AgentDailyState> {
    let date_raw: String = row.get(2)?;
    let aei: i64 = row.get(8)?;
    Ok(AgentDailyState {
        agent_id: row.get(0)?,
        agency_id: row.get(1)?,
        local_date: NaiveDate::parse_from_str(&date_raw, "%Y-%m-%d")
            .map_err(|err| invalid_column(2, err.to_string()))?,
        calls: row.get(3)?,
        engaged_calls: row.get(4)?,
        leads: row.get(5)?,
        booked_leads: row.get(6)?,
        high_intent_leads: row.get(7)?,
        aei_score: u8::try_from(aei).map_err(|_| invalid_column(8, format!("aei score {} out of range", aei)))?,
        updated_at: parse_time(&row.get::<_, String>(9)?)?,
    })
}

#[cfg(test)]
mod tests {
    use crate::db::tests::{now, open_db};
    use crate::models::AgentDailyState;
    use chrono::{Duration, NaiveDate};

    fn state(date: NaiveDate, calls: i64) -> AgentDailyState {
        AgentDailyState {
            agent_id: "agent-1".to_string(),
            agency_id: "agency-1".to_string(),
            local_date: date,
            calls,
            engaged_calls: 1,
            leads: 1,
            booked_leads: 0,
            high_intent_leads: 1,
            aei_score: 50,
            updated_at: now(),
        }
    }

    #[test]
    fn rows_are_keyed_by_local_date() {
        let (_dir, db) = open_db();
        let today = now().date_naive();
        db.upsert_agent_daily_state(&state(today, 2)).expect("insert");
        db.upsert_agent_daily_state(&state(today, 5)).expect("overwrite");
        db.upsert_agent_daily_state(&state(today + Duration::days(1), 1)).expect("next day");

        let stored = db.get_agent_daily_state("agent-1", today).expect("get").expect("row");
        assert_eq!(stored.calls, 5);
        let history = db.list_agent_daily_states("agent-1", 10).expect("list");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].local_date, today + Duration::days(1));
    }
}
