use super::entities::{get_lead_with, not_found};
use super::{collect_rows, invalid_column, parse_optional_time, parse_time, ts, Database};
use crate::errors::{DeskError, DeskResult};
use crate::keywords::{breakdown_for, check_quota, KeywordHit, QuotaUsage};
use crate::models::{
    Agent, EntityType, Keyword, KeywordMatchEvent, KeywordScope, KeywordStats, KeywordType, Lead, MatchType,
    MatchedKeyword, KEYWORD_TTL_HOURS,
};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

const KEYWORD_COLUMNS: &str = "id, agency_id, keyword, keyword_type, scope, owner_agent_id, created_by, match_type, \
     weight, active, created_at, expires_at, deleted_at";

const EVENT_COLUMNS: &str = "id, keyword_id, keyword, scope, owner_agent_id, weight, agency_id, lead_id, call_id, \
     matched_at, booked, booked_at";

/// A validated keyword about to be written.
#[derive(Debug, Clone)]
pub struct KeywordDraft {
    pub keyword: String,
    pub keyword_type: KeywordType,
    pub scope: KeywordScope,
    pub match_type: MatchType,
    pub weight: f64,
}

impl Database {
    /// Inserts a keyword after re-counting the caps inside the same IMMEDIATE
    /// transaction, so two concurrent adds cannot both squeeze under a cap.
    pub fn insert_keyword(
        &self,
        author: &Agent,
        draft: KeywordDraft,
        local_day_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> DeskResult<Keyword> {
        if draft.scope == KeywordScope::Global && !author.is_admin() {
            return Err(DeskError::Forbidden("only admins may add global keywords".to_string()));
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let owner_agent_id = match draft.scope {
            KeywordScope::Agent => Some(author.id.clone()),
            KeywordScope::Global => None,
        };
        let duplicate: i64 = tx.query_row(
            "SELECT COUNT(1) FROM keywords
             WHERE agency_id = ?1 AND scope = ?2 AND keyword = ?3
               AND (?4 IS NULL OR owner_agent_id = ?4)
               AND active = 1 AND deleted_at IS NULL AND expires_at > ?5",
            params![author.agency_id, draft.scope.as_str(), draft.keyword, owner_agent_id, ts(now)],
            |row| row.get(0),
        )?;
        if duplicate > 0 {
            return Err(DeskError::Validation(format!("keyword '{}' is already active", draft.keyword)));
        }

        let usage = QuotaUsage {
            active_personal: count_active_with(&tx, KeywordScope::Agent, &author.id, now)?,
            active_global: count_active_with(&tx, KeywordScope::Global, &author.agency_id, now)?,
            added_today: tx.query_row(
                "SELECT COUNT(1) FROM keywords WHERE created_by = ?1 AND created_at >= ?2",
                params![author.id, ts(local_day_start)],
                |row| row.get(0),
            )?,
        };
        check_quota(draft.scope, usage).map_err(DeskError::QuotaExceeded)?;

        let keyword = Keyword {
            id: Uuid::new_v4().to_string(),
            agency_id: author.agency_id.clone(),
            keyword: draft.keyword,
            keyword_type: draft.keyword_type,
            scope: draft.scope,
            owner_agent_id,
            created_by: author.id.clone(),
            match_type: draft.match_type,
            weight: draft.weight,
            active: true,
            created_at: now,
            expires_at: now + Duration::hours(KEYWORD_TTL_HOURS),
            deleted_at: None,
        };
        tx.execute(
            "INSERT INTO keywords (
               id, agency_id, keyword, keyword_type, scope, owner_agent_id, created_by, match_type,
               weight, active, created_at, expires_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 1, ?10, ?11)",
            params![
                keyword.id,
                keyword.agency_id,
                keyword.keyword,
                keyword.keyword_type.as_str(),
                keyword.scope.as_str(),
                keyword.owner_agent_id,
                keyword.created_by,
                keyword.match_type.as_str(),
                keyword.weight,
                ts(keyword.created_at),
                ts(keyword.expires_at),
            ],
        )?;
        tx.commit()?;
        Ok(keyword)
    }

    /// Live keywords for a scope owner: an agent id for `agent`, an agency id
    /// for `global`.
    pub fn count_active_keywords(&self, scope: KeywordScope, owner_id: &str, now: DateTime<Utc>) -> DeskResult<i64> {
        let conn = self.lock()?;
        count_active_with(&conn, scope, owner_id, now)
    }

    pub fn get_keyword(&self, keyword_id: &str) -> DeskResult<Option<Keyword>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {} FROM keywords WHERE id = ?1", KEYWORD_COLUMNS),
            [keyword_id],
            parse_keyword_row,
        )
        .optional()
        .map_err(DeskError::from)
    }

    /// Soft delete; the row keeps counting toward the daily add cap.
    pub fn delete_keyword(&self, actor: &Agent, keyword_id: &str, now: DateTime<Utc>) -> DeskResult<bool> {
        let keyword = self
            .get_keyword(keyword_id)?
            .ok_or_else(|| DeskError::NotFound(format!("keyword {}", keyword_id)))?;
        if keyword.agency_id != actor.agency_id {
            return Err(DeskError::Forbidden("keyword belongs to another agency".to_string()));
        }
        match keyword.scope {
            KeywordScope::Agent if keyword.owner_agent_id.as_deref() != Some(actor.id.as_str()) => {
                return Err(DeskError::Forbidden("only the owner may delete a personal keyword".to_string()));
            }
            KeywordScope::Global if !actor.is_admin() => {
                return Err(DeskError::Forbidden("only admins may delete global keywords".to_string()));
            }
            _ => {}
        }

        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE keywords SET active = 0, deleted_at = ?1 WHERE id = ?2 AND deleted_at IS NULL",
            params![ts(now), keyword_id],
        )?;
        Ok(changed > 0)
    }

    /// Keywords the viewer can see that have not expired or been deleted.
    pub fn list_live_keywords(&self, viewer: &Agent, now: DateTime<Utc>) -> DeskResult<Vec<Keyword>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM keywords
             WHERE agency_id = ?1 AND (scope = 'global' OR owner_agent_id = ?2)
               AND active = 1 AND deleted_at IS NULL AND expires_at > ?3
             ORDER BY scope ASC, created_at ASC",
            KEYWORD_COLUMNS
        ))?;
        let rows = stmt.query_map(params![viewer.agency_id, viewer.id, ts(now)], parse_keyword_row)?;
        collect_rows(rows)
    }

    /// Raises the lead's intent score to the match floor, marks it high intent,
    /// swaps in the keyword breakdown and records one event per hit.
    pub fn apply_keyword_matches(
        &self,
        lead_id: &str,
        call_id: Option<&str>,
        hits: &[KeywordHit],
        now: DateTime<Utc>,
    ) -> DeskResult<(Lead, Vec<KeywordMatchEvent>)> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let lead = get_lead_with(&tx, lead_id)?.ok_or_else(|| not_found(EntityType::Lead, lead_id))?;
        if hits.is_empty() {
            return Ok((lead, Vec::new()));
        }

        let score = hits
            .iter()
            .map(|hit| hit.adjustment.apply(lead.intent_score))
            .max()
            .unwrap_or(0);
        let breakdown = serde_json::to_string(&breakdown_for(hits, now))?;
        tx.execute(
            "UPDATE leads SET intent_score = ?1, is_high_intent = 1, intent_reason_json = ?2, updated_at = ?3
             WHERE id = ?4",
            params![score, breakdown, ts(now), lead_id],
        )?;

        let mut events = Vec::with_capacity(hits.len());
        for hit in hits {
            let owner_agent_id: Option<String> = tx
                .query_row(
                    "SELECT owner_agent_id FROM keywords WHERE id = ?1",
                    [&hit.keyword.keyword_id],
                    |row| row.get(0),
                )
                .optional()?
                .flatten();
            let event = KeywordMatchEvent {
                id: Uuid::new_v4().to_string(),
                keyword_id: hit.keyword.keyword_id.clone(),
                keyword: hit.keyword.keyword.clone(),
                scope: hit.keyword.scope,
                owner_agent_id,
                weight: hit.keyword.weight,
                agency_id: lead.agency_id.clone(),
                lead_id: lead.id.clone(),
                call_id: call_id.map(ToString::to_string),
                matched_at: now,
                booked: false,
                booked_at: None,
            };
            tx.execute(
                &format!(
                    "INSERT INTO keyword_match_events ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 0, NULL)",
                    EVENT_COLUMNS
                ),
                params![
                    event.id,
                    event.keyword_id,
                    event.keyword,
                    event.scope.as_str(),
                    event.owner_agent_id,
                    event.weight,
                    event.agency_id,
                    event.lead_id,
                    event.call_id,
                    ts(event.matched_at),
                ],
            )?;
            events.push(event);
        }

        let updated = get_lead_with(&tx, lead_id)?.ok_or_else(|| not_found(EntityType::Lead, lead_id))?;
        tx.commit()?;
        Ok((updated, events))
    }

    pub fn list_match_events(&self, lead_id: &str) -> DeskResult<Vec<KeywordMatchEvent>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM keyword_match_events WHERE lead_id = ?1 ORDER BY matched_at ASC, id ASC",
            EVENT_COLUMNS
        ))?;
        let rows = stmt.query_map([lead_id], parse_event_row)?;
        collect_rows(rows)
    }

    /// Recorded matches per lead as the viewer sees them: other agents'
    /// personal keywords are left out.
    pub fn matched_keywords_by_lead(
        &self,
        viewer: &Agent,
        lead_ids: &[String],
    ) -> DeskResult<HashMap<String, Vec<MatchedKeyword>>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM keyword_match_events WHERE lead_id = ?1 ORDER BY matched_at ASC, id ASC",
            EVENT_COLUMNS
        ))?;

        let mut by_lead = HashMap::new();
        for lead_id in lead_ids {
            let rows = stmt.query_map([lead_id], parse_event_row)?;
            let mut seen = HashSet::new();
            let mut matches = Vec::new();
            for event in collect_rows(rows)? {
                let visible = match event.scope {
                    KeywordScope::Global => true,
                    KeywordScope::Agent => event.owner_agent_id.as_deref() == Some(viewer.id.as_str()),
                };
                if visible && seen.insert(event.keyword_id.clone()) {
                    matches.push(MatchedKeyword {
                        keyword_id: event.keyword_id,
                        keyword: event.keyword,
                        scope: event.scope,
                        weight: event.weight,
                    });
                }
            }
            if !matches.is_empty() {
                by_lead.insert(lead_id.clone(), matches);
            }
        }
        Ok(by_lead)
    }

    pub fn keyword_stats(&self, agency_id: &str) -> DeskResult<Vec<KeywordStats>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT k.id, k.keyword, k.scope, COUNT(e.id), COALESCE(SUM(e.booked), 0)
             FROM keywords k
             LEFT JOIN keyword_match_events e ON e.keyword_id = k.id
             WHERE k.agency_id = ?1
             GROUP BY k.id, k.keyword, k.scope
             ORDER BY COUNT(e.id) DESC, k.keyword ASC",
        )?;
        let rows = stmt.query_map([agency_id], |row| {
            let scope_raw: String = row.get(2)?;
            let match_count: i64 = row.get(3)?;
            let booked_count: i64 = row.get(4)?;
            Ok(KeywordStats {
                keyword_id: row.get(0)?,
                keyword: row.get(1)?,
                scope: KeywordScope::parse(&scope_raw)
                    .ok_or_else(|| invalid_column(2, format!("Unknown keyword scope '{}'", scope_raw)))?,
                match_count,
                booked_count,
                conversion_rate: if match_count == 0 {
                    0.0
                } else {
                    booked_count as f64 / match_count as f64
                },
            })
        })?;
        collect_rows(rows)
    }
}

fn count_active_with(conn: &Connection, scope: KeywordScope, owner_id: &str, now: DateTime<Utc>) -> DeskResult<i64> {
    let owner_column = match scope {
        KeywordScope::Agent => "owner_agent_id",
        KeywordScope::Global => "agency_id",
    };
    conn.query_row(
        &format!(
            "SELECT COUNT(1) FROM keywords
             WHERE scope = ?1 AND {} = ?2 AND active = 1 AND deleted_at IS NULL AND expires_at > ?3",
            owner_column
        ),
        params![scope.as_str(), owner_id, ts(now)],
        |row| row.get(0),
    )
    .map_err(DeskError::from)
}

pub(super) fn mark_events_booked(conn: &Connection, lead_id: &str, now: DateTime<Utc>) -> DeskResult<usize> {
    conn.execute(
        "UPDATE keyword_match_events SET booked = 1, booked_at = ?1 WHERE lead_id = ?2 AND booked = 0",
        params![ts(now), lead_id],
    )
    .map_err(DeskError::from)
}

pub(super) fn reset_events_booked(conn: &Connection, lead_id: &str) -> DeskResult<usize> {
    conn.execute(
        "UPDATE keyword_match_events SET booked = 0, booked_at = NULL WHERE lead_id = ?1",
        [lead_id],
    )
    .map_err(DeskError::from)
}

fn parse_keyword_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Keyword> {
    let type_raw: String = row.get(3)?;
    let scope_raw: String = row.get(4)?;
    let match_raw: String = row.get(7)?;
    Ok(Keyword {
        id: row.get(0)?,
        agency_id: row.get(1)?,
        keyword: row.get(2)?,
        keyword_type: KeywordType::parse(&type_raw)
            .ok_or_else(|| invalid_column(3, format!("Unknown keyword type '{}'", type_raw)))?,
        scope: KeywordScope::parse(&scope_raw)
            .ok_or_else(|| invalid_column(4, format!("Unknown keyword scope '{}'", scope_raw)))?,
        owner_agent_id: row.get(5)?,
        created_by: row.get(6)?,
        match_type: MatchType::parse(&match_raw)
            .ok_or_else(|| invalid_column(7, format!("Unknown match type '{}'", match_raw)))?,
        weight: row.get(8)?,
        active: row.get(9)?,
        created_at: parse_time(&row.get::<_, String>(10)?)?,
        expires_at: parse_time(&row.get::<_, String>(11)?)?,
        deleted_at: parse_optional_time(row.get(12)?)?,
    })
}

fn parse_event_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<KeywordMatchEvent> {
    let scope_raw: String = row.get(3)?;
    Ok(KeywordMatchEvent {
        id: row.get(0)?,
        keyword_id: row.get(1)?,
        keyword: row.get(2)?,
        scope: KeywordScope::parse(&scope_raw)
            .ok_or_else(|| invalid_column(3, format!("Unknown keyword scope '{}'", scope_raw)))?,
        owner_agent_id: row.get(4)?,
        weight: row.get(5)?,
        agency_id: row.get(6)?,
        lead_id: row.get(7)?,
        call_id: row.get(8)?,
        matched_at: parse_time(&row.get::<_, String>(9)?)?,
        booked: row.get(10)?,
        booked_at: parse_optional_time(row.get(11)?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::KeywordDraft;
    use crate::db::tests::{agent, now, open_db};
    use crate::errors::DeskError;
    use crate::keywords::{IntentAdjustment, KeywordHit};
    use crate::models::{
        AgentRole, KeywordScope, KeywordType, MatchType, MatchedKeyword, NewLead, QuotaKind,
    };
    use chrono::Duration;

    fn draft(text: &str, scope: KeywordScope) -> KeywordDraft {
        KeywordDraft {
            keyword: text.to_string(),
            keyword_type: KeywordType::Custom,
            scope,
            match_type: MatchType::Contains,
            weight: 0.85,
        }
    }

    fn day_start() -> chrono::DateTime<chrono::Utc> {
        now() - Duration::hours(15)
    }

    #[test]
    fn daily_cap_counts_soft_deleted_rows() {
        let (_dir, db) = open_db();
        let author = agent("agent-1", AgentRole::Agent);
        let mut ids = Vec::new();
        for index in 0..10 {
            let keyword = db
                .insert_keyword(&author, draft(&format!("lane {}", index), KeywordScope::Agent), day_start(), now())
                .expect("insert");
            ids.push(keyword.id);
        }
        assert!(db.delete_keyword(&author, &ids[0], now()).expect("delete"));
        assert_eq!(
            db.count_active_keywords(KeywordScope::Agent, "agent-1", now()).expect("count"),
            9
        );

        let err = db
            .insert_keyword(&author, draft("one more", KeywordScope::Agent), day_start(), now())
            .expect_err("daily cap");
        assert!(matches!(err, DeskError::QuotaExceeded(QuotaKind::Daily)));

        let tomorrow = now() + Duration::hours(10);
        db.insert_keyword(&author, draft("one more", KeywordScope::Agent), tomorrow - Duration::hours(1), tomorrow)
            .expect("next local day");
    }

    #[test]
    fn global_keywords_need_an_admin() {
        let (_dir, db) = open_db();
        let plain = agent("agent-1", AgentRole::Agent);
        let err = db
            .insert_keyword(&plain, draft("reefer", KeywordScope::Global), day_start(), now())
            .expect_err("forbidden");
        assert!(matches!(err, DeskError::Forbidden(_)));

        let admin = agent("admin-1", AgentRole::Admin);
        let keyword = db
            .insert_keyword(&admin, draft("reefer", KeywordScope::Global), day_start(), now())
            .expect("admin insert");
        assert!(keyword.owner_agent_id.is_none());
        assert!(matches!(
            db.delete_keyword(&plain, &keyword.id, now()),
            Err(DeskError::Forbidden(_))
        ));
        assert_eq!(db.list_live_keywords(&plain, now()).expect("visible").len(), 1);
        assert!(db.list_live_keywords(&plain, now() + Duration::hours(25)).expect("expired").is_empty());
    }

    #[test]
    fn applying_matches_raises_score_and_records_events() {
        let (_dir, db) = open_db();
        let author = agent("agent-1", AgentRole::Agent);
        let keyword = db
            .insert_keyword(&author, draft("rate", KeywordScope::Agent), day_start(), now())
            .expect("keyword");
        let lead = db
            .insert_lead(
                NewLead {
                    agency_id: "agency-1".to_string(),
                    caller_phone: "+15550100".to_string(),
                    intent_score: Some(40),
                    ..NewLead::default()
                },
                70,
                now(),
            )
            .expect("lead");

        let hit = KeywordHit {
            keyword: MatchedKeyword {
                keyword_id: keyword.id.clone(),
                keyword: keyword.keyword.clone(),
                scope: KeywordScope::Agent,
                weight: keyword.weight,
            },
            adjustment: IntentAdjustment { floor: 85 },
        };
        let (updated, events) = db.apply_keyword_matches(&lead.id, None, &[hit], now()).expect("apply");
        assert_eq!(updated.intent_score, Some(85));
        assert!(updated.is_high_intent);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].owner_agent_id.as_deref(), Some("agent-1"));

        let visible = db
            .matched_keywords_by_lead(&author, &[lead.id.clone()])
            .expect("matches");
        assert_eq!(visible.get(&lead.id).map(Vec::len), Some(1));
        let other = agent("agent-2", AgentRole::Agent);
        assert!(db.matched_keywords_by_lead(&other, &[lead.id.clone()]).expect("other").is_empty());

        let stats = db.keyword_stats("agency-1").expect("stats");
        assert_eq!(stats[0].match_count, 1);
        assert_eq!(stats[0].booked_count, 0);
    }
}
