//! The operations exposed to UI and automation callers.
//!
//! `LeadDesk` owns the store and a clock, validates requests, and logs every
//! state change with caller identifiers masked.

use crate::attribution::normalize_carrier_id;
use crate::db::{CoveredClosure, Database, EntityRecord, KeywordDraft};
use crate::errors::{DeskError, DeskResult};
use crate::keywords::{match_keywords, suggest_from_loads, validate_keyword_text, validate_weight, KeywordHit};
use crate::lifecycle::{source_label, Resolution, Transition};
use crate::masking::{mask_optional, mask_phone, mask_transcript};
use crate::metrics::{aggregate, daily_rollup, local_day_bounds, MetricsFilters, MetricsReport, MetricsWindow};
use crate::models::{
    AddKeywordPayload, Agent, AgentDailyState, AgentRole, AttributionOutcome, BookedSource, CallRecord,
    DeskSettings, EntityType, Keyword, KeywordMatchEvent, KeywordScope, KeywordStats, KeywordSuggestion, Lead,
    Load, LoadStatus, MatchedKeyword, NewCall, NewLead, NewLoad, ResolveLeadPayload, ResolveResult,
    DEFAULT_KEYWORD_WEIGHT,
};
use crate::ranking::{rank_queue, score_lead, LeadScore};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScoreOutcome {
    pub lead: Lead,
    pub hits: Vec<KeywordHit>,
    pub events: Vec<KeywordMatchEvent>,
}

pub struct LeadDesk {
    db: Arc<Database>,
    clock: Clock,
}

impl LeadDesk {
    pub fn open(db_path: &Path) -> DeskResult<Arc<Self>> {
        let db = Arc::new(Database::new(db_path)?);
        Ok(Self::with_clock(db, Arc::new(Utc::now)))
    }

    pub fn with_clock(db: Arc<Database>, clock: Clock) -> Arc<Self> {
        Arc::new(Self { db, clock })
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    pub fn settings(&self) -> DeskResult<DeskSettings> {
        self.db.get_settings()
    }

    pub fn update_settings(&self, update: serde_json::Value) -> DeskResult<DeskSettings> {
        let settings = self.db.update_settings(update)?;
        tracing::info!(
            attribution_window_hours = settings.attribution_window_hours,
            high_intent_threshold = settings.high_intent_threshold,
            "settings updated"
        );
        Ok(settings)
    }

    pub fn register_agent(
        &self,
        agent_id: &str,
        agency_id: &str,
        role: AgentRole,
        utc_offset_minutes: i32,
    ) -> DeskResult<Agent> {
        if !(-14 * 60..=14 * 60).contains(&utc_offset_minutes) {
            return Err(DeskError::Validation(format!(
                "utc offset {} minutes is out of range",
                utc_offset_minutes
            )));
        }
        let created_at = self
            .db
            .get_agent(agent_id)?
            .map(|existing| existing.created_at)
            .unwrap_or_else(|| self.now());
        self.db.upsert_agent(&Agent {
            id: agent_id.trim().to_string(),
            agency_id: agency_id.trim().to_string(),
            role,
            utc_offset_minutes,
            created_at,
        })
    }

    fn require_agent(&self, agent_id: &str) -> DeskResult<Agent> {
        if agent_id.trim().is_empty() {
            return Err(DeskError::Validation("an acting agent id is required".to_string()));
        }
        self.db
            .get_agent(agent_id)?
            .ok_or_else(|| DeskError::NotFound(format!("agent {}", agent_id)))
    }

    pub fn get_lead(&self, lead_id: &str) -> DeskResult<Lead> {
        self.db
            .get_lead(lead_id)?
            .ok_or_else(|| DeskError::NotFound(format!("lead {}", lead_id)))
    }

    pub fn get_load(&self, load_id: &str) -> DeskResult<Load> {
        self.db
            .get_load(load_id)?
            .ok_or_else(|| DeskError::NotFound(format!("load {}", load_id)))
    }

    pub fn create_lead(&self, payload: NewLead) -> DeskResult<Lead> {
        let threshold = self.settings()?.high_intent_threshold;
        let lead = self.db.insert_lead(payload, threshold, self.now())?;
        tracing::info!(
            lead_id = %lead.id,
            agency_id = %lead.agency_id,
            caller = %mask_phone(&lead.caller_phone),
            carrier_mc = %mask_optional(lead.carrier_mc.as_deref()),
            high_intent = lead.is_high_intent,
            "lead created"
        );
        Ok(lead)
    }

    pub fn create_load(&self, payload: NewLoad) -> DeskResult<Load> {
        let load = self.db.insert_load(payload, self.now())?;
        tracing::info!(load_id = %load.id, load_number = %load.load_number, "load imported");
        Ok(load)
    }

    pub fn record_call(&self, payload: NewCall) -> DeskResult<CallRecord> {
        if payload.duration_secs.map(|secs| secs < 0).unwrap_or(false) {
            tracing::warn!(agency_id = %payload.agency_id, "call recorded with negative duration");
        }
        let call = self.db.insert_call(payload, self.now())?;
        let masked_numbers = call
            .transcript
            .as_deref()
            .map(|text| mask_transcript(text).1)
            .unwrap_or(0);
        tracing::info!(
            call_id = %call.id,
            external = %mask_phone(&call.external_phone),
            duration_secs = ?call.duration_secs,
            transcript_numbers = masked_numbers,
            "call recorded"
        );
        Ok(call)
    }

    pub fn mark_carrier_verified(&self, lead_id: &str, verified_at: DateTime<Utc>) -> DeskResult<Lead> {
        let lead = self.db.mark_carrier_verified(lead_id, verified_at)?;
        tracing::info!(
            lead_id = %lead.id,
            carrier_mc = %mask_optional(lead.carrier_mc.as_deref().and_then(normalize_carrier_id).as_deref()),
            "carrier verified"
        );
        Ok(lead)
    }

    pub fn claim(&self, entity: EntityType, id: &str, agent_id: &str) -> DeskResult<EntityRecord> {
        let agent_id = non_empty_agent(agent_id)?;
        let record = self
            .db
            .claim(entity, id, agent_id, self.now())
            .inspect_err(|error| warn_on_conflict(error, entity, id, Some(agent_id), Transition::Claim))?;
        log_transition(&record, Transition::Claim, Some(agent_id));
        Ok(record)
    }

    pub fn release(&self, entity: EntityType, id: &str, agent_id: &str) -> DeskResult<EntityRecord> {
        let agent_id = non_empty_agent(agent_id)?;
        let record = self
            .db
            .release(entity, id, agent_id, self.now())
            .inspect_err(|error| warn_on_conflict(error, entity, id, Some(agent_id), Transition::Release))?;
        log_transition(&record, Transition::Release, Some(agent_id));
        Ok(record)
    }

    pub fn resolve(&self, lead_id: &str, payload: &ResolveLeadPayload) -> DeskResult<ResolveResult> {
        let resolution = Resolution::from_payload(payload)?;
        let transition = resolution.transition();
        let agent_id = payload.agent_id.trim();
        let result = self
            .db
            .resolve_lead(lead_id, agent_id, &resolution, self.now())
            .inspect_err(|error| warn_on_conflict(error, EntityType::Lead, lead_id, Some(agent_id), transition))?;
        tracing::info!(
            entity = %EntityType::Lead,
            id = %lead_id,
            agent_id = %agent_id,
            transition = transition.as_str(),
            from = %source_label(EntityType::Lead, transition),
            to = result.lead.status.as_str(),
            load_id = ?result.load.as_ref().map(|load| load.id.as_str()),
            load_status = ?result.load.as_ref().map(|load| load.status.as_str()),
            "lead resolved"
        );
        Ok(result)
    }

    pub fn reopen(&self, entity: EntityType, id: &str) -> DeskResult<EntityRecord> {
        let record = self
            .db
            .reopen(entity, id, self.now())
            .inspect_err(|error| warn_on_conflict(error, entity, id, None, Transition::Reopen))?;
        log_transition(&record, Transition::Reopen, None);
        Ok(record)
    }

    pub fn close_load_as_covered(&self, load_id: &str, agent_id: &str) -> DeskResult<CoveredClosure> {
        let agent_id = non_empty_agent(agent_id)?;
        let closure = self
            .db
            .close_load_as_covered(load_id, agent_id, self.now())
            .inspect_err(|error| warn_on_conflict(error, EntityType::Load, load_id, Some(agent_id), Transition::Close))?;
        tracing::info!(
            entity = %EntityType::Load,
            id = %load_id,
            agent_id = %agent_id,
            transition = Transition::Close.as_str(),
            from = %source_label(EntityType::Load, Transition::Close),
            to = closure.load.status.as_str(),
            closed_leads = closure.closed_leads.len(),
            "load closed as covered"
        );
        Ok(closure)
    }

    pub fn attribute_booking(
        &self,
        load_id: &str,
        actor_id: &str,
        source: BookedSource,
        call_id: Option<&str>,
    ) -> DeskResult<AttributionOutcome> {
        let actor_id = non_empty_agent(actor_id)?;
        let window = Duration::hours(i64::from(self.settings()?.attribution_window_hours));
        let outcome = self
            .db
            .attribute_booking(load_id, actor_id, source, call_id, window, self.now())
            .inspect_err(|error| warn_on_conflict(error, EntityType::Load, load_id, Some(actor_id), Transition::Book))?;
        match (&outcome.lead, outcome.match_type) {
            (Some(lead), Some(match_type)) => tracing::info!(
                entity = %EntityType::Load,
                id = %load_id,
                agent_id = %actor_id,
                transition = Transition::Book.as_str(),
                from = %source_label(EntityType::Load, Transition::Book),
                to = outcome.load.status.as_str(),
                lead_id = %lead.id,
                match_type = match_type.as_str(),
                "booking attributed"
            ),
            _ => tracing::info!(
                entity = %EntityType::Load,
                id = %load_id,
                agent_id = %actor_id,
                to = outcome.load.status.as_str(),
                "booking left unattributed"
            ),
        }
        Ok(outcome)
    }

    /// Matches free text against the keywords visible to `agent_id`.
    pub fn score_keywords(&self, text: &str, agent_id: &str) -> DeskResult<Vec<KeywordHit>> {
        let agent = self.require_agent(agent_id)?;
        let now = self.now();
        let keywords = self.db.list_live_keywords(&agent, now)?;
        Ok(match_keywords(text, &keywords, &agent, now))
    }

    pub fn score_and_apply(
        &self,
        lead_id: &str,
        agent_id: &str,
        call_id: Option<&str>,
        text: &str,
    ) -> DeskResult<ScoreOutcome> {
        let agent = self.require_agent(agent_id)?;
        let lead = self.get_lead(lead_id)?;
        if lead.agency_id != agent.agency_id {
            return Err(DeskError::Forbidden("lead belongs to another agency".to_string()));
        }

        let now = self.now();
        let keywords = self.db.list_live_keywords(&agent, now)?;
        let hits = match_keywords(text, &keywords, &agent, now);
        if hits.is_empty() {
            return Ok(ScoreOutcome {
                lead,
                hits,
                events: Vec::new(),
            });
        }

        let (lead, events) = self.db.apply_keyword_matches(lead_id, call_id, &hits, now)?;
        tracing::info!(
            lead_id = %lead_id,
            agent_id = %agent.id,
            matches = hits.len(),
            intent_score = ?lead.intent_score,
            "keyword matches applied"
        );
        Ok(ScoreOutcome { lead, hits, events })
    }

    pub fn add_keyword(&self, agent_id: &str, payload: AddKeywordPayload) -> DeskResult<Keyword> {
        let agent = self.require_agent(agent_id)?;
        let draft = KeywordDraft {
            keyword: validate_keyword_text(&payload.keyword)?,
            keyword_type: payload.keyword_type.unwrap_or_default(),
            scope: payload.scope,
            match_type: payload.match_type.unwrap_or_default(),
            weight: validate_weight(payload.weight.unwrap_or(DEFAULT_KEYWORD_WEIGHT))?,
        };

        let now = self.now();
        let (_, day_start, _) = local_day_bounds(now, agent.utc_offset_minutes);
        match self.db.insert_keyword(&agent, draft, day_start, now) {
            Ok(keyword) => {
                tracing::info!(
                    keyword_id = %keyword.id,
                    agent_id = %agent.id,
                    scope = keyword.scope.as_str(),
                    "keyword added"
                );
                Ok(keyword)
            }
            Err(DeskError::QuotaExceeded(kind)) => {
                tracing::warn!(agent_id = %agent.id, quota = kind.as_str(), "keyword quota exceeded");
                Err(DeskError::QuotaExceeded(kind))
            }
            Err(error) => Err(error),
        }
    }

    pub fn delete_keyword(&self, agent_id: &str, keyword_id: &str) -> DeskResult<bool> {
        let agent = self.require_agent(agent_id)?;
        let deleted = self.db.delete_keyword(&agent, keyword_id, self.now())?;
        if deleted {
            tracing::info!(keyword_id = %keyword_id, agent_id = %agent.id, "keyword deleted");
        }
        Ok(deleted)
    }

    pub fn list_active_keywords(&self, agent_id: &str) -> DeskResult<Vec<Keyword>> {
        let agent = self.require_agent(agent_id)?;
        self.db.list_live_keywords(&agent, self.now())
    }

    pub fn keyword_suggestions(&self, agent_id: &str) -> DeskResult<Vec<KeywordSuggestion>> {
        let agent = self.require_agent(agent_id)?;
        let loads = self.db.list_loads(&agent.agency_id, Some(LoadStatus::Open))?;
        let existing = self.db.list_live_keywords(&agent, self.now())?;
        Ok(suggest_from_loads(&loads, &existing))
    }

    pub fn accept_suggestion(
        &self,
        agent_id: &str,
        suggestion: &KeywordSuggestion,
        scope: KeywordScope,
    ) -> DeskResult<Keyword> {
        self.add_keyword(
            agent_id,
            AddKeywordPayload {
                keyword: suggestion.keyword.clone(),
                keyword_type: Some(suggestion.keyword_type),
                scope,
                match_type: None,
                weight: None,
            },
        )
    }

    pub fn keyword_stats(&self, agency_id: &str) -> DeskResult<Vec<KeywordStats>> {
        self.db.keyword_stats(agency_id)
    }

    pub fn rank_lead(&self, lead: &Lead, matches: &[MatchedKeyword]) -> LeadScore {
        score_lead(lead, matches, self.now())
    }

    /// The agent's work queue: pending leads plus its own claims, best first.
    pub fn rank_queue(&self, agent_id: &str) -> DeskResult<Vec<LeadScore>> {
        let agent = self.require_agent(agent_id)?;
        let leads = self.db.list_actionable_leads(&agent.agency_id, &agent.id)?;
        let lead_ids = leads.iter().map(|lead| lead.id.clone()).collect::<Vec<_>>();
        let matches = self.db.matched_keywords_by_lead(&agent, &lead_ids)?;
        Ok(rank_queue(&leads, &matches, self.now()))
    }

    pub fn aggregate_metrics(&self, window: MetricsWindow, filters: &MetricsFilters) -> DeskResult<MetricsReport> {
        let agency = filters.agency_id.as_deref();
        let calls = self.db.list_calls_between(agency, window.start, window.end)?;
        let leads = self.db.list_leads_created_between(agency, window.start, window.end)?;
        let loads = self.db.list_loads_booked_between(agency, window.start, window.end)?;
        let bucket = self.settings()?.series_bucket;

        let report = aggregate(&calls, &leads, &loads, window, filters, bucket);
        if !report.warnings.is_empty() {
            tracing::warn!(
                warnings = report.warnings.len(),
                agency_id = ?filters.agency_id,
                "metrics aggregated with data-quality warnings"
            );
        }
        Ok(report)
    }

    /// Recomputes the agent's row for its current local day.
    pub fn refresh_agent_daily_state(&self, agent_id: &str) -> DeskResult<AgentDailyState> {
        let agent = self.require_agent(agent_id)?;
        let now = self.now();
        let (_, start, end) = local_day_bounds(now, agent.utc_offset_minutes);
        let calls = self.db.list_calls_between(Some(&agent.agency_id), start, end)?;
        let leads = self.db.list_leads_created_between(Some(&agent.agency_id), start, end)?;

        let state = daily_rollup(&agent, &calls, &leads, now);
        self.db.upsert_agent_daily_state(&state)?;
        tracing::debug!(
            agent_id = %agent.id,
            local_date = %state.local_date,
            aei_score = state.aei_score,
            "agent daily state refreshed"
        );
        Ok(state)
    }

    pub fn refresh_all_daily_states(&self) -> DeskResult<usize> {
        let agents = self.db.list_agents(None)?;
        let mut refreshed = 0;
        for agent in agents {
            match self.refresh_agent_daily_state(&agent.id) {
                Ok(_) => refreshed += 1,
                Err(error) => {
                    tracing::warn!(agent_id = %agent.id, error = %error, "daily state refresh failed");
                }
            }
        }
        Ok(refreshed)
    }
}

fn non_empty_agent(agent_id: &str) -> DeskResult<&str> {
    let trimmed = agent_id.trim();
    if trimmed.is_empty() {
        return Err(DeskError::Validation("an acting agent id is required".to_string()));
    }
    Ok(trimmed)
}

fn warn_on_conflict(error: &DeskError, entity: EntityType, id: &str, agent_id: Option<&str>, transition: Transition) {
    if error.is_conflict() {
        tracing::warn!(
            entity = %entity,
            id = %id,
            agent_id = agent_id.unwrap_or("-"),
            transition = transition.as_str(),
            error = %error,
            "transition rejected"
        );
    }
}

fn log_transition(record: &EntityRecord, transition: Transition, agent_id: Option<&str>) {
    let entity = record.entity_type();
    tracing::info!(
        entity = %entity,
        id = %record.id(),
        agent_id = agent_id.unwrap_or("-"),
        transition = transition.as_str(),
        from = %source_label(entity, transition),
        to = record.status(),
        "status changed"
    );
}

#[cfg(test)]
mod tests {
    use super::{Clock, LeadDesk};
    use crate::db::Database;
    use crate::errors::DeskError;
    use crate::models::{AddKeywordPayload, AgentRole, EntityType, KeywordScope, LoadStatus, NewLead, NewLoad};
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use std::io;
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::fmt::MakeWriter;

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().expect("logs").extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for CapturedLogs {
        type Writer = CapturedLogs;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    impl CapturedLogs {
        fn events(&self) -> Vec<serde_json::Value> {
            let raw = self.0.lock().expect("logs").clone();
            String::from_utf8(raw)
                .expect("utf8 logs")
                .lines()
                .map(|line| serde_json::from_str(line).expect("json log line"))
                .collect()
        }
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 15, 0, 0).single().expect("valid time")
    }

    fn desk_at(cursor: Arc<Mutex<DateTime<Utc>>>) -> (tempfile::TempDir, Arc<LeadDesk>) {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Arc::new(Database::new(&dir.path().join("desk.db")).expect("db"));
        let clock: Clock = Arc::new(move || *cursor.lock().expect("clock"));
        (dir, LeadDesk::with_clock(db, clock))
    }

    #[test]
    fn empty_agent_id_is_a_validation_error() {
        let (_dir, desk) = desk_at(Arc::new(Mutex::new(start())));
        let err = desk.claim(EntityType::Lead, "lead-1", "  ").expect_err("empty agent");
        assert!(matches!(err, DeskError::Validation(_)));
    }

    #[test]
    fn transitions_log_from_and_to_and_conflicts_log_at_warn() {
        let (_dir, desk) = desk_at(Arc::new(Mutex::new(start())));
        desk.register_agent("agent-1", "agency-1", AgentRole::Agent, 0).expect("agent 1");
        desk.register_agent("agent-2", "agency-1", AgentRole::Agent, 0).expect("agent 2");
        let lead = desk
            .create_lead(NewLead {
                agency_id: "agency-1".to_string(),
                caller_phone: "+15550100".to_string(),
                ..NewLead::default()
            })
            .expect("lead");

        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .json()
            .with_max_level(tracing::Level::INFO)
            .with_writer(logs.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, || {
            desk.claim(EntityType::Lead, &lead.id, "agent-1").expect("claim");
            let lost = desk.claim(EntityType::Lead, &lead.id, "agent-2").expect_err("already claimed");
            assert!(lost.is_conflict());
            let foreign = desk.release(EntityType::Lead, &lead.id, "agent-2").expect_err("not the holder");
            assert!(foreign.is_conflict());
            let early = desk.reopen(EntityType::Lead, &lead.id).expect_err("not terminal");
            assert!(early.is_conflict());
        });

        let events = logs.events();
        let changed = events
            .iter()
            .find(|event| event["fields"]["message"] == "status changed")
            .expect("transition event");
        assert_eq!(changed["level"], "INFO");
        assert_eq!(changed["fields"]["from"], "pending");
        assert_eq!(changed["fields"]["to"], "claimed");
        assert_eq!(changed["fields"]["agent_id"], "agent-1");

        let rejected = events
            .iter()
            .filter(|event| event["fields"]["message"] == "transition rejected")
            .collect::<Vec<_>>();
        assert_eq!(rejected.len(), 3);
        assert!(rejected.iter().all(|event| event["level"] == "WARN"));
        let transitions = rejected
            .iter()
            .map(|event| event["fields"]["transition"].as_str().unwrap_or_default())
            .collect::<Vec<_>>();
        assert_eq!(transitions, ["claim", "release", "reopen"]);
        assert_eq!(rejected[0]["fields"]["agent_id"], "agent-2");
        assert_eq!(rejected[2]["fields"]["agent_id"], "-");
    }

    #[test]
    fn suggestions_skip_active_keywords_and_accepting_one_adds_it() {
        let (_dir, desk) = desk_at(Arc::new(Mutex::new(start())));
        desk.register_agent("agent-1", "agency-1", AgentRole::Agent, 0).expect("agent");
        let load = desk
            .create_load(NewLoad {
                agency_id: "agency-1".to_string(),
                load_number: "LD-42".to_string(),
                pickup_city: Some("Dallas".to_string()),
                destination_city: Some("Memphis".to_string()),
                ..NewLoad::default()
            })
            .expect("load");
        assert_eq!(load.status, LoadStatus::Open);

        desk.add_keyword(
            "agent-1",
            AddKeywordPayload {
                keyword: "Dallas".to_string(),
                keyword_type: None,
                scope: KeywordScope::Agent,
                match_type: None,
                weight: None,
            },
        )
        .expect("keyword");

        let suggestions = desk.keyword_suggestions("agent-1").expect("suggestions");
        assert!(suggestions.iter().all(|suggestion| suggestion.keyword != "dallas"));
        let lane = suggestions
            .iter()
            .find(|suggestion| suggestion.keyword == "dallas to memphis")
            .expect("lane suggestion");
        let keyword = desk
            .accept_suggestion("agent-1", lane, KeywordScope::Agent)
            .expect("accept");
        assert_eq!(keyword.keyword, "dallas to memphis");
        assert_eq!(desk.list_active_keywords("agent-1").expect("list").len(), 2);
    }

    #[test]
    fn daily_state_rolls_over_at_local_midnight() {
        let cursor = Arc::new(Mutex::new(start()));
        let (_dir, desk) = desk_at(cursor.clone());
        desk.register_agent("agent-1", "agency-1", AgentRole::Agent, -300).expect("agent");
        let lead = desk
            .create_lead(NewLead {
                agency_id: "agency-1".to_string(),
                caller_phone: "+15550100".to_string(),
                intent_score: Some(90),
                ..NewLead::default()
            })
            .expect("lead");
        desk.claim(EntityType::Lead, &lead.id, "agent-1").expect("claim");

        let today = desk.refresh_agent_daily_state("agent-1").expect("refresh");
        assert_eq!(today.leads, 1);
        assert_eq!(today.high_intent_leads, 1);

        // 15:00 UTC is 10:00 at UTC-5; fifteen hours later is the next local day.
        *cursor.lock().expect("clock") = start() + Duration::hours(15);
        let tomorrow = desk.refresh_agent_daily_state("agent-1").expect("refresh");
        assert_eq!(tomorrow.local_date, today.local_date + Duration::days(1));
        assert_eq!(tomorrow.leads, 0);
        assert_eq!(desk.refresh_all_daily_states().expect("all"), 1);
    }
}
