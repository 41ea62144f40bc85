//! Lead and load rows, and every status transition on them.
//!
//! Each transition is one guarded `UPDATE ... WHERE id = ? AND status IN (...)`
//! whose affected-row count decides success; cross-entity transitions run in a
//! single IMMEDIATE transaction so no half-applied state is ever committed.

use super::keywords::{mark_events_booked, reset_events_booked};
use super::{collect_rows, invalid_column, parse_call_row, parse_optional_time, parse_time, ts, Database, CALL_COLUMNS};
use crate::attribution::find_attribution;
use crate::errors::{DeskError, DeskResult};
use crate::lifecycle::{
    lead_source_names, lead_target, load_allows, load_source_names, load_target, source_names, status_guard,
    Resolution, Transition,
};
use crate::models::{
    AttributionOutcome, BookedSource, Claim, CloseReason, Closure, EntityType, IntentReasonBreakdown, Lead,
    LeadBooking, LeadStatus, Load, LoadBooking, LoadStatus, NewLead, NewLoad, ResolveResult,
};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub(crate) const LEAD_COLUMNS: &str = "id, agency_id, caller_phone, caller_name, caller_company, carrier_mc, \
     carrier_dot, carrier_verified_at, status, intent_score, is_high_intent, intent_reason_json, call_id, load_id, \
     claimed_by, claimed_at, booked_by, booked_at, closed_at, close_reason, resolved_at, callback_requested_at, \
     last_contact_attempt_at, created_at, updated_at";

pub(crate) const LOAD_COLUMNS: &str = "id, agency_id, load_number, pickup_city, pickup_state, destination_city, \
     destination_state, commodity, target_pay, max_pay, target_commission, max_commission, customer_invoice_total, \
     status, claimed_by, claimed_at, booked_by, booked_at, booked_source, booked_lead_id, booked_call_id, closed_at, \
     close_reason, created_at, updated_at";

/// Either side of a claim/release/reopen, as persisted after the transition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "entityType", content = "record", rename_all = "lowercase")]
pub enum EntityRecord {
    Lead(Lead),
    Load(Load),
}

impl EntityRecord {
    pub fn entity_type(&self) -> EntityType {
        match self {
            Self::Lead(_) => EntityType::Lead,
            Self::Load(_) => EntityType::Load,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Lead(lead) => &lead.id,
            Self::Load(load) => &load.id,
        }
    }

    pub fn status(&self) -> &'static str {
        match self {
            Self::Lead(lead) => lead.status.as_str(),
            Self::Load(load) => load.status.as_str(),
        }
    }

    pub fn into_lead(self) -> Option<Lead> {
        match self {
            Self::Lead(lead) => Some(lead),
            Self::Load(_) => None,
        }
    }

    pub fn into_load(self) -> Option<Load> {
        match self {
            Self::Load(load) => Some(load),
            Self::Lead(_) => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CoveredClosure {
    pub load: Load,
    pub closed_leads: Vec<Lead>,
}

impl Database {
    pub fn insert_lead(&self, payload: NewLead, high_intent_threshold: u8, now: DateTime<Utc>) -> DeskResult<Lead> {
        if payload.agency_id.trim().is_empty() {
            return Err(DeskError::Validation("lead requires an agency id".to_string()));
        }
        if payload.caller_phone.trim().is_empty() {
            return Err(DeskError::Validation("lead requires a caller phone".to_string()));
        }
        if payload.intent_score.map(|score| score > 100).unwrap_or(false) {
            return Err(DeskError::Validation("intent score must be within 0..=100".to_string()));
        }

        let conn = self.lock()?;
        if let Some(load_id) = payload.load_id.as_deref() {
            let load = get_load_with(&conn, load_id)?
                .ok_or_else(|| DeskError::Validation(format!("lead references unknown load {}", load_id)))?;
            if load.agency_id != payload.agency_id {
                return Err(DeskError::Validation(format!("load {} belongs to another agency", load_id)));
            }
        }

        let id = Uuid::new_v4().to_string();
        let is_high_intent = payload
            .intent_score
            .map(|score| score >= high_intent_threshold)
            .unwrap_or(false);
        let reasons_json = payload
            .intent_reason_breakdown
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        conn.execute(
            "INSERT INTO leads (
               id, agency_id, caller_phone, caller_name, caller_company, carrier_mc, carrier_dot,
               status, intent_score, is_high_intent, intent_reason_json, call_id, load_id, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14)",
            params![
                id,
                payload.agency_id,
                payload.caller_phone,
                payload.caller_name,
                payload.caller_company,
                payload.carrier_mc,
                payload.carrier_dot,
                LeadStatus::Pending.as_str(),
                payload.intent_score,
                is_high_intent,
                reasons_json,
                payload.call_id,
                payload.load_id,
                ts(now),
            ],
        )?;
        require_lead(&conn, &id)
    }

    pub fn insert_load(&self, payload: NewLoad, now: DateTime<Utc>) -> DeskResult<Load> {
        let load_number = payload.load_number.trim().to_string();
        if payload.agency_id.trim().is_empty() || load_number.is_empty() {
            return Err(DeskError::Validation("load requires an agency id and a load number".to_string()));
        }

        let conn = self.lock()?;
        let id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO loads (
               id, agency_id, load_number, pickup_city, pickup_state, destination_city, destination_state,
               commodity, target_pay, max_pay, target_commission, max_commission, customer_invoice_total,
               status, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?15)",
            params![
                id,
                payload.agency_id,
                load_number,
                payload.pickup_city,
                payload.pickup_state,
                payload.destination_city,
                payload.destination_state,
                payload.commodity,
                payload.target_pay,
                payload.max_pay,
                payload.target_commission,
                payload.max_commission,
                payload.customer_invoice_total,
                LoadStatus::Open.as_str(),
                ts(now),
            ],
        )
        .map_err(|err| duplicate_load_number(err, &load_number))?;
        require_load(&conn, &id)
    }

    pub fn get_lead(&self, lead_id: &str) -> DeskResult<Option<Lead>> {
        let conn = self.lock()?;
        get_lead_with(&conn, lead_id)
    }

    pub fn get_load(&self, load_id: &str) -> DeskResult<Option<Load>> {
        let conn = self.lock()?;
        get_load_with(&conn, load_id)
    }

    /// Leads created in `[start, end)`.
    pub fn list_leads_created_between(
        &self,
        agency_id: Option<&str>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> DeskResult<Vec<Lead>> {
        let conn = self.lock()?;
        query_leads(
            &conn,
            "(?1 IS NULL OR agency_id = ?1) AND created_at >= ?2 AND created_at < ?3 ORDER BY created_at ASC",
            params![agency_id, ts(start), ts(end)],
        )
    }

    /// Pending leads plus the ones this agent already holds.
    pub fn list_actionable_leads(&self, agency_id: &str, agent_id: &str) -> DeskResult<Vec<Lead>> {
        let conn = self.lock()?;
        query_leads(
            &conn,
            "agency_id = ?1 AND (status = 'pending' OR (status = 'claimed' AND claimed_by = ?2))
             ORDER BY created_at ASC",
            params![agency_id, agent_id],
        )
    }

    pub fn list_loads(&self, agency_id: &str, status: Option<LoadStatus>) -> DeskResult<Vec<Load>> {
        let conn = self.lock()?;
        query_loads(
            &conn,
            "agency_id = ?1 AND (?2 IS NULL OR status = ?2) ORDER BY created_at ASC",
            params![agency_id, status.map(LoadStatus::as_str)],
        )
    }

    /// Loads booked in `[start, end)`.
    pub fn list_loads_booked_between(
        &self,
        agency_id: Option<&str>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> DeskResult<Vec<Load>> {
        let conn = self.lock()?;
        query_loads(
            &conn,
            "(?1 IS NULL OR agency_id = ?1) AND booked_at IS NOT NULL AND booked_at >= ?2 AND booked_at < ?3
             ORDER BY booked_at ASC",
            params![agency_id, ts(start), ts(end)],
        )
    }

    pub fn mark_carrier_verified(&self, lead_id: &str, verified_at: DateTime<Utc>) -> DeskResult<Lead> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE leads SET carrier_verified_at = ?1, updated_at = ?1 WHERE id = ?2",
            params![ts(verified_at), lead_id],
        )?;
        if changed == 0 {
            return Err(not_found(EntityType::Lead, lead_id));
        }
        require_lead(&conn, lead_id)
    }

    pub fn claim(&self, entity: EntityType, id: &str, agent_id: &str, now: DateTime<Utc>) -> DeskResult<EntityRecord> {
        let conn = self.lock()?;
        let expected = source_names(entity, Transition::Claim);
        let sql = format!(
            "UPDATE {} SET status = '{}', claimed_by = ?1, claimed_at = ?2, updated_at = ?2
             WHERE id = ?3 AND {}",
            entity.table(),
            target_name(entity, Transition::Claim),
            status_guard(&expected)
        );
        let changed = conn.execute(&sql, params![agent_id, ts(now), id])?;
        if changed == 0 {
            return Err(diagnose(&conn, entity, id, &expected, None));
        }
        read_entity(&conn, entity, id)
    }

    /// Only the agent holding the claim may release it.
    pub fn release(&self, entity: EntityType, id: &str, agent_id: &str, now: DateTime<Utc>) -> DeskResult<EntityRecord> {
        let conn = self.lock()?;
        let expected = source_names(entity, Transition::Release);
        let sql = format!(
            "UPDATE {} SET status = '{}', claimed_by = NULL, claimed_at = NULL, updated_at = ?1
             WHERE id = ?2 AND {} AND claimed_by = ?3",
            entity.table(),
            target_name(entity, Transition::Release),
            status_guard(&expected)
        );
        let changed = conn.execute(&sql, params![ts(now), id, agent_id])?;
        if changed == 0 {
            return Err(diagnose(&conn, entity, id, &expected, Some(agent_id)));
        }
        read_entity(&conn, entity, id)
    }

    /// Full reset to the pending/open baseline. Reopening a booked lead also
    /// drops the load's back-reference to it; reopening a booked load clears
    /// its own booking and leaves any lead alone.
    pub fn reopen(&self, entity: EntityType, id: &str, now: DateTime<Utc>) -> DeskResult<EntityRecord> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let expected = source_names(entity, Transition::Reopen);

        let reset = match entity {
            EntityType::Lead => format!(
                "UPDATE leads SET status = '{}', load_id = NULL, claimed_by = NULL, claimed_at = NULL,
                   booked_by = NULL, booked_at = NULL, closed_at = NULL, close_reason = NULL, resolved_at = NULL,
                   callback_requested_at = NULL, last_contact_attempt_at = NULL, updated_at = ?1
                 WHERE id = ?2 AND {}",
                target_name(entity, Transition::Reopen),
                status_guard(&expected)
            ),
            EntityType::Load => format!(
                "UPDATE loads SET status = '{}', claimed_by = NULL, claimed_at = NULL, booked_by = NULL,
                   booked_at = NULL, booked_source = NULL, booked_lead_id = NULL, booked_call_id = NULL,
                   closed_at = NULL, close_reason = NULL, updated_at = ?1
                 WHERE id = ?2 AND {}",
                target_name(entity, Transition::Reopen),
                status_guard(&expected)
            ),
        };
        let changed = tx.execute(&reset, params![ts(now), id])?;
        if changed == 0 {
            return Err(diagnose(&tx, entity, id, &expected, None));
        }

        if entity == EntityType::Lead {
            tx.execute(
                "UPDATE loads SET booked_lead_id = NULL, updated_at = ?1 WHERE booked_lead_id = ?2",
                params![ts(now), id],
            )?;
            reset_events_booked(&tx, id)?;
        }

        let record = read_entity(&tx, entity, id)?;
        tx.commit()?;
        Ok(record)
    }

    pub fn resolve_lead(
        &self,
        lead_id: &str,
        agent_id: &str,
        resolution: &Resolution,
        now: DateTime<Utc>,
    ) -> DeskResult<ResolveResult> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let lead = get_lead_with(&tx, lead_id)?.ok_or_else(|| not_found(EntityType::Lead, lead_id))?;
        let expected = lead_source_names(resolution.transition());
        let guard = status_guard(&expected);
        let at = ts(now);

        let load = match resolution {
            Resolution::Booked {
                load_id,
                source,
                call_id,
            } => {
                let load = get_load_with(&tx, load_id)?.ok_or_else(|| not_found(EntityType::Load, load_id))?;
                if load.agency_id != lead.agency_id {
                    return Err(DeskError::Validation(format!(
                        "load {} belongs to another agency",
                        load_id
                    )));
                }

                let changed = tx.execute(
                    &format!(
                        "UPDATE leads SET status = '{}', booked_by = ?1, booked_at = ?2, resolved_at = ?2,
                           load_id = ?3, updated_at = ?2
                         WHERE id = ?4 AND {} AND (claimed_by IS NULL OR claimed_by = ?1)",
                        lead_target(Transition::Book, lead.status).as_str(),
                        guard
                    ),
                    params![agent_id, at, load_id, lead_id],
                )?;
                if changed == 0 {
                    return Err(diagnose(&tx, EntityType::Lead, lead_id, &expected, Some(agent_id)));
                }

                let load_expected = load_source_names(Transition::Book);
                let changed = tx.execute(
                    &format!(
                        "UPDATE loads SET status = '{}', booked_by = ?1, booked_at = ?2, booked_source = ?3,
                           booked_lead_id = ?4, booked_call_id = ?5, updated_at = ?2
                         WHERE id = ?6 AND {} AND (claimed_by IS NULL OR claimed_by = ?1)",
                        load_target(Transition::Book, load.status).as_str(),
                        status_guard(&load_expected)
                    ),
                    params![agent_id, at, source.as_str(), lead_id, call_id, load_id],
                )?;
                if changed == 0 {
                    // Dropping the transaction rolls the lead update back.
                    return Err(diagnose(&tx, EntityType::Load, load_id, &load_expected, Some(agent_id)));
                }

                mark_events_booked(&tx, lead_id, now)?;
                Some(require_load(&tx, load_id)?)
            }
            Resolution::Closed { reason } => {
                let changed = tx.execute(
                    &format!(
                        "UPDATE leads SET status = '{}', closed_at = ?1, close_reason = ?2, resolved_at = ?1,
                           updated_at = ?1
                         WHERE id = ?3 AND {} AND (claimed_by IS NULL OR claimed_by = ?4)",
                        lead_target(Transition::Close, lead.status).as_str(),
                        guard
                    ),
                    params![at, reason.as_str(), lead_id, agent_id],
                )?;
                if changed == 0 {
                    return Err(diagnose(&tx, EntityType::Lead, lead_id, &expected, Some(agent_id)));
                }

                match lead.load_id.as_deref() {
                    Some(load_id) => {
                        // A booked or already-closed load keeps its state.
                        tx.execute(
                            &format!(
                                "UPDATE loads SET status = 'closed', closed_at = ?1, close_reason = ?2, updated_at = ?1
                                 WHERE id = ?3 AND {}",
                                status_guard(&load_source_names(Transition::Close))
                            ),
                            params![at, reason.as_str(), load_id],
                        )?;
                        get_load_with(&tx, load_id)?
                    }
                    None => None,
                }
            }
            Resolution::Callback | Resolution::NoAnswer => {
                let column = if matches!(resolution, Resolution::Callback) {
                    "callback_requested_at"
                } else {
                    "last_contact_attempt_at"
                };
                let changed = tx.execute(
                    &format!(
                        "UPDATE leads SET {} = ?1, updated_at = ?1
                         WHERE id = ?2 AND {} AND (claimed_by IS NULL OR claimed_by = ?3)",
                        column, guard
                    ),
                    params![at, lead_id, agent_id],
                )?;
                if changed == 0 {
                    return Err(diagnose(&tx, EntityType::Lead, lead_id, &expected, Some(agent_id)));
                }
                None
            }
        };

        let lead = require_lead(&tx, lead_id)?;
        tx.commit()?;
        Ok(ResolveResult { lead, load })
    }

    /// Closes a load as covered and any still-actionable lead pointing at it.
    pub fn close_load_as_covered(&self, load_id: &str, agent_id: &str, now: DateTime<Utc>) -> DeskResult<CoveredClosure> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let expected = load_source_names(Transition::Close);
        let at = ts(now);
        let reason = CloseReason::Covered.as_str();

        let changed = tx.execute(
            &format!(
                "UPDATE loads SET status = '{}', closed_at = ?1, close_reason = ?2, updated_at = ?1
                 WHERE id = ?3 AND {} AND (claimed_by IS NULL OR claimed_by = ?4)",
                load_target(Transition::Close, LoadStatus::Open).as_str(),
                status_guard(&expected)
            ),
            params![at, reason, load_id, agent_id],
        )?;
        if changed == 0 {
            return Err(diagnose(&tx, EntityType::Load, load_id, &expected, Some(agent_id)));
        }

        let attached = query_leads(
            &tx,
            &format!("load_id = ?1 AND {}", status_guard(&lead_source_names(Transition::Close))),
            params![load_id],
        )?;
        let mut closed_leads = Vec::with_capacity(attached.len());
        for lead in attached {
            let changed = tx.execute(
                &format!(
                    "UPDATE leads SET status = 'closed', closed_at = ?1, close_reason = ?2, resolved_at = ?1,
                       updated_at = ?1
                     WHERE id = ?3 AND {}",
                    status_guard(&lead_source_names(Transition::Close))
                ),
                params![at, reason, lead.id],
            )?;
            if changed > 0 {
                closed_leads.push(require_lead(&tx, &lead.id)?);
            }
        }

        let load = require_load(&tx, load_id)?;
        tx.commit()?;
        Ok(CoveredClosure { load, closed_leads })
    }

    /// Books the load when it is still open/claimed, then links it to the most
    /// plausible lead. An already-booked load without a lead is attributed in
    /// place. A miss leaves the load booked without attribution.
    pub fn attribute_booking(
        &self,
        load_id: &str,
        actor_id: &str,
        source: BookedSource,
        call_id: Option<&str>,
        window: Duration,
        now: DateTime<Utc>,
    ) -> DeskResult<AttributionOutcome> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let load = get_load_with(&tx, load_id)?.ok_or_else(|| not_found(EntityType::Load, load_id))?;
        let at = ts(now);

        match load.status {
            status if load_allows(status, Transition::Book) => {
                let expected = load_source_names(Transition::Book);
                let changed = tx.execute(
                    &format!(
                        "UPDATE loads SET status = '{}', booked_by = ?1, booked_at = ?2, booked_source = ?3,
                           booked_lead_id = NULL, booked_call_id = ?4, updated_at = ?2
                         WHERE id = ?5 AND {} AND (claimed_by IS NULL OR claimed_by = ?1)",
                        load_target(Transition::Book, load.status).as_str(),
                        status_guard(&expected)
                    ),
                    params![actor_id, at, source.as_str(), call_id, load_id],
                )?;
                if changed == 0 {
                    return Err(diagnose(&tx, EntityType::Load, load_id, &expected, Some(actor_id)));
                }
            }
            LoadStatus::Booked if load.booked_lead_id().is_none() => {}
            LoadStatus::Booked => {
                return Err(DeskError::conflict(
                    EntityType::Load,
                    load_id,
                    &["open", "claimed", "booked (unattributed)"],
                    "booked (attributed)",
                ));
            }
            status => {
                return Err(DeskError::conflict(
                    EntityType::Load,
                    load_id,
                    &["open", "claimed", "booked (unattributed)"],
                    status.as_str(),
                ));
            }
        }

        let load = require_load(&tx, load_id)?;
        let booking = load
            .booking
            .clone()
            .ok_or_else(|| DeskError::Internal(format!("load {} booked without a booking record", load_id)))?;

        let candidates = query_leads(
            &tx,
            &format!(
                "agency_id = ?1 AND {}",
                status_guard(&lead_source_names(Transition::Book))
            ),
            params![load.agency_id],
        )?;
        let calls = {
            let mut stmt = tx.prepare(&format!(
                "SELECT {} FROM calls WHERE agency_id = ?1 AND (load_id = ?2 OR id = ?3)",
                CALL_COLUMNS
            ))?;
            let rows = stmt.query_map(params![load.agency_id, load.id, booking.call_id], parse_call_row)?;
            collect_rows(rows)?
        };

        let Some(found) = find_attribution(&load, &candidates, &calls, booking.booked_at, window) else {
            tx.commit()?;
            return Ok(AttributionOutcome {
                load,
                lead: None,
                match_type: None,
            });
        };

        let expected = lead_source_names(Transition::Book);
        let changed = tx.execute(
            &format!(
                "UPDATE leads SET status = '{}', booked_by = ?1, booked_at = ?2, resolved_at = ?3, load_id = ?4,
                   updated_at = ?3
                 WHERE id = ?5 AND {}",
                lead_target(Transition::Book, LeadStatus::Pending).as_str(),
                status_guard(&expected)
            ),
            params![booking.booked_by, ts(booking.booked_at), at, load.id, found.lead_id],
        )?;
        if changed == 0 {
            return Err(diagnose(&tx, EntityType::Lead, &found.lead_id, &expected, None));
        }

        let linked = tx.execute(
            "UPDATE loads SET booked_lead_id = ?1, updated_at = ?2
             WHERE id = ?3 AND status = 'booked' AND booked_lead_id IS NULL",
            params![found.lead_id, at, load.id],
        )?;
        if linked == 0 {
            return Err(DeskError::conflict(
                EntityType::Load,
                load_id,
                &["booked (unattributed)"],
                "booked (attributed)",
            ));
        }
        mark_events_booked(&tx, &found.lead_id, now)?;

        let lead = require_lead(&tx, &found.lead_id)?;
        let load = require_load(&tx, load_id)?;
        tx.commit()?;
        Ok(AttributionOutcome {
            load,
            lead: Some(lead),
            match_type: Some(found.match_type),
        })
    }
}

/// Target status for transitions whose target does not depend on the source.
fn target_name(entity: EntityType, transition: Transition) -> &'static str {
    match entity {
        EntityType::Lead => lead_target(transition, LeadStatus::Pending).as_str(),
        EntityType::Load => load_target(transition, LoadStatus::Open).as_str(),
    }
}

pub(crate) fn not_found(entity: EntityType, id: &str) -> DeskError {
    DeskError::NotFound(format!("{} {}", entity, id))
}

/// Explains why a guarded update touched no rows.
/// `UNIQUE (agency_id, load_number)` is the only uniqueness rule on loads
/// besides the primary key.
fn duplicate_load_number(err: rusqlite::Error, load_number: &str) -> DeskError {
    match err {
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
        {
            DeskError::Validation(format!("load number {} already exists for this agency", load_number))
        }
        other => other.into(),
    }
}

fn diagnose(conn: &Connection, entity: EntityType, id: &str, expected: &[&str], acting_agent: Option<&str>) -> DeskError {
    let current = conn
        .query_row(
            &format!("SELECT status, claimed_by FROM {} WHERE id = ?1", entity.table()),
            [id],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?)),
        )
        .optional();

    match current {
        Err(err) => err.into(),
        Ok(None) => not_found(entity, id),
        Ok(Some((status, claimed_by))) => {
            let holder_differs = match (acting_agent, claimed_by.as_deref()) {
                (Some(agent), Some(holder)) => agent != holder,
                (Some(_), None) => status == "claimed",
                _ => false,
            };
            if expected.contains(&status.as_str()) && holder_differs {
                DeskError::conflict(entity, id, expected, format!("{} (held by another agent)", status))
            } else {
                DeskError::conflict(entity, id, expected, status)
            }
        }
    }
}

fn read_entity(conn: &Connection, entity: EntityType, id: &str) -> DeskResult<EntityRecord> {
    match entity {
        EntityType::Lead => require_lead(conn, id).map(EntityRecord::Lead),
        EntityType::Load => require_load(conn, id).map(EntityRecord::Load),
    }
}

pub(crate) fn get_lead_with(conn: &Connection, lead_id: &str) -> DeskResult<Option<Lead>> {
    conn.query_row(
        &format!("SELECT {} FROM leads WHERE id = ?1", LEAD_COLUMNS),
        [lead_id],
        parse_lead_row,
    )
    .optional()
    .map_err(DeskError::from)
}

pub(crate) fn get_load_with(conn: &Connection, load_id: &str) -> DeskResult<Option<Load>> {
    conn.query_row(
        &format!("SELECT {} FROM loads WHERE id = ?1", LOAD_COLUMNS),
        [load_id],
        parse_load_row,
    )
    .optional()
    .map_err(DeskError::from)
}

fn require_lead(conn: &Connection, lead_id: &str) -> DeskResult<Lead> {
    get_lead_with(conn, lead_id)?.ok_or_else(|| not_found(EntityType::Lead, lead_id))
}

fn require_load(conn: &Connection, load_id: &str) -> DeskResult<Load> {
    get_load_with(conn, load_id)?.ok_or_else(|| not_found(EntityType::Load, load_id))
}

pub(crate) fn query_leads(conn: &Connection, filter: &str, params: impl rusqlite::Params) -> DeskResult<Vec<Lead>> {
    let mut stmt = conn.prepare(&format!("SELECT {} FROM leads WHERE {}", LEAD_COLUMNS, filter))?;
    let rows = stmt.query_map(params, parse_lead_row)?;
    collect_rows(rows)
}

fn query_loads(conn: &Connection, filter: &str, params: impl rusqlite::Params) -> DeskResult<Vec<Load>> {
    let mut stmt = conn.prepare(&format!("SELECT {} FROM loads WHERE {}", LOAD_COLUMNS, filter))?;
    let rows = stmt.query_map(params, parse_load_row)?;
    collect_rows(rows)
}

fn parse_claim(row: &rusqlite::Row<'_>, by: usize, at: usize) -> rusqlite::Result<Option<Claim>> {
    match (row.get::<_, Option<String>>(by)?, parse_optional_time(row.get(at)?)?) {
        (Some(agent_id), Some(claimed_at)) => Ok(Some(Claim { agent_id, claimed_at })),
        (None, None) => Ok(None),
        _ => Err(invalid_column(by, "claimed_by and claimed_at must be set together".to_string())),
    }
}

fn parse_closure(row: &rusqlite::Row<'_>, at: usize, reason: usize) -> rusqlite::Result<Option<Closure>> {
    let closed_at = parse_optional_time(row.get(at)?)?;
    let reason_raw: Option<String> = row.get(reason)?;
    match (closed_at, reason_raw) {
        (Some(closed_at), Some(raw)) => {
            let reason = CloseReason::parse(&raw)
                .ok_or_else(|| invalid_column(reason, format!("Unknown close reason '{}'", raw)))?;
            Ok(Some(Closure { closed_at, reason }))
        }
        (None, None) => Ok(None),
        _ => Err(invalid_column(at, "closed_at and close_reason must be set together".to_string())),
    }
}

fn parse_lead_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Lead> {
    let status_raw: String = row.get(8)?;
    let status = LeadStatus::parse(&status_raw)
        .ok_or_else(|| invalid_column(8, format!("Unknown lead status '{}'", status_raw)))?;
    let intent_score = row
        .get::<_, Option<i64>>(9)?
        .map(|score| u8::try_from(score).map_err(|_| invalid_column(9, format!("intent score {} out of range", score))))
        .transpose()?;
    let breakdown = row
        .get::<_, Option<String>>(11)?
        .map(|raw| {
            serde_json::from_str::<IntentReasonBreakdown>(&raw)
                .map_err(|err| invalid_column(11, format!("invalid intent reason breakdown: {}", err)))
        })
        .transpose()?;

    let booking = match (row.get::<_, Option<String>>(16)?, parse_optional_time(row.get(17)?)?) {
        (Some(booked_by), Some(booked_at)) => Some(LeadBooking { booked_by, booked_at }),
        (None, None) => None,
        _ => return Err(invalid_column(16, "booked_by and booked_at must be set together".to_string())),
    };
    let load_id: Option<String> = row.get(13)?;
    let closure = parse_closure(row, 18, 19)?;

    if status == LeadStatus::Booked && (booking.is_none() || load_id.is_none()) {
        return Err(invalid_column(8, "booked lead without booking or load".to_string()));
    }
    if status == LeadStatus::Closed && closure.is_none() {
        return Err(invalid_column(8, "closed lead without closure".to_string()));
    }

    Ok(Lead {
        id: row.get(0)?,
        agency_id: row.get(1)?,
        caller_phone: row.get(2)?,
        caller_name: row.get(3)?,
        caller_company: row.get(4)?,
        carrier_mc: row.get(5)?,
        carrier_dot: row.get(6)?,
        carrier_verified_at: parse_optional_time(row.get(7)?)?,
        status,
        intent_score,
        is_high_intent: row.get(10)?,
        intent_reason_breakdown: breakdown,
        call_id: row.get(12)?,
        load_id,
        claim: parse_claim(row, 14, 15)?,
        booking,
        closure,
        resolved_at: parse_optional_time(row.get(20)?)?,
        callback_requested_at: parse_optional_time(row.get(21)?)?,
        last_contact_attempt_at: parse_optional_time(row.get(22)?)?,
        created_at: parse_time(&row.get::<_, String>(23)?)?,
        updated_at: parse_time(&row.get::<_, String>(24)?)?,
    })
}

fn parse_load_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Load> {
    let status_raw: String = row.get(13)?;
    let status = LoadStatus::parse(&status_raw)
        .ok_or_else(|| invalid_column(13, format!("Unknown load status '{}'", status_raw)))?;

    let booked_by: Option<String> = row.get(16)?;
    let booked_at = parse_optional_time(row.get(17)?)?;
    let source_raw: Option<String> = row.get(18)?;
    let booking = match (booked_by, booked_at, source_raw) {
        (Some(booked_by), Some(booked_at), Some(raw)) => Some(LoadBooking {
            booked_by,
            booked_at,
            source: BookedSource::parse(&raw)
                .ok_or_else(|| invalid_column(18, format!("Unknown booked source '{}'", raw)))?,
            lead_id: row.get(19)?,
            call_id: row.get(20)?,
        }),
        (None, None, None) => None,
        _ => return Err(invalid_column(16, "load booking fields must be set together".to_string())),
    };
    let closure = parse_closure(row, 21, 22)?;

    if status == LoadStatus::Booked && booking.is_none() {
        return Err(invalid_column(13, "booked load without booking".to_string()));
    }
    if status == LoadStatus::Closed && closure.is_none() {
        return Err(invalid_column(13, "closed load without closure".to_string()));
    }

    Ok(Load {
        id: row.get(0)?,
        agency_id: row.get(1)?,
        load_number: row.get(2)?,
        pickup_city: row.get(3)?,
        pickup_state: row.get(4)?,
        destination_city: row.get(5)?,
        destination_state: row.get(6)?,
        commodity: row.get(7)?,
        target_pay: row.get(8)?,
        max_pay: row.get(9)?,
        target_commission: row.get(10)?,
        max_commission: row.get(11)?,
        customer_invoice_total: row.get(12)?,
        status,
        claim: parse_claim(row, 14, 15)?,
        booking,
        closure,
        created_at: parse_time(&row.get::<_, String>(23)?)?,
        updated_at: parse_time(&row.get::<_, String>(24)?)?,
    })
}
