//! Legal status edges for leads and loads.
//!
//! The store never mutates a status column without a `WHERE status IN (...)`
//! guard built from these tables, so the edge list here is the single source
//! of truth for what a transition may start from.

use crate::errors::{DeskError, DeskResult};
use crate::models::{
    BookedSource, CloseReason, EntityType, LeadStatus, LoadStatus, ResolutionKind, ResolveLeadPayload,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    Claim,
    Release,
    Book,
    Close,
    /// Callback / no-answer stamps: the row must still be actionable but its
    /// status does not move.
    Touch,
    Reopen,
}

impl Transition {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Claim => "claim",
            Self::Release => "release",
            Self::Book => "book",
            Self::Close => "close",
            Self::Touch => "touch",
            Self::Reopen => "reopen",
        }
    }
}

pub fn lead_sources(transition: Transition) -> &'static [LeadStatus] {
    match transition {
        Transition::Claim => &[LeadStatus::Pending],
        Transition::Release => &[LeadStatus::Claimed],
        Transition::Book | Transition::Close | Transition::Touch => &[LeadStatus::Pending, LeadStatus::Claimed],
        Transition::Reopen => &[LeadStatus::Booked, LeadStatus::Closed],
    }
}

pub fn load_sources(transition: Transition) -> &'static [LoadStatus] {
    match transition {
        Transition::Claim => &[LoadStatus::Open],
        Transition::Release => &[LoadStatus::Claimed],
        Transition::Book | Transition::Close | Transition::Touch => &[LoadStatus::Open, LoadStatus::Claimed],
        Transition::Reopen => &[LoadStatus::Booked, LoadStatus::Closed],
    }
}

pub fn lead_target(transition: Transition, from: LeadStatus) -> LeadStatus {
    match transition {
        Transition::Claim => LeadStatus::Claimed,
        Transition::Release | Transition::Reopen => LeadStatus::Pending,
        Transition::Book => LeadStatus::Booked,
        Transition::Close => LeadStatus::Closed,
        Transition::Touch => from,
    }
}

pub fn load_target(transition: Transition, from: LoadStatus) -> LoadStatus {
    match transition {
        Transition::Claim => LoadStatus::Claimed,
        Transition::Release | Transition::Reopen => LoadStatus::Open,
        Transition::Book => LoadStatus::Booked,
        Transition::Close => LoadStatus::Closed,
        Transition::Touch => from,
    }
}

pub fn lead_allows(from: LeadStatus, transition: Transition) -> bool {
    lead_sources(transition).contains(&from)
}

pub fn load_allows(from: LoadStatus, transition: Transition) -> bool {
    load_sources(transition).contains(&from)
}

pub fn lead_source_names(transition: Transition) -> Vec<&'static str> {
    lead_sources(transition).iter().map(|status| status.as_str()).collect()
}

pub fn load_source_names(transition: Transition) -> Vec<&'static str> {
    load_sources(transition).iter().map(|status| status.as_str()).collect()
}

pub fn source_names(entity: EntityType, transition: Transition) -> Vec<&'static str> {
    match entity {
        EntityType::Lead => lead_source_names(transition),
        EntityType::Load => load_source_names(transition),
    }
}

/// `from` field of a transition log line, e.g. `pending|claimed`.
pub fn source_label(entity: EntityType, transition: Transition) -> String {
    source_names(entity, transition).join("|")
}

/// `status IN ('a','b')` fragment for a guarded UPDATE. Only ever built from
/// the static status names above.
pub fn status_guard(names: &[&'static str]) -> String {
    let quoted = names
        .iter()
        .map(|name| format!("'{}'", name))
        .collect::<Vec<_>>()
        .join(",");
    format!("status IN ({})", quoted)
}

/// A validated lead resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Booked {
        load_id: String,
        source: BookedSource,
        call_id: Option<String>,
    },
    Closed {
        reason: CloseReason,
    },
    Callback,
    NoAnswer,
}

impl Resolution {
    pub fn from_payload(payload: &ResolveLeadPayload) -> DeskResult<Self> {
        if payload.agent_id.trim().is_empty() {
            return Err(DeskError::Validation("an acting agent id is required".to_string()));
        }

        match payload.outcome {
            ResolutionKind::Booked => {
                let load_id = payload
                    .load_id
                    .as_deref()
                    .map(str::trim)
                    .filter(|value| !value.is_empty())
                    .ok_or_else(|| DeskError::Validation("booked outcome requires a selected load".to_string()))?;
                Ok(Self::Booked {
                    load_id: load_id.to_string(),
                    source: payload.booked_source.unwrap_or_default(),
                    call_id: payload.call_id.clone(),
                })
            }
            ResolutionKind::Closed => {
                let raw = payload
                    .close_reason
                    .as_deref()
                    .filter(|value| !value.trim().is_empty())
                    .ok_or_else(|| DeskError::Validation("closed outcome requires a close reason".to_string()))?;
                let reason = CloseReason::parse(raw)
                    .ok_or_else(|| DeskError::Validation(format!("unknown close reason '{}'", raw)))?;
                Ok(Self::Closed { reason })
            }
            ResolutionKind::Callback => Ok(Self::Callback),
            ResolutionKind::NoAnswer => Ok(Self::NoAnswer),
        }
    }

    pub fn transition(&self) -> Transition {
        match self {
            Self::Booked { .. } => Transition::Book,
            Self::Closed { .. } => Transition::Close,
            Self::Callback | Self::NoAnswer => Transition::Touch,
        }
    }
}
