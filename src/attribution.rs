//! Which lead gets credit when a load is booked without one named.
//!
//! Policy, first hit wins:
//! 1. an actionable lead already pointing at the load,
//! 2. an actionable lead whose MC (then DOT) number matches a carrier id seen
//!    on a call adjacent to the booking, created inside the recency window,
//! 3. nothing: the load stays unattributed.

use crate::lifecycle::{lead_allows, Transition};
use crate::models::{AttributionMatchType, CallRecord, Lead, Load};
use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

static NON_DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\D+").expect("valid regex"));

/// Carrier numbers arrive as "MC-012345", "mc 12345" or bare digits.
pub fn normalize_carrier_id(raw: &str) -> Option<String> {
    let digits = NON_DIGITS.replace_all(raw, "");
    let trimmed = digits.trim_start_matches('0');
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CarrierHints {
    pub mc: HashSet<String>,
    pub dot: HashSet<String>,
}

impl CarrierHints {
    pub fn is_empty(&self) -> bool {
        self.mc.is_empty() && self.dot.is_empty()
    }
}

/// Carrier ids from the booking call, plus any call about this load that
/// started inside the window before the booking.
pub fn carrier_hints(load: &Load, calls: &[CallRecord], booked_at: DateTime<Utc>, window: Duration) -> CarrierHints {
    let booking_call = load.booking.as_ref().and_then(|booking| booking.call_id.as_deref());
    let earliest = window_start(booked_at, window);
    let mut hints = CarrierHints::default();

    for call in calls {
        let is_booking_call = booking_call == Some(call.id.as_str());
        let is_adjacent = call.load_id.as_deref() == Some(load.id.as_str())
            && earliest.map_or(true, |earliest| call.started_at >= earliest)
            && call.started_at <= booked_at;
        if !is_booking_call && !is_adjacent {
            continue;
        }
        if let Some(mc) = call.carrier_mc.as_deref().and_then(normalize_carrier_id) {
            hints.mc.insert(mc);
        }
        if let Some(dot) = call.carrier_dot.as_deref().and_then(normalize_carrier_id) {
            hints.dot.insert(dot);
        }
    }
    hints
}

/// `None` when the window reaches past the representable range: no lower bound.
fn window_start(booked_at: DateTime<Utc>, window: Duration) -> Option<DateTime<Utc>> {
    booked_at.checked_sub_signed(window)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributionMatch {
    pub lead_id: String,
    pub match_type: AttributionMatchType,
}

fn most_recent<'a>(candidates: impl Iterator<Item = &'a Lead>) -> Option<&'a Lead> {
    candidates.max_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| b.id.cmp(&a.id)))
}

pub fn find_attribution(
    load: &Load,
    leads: &[Lead],
    calls: &[CallRecord],
    booked_at: DateTime<Utc>,
    window: Duration,
) -> Option<AttributionMatch> {
    let actionable = move || {
        leads
            .iter()
            .filter(move |lead| lead.agency_id == load.agency_id && lead_allows(lead.status, Transition::Book))
    };

    let explicit = most_recent(actionable().filter(|lead| lead.load_id.as_deref() == Some(load.id.as_str())));
    if let Some(lead) = explicit {
        return Some(AttributionMatch {
            lead_id: lead.id.clone(),
            match_type: AttributionMatchType::ExplicitLoad,
        });
    }

    let hints = carrier_hints(load, calls, booked_at, window);
    if hints.is_empty() {
        return None;
    }

    let earliest = window_start(booked_at, window);
    let recent = move || {
        actionable().filter(move |lead| {
            lead.load_id.is_none()
                && earliest.map_or(true, |earliest| lead.created_at >= earliest)
                && lead.created_at <= booked_at
        })
    };

    let by_mc = most_recent(recent().filter(|lead| {
        lead.carrier_mc
            .as_deref()
            .and_then(normalize_carrier_id)
            .map(|mc| hints.mc.contains(&mc))
            .unwrap_or(false)
    }));
    if let Some(lead) = by_mc {
        return Some(AttributionMatch {
            lead_id: lead.id.clone(),
            match_type: AttributionMatchType::CarrierMc,
        });
    }

    let by_dot = most_recent(recent().filter(|lead| {
        lead.carrier_dot
            .as_deref()
            .and_then(normalize_carrier_id)
            .map(|dot| hints.dot.contains(&dot))
            .unwrap_or(false)
    }));
    by_dot.map(|lead| AttributionMatch {
        lead_id: lead.id.clone(),
        match_type: AttributionMatchType::CarrierDot,
    })
}

#[cfg(test)]
mod tests {
    use super::{find_attribution, normalize_carrier_id};
    use crate::models::{
        AttributionMatchType, BookedSource, CallRecord, Lead, LeadStatus, Load, LoadBooking, LoadStatus,
    };
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 15, 0, 0).single().expect("valid time")
    }

    fn lead(id: &str, minutes_ago: i64) -> Lead {
        Lead {
            id: id.to_string(),
            agency_id: "agency-1".to_string(),
            caller_phone: "+15550100".to_string(),
            caller_name: None,
            caller_company: None,
            carrier_mc: None,
            carrier_dot: None,
            carrier_verified_at: None,
            status: LeadStatus::Pending,
            intent_score: None,
            is_high_intent: false,
            intent_reason_breakdown: None,
            call_id: None,
            load_id: None,
            claim: None,
            booking: None,
            closure: None,
            resolved_at: None,
            callback_requested_at: None,
            last_contact_attempt_at: None,
            created_at: now() - Duration::minutes(minutes_ago),
            updated_at: now(),
        }
    }

    fn load(call_id: Option<&str>) -> Load {
        Load {
            id: "load-1".to_string(),
            agency_id: "agency-1".to_string(),
            load_number: "LD-1".to_string(),
            pickup_city: None,
            pickup_state: None,
            destination_city: None,
            destination_state: None,
            commodity: None,
            target_pay: None,
            max_pay: None,
            target_commission: None,
            max_commission: None,
            customer_invoice_total: None,
            status: LoadStatus::Booked,
            claim: None,
            booking: Some(LoadBooking {
                booked_by: "agent-1".to_string(),
                booked_at: now(),
                source: BookedSource::Ai,
                lead_id: None,
                call_id: call_id.map(ToString::to_string),
            }),
            closure: None,
            created_at: now() - Duration::days(1),
            updated_at: now(),
        }
    }

    fn call(id: &str, mc: Option<&str>, dot: Option<&str>) -> CallRecord {
        CallRecord {
            id: id.to_string(),
            agency_id: "agency-1".to_string(),
            agent_id: None,
            external_phone: "+15550100".to_string(),
            duration_secs: Some(120),
            transcript: None,
            is_high_intent: false,
            carrier_mc: mc.map(ToString::to_string),
            carrier_dot: dot.map(ToString::to_string),
            load_id: None,
            started_at: now() - Duration::minutes(5),
            ended_at: None,
        }
    }

    #[test]
    fn normalizes_prefixes_and_leading_zeros() {
        assert_eq!(normalize_carrier_id("MC-0012345").as_deref(), Some("12345"));
        assert_eq!(normalize_carrier_id("dot 987").as_deref(), Some("987"));
        assert_eq!(normalize_carrier_id("MC"), None);
    }

    #[test]
    fn explicit_load_reference_wins_over_carrier_match() {
        let mut explicit = lead("explicit", 600);
        explicit.load_id = Some("load-1".to_string());
        let mut carrier = lead("carrier", 5);
        carrier.carrier_mc = Some("12345".to_string());
        let calls = vec![call("call-1", Some("MC12345"), None)];

        let found = find_attribution(&load(Some("call-1")), &[carrier, explicit], &calls, now(), Duration::hours(24))
            .expect("match");
        assert_eq!(found.lead_id, "explicit");
        assert_eq!(found.match_type, AttributionMatchType::ExplicitLoad);
    }

    #[test]
    fn carrier_match_respects_window_and_prefers_mc() {
        let mut stale = lead("stale", 60 * 30);
        stale.carrier_mc = Some("12345".to_string());
        let mut by_dot = lead("by-dot", 30);
        by_dot.carrier_dot = Some("555".to_string());
        let calls = vec![call("call-1", Some("12345"), Some("555"))];

        let found = find_attribution(
            &load(Some("call-1")),
            &[stale.clone(), by_dot.clone()],
            &calls,
            now(),
            Duration::hours(24),
        )
        .expect("match");
        assert_eq!(found.lead_id, "by-dot");
        assert_eq!(found.match_type, AttributionMatchType::CarrierDot);

        let mut fresh_mc = lead("fresh-mc", 10);
        fresh_mc.carrier_mc = Some("MC 12345".to_string());
        let found = find_attribution(
            &load(Some("call-1")),
            &[stale, by_dot, fresh_mc],
            &calls,
            now(),
            Duration::hours(24),
        )
        .expect("match");
        assert_eq!(found.match_type, AttributionMatchType::CarrierMc);
        assert_eq!(found.lead_id, "fresh-mc");
    }

    #[test]
    fn terminal_or_unrelated_leads_are_a_miss() {
        let mut booked = lead("booked", 5);
        booked.status = LeadStatus::Booked;
        booked.load_id = Some("load-1".to_string());
        let mut other_agency = lead("other", 5);
        other_agency.agency_id = "agency-2".to_string();
        other_agency.carrier_mc = Some("12345".to_string());
        let calls = vec![call("call-1", Some("12345"), None)];

        assert!(find_attribution(&load(Some("call-1")), &[booked, other_agency], &calls, now(), Duration::hours(24))
            .is_none());
    }

    #[test]
    fn oversized_window_has_no_lower_bound() {
        let mut carrier = lead("carrier", 60 * 24 * 400);
        carrier.carrier_mc = Some("12345".to_string());
        let calls = vec![call("call-1", Some("12345"), None)];

        let found = find_attribution(&load(Some("call-1")), &[carrier], &calls, now(), Duration::weeks(1_000_000_000))
            .expect("match");
        assert_eq!(found.lead_id, "carrier");
        assert_eq!(found.match_type, AttributionMatchType::CarrierMc);
    }

    #[test]
    fn no_adjacent_call_means_no_carrier_match() {
        let mut carrier = lead("carrier", 5);
        carrier.carrier_mc = Some("12345".to_string());
        let calls = vec![call("unrelated", Some("12345"), None)];
        assert!(find_attribution(&load(None), &[carrier], &calls, now(), Duration::hours(24)).is_none());
    }
}
