//! "Why this lead": a bounded, explainable priority score for the work queue.

use crate::models::{KeywordScope, Lead, MatchedKeyword};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

pub const MAX_SCORE: u32 = 100;
pub const MAX_REASONS: usize = 3;

const MC_POINTS: u32 = 30;
const DOT_POINTS: u32 = 20;
const COMPANY_POINTS: u32 = 15;
const LOAD_POINTS: u32 = 25;
const CALLBACK_POINTS: u32 = 10;
const VERIFIED_POINTS: u32 = 10;
const PERSONAL_MATCH_POINTS: u32 = 15;
const GLOBAL_MATCH_POINTS: u32 = 10;
pub const KEYWORD_BONUS_CAP: u32 = 30;
const HIGH_INTENT_POINTS: u32 = 15;
const MAX_QUEUE_HOURS_BONUS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonKind {
    PersonalKeyword,
    GlobalKeyword,
    HighIntent,
    CarrierMc,
    CarrierDot,
    Company,
    AttachedLoad,
    CallbackRequested,
    VerifiedCarrier,
}

impl ReasonKind {
    /// Most actionable first. Global match and high intent never co-occur,
    /// so they share a slot.
    fn rank(self) -> u8 {
        match self {
            Self::PersonalKeyword => 0,
            Self::GlobalKeyword | Self::HighIntent => 1,
            Self::CarrierMc => 2,
            Self::CarrierDot => 3,
            Self::Company => 4,
            Self::AttachedLoad => 5,
            Self::CallbackRequested => 6,
            Self::VerifiedCarrier => 7,
        }
    }

    pub fn icon(self) -> &'static str {
        match self {
            Self::PersonalKeyword => "key",
            Self::GlobalKeyword => "globe",
            Self::HighIntent => "flame",
            Self::CarrierMc => "id-card",
            Self::CarrierDot => "hash",
            Self::Company => "building",
            Self::AttachedLoad => "truck",
            Self::CallbackRequested => "phone-callback",
            Self::VerifiedCarrier => "shield-check",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankReason {
    pub kind: ReasonKind,
    pub label: String,
    pub icon: String,
    pub points: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadScore {
    pub lead_id: String,
    pub score: u32,
    pub keyword_bonus: u32,
    pub reasons: Vec<RankReason>,
    pub time_in_queue_hours: f64,
}

fn reason(kind: ReasonKind, label: String, points: u32) -> RankReason {
    RankReason {
        kind,
        label,
        icon: kind.icon().to_string(),
        points,
    }
}

fn keyword_label(prefix: &str, matches: &[&MatchedKeyword]) -> String {
    let names = matches
        .iter()
        .map(|matched| matched.keyword.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    let plural = if matches.len() == 1 { "" } else { "s" };
    format!("{}{}: {}", prefix, plural, names)
}

fn present(value: Option<&str>) -> bool {
    value.map(|raw| !raw.trim().is_empty()).unwrap_or(false)
}

pub fn score_lead(lead: &Lead, matches: &[MatchedKeyword], now: DateTime<Utc>) -> LeadScore {
    let mut reasons = Vec::new();
    let mut total = 0u32;

    let personal: Vec<&MatchedKeyword> = matches.iter().filter(|m| m.scope == KeywordScope::Agent).collect();
    let global: Vec<&MatchedKeyword> = matches.iter().filter(|m| m.scope == KeywordScope::Global).collect();

    let mut keyword_bonus = 0u32;
    if !personal.is_empty() {
        let points = (PERSONAL_MATCH_POINTS * personal.len() as u32).min(KEYWORD_BONUS_CAP);
        keyword_bonus += points;
        reasons.push(reason(
            ReasonKind::PersonalKeyword,
            keyword_label("Matched your keyword", &personal),
            points,
        ));
    }
    if !global.is_empty() {
        let points = (GLOBAL_MATCH_POINTS * global.len() as u32).min(KEYWORD_BONUS_CAP - keyword_bonus);
        keyword_bonus += points;
        reasons.push(reason(
            ReasonKind::GlobalKeyword,
            keyword_label("Matched team keyword", &global),
            points,
        ));
    }
    total += keyword_bonus;

    if matches.is_empty() && lead.is_high_intent {
        total += HIGH_INTENT_POINTS;
        reasons.push(reason(ReasonKind::HighIntent, "High-intent caller".to_string(), HIGH_INTENT_POINTS));
    }

    if let Some(mc) = lead.carrier_mc.as_deref().filter(|raw| !raw.trim().is_empty()) {
        total += MC_POINTS;
        reasons.push(reason(ReasonKind::CarrierMc, format!("MC {} on file", mc.trim()), MC_POINTS));
    }
    if let Some(dot) = lead.carrier_dot.as_deref().filter(|raw| !raw.trim().is_empty()) {
        total += DOT_POINTS;
        reasons.push(reason(ReasonKind::CarrierDot, format!("DOT {} on file", dot.trim()), DOT_POINTS));
    }
    if let Some(company) = lead.caller_company.as_deref().filter(|raw| !raw.trim().is_empty()) {
        total += COMPANY_POINTS;
        reasons.push(reason(ReasonKind::Company, format!("Calling for {}", company.trim()), COMPANY_POINTS));
    }
    if present(lead.load_id.as_deref()) {
        total += LOAD_POINTS;
        reasons.push(reason(ReasonKind::AttachedLoad, "Asked about a specific load".to_string(), LOAD_POINTS));
    }
    if lead.callback_requested_at.is_some() {
        total += CALLBACK_POINTS;
        reasons.push(reason(ReasonKind::CallbackRequested, "Requested a callback".to_string(), CALLBACK_POINTS));
    }
    if lead.carrier_verified_at.is_some() {
        total += VERIFIED_POINTS;
        reasons.push(reason(ReasonKind::VerifiedCarrier, "Verified carrier".to_string(), VERIFIED_POINTS));
    }

    let waited_secs = (now - lead.created_at).num_seconds().max(0);
    let full_hours = u32::try_from(waited_secs / 3_600).unwrap_or(u32::MAX);
    total = total.saturating_add(full_hours.min(MAX_QUEUE_HOURS_BONUS));

    reasons.sort_by_key(|entry| entry.kind.rank());
    reasons.truncate(MAX_REASONS);

    LeadScore {
        lead_id: lead.id.clone(),
        score: total.min(MAX_SCORE),
        keyword_bonus,
        reasons,
        time_in_queue_hours: waited_secs as f64 / 3_600.0,
    }
}

/// Highest score first, then longest waiting, then id for a stable order.
pub fn rank_queue(
    leads: &[Lead],
    matches_by_lead: &HashMap<String, Vec<MatchedKeyword>>,
    now: DateTime<Utc>,
) -> Vec<LeadScore> {
    let mut scored = leads
        .iter()
        .map(|lead| {
            let matches = matches_by_lead.get(&lead.id).map(Vec::as_slice).unwrap_or(&[]);
            score_lead(lead, matches, now)
        })
        .collect::<Vec<_>>();

    scored.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then_with(|| {
                b.time_in_queue_hours
                    .partial_cmp(&a.time_in_queue_hours)
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| a.lead_id.cmp(&b.lead_id))
    });
    scored
}

#[cfg(test)]
mod tests {
    use super::{rank_queue, score_lead, ReasonKind, KEYWORD_BONUS_CAP};
    use crate::models::{KeywordScope, Lead, LeadStatus, MatchedKeyword};
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use std::collections::HashMap;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 15, 0, 0).single().expect("valid time")
    }

    fn bare_lead(id: &str) -> Lead {
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
            created_at: now(),
            updated_at: now(),
        }
    }

    fn matched(id: &str, scope: KeywordScope) -> MatchedKeyword {
        MatchedKeyword {
            keyword_id: id.to_string(),
            keyword: format!("kw-{}", id),
            scope,
            weight: 0.85,
        }
    }

    fn loaded_lead() -> Lead {
        let mut lead = bare_lead("full");
        lead.carrier_mc = Some("123456".to_string());
        lead.carrier_dot = Some("7654321".to_string());
        lead.caller_company = Some("Acme Freight".to_string());
        lead.load_id = Some("load-1".to_string());
        lead.callback_requested_at = Some(now());
        lead.carrier_verified_at = Some(now());
        lead.created_at = now() - Duration::hours(30);
        lead
    }

    #[test]
    fn empty_lead_scores_zero_with_no_reasons() {
        let score = score_lead(&bare_lead("l1"), &[], now());
        assert_eq!(score.score, 0);
        assert!(score.reasons.is_empty());
    }

    #[test]
    fn score_is_clamped_to_one_hundred() {
        let matches = vec![matched("a", KeywordScope::Agent), matched("b", KeywordScope::Global)];
        let score = score_lead(&loaded_lead(), &matches, now());
        assert_eq!(score.score, 100);
    }

    #[test]
    fn keyword_bonus_is_capped_at_thirty() {
        let matches = (0..5).map(|i| matched(&i.to_string(), KeywordScope::Agent)).collect::<Vec<_>>();
        let score = score_lead(&bare_lead("l1"), &matches, now());
        assert_eq!(score.keyword_bonus, KEYWORD_BONUS_CAP);
        assert_eq!(score.score, 30);

        let mixed = vec![
            matched("a", KeywordScope::Agent),
            matched("b", KeywordScope::Global),
            matched("c", KeywordScope::Global),
        ];
        let score = score_lead(&bare_lead("l2"), &mixed, now());
        assert_eq!(score.keyword_bonus, 30);
        assert_eq!(score.reasons[0].points, 15);
        assert_eq!(score.reasons[1].points, 15);
    }

    #[test]
    fn high_intent_fallback_only_without_matches() {
        let mut lead = bare_lead("l1");
        lead.is_high_intent = true;
        assert_eq!(score_lead(&lead, &[], now()).score, 15);

        let with_match = score_lead(&lead, &[matched("a", KeywordScope::Global)], now());
        assert_eq!(with_match.score, 10);
        assert!(with_match.reasons.iter().all(|r| r.kind != ReasonKind::HighIntent));
    }

    #[test]
    fn queue_time_adds_one_point_per_full_hour_up_to_ten() {
        let mut lead = bare_lead("l1");
        lead.created_at = now() - Duration::minutes(150);
        let score = score_lead(&lead, &[], now());
        assert_eq!(score.score, 2);
        assert!((score.time_in_queue_hours - 2.5).abs() < f64::EPSILON);

        lead.created_at = now() - Duration::hours(48);
        assert_eq!(score_lead(&lead, &[], now()).score, 10);
    }

    #[test]
    fn reasons_follow_fixed_priority_and_keep_top_three() {
        let score = score_lead(&loaded_lead(), &[matched("a", KeywordScope::Agent)], now());
        let kinds = score.reasons.iter().map(|r| r.kind).collect::<Vec<_>>();
        assert_eq!(
            kinds,
            vec![ReasonKind::PersonalKeyword, ReasonKind::CarrierMc, ReasonKind::CarrierDot]
        );

        let score = score_lead(&loaded_lead(), &[], now());
        let kinds = score.reasons.iter().map(|r| r.kind).collect::<Vec<_>>();
        assert_eq!(kinds, vec![ReasonKind::CarrierMc, ReasonKind::CarrierDot, ReasonKind::Company]);
        assert_eq!(score.reasons[0].icon, "id-card");
    }

    #[test]
    fn queue_orders_by_score_then_wait() {
        let mut older = bare_lead("older");
        older.created_at = now() - Duration::minutes(30);
        let newer = bare_lead("newer");
        let mut strong = bare_lead("strong");
        strong.carrier_mc = Some("1".to_string());

        let ranked = rank_queue(&[newer, strong, older], &HashMap::new(), now());
        let order = ranked.iter().map(|s| s.lead_id.as_str()).collect::<Vec<_>>();
        assert_eq!(order, vec!["strong", "older", "newer"]);
    }
}
