//! Keyword scoring: which active rules fire against a transcript, what they
//! do to a lead's intent score, and whether a new rule fits under the caps.

use crate::errors::{DeskError, DeskResult};
use crate::models::{
    Agent, IntentReasonBreakdown, Keyword, KeywordMatchBreakdown, KeywordScope, KeywordSuggestion, KeywordType, Load,
    LoadStatus, MatchType, MatchedKeyword, QuotaKind, MAX_ACTIVE_GLOBAL_KEYWORDS, MAX_ACTIVE_PERSONAL_KEYWORDS,
    MAX_DAILY_KEYWORD_ADDS,
};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A matched lead's intent score is raised to at least this value.
pub const KEYWORD_INTENT_FLOOR: u8 = 85;
pub const MAX_KEYWORD_CHARS: usize = 64;
const MAX_SUGGESTIONS: usize = 20;

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

pub fn normalize_text(raw: &str) -> String {
    WHITESPACE.replace_all(raw.trim(), " ").to_lowercase()
}

pub fn validate_keyword_text(raw: &str) -> DeskResult<String> {
    let normalized = normalize_text(raw);
    if normalized.is_empty() {
        return Err(DeskError::Validation("keyword text is empty".to_string()));
    }
    if normalized.chars().count() > MAX_KEYWORD_CHARS {
        return Err(DeskError::Validation(format!(
            "keyword text exceeds {} characters",
            MAX_KEYWORD_CHARS
        )));
    }
    Ok(normalized)
}

pub fn validate_weight(weight: f64) -> DeskResult<f64> {
    if !weight.is_finite() || weight <= 0.0 || weight > 1.0 {
        return Err(DeskError::Validation(format!("keyword weight {} must be in (0, 1]", weight)));
    }
    Ok(weight)
}

/// Raise-only adjustment applied to a lead's intent score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentAdjustment {
    pub floor: u8,
}

impl IntentAdjustment {
    pub fn apply(self, prior: Option<u8>) -> u8 {
        prior.unwrap_or(0).max(self.floor).min(100)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeywordHit {
    pub keyword: MatchedKeyword,
    pub adjustment: IntentAdjustment,
}

/// Agent-scoped rules are visible only to their owner; global rules to the
/// whole agency.
pub fn visible_to(keyword: &Keyword, viewer: &Agent) -> bool {
    if keyword.agency_id != viewer.agency_id {
        return false;
    }
    match keyword.scope {
        KeywordScope::Global => true,
        KeywordScope::Agent => keyword.owner_agent_id.as_deref() == Some(viewer.id.as_str()),
    }
}

fn matches_text(keyword: &Keyword, haystack: &str) -> bool {
    match keyword.match_type {
        MatchType::Contains => haystack.contains(&normalize_text(&keyword.keyword)),
    }
}

pub fn match_keywords(text: &str, keywords: &[Keyword], viewer: &Agent, now: DateTime<Utc>) -> Vec<KeywordHit> {
    let haystack = normalize_text(text);
    if haystack.is_empty() {
        return Vec::new();
    }

    let mut seen = HashSet::new();
    keywords
        .iter()
        .filter(|keyword| keyword.is_live(now) && visible_to(keyword, viewer))
        .filter(|keyword| matches_text(keyword, &haystack))
        .filter(|keyword| seen.insert(keyword.id.clone()))
        .map(|keyword| KeywordHit {
            keyword: MatchedKeyword {
                keyword_id: keyword.id.clone(),
                keyword: keyword.keyword.clone(),
                scope: keyword.scope,
                weight: keyword.weight,
            },
            adjustment: IntentAdjustment {
                floor: KEYWORD_INTENT_FLOOR,
            },
        })
        .collect()
}

pub fn breakdown_for(hits: &[KeywordHit], now: DateTime<Utc>) -> IntentReasonBreakdown {
    IntentReasonBreakdown::KeywordMatch(KeywordMatchBreakdown {
        source: "keyword_match".to_string(),
        keywords: hits.iter().map(|hit| hit.keyword.clone()).collect(),
        score_floor: KEYWORD_INTENT_FLOOR,
        matched_at: now,
    })
}

/// Live counts taken inside the insert transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuotaUsage {
    pub active_personal: i64,
    pub active_global: i64,
    pub added_today: i64,
}

/// Scope cap first, then the daily add cap.
pub fn check_quota(scope: KeywordScope, usage: QuotaUsage) -> Result<(), QuotaKind> {
    match scope {
        KeywordScope::Agent if usage.active_personal >= MAX_ACTIVE_PERSONAL_KEYWORDS => return Err(QuotaKind::Agent),
        KeywordScope::Global if usage.active_global >= MAX_ACTIVE_GLOBAL_KEYWORDS => return Err(QuotaKind::Agency),
        _ => {}
    }
    if usage.added_today >= MAX_DAILY_KEYWORD_ADDS {
        return Err(QuotaKind::Daily);
    }
    Ok(())
}

pub fn suggest_from_loads(loads: &[Load], existing: &[Keyword]) -> Vec<KeywordSuggestion> {
    let mut taken: HashSet<String> = existing.iter().map(|keyword| normalize_text(&keyword.keyword)).collect();
    let mut suggestions = Vec::new();

    for load in loads.iter().filter(|load| load.status == LoadStatus::Open) {
        let lane = match (load.pickup_city.as_deref(), load.destination_city.as_deref()) {
            (Some(from), Some(to)) => Some(format!("{} to {}", from, to)),
            _ => None,
        };
        let candidates = [
            (Some(load.load_number.clone()), KeywordType::Load),
            (lane, KeywordType::Lane),
            (load.pickup_city.clone(), KeywordType::City),
            (load.destination_city.clone(), KeywordType::City),
            (load.commodity.clone(), KeywordType::Commodity),
        ];

        for (text, keyword_type) in candidates {
            let Some(text) = text else {
                continue;
            };
            let normalized = normalize_text(&text);
            if normalized.is_empty() || normalized.chars().count() > MAX_KEYWORD_CHARS {
                continue;
            }
            if !taken.insert(normalized.clone()) {
                continue;
            }
            suggestions.push(KeywordSuggestion {
                keyword: normalized,
                keyword_type,
                source_load_id: load.id.clone(),
            });
            if suggestions.len() >= MAX_SUGGESTIONS {
                return suggestions;
            }
        }
    }

    suggestions
}

#[cfg(test)]
mod tests {
    use super::{check_quota, match_keywords, normalize_text, suggest_from_loads, IntentAdjustment, QuotaUsage};
    use crate::models::{
        Agent, AgentRole, Keyword, KeywordScope, KeywordType, Load, LoadStatus, MatchType, QuotaKind,
    };
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 15, 0, 0).single().expect("valid time")
    }

    fn agent(id: &str) -> Agent {
        Agent {
            id: id.to_string(),
            agency_id: "agency-1".to_string(),
            role: AgentRole::Agent,
            utc_offset_minutes: 0,
            created_at: now(),
        }
    }

    fn keyword(id: &str, text: &str, scope: KeywordScope, owner: Option<&str>) -> Keyword {
        Keyword {
            id: id.to_string(),
            agency_id: "agency-1".to_string(),
            keyword: text.to_string(),
            keyword_type: KeywordType::Custom,
            scope,
            owner_agent_id: owner.map(ToString::to_string),
            created_by: owner.unwrap_or("admin").to_string(),
            match_type: MatchType::Contains,
            weight: 0.85,
            active: true,
            created_at: now() - Duration::hours(1),
            expires_at: now() + Duration::hours(23),
            deleted_at: None,
        }
    }

    #[test]
    fn matching_is_case_insensitive_containment() {
        let rules = vec![keyword("k1", "Reefer", KeywordScope::Global, None)];
        let hits = match_keywords("Do you have any REEFER loads?", &rules, &agent("a1"), now());
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].keyword.keyword_id, "k1");
    }

    #[test]
    fn personal_rules_fire_only_for_their_owner() {
        let rules = vec![keyword("k1", "rate", KeywordScope::Agent, Some("a1"))];
        assert_eq!(match_keywords("what's the rate", &rules, &agent("a1"), now()).len(), 1);
        assert!(match_keywords("what's the rate", &rules, &agent("a2"), now()).is_empty());
    }

    #[test]
    fn expired_and_deleted_rules_are_ignored() {
        let mut expired = keyword("k1", "rate", KeywordScope::Global, None);
        expired.expires_at = now();
        let mut deleted = keyword("k2", "rate", KeywordScope::Global, None);
        deleted.deleted_at = Some(now() - Duration::minutes(5));
        deleted.active = false;
        assert!(match_keywords("rate please", &[expired, deleted], &agent("a1"), now()).is_empty());
    }

    #[test]
    fn adjustment_raises_but_never_lowers() {
        let adjustment = IntentAdjustment { floor: 85 };
        assert_eq!(adjustment.apply(None), 85);
        assert_eq!(adjustment.apply(Some(40)), 85);
        assert_eq!(adjustment.apply(Some(97)), 97);
    }

    #[test]
    fn quota_reports_the_cap_that_blocked() {
        let full_personal = QuotaUsage {
            active_personal: 25,
            active_global: 0,
            added_today: 10,
        };
        assert_eq!(check_quota(KeywordScope::Agent, full_personal), Err(QuotaKind::Agent));
        assert_eq!(check_quota(KeywordScope::Global, full_personal), Err(QuotaKind::Daily));

        let full_global = QuotaUsage {
            active_personal: 0,
            active_global: 100,
            added_today: 0,
        };
        assert_eq!(check_quota(KeywordScope::Global, full_global), Err(QuotaKind::Agency));
        assert_eq!(check_quota(KeywordScope::Agent, full_global), Ok(()));
    }

    #[test]
    fn whitespace_is_collapsed() {
        assert_eq!(normalize_text("  Dallas\t\tTO   Atlanta "), "dallas to atlanta");
    }

    #[test]
    fn suggestions_skip_taken_texts_and_closed_loads() {
        let open = Load {
            id: "load-1".to_string(),
            agency_id: "agency-1".to_string(),
            load_number: "LD-100".to_string(),
            pickup_city: Some("Dallas".to_string()),
            pickup_state: Some("TX".to_string()),
            destination_city: Some("Atlanta".to_string()),
            destination_state: Some("GA".to_string()),
            commodity: Some("Produce".to_string()),
            target_pay: None,
            max_pay: None,
            target_commission: None,
            max_commission: None,
            customer_invoice_total: None,
            status: LoadStatus::Open,
            claim: None,
            booking: None,
            closure: None,
            created_at: now(),
            updated_at: now(),
        };
        let mut closed = open.clone();
        closed.id = "load-2".to_string();
        closed.load_number = "LD-200".to_string();
        closed.status = LoadStatus::Closed;

        let existing = vec![keyword("k1", "dallas", KeywordScope::Agent, Some("a1"))];
        let suggestions = suggest_from_loads(&[open, closed], &existing);
        let texts: Vec<&str> = suggestions.iter().map(|s| s.keyword.as_str()).collect();
        assert_eq!(texts, vec!["ld-100", "dallas to atlanta", "atlanta", "produce"]);
        assert_eq!(suggestions[1].keyword_type, KeywordType::Lane);
    }
}
