use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const KEYWORD_TTL_HOURS: i64 = 24;
pub const DEFAULT_KEYWORD_WEIGHT: f64 = 0.85;
pub const MAX_ACTIVE_PERSONAL_KEYWORDS: i64 = 25;
pub const MAX_ACTIVE_GLOBAL_KEYWORDS: i64 = 100;
pub const MAX_DAILY_KEYWORD_ADDS: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Lead,
    Load,
}

impl EntityType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lead => "lead",
            Self::Load => "load",
        }
    }

    pub fn table(self) -> &'static str {
        match self {
            Self::Lead => "leads",
            Self::Load => "loads",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which keyword cap rejected an add.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotaKind {
    Agent,
    Agency,
    Daily,
}

impl QuotaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::Agency => "agency",
            Self::Daily => "daily",
        }
    }

    pub fn limit(self) -> i64 {
        match self {
            Self::Agent => MAX_ACTIVE_PERSONAL_KEYWORDS,
            Self::Agency => MAX_ACTIVE_GLOBAL_KEYWORDS,
            Self::Daily => MAX_DAILY_KEYWORD_ADDS,
        }
    }
}

impl fmt::Display for QuotaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let detail = match self {
            Self::Agent => "active personal keywords per agent",
            Self::Agency => "active global keywords per agency",
            Self::Daily => "keyword adds per agent per local day",
        };
        write!(f, "{} (limit {} {})", self.as_str(), self.limit(), detail)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeadStatus {
    Pending,
    Claimed,
    Booked,
    Closed,
}

impl LeadStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Claimed => "claimed",
            Self::Booked => "booked",
            Self::Closed => "closed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(Self::Pending),
            "claimed" => Some(Self::Claimed),
            "booked" => Some(Self::Booked),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadStatus {
    Open,
    Claimed,
    Booked,
    Closed,
}

impl LoadStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Claimed => "claimed",
            Self::Booked => "booked",
            Self::Closed => "closed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "open" => Some(Self::Open),
            "claimed" => Some(Self::Claimed),
            "booked" => Some(Self::Booked),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    RateTooLow,
    LoadUnavailable,
    NotAFit,
    Covered,
    Other,
}

impl CloseReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RateTooLow => "rate_too_low",
            Self::LoadUnavailable => "load_unavailable",
            Self::NotAFit => "not_a_fit",
            Self::Covered => "covered",
            Self::Other => "other",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "rate_too_low" => Some(Self::RateTooLow),
            "load_unavailable" => Some(Self::LoadUnavailable),
            "not_a_fit" => Some(Self::NotAFit),
            "covered" => Some(Self::Covered),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BookedSource {
    #[default]
    Manual,
    Ai,
}

impl BookedSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Ai => "ai",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "manual" => Some(Self::Manual),
            "ai" => Some(Self::Ai),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    #[default]
    Agent,
    Admin,
}

impl AgentRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::Admin => "admin",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "agent" => Some(Self::Agent),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub id: String,
    pub agency_id: String,
    pub role: AgentRole,
    /// Offset of the agent's local clock from UTC, used for local-day boundaries.
    pub utc_offset_minutes: i32,
    pub created_at: DateTime<Utc>,
}

impl Agent {
    pub fn is_admin(&self) -> bool {
        self.role == AgentRole::Admin
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Claim {
    pub agent_id: String,
    pub claimed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Closure {
    pub closed_at: DateTime<Utc>,
    pub reason: CloseReason,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LeadBooking {
    pub booked_by: String,
    pub booked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoadBooking {
    pub booked_by: String,
    pub booked_at: DateTime<Utc>,
    pub source: BookedSource,
    pub lead_id: Option<String>,
    pub call_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MatchedKeyword {
    pub keyword_id: String,
    pub keyword: String,
    pub scope: KeywordScope,
    pub weight: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KeywordMatchBreakdown {
    pub source: String,
    pub keywords: Vec<MatchedKeyword>,
    pub score_floor: u8,
    pub matched_at: DateTime<Utc>,
}

/// Explanation stored alongside an intent score. Older rows carry a plain
/// list of reason strings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum IntentReasonBreakdown {
    Legacy(Vec<String>),
    KeywordMatch(KeywordMatchBreakdown),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Lead {
    pub id: String,
    pub agency_id: String,
    pub caller_phone: String,
    pub caller_name: Option<String>,
    pub caller_company: Option<String>,
    pub carrier_mc: Option<String>,
    pub carrier_dot: Option<String>,
    pub carrier_verified_at: Option<DateTime<Utc>>,
    pub status: LeadStatus,
    pub intent_score: Option<u8>,
    pub is_high_intent: bool,
    pub intent_reason_breakdown: Option<IntentReasonBreakdown>,
    pub call_id: Option<String>,
    pub load_id: Option<String>,
    pub claim: Option<Claim>,
    pub booking: Option<LeadBooking>,
    pub closure: Option<Closure>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub callback_requested_at: Option<DateTime<Utc>>,
    pub last_contact_attempt_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Load {
    pub id: String,
    pub agency_id: String,
    pub load_number: String,
    pub pickup_city: Option<String>,
    pub pickup_state: Option<String>,
    pub destination_city: Option<String>,
    pub destination_state: Option<String>,
    pub commodity: Option<String>,
    pub target_pay: Option<f64>,
    pub max_pay: Option<f64>,
    pub target_commission: Option<f64>,
    pub max_commission: Option<f64>,
    pub customer_invoice_total: Option<f64>,
    pub status: LoadStatus,
    pub claim: Option<Claim>,
    pub booking: Option<LoadBooking>,
    pub closure: Option<Closure>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Load {
    pub fn booked_lead_id(&self) -> Option<&str> {
        self.booking.as_ref().and_then(|booking| booking.lead_id.as_deref())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CallRecord {
    pub id: String,
    pub agency_id: String,
    pub agent_id: Option<String>,
    pub external_phone: String,
    pub duration_secs: Option<i64>,
    pub transcript: Option<String>,
    pub is_high_intent: bool,
    pub carrier_mc: Option<String>,
    pub carrier_dot: Option<String>,
    pub load_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct NewLead {
    pub agency_id: String,
    pub caller_phone: String,
    pub caller_name: Option<String>,
    pub caller_company: Option<String>,
    pub carrier_mc: Option<String>,
    pub carrier_dot: Option<String>,
    pub call_id: Option<String>,
    pub load_id: Option<String>,
    pub intent_score: Option<u8>,
    pub intent_reason_breakdown: Option<IntentReasonBreakdown>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct NewLoad {
    pub agency_id: String,
    pub load_number: String,
    pub pickup_city: Option<String>,
    pub pickup_state: Option<String>,
    pub destination_city: Option<String>,
    pub destination_state: Option<String>,
    pub commodity: Option<String>,
    pub target_pay: Option<f64>,
    pub max_pay: Option<f64>,
    pub target_commission: Option<f64>,
    pub max_commission: Option<f64>,
    pub customer_invoice_total: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct NewCall {
    pub agency_id: String,
    pub agent_id: Option<String>,
    pub external_phone: String,
    pub duration_secs: Option<i64>,
    pub transcript: Option<String>,
    pub is_high_intent: bool,
    pub carrier_mc: Option<String>,
    pub carrier_dot: Option<String>,
    pub load_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionKind {
    Booked,
    Closed,
    Callback,
    NoAnswer,
}

/// Raw resolve request as it arrives from a caller; validated into a
/// `lifecycle::Resolution` before anything is written.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveLeadPayload {
    pub agent_id: String,
    pub outcome: ResolutionKind,
    pub load_id: Option<String>,
    pub close_reason: Option<String>,
    pub booked_source: Option<BookedSource>,
    pub call_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResolveResult {
    pub lead: Lead,
    pub load: Option<Load>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributionMatchType {
    ExplicitLoad,
    CarrierMc,
    CarrierDot,
}

impl AttributionMatchType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ExplicitLoad => "explicit_load",
            Self::CarrierMc => "carrier_mc",
            Self::CarrierDot => "carrier_dot",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AttributionOutcome {
    pub load: Load,
    pub lead: Option<Lead>,
    /// `None` means the load was booked without attribution.
    pub match_type: Option<AttributionMatchType>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum KeywordType {
    #[default]
    Custom,
    City,
    Lane,
    Load,
    Commodity,
}

impl KeywordType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Custom => "custom",
            Self::City => "city",
            Self::Lane => "lane",
            Self::Load => "load",
            Self::Commodity => "commodity",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "custom" => Some(Self::Custom),
            "city" => Some(Self::City),
            "lane" => Some(Self::Lane),
            "load" => Some(Self::Load),
            "commodity" => Some(Self::Commodity),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeywordScope {
    Agent,
    Global,
}

impl KeywordScope {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::Global => "global",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "agent" => Some(Self::Agent),
            "global" => Some(Self::Global),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    #[default]
    Contains,
}

impl MatchType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Contains => "contains",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "contains" => Some(Self::Contains),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Keyword {
    pub id: String,
    pub agency_id: String,
    pub keyword: String,
    pub keyword_type: KeywordType,
    pub scope: KeywordScope,
    pub owner_agent_id: Option<String>,
    pub created_by: String,
    pub match_type: MatchType,
    pub weight: f64,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Keyword {
    /// Expiry is evaluated lazily against the caller's clock.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.active && self.deleted_at.is_none() && self.expires_at > now
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddKeywordPayload {
    pub keyword: String,
    pub keyword_type: Option<KeywordType>,
    pub scope: KeywordScope,
    pub match_type: Option<MatchType>,
    pub weight: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KeywordSuggestion {
    pub keyword: String,
    pub keyword_type: KeywordType,
    pub source_load_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KeywordMatchEvent {
    pub id: String,
    pub keyword_id: String,
    pub keyword: String,
    pub scope: KeywordScope,
    pub owner_agent_id: Option<String>,
    pub weight: f64,
    pub agency_id: String,
    pub lead_id: String,
    pub call_id: Option<String>,
    pub matched_at: DateTime<Utc>,
    pub booked: bool,
    pub booked_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KeywordStats {
    pub keyword_id: String,
    pub keyword: String,
    pub scope: KeywordScope,
    pub match_count: i64,
    pub booked_count: i64,
    pub conversion_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentDailyState {
    pub agent_id: String,
    pub agency_id: String,
    pub local_date: NaiveDate,
    pub calls: i64,
    pub engaged_calls: i64,
    pub leads: i64,
    pub booked_leads: i64,
    pub high_intent_leads: i64,
    pub aei_score: u8,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SeriesBucket {
    #[default]
    Auto,
    Hour,
    Day,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct DeskSettings {
    pub attribution_window_hours: u32,
    pub high_intent_threshold: u8,
    pub maintenance_interval_secs: u64,
    pub series_bucket: SeriesBucket,
}

impl Default for DeskSettings {
    fn default() -> Self {
        Self {
            attribution_window_hours: 24,
            high_intent_threshold: 70,
            maintenance_interval_secs: 300,
            series_bucket: SeriesBucket::Auto,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{DeskSettings, IntentReasonBreakdown, LeadStatus, QuotaKind};

    #[test]
    fn legacy_breakdown_deserializes_from_string_list() {
        let parsed: IntentReasonBreakdown =
            serde_json::from_str(r#"["long call", "asked about rate"]"#).expect("parse legacy");
        assert_eq!(
            parsed,
            IntentReasonBreakdown::Legacy(vec!["long call".to_string(), "asked about rate".to_string()])
        );
    }

    #[test]
    fn keyword_breakdown_deserializes_from_object() {
        let parsed: IntentReasonBreakdown = serde_json::from_value(serde_json::json!({
            "source": "keyword_match",
            "keywords": [{"keywordId": "k1", "keyword": "rate", "scope": "agent", "weight": 0.85}],
            "scoreFloor": 85,
            "matchedAt": "2026-01-05T10:00:00Z"
        }))
        .expect("parse keyword breakdown");
        assert!(matches!(parsed, IntentReasonBreakdown::KeywordMatch(ref b) if b.keywords.len() == 1));
    }

    #[test]
    fn partial_settings_fill_defaults() {
        let parsed: DeskSettings = serde_json::from_str(r#"{"attributionWindowHours": 6}"#).expect("parse");
        assert_eq!(parsed.attribution_window_hours, 6);
        assert_eq!(parsed.high_intent_threshold, 70);
    }

    #[test]
    fn status_strings_round_trip_and_quota_limits_match_product_caps() {
        for status in [LeadStatus::Pending, LeadStatus::Claimed, LeadStatus::Booked, LeadStatus::Closed] {
            assert_eq!(LeadStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(QuotaKind::Agent.limit(), 25);
        assert_eq!(QuotaKind::Agency.limit(), 100);
        assert_eq!(QuotaKind::Daily.limit(), 10);
    }
}
