//! KPI rollups over calls, leads and loads for a time window.
//!
//! Inputs are snapshots read from the store; nothing here writes. Structural
//! oddities are reported as warnings on the report instead of errors.

use crate::errors::{DeskError, DeskResult};
use crate::models::{Agent, AgentDailyState, CallRecord, Lead, LeadStatus, Load, LoadStatus, SeriesBucket};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub const ENGAGED_THRESHOLD_SECS: i64 = 20;
pub const QUICK_HANGUP_SECS: i64 = 10;
const AUTO_HOURLY_MAX_HOURS: i64 = 48;
const MAX_SERIES_BUCKETS: i64 = 2_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl MetricsWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> DeskResult<Self> {
        if end <= start {
            return Err(DeskError::Validation("metrics window must end after it starts".to_string()));
        }
        Ok(Self { start, end })
    }

    pub fn trailing_hours(now: DateTime<Utc>, hours: i64) -> DeskResult<Self> {
        let start = Duration::try_hours(hours)
            .and_then(|span| now.checked_sub_signed(span))
            .ok_or_else(|| DeskError::Validation(format!("metrics window of {} hours is out of range", hours)))?;
        Self::new(start, now)
    }

    /// Half-open: `[start, end)`.
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at < self.end
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsFilters {
    pub agency_id: Option<String>,
    pub agent_id: Option<String>,
}

impl MetricsFilters {
    fn call_matches(&self, call: &CallRecord) -> bool {
        self.agency_id.as_deref().map_or(true, |agency| call.agency_id == agency)
            && self
                .agent_id
                .as_deref()
                .map_or(true, |agent| call.agent_id.as_deref() == Some(agent))
    }

    fn lead_matches(&self, lead: &Lead) -> bool {
        self.agency_id.as_deref().map_or(true, |agency| lead.agency_id == agency)
            && self.agent_id.as_deref().map_or(true, |agent| lead_handled_by(lead, agent))
    }

    fn load_matches(&self, load: &Load) -> bool {
        self.agency_id.as_deref().map_or(true, |agency| load.agency_id == agency)
            && self.agent_id.as_deref().map_or(true, |agent| {
                load.booking.as_ref().map(|booking| booking.booked_by == agent).unwrap_or(false)
            })
    }
}

fn lead_handled_by(lead: &Lead, agent_id: &str) -> bool {
    lead.claim.as_ref().map(|claim| claim.agent_id == agent_id).unwrap_or(false)
        || lead.booking.as_ref().map(|booking| booking.booked_by == agent_id).unwrap_or(false)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadFunnel {
    pub pending: i64,
    pub claimed: i64,
    pub booked: i64,
    pub closed: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Kpis {
    pub total_calls: i64,
    /// Calls at or over the engagement threshold, or flagged high intent.
    pub engaged_calls: i64,
    /// Display value: never below the number of leads in the window.
    pub engaged_count: i64,
    pub quick_hangups: i64,
    pub total_duration_secs: i64,
    pub avg_duration_secs: f64,
    pub total_leads: i64,
    pub high_intent_leads: i64,
    pub funnel: LeadFunnel,
    pub booked_loads: i64,
    pub call_to_booking_rate: f64,
    pub lead_to_booking_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityBucket {
    pub start: DateTime<Utc>,
    pub calls: i64,
    pub engaged_calls: i64,
    pub leads: i64,
    pub bookings: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AggregationWarning {
    EngagedExceedsLeads { engaged_calls: i64, total_leads: i64 },
    LeadReferencesMissingCall { lead_id: String, call_id: String },
    BookingNotLinkedBack { load_id: String, lead_id: String },
    InvalidCallDuration { call_id: String },
    /// The series hit its bucket cap; events after `covered_until` count in
    /// the KPIs but not in the series.
    SeriesTruncated { covered_until: DateTime<Utc>, dropped_events: i64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsReport {
    pub window: MetricsWindow,
    pub bucket: SeriesBucket,
    pub kpis: Kpis,
    pub series: Vec<ActivityBucket>,
    pub warnings: Vec<AggregationWarning>,
}

pub fn is_engaged(call: &CallRecord) -> bool {
    call.is_high_intent || call.duration_secs.map(|secs| secs >= ENGAGED_THRESHOLD_SECS).unwrap_or(false)
}

pub fn is_quick_hangup(call: &CallRecord) -> bool {
    call.duration_secs
        .map(|secs| (0..QUICK_HANGUP_SECS).contains(&secs))
        .unwrap_or(false)
}

fn rate(numerator: i64, denominator: i64) -> f64 {
    if denominator <= 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

fn resolve_bucket(requested: SeriesBucket, window: &MetricsWindow) -> SeriesBucket {
    let hours = (window.end - window.start).num_hours();
    match requested {
        SeriesBucket::Auto if hours <= AUTO_HOURLY_MAX_HOURS => SeriesBucket::Hour,
        SeriesBucket::Auto => SeriesBucket::Day,
        SeriesBucket::Hour if hours > MAX_SERIES_BUCKETS => SeriesBucket::Day,
        other => other,
    }
}

fn bucket_floor(at: DateTime<Utc>, bucket: SeriesBucket) -> DateTime<Utc> {
    let naive = at.naive_utc();
    let floored = match bucket {
        SeriesBucket::Day => naive.date().and_time(NaiveTime::MIN),
        _ => naive
            .date()
            .and_time(NaiveTime::MIN)
            .checked_add_signed(Duration::hours(i64::from(naive.hour())))
            .unwrap_or(naive),
    };
    Utc.from_utc_datetime(&floored)
}

fn bucket_step(bucket: SeriesBucket) -> Duration {
    match bucket {
        SeriesBucket::Day => Duration::days(1),
        _ => Duration::hours(1),
    }
}

fn empty_series(window: &MetricsWindow, bucket: SeriesBucket) -> Vec<ActivityBucket> {
    let step = bucket_step(bucket);
    let mut series = Vec::new();
    let mut cursor = bucket_floor(window.start, bucket);
    while cursor < window.end && (series.len() as i64) < MAX_SERIES_BUCKETS {
        series.push(ActivityBucket {
            start: cursor,
            calls: 0,
            engaged_calls: 0,
            leads: 0,
            bookings: 0,
        });
        cursor += step;
    }
    series
}

fn bucket_index(series: &[ActivityBucket], at: DateTime<Utc>, bucket: SeriesBucket) -> Option<usize> {
    let first = series.first()?.start;
    let offset = (at - first).num_seconds();
    if offset < 0 {
        return None;
    }
    let index = usize::try_from(offset / bucket_step(bucket).num_seconds()).ok()?;
    (index < series.len()).then_some(index)
}

pub fn aggregate(
    calls: &[CallRecord],
    leads: &[Lead],
    loads: &[Load],
    window: MetricsWindow,
    filters: &MetricsFilters,
    requested_bucket: SeriesBucket,
) -> MetricsReport {
    let bucket = resolve_bucket(requested_bucket, &window);
    let mut series = empty_series(&window, bucket);
    let mut warnings = Vec::new();
    let mut kpis = Kpis::default();

    let known_calls: HashSet<&str> = calls.iter().map(|call| call.id.as_str()).collect();
    let mut timed_calls = 0i64;
    let mut unbucketed = 0i64;

    for call in calls
        .iter()
        .filter(|call| filters.call_matches(call) && window.contains(call.started_at))
    {
        kpis.total_calls += 1;
        let engaged = is_engaged(call);
        if engaged {
            kpis.engaged_calls += 1;
        }
        if is_quick_hangup(call) {
            kpis.quick_hangups += 1;
        }
        match call.duration_secs {
            Some(secs) if secs >= 0 => {
                kpis.total_duration_secs += secs;
                timed_calls += 1;
            }
            _ => warnings.push(AggregationWarning::InvalidCallDuration {
                call_id: call.id.clone(),
            }),
        }
        match bucket_index(&series, call.started_at, bucket) {
            Some(index) => {
                series[index].calls += 1;
                if engaged {
                    series[index].engaged_calls += 1;
                }
            }
            None => unbucketed += 1,
        }
    }
    kpis.avg_duration_secs = rate(kpis.total_duration_secs, timed_calls);

    for lead in leads
        .iter()
        .filter(|lead| filters.lead_matches(lead) && window.contains(lead.created_at))
    {
        kpis.total_leads += 1;
        if lead.is_high_intent {
            kpis.high_intent_leads += 1;
        }
        match lead.status {
            LeadStatus::Pending => kpis.funnel.pending += 1,
            LeadStatus::Claimed => kpis.funnel.claimed += 1,
            LeadStatus::Booked => kpis.funnel.booked += 1,
            LeadStatus::Closed => kpis.funnel.closed += 1,
        }
        if let Some(call_id) = lead.call_id.as_deref() {
            if !known_calls.contains(call_id) {
                warnings.push(AggregationWarning::LeadReferencesMissingCall {
                    lead_id: lead.id.clone(),
                    call_id: call_id.to_string(),
                });
            }
        }
        match bucket_index(&series, lead.created_at, bucket) {
            Some(index) => series[index].leads += 1,
            None => unbucketed += 1,
        }
    }

    for load in loads.iter().filter(|load| filters.load_matches(load)) {
        let Some(booking) = load.booking.as_ref().filter(|_| load.status == LoadStatus::Booked) else {
            continue;
        };
        if !window.contains(booking.booked_at) {
            continue;
        }
        kpis.booked_loads += 1;
        match bucket_index(&series, booking.booked_at, bucket) {
            Some(index) => series[index].bookings += 1,
            None => unbucketed += 1,
        }
        if let Some(lead_id) = booking.lead_id.as_deref() {
            let linked_back = leads
                .iter()
                .find(|lead| lead.id == lead_id)
                .map(|lead| lead.load_id.as_deref() == Some(load.id.as_str()));
            // Only flag leads we can see; a lead outside the supplied set is not evidence.
            if linked_back == Some(false) {
                warnings.push(AggregationWarning::BookingNotLinkedBack {
                    load_id: load.id.clone(),
                    lead_id: lead_id.to_string(),
                });
            }
        }
    }

    if kpis.engaged_calls > kpis.total_leads {
        warnings.push(AggregationWarning::EngagedExceedsLeads {
            engaged_calls: kpis.engaged_calls,
            total_leads: kpis.total_leads,
        });
    }
    if unbucketed > 0 {
        if let Some(last) = series.last() {
            warnings.push(AggregationWarning::SeriesTruncated {
                covered_until: last.start + bucket_step(bucket),
                dropped_events: unbucketed,
            });
        }
    }
    kpis.engaged_count = kpis.engaged_calls.max(kpis.total_leads);
    kpis.call_to_booking_rate = rate(kpis.booked_loads, kpis.total_calls);
    kpis.lead_to_booking_rate = rate(kpis.funnel.booked, kpis.total_leads);

    MetricsReport {
        window,
        bucket,
        kpis,
        series,
        warnings,
    }
}

/// Local calendar date for an agent plus its UTC bounds `[start, end)`.
pub fn local_day_bounds(now: DateTime<Utc>, utc_offset_minutes: i32) -> (NaiveDate, DateTime<Utc>, DateTime<Utc>) {
    let offset = Duration::minutes(i64::from(utc_offset_minutes));
    let local_date = (now.naive_utc() + offset).date();
    let start = Utc.from_utc_datetime(&(local_date.and_time(NaiveTime::MIN) - offset));
    (local_date, start, start + Duration::days(1))
}

/// Agent effectiveness: 50% conversion, 30% call quality, 20% intent rate.
pub fn aei_score(leads: i64, booked: i64, calls: i64, engaged: i64, high_intent: i64) -> u8 {
    let conversion = rate(booked, leads).min(1.0);
    let quality = rate(engaged, calls).min(1.0);
    let intent = rate(high_intent, leads).min(1.0);
    let raw = (100.0 * (0.5 * conversion + 0.3 * quality + 0.2 * intent)).round();
    raw.clamp(0.0, 100.0) as u8
}

pub fn daily_rollup(agent: &Agent, calls: &[CallRecord], leads: &[Lead], now: DateTime<Utc>) -> AgentDailyState {
    let (local_date, start, end) = local_day_bounds(now, agent.utc_offset_minutes);
    let in_day = |at: DateTime<Utc>| at >= start && at < end;

    let agent_calls = calls
        .iter()
        .filter(|call| call.agent_id.as_deref() == Some(agent.id.as_str()) && in_day(call.started_at))
        .collect::<Vec<_>>();
    let agent_leads = leads
        .iter()
        .filter(|lead| lead_handled_by(lead, &agent.id) && in_day(lead.created_at))
        .collect::<Vec<_>>();

    let calls_count = agent_calls.len() as i64;
    let engaged = agent_calls.iter().filter(|call| is_engaged(call)).count() as i64;
    let leads_count = agent_leads.len() as i64;
    let booked = agent_leads
        .iter()
        .filter(|lead| lead.status == LeadStatus::Booked)
        .count() as i64;
    let high_intent = agent_leads.iter().filter(|lead| lead.is_high_intent).count() as i64;

    AgentDailyState {
        agent_id: agent.id.clone(),
        agency_id: agent.agency_id.clone(),
        local_date,
        calls: calls_count,
        engaged_calls: engaged,
        leads: leads_count,
        booked_leads: booked,
        high_intent_leads: high_intent,
        aei_score: aei_score(leads_count, booked, calls_count, engaged, high_intent),
        updated_at: now,
    }
}
