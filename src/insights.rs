//! Read-only dashboard queries over store snapshots.

use crate::crm::CrmState;
use crate::kpi::KpiState;
use crate::models::{
    AppSettings, Contact, ContactInsights, DashboardSnapshot, InteractionType, Kpi, KpiPerformance, MonthlyActivity,
    RecentActivityEntry, TrendRow,
};
use chrono::{DateTime, Datelike, Months, Utc};
use std::cmp::Ordering;
use std::collections::BTreeMap;

const RECENTLY_UPDATED_LIMIT: usize = 5;
const TOP_PERFORMING_LIMIT: usize = 3;
const RECENT_CONTACTS_LIMIT: usize = 6;
const ACTIVITY_MONTHS: u32 = 6;

pub fn recently_updated(kpis: &[Kpi], limit: usize) -> Vec<Kpi> {
    let mut sorted = kpis.to_vec();
    sorted.sort_by(|a, b| b.last_updated.cmp(&a.last_updated));
    sorted.truncate(limit);
    sorted
}

fn performance_ratio(kpi: &Kpi) -> Option<f64> {
    let latest = kpi.latest()?;
    (latest.target != 0.0).then(|| latest.actual / latest.target)
}

/// KPIs whose latest actual beats its target, best ratio first.
pub fn top_performing(kpis: &[Kpi], limit: usize) -> Vec<Kpi> {
    let mut ranked: Vec<(f64, &Kpi)> = kpis
        .iter()
        .filter(|kpi| kpi.latest().is_some_and(|latest| latest.actual > latest.target))
        .filter_map(|kpi| performance_ratio(kpi).map(|ratio| (ratio, kpi)))
        .collect();
    ranked.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));
    ranked.into_iter().take(limit).map(|(_, kpi)| kpi.clone()).collect()
}

pub fn latest_variance(kpi: &Kpi) -> Option<f64> {
    kpi.latest().map(|latest| latest.actual - latest.target)
}

/// Share of target reached by the latest point, capped at 100.
pub fn progress_percent(kpi: &Kpi) -> Option<f64> {
    performance_ratio(kpi).map(|ratio| (ratio * 100.0).min(100.0))
}

pub fn kpi_performance(kpi: &Kpi) -> KpiPerformance {
    KpiPerformance {
        kpi_id: kpi.id.clone(),
        variance: latest_variance(kpi),
        progress_percent: progress_percent(kpi),
    }
}

/// Each KPI's actuals as a rounded percentage of the point target, aligned by
/// position against the first KPI's months.
pub fn normalized_trend(kpis: &[Kpi]) -> Vec<TrendRow> {
    let Some(first) = kpis.first() else {
        return Vec::new();
    };

    first
        .data
        .iter()
        .enumerate()
        .map(|(index, point)| {
            let values = kpis
                .iter()
                .filter_map(|kpi| {
                    let point = kpi.data.get(index)?;
                    if point.target == 0.0 {
                        return None;
                    }
                    Some((kpi.name.clone(), (point.actual / point.target * 100.0).round() as i64))
                })
                .collect();
            TrendRow {
                month: point.month.clone(),
                values,
            }
        })
        .collect()
}

pub fn recent_activity(state: &CrmState, limit: usize) -> Vec<RecentActivityEntry> {
    let mut interactions: Vec<_> = state.interactions.iter().collect();
    interactions.sort_by(|a, b| b.date.cmp(&a.date));
    interactions
        .into_iter()
        .take(limit)
        .map(|interaction| RecentActivityEntry {
            contact_name: state.contact_label(Some(interaction.contact_id.as_str())).to_string(),
            interaction: interaction.clone(),
        })
        .collect()
}

pub fn recent_contacts(state: &CrmState) -> Vec<Contact> {
    let mut contacts = state.contacts.clone();
    contacts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    contacts.truncate(RECENT_CONTACTS_LIMIT);
    contacts
}

fn same_month(left: DateTime<Utc>, right: DateTime<Utc>) -> bool {
    left.year() == right.year() && left.month() == right.month()
}

/// Contacts created and interactions logged per calendar month, oldest of the
/// last six months first.
pub fn monthly_activity(state: &CrmState, now: DateTime<Utc>) -> Vec<MonthlyActivity> {
    (0..ACTIVITY_MONTHS)
        .rev()
        .filter_map(|offset| now.checked_sub_months(Months::new(offset)))
        .map(|month| MonthlyActivity {
            month: month.format("%b").to_string(),
            contacts: state
                .contacts
                .iter()
                .filter(|contact| same_month(contact.created_at, month))
                .count(),
            interactions: state
                .interactions
                .iter()
                .filter(|interaction| same_month(interaction.date, month))
                .count(),
        })
        .collect()
}

pub fn interaction_breakdown(state: &CrmState) -> BTreeMap<InteractionType, usize> {
    state.interactions.iter().fold(BTreeMap::new(), |mut counts, interaction| {
        *counts.entry(interaction.kind).or_insert(0) += 1;
        counts
    })
}

pub fn average_interactions_per_contact(state: &CrmState) -> f64 {
    if state.contacts.is_empty() {
        return 0.0;
    }
    let average = state.interactions.len() as f64 / state.contacts.len() as f64;
    (average * 10.0).round() / 10.0
}

pub fn contact_insights(state: &CrmState) -> ContactInsights {
    ContactInsights {
        recent_contacts: recent_contacts(state),
        interaction_breakdown: interaction_breakdown(state),
        average_interactions_per_contact: average_interactions_per_contact(state),
    }
}

pub fn dashboard_snapshot(kpis: &KpiState, crm: &CrmState, settings: &AppSettings) -> DashboardSnapshot {
    DashboardSnapshot {
        kpi_summary: kpis.summary.clone(),
        crm_analytics: crm.analytics,
        recently_updated: recently_updated(&kpis.kpis, RECENTLY_UPDATED_LIMIT),
        top_performing: top_performing(&kpis.kpis, TOP_PERFORMING_LIMIT),
        recent_activity: recent_activity(crm, settings.recent_activity_limit),
    }
}
