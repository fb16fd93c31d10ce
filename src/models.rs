use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const ALL_CATEGORIES: &str = "All";
pub const UNKNOWN_CONTACT: &str = "Unknown Contact";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KpiStatus {
    #[serde(rename = "On Track")]
    OnTrack,
    #[serde(rename = "Below Target")]
    BelowTarget,
    #[serde(rename = "Above Target")]
    AboveTarget,
}

impl KpiStatus {
    /// Classifies an actual value against the +/-10% band around its target.
    pub fn classify(actual: f64, target: f64) -> Self {
        if actual < target * 0.9 {
            Self::BelowTarget
        } else if actual > target * 1.1 {
            Self::AboveTarget
        } else {
            Self::OnTrack
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KpiTrend {
    Upward,
    Downward,
    Steady,
}

impl KpiTrend {
    pub fn between(previous: Option<f64>, latest: f64) -> Self {
        match previous {
            Some(previous) if latest > previous => Self::Upward,
            Some(previous) if latest < previous => Self::Downward,
            _ => Self::Steady,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataPoint {
    pub month: String,
    pub actual: f64,
    pub target: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Kpi {
    pub id: String,
    pub name: String,
    pub category: String,
    pub description: String,
    pub target: f64,
    pub unit: String,
    pub frequency: String,
    pub owner: String,
    pub data: Vec<DataPoint>,
    pub status: KpiStatus,
    pub trend: KpiTrend,
    pub last_updated: DateTime<Utc>,
}

impl Kpi {
    pub fn latest(&self) -> Option<&DataPoint> {
        self.data.last()
    }

    /// Recomputes status and trend from the two most recent data points.
    pub fn recompute_derived(&mut self) {
        let Some(latest) = self.data.last() else {
            self.status = KpiStatus::OnTrack;
            self.trend = KpiTrend::Steady;
            return;
        };
        let previous = self
            .data
            .len()
            .checked_sub(2)
            .map(|index| self.data[index].actual);

        self.status = KpiStatus::classify(latest.actual, latest.target);
        self.trend = KpiTrend::between(previous, latest.actual);
    }

    /// Overwrites the point for `point.month` in place, or appends it when the
    /// month is new. Status, trend and `last_updated` follow.
    pub fn upsert_data_point(&mut self, point: DataPoint, now: DateTime<Utc>) {
        match self.data.iter_mut().find(|existing| existing.month == point.month) {
            Some(existing) => *existing = point,
            None => self.data.push(point),
        }
        self.recompute_derived();
        self.last_updated = now;
    }

    pub fn matches_category(&self, category: &str) -> bool {
        category == ALL_CATEGORIES || self.category == category
    }

    pub fn matches_search(&self, query: &str) -> bool {
        let query = query.to_lowercase();
        self.name.to_lowercase().contains(&query) || self.description.to_lowercase().contains(&query)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KpiSummary {
    #[serde(rename = "totalKPIs")]
    pub total_kpis: usize,
    pub on_track: usize,
    pub below_target: usize,
    pub above_target: usize,
}

impl KpiSummary {
    pub fn over(kpis: &[Kpi]) -> Self {
        let count = |status: KpiStatus| kpis.iter().filter(|kpi| kpi.status == status).count();
        Self {
            total_kpis: kpis.len(),
            on_track: count(KpiStatus::OnTrack),
            below_target: count(KpiStatus::BelowTarget),
            above_target: count(KpiStatus::AboveTarget),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateRange {
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateKpiPayload {
    pub name: String,
    pub category: String,
    #[serde(default)]
    pub description: String,
    pub target: f64,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub frequency: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub data: Vec<DataPoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddDataPointPayload {
    pub kpi_id: String,
    pub month: String,
    pub actual: f64,
    pub target: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub notes: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateContactPayload {
    pub name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionType {
    Call,
    Email,
    Meeting,
    Note,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Interaction {
    pub id: String,
    pub contact_id: String,
    #[serde(rename = "type")]
    pub kind: InteractionType,
    #[serde(default)]
    pub notes: String,
    pub date: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInteractionPayload {
    pub contact_id: String,
    #[serde(rename = "type")]
    pub kind: InteractionType,
    #[serde(default)]
    pub notes: String,
    pub date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub contact_id: Option<String>,
    pub due_date: DateTime<Utc>,
    pub priority: TaskPriority,
    #[serde(default)]
    pub completed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskPayload {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub contact_id: Option<String>,
    pub due_date: DateTime<Utc>,
    pub priority: TaskPriority,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrmAnalytics {
    pub total_contacts: usize,
    pub recent_interactions: usize,
    pub pending_tasks: usize,
    pub monthly_growth: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContactFilter {
    #[default]
    All,
    Recent,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskFilter {
    #[default]
    All,
    Pending,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyActivity {
    pub month: String,
    pub contacts: usize,
    pub interactions: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentActivityEntry {
    pub interaction: Interaction,
    pub contact_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendRow {
    pub month: String,
    pub values: BTreeMap<String, i64>,
}

/// Latest-point variance and capped progress for one KPI. Both are absent
/// when the KPI has no data, and progress is absent for a zero target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KpiPerformance {
    pub kpi_id: String,
    pub variance: Option<f64>,
    pub progress_percent: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactInsights {
    pub recent_contacts: Vec<Contact>,
    pub interaction_breakdown: BTreeMap<InteractionType, usize>,
    pub average_interactions_per_contact: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSettings {
    pub persist_kpis: bool,
    pub recent_window_days: u32,
    pub recent_activity_limit: usize,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            persist_kpis: false,
            recent_window_days: 7,
            recent_activity_limit: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSnapshot {
    pub kpi_summary: KpiSummary,
    pub crm_analytics: CrmAnalytics,
    pub recently_updated: Vec<Kpi>,
    pub top_performing: Vec<Kpi>,
    pub recent_activity: Vec<RecentActivityEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn kpi_with(points: &[(&str, f64, f64)]) -> Kpi {
        Kpi {
            id: "k1".to_string(),
            name: "Employee Turnover Rate".to_string(),
            category: "HR".to_string(),
            description: "Rate at which employees leave".to_string(),
            target: 5.0,
            unit: "%".to_string(),
            frequency: "Monthly".to_string(),
            owner: "HR Department".to_string(),
            data: points
                .iter()
                .map(|(month, actual, target)| DataPoint {
                    month: month.to_string(),
                    actual: *actual,
                    target: *target,
                })
                .collect(),
            status: KpiStatus::OnTrack,
            trend: KpiTrend::Steady,
            last_updated: Utc.with_ymd_and_hms(2023, 6, 12, 16, 20, 0).unwrap(),
        }
    }

    #[test]
    fn status_band_boundaries() {
        assert_eq!(KpiStatus::classify(4.4, 5.0), KpiStatus::BelowTarget);
        assert_eq!(KpiStatus::classify(4.5, 5.0), KpiStatus::OnTrack);
        assert_eq!(KpiStatus::classify(5.5, 5.0), KpiStatus::OnTrack);
        assert_eq!(KpiStatus::classify(5.6, 5.0), KpiStatus::AboveTarget);
    }

    #[test]
    fn trend_compares_latest_two_actuals() {
        assert_eq!(KpiTrend::between(Some(17.0), 20.0), KpiTrend::Upward);
        assert_eq!(KpiTrend::between(Some(20.0), 18.0), KpiTrend::Downward);
        assert_eq!(KpiTrend::between(Some(18.0), 18.0), KpiTrend::Steady);
        assert_eq!(KpiTrend::between(None, 18.0), KpiTrend::Steady);
    }

    #[test]
    fn new_month_is_appended_after_existing_months() {
        let mut kpi = kpi_with(&[("Jan", 6.2, 5.0), ("Feb", 5.8, 5.0)]);
        let now = Utc.with_ymd_and_hms(2023, 7, 1, 0, 0, 0).unwrap();
        kpi.upsert_data_point(
            DataPoint {
                month: "Dec".to_string(),
                actual: 4.4,
                target: 5.0,
            },
            now,
        );

        assert_eq!(kpi.data.len(), 3);
        assert_eq!(kpi.data[2].month, "Dec");
        assert_eq!(kpi.status, KpiStatus::BelowTarget);
        assert_eq!(kpi.trend, KpiTrend::Downward);
        assert_eq!(kpi.last_updated, now);
    }

    #[test]
    fn same_month_overwrites_in_place() {
        let mut kpi = kpi_with(&[("Jan", 6.2, 5.0), ("Feb", 5.8, 5.0), ("Mar", 5.5, 5.0)]);
        let now = Utc.with_ymd_and_hms(2023, 7, 1, 0, 0, 0).unwrap();
        kpi.upsert_data_point(
            DataPoint {
                month: "Feb".to_string(),
                actual: 9.0,
                target: 5.0,
            },
            now,
        );

        assert_eq!(kpi.data.len(), 3);
        assert_eq!(kpi.data[1].month, "Feb");
        assert_eq!(kpi.data[1].actual, 9.0);
        // Mar is still the latest point, so it drives status/trend.
        assert_eq!(kpi.status, KpiStatus::OnTrack);
        assert_eq!(kpi.trend, KpiTrend::Downward);
    }

    #[test]
    fn first_point_is_steady() {
        let mut kpi = kpi_with(&[]);
        kpi.upsert_data_point(
            DataPoint {
                month: "Jan".to_string(),
                actual: 5.6,
                target: 5.0,
            },
            Utc::now(),
        );
        assert_eq!(kpi.trend, KpiTrend::Steady);
        assert_eq!(kpi.status, KpiStatus::AboveTarget);
    }

    #[test]
    fn enum_literals_round_trip() {
        let kpi = kpi_with(&[("Jun", 4.2, 5.0)]);
        let json = serde_json::to_value(&kpi).expect("serialize");
        assert_eq!(json["status"], "On Track");
        assert_eq!(json["trend"], "Steady");
        assert_eq!(json["lastUpdated"], "2023-06-12T16:20:00Z");
        assert_eq!(json["data"][0]["actual"], 4.2);

        let back: Kpi = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, kpi);

        let interaction: Interaction = serde_json::from_str(
            r#"{"id":"i1","contactId":"c1","type":"meeting","notes":"","date":"2024-01-02T03:04:05Z"}"#,
        )
        .expect("interaction");
        assert_eq!(interaction.kind, InteractionType::Meeting);
        let summary = serde_json::to_value(KpiSummary::default()).expect("summary");
        assert!(summary.get("totalKPIs").is_some());
    }
}
