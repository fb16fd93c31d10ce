use crate::clock::Clock;
use crate::errors::{AppError, AppResult};
use crate::models::{
    AddDataPointPayload, CreateKpiPayload, DataPoint, DateRange, Kpi, KpiStatus, KpiSummary, KpiTrend,
    ALL_CATEGORIES,
};
use crate::storage::{load_collection, save_collection, KeyValueStore, KPIS_KEY};
use chrono::{DateTime, Months, Utc};
use once_cell::sync::Lazy;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

const DEFAULT_CATEGORIES: &[&str] = &[ALL_CATEGORIES, "Financial", "Customer", "HR", "Operations", "Marketing"];

fn seed_kpi(
    id: &str,
    name: &str,
    category: &str,
    description: &str,
    target: f64,
    frequency: &str,
    owner: &str,
    actuals: [f64; 6],
    status: KpiStatus,
    trend: KpiTrend,
    last_updated: &str,
) -> Kpi {
    const MONTHS: [&str; 6] = ["Jan", "Feb", "Mar", "Apr", "May", "Jun"];
    Kpi {
        id: id.to_string(),
        name: name.to_string(),
        category: category.to_string(),
        description: description.to_string(),
        target,
        unit: "%".to_string(),
        frequency: frequency.to_string(),
        owner: owner.to_string(),
        data: MONTHS
            .iter()
            .zip(actuals)
            .map(|(month, actual)| DataPoint {
                month: month.to_string(),
                actual,
                target,
            })
            .collect(),
        status,
        trend,
        last_updated: DateTime::parse_from_rfc3339(last_updated)
            .expect("valid seed timestamp")
            .with_timezone(&Utc),
    }
}

static SEED_KPIS: Lazy<Vec<Kpi>> = Lazy::new(|| {
    vec![
        seed_kpi(
            "1",
            "Revenue Growth",
            "Financial",
            "Measures the increase in company revenue between two time periods",
            15.0,
            "Monthly",
            "Finance Department",
            [12.0, 14.0, 16.0, 13.0, 17.0, 20.0],
            KpiStatus::OnTrack,
            KpiTrend::Upward,
            "2023-06-15T14:30:00Z",
        ),
        seed_kpi(
            "2",
            "Customer Satisfaction",
            "Customer",
            "Measures the degree to which customers are satisfied with the product or service",
            90.0,
            "Quarterly",
            "Customer Success Team",
            [86.0, 88.0, 91.0, 93.0, 92.0, 94.0],
            KpiStatus::AboveTarget,
            KpiTrend::Upward,
            "2023-06-10T09:45:00Z",
        ),
        seed_kpi(
            "3",
            "Employee Turnover Rate",
            "HR",
            "Measures the rate at which employees leave the company",
            5.0,
            "Monthly",
            "HR Department",
            [6.2, 5.8, 5.5, 4.9, 4.5, 4.2],
            KpiStatus::AboveTarget,
            KpiTrend::Downward,
            "2023-06-12T16:20:00Z",
        ),
        seed_kpi(
            "4",
            "Product Defect Rate",
            "Operations",
            "Measures the percentage of defective products",
            2.0,
            "Weekly",
            "Quality Assurance Team",
            [2.8, 2.5, 2.2, 1.9, 1.7, 1.5],
            KpiStatus::AboveTarget,
            KpiTrend::Downward,
            "2023-06-14T11:15:00Z",
        ),
        seed_kpi(
            "5",
            "Marketing ROI",
            "Marketing",
            "Measures the return on investment for marketing campaigns",
            300.0,
            "Quarterly",
            "Marketing Team",
            [280.0, 295.0, 310.0, 325.0, 340.0, 355.0],
            KpiStatus::AboveTarget,
            KpiTrend::Upward,
            "2023-06-08T13:50:00Z",
        ),
    ]
});

/// The five sample KPIs the dashboard starts from when nothing is persisted.
pub fn seed_kpis() -> Vec<Kpi> {
    SEED_KPIS.clone()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KpiState {
    pub kpis: Vec<Kpi>,
    pub filtered_kpis: Vec<Kpi>,
    pub categories: Vec<String>,
    pub selected_category: String,
    pub search_query: String,
    pub date_range: DateRange,
    pub summary: KpiSummary,
}

impl KpiState {
    pub fn new(kpis: Vec<Kpi>, now: DateTime<Utc>) -> Self {
        let start_date = now.checked_sub_months(Months::new(6)).unwrap_or(now);
        let summary = KpiSummary::over(&kpis);
        Self {
            filtered_kpis: kpis.clone(),
            kpis,
            categories: DEFAULT_CATEGORIES.iter().map(ToString::to_string).collect(),
            selected_category: ALL_CATEGORIES.to_string(),
            search_query: String::new(),
            date_range: DateRange {
                start_date,
                end_date: now,
            },
            summary,
        }
    }

    pub fn seeded(now: DateTime<Utc>) -> Self {
        Self::new(seed_kpis(), now)
    }

    pub fn find(&self, id: &str) -> Option<&Kpi> {
        self.kpis.iter().find(|kpi| kpi.id == id)
    }

    /// Categories a KPI can be filed under, without the `All` sentinel.
    pub fn assignable_categories(&self) -> Vec<&str> {
        self.categories
            .iter()
            .map(String::as_str)
            .filter(|category| *category != ALL_CATEGORIES)
            .collect()
    }

    fn apply_filters(&mut self) {
        self.filtered_kpis = self
            .kpis
            .iter()
            .filter(|kpi| kpi.matches_category(&self.selected_category) && kpi.matches_search(&self.search_query))
            .cloned()
            .collect();
    }

    fn collection_changed(&mut self) {
        self.apply_filters();
        self.summary = KpiSummary::over(&self.kpis);
    }
}

#[derive(Debug, Clone)]
pub enum KpiAction {
    SetCategory(String),
    SetSearchQuery(String),
    SetDateRange(DateRange),
    AddKpi(Kpi),
    UpdateKpi(Kpi),
    DeleteKpi(String),
    AddDataPoint {
        payload: AddDataPointPayload,
        now: DateTime<Utc>,
    },
    AddCategory(String),
    RemoveCategory(String),
}

impl KpiAction {
    fn name(&self) -> &'static str {
        match self {
            Self::SetCategory(_) => "set_category",
            Self::SetSearchQuery(_) => "set_search_query",
            Self::SetDateRange(_) => "set_date_range",
            Self::AddKpi(_) => "add_kpi",
            Self::UpdateKpi(_) => "update_kpi",
            Self::DeleteKpi(_) => "delete_kpi",
            Self::AddDataPoint { .. } => "add_data_point",
            Self::AddCategory(_) => "add_category",
            Self::RemoveCategory(_) => "remove_category",
        }
    }

    fn mutates_collection(&self) -> bool {
        matches!(
            self,
            Self::AddKpi(_) | Self::UpdateKpi(_) | Self::DeleteKpi(_) | Self::AddDataPoint { .. }
        )
    }
}

/// Pure transition from one KPI snapshot to the next. Never fails: unknown ids
/// leave the collection untouched and unknown categories filter to nothing.
pub fn reduce(state: &KpiState, action: KpiAction) -> KpiState {
    let mut next = state.clone();
    match action {
        KpiAction::SetCategory(category) => {
            next.filtered_kpis = next
                .kpis
                .iter()
                .filter(|kpi| kpi.matches_category(&category))
                .cloned()
                .collect();
            next.selected_category = category;
        }
        KpiAction::SetSearchQuery(query) => {
            next.search_query = query;
            next.apply_filters();
        }
        KpiAction::SetDateRange(range) => {
            next.date_range = range;
        }
        KpiAction::AddKpi(kpi) => {
            next.kpis.push(kpi);
            next.collection_changed();
        }
        KpiAction::UpdateKpi(kpi) => {
            if let Some(existing) = next.kpis.iter_mut().find(|existing| existing.id == kpi.id) {
                *existing = kpi;
            }
            next.collection_changed();
        }
        KpiAction::DeleteKpi(id) => {
            next.kpis.retain(|kpi| kpi.id != id);
            next.collection_changed();
        }
        KpiAction::AddDataPoint { payload, now } => {
            if let Some(kpi) = next.kpis.iter_mut().find(|kpi| kpi.id == payload.kpi_id) {
                kpi.upsert_data_point(
                    DataPoint {
                        month: payload.month,
                        actual: payload.actual,
                        target: payload.target,
                    },
                    now,
                );
            }
            next.collection_changed();
        }
        KpiAction::AddCategory(label) => {
            let label = label.trim();
            if !label.is_empty() && !next.categories.iter().any(|category| category == label) {
                next.categories.push(label.to_string());
            }
        }
        KpiAction::RemoveCategory(label) => {
            if label != ALL_CATEGORIES {
                next.categories.retain(|category| *category != label);
                if next.selected_category == label {
                    next.selected_category = ALL_CATEGORIES.to_string();
                    next.apply_filters();
                }
            }
        }
    }
    next
}

pub type KpiListener = Box<dyn Fn(&KpiState) + Send + Sync>;

/// Holds the current KPI snapshot and notifies subscribers on every dispatch.
pub struct KpiStore {
    state: Arc<KpiState>,
    listeners: Vec<(u64, KpiListener)>,
    next_listener_id: u64,
    clock: Arc<dyn Clock>,
    persistence: Option<Arc<dyn KeyValueStore>>,
}

impl KpiStore {
    /// In-memory store starting from the seed KPIs. Nothing is persisted.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let state = KpiState::seeded(clock.now());
        Self {
            state: Arc::new(state),
            listeners: Vec::new(),
            next_listener_id: 1,
            clock,
            persistence: None,
        }
    }

    /// Store that reads and writes the KPI collection under its own key.
    /// Falls back to the seed set when nothing usable is stored.
    pub fn with_persistence(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> AppResult<Self> {
        let kpis = load_collection::<Kpi>(store.as_ref(), KPIS_KEY)?.unwrap_or_else(seed_kpis);
        tracing::info!(count = kpis.len(), "loaded kpi collection");
        Ok(Self {
            state: Arc::new(KpiState::new(kpis, clock.now())),
            listeners: Vec::new(),
            next_listener_id: 1,
            clock,
            persistence: Some(store),
        })
    }

    pub fn state(&self) -> Arc<KpiState> {
        Arc::clone(&self.state)
    }

    pub fn subscribe(&mut self, listener: KpiListener) -> u64 {
        let id = self.next_listener_id;
        self.next_listener_id += 1;
        self.listeners.push((id, listener));
        id
    }

    pub fn unsubscribe(&mut self, id: u64) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(listener_id, _)| *listener_id != id);
        self.listeners.len() != before
    }

    pub fn dispatch(&mut self, action: KpiAction) -> AppResult<Arc<KpiState>> {
        let action_name = action.name();
        let persist = action.mutates_collection();
        let next = Arc::new(reduce(&self.state, action));

        if persist {
            if let Some(store) = &self.persistence {
                save_collection(store.as_ref(), KPIS_KEY, &next.kpis)?;
            }
        }

        tracing::debug!(
            action = action_name,
            total = next.summary.total_kpis,
            filtered = next.filtered_kpis.len(),
            "kpi state updated"
        );

        self.state = Arc::clone(&next);
        for (_, listener) in &self.listeners {
            listener(next.as_ref());
        }
        Ok(next)
    }

    pub fn set_category(&mut self, category: &str) -> AppResult<Arc<KpiState>> {
        self.dispatch(KpiAction::SetCategory(category.to_string()))
    }

    pub fn set_search_query(&mut self, query: &str) -> AppResult<Arc<KpiState>> {
        self.dispatch(KpiAction::SetSearchQuery(query.to_string()))
    }

    pub fn set_date_range(&mut self, range: DateRange) -> AppResult<Arc<KpiState>> {
        if range.start_date > range.end_date {
            return Err(AppError::Validation("date range starts after it ends".to_string()));
        }
        self.dispatch(KpiAction::SetDateRange(range))
    }

    pub fn add_kpi(&mut self, kpi: Kpi) -> AppResult<Arc<KpiState>> {
        ensure_finite_kpi(&kpi)?;
        self.dispatch(KpiAction::AddKpi(kpi))
    }

    pub fn create_kpi(&mut self, payload: CreateKpiPayload) -> AppResult<Kpi> {
        if payload.name.trim().is_empty() {
            return Err(AppError::Validation("KPI name is required".to_string()));
        }
        if !payload.target.is_finite() {
            return Err(AppError::Validation("KPI target must be a finite number".to_string()));
        }
        payload.data.iter().try_for_each(ensure_finite_point)?;

        let mut kpi = Kpi {
            id: Uuid::new_v4().to_string(),
            name: payload.name,
            category: payload.category,
            description: payload.description,
            target: payload.target,
            unit: payload.unit,
            frequency: payload.frequency,
            owner: payload.owner,
            data: payload.data,
            status: KpiStatus::OnTrack,
            trend: KpiTrend::Steady,
            last_updated: self.clock.now(),
        };
        kpi.recompute_derived();

        self.add_kpi(kpi.clone())?;
        Ok(kpi)
    }

    pub fn update_kpi(&mut self, kpi: Kpi) -> AppResult<Arc<KpiState>> {
        ensure_finite_kpi(&kpi)?;
        self.dispatch(KpiAction::UpdateKpi(kpi))
    }

    pub fn delete_kpi(&mut self, id: &str) -> AppResult<Arc<KpiState>> {
        self.dispatch(KpiAction::DeleteKpi(id.to_string()))
    }

    pub fn add_data_point(&mut self, payload: AddDataPointPayload) -> AppResult<Arc<KpiState>> {
        ensure_finite(payload.actual, payload.target, &payload.month)?;
        let now = self.clock.now();
        self.dispatch(KpiAction::AddDataPoint { payload, now })
    }

    pub fn add_category(&mut self, label: &str) -> AppResult<Arc<KpiState>> {
        self.dispatch(KpiAction::AddCategory(label.to_string()))
    }

    pub fn remove_category(&mut self, label: &str) -> AppResult<Arc<KpiState>> {
        self.dispatch(KpiAction::RemoveCategory(label.to_string()))
    }
}

/// JSON has no encoding for NaN or infinity, so such values would make the
/// persisted collection unreadable.
fn ensure_finite(actual: f64, target: f64, month: &str) -> AppResult<()> {
    if actual.is_finite() && target.is_finite() {
        Ok(())
    } else {
        Err(AppError::Validation(format!(
            "data point for {month} must have finite actual and target values"
        )))
    }
}

fn ensure_finite_point(point: &DataPoint) -> AppResult<()> {
    ensure_finite(point.actual, point.target, &point.month)
}

fn ensure_finite_kpi(kpi: &Kpi) -> AppResult<()> {
    if !kpi.target.is_finite() {
        return Err(AppError::Validation("KPI target must be a finite number".to_string()));
    }
    kpi.data.iter().try_for_each(ensure_finite_point)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::storage::MemoryStore;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 7, 1, 12, 0, 0).unwrap()
    }

    fn store() -> KpiStore {
        KpiStore::new(Arc::new(FixedClock::new(now())))
    }

    fn ids(kpis: &[Kpi]) -> Vec<&str> {
        kpis.iter().map(|kpi| kpi.id.as_str()).collect()
    }

    #[test]
    fn seeded_state_counts_statuses() {
        let state = KpiState::seeded(now());
        assert_eq!(state.kpis.len(), 5);
        assert_eq!(state.filtered_kpis, state.kpis);
        assert_eq!(state.selected_category, "All");
        assert_eq!(
            state.summary,
            KpiSummary {
                total_kpis: 5,
                on_track: 1,
                below_target: 0,
                above_target: 4,
            }
        );
        assert_eq!(state.assignable_categories().len(), 5);
        assert_eq!(state.date_range.end_date, now());
    }

    #[test]
    fn category_filter_then_all_restores_everything() {
        let mut store = store();
        let state = store.set_category("HR").expect("hr");
        assert_eq!(ids(&state.filtered_kpis), vec!["3"]);

        let state = store.set_category("All").expect("all");
        assert_eq!(state.filtered_kpis, state.kpis);
    }

    #[test]
    fn unknown_category_filters_to_empty() {
        let mut store = store();
        let state = store.set_category("Legal").expect("legal");
        assert!(state.filtered_kpis.is_empty());
        assert_eq!(state.kpis.len(), 5);
    }

    #[test]
    fn search_combines_with_category_case_insensitively() {
        let mut store = store();
        let state = store.set_search_query("MEASURES THE").expect("search");
        assert_eq!(state.filtered_kpis.len(), 5);

        store.set_category("Financial").expect("category");
        let state = store.set_search_query("revenue").expect("search");
        assert_eq!(ids(&state.filtered_kpis), vec!["1"]);

        let state = store.set_search_query("satisfaction").expect("search");
        assert!(state.filtered_kpis.is_empty());

        let state = store.set_search_query("").expect("clear");
        assert_eq!(ids(&state.filtered_kpis), vec!["1"]);
    }

    #[test]
    fn summary_tracks_full_collection_not_filtered_view() {
        let mut store = store();
        store.set_category("HR").expect("category");

        let mut below = seed_kpis()[0].clone();
        below.id = "6".to_string();
        below.status = KpiStatus::BelowTarget;
        let state = store.add_kpi(below).expect("add");

        assert_eq!(state.filtered_kpis.len(), 1);
        assert_eq!(state.summary.total_kpis, 6);
        assert_eq!(state.summary.below_target, 1);

        let state = store.delete_kpi("2").expect("delete");
        assert_eq!(state.summary.total_kpis, 5);
        assert_eq!(state.summary.above_target, 3);
    }

    #[test]
    fn update_replaces_in_place_and_ignores_unknown_ids() {
        let mut store = store();
        let mut revised = seed_kpis()[1].clone();
        revised.name = "CSAT".to_string();
        revised.status = KpiStatus::BelowTarget;
        let state = store.update_kpi(revised).expect("update");

        assert_eq!(ids(&state.kpis), vec!["1", "2", "3", "4", "5"]);
        assert_eq!(state.kpis[1].name, "CSAT");
        assert_eq!(state.summary.below_target, 1);

        let mut stray = seed_kpis()[0].clone();
        stray.id = "missing".to_string();
        let before = store.state();
        let after = store.update_kpi(stray).expect("noop update");
        assert_eq!(after.kpis, before.kpis);

        let after = store.delete_kpi("missing").expect("noop delete");
        assert_eq!(after.kpis.len(), 5);
    }

    #[test]
    fn add_data_point_appends_and_recomputes() {
        let mut store = store();
        let state = store
            .add_data_point(AddDataPointPayload {
                kpi_id: "3".to_string(),
                month: "Jul".to_string(),
                actual: 4.4,
                target: 5.0,
            })
            .expect("data point");

        let kpi = state.find("3").expect("kpi");
        assert_eq!(kpi.data.len(), 7);
        assert_eq!(kpi.data.last().map(|point| point.month.as_str()), Some("Jul"));
        assert_eq!(kpi.status, KpiStatus::BelowTarget);
        assert_eq!(kpi.trend, KpiTrend::Upward);
        assert_eq!(kpi.last_updated, now());
        assert_eq!(state.summary.below_target, 1);
    }

    #[test]
    fn add_data_point_for_existing_month_overwrites() {
        let mut store = store();
        let state = store
            .add_data_point(AddDataPointPayload {
                kpi_id: "1".to_string(),
                month: "Jun".to_string(),
                actual: 18.0,
                target: 15.0,
            })
            .expect("data point");

        let kpi = state.find("1").expect("kpi");
        assert_eq!(kpi.data.len(), 6);
        assert_eq!(kpi.data[5].actual, 18.0);
        assert_eq!(kpi.trend, KpiTrend::Upward);
        assert_eq!(kpi.status, KpiStatus::AboveTarget);
    }

    #[test]
    fn add_data_point_for_unknown_kpi_is_noop() {
        let mut store = store();
        let before = store.state();
        let after = store
            .add_data_point(AddDataPointPayload {
                kpi_id: "nope".to_string(),
                month: "Jul".to_string(),
                actual: 1.0,
                target: 1.0,
            })
            .expect("noop");
        assert_eq!(after.kpis, before.kpis);
    }

    #[test]
    fn create_kpi_assigns_id_and_derives_fields() {
        let mut store = store();
        let kpi = store
            .create_kpi(CreateKpiPayload {
                name: "Net Promoter Score".to_string(),
                category: "Customer".to_string(),
                description: "Likelihood to recommend".to_string(),
                target: 50.0,
                unit: "pts".to_string(),
                frequency: "Monthly".to_string(),
                owner: "CX".to_string(),
                data: vec![
                    DataPoint {
                        month: "Jan".to_string(),
                        actual: 40.0,
                        target: 50.0,
                    },
                    DataPoint {
                        month: "Feb".to_string(),
                        actual: 44.0,
                        target: 50.0,
                    },
                ],
            })
            .expect("create");

        assert!(!kpi.id.is_empty());
        assert_eq!(kpi.status, KpiStatus::BelowTarget);
        assert_eq!(kpi.trend, KpiTrend::Upward);
        assert_eq!(store.state().kpis.len(), 6);

        let rejected = store.create_kpi(CreateKpiPayload {
            name: "  ".to_string(),
            category: "Customer".to_string(),
            description: String::new(),
            target: 1.0,
            unit: String::new(),
            frequency: String::new(),
            owner: String::new(),
            data: Vec::new(),
        });
        assert!(matches!(rejected, Err(AppError::Validation(_))));
    }

    #[test]
    fn categories_are_editable() {
        let mut store = store();
        store.add_category(" Legal ").expect("add");
        store.add_category("Legal").expect("duplicate");
        let state = store.add_category("").expect("blank");
        assert_eq!(state.categories.iter().filter(|c| *c == "Legal").count(), 1);

        store.set_category("Legal").expect("select");
        let state = store.remove_category("Legal").expect("remove");
        assert_eq!(state.selected_category, "All");
        assert_eq!(state.filtered_kpis.len(), 5);

        let state = store.remove_category("All").expect("sentinel");
        assert_eq!(state.categories[0], "All");
    }

    #[test]
    fn date_range_must_be_ordered() {
        let mut store = store();
        let range = DateRange {
            start_date: now(),
            end_date: now() - chrono::Duration::days(1),
        };
        assert!(store.set_date_range(range).is_err());

        let range = DateRange {
            start_date: now() - chrono::Duration::days(30),
            end_date: now(),
        };
        let state = store.set_date_range(range).expect("range");
        assert_eq!(state.date_range, range);
    }

    #[test]
    fn subscribers_are_notified_until_removed() {
        let mut store = store();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let id = store.subscribe(Box::new(move |_state| {
            seen.fetch_add(1, Ordering::SeqCst);
        }));

        store.set_category("HR").expect("dispatch");
        store.set_search_query("rate").expect("dispatch");
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        assert!(store.unsubscribe(id));
        assert!(!store.unsubscribe(id));
        store.set_category("All").expect("dispatch");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn snapshots_are_immutable_between_dispatches() {
        let mut store = store();
        let before = store.state();
        store.delete_kpi("1").expect("delete");
        assert_eq!(before.kpis.len(), 5);
        assert_eq!(store.state().kpis.len(), 4);
    }

    #[test]
    fn persistence_is_opt_in() {
        let backing = Arc::new(MemoryStore::new());
        let clock = Arc::new(FixedClock::new(now()));

        let mut persistent =
            KpiStore::with_persistence(backing.clone(), clock.clone()).expect("persistent store");
        persistent.delete_kpi("5").expect("delete");
        persistent.set_category("HR").expect("filter changes are not written");

        let reloaded = KpiStore::with_persistence(backing.clone(), clock.clone()).expect("reload");
        assert_eq!(reloaded.state().kpis.len(), 4);

        let mut ephemeral = KpiStore::new(clock);
        ephemeral.delete_kpi("5").expect("delete");
        assert_eq!(KpiStore::new(Arc::new(FixedClock::new(now()))).state().kpis.len(), 5);
    }

    #[test]
    fn non_finite_values_are_rejected_before_saving() {
        let backing = Arc::new(MemoryStore::new());
        let clock = Arc::new(FixedClock::new(now()));
        let mut persistent =
            KpiStore::with_persistence(backing.clone(), clock.clone()).expect("persistent store");
        persistent.delete_kpi("5").expect("delete");
        persistent.delete_kpi("4").expect("delete");

        let rejected = persistent.add_data_point(AddDataPointPayload {
            kpi_id: "1".to_string(),
            month: "Jul".to_string(),
            actual: f64::NAN,
            target: 15.0,
        });
        assert!(matches!(rejected, Err(AppError::Validation(_))));
        let rejected = persistent.add_data_point(AddDataPointPayload {
            kpi_id: "1".to_string(),
            month: "Jul".to_string(),
            actual: 10.0,
            target: f64::INFINITY,
        });
        assert!(matches!(rejected, Err(AppError::Validation(_))));

        let rejected = persistent.create_kpi(CreateKpiPayload {
            name: "Churn".to_string(),
            category: "Customer".to_string(),
            description: String::new(),
            target: 2.0,
            unit: "%".to_string(),
            frequency: "Monthly".to_string(),
            owner: "CX".to_string(),
            data: vec![DataPoint {
                month: "Jan".to_string(),
                actual: f64::NEG_INFINITY,
                target: 2.0,
            }],
        });
        assert!(matches!(rejected, Err(AppError::Validation(_))));

        let mut broken = seed_kpis()[0].clone();
        broken.data[0].actual = f64::NAN;
        assert!(persistent.update_kpi(broken).is_err());

        let stored = backing.get(KPIS_KEY).expect("get").expect("saved kpis");
        assert!(!stored.contains("null"));
        let reloaded = KpiStore::with_persistence(backing, clock).expect("reload");
        assert_eq!(ids(&reloaded.state().kpis), vec!["1", "2", "3"]);
        assert_eq!(reloaded.state().find("1").map(|kpi| kpi.data.len()), Some(6));
    }

    #[test]
    fn derived_fields_follow_stored_sequence_not_submitted_point() {
        let mut store = store();
        let state = store
            .add_data_point(AddDataPointPayload {
                kpi_id: "1".to_string(),
                month: "Feb".to_string(),
                actual: 1.0,
                target: 15.0,
            })
            .expect("overwrite earlier month");
        let kpi = state.find("1").expect("kpi");
        assert_eq!(kpi.data[1].actual, 1.0);
        assert_eq!(kpi.status, KpiStatus::AboveTarget);
        assert_eq!(kpi.trend, KpiTrend::Upward);

        // Jun drops from 20 to 19 but still sits above May's 17.
        let state = store
            .add_data_point(AddDataPointPayload {
                kpi_id: "1".to_string(),
                month: "Jun".to_string(),
                actual: 19.0,
                target: 15.0,
            })
            .expect("overwrite latest month");
        assert_eq!(state.find("1").map(|kpi| kpi.trend), Some(KpiTrend::Upward));
    }
}
