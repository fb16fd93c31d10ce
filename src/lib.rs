pub mod clock;
pub mod crm;
mod db;
pub mod errors;
pub mod insights;
pub mod kpi;
pub mod models;
pub mod storage;

pub use crate::db::Database;

use crate::clock::{Clock, SystemClock};
use crate::crm::{CrmState, CrmStore, GrowthSource, RandomGrowth};
use crate::errors::{AppError, AppResult};
use crate::kpi::{KpiState, KpiStore};
use crate::models::{
    AddDataPointPayload, AppSettings, Contact, ContactFilter, ContactInsights, CreateContactPayload,
    CreateInteractionPayload, CreateKpiPayload, CreateTaskPayload, DashboardSnapshot, DateRange, Interaction, Kpi,
    KpiPerformance, MonthlyActivity, Task, TaskFilter, TrendRow,
};
use crate::storage::{KeyValueStore, MemoryStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

const DATA_DIR_ENV: &str = "KPI_DASHBOARD_DATA_DIR";
const DEFAULT_DATA_DIR: &str = ".kpi-dashboard";
const DATABASE_FILE: &str = "dashboard.db";

/// Both stores plus the settings they were opened with.
pub struct DashboardApp {
    database: Option<Arc<Database>>,
    settings: AppSettings,
    kpis: KpiStore,
    crm: CrmStore,
}

impl DashboardApp {
    pub fn open(data_dir: &Path) -> AppResult<Self> {
        let database = Arc::new(Database::new(&data_dir.join(DATABASE_FILE))?);
        let settings = database.get_settings()?;
        let storage: Arc<dyn KeyValueStore> = database.clone();
        let mut app = Self::with_parts(storage, settings, Arc::new(SystemClock), Box::new(RandomGrowth))?;
        app.database = Some(database);
        Ok(app)
    }

    /// Ephemeral app backed by an in-memory store. Nothing outlives the process.
    pub fn in_memory(clock: Arc<dyn Clock>, growth: Box<dyn GrowthSource>) -> AppResult<Self> {
        Self::with_parts(Arc::new(MemoryStore::new()), AppSettings::default(), clock, growth)
    }

    pub fn with_parts(
        storage: Arc<dyn KeyValueStore>,
        settings: AppSettings,
        clock: Arc<dyn Clock>,
        growth: Box<dyn GrowthSource>,
    ) -> AppResult<Self> {
        let kpis = if settings.persist_kpis {
            KpiStore::with_persistence(storage.clone(), clock.clone())?
        } else {
            KpiStore::new(clock.clone())
        };
        let crm = CrmStore::load(storage, clock, growth, settings.recent_window_days)?;

        Ok(Self {
            database: None,
            settings,
            kpis,
            crm,
        })
    }

    pub fn settings(&self) -> &AppSettings {
        &self.settings
    }

    /// Merges `update` into the stored settings. Store wiring (KPI persistence,
    /// the recent window) picks the new values up on the next `open`.
    pub fn update_settings(&mut self, update: serde_json::Value) -> AppResult<AppSettings> {
        let settings = match &self.database {
            Some(database) => database.update_settings(update)?,
            None => {
                let mut merged = serde_json::to_value(&self.settings)?;
                db::merge_json(&mut merged, update);
                serde_json::from_value(merged).map_err(|err| AppError::Validation(err.to_string()))?
            }
        };
        self.settings = settings.clone();
        Ok(settings)
    }

    pub fn kpis(&mut self) -> &mut KpiStore {
        &mut self.kpis
    }

    pub fn crm(&mut self) -> &mut CrmStore {
        &mut self.crm
    }

    pub fn kpi_state(&self) -> Arc<KpiState> {
        self.kpis.state()
    }

    pub fn crm_state(&self) -> Arc<CrmState> {
        self.crm.state()
    }

    pub fn snapshot(&self) -> DashboardSnapshot {
        insights::dashboard_snapshot(&self.kpis.state(), &self.crm.state(), &self.settings)
    }
}

fn to_client_error(error: impl std::fmt::Display) -> String {
    error.to_string()
}

pub fn kpi_set_category(app: &mut DashboardApp, category: String) -> Result<Arc<KpiState>, String> {
    app.kpis().set_category(&category).map_err(to_client_error)
}

pub fn kpi_set_search_query(app: &mut DashboardApp, query: String) -> Result<Arc<KpiState>, String> {
    app.kpis().set_search_query(&query).map_err(to_client_error)
}

pub fn kpi_set_date_range(app: &mut DashboardApp, range: DateRange) -> Result<Arc<KpiState>, String> {
    app.kpis().set_date_range(range).map_err(to_client_error)
}

pub fn kpi_create(app: &mut DashboardApp, payload: CreateKpiPayload) -> Result<Kpi, String> {
    app.kpis().create_kpi(payload).map_err(to_client_error)
}

pub fn kpi_add(app: &mut DashboardApp, kpi: Kpi) -> Result<Arc<KpiState>, String> {
    app.kpis().add_kpi(kpi).map_err(to_client_error)
}

pub fn kpi_update(app: &mut DashboardApp, kpi: Kpi) -> Result<Arc<KpiState>, String> {
    app.kpis().update_kpi(kpi).map_err(to_client_error)
}

pub fn kpi_delete(app: &mut DashboardApp, kpi_id: String) -> Result<Arc<KpiState>, String> {
    app.kpis().delete_kpi(&kpi_id).map_err(to_client_error)
}

pub fn kpi_add_data_point(app: &mut DashboardApp, payload: AddDataPointPayload) -> Result<Arc<KpiState>, String> {
    app.kpis().add_data_point(payload).map_err(to_client_error)
}

pub fn kpi_get(app: &DashboardApp, kpi_id: String) -> Result<Kpi, String> {
    app.kpi_state()
        .find(&kpi_id)
        .cloned()
        .ok_or_else(|| to_client_error(AppError::NotFound(format!("KPI {}", kpi_id))))
}

pub fn kpi_performance_get(app: &DashboardApp, kpi_id: String) -> Result<KpiPerformance, String> {
    app.kpi_state()
        .find(&kpi_id)
        .map(insights::kpi_performance)
        .ok_or_else(|| to_client_error(AppError::NotFound(format!("KPI {}", kpi_id))))
}

/// Trend rows over the filtered view, so the chart follows the category and
/// search filters.
pub fn kpi_trend_get(app: &DashboardApp) -> Result<Vec<TrendRow>, String> {
    Ok(insights::normalized_trend(&app.kpi_state().filtered_kpis))
}

pub fn category_add(app: &mut DashboardApp, label: String) -> Result<Arc<KpiState>, String> {
    app.kpis().add_category(&label).map_err(to_client_error)
}

pub fn category_remove(app: &mut DashboardApp, label: String) -> Result<Arc<KpiState>, String> {
    app.kpis().remove_category(&label).map_err(to_client_error)
}

pub fn contact_create(app: &mut DashboardApp, payload: CreateContactPayload) -> Result<Contact, String> {
    app.crm().add_contact(payload).map_err(to_client_error)
}

pub fn contact_update(app: &mut DashboardApp, contact: Contact) -> Result<Arc<CrmState>, String> {
    app.crm().update_contact(contact).map_err(to_client_error)
}

pub fn contact_delete(app: &mut DashboardApp, contact_id: String) -> Result<Arc<CrmState>, String> {
    app.crm().delete_contact(&contact_id).map_err(to_client_error)
}

pub fn contact_get(app: &DashboardApp, contact_id: String) -> Result<Option<Contact>, String> {
    Ok(app.crm_state().find_contact(&contact_id).cloned())
}

pub fn contacts_search(app: &DashboardApp, query: String, filter: ContactFilter) -> Result<Vec<Contact>, String> {
    let state = app.crm_state();
    let contacts = state
        .search_contacts(&query, filter, app.crm.now(), app.crm.recent_window_days())
        .into_iter()
        .cloned()
        .collect();
    Ok(contacts)
}

pub fn interaction_create(app: &mut DashboardApp, payload: CreateInteractionPayload) -> Result<Interaction, String> {
    app.crm().add_interaction(payload).map_err(to_client_error)
}

pub fn contact_interactions_list(app: &DashboardApp, contact_id: String) -> Result<Vec<Interaction>, String> {
    let state = app.crm_state();
    Ok(state.interactions_for_contact(&contact_id).into_iter().cloned().collect())
}

pub fn task_create(app: &mut DashboardApp, payload: CreateTaskPayload) -> Result<Task, String> {
    app.crm().add_task(payload).map_err(to_client_error)
}

pub fn task_update(app: &mut DashboardApp, task: Task) -> Result<Arc<CrmState>, String> {
    app.crm().update_task(task).map_err(to_client_error)
}

pub fn task_toggle(app: &mut DashboardApp, task_id: String) -> Result<Arc<CrmState>, String> {
    app.crm().toggle_task(&task_id).map_err(to_client_error)
}

pub fn tasks_list(app: &DashboardApp, filter: TaskFilter) -> Result<Vec<Task>, String> {
    Ok(app.crm_state().filter_tasks(filter).into_iter().cloned().collect())
}

pub fn analytics_refresh(app: &mut DashboardApp) -> Result<Arc<CrmState>, String> {
    Ok(app.crm().refresh_analytics())
}

pub fn analytics_monthly_activity(app: &DashboardApp) -> Result<Vec<MonthlyActivity>, String> {
    Ok(insights::monthly_activity(&app.crm_state(), app.crm.now()))
}

pub fn analytics_contact_insights(app: &DashboardApp) -> Result<ContactInsights, String> {
    Ok(insights::contact_insights(&app.crm_state()))
}

pub fn settings_get(app: &DashboardApp) -> Result<AppSettings, String> {
    Ok(app.settings().clone())
}

pub fn settings_update(app: &mut DashboardApp, update: serde_json::Value) -> Result<AppSettings, String> {
    app.update_settings(update).map_err(to_client_error)
}

pub fn dashboard_get(app: &DashboardApp) -> Result<DashboardSnapshot, String> {
    Ok(app.snapshot())
}

/// Boots logging and storage, then prints the dashboard snapshot as JSON.
pub fn run() -> anyhow::Result<()> {
    let data_dir = std::env::var_os(DATA_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
    init_tracing(&data_dir).map_err(|error| anyhow::anyhow!(error))?;

    let app = DashboardApp::open(&data_dir)?;
    let snapshot = app.snapshot();
    tracing::info!(
        data_dir = %data_dir.display(),
        kpis = snapshot.kpi_summary.total_kpis,
        contacts = snapshot.crm_analytics.total_contacts,
        "dashboard ready"
    );

    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

fn init_tracing(data_dir: &Path) -> Result<(), String> {
    let log_dir = data_dir.join("logs");
    std::fs::create_dir_all(&log_dir).map_err(|error| error.to_string())?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "dashboard.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| error.to_string())
}
