use crate::clock::Clock;
use crate::errors::{AppError, AppResult};
use crate::models::{
    Contact, ContactFilter, CreateContactPayload, CreateInteractionPayload, CreateTaskPayload, CrmAnalytics,
    Interaction, Task, TaskFilter, UNKNOWN_CONTACT,
};
use crate::storage::{load_collection, save_collection, KeyValueStore, CONTACTS_KEY, INTERACTIONS_KEY, TASKS_KEY};
use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

const GROWTH_MIN: u32 = 5;
const GROWTH_MAX_EXCLUSIVE: u32 = 25;

/// Source of the simulated month-over-month growth figure. The value is a
/// placeholder, not derived from any collection.
pub trait GrowthSource: Send {
    fn next_growth(&mut self) -> u32;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RandomGrowth;

impl GrowthSource for RandomGrowth {
    fn next_growth(&mut self) -> u32 {
        rand::rng().random_range(GROWTH_MIN..GROWTH_MAX_EXCLUSIVE)
    }
}

#[derive(Debug, Clone)]
pub struct SeededGrowth {
    rng: StdRng,
}

impl SeededGrowth {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl GrowthSource for SeededGrowth {
    fn next_growth(&mut self) -> u32 {
        self.rng.random_range(GROWTH_MIN..GROWTH_MAX_EXCLUSIVE)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedGrowth(pub u32);

impl GrowthSource for FixedGrowth {
    fn next_growth(&mut self) -> u32 {
        self.0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrmState {
    pub contacts: Vec<Contact>,
    pub interactions: Vec<Interaction>,
    pub tasks: Vec<Task>,
    pub analytics: CrmAnalytics,
}

impl CrmState {
    pub fn find_contact(&self, id: &str) -> Option<&Contact> {
        self.contacts.iter().find(|contact| contact.id == id)
    }

    /// Display name for a weak contact reference.
    pub fn contact_label(&self, id: Option<&str>) -> &str {
        id.and_then(|id| self.find_contact(id))
            .map(|contact| contact.name.as_str())
            .unwrap_or(UNKNOWN_CONTACT)
    }

    pub fn search_contacts(
        &self,
        query: &str,
        filter: ContactFilter,
        now: DateTime<Utc>,
        window_days: u32,
    ) -> Vec<&Contact> {
        let query = query.to_lowercase();
        let cutoff = window_start(now, window_days);
        self.contacts
            .iter()
            .filter(|contact| {
                let matches_search = contact.name.to_lowercase().contains(&query)
                    || contact.email.to_lowercase().contains(&query)
                    || contact.company.to_lowercase().contains(&query);
                match filter {
                    ContactFilter::All => matches_search,
                    ContactFilter::Recent => matches_search && contact.created_at >= cutoff,
                }
            })
            .collect()
    }

    pub fn filter_tasks(&self, filter: TaskFilter) -> Vec<&Task> {
        self.tasks
            .iter()
            .filter(|task| match filter {
                TaskFilter::All => true,
                TaskFilter::Pending => !task.completed,
                TaskFilter::Completed => task.completed,
            })
            .collect()
    }

    /// Interactions logged against one contact, newest first.
    pub fn interactions_for_contact(&self, contact_id: &str) -> Vec<&Interaction> {
        let mut interactions: Vec<&Interaction> = self
            .interactions
            .iter()
            .filter(|interaction| interaction.contact_id == contact_id)
            .collect();
        interactions.sort_by(|a, b| b.date.cmp(&a.date));
        interactions
    }

    pub fn tasks_for_contact(&self, contact_id: &str) -> Vec<&Task> {
        self.tasks
            .iter()
            .filter(|task| task.contact_id.as_deref() == Some(contact_id))
            .collect()
    }
}

fn window_start(now: DateTime<Utc>, window_days: u32) -> DateTime<Utc> {
    now - Duration::days(i64::from(window_days))
}

/// Recomputes the analytics block. `recent_interactions` depends on `now`, so
/// two calls over identical collections can disagree once an interaction ages
/// out of the window.
pub fn compute_analytics(
    state: &CrmState,
    now: DateTime<Utc>,
    window_days: u32,
    growth: &mut dyn GrowthSource,
) -> CrmAnalytics {
    let cutoff = window_start(now, window_days);
    CrmAnalytics {
        total_contacts: state.contacts.len(),
        recent_interactions: state
            .interactions
            .iter()
            .filter(|interaction| interaction.date >= cutoff)
            .count(),
        pending_tasks: state.tasks.iter().filter(|task| !task.completed).count(),
        monthly_growth: growth.next_growth(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Collection {
    Contacts,
    Interactions,
    Tasks,
}

#[derive(Debug, Clone)]
pub enum CrmAction {
    SetContacts(Vec<Contact>),
    AddContact(Contact),
    UpdateContact(Contact),
    DeleteContact(String),
    SetInteractions(Vec<Interaction>),
    AddInteraction(Interaction),
    SetTasks(Vec<Task>),
    AddTask(Task),
    UpdateTask(Task),
    ToggleTask(String),
}

impl CrmAction {
    fn name(&self) -> &'static str {
        match self {
            Self::SetContacts(_) => "set_contacts",
            Self::AddContact(_) => "add_contact",
            Self::UpdateContact(_) => "update_contact",
            Self::DeleteContact(_) => "delete_contact",
            Self::SetInteractions(_) => "set_interactions",
            Self::AddInteraction(_) => "add_interaction",
            Self::SetTasks(_) => "set_tasks",
            Self::AddTask(_) => "add_task",
            Self::UpdateTask(_) => "update_task",
            Self::ToggleTask(_) => "toggle_task",
        }
    }

    fn collection(&self) -> Collection {
        match self {
            Self::SetContacts(_) | Self::AddContact(_) | Self::UpdateContact(_) | Self::DeleteContact(_) => {
                Collection::Contacts
            }
            Self::SetInteractions(_) | Self::AddInteraction(_) => Collection::Interactions,
            Self::SetTasks(_) | Self::AddTask(_) | Self::UpdateTask(_) | Self::ToggleTask(_) => Collection::Tasks,
        }
    }
}

/// Pure collection transform. Analytics are left as they were; the store
/// recomputes them after persisting.
pub fn reduce(state: &CrmState, action: CrmAction) -> CrmState {
    let mut next = state.clone();
    match action {
        CrmAction::SetContacts(contacts) => next.contacts = contacts,
        CrmAction::AddContact(contact) => next.contacts.push(contact),
        CrmAction::UpdateContact(contact) => {
            if let Some(existing) = next.contacts.iter_mut().find(|existing| existing.id == contact.id) {
                *existing = contact;
            }
        }
        CrmAction::DeleteContact(id) => next.contacts.retain(|contact| contact.id != id),
        CrmAction::SetInteractions(interactions) => next.interactions = interactions,
        CrmAction::AddInteraction(interaction) => next.interactions.push(interaction),
        CrmAction::SetTasks(tasks) => next.tasks = tasks,
        CrmAction::AddTask(task) => next.tasks.push(task),
        CrmAction::UpdateTask(task) => {
            if let Some(existing) = next.tasks.iter_mut().find(|existing| existing.id == task.id) {
                *existing = task;
            }
        }
        CrmAction::ToggleTask(id) => {
            if let Some(task) = next.tasks.iter_mut().find(|task| task.id == id) {
                task.completed = !task.completed;
            }
        }
    }
    next
}

pub type CrmListener = Box<dyn Fn(&CrmState) + Send + Sync>;

pub struct CrmStore {
    state: Arc<CrmState>,
    listeners: Vec<(u64, CrmListener)>,
    next_listener_id: u64,
    clock: Arc<dyn Clock>,
    growth: Box<dyn GrowthSource>,
    storage: Arc<dyn KeyValueStore>,
    recent_window_days: u32,
}

impl CrmStore {
    /// Loads each collection from its own key. Missing or malformed documents
    /// start that collection empty.
    pub fn load(
        storage: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        mut growth: Box<dyn GrowthSource>,
        recent_window_days: u32,
    ) -> AppResult<Self> {
        let loaded = [
            CrmAction::SetContacts(load_collection(storage.as_ref(), CONTACTS_KEY)?.unwrap_or_default()),
            CrmAction::SetInteractions(load_collection(storage.as_ref(), INTERACTIONS_KEY)?.unwrap_or_default()),
            CrmAction::SetTasks(load_collection(storage.as_ref(), TASKS_KEY)?.unwrap_or_default()),
        ];
        let mut state = loaded
            .into_iter()
            .fold(CrmState::default(), |state, action| reduce(&state, action));
        state.analytics = compute_analytics(&state, clock.now(), recent_window_days, growth.as_mut());

        tracing::info!(
            contacts = state.contacts.len(),
            interactions = state.interactions.len(),
            tasks = state.tasks.len(),
            "loaded crm collections"
        );

        Ok(Self {
            state: Arc::new(state),
            listeners: Vec::new(),
            next_listener_id: 1,
            clock,
            growth,
            storage,
            recent_window_days,
        })
    }

    pub fn state(&self) -> Arc<CrmState> {
        Arc::clone(&self.state)
    }

    pub fn subscribe(&mut self, listener: CrmListener) -> u64 {
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

    pub fn dispatch(&mut self, action: CrmAction) -> AppResult<Arc<CrmState>> {
        let action_name = action.name();
        let collection = action.collection();
        let mut next = reduce(&self.state, action);

        let storage = self.storage.as_ref();
        match collection {
            Collection::Contacts => save_collection(storage, CONTACTS_KEY, &next.contacts)?,
            Collection::Interactions => save_collection(storage, INTERACTIONS_KEY, &next.interactions)?,
            Collection::Tasks => save_collection(storage, TASKS_KEY, &next.tasks)?,
        }

        next.analytics = compute_analytics(&next, self.clock.now(), self.recent_window_days, self.growth.as_mut());
        tracing::debug!(action = action_name, analytics = ?next.analytics, "crm state updated");

        Ok(self.publish(next))
    }

    /// Recomputes analytics against the current time without touching any
    /// collection.
    pub fn refresh_analytics(&mut self) -> Arc<CrmState> {
        let mut next = (*self.state).clone();
        next.analytics = compute_analytics(&next, self.clock.now(), self.recent_window_days, self.growth.as_mut());
        self.publish(next)
    }

    fn publish(&mut self, next: CrmState) -> Arc<CrmState> {
        let next = Arc::new(next);
        self.state = Arc::clone(&next);
        for (_, listener) in &self.listeners {
            listener(next.as_ref());
        }
        next
    }

    pub fn add_contact(&mut self, payload: CreateContactPayload) -> AppResult<Contact> {
        if payload.name.trim().is_empty() {
            return Err(AppError::Validation("contact name is required".to_string()));
        }
        let contact = Contact {
            id: Uuid::new_v4().to_string(),
            name: payload.name,
            title: payload.title,
            email: payload.email,
            phone: payload.phone,
            company: payload.company,
            location: payload.location,
            notes: payload.notes,
            created_at: self.clock.now(),
        };
        self.dispatch(CrmAction::AddContact(contact.clone()))?;
        Ok(contact)
    }

    pub fn update_contact(&mut self, contact: Contact) -> AppResult<Arc<CrmState>> {
        self.dispatch(CrmAction::UpdateContact(contact))
    }

    /// Removes the contact only. Interactions and tasks keep their dangling
    /// `contact_id`.
    pub fn delete_contact(&mut self, id: &str) -> AppResult<Arc<CrmState>> {
        self.dispatch(CrmAction::DeleteContact(id.to_string()))
    }

    pub fn add_interaction(&mut self, payload: CreateInteractionPayload) -> AppResult<Interaction> {
        let interaction = Interaction {
            id: Uuid::new_v4().to_string(),
            contact_id: payload.contact_id,
            kind: payload.kind,
            notes: payload.notes,
            date: payload.date.unwrap_or_else(|| self.clock.now()),
        };
        self.dispatch(CrmAction::AddInteraction(interaction.clone()))?;
        Ok(interaction)
    }

    pub fn add_task(&mut self, payload: CreateTaskPayload) -> AppResult<Task> {
        if payload.title.trim().is_empty() {
            return Err(AppError::Validation("task title is required".to_string()));
        }
        let task = Task {
            id: Uuid::new_v4().to_string(),
            title: payload.title,
            description: payload.description,
            contact_id: payload.contact_id,
            due_date: payload.due_date,
            priority: payload.priority,
            completed: false,
        };
        self.dispatch(CrmAction::AddTask(task.clone()))?;
        Ok(task)
    }

    pub fn update_task(&mut self, task: Task) -> AppResult<Arc<CrmState>> {
        self.dispatch(CrmAction::UpdateTask(task))
    }

    pub fn toggle_task(&mut self, id: &str) -> AppResult<Arc<CrmState>> {
        self.dispatch(CrmAction::ToggleTask(id.to_string()))
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn recent_window_days(&self) -> u32 {
        self.recent_window_days
    }
}
