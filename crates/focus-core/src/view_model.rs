//! UI-facing state for the task front end.
//!
//! The view model owns one session subscription for its whole life and at
//! most one task subscription at a time. Every session notification tears
//! the task subscription down before a new one is opened, and snapshots
//! from a superseded subscription are discarded by generation number.
//! Locks on the view state are never held while calling into the backend,
//! so backends are free to deliver notifications synchronously.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{debug, error, info, instrument, warn};

use crate::backend::Backend;
use crate::error::{InitializationError, OperationError};
use crate::filter::TaskFilter;
use crate::session::{Principal, UserId};
use crate::store::{SnapshotListener, TaskStore};
use crate::subscription::Subscription;
use crate::task::{Category, NewTask, Priority, Task, TaskId, sort_snapshot};

pub const DELETE_PROMPT: &str = "Are you sure you want to delete this task?";

/// Whether live session checks are possible in the hosting context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Interactive,
    NonInteractive,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Loading,
    Unauthenticated,
    Authenticated(Principal),
}

#[derive(Debug, Clone)]
pub struct ViewState {
    pub session: SessionState,
    pub is_sign_up: bool,
    pub auth_error: Option<String>,
    pub tasks: Vec<Task>,
    pub active_filter: TaskFilter,
    pub email: String,
    pub password: String,
    pub new_task_title: String,
    pub new_task_category: Category,
    pub new_task_priority: Priority,
    /// Transient data-layer failure message, cleared by the next action.
    pub notice: Option<String>,
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            session: SessionState::Loading,
            is_sign_up: false,
            auth_error: None,
            tasks: Vec::new(),
            active_filter: TaskFilter::All,
            email: String::new(),
            password: String::new(),
            new_task_title: String::new(),
            new_task_category: Category::default(),
            new_task_priority: Priority::default(),
            notice: None,
        }
    }
}

impl ViewState {
    pub fn loading(&self) -> bool {
        self.session == SessionState::Loading
    }

    pub fn current_user(&self) -> Option<&Principal> {
        match &self.session {
            SessionState::Authenticated(principal) => Some(principal),
            _ => None,
        }
    }

    pub fn filtered_tasks(&self) -> Vec<Task> {
        self.active_filter.apply(&self.tasks)
    }

    /// Size of `filter`'s view, regardless of the active filter.
    pub fn count(&self, filter: TaskFilter) -> usize {
        filter.count(&self.tasks)
    }
}

struct Shared {
    state: Mutex<ViewState>,
    task_sub: Mutex<Option<Subscription>>,
    generation: AtomicU64,
    store: Option<Arc<dyn TaskStore>>,
}

impl Shared {
    fn new(state: ViewState, store: Option<Arc<dyn TaskStore>>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(state),
            task_sub: Mutex::new(None),
            generation: AtomicU64::new(0),
            store,
        })
    }

    fn release_task_subscription(&self) {
        let prior = self.task_sub.lock().take();
        if let Some(prior) = prior {
            debug!("cancelling task subscription");
            prior.cancel();
        }
    }

    #[instrument(skip_all, fields(signed_in = principal.is_some()))]
    fn apply_session(self: &Arc<Self>, principal: Option<Principal>) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.release_task_subscription();

        {
            let mut state = self.state.lock();
            state.tasks.clear();
            state.session = match &principal {
                Some(principal) => SessionState::Authenticated(principal.clone()),
                None => SessionState::Unauthenticated,
            };
        }

        let Some(principal) = principal else {
            info!("signed out");
            return;
        };
        let Some(store) = self.store.clone() else {
            warn!("task store unavailable; not subscribing");
            return;
        };

        info!(uid = %principal.uid, generation, "subscribing to tasks");
        let weak = Arc::downgrade(self);
        let listener: SnapshotListener = Arc::new(move |snapshot: Vec<Task>| {
            if let Some(shared) = weak.upgrade() {
                shared.apply_snapshot(generation, snapshot);
            }
        });

        match store.subscribe(&principal.uid, listener) {
            Ok(sub) => {
                if self.generation.load(Ordering::SeqCst) != generation {
                    debug!(generation, "session changed while subscribing; dropping");
                    sub.cancel();
                    return;
                }
                let stale = self.task_sub.lock().replace(sub);
                drop(stale);
            }
            Err(err) => self.report("could not load tasks", &err),
        }
    }

    fn apply_snapshot(&self, generation: u64, mut snapshot: Vec<Task>) {
        if self.generation.load(Ordering::SeqCst) != generation {
            debug!(generation, "ignoring snapshot from superseded subscription");
            return;
        }
        sort_snapshot(&mut snapshot);
        debug!(count = snapshot.len(), "applying task snapshot");
        self.state.lock().tasks = snapshot;
    }

    fn report(&self, context: &str, err: &OperationError) {
        warn!(error = %err, "{context}");
        self.state.lock().notice = Some(format!("{context}: {err}"));
    }
}

pub struct ViewModel {
    backend: Option<Backend>,
    shared: Arc<Shared>,
    session_sub: Option<Subscription>,
}

impl ViewModel {
    /// Builds the view model. `connect` only runs when `capability` allows
    /// live subscriptions; a connection failure leaves the view idle.
    #[instrument(skip(connect))]
    pub fn new<F>(capability: Capability, connect: F) -> Self
    where
        F: FnOnce() -> Result<Backend, InitializationError>,
    {
        if capability == Capability::NonInteractive {
            info!("no live session context; staying idle");
            let state = ViewState {
                session: SessionState::Unauthenticated,
                ..ViewState::default()
            };
            return Self {
                backend: None,
                shared: Shared::new(state, None),
                session_sub: None,
            };
        }

        let backend = match connect() {
            Ok(backend) => backend,
            Err(err) => {
                error!(error = %err, "backend initialization failed");
                let state = ViewState {
                    session: SessionState::Unauthenticated,
                    notice: Some(format!("backend unavailable: {err}")),
                    ..ViewState::default()
                };
                return Self {
                    backend: None,
                    shared: Shared::new(state, None),
                    session_sub: None,
                };
            }
        };

        let shared = Shared::new(ViewState::default(), Some(backend.tasks.clone()));
        let weak = Arc::downgrade(&shared);
        let session_sub = backend.session.on_change(Arc::new(move |principal: Option<Principal>| {
            if let Some(shared) = weak.upgrade() {
                shared.apply_session(principal);
            }
        }));

        Self {
            backend: Some(backend),
            shared,
            session_sub: Some(session_sub),
        }
    }

    pub fn state(&self) -> ViewState {
        self.shared.state.lock().clone()
    }

    pub fn loading(&self) -> bool {
        self.shared.state.lock().loading()
    }

    pub fn current_user(&self) -> Option<Principal> {
        self.shared.state.lock().current_user().cloned()
    }

    pub fn is_connected(&self) -> bool {
        self.backend.is_some()
    }

    pub fn has_task_subscription(&self) -> bool {
        self.shared
            .task_sub
            .lock()
            .as_ref()
            .is_some_and(Subscription::is_active)
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.shared.state.lock().tasks.clone()
    }

    pub fn filtered_tasks(&self) -> Vec<Task> {
        self.shared.state.lock().filtered_tasks()
    }

    pub fn count(&self, filter: TaskFilter) -> usize {
        self.shared.state.lock().count(filter)
    }

    pub fn set_email(&self, email: impl Into<String>) {
        self.shared.state.lock().email = email.into();
    }

    pub fn set_password(&self, password: impl Into<String>) {
        self.shared.state.lock().password = password.into();
    }

    pub fn set_new_task_title(&self, title: impl Into<String>) {
        self.shared.state.lock().new_task_title = title.into();
    }

    pub fn set_new_task_category(&self, category: Category) {
        self.shared.state.lock().new_task_category = category;
    }

    pub fn set_new_task_priority(&self, priority: Priority) {
        self.shared.state.lock().new_task_priority = priority;
    }

    pub fn set_filter(&self, filter: TaskFilter) {
        self.shared.state.lock().active_filter = filter;
    }

    pub fn take_notice(&self) -> Option<String> {
        self.shared.state.lock().notice.take()
    }

    pub fn toggle_auth_mode(&self) {
        let mut state = self.shared.state.lock();
        state.is_sign_up = !state.is_sign_up;
        state.auth_error = None;
    }

    /// Submits the credential buffers. Inputs are left as typed.
    #[instrument(skip(self))]
    pub fn handle_auth(&self) {
        let (email, password, sign_up) = {
            let mut state = self.shared.state.lock();
            if state.email.is_empty() || state.password.is_empty() {
                return;
            }
            state.auth_error = None;
            state.notice = None;
            (state.email.clone(), state.password.clone(), state.is_sign_up)
        };

        let Some(backend) = &self.backend else {
            self.shared.state.lock().auth_error =
                Some("authentication service unavailable".to_string());
            return;
        };

        let result = if sign_up {
            backend.session.sign_up(&email, &password)
        } else {
            backend.session.sign_in(&email, &password)
        };

        match result {
            Ok(principal) => info!(uid = %principal.uid, sign_up, "authenticated"),
            Err(err) => {
                warn!(error = %err, sign_up, "authentication failed");
                self.shared.state.lock().auth_error = Some(err.message().to_string());
            }
        }
    }

    #[instrument(skip(self))]
    pub fn logout(&self) {
        let Some(backend) = &self.backend else {
            return;
        };
        self.shared.state.lock().notice = None;
        if let Err(err) = backend.session.sign_out() {
            self.shared.report("could not sign out", &err);
        }
    }

    /// Creates a task from the input buffers and clears the title right
    /// away, before the store confirms anything.
    #[instrument(skip(self))]
    pub fn add_task(&self) {
        let Some(backend) = &self.backend else {
            debug!("add ignored: no backend");
            return;
        };

        let (user, fields) = {
            let mut state = self.shared.state.lock();
            if state.new_task_title.trim().is_empty() {
                debug!("add ignored: blank title");
                return;
            }
            let Some(user) = state.current_user().map(|p| p.uid.clone()) else {
                debug!("add ignored: signed out");
                return;
            };
            let fields = NewTask {
                title: std::mem::take(&mut state.new_task_title),
                category: state.new_task_category,
                priority: state.new_task_priority,
            };
            state.notice = None;
            (user, fields)
        };

        if let Err(err) = backend.tasks.create(&user, fields) {
            self.shared.report("could not add task", &err);
        }
    }

    #[instrument(skip(self), fields(task = %id))]
    pub fn toggle_task(&self, id: &TaskId) {
        let Some(backend) = &self.backend else {
            return;
        };
        let Some((user, completed)) = self.lookup(id) else {
            debug!("toggle ignored: unknown task or signed out");
            return;
        };
        if let Err(err) = backend.tasks.set_completed(&user, id, !completed) {
            self.shared.report("could not update task", &err);
        }
    }

    /// Deletes a task once `confirm` approves [`DELETE_PROMPT`].
    #[instrument(skip(self, confirm), fields(task = %id))]
    pub fn delete_task<C>(&self, id: &TaskId, confirm: C)
    where
        C: FnOnce(&str) -> bool,
    {
        let Some(backend) = &self.backend else {
            return;
        };
        let Some(user) = self.current_user().map(|p| p.uid) else {
            return;
        };
        self.shared.state.lock().notice = None;
        if !confirm(DELETE_PROMPT) {
            debug!("delete cancelled");
            return;
        }
        if let Err(err) = backend.tasks.delete(&user, id) {
            self.shared.report("could not delete task", &err);
        }
    }

    fn lookup(&self, id: &TaskId) -> Option<(UserId, bool)> {
        let mut state = self.shared.state.lock();
        state.notice = None;
        let user = state.current_user()?.uid.clone();
        let completed = state.tasks.iter().find(|t| &t.id == id)?.completed;
        Some((user, completed))
    }
}

impl Drop for ViewModel {
    fn drop(&mut self) {
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(sub) = self.session_sub.take() {
            sub.cancel();
        }
        self.shared.release_task_subscription();
        debug!("view model released subscriptions");
    }
}
