use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Weak};

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::{AuthError, InitializationError, OperationError};
use crate::session::{Principal, SessionListener, SessionManager, UserId};
use crate::store::{SnapshotListener, TaskStore};
use crate::subscription::Subscription;
use crate::task::{NewTask, Task, TaskId};

const MIN_PASSWORD_LEN: usize = 6;

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s.]+(\.[^@\s.]+)+$").expect("email pattern is valid")
});

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Account {
    uid: UserId,
    email: String,
    salt: String,
    digest: String,
}

impl Account {
    fn principal(&self) -> Principal {
        Principal {
            uid: self.uid.clone(),
            email: self.email.clone(),
        }
    }

    fn verify(&self, password: &str) -> bool {
        password_digest(&self.salt, password) == self.digest
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SessionRecord {
    principal: Option<Principal>,
}

struct Listeners<L> {
    next_id: u64,
    entries: BTreeMap<u64, L>,
}

impl<L: Clone> Listeners<L> {
    fn new() -> Self {
        Self {
            next_id: 0,
            entries: BTreeMap::new(),
        }
    }

    fn insert(&mut self, listener: L) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.insert(id, listener);
        id
    }

    fn snapshot(&self) -> Vec<L> {
        self.entries.values().cloned().collect()
    }
}

struct State {
    accounts: BTreeMap<String, Account>,
    current: Option<Principal>,
}

struct Inner {
    root: PathBuf,
    accounts_path: PathBuf,
    session_path: PathBuf,
    tasks_dir: PathBuf,
    state: Mutex<State>,
    session_listeners: Mutex<Listeners<SessionListener>>,
    task_listeners: Mutex<HashMap<UserId, Listeners<SnapshotListener>>>,
}

/// Self-hosted identity provider and task database rooted in one directory.
///
/// Layout: `accounts.json`, `session.json` and one JSON-lines file per user
/// under `tasks/`. Listener callbacks always run after internal locks are
/// released, so a listener may call back into the backend.
#[derive(Clone)]
pub struct LocalBackend {
    inner: Arc<Inner>,
}

impl LocalBackend {
    #[instrument(skip(root))]
    pub fn open(root: &Path) -> Result<Self, InitializationError> {
        let root = root.to_path_buf();
        let tasks_dir = root.join("tasks");
        fs::create_dir_all(&tasks_dir).map_err(|source| InitializationError::Storage {
            path: tasks_dir.clone(),
            source,
        })?;

        let accounts_path = root.join("accounts.json");
        let session_path = root.join("session.json");

        let accounts: BTreeMap<String, Account> = load_json(&accounts_path)?.unwrap_or_default();
        let session: SessionRecord = load_json(&session_path)?.unwrap_or_default();

        // A persisted session only survives if its account still exists.
        let current = session
            .principal
            .filter(|p| accounts.values().any(|a| a.uid == p.uid));

        info!(
            root = %root.display(),
            accounts = accounts.len(),
            resumed = current.is_some(),
            "opened local backend"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                root,
                accounts_path,
                session_path,
                tasks_dir,
                state: Mutex::new(State { accounts, current }),
                session_listeners: Mutex::new(Listeners::new()),
                task_listeners: Mutex::new(HashMap::new()),
            }),
        })
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    pub fn current_principal(&self) -> Option<Principal> {
        self.inner.state.lock().current.clone()
    }

    /// Registered session and task listeners, in that order.
    pub fn listener_count(&self) -> (usize, usize) {
        let sessions = self.inner.session_listeners.lock().entries.len();
        let tasks = self
            .inner
            .task_listeners
            .lock()
            .values()
            .map(|l| l.entries.len())
            .sum();
        (sessions, tasks)
    }

    /// Persists the session record, then switches `current` and notifies.
    /// A failed write leaves the previous session in place.
    fn set_current(&self, principal: Option<Principal>) -> io::Result<()> {
        {
            let mut state = self.inner.state.lock();
            let record = SessionRecord {
                principal: principal.clone(),
            };
            save_json_atomic(&self.inner.session_path, &record)?;
            state.current = principal.clone();
        }
        self.inner.notify_session(principal);
        Ok(())
    }

    fn tasks_path(&self, user: &UserId) -> PathBuf {
        self.inner.tasks_dir.join(format!("{}.data", user.as_str()))
    }

    fn ensure_owner(&self, state: &State, user: &UserId) -> Result<(), OperationError> {
        match state.current.as_ref() {
            Some(current) if &current.uid == user => Ok(()),
            _ => Err(OperationError::PermissionDenied {
                user: user.to_string(),
            }),
        }
    }

    /// Applies `mutate` to the user's collection under the state lock, then
    /// pushes the committed snapshot to listeners.
    fn commit<F>(&self, user: &UserId, mutate: F) -> Result<(), OperationError>
    where
        F: FnOnce(&mut Vec<Task>) -> Result<(), OperationError>,
    {
        let snapshot = {
            let state = self.inner.state.lock();
            self.ensure_owner(&state, user)?;
            let path = self.tasks_path(user);
            let mut tasks = load_jsonl(&path)?;
            mutate(&mut tasks)?;
            save_jsonl_atomic(&path, &tasks)?;
            tasks
        };
        self.inner.notify_tasks(user, snapshot);
        Ok(())
    }
}

impl Inner {
    fn notify_session(&self, principal: Option<Principal>) {
        let listeners = self.session_listeners.lock().snapshot();
        debug!(count = listeners.len(), signed_in = principal.is_some(), "notifying session listeners");
        for listener in listeners {
            listener(principal.clone());
        }
    }

    fn notify_tasks(&self, user: &UserId, snapshot: Vec<Task>) {
        let listeners = self
            .task_listeners
            .lock()
            .get(user)
            .map(Listeners::snapshot)
            .unwrap_or_default();
        debug!(user = %user, count = listeners.len(), tasks = snapshot.len(), "pushing snapshot");
        for listener in listeners {
            listener(snapshot.clone());
        }
    }
}

impl SessionManager for LocalBackend {
    #[instrument(skip(self, password))]
    fn sign_up(&self, email: &str, password: &str) -> Result<Principal, AuthError> {
        let email = email.trim().to_ascii_lowercase();
        if !EMAIL_RE.is_match(&email) {
            return Err(AuthError::new("invalid email address"));
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthError::new(format!(
                "password should be at least {MIN_PASSWORD_LEN} characters"
            )));
        }

        let principal = {
            let mut state = self.inner.state.lock();
            if state.accounts.contains_key(&email) {
                return Err(AuthError::new("email already in use"));
            }
            let salt = Uuid::new_v4().simple().to_string();
            let account = Account {
                uid: UserId::new(Uuid::new_v4().simple().to_string()),
                email: email.clone(),
                digest: password_digest(&salt, password),
                salt,
            };
            let principal = account.principal();
            let mut accounts = state.accounts.clone();
            accounts.insert(email, account);
            if let Err(err) = save_json_atomic(&self.inner.accounts_path, &accounts) {
                warn!(error = %err, "failed to persist accounts");
                return Err(AuthError::new(format!("account storage unavailable: {err}")));
            }
            state.accounts = accounts;
            principal
        };

        info!(uid = %principal.uid, "account created");
        self.set_current(Some(principal.clone()))
            .map_err(|err| AuthError::new(format!("session storage unavailable: {err}")))?;
        Ok(principal)
    }

    #[instrument(skip(self, password))]
    fn sign_in(&self, email: &str, password: &str) -> Result<Principal, AuthError> {
        let email = email.trim().to_ascii_lowercase();
        if !EMAIL_RE.is_match(&email) {
            return Err(AuthError::new("invalid email address"));
        }

        let principal = {
            let state = self.inner.state.lock();
            match state.accounts.get(&email) {
                Some(account) if account.verify(password) => account.principal(),
                _ => return Err(AuthError::new("invalid credentials")),
            }
        };

        info!(uid = %principal.uid, "signed in");
        self.set_current(Some(principal.clone()))
            .map_err(|err| AuthError::new(format!("session storage unavailable: {err}")))?;
        Ok(principal)
    }

    #[instrument(skip(self))]
    fn sign_out(&self) -> Result<(), OperationError> {
        info!("signing out");
        self.set_current(None)?;
        Ok(())
    }

    fn on_change(&self, listener: SessionListener) -> Subscription {
        let id = self.inner.session_listeners.lock().insert(listener.clone());
        debug!(listener = id, "session listener registered");

        listener(self.current_principal());

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.session_listeners.lock().entries.remove(&id);
                debug!(listener = id, "session listener removed");
            }
        })
    }
}

impl TaskStore for LocalBackend {
    #[instrument(skip(self, user, listener), fields(user = %user))]
    fn subscribe(
        &self,
        user: &UserId,
        listener: SnapshotListener,
    ) -> Result<Subscription, OperationError> {
        let (id, snapshot) = {
            let state = self.inner.state.lock();
            self.ensure_owner(&state, user)?;
            let snapshot = load_jsonl(&self.tasks_path(user))?;
            let id = self
                .inner
                .task_listeners
                .lock()
                .entry(user.clone())
                .or_insert_with(Listeners::new)
                .insert(listener.clone());
            (id, snapshot)
        };
        debug!(listener = id, tasks = snapshot.len(), "task listener registered");

        listener(snapshot);

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let user = user.clone();
        Ok(Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                let mut by_user = inner.task_listeners.lock();
                if let Some(listeners) = by_user.get_mut(&user) {
                    listeners.entries.remove(&id);
                    if listeners.entries.is_empty() {
                        by_user.remove(&user);
                    }
                }
                debug!(listener = id, user = %user, "task listener removed");
            }
        }))
    }

    #[instrument(skip(self, user, new_task), fields(user = %user))]
    fn create(&self, user: &UserId, new_task: NewTask) -> Result<(), OperationError> {
        self.commit(user, |tasks| {
            let id = TaskId::new(Uuid::new_v4().to_string());
            let created_at = next_created_at(tasks, Utc::now());
            debug!(id = %id, "creating task");
            tasks.push(Task::from_new(id, new_task, created_at));
            Ok(())
        })
    }

    #[instrument(skip(self, user), fields(user = %user))]
    fn set_completed(
        &self,
        user: &UserId,
        id: &TaskId,
        value: bool,
    ) -> Result<(), OperationError> {
        self.commit(user, |tasks| {
            let task = tasks
                .iter_mut()
                .find(|task| &task.id == id)
                .ok_or_else(|| OperationError::NotFound { id: id.to_string() })?;
            task.completed = value;
            Ok(())
        })
    }

    #[instrument(skip(self, user), fields(user = %user))]
    fn delete(&self, user: &UserId, id: &TaskId) -> Result<(), OperationError> {
        self.commit(user, |tasks| {
            let before = tasks.len();
            tasks.retain(|task| &task.id != id);
            if tasks.len() == before {
                return Err(OperationError::NotFound { id: id.to_string() });
            }
            Ok(())
        })
    }
}

/// Keeps creation times strictly increasing within a collection, so a new
/// task sorts first even when the clock has not advanced.
fn next_created_at(tasks: &[Task], now: DateTime<Utc>) -> DateTime<Utc> {
    match tasks.iter().filter_map(|task| task.created_at).max() {
        Some(newest) if newest >= now => newest + TimeDelta::microseconds(1),
        _ => now,
    }
}

/// Salted single-pass blake3. Good enough to keep plain passwords off disk
/// for a local store; it is not a slow password KDF.
fn password_digest(salt: &str, password: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hasher.finalize().to_hex().to_string()
}

fn load_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, InitializationError> {
    if !path.exists() {
        return Ok(None);
    }
    let text = fs::read_to_string(path).map_err(|source| InitializationError::Storage {
        path: path.to_path_buf(),
        source,
    })?;
    if text.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str(&text)
        .map(Some)
        .map_err(|err| InitializationError::Corrupt {
            path: path.to_path_buf(),
            detail: err.to_string(),
        })
}

fn save_json_atomic<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut temp, value)?;
    writeln!(temp)?;
    temp.flush()?;
    temp.persist(path).map_err(|err| err.error)?;
    Ok(())
}

#[instrument(skip(path))]
fn load_jsonl(path: &Path) -> Result<Vec<Task>, OperationError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    debug!(file = %path.display(), "loading jsonl");
    let file = fs::File::open(path)?;
    let reader = BufReader::new(file);

    let mut out = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        out.push(serde_json::from_str(trimmed)?);
    }

    debug!(count = out.len(), "loaded tasks from jsonl");
    Ok(out)
}

#[instrument(skip(path, tasks))]
fn save_jsonl_atomic(path: &Path, tasks: &[Task]) -> Result<(), OperationError> {
    debug!(file = %path.display(), count = tasks.len(), "saving jsonl atomically");

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    for task in tasks {
        let serialized = serde_json::to_string(task)?;
        writeln!(temp, "{serialized}")?;
    }
    temp.flush()?;
    temp.persist(path).map_err(|err| err.error)?;

    Ok(())
}
