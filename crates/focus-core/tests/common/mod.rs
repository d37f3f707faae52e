#![allow(dead_code)]

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use focus_core::backend::Backend;
use focus_core::error::{AuthError, OperationError};
use focus_core::session::{Principal, SessionListener, SessionManager, UserId};
use focus_core::store::{SnapshotListener, TaskStore};
use focus_core::subscription::Subscription;
use focus_core::task::{Category, NewTask, Priority, Task, TaskId};
use parking_lot::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    SignUp(String),
    SignIn(String),
    SignOut,
    Subscribe(UserId),
    Unsubscribe(UserId),
    Create(UserId, NewTask),
    SetCompleted(UserId, TaskId, bool),
    Delete(UserId, TaskId),
}

#[derive(Default)]
struct Inner {
    principal: Mutex<Option<Principal>>,
    next_id: Mutex<u64>,
    session_listeners: Mutex<Vec<(u64, SessionListener)>>,
    task_listeners: Mutex<Vec<(u64, UserId, SnapshotListener)>>,
    calls: Mutex<Vec<Call>>,
    auth_failure: Mutex<Option<String>>,
    fail_operations: Mutex<bool>,
}

/// Scripted backend: records every request and only pushes notifications
/// when the test says so (plus the mandatory initial delivery).
#[derive(Clone, Default)]
pub struct FakeBackend {
    inner: Arc<Inner>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn backend(&self) -> Backend {
        Backend::new(Arc::new(self.clone()), Arc::new(self.clone()))
    }

    pub fn calls(&self) -> Vec<Call> {
        self.inner.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.inner.calls.lock().clear();
    }

    pub fn fail_next_auth(&self, message: &str) {
        *self.inner.auth_failure.lock() = Some(message.to_string());
    }

    pub fn fail_operations(&self, fail: bool) {
        *self.inner.fail_operations.lock() = fail;
    }

    pub fn session_listener_count(&self) -> usize {
        self.inner.session_listeners.lock().len()
    }

    pub fn task_subscribers(&self) -> Vec<UserId> {
        self.inner
            .task_listeners
            .lock()
            .iter()
            .map(|(_, user, _)| user.clone())
            .collect()
    }

    /// Simulates an external session transition (sign-in elsewhere, expiry).
    pub fn emit_session(&self, principal: Option<Principal>) {
        *self.inner.principal.lock() = principal.clone();
        let listeners: Vec<SessionListener> = self
            .inner
            .session_listeners
            .lock()
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        for listener in listeners {
            listener(principal.clone());
        }
    }

    pub fn push_snapshot(&self, user: &UserId, tasks: Vec<Task>) {
        let listeners: Vec<SnapshotListener> = self
            .inner
            .task_listeners
            .lock()
            .iter()
            .filter(|(_, u, _)| u == user)
            .map(|(_, _, l)| l.clone())
            .collect();
        for listener in listeners {
            listener(tasks.clone());
        }
    }

    fn next_id(&self) -> u64 {
        let mut next = self.inner.next_id.lock();
        *next += 1;
        *next
    }

    fn record(&self, call: Call) {
        self.inner.calls.lock().push(call);
    }

    fn check_operation(&self) -> Result<(), OperationError> {
        if *self.inner.fail_operations.lock() {
            Err(OperationError::Unavailable)
        } else {
            Ok(())
        }
    }

    fn authenticate(&self, email: &str) -> Result<Principal, AuthError> {
        if let Some(message) = self.inner.auth_failure.lock().take() {
            return Err(AuthError::new(message));
        }
        let principal = Principal::new(format!("uid-{email}"), email);
        self.emit_session(Some(principal.clone()));
        Ok(principal)
    }
}

impl SessionManager for FakeBackend {
    fn sign_up(&self, email: &str, _password: &str) -> Result<Principal, AuthError> {
        self.record(Call::SignUp(email.to_string()));
        self.authenticate(email)
    }

    fn sign_in(&self, email: &str, _password: &str) -> Result<Principal, AuthError> {
        self.record(Call::SignIn(email.to_string()));
        self.authenticate(email)
    }

    fn sign_out(&self) -> Result<(), OperationError> {
        self.record(Call::SignOut);
        self.check_operation()?;
        self.emit_session(None);
        Ok(())
    }

    fn on_change(&self, listener: SessionListener) -> Subscription {
        let id = self.next_id();
        self.inner
            .session_listeners
            .lock()
            .push((id, listener.clone()));
        let current = self.inner.principal.lock().clone();
        listener(current);

        let inner = self.inner.clone();
        Subscription::new(move || {
            inner.session_listeners.lock().retain(|(i, _)| *i != id);
        })
    }
}

impl TaskStore for FakeBackend {
    fn subscribe(
        &self,
        user: &UserId,
        listener: SnapshotListener,
    ) -> Result<Subscription, OperationError> {
        self.record(Call::Subscribe(user.clone()));
        self.check_operation()?;
        let id = self.next_id();
        self.inner
            .task_listeners
            .lock()
            .push((id, user.clone(), listener.clone()));
        listener(Vec::new());

        let this = self.clone();
        let user = user.clone();
        Ok(Subscription::new(move || {
            this.inner.task_listeners.lock().retain(|(i, _, _)| *i != id);
            this.record(Call::Unsubscribe(user));
        }))
    }

    fn create(&self, user: &UserId, fields: NewTask) -> Result<(), OperationError> {
        self.record(Call::Create(user.clone(), fields));
        self.check_operation()
    }

    fn set_completed(
        &self,
        user: &UserId,
        id: &TaskId,
        value: bool,
    ) -> Result<(), OperationError> {
        self.record(Call::SetCompleted(user.clone(), id.clone(), value));
        self.check_operation()
    }

    fn delete(&self, user: &UserId, id: &TaskId) -> Result<(), OperationError> {
        self.record(Call::Delete(user.clone(), id.clone()));
        self.check_operation()
    }
}

pub fn task(id: &str, title: &str, completed: bool, created_secs: Option<i64>) -> Task {
    Task {
        id: TaskId::new(id),
        title: title.to_string(),
        category: Category::Personal,
        priority: Priority::Medium,
        completed,
        created_at: created_secs.map(|s| Utc.timestamp_opt(s, 0).unwrap()),
    }
}
