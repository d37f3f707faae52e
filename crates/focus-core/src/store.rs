use std::sync::Arc;

use crate::error::OperationError;
use crate::session::UserId;
use crate::subscription::Subscription;
use crate::task::{NewTask, Task, TaskId};

pub type SnapshotListener = Arc<dyn Fn(Vec<Task>) + Send + Sync>;

/// Document database contract for a user's task collection.
///
/// Listeners receive the complete collection, never a diff: once on
/// subscription and again after every insert, update or delete. Mutations
/// return nothing about the record; the next snapshot carries the result.
pub trait TaskStore: Send + Sync {
    fn subscribe(
        &self,
        user: &UserId,
        listener: SnapshotListener,
    ) -> Result<Subscription, OperationError>;

    /// Stores `fields` with `completed = false` and a server timestamp.
    fn create(&self, user: &UserId, fields: NewTask) -> Result<(), OperationError>;

    fn set_completed(&self, user: &UserId, id: &TaskId, value: bool)
    -> Result<(), OperationError>;

    fn delete(&self, user: &UserId, id: &TaskId) -> Result<(), OperationError>;
}
