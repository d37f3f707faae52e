use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use serde::{
  Deserialize,
  Serialize
};

use crate::task::Task;

#[derive(
  Debug,
  Clone,
  Copy,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
  Hash,
  Default,
)]
pub enum TaskFilter {
  #[default]
  All,
  Pending,
  Completed
}

impl TaskFilter {
  pub const ALL: [TaskFilter; 3] = [
    TaskFilter::All,
    TaskFilter::Pending,
    TaskFilter::Completed
  ];

  pub fn as_str(self) -> &'static str {
    match self {
      | TaskFilter::All => "All",
      | TaskFilter::Pending => "Pending",
      | TaskFilter::Completed => {
        "Completed"
      }
    }
  }

  pub fn matches(
    self,
    task: &Task
  ) -> bool {
    match self {
      | TaskFilter::All => true,
      | TaskFilter::Pending => {
        !task.completed
      }
      | TaskFilter::Completed => {
        task.completed
      }
    }
  }

  pub fn apply(
    self,
    tasks: &[Task]
  ) -> Vec<Task> {
    tasks
      .iter()
      .filter(|task| self.matches(task))
      .cloned()
      .collect()
  }

  pub fn count(
    self,
    tasks: &[Task]
  ) -> usize {
    tasks
      .iter()
      .filter(|task| self.matches(task))
      .count()
  }
}

impl fmt::Display for TaskFilter {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for TaskFilter {
  type Err = anyhow::Error;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    TaskFilter::ALL
      .into_iter()
      .find(|value| {
        value
          .as_str()
          .eq_ignore_ascii_case(s.trim())
      })
      .ok_or_else(|| {
        anyhow!(
          "unknown filter: {s} \
           (expected all, pending or \
           completed)"
        )
      })
  }
}
