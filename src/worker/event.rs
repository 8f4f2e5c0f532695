use std::fmt;
use std::future::Future;

use color_eyre::{eyre::eyre, Result};
use tokio::task::JoinSet;

/// Lifecycle events consumed by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
  Install,
  Activate,
  Fetch,
}

impl fmt::Display for EventKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      EventKind::Install => write!(f, "install"),
      EventKind::Activate => write!(f, "activate"),
      EventKind::Fetch => write!(f, "fetch"),
    }
  }
}

/// Keep-alive scope of one lifecycle event.
///
/// Work registered through [`ExtendableEvent::wait_until`] runs as its own
/// task and the event only counts as finished once all of it has settled.
/// Dropping the event before then aborts whatever is still running.
pub struct ExtendableEvent {
  kind: EventKind,
  tasks: JoinSet<Result<()>>,
}

impl ExtendableEvent {
  pub fn new(kind: EventKind) -> Self {
    Self {
      kind,
      tasks: JoinSet::new(),
    }
  }

  pub fn kind(&self) -> EventKind {
    self.kind
  }

  /// Extend the event's lifetime until `task` completes.
  pub fn wait_until<F>(&mut self, task: F)
  where
    F: Future<Output = Result<()>> + Send + 'static,
  {
    self.tasks.spawn(task);
  }

  pub fn pending(&self) -> usize {
    self.tasks.len()
  }

  /// Wait for every registered task. All tasks are driven to completion;
  /// the first failure (or panic) is reported.
  pub async fn settled(mut self) -> Result<()> {
    let mut first_error = None;

    while let Some(joined) = self.tasks.join_next().await {
      let outcome = match joined {
        Ok(result) => result,
        Err(e) => Err(eyre!("{} task did not complete: {}", self.kind, e)),
      };
      if let Err(e) = outcome {
        first_error.get_or_insert(e);
      }
    }

    match first_error {
      Some(e) => Err(e),
      None => Ok(()),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicU32, Ordering};
  use std::sync::Arc;
  use std::time::Duration;

  #[tokio::test]
  async fn test_settled_waits_for_all_tasks() {
    let counter = Arc::new(AtomicU32::new(0));
    let mut event = ExtendableEvent::new(EventKind::Install);

    for delay in [30, 10, 20] {
      let counter = counter.clone();
      event.wait_until(async move {
        tokio::time::sleep(Duration::from_millis(delay)).await;
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
      });
    }

    assert_eq!(event.pending(), 3);
    event.settled().await.unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 3);
  }

  #[tokio::test]
  async fn test_settled_reports_failure_after_draining() {
    let counter = Arc::new(AtomicU32::new(0));
    let mut event = ExtendableEvent::new(EventKind::Activate);

    event.wait_until(async { Err(eyre!("cache open failed")) });
    let slow = counter.clone();
    event.wait_until(async move {
      tokio::time::sleep(Duration::from_millis(20)).await;
      slow.fetch_add(1, Ordering::SeqCst);
      Ok(())
    });

    let err = event.settled().await.unwrap_err();
    assert_eq!(err.to_string(), "cache open failed");
    assert_eq!(counter.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_empty_event_settles_immediately() {
    let event = ExtendableEvent::new(EventKind::Fetch);
    assert_eq!(event.kind().to_string(), "fetch");
    event.settled().await.unwrap();
  }
}
