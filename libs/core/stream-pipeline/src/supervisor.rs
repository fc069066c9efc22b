//! Structured task supervision.
//!
//! A [`TaskGroup`] owns a set of named tasks sharing one cancellation token.
//! The first task that fails or panics cancels the token so its siblings wind
//! down, and [`TaskGroup::wait`] reports that first failure once every task
//! has exited.

use crate::consumer_base::panic_message;
use futures::FutureExt;
use messaging::StreamError;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tokio::task::{Id, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

pub struct TaskGroup {
    cancel: CancellationToken,
    tasks: JoinSet<Result<(), StreamError>>,
    names: HashMap<Id, String>,
}

impl TaskGroup {
    /// Group whose token is a child of `parent`.
    pub fn new(parent: &CancellationToken) -> Self {
        Self {
            cancel: parent.child_token(),
            tasks: JoinSet::new(),
            names: HashMap::new(),
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Spawn a task. It receives the group token and should return once it fires.
    ///
    /// A panic is reported as [`StreamError::Panic`] and cancels the token
    /// right away, like an error return.
    pub fn spawn<F, Fut>(&mut self, name: impl Into<String>, task: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<(), StreamError>> + Send + 'static,
    {
        let name = name.into();
        let token = self.cancel.clone();
        let fut = task(token.clone());
        let task_name = name.clone();

        let handle = self.tasks.spawn(async move {
            let result = match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(result) => result,
                Err(payload) => {
                    error!(task = %task_name, panic = %panic_message(payload), "task panicked");
                    Err(StreamError::Panic(task_name.clone()))
                }
            };

            if let Err(e) = &result {
                error!(task = %task_name, error = %e, "task failed, stopping sibling tasks");
                token.cancel();
            }
            result
        });

        self.names.insert(handle.id(), name);
    }

    /// Join every task and return the first error.
    pub async fn wait(mut self) -> Result<(), StreamError> {
        let mut first_error = None;

        while let Some(joined) = self.tasks.join_next_with_id().await {
            let result = match joined {
                Ok((id, result)) => {
                    if let Some(name) = self.names.remove(&id) {
                        debug!(task = %name, "task finished");
                    }
                    result
                }
                Err(join_error) => {
                    let name = self
                        .names
                        .remove(&join_error.id())
                        .unwrap_or_else(|| "unnamed task".to_string());

                    debug!(task = %name, "task was aborted");
                    Ok(())
                }
            };

            if let Err(e) = result {
                if first_error.is_none() {
                    first_error = Some(e);
                }
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
    use std::time::Duration;

    #[tokio::test]
    async fn test_all_tasks_succeed() {
        let mut group = TaskGroup::new(&CancellationToken::new());
        group.spawn("a", |_| async { Ok(()) });
        group.spawn("b", |_| async { Ok(()) });

        assert!(group.wait().await.is_ok());
    }

    #[tokio::test]
    async fn test_failure_cancels_siblings() {
        let parent = CancellationToken::new();
        let mut group = TaskGroup::new(&parent);

        group.spawn("waiter", |cancel| async move {
            cancel.cancelled().await;
            Ok(())
        });
        group.spawn("failing", |_| async { Err(StreamError::backend("boom")) });

        let err = tokio::time::timeout(Duration::from_secs(5), group.wait())
            .await
            .unwrap()
            .unwrap_err();

        assert_eq!(err.to_string(), "backend error: boom");
        assert!(!parent.is_cancelled());
    }

    #[tokio::test]
    async fn test_panic_becomes_error() {
        let mut group = TaskGroup::new(&CancellationToken::new());
        group.spawn("waiter", |cancel| async move {
            cancel.cancelled().await;
            Ok(())
        });
        group.spawn("exploding", |_| async { panic!("boom") });

        let err = group.wait().await.unwrap_err();
        assert_eq!(err.to_string(), "panic during exploding");
    }

    #[tokio::test]
    async fn test_panic_cancels_token_before_wait() {
        let mut group = TaskGroup::new(&CancellationToken::new());
        let token = group.token();
        group.spawn("exploding", |_| async { panic!("boom") });

        tokio::time::timeout(Duration::from_secs(5), token.cancelled())
            .await
            .unwrap();
        assert!(matches!(group.wait().await, Err(StreamError::Panic(_))));
    }

    #[tokio::test]
    async fn test_parent_cancel_reaches_tasks() {
        let parent = CancellationToken::new();
        let mut group = TaskGroup::new(&parent);
        group.spawn("waiter", |cancel| async move {
            cancel.cancelled().await;
            Ok(())
        });

        parent.cancel();
        assert!(group.wait().await.is_ok());
    }
}
