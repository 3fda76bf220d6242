//! Pod phase subscriptions.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, warn};

use crate::error::ExecutorError;
use crate::executor::ClusterExecutor;
use crate::types::{LabelSelector, PodPhase, PodPhaseEvent};

/// A live pod phase subscription.
///
/// Yields one event per pod each time its phase changes, including the first
/// time it is seen. Dropping the watch stops the background task.
pub struct PodWatch {
    events: mpsc::Receiver<Result<PodPhaseEvent, ExecutorError>>,
    _guard: DropGuard,
}

impl PodWatch {
    /// Build a watch from a channel fed by some producer. `cancel` is fired
    /// when the watch is dropped.
    pub fn new(
        events: mpsc::Receiver<Result<PodPhaseEvent, ExecutorError>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            events,
            _guard: cancel.drop_guard(),
        }
    }

    /// Next event, or `None` once the subscription has ended.
    pub async fn next(&mut self) -> Option<Result<PodPhaseEvent, ExecutorError>> {
        self.events.recv().await
    }
}

/// Run a watch by polling `list_pods` every `poll_interval`.
///
/// Transient listing errors are forwarded to the subscriber and polling
/// continues. Any other error is forwarded and ends the subscription.
pub fn spawn_polling_watch<E>(
    executor: E,
    namespace: String,
    selector: LabelSelector,
    timeout: Duration,
    poll_interval: Duration,
    cancel: CancellationToken,
) -> PodWatch
where
    E: ClusterExecutor + 'static,
{
    let (tx, rx) = mpsc::channel(32);
    let task_cancel = cancel.child_token();
    let deadline = Instant::now() + timeout;

    tokio::spawn({
        let cancel = task_cancel.clone();
        async move {
            let mut last_seen: HashMap<String, PodPhase> = HashMap::new();

            loop {
                match executor.list_pods(&namespace, &selector).await {
                    Ok(pods) => {
                        for pod in pods {
                            if last_seen.get(&pod.name) == Some(&pod.phase) {
                                continue;
                            }
                            last_seen.insert(pod.name.clone(), pod.phase);
                            let event = PodPhaseEvent {
                                pod_name: pod.name,
                                phase: pod.phase,
                            };
                            if tx.send(Ok(event)).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        let transient = e.is_transient();
                        if transient {
                            warn!(selector = %selector, error = %e, "Pod watch poll failed");
                        }
                        if tx.send(Err(e)).await.is_err() || !transient {
                            return;
                        }
                    }
                }

                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!(selector = %selector, "Pod watch cancelled");
                        return;
                    }
                    _ = tokio::time::sleep_until(deadline) => {
                        debug!(selector = %selector, "Pod watch expired");
                        return;
                    }
                    _ = tokio::time::sleep(poll_interval) => {}
                }
            }
        }
    });

    PodWatch::new(rx, task_cancel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use crate::types::{CreateOutcome, DeleteOutcome, JobDescriptor, JobView, PodView};

    /// Serves a scripted sequence of listings, repeating the last one.
    #[derive(Clone)]
    struct Scripted {
        listings: Arc<Mutex<Vec<Vec<PodView>>>>,
    }

    fn pod(name: &str, phase: PodPhase) -> PodView {
        PodView {
            name: name.to_string(),
            phase,
            labels: BTreeMap::new(),
            created_at: None,
        }
    }

    #[async_trait]
    impl ClusterExecutor for Scripted {
        async fn create_job(&self, _: &str, _: &JobDescriptor) -> Result<CreateOutcome, ExecutorError> {
            Ok(CreateOutcome::Created)
        }

        async fn list_pods(&self, _: &str, _: &LabelSelector) -> Result<Vec<PodView>, ExecutorError> {
            let mut listings = self.listings.lock().unwrap();
            if listings.len() > 1 {
                Ok(listings.remove(0))
            } else {
                Ok(listings.first().cloned().unwrap_or_default())
            }
        }

        async fn watch_pods(
            &self,
            _: &str,
            _: &LabelSelector,
            _: Duration,
            _: CancellationToken,
        ) -> Result<PodWatch, ExecutorError> {
            Err(ExecutorError::InvalidConfig("not used".into()))
        }

        async fn list_jobs(&self, _: &str, _: Option<&LabelSelector>) -> Result<Vec<JobView>, ExecutorError> {
            Ok(Vec::new())
        }

        async fn read_pod_log(&self, _: &str, _: &str) -> Result<Vec<u8>, ExecutorError> {
            Ok(Vec::new())
        }

        async fn delete_job(&self, _: &str, _: &str) -> Result<DeleteOutcome, ExecutorError> {
            Ok(DeleteOutcome::AlreadyGone)
        }

        async fn delete_pod(&self, _: &str, _: &str) -> Result<DeleteOutcome, ExecutorError> {
            Ok(DeleteOutcome::AlreadyGone)
        }
    }

    #[tokio::test]
    async fn test_emits_only_phase_changes() {
        let executor = Scripted {
            listings: Arc::new(Mutex::new(vec![
                vec![],
                vec![pod("p1", PodPhase::Pending)],
                vec![pod("p1", PodPhase::Pending)],
                vec![pod("p1", PodPhase::Running)],
            ])),
        };

        let mut watch = spawn_polling_watch(
            executor,
            "ns".to_string(),
            LabelSelector::new().with("run-id", "1"),
            Duration::from_secs(5),
            Duration::from_millis(5),
            CancellationToken::new(),
        );

        let first = watch.next().await.unwrap().unwrap();
        assert_eq!(first.phase, PodPhase::Pending);
        let second = watch.next().await.unwrap().unwrap();
        assert_eq!(second.pod_name, "p1");
        assert_eq!(second.phase, PodPhase::Running);
    }

    #[tokio::test]
    async fn test_ends_at_timeout() {
        let executor = Scripted {
            listings: Arc::new(Mutex::new(vec![vec![]])),
        };

        let mut watch = spawn_polling_watch(
            executor,
            "ns".to_string(),
            LabelSelector::new(),
            Duration::from_millis(30),
            Duration::from_millis(5),
            CancellationToken::new(),
        );

        assert!(watch.next().await.is_none());
    }

    #[tokio::test]
    async fn test_ends_on_cancel() {
        let executor = Scripted {
            listings: Arc::new(Mutex::new(vec![vec![]])),
        };
        let cancel = CancellationToken::new();

        let mut watch = spawn_polling_watch(
            executor,
            "ns".to_string(),
            LabelSelector::new(),
            Duration::from_secs(60),
            Duration::from_millis(5),
            cancel.clone(),
        );

        cancel.cancel();
        assert!(watch.next().await.is_none());
    }
}
