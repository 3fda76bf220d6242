use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobnode_kube::{
    spawn_polling_watch, ClusterExecutor, CreateOutcome, DeleteOutcome, ExecutorError,
    JobCondition, JobDescriptor, JobView, LabelSelector, PodPhase, PodView, PodWatch,
    JOB_NAME_LABEL,
};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Executor operations, for call accounting and fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    CreateJob,
    ListPods,
    WatchPods,
    ListJobs,
    ReadPodLog,
    DeleteJob,
    DeletePod,
}

/// An error to return from the next call of some [`Method`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Unavailable,
    Timeout,
    Api(u16),
}

impl Fault {
    fn into_error(self) -> ExecutorError {
        match self {
            Fault::Unavailable => ExecutorError::Unavailable("injected".to_string()),
            Fault::Timeout => ExecutorError::Timeout,
            Fault::Api(status) => ExecutorError::Api {
                status,
                message: "injected".to_string(),
            },
        }
    }
}

#[derive(Debug, Clone)]
struct FakeJob {
    descriptor: JobDescriptor,
    uid: String,
    created_at: DateTime<Utc>,
    active: u32,
    succeeded: u32,
    failed: u32,
    condition: Option<JobCondition>,
    pods: Vec<String>,
}

impl FakeJob {
    fn view(&self) -> JobView {
        JobView {
            name: self.descriptor.name.clone(),
            uid: self.uid.clone(),
            active: self.active,
            succeeded: self.succeeded,
            failed: self.failed,
            condition: self.condition,
            labels: self.descriptor.labels.clone(),
            annotations: self.descriptor.annotations.clone(),
            created_at: Some(self.created_at),
        }
    }
}

#[derive(Debug, Clone)]
struct FakePod {
    view: PodView,
    log: Vec<u8>,
}

struct State {
    jobs: BTreeMap<String, FakeJob>,
    pods: BTreeMap<String, FakePod>,
    created: Vec<JobDescriptor>,
    deleted_jobs: Vec<JobView>,
    stale_listings: bool,
    initial_phase: PodPhase,
    faults: VecDeque<(Method, Fault)>,
    blanked: VecDeque<Method>,
    calls: HashMap<Method, usize>,
    clock: DateTime<Utc>,
    sequence: i64,
}

impl State {
    fn tick(&mut self) -> DateTime<Utc> {
        self.sequence += 1;
        self.clock + chrono::Duration::seconds(self.sequence)
    }

    fn enter(&mut self, method: Method) -> Result<(), ExecutorError> {
        *self.calls.entry(method).or_insert(0) += 1;
        if let Some(pos) = self.faults.iter().position(|(m, _)| *m == method) {
            if let Some((_, fault)) = self.faults.remove(pos) {
                return Err(fault.into_error());
            }
        }
        Ok(())
    }

    fn take_blank(&mut self, method: Method) -> bool {
        match self.blanked.iter().position(|m| *m == method) {
            Some(pos) => self.blanked.remove(pos).is_some(),
            None => false,
        }
    }

    fn spawn_pod(&mut self, job_name: &str) {
        let created_at = self.tick();
        let phase = self.initial_phase;
        let Some(job) = self.jobs.get_mut(job_name) else {
            return;
        };

        let pod_name = format!("{}-{}", job_name, job.pods.len());
        let mut labels = job.descriptor.labels.clone();
        labels.insert(JOB_NAME_LABEL.to_string(), job_name.to_string());

        job.pods.push(pod_name.clone());
        job.active = 1;
        self.pods.insert(
            pod_name.clone(),
            FakePod {
                view: PodView {
                    name: pod_name,
                    phase,
                    labels,
                    created_at: Some(created_at),
                },
                log: Vec::new(),
            },
        );
    }

    fn latest_pod(&mut self, job_name: &str) -> Option<&mut FakePod> {
        let name = self.jobs.get(job_name)?.pods.last()?.clone();
        self.pods.get_mut(&name)
    }
}

/// In-memory cluster executor.
///
/// New jobs immediately get one pod in the configured initial phase
/// (`Running` unless changed). Tests then move jobs along with
/// [`complete_job`](Self::complete_job), [`fail_attempt`](Self::fail_attempt)
/// and friends. Deleting a job leaves its pods behind, so callers must clean
/// those up themselves.
#[derive(Clone)]
pub struct FakeCluster {
    state: Arc<Mutex<State>>,
    watch_interval: Duration,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                jobs: BTreeMap::new(),
                pods: BTreeMap::new(),
                created: Vec::new(),
                deleted_jobs: Vec::new(),
                stale_listings: false,
                initial_phase: PodPhase::Running,
                faults: VecDeque::new(),
                blanked: VecDeque::new(),
                calls: HashMap::new(),
                clock: Utc::now(),
                sequence: 0,
            })),
            watch_interval: Duration::from_millis(10),
        }
    }

    /// Phase given to newly spawned pods.
    pub fn with_initial_phase(self, phase: PodPhase) -> Self {
        self.state.lock().initial_phase = phase;
        self
    }

    /// Keep reporting deleted jobs from `list_jobs`, as a lagging API
    /// server cache would.
    pub fn with_stale_listings(self) -> Self {
        self.state.lock().stale_listings = true;
        self
    }

    /// Fail the next call of `method` with `fault`.
    pub fn fail_next(&self, method: Method, fault: Fault) {
        self.state.lock().faults.push_back((method, fault));
    }

    /// Make the next listing of `method` come back empty, as a lagging
    /// cache would.
    pub fn blank_next(&self, method: Method) {
        self.state.lock().blanked.push_back(method);
    }

    /// Move every pending pod of a job to `Running`.
    pub fn start_pod(&self, job_name: &str) {
        let mut state = self.state.lock();
        let pods = state
            .jobs
            .get(job_name)
            .map(|j| j.pods.clone())
            .unwrap_or_default();
        for pod in pods {
            if let Some(p) = state.pods.get_mut(&pod) {
                if p.view.phase == PodPhase::Pending {
                    p.view.phase = PodPhase::Running;
                }
            }
        }
    }

    /// The current attempt succeeds and the job completes.
    pub fn complete_job(&self, job_name: &str) {
        let mut state = self.state.lock();
        if let Some(pod) = state.latest_pod(job_name) {
            pod.view.phase = PodPhase::Succeeded;
        }
        if let Some(job) = state.jobs.get_mut(job_name) {
            job.active = 0;
            job.succeeded += 1;
            job.condition = Some(JobCondition::Complete);
        }
    }

    /// The current attempt fails. The executor retries with a fresh pod
    /// until the backoff limit is exceeded, then marks the job failed.
    pub fn fail_attempt(&self, job_name: &str) {
        let mut state = self.state.lock();
        if let Some(pod) = state.latest_pod(job_name) {
            pod.view.phase = PodPhase::Failed;
        }

        let retry = match state.jobs.get_mut(job_name) {
            Some(job) if job.condition.is_none() => {
                job.failed += 1;
                if job.failed > job.descriptor.backoff_limit {
                    job.active = 0;
                    job.condition = Some(JobCondition::Failed);
                    false
                } else {
                    true
                }
            }
            _ => false,
        };

        if retry {
            state.spawn_pod(job_name);
        }
    }

    /// Fail attempts until the retry budget is exhausted.
    pub fn fail_job(&self, job_name: &str) {
        loop {
            let done = {
                let state = self.state.lock();
                state
                    .jobs
                    .get(job_name)
                    .map(|j| j.condition.is_some())
                    .unwrap_or(true)
            };
            if done {
                return;
            }
            self.fail_attempt(job_name);
        }
    }

    /// Force every pod of a job into `phase`.
    pub fn set_pods_phase(&self, job_name: &str, phase: PodPhase) {
        let mut state = self.state.lock();
        let pods = state
            .jobs
            .get(job_name)
            .map(|j| j.pods.clone())
            .unwrap_or_default();
        for pod in pods {
            if let Some(p) = state.pods.get_mut(&pod) {
                p.view.phase = phase;
            }
        }
        if let Some(job) = state.jobs.get_mut(job_name) {
            job.active = 0;
        }
    }

    /// Set the log of a single pod.
    pub fn set_pod_log(&self, pod_name: &str, log: impl Into<Vec<u8>>) {
        if let Some(pod) = self.state.lock().pods.get_mut(pod_name) {
            pod.log = log.into();
        }
    }

    /// Names of the pods a job has spawned, oldest first.
    pub fn pod_names(&self, job_name: &str) -> Vec<String> {
        self.state
            .lock()
            .jobs
            .get(job_name)
            .map(|j| j.pods.clone())
            .unwrap_or_default()
    }

    /// Every pod still present, regardless of owner.
    pub fn live_pods(&self) -> Vec<String> {
        self.state.lock().pods.keys().cloned().collect()
    }

    pub fn job(&self, job_name: &str) -> Option<JobView> {
        self.state.lock().jobs.get(job_name).map(FakeJob::view)
    }

    pub fn job_names(&self) -> Vec<String> {
        self.state.lock().jobs.keys().cloned().collect()
    }

    /// Every descriptor accepted by `create_job`, in order.
    pub fn created_jobs(&self) -> Vec<JobDescriptor> {
        self.state.lock().created.clone()
    }

    pub fn calls(&self, method: Method) -> usize {
        self.state.lock().calls.get(&method).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.state.lock().calls.values().sum()
    }

    pub fn assert_created_count_eq(&self, expected: usize) {
        let actual = self.state.lock().created.len();
        assert_eq!(
            actual, expected,
            "Expected {} created jobs, got {}",
            expected, actual
        );
    }
}

impl Default for FakeCluster {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClusterExecutor for FakeCluster {
    async fn create_job(
        &self,
        _namespace: &str,
        descriptor: &JobDescriptor,
    ) -> Result<CreateOutcome, ExecutorError> {
        let mut state = self.state.lock();
        state.enter(Method::CreateJob)?;

        if state.jobs.contains_key(&descriptor.name) {
            return Ok(CreateOutcome::AlreadyExists);
        }

        let created_at = state.tick();
        state.created.push(descriptor.clone());
        state.jobs.insert(
            descriptor.name.clone(),
            FakeJob {
                descriptor: descriptor.clone(),
                uid: Uuid::new_v4().to_string(),
                created_at,
                active: 0,
                succeeded: 0,
                failed: 0,
                condition: None,
                pods: Vec::new(),
            },
        );
        state.spawn_pod(&descriptor.name);
        Ok(CreateOutcome::Created)
    }

    async fn list_pods(
        &self,
        _namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<PodView>, ExecutorError> {
        let mut state = self.state.lock();
        state.enter(Method::ListPods)?;
        if state.take_blank(Method::ListPods) {
            return Ok(Vec::new());
        }
        Ok(state
            .pods
            .values()
            .filter(|p| selector.matches(&p.view.labels))
            .map(|p| p.view.clone())
            .collect())
    }

    async fn watch_pods(
        &self,
        namespace: &str,
        selector: &LabelSelector,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<PodWatch, ExecutorError> {
        self.state.lock().enter(Method::WatchPods)?;
        Ok(spawn_polling_watch(
            self.clone(),
            namespace.to_string(),
            selector.clone(),
            timeout,
            self.watch_interval,
            cancel,
        ))
    }

    async fn list_jobs(
        &self,
        _namespace: &str,
        selector: Option<&LabelSelector>,
    ) -> Result<Vec<JobView>, ExecutorError> {
        let mut state = self.state.lock();
        state.enter(Method::ListJobs)?;
        if state.take_blank(Method::ListJobs) {
            return Ok(Vec::new());
        }

        let matches = |view: &JobView| selector.map(|s| s.matches(&view.labels)).unwrap_or(true);
        let mut views: Vec<JobView> = state.jobs.values().map(FakeJob::view).collect();
        if state.stale_listings {
            views.extend(state.deleted_jobs.iter().cloned());
        }
        Ok(views.into_iter().filter(|v| matches(v)).collect())
    }

    async fn read_pod_log(
        &self,
        _namespace: &str,
        pod_name: &str,
    ) -> Result<Vec<u8>, ExecutorError> {
        let mut state = self.state.lock();
        state.enter(Method::ReadPodLog)?;
        state
            .pods
            .get(pod_name)
            .map(|p| p.log.clone())
            .ok_or_else(|| ExecutorError::NotFound(format!("pod {}", pod_name)))
    }

    async fn delete_job(&self, _namespace: &str, name: &str) -> Result<DeleteOutcome, ExecutorError> {
        let mut state = self.state.lock();
        state.enter(Method::DeleteJob)?;
        match state.jobs.remove(name) {
            Some(job) => {
                state.deleted_jobs.push(job.view());
                Ok(DeleteOutcome::Deleted)
            }
            None => Ok(DeleteOutcome::AlreadyGone),
        }
    }

    async fn delete_pod(&self, _namespace: &str, name: &str) -> Result<DeleteOutcome, ExecutorError> {
        let mut state = self.state.lock();
        state.enter(Method::DeletePod)?;
        match state.pods.remove(name) {
            Some(_) => Ok(DeleteOutcome::Deleted),
            None => Ok(DeleteOutcome::AlreadyGone),
        }
    }
}
