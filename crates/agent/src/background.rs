//! Post-response pipeline: persistence, learning, memory maintenance,
//! interaction logging and metrics.
//!
//! A [`BackgroundJob`] carries the finished turn off the request path. The
//! [`BackgroundWorker`] owns a fixed pool of tokio tasks draining a bounded
//! queue; [`BackgroundService::process_async`] runs the stages for one job.
//! Every stage is isolated: a failure (or panic) is logged, published as a
//! `BackgroundStageFailed` event and the next stage still runs.

use concierge_config::BackgroundConfig;
use concierge_core::agent::{AgentState, Termination};
use concierge_core::event::{DomainEvent, EventBus};
use concierge_core::memory::{LearningInput, LearningManager, LearningOutcome, LifecycleManager, LifecycleReport};
use concierge_core::message::ConversationId;
use concierge_core::metrics::{MetricsSink, NoopMetrics, TurnMetrics};
use concierge_core::storage::{InteractionRecord, StorageManager};
use concierge_memory::{NoopLearning, NoopLifecycle};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{OwnedMutexGuard, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Phrases that introduce something the user wants remembered.
const REMEMBER_TRIGGERS: &[&str] = &[
    "remember that ",
    "remember: ",
    "remember ",
    "don't forget that ",
    "don't forget ",
    "do not forget that ",
    "do not forget ",
    "note that ",
    "keep in mind that ",
    "make a note that ",
];

const POLITE_PREFIXES: &[&str] = &["please ", "can you ", "could you ", "would you ", "hey, ", "hey "];

/// Extract the fact from an explicit "remember …" request.
///
/// Only requests are detected: the trigger must open the utterance (after
/// polite prefixes) and questions such as "do you remember …?" are ignored.
pub fn detect_remember_request(input: &str) -> Option<String> {
    let trimmed = input.trim();
    // ASCII lowercasing keeps byte offsets aligned with `trimmed`.
    let lower = trimmed.to_ascii_lowercase();
    let mut offset = 0;
    while let Some(prefix) = POLITE_PREFIXES.iter().find(|p| lower[offset..].starts_with(*p)) {
        offset += prefix.len();
    }

    let trigger = REMEMBER_TRIGGERS.iter().find(|t| lower[offset..].starts_with(*t))?;
    let fact = trimmed[offset + trigger.len()..].trim();
    if fact.ends_with('?') {
        return None;
    }
    let fact = fact.trim_end_matches(['.', '!']).trim();
    (!fact.is_empty()).then(|| fact.to_string())
}

/// A finished turn handed to the background pipeline.
pub struct BackgroundJob {
    pub user_id: String,
    pub conversation_id: ConversationId,
    pub user_input: String,
    pub response: String,
    /// Terminal state of the turn.
    pub state: AgentState,
    pub termination: Termination,
    pub steps: u32,
    pub started_at: DateTime<Utc>,
    pub responded_at: DateTime<Utc>,
    /// Per-user turn lock, released once the state is persisted.
    pub turn_guard: Option<OwnedMutexGuard<()>>,
}

impl std::fmt::Debug for BackgroundJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundJob")
            .field("user_id", &self.user_id)
            .field("conversation_id", &self.conversation_id)
            .field("termination", &self.termination)
            .field("steps", &self.steps)
            .field("holds_turn_lock", &self.turn_guard.is_some())
            .finish()
    }
}

/// What the pipeline did for one job.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackgroundReport {
    pub persisted: bool,
    pub persist_attempts: u32,
    pub learning: Option<LearningOutcome>,
    pub lifecycle: Option<LifecycleReport>,
    pub interaction_logged: bool,
    pub metrics_recorded: bool,
    pub failed_stages: Vec<&'static str>,
}

pub struct BackgroundService {
    storage: Arc<dyn StorageManager>,
    learning: Arc<dyn LearningManager>,
    lifecycle: Arc<dyn LifecycleManager>,
    metrics: Arc<dyn MetricsSink>,
    event_bus: Arc<EventBus>,
    persist_retries: u32,
    retry_backoff: Duration,
}

impl BackgroundService {
    pub fn new(storage: Arc<dyn StorageManager>, event_bus: Arc<EventBus>) -> Self {
        Self {
            storage,
            learning: Arc::new(NoopLearning),
            lifecycle: Arc::new(NoopLifecycle),
            metrics: Arc::new(NoopMetrics),
            event_bus,
            persist_retries: 2,
            retry_backoff: Duration::from_millis(200),
        }
    }

    pub fn with_learning(mut self, learning: Arc<dyn LearningManager>) -> Self {
        self.learning = learning;
        self
    }

    pub fn with_lifecycle(mut self, lifecycle: Arc<dyn LifecycleManager>) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_retry_policy(mut self, retries: u32, backoff: Duration) -> Self {
        self.persist_retries = retries;
        self.retry_backoff = backoff;
        self
    }

    pub fn with_config(self, config: &BackgroundConfig) -> Self {
        self.with_retry_policy(config.persist_retries, Duration::from_millis(config.retry_backoff_ms))
    }

    /// Run every stage for `job`. Never fails.
    pub async fn process_async(&self, mut job: BackgroundJob) -> BackgroundReport {
        let mut report = BackgroundReport::default();

        // 1. persist, then let the user's next turn in
        let (persisted, attempts) = self.persist(&job).await;
        report.persist_attempts = attempts;
        match persisted {
            Ok(()) => report.persisted = true,
            Err(e) => self.stage_failed(&job, "persist", &e, &mut report),
        }
        drop(job.turn_guard.take());

        // 2. learn
        let explicit = detect_remember_request(&job.user_input);
        let input = LearningInput {
            user_id: &job.user_id,
            conversation_id: &job.conversation_id,
            user_input: &job.user_input,
            response: &job.response,
            explicit_request: explicit.as_deref(),
            tools: &job.state.turn_tools,
        };
        match isolated(async { self.learning.learn(&input).await.map_err(|e| e.to_string()) }).await {
            Ok(outcome) => {
                if outcome.stored > 0 {
                    self.event_bus.publish(DomainEvent::MemoryLearned {
                        user_id: job.user_id.clone(),
                        stored: outcome.stored,
                        timestamp: Utc::now(),
                    });
                }
                report.learning = Some(outcome);
            }
            Err(e) => self.stage_failed(&job, "learning", &e, &mut report),
        }

        // 3. maintain
        match isolated(async { self.lifecycle.maintain(&job.user_id).await.map_err(|e| e.to_string()) }).await {
            Ok(lifecycle) => report.lifecycle = Some(lifecycle),
            Err(e) => self.stage_failed(&job, "lifecycle", &e, &mut report),
        }

        // 4. log
        let record = InteractionRecord {
            conversation_id: job.conversation_id.clone(),
            user_id: job.user_id.clone(),
            user_input: job.user_input.clone(),
            response: job.response.clone(),
            tool_calls: job.state.turn_tools.clone(),
            termination: job.termination,
            steps: job.steps,
            latency_ms: millis_between(job.started_at, job.responded_at),
            timestamp: job.responded_at,
        };
        match isolated(async { self.storage.log_agent_interaction(&record).await.map_err(|e| e.to_string()) }).await {
            Ok(()) => report.interaction_logged = true,
            Err(e) => self.stage_failed(&job, "interaction_log", &e, &mut report),
        }

        // 5. metrics
        let metrics = TurnMetrics {
            user_id: job.user_id.clone(),
            conversation_id: job.conversation_id.clone(),
            termination: job.termination,
            steps: job.steps,
            tool_calls: job.state.turn_tools.len(),
            response_latency_ms: millis_between(job.started_at, job.responded_at),
            total_latency_ms: millis_between(job.started_at, Utc::now()),
            memory_blocks: job.state.memory_context.len(),
        };
        let sink = AssertUnwindSafe(|| self.metrics.record_turn(&metrics));
        match std::panic::catch_unwind(sink) {
            Ok(()) => report.metrics_recorded = true,
            Err(_) => self.stage_failed(&job, "metrics", &"metrics sink panicked", &mut report),
        }

        debug!(
            user_id = %job.user_id,
            conversation_id = %job.conversation_id,
            failed = report.failed_stages.len(),
            "Background pipeline finished"
        );
        report
    }

    async fn persist(&self, job: &BackgroundJob) -> (Result<(), String>, u32) {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = isolated(async {
                self.storage
                    .save_state(&job.conversation_id, &job.state, &job.user_id)
                    .await
                    .map_err(|e| e.to_string())
            })
            .await;

            match result {
                Ok(()) => return (Ok(()), attempt),
                Err(e) if attempt <= self.persist_retries => {
                    warn!(
                        user_id = %job.user_id,
                        conversation_id = %job.conversation_id,
                        attempt,
                        error = %e,
                        "State persist failed, retrying"
                    );
                    tokio::time::sleep(self.retry_backoff * attempt).await;
                }
                Err(e) => return (Err(e), attempt),
            }
        }
    }

    fn stage_failed(
        &self,
        job: &BackgroundJob,
        stage: &'static str,
        err: &dyn std::fmt::Display,
        report: &mut BackgroundReport,
    ) {
        error!(
            user_id = %job.user_id,
            conversation_id = %job.conversation_id,
            stage,
            error = %err,
            "Background stage failed"
        );
        self.event_bus.publish(DomainEvent::BackgroundStageFailed {
            user_id: job.user_id.clone(),
            conversation_id: job.conversation_id.to_string(),
            stage: stage.to_string(),
            error_message: err.to_string(),
            timestamp: Utc::now(),
        });
        report.failed_stages.push(stage);
    }
}

/// Run a stage, turning a panic into an error.
async fn isolated<T>(stage: impl Future<Output = Result<T, String>>) -> Result<T, String> {
    AssertUnwindSafe(stage)
        .catch_unwind()
        .await
        .unwrap_or_else(|_| Err("stage panicked".to_string()))
}

fn millis_between(from: DateTime<Utc>, to: DateTime<Utc>) -> u64 {
    (to - from).num_milliseconds().max(0) as u64
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Fixed pool of tasks consuming background jobs.
pub struct BackgroundWorker {
    service: Arc<BackgroundService>,
    sender: Mutex<Option<mpsc::Sender<BackgroundJob>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    overflow: Mutex<Vec<JoinHandle<()>>>,
}

impl BackgroundWorker {
    /// Start `workers` tasks sharing a queue of `capacity` jobs.
    /// Must be called inside a tokio runtime.
    pub fn spawn(service: Arc<BackgroundService>, workers: usize, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel::<BackgroundJob>(capacity.max(1));
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));

        let handles = (0..workers.max(1))
            .map(|worker_id| {
                let receiver = receiver.clone();
                let service = service.clone();
                tokio::spawn(async move {
                    loop {
                        let job = receiver.lock().await.recv().await;
                        let Some(job) = job else { break };
                        service.process_async(job).await;
                    }
                    debug!(worker_id, "Background worker stopped");
                })
            })
            .collect();

        info!(workers = workers.max(1), capacity, "Background workers started");
        Self {
            service,
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(handles),
            overflow: Mutex::new(Vec::new()),
        }
    }

    pub fn from_config(service: Arc<BackgroundService>, config: &BackgroundConfig) -> Self {
        Self::spawn(service, config.workers, config.queue_capacity)
    }

    /// Hand a job to the pool without waiting. When the queue is full or
    /// closed the job runs on its own task instead.
    pub fn submit(&self, job: BackgroundJob) {
        let sender = lock(&self.sender).clone();
        let job = match sender {
            Some(sender) => match sender.try_send(job) {
                Ok(()) => return,
                Err(mpsc::error::TrySendError::Full(job)) => {
                    warn!(user_id = %job.user_id, "Background queue full, running job detached");
                    job
                }
                Err(mpsc::error::TrySendError::Closed(job)) => job,
            },
            None => job,
        };

        let service = self.service.clone();
        let handle = tokio::spawn(async move {
            service.process_async(job).await;
        });
        let mut overflow = lock(&self.overflow);
        overflow.retain(|h| !h.is_finished());
        overflow.push(handle);
    }

    /// Stop accepting jobs and wait until every queued job is processed.
    pub async fn shutdown(&self) {
        lock(&self.sender).take();
        let handles: Vec<JoinHandle<()>> = {
            let mut workers = lock(&self.workers);
            let mut overflow = lock(&self.overflow);
            workers.drain(..).chain(overflow.drain(..)).collect()
        };
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{FailingLearning, FlakyStorage, RecordingMetrics, state};
    use concierge_core::memory::MemoryBackend;
    use concierge_memory::{InMemoryBackend, InMemoryStateStore, MemoryLearningManager};
    use std::sync::atomic::Ordering;

    fn job(input: &str) -> BackgroundJob {
        let mut s = state(input);
        s.append_user_input(input);
        s.append_assistant("Noted.");
        let now = Utc::now();
        BackgroundJob {
            user_id: "u1".into(),
            conversation_id: s.conversation_id.clone(),
            user_input: input.into(),
            response: "Noted.".into(),
            state: s,
            termination: Termination::FinalAnswer,
            steps: 1,
            started_at: now,
            responded_at: now,
            turn_guard: None,
        }
    }

    #[test]
    fn detects_explicit_requests() {
        assert_eq!(
            detect_remember_request("Remember that my sister's birthday is May 3rd.").as_deref(),
            Some("my sister's birthday is May 3rd")
        );
        assert_eq!(
            detect_remember_request("please don't forget I'm allergic to nuts!").as_deref(),
            Some("I'm allergic to nuts")
        );
        assert_eq!(
            detect_remember_request("Can you remember: gate code 4512").as_deref(),
            Some("gate code 4512")
        );
    }

    #[test]
    fn ignores_questions_and_mentions() {
        assert!(detect_remember_request("Do you remember my sister's name?").is_none());
        assert!(detect_remember_request("remember when we met?").is_none());
        assert!(detect_remember_request("I can't remember anything").is_none());
        assert!(detect_remember_request("remember").is_none());
    }

    #[tokio::test]
    async fn all_stages_run() {
        let storage = Arc::new(InMemoryStateStore::new());
        let memory = Arc::new(InMemoryBackend::new());
        let metrics = Arc::new(RecordingMetrics::default());
        let service = BackgroundService::new(storage.clone(), Arc::new(EventBus::default()))
            .with_learning(Arc::new(MemoryLearningManager::new(memory.clone())))
            .with_metrics(metrics.clone());

        let report = service.process_async(job("Remember that I take the 8:15 train")).await;

        assert!(report.persisted);
        assert!(report.interaction_logged);
        assert!(report.metrics_recorded);
        assert!(report.failed_stages.is_empty());
        assert_eq!(report.learning.unwrap().stored, 1);
        assert_eq!(memory.count().await.unwrap(), 1);
        assert_eq!(storage.interaction_count().await, 1);
        assert_eq!(metrics.turns.lock().unwrap()[0].steps, 1);
        assert!(
            storage
                .load_state(&ConversationId::from("c1"))
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn persist_is_retried() {
        let storage = Arc::new(FlakyStorage::new(2));
        let service = BackgroundService::new(storage.clone(), Arc::new(EventBus::default()))
            .with_retry_policy(2, Duration::from_millis(1));

        let report = service.process_async(job("x")).await;
        assert!(report.persisted);
        assert_eq!(report.persist_attempts, 3);
        assert_eq!(storage.save_attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_do_not_stop_later_stages() {
        let storage = Arc::new(FlakyStorage::new(10));
        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();
        let service = BackgroundService::new(storage.clone(), bus)
            .with_retry_policy(1, Duration::from_millis(1))
            .with_learning(Arc::new(FailingLearning));

        let report = service.process_async(job("x")).await;
        assert!(!report.persisted);
        assert_eq!(report.failed_stages, vec!["persist", "learning"]);
        assert!(report.interaction_logged);
        assert!(report.metrics_recorded);

        match rx.recv().await.unwrap().as_ref() {
            DomainEvent::BackgroundStageFailed { stage, user_id, .. } => {
                assert_eq!(stage, "persist");
                assert_eq!(user_id, "u1");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn turn_lock_released_after_persist() {
        let lock = Arc::new(tokio::sync::Mutex::new(()));
        let mut j = job("x");
        j.turn_guard = Some(lock.clone().lock_owned().await);
        assert!(lock.try_lock().is_err());

        let service = BackgroundService::new(Arc::new(InMemoryStateStore::new()), Arc::new(EventBus::default()));
        service.process_async(j).await;
        assert!(lock.try_lock().is_ok());
    }

    #[tokio::test]
    async fn worker_drains_queue_on_shutdown() {
        let storage = Arc::new(InMemoryStateStore::new());
        let service = Arc::new(BackgroundService::new(storage.clone(), Arc::new(EventBus::default())));
        let worker = BackgroundWorker::spawn(service, 2, 1);

        for _ in 0..5 {
            worker.submit(job("x"));
        }
        worker.shutdown().await;
        assert_eq!(storage.interaction_count().await, 5);
    }

    #[tokio::test]
    async fn submit_does_not_wait_for_slow_storage() {
        let storage = Arc::new(FlakyStorage::new(0).with_save_delay(Duration::from_millis(300)));
        let service = Arc::new(BackgroundService::new(storage.clone(), Arc::new(EventBus::default())));
        let worker = BackgroundWorker::spawn(service, 1, 4);

        let start = std::time::Instant::now();
        worker.submit(job("x"));
        assert!(start.elapsed() < Duration::from_millis(100));

        worker.shutdown().await;
        assert_eq!(storage.save_attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn submit_after_shutdown_still_processes() {
        let storage = Arc::new(InMemoryStateStore::new());
        let service = Arc::new(BackgroundService::new(storage.clone(), Arc::new(EventBus::default())));
        let worker = BackgroundWorker::spawn(service, 1, 1);
        worker.shutdown().await;

        worker.submit(job("late"));
        worker.shutdown().await;
        assert_eq!(storage.interaction_count().await, 1);
    }
}
