//! Serialized execution of hotkey-triggered tasks.
//!
//! Presses become task ids on a bounded queue drained by a single worker,
//! so at most one job touches the clipboard or the network at a time. The
//! running job's [`CancellationToken`] sits in a slot that
//! [`TaskOrchestrator::stop_all`] can reach from any thread.

use crate::clipboard::TextIo;
use crate::config::{Config, TaskDefinition};
use crate::dispatch::{send_with_retry, RetryPolicy, Transport};
use crate::error::{DispatchError, Result, StpError};
use crate::extract::extract_text;
use crate::payload::{
    build_payload, extract_runtime_overrides, merge_extra, parse_extra_config, PayloadInput,
};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Capacity of the pending task queue.
pub const TASK_QUEUE_CAPACITY: usize = 64;

/// Pasted after a failed request when notifications are enabled.
pub const REQUEST_FAILED_PLACEHOLDER: &str = "[request failed]";

/// Pasted when the response holds no usable text and notifications are enabled.
pub const EMPTY_RESULT_PLACEHOLDER: &str = "[empty result]";

/// Everything a job needs besides its collaborators.
#[derive(Debug, Clone, Default)]
pub struct OrchestratorSettings {
    pub tasks: Vec<TaskDefinition>,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub api_endpoint: String,
    pub token: String,
    pub text_path: String,
    pub global_extra: Map<String, Value>,
    pub retry: RetryPolicy,
    pub request_failed_notification: bool,
}

impl OrchestratorSettings {
    /// Fails when the global extra config is not a JSON object.
    pub fn from_config(config: &Config) -> Result<Self> {
        let global_extra = parse_extra_config(&config.extra_config)
            .map_err(|e| StpError::invalid_extra_config(format!("global extra_config: {e}")))?;

        Ok(Self {
            tasks: config.task_definitions(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            api_endpoint: config.api_endpoint.clone(),
            token: config.token.clone(),
            text_path: config.text_path.clone(),
            global_extra,
            retry: config.retry_policy(),
            request_failed_notification: config.request_failed_notification,
        })
    }
}

/// State shared between the handle and the worker task.
struct Shared {
    settings: OrchestratorSettings,
    transport: Arc<dyn Transport>,
    text_io: Arc<dyn TextIo>,
    current: Mutex<Option<CancellationToken>>,
}

/// Single-worker job queue with cancellation.
pub struct TaskOrchestrator {
    shared: Arc<Shared>,
    sender: flume::Sender<usize>,
    receiver: flume::Receiver<usize>,
    closed: AtomicBool,
    shutdown: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TaskOrchestrator {
    pub fn new(
        settings: OrchestratorSettings,
        transport: Arc<dyn Transport>,
        text_io: Arc<dyn TextIo>,
    ) -> Self {
        let (sender, receiver) = flume::bounded(TASK_QUEUE_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                settings,
                transport,
                text_io,
                current: Mutex::new(None),
            }),
            sender,
            receiver,
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            worker: Mutex::new(None),
        }
    }

    /// Spawns the worker on the current tokio runtime. Later calls do nothing.
    pub fn start(&self) {
        let mut worker = self.worker.lock().unwrap_or_else(|e| e.into_inner());
        if worker.is_some() || self.closed.load(Ordering::SeqCst) {
            return;
        }

        let shared = Arc::clone(&self.shared);
        let receiver = self.receiver.clone();
        let shutdown = self.shutdown.clone();
        *worker = Some(tokio::spawn(async move {
            loop {
                let id = tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    id = receiver.recv_async() => match id {
                        Ok(id) => id,
                        Err(_) => break,
                    },
                };
                shared.run_job(id, &shutdown).await;
            }
            tracing::debug!("task worker stopped");
        }));
    }

    /// Queues a task without waiting. Dropped when the queue is full or the
    /// orchestrator is closed.
    pub fn enqueue(&self, id: usize) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        match self.sender.try_send(id) {
            Ok(()) => tracing::debug!(task = id, "task queued"),
            Err(flume::TrySendError::Full(_)) => {
                tracing::debug!(task = id, "task queue full, dropping task")
            }
            Err(flume::TrySendError::Disconnected(_)) => {}
        }
    }

    /// Cancels the running job and discards everything queued behind it.
    /// The worker keeps accepting new tasks.
    pub fn stop_all(&self) {
        self.shared.cancel_current();
        let dropped = self.receiver.drain().count();
        tracing::info!(dropped, "stopped current task and cleared queue");
    }

    /// Number of tasks waiting behind the running one.
    pub fn pending(&self) -> usize {
        self.receiver.len()
    }

    /// Stops intake, cancels the running job and waits for the worker.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown.cancel();
        self.shared.cancel_current();

        let worker = self
            .worker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "task worker panicked");
            }
        }
    }
}

impl Shared {
    fn set_current(&self, token: Option<CancellationToken>) {
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = token;
    }

    fn cancel_current(&self) {
        if let Some(token) = self
            .current
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
        {
            token.cancel();
        }
    }

    async fn run_job(&self, id: usize, shutdown: &CancellationToken) {
        let Some(task) = self.settings.tasks.iter().find(|t| t.id == id) else {
            tracing::debug!(task = id, "no such task");
            return;
        };
        let prompt = task.prompt.trim();
        if prompt.is_empty() {
            return;
        }

        // Installed before the copy so a stop during the copy phase still
        // prevents the request.
        let cancel = shutdown.child_token();
        self.set_current(Some(cancel.clone()));
        tracing::info!(task = id, "task started");
        self.execute(task, prompt, &cancel).await;
        self.set_current(None);
    }

    async fn execute(&self, task: &TaskDefinition, prompt: &str, cancel: &CancellationToken) {
        let settings = &self.settings;

        let selected = match self.copy_selected().await {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => {
                tracing::debug!(task = task.id, "nothing selected");
                return;
            }
            Err(e) => {
                tracing::warn!(task = task.id, error = %e, "copy failed");
                return;
            }
        };
        if cancel.is_cancelled() {
            tracing::info!(task = task.id, "task cancelled");
            return;
        }

        let per_task = match parse_extra_config(&task.extra_config) {
            Ok(extra) => extra,
            Err(e) => {
                tracing::warn!(task = task.id, error = %e, "invalid task extra_config");
                return;
            }
        };
        let (overrides, per_task) = extract_runtime_overrides(per_task);

        let payload = build_payload(PayloadInput {
            model: &settings.model,
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            prompt,
            user_text: &selected,
            extra: merge_extra(&settings.global_extra, &per_task),
        });

        let endpoint = first_non_blank(&overrides.api_endpoint, &settings.api_endpoint);
        let token = first_non_blank(&overrides.token, &settings.token);

        let body = match send_with_retry(
            self.transport.as_ref(),
            endpoint,
            token,
            &payload,
            settings.retry,
            cancel,
        )
        .await
        {
            Ok(body) => body,
            Err(DispatchError::Cancelled) => {
                tracing::info!(task = task.id, "task cancelled");
                return;
            }
            Err(e) => {
                tracing::warn!(task = task.id, error = %e, "request failed");
                self.notify(REQUEST_FAILED_PLACEHOLDER, cancel).await;
                return;
            }
        };

        let text = extract_text(&body, &overrides.text_path, &settings.text_path);
        if text.trim().is_empty() {
            tracing::warn!(task = task.id, "response contained no text");
            self.notify(EMPTY_RESULT_PLACEHOLDER, cancel).await;
            return;
        }

        if cancel.is_cancelled() {
            tracing::info!(task = task.id, "task cancelled");
            return;
        }
        match self.paste(text).await {
            Ok(()) => tracing::info!(task = task.id, "task finished"),
            Err(e) => tracing::warn!(task = task.id, error = %e, "paste failed"),
        }
    }

    async fn notify(&self, placeholder: &str, cancel: &CancellationToken) {
        if !self.settings.request_failed_notification || cancel.is_cancelled() {
            return;
        }
        if let Err(e) = self.paste(placeholder.to_string()).await {
            tracing::debug!(error = %e, "failed to paste placeholder");
        }
    }

    async fn copy_selected(&self) -> Result<String> {
        let text_io = Arc::clone(&self.text_io);
        tokio::task::spawn_blocking(move || text_io.copy_selected())
            .await
            .map_err(|e| StpError::clipboard(format!("copy task failed: {e}")))?
    }

    async fn paste(&self, text: String) -> Result<()> {
        let text_io = Arc::clone(&self.text_io);
        tokio::task::spawn_blocking(move || text_io.paste_text(&text))
            .await
            .map_err(|e| StpError::clipboard(format!("paste task failed: {e}")))?
    }
}

fn first_non_blank<'a>(preferred: &'a str, fallback: &'a str) -> &'a str {
    match preferred.trim() {
        "" => fallback.trim(),
        value => value,
    }
}
