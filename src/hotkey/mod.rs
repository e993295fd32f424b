//! Global hotkey capture.
//!
//! Two interchangeable strategies implement [`HotkeyService`]:
//!
//! - [`RegisteredHotkeys`]: asks the OS for exclusive ownership of each
//!   chord. A chord already taken by another program fails startup.
//! - [`KeyboardHook`]: a low-level keyboard hook (Windows) that sees every
//!   key press, swallows matching chords and lets everything else through.
//!
//! Both own a dedicated OS thread for the lifetime of the service and hand
//! events to the caller's handler on a separate consumer thread through a
//! bounded queue. When that queue is full new events are dropped.

mod hook;
mod parse;
mod registered;

pub use hook::{Interceptor, KeyboardHook, Verdict};
pub use parse::HotkeySpec;
pub use registered::RegisteredHotkeys;

use crate::error::{Result, StpError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// How long the hotkey thread gets to report a successful install.
pub const STARTUP_TIMEOUT: Duration = Duration::from_secs(2);

/// Capacity of the queue between the OS thread and the handler.
pub const EVENT_QUEUE_CAPACITY: usize = 32;

/// What a matched chord asks the application to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HotkeyEvent {
    /// Run the task with this 1-based id.
    Task(usize),
    /// Cancel the running task and clear the queue.
    Stop,
}

/// A chord and the event it produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Binding {
    pub event: HotkeyEvent,
    pub spec: HotkeySpec,
}

/// Parses every task chord plus the optional stop chord.
///
/// Blank specs are skipped. Any invalid spec fails the whole set, since a
/// partially bound configuration would be confusing to the user.
pub fn build_bindings(task_hotkeys: &[(usize, String)], stop_hotkey: &str) -> Result<Vec<Binding>> {
    let mut bindings = Vec::with_capacity(task_hotkeys.len() + 1);
    for (id, spec) in task_hotkeys {
        if spec.trim().is_empty() {
            continue;
        }
        let spec = HotkeySpec::parse(spec).map_err(|e| {
            StpError::config_validation(format!("task {id}: {e}"))
        })?;
        bindings.push(Binding {
            event: HotkeyEvent::Task(*id),
            spec,
        });
    }
    if !stop_hotkey.trim().is_empty() {
        let spec = HotkeySpec::parse(stop_hotkey)
            .map_err(|e| StpError::config_validation(format!("stop hotkey: {e}")))?;
        bindings.push(Binding {
            event: HotkeyEvent::Stop,
            spec,
        });
    }
    Ok(bindings)
}

/// Which capture strategy to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HotkeyStrategy {
    /// Exclusive OS registration of each chord.
    #[default]
    Register,
    /// Low-level keyboard hook.
    Hook,
}

#[derive(Debug, Clone, Default)]
pub struct HotkeyOptions {
    pub strategy: HotkeyStrategy,
    /// `(task id, hotkey spec)` for every eligible task.
    pub task_hotkeys: Vec<(usize, String)>,
    pub stop_hotkey: String,
}

/// Receives hotkey events on the consumer thread.
pub type EventHandler = Box<dyn Fn(HotkeyEvent) + Send + 'static>;

/// Common contract of both capture strategies.
pub trait HotkeyService: Send {
    /// Installs the chords and starts delivering events to `handler`.
    ///
    /// Returns only after the OS side reported success or failure, or
    /// after [`STARTUP_TIMEOUT`].
    fn start(&mut self, handler: EventHandler) -> Result<()>;

    /// Releases every OS resource. Safe to call more than once.
    fn close(&mut self);
}

/// Parses the configured chords and builds the selected strategy.
pub fn new_service(options: HotkeyOptions) -> Result<Box<dyn HotkeyService>> {
    let bindings = build_bindings(&options.task_hotkeys, &options.stop_hotkey)?;
    Ok(match options.strategy {
        HotkeyStrategy::Register => Box::new(RegisteredHotkeys::new(bindings)),
        HotkeyStrategy::Hook => Box::new(KeyboardHook::new(bindings)),
    })
}

/// Non-blocking sender side of the event queue.
#[derive(Debug, Clone)]
pub struct Emitter {
    sender: flume::Sender<HotkeyEvent>,
}

impl Emitter {
    pub(crate) fn new(sender: flume::Sender<HotkeyEvent>) -> Self {
        Self { sender }
    }

    /// Queues `event` without waiting. Returns false if it was dropped.
    pub fn emit(&self, event: HotkeyEvent) -> bool {
        match self.sender.try_send(event) {
            Ok(()) => true,
            Err(flume::TrySendError::Full(event)) => {
                tracing::debug!(?event, "hotkey event queue full, dropping event");
                false
            }
            Err(flume::TrySendError::Disconnected(_)) => false,
        }
    }
}

/// Consumer thread that calls the handler for each queued event.
pub(crate) struct EventPump {
    sender: flume::Sender<HotkeyEvent>,
    running: Arc<AtomicBool>,
    consumer: Option<JoinHandle<()>>,
}

impl EventPump {
    const POLL_INTERVAL: Duration = Duration::from_millis(50);

    pub(crate) fn start(handler: EventHandler) -> Result<Self> {
        let (sender, receiver) = flume::bounded(EVENT_QUEUE_CAPACITY);
        let running = Arc::new(AtomicBool::new(true));
        let running_clone = Arc::clone(&running);

        let consumer = std::thread::Builder::new()
            .name("stp-hotkey-events".into())
            .spawn(move || {
                while running_clone.load(Ordering::SeqCst) {
                    match receiver.recv_timeout(Self::POLL_INTERVAL) {
                        Ok(event) => handler(event),
                        Err(flume::RecvTimeoutError::Timeout) => {}
                        Err(flume::RecvTimeoutError::Disconnected) => break,
                    }
                }
            })?;

        Ok(Self {
            sender,
            running,
            consumer: Some(consumer),
        })
    }

    pub(crate) fn emitter(&self) -> Emitter {
        Emitter::new(self.sender.clone())
    }

    pub(crate) fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(consumer) = self.consumer.take() {
            if consumer.join().is_err() {
                tracing::error!("hotkey event handler panicked");
            }
        }
    }
}

impl Drop for EventPump {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Waits for the OS thread's install report.
pub(crate) fn await_install(ready: flume::Receiver<Result<()>>) -> Result<()> {
    match ready.recv_timeout(STARTUP_TIMEOUT) {
        Ok(result) => result,
        Err(flume::RecvTimeoutError::Timeout) => Err(StpError::HotkeyTimeout(STARTUP_TIMEOUT)),
        Err(flume::RecvTimeoutError::Disconnected) => {
            Err(StpError::hotkey("hotkey thread exited during startup"))
        }
    }
}
