//! Exclusive chord registration through `global-hotkey`.

use super::{await_install, Binding, Emitter, EventHandler, EventPump, HotkeyEvent, HotkeyService};
use crate::error::{Result, StpError};
use global_hotkey::hotkey::HotKey;
use global_hotkey::{GlobalHotKeyEvent, GlobalHotKeyManager, HotKeyState};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Registers every chord with the OS from one dedicated thread.
///
/// The manager is created, used and dropped on that thread because the OS
/// ties hotkey ownership to the registering thread.
pub struct RegisteredHotkeys {
    bindings: Vec<Binding>,
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    pump: Option<EventPump>,
}

impl RegisteredHotkeys {
    pub fn new(bindings: Vec<Binding>) -> Self {
        Self {
            bindings,
            shutdown: Arc::new(AtomicBool::new(false)),
            thread: None,
            pump: None,
        }
    }
}

impl HotkeyService for RegisteredHotkeys {
    fn start(&mut self, handler: EventHandler) -> Result<()> {
        if self.thread.is_some() {
            return Err(StpError::hotkey("hotkey service already started"));
        }
        if self.bindings.is_empty() {
            tracing::warn!("no hotkeys to register");
            return Ok(());
        }

        let pump = EventPump::start(handler)?;
        let emitter = pump.emitter();
        let bindings = self.bindings.clone();
        let shutdown = Arc::clone(&self.shutdown);
        let (ready_tx, ready_rx) = flume::bounded(1);

        let thread = std::thread::Builder::new()
            .name("stp-hotkey-register".into())
            .spawn(move || registration_loop(bindings, emitter, shutdown, ready_tx))?;
        self.thread = Some(thread);
        self.pump = Some(pump);

        if let Err(e) = await_install(ready_rx) {
            self.close();
            return Err(e);
        }
        Ok(())
    }

    fn close(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("hotkey registration thread panicked");
            }
        }
        if let Some(mut pump) = self.pump.take() {
            pump.stop();
        }
    }
}

impl Drop for RegisteredHotkeys {
    fn drop(&mut self) {
        self.close();
    }
}

fn registration_loop(
    bindings: Vec<Binding>,
    emitter: Emitter,
    shutdown: Arc<AtomicBool>,
    ready: flume::Sender<Result<()>>,
) {
    let manager = match GlobalHotKeyManager::new() {
        Ok(manager) => manager,
        Err(e) => {
            let _ = ready.send(Err(StpError::hotkey(format!(
                "failed to create GlobalHotKeyManager: {e}"
            ))));
            return;
        }
    };

    let mut registered: Vec<HotKey> = Vec::with_capacity(bindings.len());
    let mut targets: HashMap<u32, HotkeyEvent> = HashMap::with_capacity(bindings.len());
    for binding in &bindings {
        let hotkey = binding.spec.to_hotkey();
        if let Err(e) = manager.register(hotkey) {
            release(&manager, &registered);
            let _ = ready.send(Err(StpError::hotkey(format!(
                "failed to register hotkey '{}': {e}",
                binding.spec
            ))));
            return;
        }
        registered.push(hotkey);
        targets.insert(hotkey.id(), binding.event);
    }

    // The caller may have given up waiting; do not keep chords nobody listens to.
    if ready.send(Ok(())).is_err() {
        release(&manager, &registered);
        return;
    }
    tracing::info!(count = registered.len(), "global hotkeys registered");

    let receiver = GlobalHotKeyEvent::receiver();
    while !shutdown.load(Ordering::SeqCst) {
        pump_os_messages();
        match receiver.recv_timeout(POLL_INTERVAL) {
            Ok(event) if event.state == HotKeyState::Pressed => {
                if let Some(target) = targets.get(&event.id) {
                    emitter.emit(*target);
                }
            }
            _ => {}
        }
    }

    release(&manager, &registered);
    tracing::debug!("global hotkeys unregistered");
}

fn release(manager: &GlobalHotKeyManager, registered: &[HotKey]) {
    if registered.is_empty() {
        return;
    }
    if let Err(e) = manager.unregister_all(registered) {
        tracing::warn!(error = %e, "failed to unregister hotkeys");
    }
}

/// Drains this thread's message queue so hotkey notifications reach the
/// manager's hidden window.
#[cfg(windows)]
fn pump_os_messages() {
    use winapi::um::winuser::{DispatchMessageW, PeekMessageW, TranslateMessage, MSG, PM_REMOVE};

    // SAFETY: MSG is plain data and is only touched on this thread.
    unsafe {
        let mut msg: MSG = std::mem::zeroed();
        while PeekMessageW(&mut msg, std::ptr::null_mut(), 0, 0, PM_REMOVE) != 0 {
            TranslateMessage(&msg);
            DispatchMessageW(&msg);
        }
    }
}

#[cfg(not(windows))]
fn pump_os_messages() {}
