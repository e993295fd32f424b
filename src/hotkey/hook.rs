//! Low-level keyboard interception.
//!
//! [`Interceptor`] holds the matching logic and is platform independent;
//! [`KeyboardHook`] installs it behind a Windows `WH_KEYBOARD_LL` hook.
//! The hook callback must return quickly or Windows silently removes the
//! hook, so it only decides pass/swallow and queues an event.

use super::{Binding, Emitter, EventHandler, EventPump, HotkeyService};
use crate::error::{Result, StpError};
use global_hotkey::hotkey::Modifiers;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

/// What the hook tells the OS to do with a keystroke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Hand the keystroke on to other applications.
    Pass,
    /// Consume the keystroke.
    Swallow,
}

/// Matches keystrokes against the bindings and tracks suppressed keys.
pub struct Interceptor {
    by_key: HashMap<u32, Vec<Binding>>,
    suppressed: Mutex<HashSet<u32>>,
    emitter: Emitter,
}

impl Interceptor {
    pub fn new(bindings: &[Binding], emitter: Emitter) -> Self {
        let mut by_key: HashMap<u32, Vec<Binding>> = HashMap::new();
        for binding in bindings {
            by_key.entry(binding.spec.vk).or_default().push(*binding);
        }
        Self {
            by_key,
            suppressed: Mutex::new(HashSet::new()),
            emitter,
        }
    }

    fn suppressed(&self) -> MutexGuard<'_, HashSet<u32>> {
        self.suppressed.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Handles a key-down. `held` reports the live modifier state and is
    /// only queried when some binding uses this key.
    pub fn key_down(&self, vk: u32, injected: bool, held: impl FnOnce() -> Modifiers) -> Verdict {
        if injected {
            return Verdict::Pass;
        }
        let Some(candidates) = self.by_key.get(&vk) else {
            return Verdict::Pass;
        };
        let held = held();
        match candidates.iter().find(|b| b.spec.modifiers_satisfied(held)) {
            Some(binding) => {
                self.suppressed().insert(vk);
                self.emitter.emit(binding.event);
                Verdict::Swallow
            }
            None => Verdict::Pass,
        }
    }

    /// Handles a key-up: swallowed exactly once after a matched key-down.
    pub fn key_up(&self, vk: u32, injected: bool) -> Verdict {
        if injected {
            return Verdict::Pass;
        }
        if self.suppressed().remove(&vk) {
            Verdict::Swallow
        } else {
            Verdict::Pass
        }
    }
}

/// The interceptor the OS callback dispatches to.
///
/// The hook procedure is a bare function pointer with no user data, so the
/// state it needs lives here. Only one keyboard hook service may be active
/// per process; a second `start` fails while the slot is taken.
static ACTIVE_INTERCEPTOR: Mutex<Option<Arc<Interceptor>>> = Mutex::new(None);

fn slot() -> MutexGuard<'static, Option<Arc<Interceptor>>> {
    ACTIVE_INTERCEPTOR.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg_attr(not(windows), allow(dead_code))]
fn claim_slot(interceptor: Arc<Interceptor>) -> Result<()> {
    let mut slot = slot();
    if slot.is_some() {
        return Err(StpError::hotkey("a keyboard hook is already active in this process"));
    }
    *slot = Some(interceptor);
    Ok(())
}

#[cfg_attr(not(windows), allow(dead_code))]
fn release_slot() {
    slot().take();
}

#[cfg_attr(not(windows), allow(dead_code))]
fn active_interceptor() -> Option<Arc<Interceptor>> {
    slot().clone()
}

/// Global interception strategy.
pub struct KeyboardHook {
    #[cfg_attr(not(windows), allow(dead_code))]
    bindings: Vec<Binding>,
    thread: Option<JoinHandle<()>>,
    #[cfg_attr(not(windows), allow(dead_code))]
    thread_id: Arc<std::sync::atomic::AtomicU32>,
    pump: Option<EventPump>,
    owns_slot: bool,
}

impl KeyboardHook {
    pub fn new(bindings: Vec<Binding>) -> Self {
        Self {
            bindings,
            thread: None,
            thread_id: Arc::new(std::sync::atomic::AtomicU32::new(0)),
            pump: None,
            owns_slot: false,
        }
    }
}

impl HotkeyService for KeyboardHook {
    #[cfg(windows)]
    fn start(&mut self, handler: EventHandler) -> Result<()> {
        if self.thread.is_some() {
            return Err(StpError::hotkey("hotkey service already started"));
        }
        if self.bindings.is_empty() {
            tracing::warn!("no hotkeys to watch");
            return Ok(());
        }

        let pump = EventPump::start(handler)?;
        claim_slot(Arc::new(Interceptor::new(&self.bindings, pump.emitter())))?;
        self.owns_slot = true;
        self.pump = Some(pump);

        let (ready_tx, ready_rx) = flume::bounded(1);
        let thread_id = Arc::clone(&self.thread_id);
        let thread = std::thread::Builder::new()
            .name("stp-keyboard-hook".into())
            .spawn(move || windows::hook_loop(thread_id, ready_tx));
        match thread {
            Ok(thread) => self.thread = Some(thread),
            Err(e) => {
                self.close();
                return Err(e.into());
            }
        }

        if let Err(e) = super::await_install(ready_rx) {
            self.close();
            return Err(e);
        }
        tracing::info!(count = self.bindings.len(), "keyboard hook installed");
        Ok(())
    }

    #[cfg(not(windows))]
    fn start(&mut self, _handler: EventHandler) -> Result<()> {
        Err(StpError::unsupported_platform(
            "the keyboard hook strategy is only available on Windows",
        ))
    }

    fn close(&mut self) {
        if let Some(thread) = self.thread.take() {
            #[cfg(windows)]
            windows::stop_hook_thread(&self.thread_id, &thread);
            if thread.join().is_err() {
                tracing::error!("keyboard hook thread panicked");
            }
        }
        if self.owns_slot {
            release_slot();
            self.owns_slot = false;
        }
        if let Some(mut pump) = self.pump.take() {
            pump.stop();
        }
    }
}

impl Drop for KeyboardHook {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(windows)]
mod windows {
    use super::{active_interceptor, Verdict};
    use crate::error::{Result, StpError};
    use global_hotkey::hotkey::Modifiers;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::thread::JoinHandle;
    use std::time::Duration;
    use winapi::shared::minwindef::{LPARAM, LRESULT, WPARAM};
    use winapi::um::processthreadsapi::GetCurrentThreadId;
    use winapi::um::winuser::{
        CallNextHookEx, DispatchMessageW, GetAsyncKeyState, GetMessageW, PostThreadMessageW,
        SetWindowsHookExW, TranslateMessage, UnhookWindowsHookEx, HC_ACTION, KBDLLHOOKSTRUCT,
        LLKHF_INJECTED, MSG, VK_CONTROL, VK_LWIN, VK_MENU, VK_RWIN, VK_SHIFT, WH_KEYBOARD_LL,
        WM_KEYDOWN, WM_KEYUP, WM_QUIT, WM_SYSKEYDOWN, WM_SYSKEYUP,
    };

    pub(super) fn hook_loop(thread_id: Arc<AtomicU32>, ready: flume::Sender<Result<()>>) {
        // SAFETY: all handles below are created and destroyed on this thread.
        unsafe {
            thread_id.store(GetCurrentThreadId(), Ordering::SeqCst);

            let hook = SetWindowsHookExW(
                WH_KEYBOARD_LL,
                Some(low_level_keyboard_proc),
                std::ptr::null_mut(),
                0,
            );
            if hook.is_null() {
                let _ = ready.send(Err(StpError::hotkey(format!(
                    "SetWindowsHookExW failed: {}",
                    std::io::Error::last_os_error()
                ))));
                return;
            }
            if ready.send(Ok(())).is_err() {
                UnhookWindowsHookEx(hook);
                return;
            }

            let mut msg: MSG = std::mem::zeroed();
            // 0 means WM_QUIT, -1 an error; both end the loop.
            while GetMessageW(&mut msg, std::ptr::null_mut(), 0, 0) > 0 {
                TranslateMessage(&msg);
                DispatchMessageW(&msg);
            }
            UnhookWindowsHookEx(hook);
        }
        tracing::debug!("keyboard hook removed");
    }

    /// Posts WM_QUIT until the hook thread has left its message loop.
    pub(super) fn stop_hook_thread(thread_id: &AtomicU32, thread: &JoinHandle<()>) {
        while !thread.is_finished() {
            let id = thread_id.load(Ordering::SeqCst);
            if id != 0 {
                // SAFETY: posting to a thread id has no memory effects on our side.
                unsafe {
                    PostThreadMessageW(id, WM_QUIT, 0, 0);
                }
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    fn key_held(vk: i32) -> bool {
        // SAFETY: GetAsyncKeyState only reads global input state.
        let state = unsafe { GetAsyncKeyState(vk) };
        (state as u16) & 0x8000 != 0
    }

    fn held_modifiers() -> Modifiers {
        let mut held = Modifiers::empty();
        if key_held(VK_MENU) {
            held |= Modifiers::ALT;
        }
        if key_held(VK_CONTROL) {
            held |= Modifiers::CONTROL;
        }
        if key_held(VK_SHIFT) {
            held |= Modifiers::SHIFT;
        }
        if key_held(VK_LWIN) || key_held(VK_RWIN) {
            held |= Modifiers::SUPER;
        }
        held
    }

    unsafe extern "system" fn low_level_keyboard_proc(code: i32, wparam: WPARAM, lparam: LPARAM) -> LRESULT {
        if code == HC_ACTION {
            if let Some(interceptor) = active_interceptor() {
                let info = &*(lparam as *const KBDLLHOOKSTRUCT);
                let injected = info.flags & LLKHF_INJECTED != 0;
                let verdict = match wparam as u32 {
                    WM_KEYDOWN | WM_SYSKEYDOWN => interceptor.key_down(info.vkCode, injected, held_modifiers),
                    WM_KEYUP | WM_SYSKEYUP => interceptor.key_up(info.vkCode, injected),
                    _ => Verdict::Pass,
                };
                if verdict == Verdict::Swallow {
                    return 1;
                }
            }
        }
        CallNextHookEx(std::ptr::null_mut(), code, wparam, lparam)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hotkey::{build_bindings, HotkeyEvent};

    const VK_F1: u32 = 0x70;
    const VK_Q: u32 = 0x51;

    fn interceptor(specs: &[(usize, &str)], stop: &str) -> (Interceptor, flume::Receiver<HotkeyEvent>) {
        let tasks: Vec<_> = specs.iter().map(|(id, s)| (*id, s.to_string())).collect();
        let bindings = build_bindings(&tasks, stop).unwrap();
        let (tx, rx) = flume::bounded(8);
        (Interceptor::new(&bindings, Emitter::new(tx)), rx)
    }

    #[test]
    fn test_match_swallows_down_and_single_up() {
        let (hook, events) = interceptor(&[(1, "ctrl+f1")], "");

        assert_eq!(hook.key_down(VK_F1, false, || Modifiers::CONTROL), Verdict::Swallow);
        assert_eq!(events.try_recv().unwrap(), HotkeyEvent::Task(1));
        assert_eq!(hook.key_up(VK_F1, false), Verdict::Swallow);
        assert_eq!(hook.key_up(VK_F1, false), Verdict::Pass);
    }

    #[test]
    fn test_missing_modifier_passes_through() {
        let (hook, events) = interceptor(&[(1, "ctrl+shift+f1")], "");

        assert_eq!(hook.key_down(VK_F1, false, || Modifiers::CONTROL), Verdict::Pass);
        assert_eq!(hook.key_up(VK_F1, false), Verdict::Pass);
        assert!(events.is_empty());
    }

    #[test]
    fn test_unrequired_modifiers_are_ignored() {
        let (hook, events) = interceptor(&[(2, "ctrl+f1")], "");
        let held = Modifiers::CONTROL | Modifiers::ALT | Modifiers::SHIFT;
        assert_eq!(hook.key_down(VK_F1, false, || held), Verdict::Swallow);
        assert_eq!(events.try_recv().unwrap(), HotkeyEvent::Task(2));
    }

    #[test]
    fn test_first_matching_binding_wins() {
        let (hook, events) = interceptor(&[(1, "ctrl+shift+f1"), (2, "ctrl+f1")], "");

        hook.key_down(VK_F1, false, || Modifiers::CONTROL | Modifiers::SHIFT);
        assert_eq!(events.try_recv().unwrap(), HotkeyEvent::Task(1));

        hook.key_down(VK_F1, false, || Modifiers::CONTROL);
        assert_eq!(events.try_recv().unwrap(), HotkeyEvent::Task(2));
        assert!(events.is_empty());
    }

    #[test]
    fn test_stop_binding() {
        let (hook, events) = interceptor(&[(1, "ctrl+f1")], "alt+q");
        assert_eq!(hook.key_down(VK_Q, false, || Modifiers::ALT), Verdict::Swallow);
        assert_eq!(events.try_recv().unwrap(), HotkeyEvent::Stop);
    }

    #[test]
    fn test_injected_keys_are_ignored() {
        let (hook, events) = interceptor(&[(1, "ctrl+f1")], "");
        let mut queried = false;
        assert_eq!(
            hook.key_down(VK_F1, true, || {
                queried = true;
                Modifiers::CONTROL
            }),
            Verdict::Pass
        );
        assert!(!queried);
        assert!(events.is_empty());

        hook.key_down(VK_F1, false, || Modifiers::CONTROL);
        assert_eq!(hook.key_up(VK_F1, true), Verdict::Pass);
        assert_eq!(hook.key_up(VK_F1, false), Verdict::Swallow);
    }

    #[test]
    fn test_unbound_keys_skip_modifier_query() {
        let (hook, _events) = interceptor(&[(1, "ctrl+f1")], "");
        let mut queried = false;
        let verdict = hook.key_down(VK_Q, false, || {
            queried = true;
            Modifiers::CONTROL
        });
        assert_eq!(verdict, Verdict::Pass);
        assert!(!queried);
    }

    #[test]
    fn test_full_queue_still_swallows() {
        let tasks = vec![(1, "ctrl+f1".to_string())];
        let bindings = build_bindings(&tasks, "").unwrap();
        let (tx, rx) = flume::bounded(1);
        let hook = Interceptor::new(&bindings, Emitter::new(tx));

        assert_eq!(hook.key_down(VK_F1, false, || Modifiers::CONTROL), Verdict::Swallow);
        assert_eq!(hook.key_down(VK_F1, false, || Modifiers::CONTROL), Verdict::Swallow);
        assert_eq!(rx.len(), 1);
    }

    #[test]
    fn test_slot_admits_one_interceptor() {
        let (first, _rx1) = interceptor(&[(1, "ctrl+f1")], "");
        let (second, _rx2) = interceptor(&[(1, "ctrl+f2")], "");

        claim_slot(Arc::new(first)).unwrap();
        assert!(active_interceptor().is_some());
        assert!(claim_slot(Arc::new(second)).is_err());
        release_slot();
        assert!(active_interceptor().is_none());
    }

    #[test]
    fn test_close_is_idempotent_without_start() {
        let mut hook = KeyboardHook::new(Vec::new());
        hook.close();
        hook.close();
    }
}
