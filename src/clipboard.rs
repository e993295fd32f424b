//! Selection capture and replacement through the system clipboard.
//!
//! Copying the selection means clearing the clipboard, sending Ctrl+C (Cmd+C
//! on macOS) and waiting for text to show up; pasting means writing the
//! clipboard and sending Ctrl+V. Both put the user's previous clipboard
//! content back afterwards, whether or not the operation worked.

use crate::error::{Result, StpError};
use arboard::Clipboard as SystemBoard;
use enigo::{Direction, Enigo, Key, Keyboard, Settings};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

/// Raw clipboard text access.
pub trait Clipboard: Send + Sync {
    fn read_text(&self) -> Result<String>;
    fn write_text(&self, text: &str) -> Result<()>;
}

/// Synthesizes the platform copy/paste chords.
pub trait InputSimulator: Send + Sync {
    fn copy(&self) -> Result<()>;
    fn paste(&self) -> Result<()>;
}

/// What a job needs: grab the selection, replace the selection.
pub trait TextIo: Send + Sync {
    fn copy_selected(&self) -> Result<String>;
    fn paste_text(&self, text: &str) -> Result<()>;
}

/// `arboard` backed clipboard.
pub struct SystemClipboard {
    inner: Mutex<SystemBoard>,
}

impl SystemClipboard {
    pub fn new() -> Result<Self> {
        let inner = SystemBoard::new()
            .map_err(|e| StpError::clipboard(format!("failed to initialize clipboard: {e}")))?;
        Ok(Self {
            inner: Mutex::new(inner),
        })
    }
}

impl Clipboard for SystemClipboard {
    fn read_text(&self) -> Result<String> {
        let mut board = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        board
            .get_text()
            .map_err(|e| StpError::clipboard(format!("failed to read clipboard: {e}")))
    }

    fn write_text(&self, text: &str) -> Result<()> {
        let mut board = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        board
            .set_text(text)
            .map_err(|e| StpError::clipboard(format!("failed to set clipboard: {e}")))
    }
}

/// `enigo` backed keystroke injection.
///
/// Injected keystrokes carry the OS "injected" flag, which the keyboard
/// hook uses to ignore them.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemInput;

impl SystemInput {
    /// Cmd on macOS, Ctrl elsewhere.
    fn modifier_key() -> Key {
        #[cfg(target_os = "macos")]
        {
            Key::Meta
        }
        #[cfg(not(target_os = "macos"))]
        {
            Key::Control
        }
    }

    fn send_chord(&self, key: char) -> Result<()> {
        let mut enigo = Enigo::new(&Settings::default())
            .map_err(|e| StpError::input(format!("failed to initialize Enigo: {e}")))?;
        let modifier = Self::modifier_key();

        enigo
            .key(modifier, Direction::Press)
            .map_err(|e| StpError::input(format!("failed to press modifier: {e}")))?;
        thread::sleep(Duration::from_millis(10));
        let clicked = enigo
            .key(Key::Unicode(key), Direction::Click)
            .map_err(|e| StpError::input(format!("failed to click key: {e}")));
        thread::sleep(Duration::from_millis(20));
        // Always release, even if the click failed.
        let released = enigo
            .key(modifier, Direction::Release)
            .map_err(|e| StpError::input(format!("failed to release modifier: {e}")));
        clicked.and(released)
    }
}

impl InputSimulator for SystemInput {
    fn copy(&self) -> Result<()> {
        self.send_chord('c')
    }

    fn paste(&self) -> Result<()> {
        self.send_chord('v')
    }
}

const WRITE_ATTEMPTS: usize = 5;
const WRITE_RETRY_DELAY: Duration = Duration::from_millis(50);
const POLL_INTERVAL: Duration = Duration::from_millis(50);
const SETTLE_BEFORE_COPY: Duration = Duration::from_millis(50);
const SETTLE_BEFORE_PASTE: Duration = Duration::from_millis(80);
const RESTORE_AFTER_COPY: Duration = Duration::from_millis(150);
const RESTORE_AFTER_PASTE: Duration = Duration::from_millis(120);

/// Combines a [`Clipboard`] and an [`InputSimulator`] into [`TextIo`].
pub struct ClipboardBridge<C, I> {
    clipboard: C,
    input: I,
    /// How long to wait for copied text to appear.
    timeout: Duration,
}

impl<C: Clipboard, I: InputSimulator> ClipboardBridge<C, I> {
    pub fn new(clipboard: C, input: I, timeout: Duration) -> Self {
        Self {
            clipboard,
            input,
            timeout,
        }
    }

    fn write_with_retry(&self, text: &str) -> Result<()> {
        let mut last_error = None;
        for attempt in 1..=WRITE_ATTEMPTS {
            match self.clipboard.write_text(text) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::debug!(attempt, error = %e, "clipboard write failed");
                    last_error = Some(e);
                }
            }
            if attempt < WRITE_ATTEMPTS {
                thread::sleep(WRITE_RETRY_DELAY);
            }
        }
        Err(last_error.unwrap_or_else(|| StpError::clipboard("failed to write clipboard")))
    }

    fn restore(&self, original: &str, after: Duration) {
        thread::sleep(after);
        if let Err(e) = self.write_with_retry(original) {
            tracing::warn!(error = %e, "failed to restore clipboard");
        }
    }

    fn wait_for_copied_text(&self) -> Result<String> {
        let deadline = Instant::now() + self.timeout;
        loop {
            thread::sleep(POLL_INTERVAL);
            if let Ok(text) = self.clipboard.read_text() {
                if !text.trim().is_empty() {
                    return Ok(text);
                }
            }
            if Instant::now() >= deadline {
                return Err(StpError::clipboard(format!(
                    "timeout waiting for clipboard after copy ({:?})",
                    self.timeout
                )));
            }
        }
    }

    fn copy_inner(&self) -> Result<String> {
        if let Err(e) = self.write_with_retry("") {
            tracing::debug!(error = %e, "could not clear clipboard before copy");
        }
        thread::sleep(SETTLE_BEFORE_COPY);
        self.input.copy()?;
        self.wait_for_copied_text()
    }

    fn paste_inner(&self, text: &str) -> Result<()> {
        self.write_with_retry(text)?;
        thread::sleep(SETTLE_BEFORE_PASTE);
        self.input.paste()
    }
}

impl<C: Clipboard, I: InputSimulator> TextIo for ClipboardBridge<C, I> {
    fn copy_selected(&self) -> Result<String> {
        let original = self.clipboard.read_text().unwrap_or_default();
        let result = self.copy_inner();
        self.restore(&original, RESTORE_AFTER_COPY);
        result
    }

    fn paste_text(&self, text: &str) -> Result<()> {
        let original = self.clipboard.read_text().unwrap_or_default();
        let result = self.paste_inner(text);
        self.restore(&original, RESTORE_AFTER_PASTE);
        result
    }
}
