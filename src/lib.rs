//! # Selection Text Prompter
//!
//! Global hotkeys that send the currently selected text, together with a
//! preset instruction, to a text-generation endpoint and replace the
//! selection with the answer.
//!
//! ## Features
//!
//! - Any number of prompt/hotkey pairs, plus an optional stop hotkey
//! - Exclusive hotkey registration or a low-level keyboard hook (Windows)
//! - One job at a time; extra presses queue up to a limit and are dropped beyond it
//! - Per-task request fields, endpoint, token and response path
//! - Retry with doubling backoff, cancellable at any point
//! - JSON configuration file support
//!
//! ## Example
//!
//! ```no_run
//! use selection_text_prompter::extract::extract_text;
//! use selection_text_prompter::payload::{build_payload, PayloadInput};
//!
//! let payload = build_payload(PayloadInput {
//!     model: "gpt-4o-mini",
//!     prompt: "Translate into English:",
//!     user_text: "Bonjour",
//!     ..PayloadInput::default()
//! });
//! assert_eq!(payload["messages"][1]["content"], "Bonjour");
//!
//! let body = r#"{"choices":[{"message":{"content":"Hello"}}]}"#;
//! assert_eq!(extract_text(body, "", "choices[0].message.content"), "Hello");
//! ```
//!
//! ## Configuration
//!
//! ```json
//! {
//!   "api_endpoint": "https://api.example.com/v1/chat/completions",
//!   "token": "sk-...",
//!   "model": "gpt-4o-mini",
//!   "retry_base_delay": "500ms",
//!   "stop_task_hotkey": "ctrl+f12",
//!   "tasks": [
//!     {"prompt": "Translate into English:", "hotkey": "ctrl+f1"},
//!     {"prompt": "Fix grammar:", "hotkey": "ctrl+f2", "extra_config": "{\"temperature\":0.2}"}
//!   ]
//! }
//! ```

pub mod clipboard;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod extract;
pub mod hotkey;
pub mod orchestrator;
pub mod payload;

pub use clipboard::{ClipboardBridge, SystemClipboard, SystemInput, TextIo};
pub use config::Config;
pub use dispatch::{HttpTransport, RetryPolicy, Transport};
pub use error::{DispatchError, Result, StpError};
pub use hotkey::{HotkeyEvent, HotkeyService};
pub use orchestrator::{OrchestratorSettings, TaskOrchestrator};
