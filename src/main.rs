use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use selection_text_prompter::config::{parse_duration, Config, ConfigSource};
use selection_text_prompter::hotkey::{new_service, HotkeyEvent, HotkeyStrategy};
use selection_text_prompter::{
    ClipboardBridge, HttpTransport, OrchestratorSettings, SystemClipboard, SystemInput,
    TaskOrchestrator,
};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Rewrite the selected text in any application with a global hotkey.
///
/// Prompts and hotkeys live in the configuration file (`tasks`); every other
/// setting can also be given on the command line, which takes precedence.
#[derive(Parser, Debug)]
#[command(name = "stp", version, about)]
struct Cli {
    /// JSON configuration file (defaults to ./config.json)
    #[arg(short, long)]
    config: Option<String>,

    /// Text-generation endpoint URL
    #[arg(long)]
    api_endpoint: Option<String>,

    /// Bearer token sent with every request
    #[arg(long)]
    token: Option<String>,

    #[arg(long)]
    model: Option<String>,

    #[arg(long)]
    temperature: Option<f64>,

    /// 0 leaves the field out of the request
    #[arg(long)]
    max_tokens: Option<u32>,

    /// Response path of the generated text, e.g. choices[0].message.content
    #[arg(long)]
    text_path: Option<String>,

    /// JSON object merged into every request, e.g. '{"verbosity":"low"}'
    #[arg(long)]
    extra_config: Option<String>,

    /// Per-request timeout (e.g. 30s)
    #[arg(long, value_parser = duration_arg)]
    request_timeout: Option<Duration>,

    /// Attempts per request, including the first
    #[arg(long)]
    max_retry: Option<u32>,

    /// First backoff delay; doubles after every failed attempt (e.g. 500ms)
    #[arg(long, value_parser = duration_arg)]
    retry_base_delay: Option<Duration>,

    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    enable_http2: Option<bool>,

    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    verify_ssl: Option<bool>,

    /// How long to wait for copied text (e.g. 1000ms)
    #[arg(long, value_parser = duration_arg)]
    clipboard_timeout: Option<Duration>,

    /// Paste a placeholder when a request fails or returns nothing
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    request_failed_notification: Option<bool>,

    /// Hotkey that cancels the running task and clears the queue
    #[arg(long)]
    stop_task_hotkey: Option<String>,

    /// Capture hotkeys with a low-level keyboard hook (Windows)
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    hotkey_hook: Option<bool>,

    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    debug: Option<bool>,
}

fn duration_arg(s: &str) -> std::result::Result<Duration, String> {
    parse_duration(s).map_err(|e| e.to_string())
}

impl Cli {
    /// True when any setting besides `--config` was given.
    fn has_overrides(&self) -> bool {
        self.api_endpoint.is_some()
            || self.token.is_some()
            || self.model.is_some()
            || self.temperature.is_some()
            || self.max_tokens.is_some()
            || self.text_path.is_some()
            || self.extra_config.is_some()
            || self.request_timeout.is_some()
            || self.max_retry.is_some()
            || self.retry_base_delay.is_some()
            || self.enable_http2.is_some()
            || self.verify_ssl.is_some()
            || self.clipboard_timeout.is_some()
            || self.request_failed_notification.is_some()
            || self.stop_task_hotkey.is_some()
            || self.hotkey_hook.is_some()
            || self.debug.is_some()
    }

    fn apply(&self, config: &mut Config) {
        fn set<T: Clone>(target: &mut T, value: &Option<T>) {
            if let Some(value) = value {
                *target = value.clone();
            }
        }

        set(&mut config.api_endpoint, &self.api_endpoint);
        set(&mut config.token, &self.token);
        set(&mut config.model, &self.model);
        set(&mut config.temperature, &self.temperature);
        set(&mut config.max_tokens, &self.max_tokens);
        set(&mut config.text_path, &self.text_path);
        set(&mut config.extra_config, &self.extra_config);
        set(&mut config.request_timeout, &self.request_timeout);
        set(&mut config.max_retry, &self.max_retry);
        set(&mut config.retry_base_delay, &self.retry_base_delay);
        set(&mut config.enable_http2, &self.enable_http2);
        set(&mut config.verify_ssl, &self.verify_ssl);
        set(&mut config.clipboard_timeout, &self.clipboard_timeout);
        set(
            &mut config.request_failed_notification,
            &self.request_failed_notification,
        );
        set(&mut config.stop_task_hotkey, &self.stop_task_hotkey);
        set(&mut config.hotkey_hook, &self.hotkey_hook);
        set(&mut config.debug, &self.debug);
    }
}

fn init_tracing(debug: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if debug { "debug" } else { "info" }));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match Config::load_or_create(cli.config.as_deref(), cli.has_overrides())? {
        ConfigSource::File { config, path } => {
            println!("{} {}", "Loaded configuration from".dimmed(), path);
            config
        }
        ConfigSource::Defaults(config) => config,
        ConfigSource::Created { path } => {
            println!(
                "{} {}. Edit it and run stp again.",
                "Default configuration written to".yellow(),
                path.bold()
            );
            return Ok(());
        }
    };
    cli.apply(&mut config);

    init_tracing(config.debug);
    config.validate().context("invalid configuration")?;

    let hotkeys = config.hotkey_options();
    if hotkeys.task_hotkeys.is_empty() {
        println!(
            "{}",
            "No tasks with both a prompt and a hotkey are configured; nothing to do.".yellow()
        );
        return Ok(());
    }

    let transport = Arc::new(HttpTransport::new(&config.transport_options())?);
    let text_io = Arc::new(ClipboardBridge::new(
        SystemClipboard::new()?,
        SystemInput,
        config.clipboard_timeout,
    ));
    let orchestrator = Arc::new(TaskOrchestrator::new(
        OrchestratorSettings::from_config(&config)?,
        transport,
        text_io,
    ));
    orchestrator.start();

    print_banner(&config, hotkeys.strategy);

    let mut service = new_service(hotkeys)?;
    let target = Arc::clone(&orchestrator);
    let started = service.start(Box::new(move |event| match event {
        HotkeyEvent::Task(id) => target.enqueue(id),
        HotkeyEvent::Stop => target.stop_all(),
    }));
    if let Err(e) = started {
        orchestrator.close().await;
        return Err(e).context("failed to start hotkey service");
    }

    println!(
        "{}",
        "Ready. Select text and press a hotkey. Ctrl+C to exit.".green()
    );
    shutdown_signal().await?;

    println!("{}", "Shutting down...".dimmed());
    service.close();
    orchestrator.close().await;
    Ok(())
}

fn print_banner(config: &Config, strategy: HotkeyStrategy) {
    println!("{}", "Selection Text Prompter".bold().cyan());
    println!(
        "  {} {}",
        "endpoint:".dimmed(),
        if config.api_endpoint.is_empty() {
            "(per task)".to_string()
        } else {
            config.api_endpoint.clone()
        }
    );
    println!(
        "  {} {}",
        "capture: ".dimmed(),
        match strategy {
            HotkeyStrategy::Register => "registered hotkeys",
            HotkeyStrategy::Hook => "keyboard hook",
        }
    );
    for task in config.task_definitions().iter().filter(|t| t.is_eligible()) {
        println!(
            "  {} task {}: {}",
            format!("{:<16}", task.hotkey).bold(),
            task.id,
            preview(&task.prompt, 48)
        );
    }
    if !config.stop_task_hotkey.trim().is_empty() {
        println!(
            "  {} stop",
            format!("{:<16}", config.stop_task_hotkey).bold().red()
        );
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    let line = text.trim().lines().next().unwrap_or_default();
    if line.chars().count() > max_chars {
        let cut: String = line.chars().take(max_chars).collect();
        format!("{cut}...")
    } else {
        line.to_string()
    }
}

#[cfg(unix)]
async fn shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result?,
        _ = terminate.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn shutdown_signal() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
