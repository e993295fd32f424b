use anyhow::Result;
use selection_text_prompter::config::{parse_duration, Config, ConfigSource, TaskEntry};
use selection_text_prompter::dispatch::TransportOptions;
use selection_text_prompter::orchestrator::REQUEST_FAILED_PLACEHOLDER;
use selection_text_prompter::{
    HttpTransport, OrchestratorSettings, StpError, TaskOrchestrator, TextIo,
};
use serde_json::json;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::NamedTempFile;

#[test]
fn test_translation_config() {
    let json = r#"
    {
        "api_endpoint": "https://api.example.com/v1/chat/completions",
        "token": "sk-test",
        "model": "gpt-4o-mini",
        "temperature": 0.3,
        "max_tokens": 512,
        "extra_config": "{\"verbosity\":\"low\"}",
        "request_timeout": "45s",
        "max_retry": 5,
        "retry_base_delay": "250ms",
        "stop_task_hotkey": "ctrl+f12",
        "tasks": [
            {
                "prompt": "Translate the following text into English:",
                "hotkey": "ctrl+f1"
            },
            {
                "prompt": "Extract keywords:",
                "hotkey": "alt+numpad3",
                "extra_config": "{\"APIEndpoint\":\"https://example/api\",\"max_tokens\":2000}"
            }
        ]
    }
    "#;

    let config: Config = serde_json::from_str(json).unwrap();

    assert_eq!(config.model, "gpt-4o-mini");
    assert_eq!(config.max_tokens, 512);
    assert_eq!(config.request_timeout, Duration::from_secs(45));
    assert_eq!(config.max_retry, 5);
    assert_eq!(config.retry_base_delay, Duration::from_millis(250));
    assert_eq!(config.stop_task_hotkey, "ctrl+f12");
    assert_eq!(config.tasks.len(), 2);
    assert_eq!(config.tasks[1].hotkey, "alt+numpad3");
    assert_eq!(
        config.eligible_hotkeys(),
        vec![(1, "ctrl+f1".to_string()), (2, "alt+numpad3".to_string())]
    );

    assert!(config.validate().is_ok());
}

#[test]
fn test_default_values() {
    let json = r#"
    {
        "api_endpoint": "https://minimal"
    }
    "#;

    let config: Config = serde_json::from_str(json).unwrap();
    assert_eq!(config.api_endpoint, "https://minimal");
    assert_eq!(config.text_path, "choices[0].message.content"); // default
    assert_eq!(config.temperature, 0.0); // default
    assert_eq!(config.max_retry, 3); // default
    assert_eq!(config.request_timeout, Duration::from_secs(30)); // default
    assert_eq!(config.clipboard_timeout, Duration::from_millis(1000)); // default
    assert!(config.enable_http2); // default true
    assert!(config.verify_ssl); // default true
    assert!(!config.hotkey_hook); // default false
    assert!(!config.request_failed_notification); // default false
    assert_eq!(config.tasks.len(), 10); // default task slots

    // Valid, but nothing to register until prompts are filled in
    assert!(config.validate().is_ok());
    assert!(config.eligible_hotkeys().is_empty());
}

#[test]
fn test_config_file_operations() -> Result<()> {
    let mut temp_file = NamedTempFile::new()?;

    let json_content = r#"
    {
        "api_endpoint": "https://a",
        "request_failed_notification": false,
        "stop_task_hotkey": "ctrl+f12",
        "tasks": [{"prompt": "Summarize:", "hotkey": "ctrl+shift+s"}]
    }
    "#;
    temp_file.write_all(json_content.as_bytes())?;

    let config = Config::from_file(temp_file.path().to_str().unwrap())?;

    assert_eq!(config.api_endpoint, "https://a");
    assert_eq!(config.stop_task_hotkey, "ctrl+f12");
    assert_eq!(config.tasks[0].prompt, "Summarize:");
    assert!(config.validate().is_ok());

    Ok(())
}

#[test]
fn test_missing_and_malformed_files() -> Result<()> {
    let err = Config::from_file("/definitely/not/here/config.json").unwrap_err();
    assert!(matches!(err, StpError::ConfigLoad { .. }));

    let mut temp_file = NamedTempFile::new()?;
    temp_file.write_all(b"{ \"max_retry\": ")?;
    let err = Config::from_file(temp_file.path().to_str().unwrap()).unwrap_err();
    assert!(matches!(err, StpError::ConfigLoad { .. }));

    let mut temp_file = NamedTempFile::new()?;
    temp_file.write_all(br#"{ "request_timeout": "soon" }"#)?;
    assert!(Config::from_file(temp_file.path().to_str().unwrap()).is_err());

    Ok(())
}

#[test]
fn test_duration_parsing_edge_cases() {
    // Valid cases
    assert_eq!(parse_duration("0ms").unwrap(), Duration::from_millis(0));
    assert_eq!(parse_duration("1000").unwrap(), Duration::from_millis(1000));
    assert_eq!(parse_duration("5S").unwrap(), Duration::from_secs(5)); // Case insensitive
    assert_eq!(parse_duration(" 2m ").unwrap(), Duration::from_secs(120)); // Whitespace

    // Invalid cases
    assert!(parse_duration("").is_err());
    assert!(parse_duration("abc").is_err());
    assert!(parse_duration("1000x").is_err());
    assert!(parse_duration("-1000ms").is_err());
}

#[test]
fn test_config_validation_errors() {
    let mut config = Config {
        max_retry: 0,
        tasks: vec![TaskEntry {
            prompt: "Translate:".to_string(),
            hotkey: "ctrl+f1".to_string(),
            extra_config: String::new(),
        }],
        ..Config::default()
    };

    // Zero attempts
    assert!(config.validate().is_err());

    // Global extra config must be an object
    config.max_retry = 1;
    config.extra_config = "not json".to_string();
    assert!(config.validate().is_err());

    // Unknown key name in an eligible task
    config.extra_config = String::new();
    config.tasks[0].hotkey = "ctrl+hyper".to_string();
    assert!(config.validate().is_err());

    // Unknown modifier in the stop hotkey
    config.tasks[0].hotkey = "ctrl+f1".to_string();
    config.stop_task_hotkey = "hyper+q".to_string();
    assert!(config.validate().is_err());

    config.stop_task_hotkey = "alt+q".to_string();
    assert!(config.validate().is_ok());
}

#[test]
fn test_config_save_load_roundtrip() -> Result<()> {
    let temp_dir = tempfile::tempdir()?;
    let config_path = temp_dir.path().join("test_config.json");

    let original = Config {
        api_endpoint: "https://api.example.com".to_string(),
        model: "gpt-test".to_string(),
        temperature: 0.7,
        request_timeout: Duration::from_secs(90),
        retry_base_delay: Duration::from_millis(1500),
        verify_ssl: false,
        hotkey_hook: true,
        stop_task_hotkey: "ctrl+shift+x".to_string(),
        tasks: vec![TaskEntry {
            prompt: "Fix grammar:".to_string(),
            hotkey: "ctrl+f2".to_string(),
            extra_config: r#"{"verbosity":""}"#.to_string(),
        }],
        ..Config::default()
    };

    original.save_to_file(config_path.to_str().unwrap())?;

    let raw: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&config_path)?)?;
    assert_eq!(raw["request_timeout"], "90s");
    assert_eq!(raw["retry_base_delay"], "1500ms");

    let loaded = Config::from_file(config_path.to_str().unwrap())?;
    assert_eq!(loaded, original);

    Ok(())
}

#[test]
fn test_load_or_create_writes_defaults() -> Result<()> {
    let temp_dir = tempfile::tempdir()?;
    let default_path = temp_dir.path().join("config.json");
    let default_path = default_path.to_str().unwrap();

    // With overrides and no file, defaults are used and nothing is written
    let source = Config::load_or_create_at(None, default_path, true)?;
    assert!(matches!(source, ConfigSource::Defaults(_)));
    assert!(!std::path::Path::new(default_path).exists());

    // Without overrides a default file is created
    let source = Config::load_or_create_at(None, default_path, false)?;
    assert!(matches!(source, ConfigSource::Created { .. }));
    assert_eq!(Config::from_file(default_path)?, Config::default());

    // Next run reads it
    let source = Config::load_or_create_at(None, default_path, false)?;
    assert!(matches!(source, ConfigSource::File { .. }));

    // An explicit path has to exist
    let missing = temp_dir.path().join("missing.json");
    assert!(Config::load_or_create_at(Some(missing.to_str().unwrap()), default_path, false).is_err());

    Ok(())
}

// Error type tests

#[test]
fn test_error_types() {
    let err = StpError::invalid_hotkey("ctrl+xyz", "unsupported key 'xyz'");
    assert!(err.to_string().contains("ctrl+xyz"));

    let err = StpError::config_load("config.json", "expected value");
    assert!(err.to_string().contains("config.json"));

    let err = StpError::config_validation("missing field");
    assert!(err.to_string().contains("missing field"));
}

// End-to-end: hotkey press to pasted text through a real HTTP transport

#[derive(Default)]
struct RecordingTextIo {
    selection: String,
    pasted: Mutex<Vec<String>>,
}

impl TextIo for RecordingTextIo {
    fn copy_selected(&self) -> selection_text_prompter::Result<String> {
        Ok(self.selection.clone())
    }

    fn paste_text(&self, text: &str) -> selection_text_prompter::Result<()> {
        self.pasted.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

async fn wait_for_paste(io: &RecordingTextIo) -> Vec<String> {
    for _ in 0..200 {
        let pasted = io.pasted.lock().unwrap().clone();
        if !pasted.is_empty() {
            return pasted;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Vec::new()
}

#[tokio::test]
async fn test_task_round_trip_against_server() -> Result<()> {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/chat/completions")
        .match_header("authorization", "Bearer sk-test")
        .match_body(mockito::Matcher::PartialJson(json!({
            "model": "gpt-test",
            "messages": [
                {"role": "developer", "content": "Translate into English:"},
                {"role": "user", "content": "Bonjour"}
            ],
            "verbosity": "low"
        })))
        .with_status(200)
        .with_body(r#"{"choices":[{"message":{"content":"Hello"}}]}"#)
        .create_async()
        .await;

    let config = Config {
        api_endpoint: format!("{}/v1/chat/completions", server.url()),
        token: "sk-test".to_string(),
        model: "gpt-test".to_string(),
        extra_config: r#"{"verbosity":"high"}"#.to_string(),
        tasks: vec![TaskEntry {
            prompt: "Translate into English:".to_string(),
            hotkey: "ctrl+f1".to_string(),
            extra_config: r#"{"verbosity":"low"}"#.to_string(),
        }],
        ..Config::default()
    };
    config.validate()?;

    let io = Arc::new(RecordingTextIo {
        selection: "Bonjour".to_string(),
        ..RecordingTextIo::default()
    });
    let transport = Arc::new(HttpTransport::new(&config.transport_options())?);
    let orchestrator =
        TaskOrchestrator::new(OrchestratorSettings::from_config(&config)?, transport, io.clone());
    orchestrator.start();

    orchestrator.enqueue(1);
    assert_eq!(wait_for_paste(&io).await, vec!["Hello".to_string()]);
    mock.assert_async().await;

    orchestrator.close().await;
    Ok(())
}

#[tokio::test]
async fn test_failed_request_pastes_placeholder() -> Result<()> {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/")
        .with_status(500)
        .with_body("boom")
        .expect(2)
        .create_async()
        .await;

    let config = Config {
        api_endpoint: format!("{}/", server.url()),
        max_retry: 2,
        retry_base_delay: Duration::from_millis(10),
        request_failed_notification: true,
        tasks: vec![TaskEntry {
            prompt: "Summarize:".to_string(),
            hotkey: "ctrl+f1".to_string(),
            extra_config: String::new(),
        }],
        ..Config::default()
    };

    let io = Arc::new(RecordingTextIo {
        selection: "long text".to_string(),
        ..RecordingTextIo::default()
    });
    let transport = Arc::new(HttpTransport::new(&TransportOptions::default())?);
    let orchestrator =
        TaskOrchestrator::new(OrchestratorSettings::from_config(&config)?, transport, io.clone());
    orchestrator.start();

    orchestrator.enqueue(1);
    assert_eq!(
        wait_for_paste(&io).await,
        vec![REQUEST_FAILED_PLACEHOLDER.to_string()]
    );
    mock.assert_async().await;

    orchestrator.close().await;
    Ok(())
}
