use super::*;
use std::collections::HashMap;
use tempfile::tempdir;

#[test]
fn test_logger_creation() {
    let temp_dir = tempdir().unwrap();
    let log_path = temp_dir.path().join("test.md");

    let logger = Logger::new(Some(&log_path), Some("debug"));
    assert!(logger.is_ok());

    let logger = logger.unwrap();
    assert_eq!(logger.log_file(), &log_path);
    assert_eq!(logger.log_level(), "DEBUG");
}

#[test]
fn test_log_file_creation() {
    let temp_dir = tempdir().unwrap();
    let log_path = temp_dir.path().join("logs").join("test.md");

    let _logger = Logger::new(Some(&log_path), None).unwrap();
    assert!(log_path.exists());

    let content = std::fs::read_to_string(&log_path).unwrap();
    assert!(content.contains("# Orchestration Log"));
    assert!(content.contains("Log started:"));
}

#[test]
fn test_log_operations() {
    let temp_dir = tempdir().unwrap();
    let log_path = temp_dir.path().join("test.md");
    let logger = Logger::new(Some(&log_path), None).unwrap();

    let mut config = HashMap::new();
    config.insert("max_turns".to_string(), serde_json::json!(3));

    assert!(logger.log_session_start("prose-analysis", &config).is_ok());
    assert!(logger
        .log_resource_request("guide", &["pacing".to_string(), "dialogue".to_string()])
        .is_ok());
    assert!(logger.log_turn_ceiling(3).is_ok());
    assert!(logger.log_completion("finished after 3 turns").is_ok());

    let content = std::fs::read_to_string(&log_path).unwrap();
    assert!(content.contains("Session Started"));
    assert!(content.contains("prose-analysis"));
    assert!(content.contains("**Ids:** pacing, dialogue"));
    assert!(content.contains("Turn Ceiling Reached"));
    assert!(content.contains("Session Completed"));
}

#[test]
fn test_log_model_call_debug_controls_messages() {
    let temp_dir = tempdir().unwrap();
    let messages = vec![
        ChatMessage::system("You are a developmental editor"),
        ChatMessage::user("Review chapter one"),
    ];

    let info_path = temp_dir.path().join("info.md");
    let info_logger = Logger::new(Some(&info_path), None).unwrap();
    info_logger
        .log_model_call(1, &messages, "Looks tight.", Some("stop"))
        .unwrap();
    let info_content = std::fs::read_to_string(&info_path).unwrap();
    assert!(info_content.contains("**Messages:** 2 messages"));
    assert!(!info_content.contains("Review chapter one"));
    assert!(info_content.contains("Looks tight."));

    let debug_path = temp_dir.path().join("debug.md");
    let debug_logger = Logger::new(Some(&debug_path), Some("DEBUG")).unwrap();
    debug_logger
        .log_model_call(2, &messages, "Looks tight.", None)
        .unwrap();
    let debug_content = std::fs::read_to_string(&debug_path).unwrap();
    assert!(debug_content.contains("Review chapter one"));
    assert!(debug_content.contains("**Finish reason:** unreported"));
}

#[test]
fn test_log_error_with_context() {
    let temp_dir = tempdir().unwrap();
    let log_path = temp_dir.path().join("test.md");
    let logger = Logger::new(Some(&log_path), None).unwrap();

    let mut context = HashMap::new();
    context.insert("turn".to_string(), serde_json::json!(2));
    logger.log_error("model call failed", Some(&context)).unwrap();

    let content = std::fs::read_to_string(&log_path).unwrap();
    assert!(content.contains("**Error:** model call failed"));
    assert!(content.contains("\"turn\": 2"));
}
