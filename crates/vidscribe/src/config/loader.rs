use std::path::Path;

use crate::config::schema::Config;
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../../../schema/config-v1.json");

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: Config = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

/// Checks the rules the schema cannot express.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if config.output_root.trim().is_empty() {
        return Err(ConfigError::Validation {
            message: "output_root must not be empty".to_string(),
        });
    }

    if config.worker_count == 0 {
        return Err(ConfigError::Validation {
            message: "worker_count must be at least 1".to_string(),
        });
    }

    if config.queue.max_attempts == 0 {
        return Err(ConfigError::Validation {
            message: "queue.max_attempts must be at least 1".to_string(),
        });
    }

    if config.media.default_frame_interval == 0 {
        return Err(ConfigError::Validation {
            message: "media.default_frame_interval must be greater than zero".to_string(),
        });
    }

    if config.document.captions_per_segment == 0 {
        return Err(ConfigError::Validation {
            message: "document.captions_per_segment must be at least 1".to_string(),
        });
    }

    for (name, command) in [("transcriber", &config.transcriber), ("captioner", &config.captioner)] {
        if command.program.trim().is_empty() {
            return Err(ConfigError::Validation {
                message: format!("{}.program must not be empty", name),
            });
        }
    }

    if !LOG_LEVELS.contains(&config.logging.level.to_ascii_lowercase().as_str()) {
        return Err(ConfigError::Validation {
            message: format!("Unknown log level: {}", config.logging.level),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
    {
        "version": "1.0",
        "output_root": "/srv/vidscribe/out",
        "transcriber": { "program": "/opt/models/whisper-server" },
        "captioner": { "program": "/opt/models/blip-server", "args": ["--device", "cpu"] }
    }
    "#;

    #[test]
    fn test_load_minimal_config_applies_defaults() {
        let config = load_config_from_str(MINIMAL).unwrap();
        assert_eq!(config.output_root, "/srv/vidscribe/out");
        assert_eq!(config.worker_count, 1);
        assert_eq!(config.queue.poll_interval_ms, 500);
        assert_eq!(config.queue.max_attempts, 3);
        assert_eq!(config.queue.default_timeout_secs, 3600);
        assert_eq!(config.media.ffmpeg_path, "ffmpeg");
        assert_eq!(config.media.default_frame_interval, 2);
        assert!(!config.media.keep_intermediates);
        assert_eq!(config.document.captions_per_segment, 2);
        assert_eq!(config.document.fallback_vision, "No major visual change.");
        assert_eq!(config.captioner.args, vec!["--device", "cpu"]);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_load_full_config() {
        let config_json = r#"
        {
            "version": "1.0",
            "database_path": "/var/lib/vidscribe/state.db",
            "output_root": "/out",
            "worker_count": 3,
            "queue": { "poll_interval_ms": 250, "max_attempts": 5, "default_timeout_secs": 600 },
            "media": { "ffmpeg_path": "/usr/bin/ffmpeg", "default_frame_interval": 4, "keep_intermediates": true },
            "transcriber": { "program": "whisper", "env": { "WHISPER_MODEL": "small" } },
            "captioner": { "program": "blip" },
            "document": { "captions_per_segment": 3, "fallback_vision": "-" },
            "logging": { "level": "debug", "json": true }
        }
        "#;

        let config = load_config_from_str(config_json).unwrap();
        assert_eq!(
            config.database_path(),
            Some(std::path::PathBuf::from("/var/lib/vidscribe/state.db"))
        );
        assert_eq!(config.worker_count, 3);
        assert_eq!(config.queue.poll_interval(), std::time::Duration::from_millis(250));
        assert_eq!(config.queue.default_timeout(), std::time::Duration::from_secs(600));
        assert!(config.media.keep_intermediates);
        assert_eq!(config.transcriber.env["WHISPER_MODEL"], "small");
        assert_eq!(config.document.fallback_vision, "-");
        assert!(config.logging.json);
    }

    #[test]
    fn test_missing_required_field_fails_schema() {
        let config_json = r#"{ "version": "1.0", "output_root": "/out", "transcriber": { "program": "w" } }"#;
        assert!(matches!(
            load_config_from_str(config_json),
            Err(ConfigError::SchemaValidation { .. })
        ));
    }

    #[test]
    fn test_wrong_type_fails_schema() {
        let config_json = r#"
        {
            "version": "1.0",
            "output_root": "/out",
            "worker_count": "many",
            "transcriber": { "program": "w" },
            "captioner": { "program": "c" }
        }
        "#;
        assert!(matches!(
            load_config_from_str(config_json),
            Err(ConfigError::SchemaValidation { .. })
        ));
    }

    #[test]
    fn test_unsupported_version() {
        let config_json = MINIMAL.replace("\"1.0\"", "\"2.0\"");
        assert!(matches!(
            load_config_from_str(&config_json),
            Err(ConfigError::Validation { .. })
        ));
    }

    #[test]
    fn test_zero_frame_interval_is_rejected() {
        let mut config = load_config_from_str(MINIMAL).unwrap();
        config.media.default_frame_interval = 0;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::Validation { message }) if message.contains("default_frame_interval")
        ));
    }

    #[test]
    fn test_unknown_log_level_is_rejected() {
        let mut config = load_config_from_str(MINIMAL).unwrap();
        config.logging.level = "loud".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            load_config_from_str("{ not json"),
            Err(ConfigError::ParseJson(_))
        ));
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vidscribe.json");
        std::fs::write(&path, MINIMAL).unwrap();
        assert!(load_config(&path).is_ok());

        assert!(matches!(
            load_config(dir.path().join("missing.json")),
            Err(ConfigError::ReadFile { .. })
        ));
    }
}
