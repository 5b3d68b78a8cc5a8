//! Configuration File Tests
//!
//! Loads YAML configuration from disk, including environment variable
//! expansion and validation failures.

#[cfg(test)]
mod tests {
    use serial_test::serial;
    use std::io::Write;
    use streamput::backend::credentials::Credentials;
    use streamput::config::{Config, ConfigError};
    use tempfile::NamedTempFile;

    fn write_config(yaml: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_load_full_config() {
        let file = write_config(
            r#"
upload:
  part_size: 8388608
  parallelism: 8
  max_attempts: 3
  progress_callbacks: 10
  poll_interval_ms: 250
  replace: true
  secure: false
s3:
  region: "eu-west-1"
  endpoint: "localhost:9000"
  force_path_style: true
"#,
        );

        let config = Config::load(file.path()).unwrap();

        assert_eq!(config.upload.part_size, 8 * 1024 * 1024);
        assert_eq!(config.upload.parallelism, 8);
        assert_eq!(config.upload.max_attempts, 3);
        assert_eq!(config.upload.progress_callbacks, 10);
        assert_eq!(config.upload.poll_interval().as_millis(), 250);
        assert!(config.upload.replace);
        assert!(!config.upload.secure);
        assert_eq!(config.s3.region, "eu-west-1");
        assert_eq!(config.s3.endpoint.as_deref(), Some("localhost:9000"));
        assert!(config.s3.force_path_style);
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let file = write_config("upload:\n  parallelism: 2\n");

        let config = Config::load(file.path()).unwrap();

        assert_eq!(config.upload.parallelism, 2);
        assert_eq!(config.upload.part_size, 5 * 1024 * 1024);
        assert_eq!(config.upload.max_attempts, 5);
        assert!(!config.upload.replace);
        assert!(config.upload.secure);
        assert_eq!(config.s3.region, "us-east-1");
    }

    #[test]
    #[serial]
    fn test_credentials_from_expanded_config() {
        std::env::set_var("STREAMPUT_IT_ACCESS", "file-access");
        std::env::set_var("STREAMPUT_IT_SECRET", "file-secret");
        let file = write_config(
            "s3:\n  access_key: \"${STREAMPUT_IT_ACCESS}\"\n  secret_key: \"${STREAMPUT_IT_SECRET}\"\n",
        );

        let config = Config::load(file.path()).unwrap();
        let credentials = Credentials::resolve(None, None, &config.s3).unwrap();

        assert_eq!(credentials.access_key_id(), "file-access");
        assert_eq!(credentials.secret_access_key(), "file-secret");

        std::env::remove_var("STREAMPUT_IT_ACCESS");
        std::env::remove_var("STREAMPUT_IT_SECRET");
    }

    #[test]
    #[serial]
    fn test_default_value_used_when_variable_unset() {
        std::env::remove_var("STREAMPUT_IT_ENDPOINT");
        let file = write_config("s3:\n  endpoint: \"${STREAMPUT_IT_ENDPOINT:-http://minio:9000}\"\n");

        let config = Config::load(file.path()).unwrap();

        assert_eq!(config.s3.endpoint.as_deref(), Some("http://minio:9000"));
    }

    #[test]
    fn test_missing_file() {
        let result = Config::load("/nonexistent/streamput.yaml");
        assert!(matches!(result, Err(ConfigError::IoError(_))));
    }

    #[test]
    fn test_malformed_yaml() {
        let file = write_config("upload: [not, a, map\n");
        let result = Config::load(file.path());
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_invalid_values() {
        let file = write_config("upload:\n  part_size: 0\n");
        let result = Config::load(file.path());
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }
}
