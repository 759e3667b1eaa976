use super::*;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

#[cfg(test)]
mod integration_tests {
    use super::*;
    use crate::database::Metric;

    #[test]
    fn config_file_persistence() {
        let temp_dir = TempDir::new().expect("should create TempDir successfully");
        let config_path = temp_dir.path().join("config.toml");

        let original_config = Config {
            backend: Backend::Remote,
            embedding: EmbeddingConfig {
                protocol: "https".to_string(),
                host: "test-host".to_string(),
                port: 8443,
                model: "test-model".to_string(),
                batch_size: 32,
                embedding_dimension: 384,
            },
            store: StoreConfig {
                metric: Metric::Euclidean,
                vectors_path: Some(PathBuf::from("/data/vectors.bin")),
                metadata_path: None,
            },
            remote: RemoteConfig::default(),
            base_dir: temp_dir.path().to_path_buf(),
        };

        let toml_content = toml::to_string_pretty(&original_config)
            .expect("config should convert to toml string successfully");
        fs::write(&config_path, toml_content).expect("should write to config_path successfully");

        let loaded_config = Config::load_from(&config_path).expect("should load config");

        assert_eq!(original_config, loaded_config);
    }

    #[test]
    fn invalid_toml_handling() {
        let invalid_toml = r#"
            [embedding
            host = "localhost"
            port = "invalid_port"
        "#;

        let result: Result<Config, toml::de::Error> = toml::from_str(invalid_toml);
        assert!(result.is_err());
    }

    #[test]
    fn unknown_metric_is_rejected() {
        let result: Result<Config, toml::de::Error> = toml::from_str(
            r#"
                [store]
                metric = "manhattan"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn config_validation_edge_cases() {
        let mut config = Config::default();
        config.embedding.host = String::new();

        let result = config.validate();
        assert!(result.is_err()); // Empty host should be invalid
    }

    #[test]
    fn url_generation_with_different_hosts() {
        let configs = vec![
            ("http", "localhost", 11434, "http://localhost:11434/"),
            ("http", "127.0.0.1", 8080, "http://127.0.0.1:8080/"),
            (
                "https",
                "secure.example.com",
                443,
                "https://secure.example.com/",
            ),
        ];

        for (protocol, host, port, expected_url) in configs {
            let mut config = Config::default();
            config.remote.protocol = protocol.to_string();
            config.remote.host = host.to_string();
            config.remote.port = port;

            let url = config.remote_url().expect("remote_url is ok");
            assert_eq!(url.as_str(), expected_url);
        }
    }

    #[test]
    fn show_config_includes_location() {
        let config = Config {
            base_dir: PathBuf::from("/tmp/doctree"),
            ..Config::default()
        };

        let rendered = show_config(&config).expect("should render config");
        assert!(rendered.starts_with("# /tmp/doctree/config.toml"));
        assert!(rendered.contains("[embedding]"));
        assert!(rendered.contains("backend = \"local\""));
    }

    #[test]
    fn error_display_messages() {
        let errors = vec![
            ConfigError::InvalidProtocol("ftp".to_string()),
            ConfigError::InvalidPort(0),
            ConfigError::InvalidBatchSize(0),
            ConfigError::InvalidModel(String::new()),
            ConfigError::InvalidCollection("lower".to_string()),
            ConfigError::InvalidUrl("invalid-url".to_string()),
        ];

        for error in errors {
            let message = format!("{error}");
            assert!(message.len() > 10); // Ensure meaningful error messages
        }
    }
}
