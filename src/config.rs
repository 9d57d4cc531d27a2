use std::{fs::File, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{channel::OpenOptions, endpoint::Endpoint, error::ConfigError, message::Message};

/// Settings for the hello-world client, usually read from a YAML file.
///
/// ```yaml
/// endpoint: tcp://localhost:5556
/// requests: 10
/// payload: Hello
/// receive_timeout_ms: 2500
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    pub endpoint: Endpoint,
    pub requests: usize,
    pub payload: String,
    pub receive_timeout_ms: Option<u64>,
    pub connect_timeout_ms: Option<u64>,
    pub linger_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            endpoint: Endpoint::tcp("localhost", 5556),
            requests: 10,
            payload: "Hello".to_owned(),
            receive_timeout_ms: None,
            connect_timeout_ms: None,
            linger_ms: 0,
        }
    }
}

impl ClientConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config: ClientConfig = serde_yaml::from_reader(File::open(path)?)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: ClientConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.requests == 0 {
            return Err(ConfigError::Invalid("requests must be at least 1".to_owned()));
        }
        Ok(())
    }

    pub fn open_options(&self) -> OpenOptions {
        OpenOptions::new(self.endpoint.clone())
            .receive_timeout(self.receive_timeout_ms.map(Duration::from_millis))
            .connect_timeout(self.connect_timeout_ms.map(Duration::from_millis))
            .linger(Duration::from_millis(self.linger_ms))
    }

    /// Payload of the `index`-th request, e.g. `Hello-3`.
    pub fn payload_for(&self, index: usize) -> Message {
        Message::from(format!("{}-{}", self.payload, index))
    }
}

#[test]
fn test_defaults() {
    let config = ClientConfig::from_yaml_str("{}").unwrap();
    assert_eq!(config, ClientConfig::default());
    assert_eq!(config.endpoint.to_string(), "tcp://localhost:5556");
    assert_eq!(config.payload_for(0).as_str(), Some("Hello-0"));
}

#[test]
fn test_parse_full() {
    let config = ClientConfig::from_yaml_str(
        "endpoint: ipc:///tmp/hello.sock\nrequests: 3\npayload: Ping\nreceive_timeout_ms: 250\nconnect_timeout_ms: 1000\nlinger_ms: 5\n",
    )
    .unwrap();
    assert_eq!(config.endpoint.to_string(), "ipc:///tmp/hello.sock");
    assert_eq!(config.requests, 3);
    assert_eq!(config.payload_for(2).as_str(), Some("Ping-2"));
    assert_eq!(config.receive_timeout_ms, Some(250));
    assert_eq!(config.open_options().endpoint(), &config.endpoint);
}

#[test]
fn test_rejects_bad_input() {
    assert!(matches!(
        ClientConfig::from_yaml_str("endpoint: tcp://localhost\n"),
        Err(ConfigError::Parse(_))
    ));
    assert!(matches!(
        ClientConfig::from_yaml_str("endpoint: tcp://localhost:5556\ncolour: blue\n"),
        Err(ConfigError::Parse(_))
    ));
    assert!(matches!(
        ClientConfig::from_yaml_str("requests: 0\n"),
        Err(ConfigError::Invalid(_))
    ));
}

#[test]
fn test_load_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("client.yaml");
    std::fs::write(&path, "endpoint: tcp://127.0.0.1:1234\nrequests: 2\n").unwrap();
    let config = ClientConfig::load(&path).unwrap();
    assert_eq!(config.endpoint, Endpoint::tcp("127.0.0.1", 1234));
    assert_eq!(config.requests, 2);

    assert!(matches!(
        ClientConfig::load(dir.path().join("missing.yaml")),
        Err(ConfigError::Io(_))
    ));
}
