//! Worker types.

use crate::ids::WorkerId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A build worker registered from static configuration.
///
/// Capacity is always one job: build stages share a working directory and
/// must not interleave.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Worker {
    pub id: WorkerId,
    pub pool: String,
    #[serde(default)]
    pub endpoint: Option<WorkerEndpoint>,
    /// Free-form properties, e.g. `compiler=gcc`, `os=ubuntu`.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    /// Hardware capability tags, e.g. `gen9`, `avx512`.
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Remote endpoint reached over ssh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerEndpoint {
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    #[serde(default)]
    pub user: Option<String>,
    /// Name of the environment variable holding the identity file path.
    #[serde(default)]
    pub identity_env: Option<String>,
}

fn default_ssh_port() -> u16 {
    22
}

impl WorkerEndpoint {
    /// `user@host` or just `host`.
    pub fn destination(&self) -> String {
        match &self.user {
            Some(user) => format!("{}@{}", user, self.host),
            None => self.host.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Free,
    Busy,
}

impl WorkerStatus {
    pub fn is_available(&self) -> bool {
        matches!(self, WorkerStatus::Free)
    }
}

impl Worker {
    pub fn new(name: impl Into<String>, pool: impl Into<String>) -> Self {
        Self {
            id: WorkerId::new(name),
            pool: pool.into(),
            endpoint: None,
            properties: BTreeMap::new(),
            tags: Vec::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn is_remote(&self) -> bool {
        self.endpoint.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destination() {
        let endpoint = WorkerEndpoint {
            host: "10.0.0.5".into(),
            port: 22,
            user: Some("ci".into()),
            identity_env: None,
        };
        assert_eq!(endpoint.destination(), "ci@10.0.0.5");
    }

    #[test]
    fn test_worker_from_yaml() {
        let worker: Worker = serde_yaml::from_str(
            "id: gcc-01\npool: linux\nproperties:\n  compiler: gcc\n",
        )
        .unwrap();
        assert_eq!(worker.property("compiler"), Some("gcc"));
        assert!(!worker.is_remote());
    }
}
