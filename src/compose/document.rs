//! Serde model of the supported compose subset.
//!
//! Keys outside the subset are ignored. Fields that compose allows in more
//! than one shape (string or list, list or map) are untagged enums.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_yaml::Value;

#[derive(Debug, Default, Deserialize)]
pub(super) struct ComposeDocument {
    #[serde(default)]
    pub services: BTreeMap<String, ServiceDocument>,
    #[serde(default)]
    pub volumes: BTreeMap<String, Option<Value>>,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct ServiceDocument {
    pub image: Option<String>,
    pub build: Option<BuildSection>,
    #[serde(default)]
    pub ports: Vec<PortEntry>,
    #[serde(default)]
    pub volumes: Vec<VolumeEntry>,
    pub environment: Option<Environment>,
    pub command: Option<CommandLine>,
    pub entrypoint: Option<CommandLine>,
    pub working_dir: Option<String>,
    pub user: Option<Scalar>,
    pub healthcheck: Option<HealthcheckSection>,
    pub depends_on: Option<DependsOn>,
    pub deploy: Option<DeploySection>,
    pub restart: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(super) enum BuildSection {
    Context(String),
    Detailed {
        context: Option<String>,
        dockerfile: Option<String>,
    },
}

/// A string, number or boolean as YAML allows for scalar settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(super) enum Scalar {
    Text(String),
    Integer(i64),
    Float(f64),
    Flag(bool),
}

impl Scalar {
    pub fn render(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Integer(number) => number.to_string(),
            Self::Float(number) => number.to_string(),
            Self::Flag(flag) => flag.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(super) enum PortEntry {
    Short(Scalar),
    Long {
        target: u16,
        #[serde(default)]
        protocol: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(super) enum VolumeEntry {
    Short(String),
    Long {
        #[serde(rename = "type", default)]
        kind: Option<String>,
        source: Option<String>,
        target: String,
        #[serde(default)]
        read_only: bool,
    },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(super) enum Environment {
    List(Vec<String>),
    Map(BTreeMap<String, Option<Scalar>>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(super) enum CommandLine {
    Shell(String),
    Exec(Vec<String>),
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct HealthcheckSection {
    pub test: Option<CommandLine>,
    pub interval: Option<String>,
    pub timeout: Option<String>,
    pub start_period: Option<String>,
    pub retries: Option<i64>,
    #[serde(default)]
    pub disable: bool,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(super) enum DependsOn {
    List(Vec<String>),
    Map(BTreeMap<String, Value>),
}

impl DependsOn {
    pub fn names(&self) -> Vec<String> {
        match self {
            Self::List(names) => names.clone(),
            Self::Map(entries) => entries.keys().cloned().collect(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct DeploySection {
    pub resources: Option<ResourcesSection>,
    pub restart_policy: Option<RestartPolicySection>,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct ResourcesSection {
    pub limits: Option<ResourceValues>,
    pub reservations: Option<ResourceValues>,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct ResourceValues {
    pub cpus: Option<Scalar>,
    pub memory: Option<Scalar>,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct RestartPolicySection {
    pub condition: Option<String>,
    pub max_attempts: Option<i64>,
}
