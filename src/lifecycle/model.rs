//! Environment and instance records.

use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use crate::stack::PortMap;

/// Which definition drives deployment of an environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvKind {
    /// One container from `base_image`.
    SingleImage,
    /// A compose stack from `base_compose`.
    Composite,
}

/// Free-form classification tags of an environment, keyed the way catalog
/// files spell them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Degree {
    /// Vulnerability classes, e.g. `RCE`, `SQLi`.
    #[serde(rename = "HoleType", skip_serializing_if = "Vec::is_empty")]
    pub hole_types: Vec<String>,
    /// Development classification, e.g. `framework`.
    #[serde(rename = "devClassify", skip_serializing_if = "Vec::is_empty")]
    pub dev_classify: Vec<String>,
    /// Databases involved.
    #[serde(rename = "devDatabase", skip_serializing_if = "Vec::is_empty")]
    pub dev_database: Vec<String>,
    /// Implementation languages.
    #[serde(rename = "devLanguage", skip_serializing_if = "Vec::is_empty")]
    pub dev_language: Vec<String>,
}

impl Degree {
    /// The JSON text persisted alongside an environment.
    ///
    /// # Errors
    ///
    /// Returns the serializer error; plain string lists never produce one in
    /// practice.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// A vulnerable environment definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VulEnv {
    /// Store-assigned id.
    pub id: u64,
    /// Globally unique name.
    pub env_name: String,
    /// Description.
    pub env_desc: String,
    /// Deployment kind.
    pub env_kind: EnvKind,
    /// Image for single-image environments.
    pub base_image: Option<String>,
    /// Compose file for composite environments.
    pub base_compose: Option<Utf8PathBuf>,
    /// Classification tags.
    pub degree: Degree,
    /// Difficulty rank.
    pub rank: f64,
    /// Provenance, e.g. the catalog it came from.
    pub source: String,
    /// Access threshold; lower values are more privileged.
    pub open_level: i32,
    /// Price of one instance.
    pub cost: f64,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

impl VulEnv {
    /// Whether a requester at `access_level` may use the environment.
    #[must_use]
    pub const fn is_open_to(&self, access_level: i32) -> bool {
        self.open_level >= access_level
    }
}

/// Input for registering a new environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEnv {
    /// Globally unique name.
    pub env_name: String,
    /// Description.
    #[serde(default)]
    pub env_desc: String,
    /// Deployment kind.
    pub env_kind: EnvKind,
    /// Image for single-image environments.
    #[serde(default)]
    pub base_image: Option<String>,
    /// Compose file for composite environments.
    #[serde(default)]
    pub base_compose: Option<Utf8PathBuf>,
    /// Classification tags.
    #[serde(default)]
    pub degree: Degree,
    /// Difficulty rank.
    #[serde(default)]
    pub rank: f64,
    /// Provenance.
    #[serde(default)]
    pub source: String,
    /// Access threshold.
    #[serde(default)]
    pub open_level: i32,
    /// Price of one instance.
    #[serde(default)]
    pub cost: f64,
}

/// Instance state, persisted as its integer code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum InstanceStatus {
    /// Recorded but not deployed.
    NotCreated = 0,
    /// Deployed and reachable.
    Running = 1,
    /// Torn down before expiry.
    Stopped = 2,
    /// Expired and reclaimed.
    Completed = 3,
}

impl From<InstanceStatus> for u8 {
    fn from(status: InstanceStatus) -> Self {
        status as Self
    }
}

impl TryFrom<u8> for InstanceStatus {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::NotCreated),
            1 => Ok(Self::Running),
            2 => Ok(Self::Stopped),
            3 => Ok(Self::Completed),
            other => Err(format!("unknown instance status {other}")),
        }
    }
}

/// What an instance runs on the engine: exactly one container or one
/// stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeploymentTarget {
    /// A single container.
    Container {
        /// Container id.
        id: String,
    },
    /// A compose stack.
    Stack {
        /// Stack (project) name.
        name: String,
    },
}

impl std::fmt::Display for DeploymentTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Container { id } => write!(f, "container {id}"),
            Self::Stack { name } => write!(f, "stack {name}"),
        }
    }
}

/// A running (or finished) copy of an environment for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VulInstance {
    /// Store-assigned id.
    pub id: u64,
    /// Environment the instance was created from.
    pub env_id: u64,
    /// Owner.
    pub user_id: u64,
    /// Deployment time.
    pub start_time: DateTime<Utc>,
    /// Time after which the reaper removes the instance.
    pub expire_time: DateTime<Utc>,
    /// When the instance was stopped, if it was.
    pub end_time: Option<DateTime<Utc>>,
    /// Current state.
    pub status: InstanceStatus,
    /// Container port to host port.
    pub ports: PortMap,
    /// Engine resources backing the instance.
    pub target: DeploymentTarget,
}

impl VulInstance {
    /// Whether the instance expired strictly before `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expire_time < now
    }
}

/// The identity and entitlements of the user making a request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Requester {
    /// User id.
    pub user_id: u64,
    /// Access level; compared against environment open levels.
    pub access_level: i32,
    /// Available balance.
    pub balance: f64,
}
