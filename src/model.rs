//! Domain types shared across the scanner, fleet manager, runtime facade and
//! the realtime hub.
//!
//! A [`Project`] is one discovered compose definition file plus its derived
//! identity and metadata, independent of whether any of its containers are
//! currently running. [`Container`] records are rebuilt from daemon state on
//! every reconciliation pass and are never persisted.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};

/// Detected deployment environment of a compose file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Production,
    Unknown,
}

/// Aggregate status of a project, derived each pass from its containers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    Running,
    Stopped,
    Partial,
    Unknown,
}

/// Why a project is protected from destructive lifecycle operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtectionReason {
    CloudflareTunnel,
    UserMarked,
    AutoDetected,
}

impl fmt::Display for ProtectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProtectionReason::CloudflareTunnel => "cloudflare_tunnel",
            ProtectionReason::UserMarked => "user_marked",
            ProtectionReason::AutoDetected => "auto_detected",
        };
        f.write_str(s)
    }
}

/// One discovered compose project.
///
/// The `id` is derived from the definition file's absolute path and is stable
/// across content edits. Every refresh replaces the instance wholesale while
/// keeping the same id.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub path: PathBuf,
    pub compose_file: String,
    pub compose_file_path: PathBuf,
    pub environment: Environment,
    pub status: ProjectStatus,
    pub protected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protection_reason: Option<ProtectionReason>,
    pub hidden: bool,
    pub containers: Vec<Container>,
    pub services: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A live container owned by exactly one project (grouped by the compose
/// project label).
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Container {
    pub id: String,
    pub name: String,
    pub service_name: String,
    pub image: String,
    pub status: String,
    pub state: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub health: String,
    pub ports: Vec<PortMapping>,
    pub labels: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<ContainerStats>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PortMapping {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub host_ip: String,
    pub host_port: u16,
    pub container_port: u16,
    pub protocol: String,
}

/// Derived per-container resource metrics, computed from deltas between two
/// raw cumulative samples.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ContainerStats {
    pub cpu_percent: f64,
    pub memory_usage: u64,
    pub memory_limit: u64,
    pub memory_percent: f64,
    pub network_rx: u64,
    pub network_tx: u64,
    pub block_read: u64,
    pub block_write: u64,
    pub pids: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SystemInfo {
    pub docker_version: String,
    pub api_version: String,
    pub os: String,
    pub arch: String,
    pub containers: i64,
    pub containers_running: i64,
    pub containers_paused: i64,
    pub containers_stopped: i64,
    pub images: i64,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct StorageInfo {
    pub images_size: u64,
    pub containers_size: u64,
    pub volumes_size: u64,
    pub build_cache_size: u64,
    pub total_size: u64,
    pub reclaimable: u64,
    pub details: StorageDetails,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct StorageDetails {
    pub images: Vec<ImageInfo>,
    pub volumes: Vec<VolumeInfo>,
    pub build_cache: Vec<CacheInfo>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ImageInfo {
    pub id: String,
    pub repository: String,
    pub tag: String,
    pub size: u64,
    pub in_use: bool,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct VolumeInfo {
    pub name: String,
    pub driver: String,
    pub size: u64,
    pub in_use: bool,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheInfo {
    pub id: String,
    pub size: u64,
    pub in_use: bool,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct PortCheck {
    pub port: u16,
    pub available: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub process: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<i32>,
}
