//! Thin facade over the Docker Engine API.
//!
//! Wraps a [`bollard::Docker`] handle for listing and inspecting containers
//! (grouped by their compose-project label), querying system and storage
//! information and pruning unused resources. Lifecycle operations on whole
//! stacks go through the external compose binary instead; see [`compose`].

use std::collections::HashMap;

use bollard::Docker;
use bollard::container::ListContainersOptions;
use bollard::image::PruneImagesOptions;
use bollard::models::{ContainerInspectResponse, ContainerSummary};
use bollard::network::PruneNetworksOptions;
use bollard::volume::PruneVolumesOptions;
use chrono::{DateTime, Utc};

use crate::model::{
    CacheInfo, Container, ImageInfo, PortCheck, PortMapping, StorageInfo, SystemInfo, VolumeInfo,
};

pub mod compose;
pub mod logs;
pub mod stats;

pub const COMPOSE_PROJECT_LABEL: &str = "com.docker.compose.project";
pub const COMPOSE_SERVICE_LABEL: &str = "com.docker.compose.service";

/// Grouping key for containers that carry no compose-project label.
pub const STANDALONE_GROUP: &str = "_standalone";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("connecting to docker daemon: {0}")]
    Connect(#[source] bollard::errors::Error),
    #[error("daemon request failed: {0}")]
    Daemon(#[from] bollard::errors::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Shared handle to one daemon socket. Cheap to clone.
#[derive(Clone)]
pub struct Runtime {
    docker: Docker,
}

impl Runtime {
    /// Connects to the daemon socket, e.g. `unix:///var/run/docker.sock`.
    /// The connection is lazy; use [`Runtime::ping`] to verify reachability.
    pub fn connect(socket: &str) -> Result<Self> {
        let docker = Docker::connect_with_unix(socket, 120, bollard::API_DEFAULT_VERSION)
            .map_err(Error::Connect)?;
        Ok(Self { docker })
    }

    pub fn docker(&self) -> Docker {
        self.docker.clone()
    }

    pub async fn ping(&self) -> Result<()> {
        self.docker.ping().await?;
        Ok(())
    }

    /// Lists all containers, optionally narrowed to one compose project via
    /// its label.
    pub async fn list_containers(&self, project_name: Option<&str>) -> Result<Vec<Container>> {
        let mut filters: HashMap<String, Vec<String>> = HashMap::new();
        if let Some(name) = project_name {
            filters.insert(
                "label".to_string(),
                vec![format!("{COMPOSE_PROJECT_LABEL}={name}")],
            );
        }

        let options = ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        };

        let summaries = self.docker.list_containers(Some(options)).await?;
        Ok(summaries.into_iter().map(summary_to_container).collect())
    }

    /// Groups all containers by their compose-project label; unlabeled
    /// containers land under [`STANDALONE_GROUP`].
    pub async fn containers_by_compose_project(
        &self,
    ) -> Result<HashMap<String, Vec<Container>>> {
        let containers = self.list_containers(None).await?;

        let mut grouped: HashMap<String, Vec<Container>> = HashMap::new();
        for container in containers {
            let project = container
                .labels
                .get(COMPOSE_PROJECT_LABEL)
                .filter(|p| !p.is_empty())
                .cloned()
                .unwrap_or_else(|| STANDALONE_GROUP.to_string());
            grouped.entry(project).or_default().push(container);
        }

        Ok(grouped)
    }

    pub async fn get_container(&self, container_id: &str) -> Result<Container> {
        let info = self.docker.inspect_container(container_id, None).await?;
        Ok(inspect_to_container(info))
    }

    pub async fn system_info(&self) -> Result<SystemInfo> {
        let info = self.docker.info().await?;
        let version = self.docker.version().await?;

        Ok(SystemInfo {
            docker_version: version.version.unwrap_or_default(),
            api_version: version.api_version.unwrap_or_default(),
            os: info.operating_system.unwrap_or_default(),
            arch: info.architecture.unwrap_or_default(),
            containers: info.containers.unwrap_or(0),
            containers_running: info.containers_running.unwrap_or(0),
            containers_paused: info.containers_paused.unwrap_or(0),
            containers_stopped: info.containers_stopped.unwrap_or(0),
            images: info.images.unwrap_or(0),
        })
    }

    /// Disk usage breakdown across images, containers, volumes and build
    /// cache, with a reclaimable estimate (unused images + build cache).
    pub async fn storage_info(&self) -> Result<StorageInfo> {
        let usage = self.docker.df().await?;
        let mut info = StorageInfo::default();

        let mut unused_images = 0u64;
        for image in usage.images.unwrap_or_default() {
            let size = image.size.max(0) as u64;
            info.images_size += size;
            if image.containers == 0 {
                unused_images += size;
            }

            let (repository, tag) = image
                .repo_tags
                .first()
                .and_then(|t| t.rsplit_once(':'))
                .map(|(r, t)| (r.to_string(), t.to_string()))
                .unwrap_or_else(|| ("<none>".to_string(), "<none>".to_string()));

            info.details.images.push(ImageInfo {
                id: image.id,
                repository,
                tag,
                size,
                in_use: image.containers > 0,
            });
        }

        for container in usage.containers.unwrap_or_default() {
            info.containers_size += container.size_rw.unwrap_or(0).max(0) as u64;
        }

        for volume in usage.volumes.unwrap_or_default() {
            let (size, in_use) = volume
                .usage_data
                .as_ref()
                .map(|u| (u.size.max(0) as u64, u.ref_count > 0))
                .unwrap_or((0, false));
            info.volumes_size += size;
            info.details.volumes.push(VolumeInfo {
                name: volume.name,
                driver: volume.driver,
                size,
                in_use,
            });
        }

        for cache in usage.build_cache.unwrap_or_default() {
            let size = cache.size.unwrap_or(0).max(0) as u64;
            info.build_cache_size += size;
            info.details.build_cache.push(CacheInfo {
                id: cache.id.unwrap_or_default(),
                size,
                in_use: cache.in_use.unwrap_or(false),
            });
        }

        info.total_size =
            info.images_size + info.containers_size + info.volumes_size + info.build_cache_size;
        info.reclaimable = unused_images + info.build_cache_size;

        Ok(info)
    }

    /// Prunes unused resources. Stopped containers and dangling networks are
    /// always pruned; images, volumes and build cache only when requested.
    /// Returns the space reclaimed in bytes.
    pub async fn prune(&self, images: bool, volumes: bool, build_cache: bool) -> Result<u64> {
        let mut reclaimed = 0u64;

        let report = self
            .docker
            .prune_containers(None::<bollard::container::PruneContainersOptions<String>>)
            .await?;
        reclaimed += report.space_reclaimed.unwrap_or(0).max(0) as u64;

        if images {
            let mut filters: HashMap<String, Vec<String>> = HashMap::new();
            filters.insert("dangling".to_string(), vec!["false".to_string()]);
            let report = self
                .docker
                .prune_images(Some(PruneImagesOptions { filters }))
                .await?;
            reclaimed += report.space_reclaimed.unwrap_or(0).max(0) as u64;
        }

        if volumes {
            let report = self
                .docker
                .prune_volumes(None::<PruneVolumesOptions<String>>)
                .await?;
            reclaimed += report.space_reclaimed.unwrap_or(0).max(0) as u64;
        }

        if build_cache {
            // Not exposed through the daemon client; goes through the CLI.
            match tokio::process::Command::new("docker")
                .args(["builder", "prune", "--force"])
                .output()
                .await
            {
                Ok(output) if !output.status.success() => {
                    log::warn!(
                        "builder prune failed: {}",
                        String::from_utf8_lossy(&output.stderr).trim()
                    );
                }
                Ok(_) => {}
                Err(err) => log::warn!("builder prune failed to spawn: {err}"),
            }
        }

        self.docker
            .prune_networks(None::<PruneNetworksOptions<String>>)
            .await?;

        Ok(reclaimed)
    }
}

/// Probes a local port by binding it; when occupied, looks up the owning
/// process via `ss`.
pub async fn check_port(port: u16) -> PortCheck {
    match tokio::net::TcpListener::bind(("0.0.0.0", port)).await {
        Ok(_) => PortCheck {
            port,
            available: true,
            process: String::new(),
            pid: None,
        },
        Err(_) => {
            let (process, pid) = process_using_port(port).await;
            PortCheck {
                port,
                available: false,
                process,
                pid,
            }
        }
    }
}

async fn process_using_port(port: u16) -> (String, Option<i32>) {
    let output = tokio::process::Command::new("ss")
        .args(["-tlnp", &format!("sport = :{port}")])
        .output()
        .await;

    match output {
        Ok(output) => parse_ss_process(&String::from_utf8_lossy(&output.stdout), port),
        Err(_) => ("unknown".to_string(), None),
    }
}

/// Extracts `("name", pid)` from `ss -tlnp` output lines shaped like
/// `users:(("nginx",pid=123,fd=6))`.
fn parse_ss_process(output: &str, port: u16) -> (String, Option<i32>) {
    let needle = format!(":{port} ");
    for line in output.lines() {
        if !line.contains(&needle) {
            continue;
        }
        let Some(users) = line.split("users:((").nth(1) else {
            continue;
        };
        let name = users
            .trim_start_matches('"')
            .split('"')
            .next()
            .unwrap_or("unknown")
            .to_string();
        let pid = users
            .split("pid=")
            .nth(1)
            .and_then(|rest| rest.split(&[',', ')'][..]).next())
            .and_then(|digits| digits.parse().ok());
        return (name, pid);
    }

    ("unknown".to_string(), None)
}

fn summary_to_container(summary: ContainerSummary) -> Container {
    let name = summary
        .names
        .as_ref()
        .and_then(|names| names.first())
        .map(|n| n.trim_start_matches('/').to_string())
        .unwrap_or_default();

    let status = summary.status.unwrap_or_default();
    let health = match &status {
        s if s.contains("(healthy)") => "healthy",
        s if s.contains("(unhealthy)") => "unhealthy",
        s if s.contains("(starting)") => "starting",
        _ => "",
    }
    .to_string();

    let ports = summary
        .ports
        .unwrap_or_default()
        .into_iter()
        .map(|p| PortMapping {
            host_ip: p.ip.unwrap_or_default(),
            host_port: p.public_port.and_then(|p| u16::try_from(p).ok()).unwrap_or(0),
            container_port: u16::try_from(p.private_port).unwrap_or(0),
            protocol: p.typ.map(|t| t.to_string()).unwrap_or_else(|| "tcp".to_string()),
        })
        .collect();

    let labels = summary.labels.unwrap_or_default();

    Container {
        id: summary.id.unwrap_or_default(),
        name,
        service_name: labels.get(COMPOSE_SERVICE_LABEL).cloned().unwrap_or_default(),
        image: summary.image.unwrap_or_default(),
        status,
        state: summary.state.unwrap_or_default(),
        health,
        ports,
        labels,
        stats: None,
        created_at: summary
            .created
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .unwrap_or_default(),
        started_at: None,
    }
}

fn inspect_to_container(info: ContainerInspectResponse) -> Container {
    let name = info
        .name
        .map(|n| n.trim_start_matches('/').to_string())
        .unwrap_or_default();

    let labels = info
        .config
        .as_ref()
        .and_then(|c| c.labels.clone())
        .unwrap_or_default();
    let image = info
        .config
        .as_ref()
        .and_then(|c| c.image.clone())
        .unwrap_or_default();

    let state = info
        .state
        .as_ref()
        .and_then(|s| s.status)
        .map(|s| s.to_string())
        .unwrap_or_default();
    let health = info
        .state
        .as_ref()
        .and_then(|s| s.health.as_ref())
        .and_then(|h| h.status)
        .map(|h| h.to_string())
        .unwrap_or_default();

    let mut ports = Vec::new();
    if let Some(port_map) = info.network_settings.and_then(|n| n.ports) {
        for (port_proto, bindings) in port_map {
            let (container_port, protocol) = match port_proto.split_once('/') {
                Some((port, proto)) => (port.parse().unwrap_or(0), proto.to_string()),
                None => (port_proto.parse().unwrap_or(0), "tcp".to_string()),
            };
            for binding in bindings.unwrap_or_default() {
                ports.push(PortMapping {
                    host_ip: binding.host_ip.unwrap_or_default(),
                    host_port: binding
                        .host_port
                        .as_deref()
                        .and_then(|p| p.parse().ok())
                        .unwrap_or(0),
                    container_port,
                    protocol: protocol.clone(),
                });
            }
        }
    }

    let created_at = info
        .created
        .as_deref()
        .and_then(parse_rfc3339)
        .unwrap_or_default();
    let started_at = info
        .state
        .as_ref()
        .and_then(|s| s.started_at.as_deref())
        .and_then(parse_rfc3339)
        // The daemon reports a zero time for never-started containers.
        .filter(|t| t.timestamp() > 0);

    Container {
        id: info.id.unwrap_or_default(),
        name,
        service_name: labels.get(COMPOSE_SERVICE_LABEL).cloned().unwrap_or_default(),
        image,
        status: state.clone(),
        state,
        health: if health == "none" { String::new() } else { health },
        ports,
        labels,
        stats: None,
        created_at,
        started_at,
    }
}

fn parse_rfc3339(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ss_process() {
        let output = "State  Recv-Q Send-Q Local Address:Port Peer Address:Port Process\n\
                      LISTEN 0      511    0.0.0.0:8080 0.0.0.0:* users:((\"nginx\",pid=4242,fd=6))\n";
        let (process, pid) = parse_ss_process(output, 8080);
        assert_eq!(process, "nginx");
        assert_eq!(pid, Some(4242));
    }

    #[test]
    fn test_parse_ss_process_no_match() {
        let (process, pid) = parse_ss_process("LISTEN 0 511 0.0.0.0:9999 ...\n", 8080);
        assert_eq!(process, "unknown");
        assert_eq!(pid, None);
    }

    #[test]
    fn test_summary_health_from_status() {
        let summary = ContainerSummary {
            id: Some("abc".to_string()),
            names: Some(vec!["/web-1".to_string()]),
            status: Some("Up 3 hours (healthy)".to_string()),
            state: Some("running".to_string()),
            ..Default::default()
        };
        let container = summary_to_container(summary);
        assert_eq!(container.name, "web-1");
        assert_eq!(container.health, "healthy");
        assert_eq!(container.state, "running");
    }

    #[test]
    fn test_grouping_label_fallback() {
        let summary = ContainerSummary {
            id: Some("abc".to_string()),
            ..Default::default()
        };
        let container = summary_to_container(summary);
        assert!(container.labels.get(COMPOSE_PROJECT_LABEL).is_none());
        assert!(container.service_name.is_empty());
    }
}
