//! Fleet reconciliation and lifecycle control.
//!
//! The manager owns the authoritative project map. A refresh merges three
//! sources into it: the filesystem scan, live containers grouped by their
//! compose-project label and persisted operator preferences. The map is
//! replaced in one atomic swap under the write lock, after every await has
//! completed, so readers never observe a half-built fleet.
//!
//! Live containers are grouped under the name compose itself resolves for
//! the project (an explicit `name:` key can differ from the scanned slug),
//! which is why reconciliation queries it per project instead of reusing
//! the slug.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::mpsc;

use crate::model::{
    Container, ContainerStats, PortCheck, Project, ProjectStatus, ProtectionReason, StorageInfo,
    SystemInfo,
};
use crate::protection::{ProtectionPolicy, detect_protected_pattern};
use crate::runtime::logs::{LogBundle, LogChannels, LogStream};
use crate::runtime::stats::StatsEngine;
use crate::runtime::{Runtime, compose};
use crate::runtime::compose::ComposeInvoker;
use crate::scanner::Scanner;
use crate::store::{PreferenceStore, ProjectPreference};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("project not found: {0}")]
    NotFound(String),
    #[error("project {name} is protected ({reason}); refusing destructive operation")]
    Protected { name: String, reason: String },
    #[error(transparent)]
    Compose(#[from] compose::Error),
    #[error(transparent)]
    Runtime(#[from] crate::runtime::Error),
    #[error(transparent)]
    Stats(#[from] crate::runtime::stats::Error),
    #[error(transparent)]
    Logs(#[from] crate::runtime::logs::Error),
    #[error(transparent)]
    Store(#[from] crate::store::Error),
    #[error("scan task failed: {0}")]
    ScanTask(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, Error>;

pub struct FleetManager<C: ComposeInvoker> {
    scanner: Arc<Scanner>,
    runtime: Runtime,
    stats: StatsEngine,
    logs: LogStream,
    policy: ProtectionPolicy,
    store: Option<PreferenceStore>,
    invoker: C,
    projects: RwLock<HashMap<String, Project>>,
}

impl<C: ComposeInvoker> FleetManager<C> {
    pub fn new(
        scanner: Arc<Scanner>,
        runtime: Runtime,
        policy: ProtectionPolicy,
        store: Option<PreferenceStore>,
        invoker: C,
    ) -> Self {
        let docker = runtime.docker();
        Self {
            scanner,
            stats: StatsEngine::new(docker.clone()),
            logs: LogStream::new(docker),
            runtime,
            policy,
            store,
            invoker,
            projects: RwLock::new(HashMap::new()),
        }
    }

    /// One full reconciliation pass: scan, group live containers, overlay
    /// preferences, merge against the previous map and swap it in atomically.
    ///
    /// Grouping names are resolved before the write lock is taken; the merge
    /// reads the previous entries inside the same critical section that swaps
    /// the map, so a mutation landing while names resolve (a protect toggle,
    /// say) is merged from current state instead of a stale snapshot.
    pub async fn refresh(&self) -> Result<()> {
        let scanner = Arc::clone(&self.scanner);
        let scan = tokio::task::spawn_blocking(move || scanner.scan()).await?;
        for err in &scan.errors {
            log::warn!("scan error at {}: {}", err.path.display(), err.error);
        }
        log::debug!(
            "scan found {} projects in {:?}",
            scan.projects.len(),
            scan.duration
        );

        let grouped = self.runtime.containers_by_compose_project().await?;
        let preferences = match &self.store {
            Some(store) => store.get_all_preferences().await?,
            None => HashMap::new(),
        };

        let mut resolved = Vec::with_capacity(scan.projects.len());
        for scanned in scan.projects {
            let grouping_name =
                compose::resolved_project_name(&self.invoker, &scanned.compose_file_path).await;
            resolved.push((scanned, grouping_name));
        }

        self.apply_refresh(resolved, &grouped, &preferences);
        Ok(())
    }

    /// Merge and swap, all under the write lock.
    fn apply_refresh(
        &self,
        resolved: Vec<(Project, String)>,
        grouped: &HashMap<String, Vec<Container>>,
        preferences: &HashMap<String, ProjectPreference>,
    ) {
        let mut projects = self.projects.write();
        let mut next = HashMap::with_capacity(resolved.len());
        for (scanned, grouping_name) in resolved {
            let containers = grouped.get(&grouping_name).cloned().unwrap_or_default();
            let key = scanned.id.clone();
            let merged = merge_project(
                projects.get(&key),
                scanned,
                preferences.get(&key),
                containers,
                &self.policy,
            );
            next.insert(key, merged);
        }
        *projects = next;
    }

    /// Re-groups only one project's containers after a lifecycle operation,
    /// without a filesystem rescan.
    pub async fn refresh_project(&self, project_id: &str) -> Result<()> {
        let project = self.get_project(project_id)?;
        let grouping_name =
            compose::resolved_project_name(&self.invoker, &project.compose_file_path).await;
        let containers = self.runtime.list_containers(Some(&grouping_name)).await?;

        let mut projects = self.projects.write();
        let Some(entry) = projects.get_mut(project_id) else {
            return Err(Error::NotFound(project_id.to_string()));
        };
        entry.status = determine_status(&containers);
        entry.containers = containers;
        if !entry.protected {
            evaluate_protection(entry, &self.policy);
        }
        entry.updated_at = Utc::now();
        Ok(())
    }

    pub async fn start_project(&self, project_id: &str) -> Result<()> {
        let project = self.get_project(project_id)?;
        log::info!("starting project {}", project.name);
        compose::up(&self.invoker, &project.compose_file_path).await?;
        self.refresh_project(project_id).await
    }

    /// Refused with [`Error::Protected`] unless `force` is set.
    pub async fn stop_project(&self, project_id: &str, force: bool) -> Result<()> {
        let project = self.get_project(project_id)?;
        if project.protected && !force {
            return Err(protected_error(&project));
        }

        log::info!("stopping project {} (force: {force})", project.name);
        compose::down(&self.invoker, &project.compose_file_path).await?;
        for container in &project.containers {
            self.stats.clear_previous_stats(&container.id);
        }
        self.refresh_project(project_id).await
    }

    /// Unconditionally refused while protected; there is no force override
    /// because a restart always passes through a down state.
    pub async fn restart_project(&self, project_id: &str) -> Result<()> {
        let project = self.get_project(project_id)?;
        if project.protected {
            return Err(protected_error(&project));
        }

        log::info!("restarting project {}", project.name);
        compose::restart(&self.invoker, &project.compose_file_path).await?;
        // Counters reset with the containers; stale baselines would inflate
        // the next delta.
        for container in &project.containers {
            self.stats.clear_previous_stats(&container.id);
        }
        self.refresh_project(project_id).await
    }

    pub async fn pull_project(&self, project_id: &str) -> Result<()> {
        let project = self.get_project(project_id)?;
        log::info!("pulling images for project {}", project.name);
        compose::pull(&self.invoker, &project.compose_file_path).await?;
        Ok(())
    }

    pub fn set_project_protection(&self, project_id: &str, protected: bool) -> Result<()> {
        let mut projects = self.projects.write();
        let entry = projects
            .get_mut(project_id)
            .ok_or_else(|| Error::NotFound(project_id.to_string()))?;
        entry.protected = protected;
        entry.protection_reason = protected.then_some(ProtectionReason::UserMarked);
        entry.updated_at = Utc::now();
        Ok(())
    }

    /// Persists first; the in-memory entry is only updated once the store
    /// accepted the write.
    pub async fn set_project_display_name(
        &self,
        project_id: &str,
        display_name: Option<&str>,
    ) -> Result<()> {
        if !self.projects.read().contains_key(project_id) {
            return Err(Error::NotFound(project_id.to_string()));
        }
        if let Some(store) = &self.store {
            store.set_display_name(project_id, display_name).await?;
        }

        let mut projects = self.projects.write();
        if let Some(entry) = projects.get_mut(project_id) {
            entry.display_name = display_name.map(str::to_string);
            entry.updated_at = Utc::now();
        }
        Ok(())
    }

    pub async fn set_project_hidden(&self, project_id: &str, hidden: bool) -> Result<()> {
        if !self.projects.read().contains_key(project_id) {
            return Err(Error::NotFound(project_id.to_string()));
        }
        if let Some(store) = &self.store {
            store.set_hidden(project_id, hidden).await?;
        }

        let mut projects = self.projects.write();
        if let Some(entry) = projects.get_mut(project_id) {
            entry.hidden = hidden;
            entry.updated_at = Utc::now();
        }
        Ok(())
    }

    /// Drops the persisted preference and resets the overlay fields.
    pub async fn delete_project_preference(&self, project_id: &str) -> Result<()> {
        if !self.projects.read().contains_key(project_id) {
            return Err(Error::NotFound(project_id.to_string()));
        }
        if let Some(store) = &self.store {
            store.delete_preference(project_id).await?;
        }

        let mut projects = self.projects.write();
        if let Some(entry) = projects.get_mut(project_id) {
            entry.display_name = None;
            entry.hidden = false;
            entry.updated_at = Utc::now();
        }
        Ok(())
    }

    /// All projects ordered by name, ties broken by definition file name.
    pub fn list_projects(&self) -> Vec<Project> {
        let mut projects: Vec<Project> = self.projects.read().values().cloned().collect();
        projects.sort_by(|a, b| {
            a.name
                .cmp(&b.name)
                .then_with(|| a.compose_file.cmp(&b.compose_file))
        });
        projects
    }

    pub fn get_project(&self, project_id: &str) -> Result<Project> {
        self.projects
            .read()
            .get(project_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(project_id.to_string()))
    }

    pub fn project_count(&self) -> usize {
        self.projects.read().len()
    }

    /// Current stats for a project's running containers, keyed by container
    /// id. Per-container fetch failures are skipped; the result is partial
    /// rather than an error.
    pub async fn get_project_stats(
        &self,
        project_id: &str,
    ) -> Result<HashMap<String, ContainerStats>> {
        let project = self.get_project(project_id)?;
        let mut out = HashMap::new();
        for container in project.containers.iter().filter(|c| c.state == "running") {
            match self.stats.get_stats(&container.id).await {
                Ok(stats) => {
                    out.insert(container.id.clone(), stats);
                }
                Err(err) => log::debug!("stats for {}: {err}", container.name),
            }
        }
        Ok(out)
    }

    /// Stats for every running container of every non-stopped project,
    /// keyed by project id then container id. Feeds the realtime broadcast.
    pub async fn collect_fleet_stats(
        &self,
    ) -> HashMap<String, HashMap<String, ContainerStats>> {
        let targets: Vec<(String, Vec<String>)> = self
            .projects
            .read()
            .values()
            .filter(|p| matches!(p.status, ProjectStatus::Running | ProjectStatus::Partial))
            .map(|p| {
                let containers = p
                    .containers
                    .iter()
                    .filter(|c| c.state == "running")
                    .map(|c| c.id.clone())
                    .collect();
                (p.id.clone(), containers)
            })
            .collect();

        let mut out = HashMap::new();
        for (project_id, containers) in targets {
            let mut stats = HashMap::new();
            for container_id in containers {
                match self.stats.get_stats(&container_id).await {
                    Ok(s) => {
                        stats.insert(container_id, s);
                    }
                    Err(err) => log::debug!("stats for {container_id}: {err}"),
                }
            }
            if !stats.is_empty() {
                out.insert(project_id, stats);
            }
        }
        out
    }

    pub async fn get_container(&self, container_id: &str) -> Result<Container> {
        Ok(self.runtime.get_container(container_id).await?)
    }

    pub async fn get_container_logs(
        &self,
        container_id: &str,
        tail: Option<&str>,
    ) -> Result<LogBundle> {
        Ok(self.logs.get_logs(container_id, tail).await?)
    }

    pub async fn stream_container_logs(
        &self,
        container_id: &str,
        tail: Option<&str>,
    ) -> Result<LogChannels> {
        Ok(self.logs.stream_logs(container_id, tail).await?)
    }

    pub async fn get_container_stats(&self, container_id: &str) -> Result<ContainerStats> {
        Ok(self.stats.get_stats(container_id).await?)
    }

    pub fn stream_container_stats(
        &self,
        container_id: &str,
    ) -> mpsc::Receiver<crate::runtime::stats::Result<ContainerStats>> {
        self.stats.stream_stats(container_id)
    }

    pub async fn ping(&self) -> Result<()> {
        Ok(self.runtime.ping().await?)
    }

    pub async fn system_info(&self) -> Result<SystemInfo> {
        Ok(self.runtime.system_info().await?)
    }

    pub async fn storage_info(&self) -> Result<StorageInfo> {
        Ok(self.runtime.storage_info().await?)
    }

    pub async fn prune(&self, images: bool, volumes: bool, build_cache: bool) -> Result<u64> {
        Ok(self.runtime.prune(images, volumes, build_cache).await?)
    }

    pub async fn check_port(&self, port: u16) -> PortCheck {
        crate::runtime::check_port(port).await
    }

    pub fn scan_paths(&self) -> Vec<PathBuf> {
        self.scanner.paths()
    }

    pub fn set_scan_paths(&self, paths: Vec<PathBuf>) {
        self.scanner.set_paths(paths);
        self.scanner.clear_cache();
    }

    pub fn add_protected_pattern(&self, pattern: &str) {
        self.policy.add_pattern(pattern);
    }

    pub fn remove_protected_pattern(&self, pattern: &str) {
        self.policy.remove_pattern(pattern);
    }

    pub fn add_protected_project(&self, path: &str) {
        self.policy.add_project(path);
    }

    pub fn remove_protected_project(&self, path: &str) {
        self.policy.remove_project(path);
    }
}

fn protected_error(project: &Project) -> Error {
    Error::Protected {
        name: project.name.clone(),
        reason: project
            .protection_reason
            .map(|r| r.to_string())
            .unwrap_or_else(|| "protected".to_string()),
    }
}

/// Merges one scanned project against its previous in-memory entry, the
/// persisted preference and its live containers.
///
/// Protection is sticky: once a previous entry carries it, the merged entry
/// keeps it without re-evaluation. Only unprotected projects are checked
/// against the policy (path match, reported as user_marked) and then against
/// per-container name/image heuristics, first hit wins.
fn merge_project(
    previous: Option<&Project>,
    mut scanned: Project,
    preference: Option<&ProjectPreference>,
    containers: Vec<Container>,
    policy: &ProtectionPolicy,
) -> Project {
    if let Some(previous) = previous {
        scanned.created_at = previous.created_at;
        if previous.protected {
            scanned.protected = true;
            scanned.protection_reason = previous.protection_reason;
        }
        if preference.is_none() {
            scanned.display_name = previous.display_name.clone();
            scanned.hidden = previous.hidden;
        }
    }

    if let Some(preference) = preference {
        scanned.display_name = preference.display_name.clone();
        scanned.hidden = preference.hidden;
    }

    scanned.status = determine_status(&containers);
    scanned.containers = containers;

    if !scanned.protected {
        evaluate_protection(&mut scanned, policy);
    }

    scanned.updated_at = Utc::now();
    scanned
}

fn evaluate_protection(project: &mut Project, policy: &ProtectionPolicy) {
    if policy.is_protected(&project.path.to_string_lossy()) {
        project.protected = true;
        project.protection_reason = Some(ProtectionReason::UserMarked);
        return;
    }

    for container in &project.containers {
        if let Some(reason) = detect_protected_pattern(&container.name)
            .or_else(|| detect_protected_pattern(&container.image))
        {
            project.protected = true;
            project.protection_reason = Some(reason);
            return;
        }
    }
}

fn is_terminal_state(state: &str) -> bool {
    matches!(state, "exited" | "dead" | "created")
}

/// Aggregate status from coarse container states, recomputed fully each
/// pass. No transition history is kept.
fn determine_status(containers: &[Container]) -> ProjectStatus {
    if containers.is_empty() {
        return ProjectStatus::Stopped;
    }
    if containers.iter().all(|c| c.state == "running") {
        return ProjectStatus::Running;
    }
    if containers.iter().all(|c| is_terminal_state(&c.state)) {
        return ProjectStatus::Stopped;
    }
    ProjectStatus::Partial
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Mutex;

    use super::*;
    use crate::runtime::compose::{ComposeInvoker, ComposeOutput};

    fn container(id: &str, name: &str, image: &str, state: &str) -> Container {
        Container {
            id: id.to_string(),
            name: name.to_string(),
            service_name: String::new(),
            image: image.to_string(),
            status: state.to_string(),
            state: state.to_string(),
            health: String::new(),
            ports: Vec::new(),
            labels: HashMap::new(),
            stats: None,
            created_at: Utc::now(),
            started_at: None,
        }
    }

    fn project(id: &str, name: &str, compose_file: &str) -> Project {
        let now = Utc::now();
        Project {
            id: id.to_string(),
            name: name.to_string(),
            display_name: None,
            path: PathBuf::from(format!("/srv/{name}")),
            compose_file: compose_file.to_string(),
            compose_file_path: PathBuf::from(format!("/srv/{name}/{compose_file}")),
            environment: crate::model::Environment::Development,
            status: ProjectStatus::Unknown,
            protected: false,
            protection_reason: None,
            hidden: false,
            containers: Vec::new(),
            services: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[derive(Default)]
    struct RecordingInvoker {
        calls: Mutex<Vec<Vec<String>>>,
    }

    impl ComposeInvoker for RecordingInvoker {
        async fn invoke(
            &self,
            _compose_path: &Path,
            args: &[&str],
        ) -> compose::Result<ComposeOutput> {
            self.calls
                .lock()
                .unwrap()
                .push(args.iter().map(|a| a.to_string()).collect());
            Ok(ComposeOutput {
                success: true,
                stdout: String::new(),
                stderr: String::new(),
            })
        }
    }

    fn manager() -> FleetManager<RecordingInvoker> {
        let scanner = Arc::new(Scanner::new(Vec::new(), Vec::new()));
        let runtime = Runtime::connect("unix:///tmp/stackwatch-test-no-daemon.sock").unwrap();
        FleetManager::new(
            scanner,
            runtime,
            ProtectionPolicy::new(Vec::new(), Vec::new()),
            None,
            RecordingInvoker::default(),
        )
    }

    #[test]
    fn test_determine_status() {
        assert_eq!(determine_status(&[]), ProjectStatus::Stopped);
        assert_eq!(
            determine_status(&[container("a", "a", "img", "running")]),
            ProjectStatus::Running
        );
        assert_eq!(
            determine_status(&[
                container("a", "a", "img", "exited"),
                container("b", "b", "img", "created"),
                container("c", "c", "img", "dead"),
            ]),
            ProjectStatus::Stopped
        );
        assert_eq!(
            determine_status(&[
                container("a", "a", "img", "running"),
                container("b", "b", "img", "exited"),
            ]),
            ProjectStatus::Partial
        );
        assert_eq!(
            determine_status(&[
                container("a", "a", "img", "running"),
                container("b", "b", "img", "restarting"),
            ]),
            ProjectStatus::Partial
        );
    }

    #[test]
    fn test_merge_keeps_protection_sticky() {
        let policy = ProtectionPolicy::new(Vec::new(), Vec::new());
        let mut previous = project("id1", "vpn", "compose.yml");
        previous.protected = true;
        previous.protection_reason = Some(ProtectionReason::CloudflareTunnel);

        // The fresh scan result knows nothing about protection, and no
        // container matches a heuristic any more.
        let merged = merge_project(
            Some(&previous),
            project("id1", "vpn", "compose.yml"),
            None,
            vec![container("a", "plain-app", "nginx", "running")],
            &policy,
        );
        assert!(merged.protected);
        assert_eq!(
            merged.protection_reason,
            Some(ProtectionReason::CloudflareTunnel)
        );
        assert_eq!(merged.created_at, previous.created_at);
    }

    #[test]
    fn test_merge_detects_protection_from_containers() {
        let policy = ProtectionPolicy::new(Vec::new(), Vec::new());
        let merged = merge_project(
            None,
            project("id1", "edge", "compose.yml"),
            None,
            vec![container("a", "edge-cloudflared-1", "cloudflare/cloudflared", "running")],
            &policy,
        );
        assert!(merged.protected);
        assert_eq!(
            merged.protection_reason,
            Some(ProtectionReason::CloudflareTunnel)
        );
    }

    #[test]
    fn test_merge_policy_path_wins_over_heuristics() {
        let policy = ProtectionPolicy::new(Vec::new(), vec!["/srv/edge".to_string()]);
        let merged = merge_project(
            None,
            project("id1", "edge", "compose.yml"),
            None,
            vec![container("a", "edge-traefik-1", "traefik", "running")],
            &policy,
        );
        assert!(merged.protected);
        assert_eq!(merged.protection_reason, Some(ProtectionReason::UserMarked));
    }

    #[test]
    fn test_merge_applies_preference_over_carry_forward() {
        let policy = ProtectionPolicy::new(Vec::new(), Vec::new());
        let mut previous = project("id1", "app", "compose.yml");
        previous.display_name = Some("Old Name".to_string());

        let preference = ProjectPreference {
            project_id: "id1".to_string(),
            display_name: Some("New Name".to_string()),
            hidden: true,
        };
        let merged = merge_project(
            Some(&previous),
            project("id1", "app", "compose.yml"),
            Some(&preference),
            Vec::new(),
            &policy,
        );
        assert_eq!(merged.display_name.as_deref(), Some("New Name"));
        assert!(merged.hidden);
        assert_eq!(merged.status, ProjectStatus::Stopped);
    }

    #[test]
    fn test_list_projects_sorted_by_name_then_file() {
        let manager = manager();
        {
            let mut projects = manager.projects.write();
            projects.insert("1".into(), project("1", "zeta", "compose.yml"));
            projects.insert("2".into(), project("2", "alpha", "docker-compose.yml"));
            projects.insert("3".into(), project("3", "alpha", "compose.yml"));
        }

        let listed = manager.list_projects();
        let keys: Vec<(String, String)> = listed
            .into_iter()
            .map(|p| (p.name, p.compose_file))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("alpha".to_string(), "compose.yml".to_string()),
                ("alpha".to_string(), "docker-compose.yml".to_string()),
                ("zeta".to_string(), "compose.yml".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_stop_protected_without_force_is_refused() {
        let manager = manager();
        {
            let mut projects = manager.projects.write();
            let mut p = project("1", "vpn", "compose.yml");
            p.protected = true;
            p.protection_reason = Some(ProtectionReason::UserMarked);
            p.status = ProjectStatus::Running;
            p.containers = vec![container("a", "vpn-app-1", "img", "running")];
            projects.insert("1".into(), p);
        }

        let err = manager.stop_project("1", false).await.unwrap_err();
        assert!(matches!(err, Error::Protected { .. }));
        // No compose invocation happened and the entry is untouched.
        assert!(manager.invoker.calls.lock().unwrap().is_empty());
        let p = manager.get_project("1").unwrap();
        assert_eq!(p.status, ProjectStatus::Running);
        assert_eq!(p.containers.len(), 1);
    }

    #[tokio::test]
    async fn test_stop_protected_with_force_invokes_down() {
        let manager = manager();
        {
            let mut projects = manager.projects.write();
            let mut p = project("1", "vpn", "compose.yml");
            p.protected = true;
            projects.insert("1".into(), p);
        }

        // The daemon socket does not exist, so the targeted refresh after
        // the invocation fails; the down invocation itself must still have
        // been issued.
        let _ = manager.stop_project("1", true).await;
        let calls = manager.invoker.calls.lock().unwrap();
        assert!(calls.iter().any(|args| args == &["down"]));
    }

    #[tokio::test]
    async fn test_restart_protected_has_no_force_override() {
        let manager = manager();
        {
            let mut projects = manager.projects.write();
            let mut p = project("1", "vpn", "compose.yml");
            p.protected = true;
            projects.insert("1".into(), p);
        }

        let err = manager.restart_project("1").await.unwrap_err();
        assert!(matches!(err, Error::Protected { .. }));
        assert!(manager.invoker.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_project_is_not_found() {
        let manager = manager();
        assert!(matches!(
            manager.get_project("missing"),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            manager.start_project("missing").await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            manager.set_project_protection("missing", true),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_protection_set_during_name_resolution_survives_swap() {
        let manager = manager();
        manager
            .projects
            .write()
            .insert("1".into(), project("1", "app", "compose.yml"));

        // A refresh pass captures its scan result and resolved grouping
        // names before the swap. A protect toggle landing in that window
        // must still be visible to the merge.
        let resolved = vec![(project("1", "app", "compose.yml"), "app".to_string())];
        manager.set_project_protection("1", true).unwrap();

        manager.apply_refresh(resolved, &HashMap::new(), &HashMap::new());

        let p = manager.get_project("1").unwrap();
        assert!(p.protected);
        assert_eq!(p.protection_reason, Some(ProtectionReason::UserMarked));
    }

    #[test]
    fn test_set_project_protection_toggles_reason() {
        let manager = manager();
        manager
            .projects
            .write()
            .insert("1".into(), project("1", "app", "compose.yml"));

        manager.set_project_protection("1", true).unwrap();
        let p = manager.get_project("1").unwrap();
        assert!(p.protected);
        assert_eq!(p.protection_reason, Some(ProtectionReason::UserMarked));

        manager.set_project_protection("1", false).unwrap();
        let p = manager.get_project("1").unwrap();
        assert!(!p.protected);
        assert_eq!(p.protection_reason, None);
    }
}
