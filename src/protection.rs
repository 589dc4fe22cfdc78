//! Protection policy for sensitive stacks.
//!
//! A project can be protected three ways: an explicit entry in the protected
//! project list, a glob/substring pattern match on its path, or a heuristic
//! match on one of its containers' names or images (tunnels and ingress
//! proxies). Heuristic detections are recorded on the project during
//! reconciliation; they never grow the policy's own lists.

use std::path::Path;

use parking_lot::RwLock;

use crate::model::ProtectionReason;

/// Substrings identifying tunnel containers. Stopping one of these usually
/// severs remote access to the whole host.
const TUNNEL_PATTERNS: &[&str] = &[
    "cloudflare",
    "cloudflared",
    "cf-tunnel",
    "cftunnel",
    "tunnel",
    "argo",
];

/// Substrings identifying reverse proxies and ingress gateways.
const INGRESS_PATTERNS: &[&str] = &[
    "traefik",
    "nginx-proxy",
    "reverse-proxy",
    "gateway",
    "ingress",
];

pub struct ProtectionPolicy {
    patterns: RwLock<Vec<String>>,
    projects: RwLock<Vec<String>>,
}

impl ProtectionPolicy {
    pub fn new(patterns: Vec<String>, projects: Vec<String>) -> Self {
        Self {
            patterns: RwLock::new(patterns),
            projects: RwLock::new(projects),
        }
    }

    /// Checks a project path against explicit entries and patterns.
    ///
    /// True when the normalized path exactly matches a protected entry, when
    /// any pattern glob-matches the base name case-insensitively, or when any
    /// pattern is a case-insensitive substring of the full path.
    pub fn is_protected(&self, project_path: &str) -> bool {
        let normalized = normalize_path(project_path);

        if self
            .projects
            .read()
            .iter()
            .any(|p| normalize_path(p) == normalized)
        {
            return true;
        }

        let base = Path::new(project_path)
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let lower_path = project_path.to_lowercase();

        for pattern in self.patterns.read().iter() {
            let lower_pattern = pattern.to_lowercase();
            if let Ok(glob) = glob::Pattern::new(&lower_pattern) {
                if glob.matches(&base) {
                    return true;
                }
            }
            if lower_path.contains(&lower_pattern) {
                return true;
            }
        }

        false
    }

    pub fn add_project(&self, project_path: &str) {
        let normalized = normalize_path(project_path);
        let mut projects = self.projects.write();
        if !projects.iter().any(|p| normalize_path(p) == normalized) {
            projects.push(project_path.to_string());
        }
    }

    pub fn remove_project(&self, project_path: &str) {
        let normalized = normalize_path(project_path);
        self.projects
            .write()
            .retain(|p| normalize_path(p) != normalized);
    }

    pub fn add_pattern(&self, pattern: &str) {
        let mut patterns = self.patterns.write();
        if !patterns.iter().any(|p| p == pattern) {
            patterns.push(pattern.to_string());
        }
    }

    pub fn remove_pattern(&self, pattern: &str) {
        self.patterns.write().retain(|p| p != pattern);
    }
}

/// Heuristic detection on a container name or image string. First match wins:
/// tunnel keywords, then ingress/proxy keywords.
pub fn detect_protected_pattern(name: &str) -> Option<ProtectionReason> {
    let lower = name.to_lowercase();

    if TUNNEL_PATTERNS.iter().any(|p| lower.contains(p)) {
        return Some(ProtectionReason::CloudflareTunnel);
    }

    if INGRESS_PATTERNS.iter().any(|p| lower.contains(p)) {
        return Some(ProtectionReason::AutoDetected);
    }

    None
}

/// Cleans the path and strips a trailing separator. Home-relative (`~/`)
/// paths stay unexpanded so entries compare the way the operator wrote them.
fn normalize_path(path: &str) -> String {
    let mut components = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                if components.last().is_some_and(|c| *c != "..") {
                    components.pop();
                } else {
                    components.push("..");
                }
            }
            other => components.push(other),
        }
    }

    let joined = components.join("/");
    if path.starts_with('/') {
        format!("/{joined}")
    } else {
        joined
    }
}
