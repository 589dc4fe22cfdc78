//! Compose definition discovery with content-addressed caching.
//!
//! The scanner walks configured root paths, identifies YAML candidates,
//! parses each one as a compose document and caches parse results keyed by
//! path. A cache entry is valid only while both the file's modification time
//! and its content checksum match; the double check compensates for coarse
//! filesystem mtime resolution.
//!
//! Walking and parsing are blocking filesystem work; callers on the async
//! runtime should go through [`tokio::task::spawn_blocking`]. The cache is
//! internally locked, but only one scan should run at a time per instance.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::model::{Container, Project, ProjectStatus};

mod patterns;

pub use patterns::detect_environment;

/// Directory names skipped by default during a walk.
const DEFAULT_EXCLUDES: &[&str] = &[
    "node_modules",
    ".git",
    "vendor",
    "__pycache__",
    ".venv",
    "venv",
    ".cache",
    ".npm",
    ".yarn",
    "dist",
    "build",
    ".next",
    ".nuxt",
    "target",
];

/// Hidden directories that are still scanned despite the hidden-dir rule.
const HIDDEN_ALLOWLIST: &[&str] = &[".docker", ".devcontainer"];

pub struct Scanner {
    paths: RwLock<Vec<PathBuf>>,
    exclude: Vec<String>,
    cache: RwLock<HashMap<PathBuf, CachedProject>>,
}

struct CachedProject {
    project: Project,
    modified: SystemTime,
    checksum: String,
}

#[derive(Debug, Default)]
pub struct ScanResult {
    pub projects: Vec<Project>,
    pub errors: Vec<ScanError>,
    pub duration: Duration,
}

/// A walk failure scoped to one path. Collected, never fatal to the scan.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ScanError {
    pub path: PathBuf,
    pub error: String,
}

#[derive(Debug, thiserror::Error)]
enum ParseError {
    #[error("reading file: {0}")]
    Io(#[from] std::io::Error),
    #[error("parsing yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Minimal view of a compose document: only the declared services matter for
/// discovery. An explicit `name:` override is resolved later, at reconcile
/// time, through the compose binary itself.
#[derive(Debug, serde::Deserialize)]
struct ComposeDoc {
    #[serde(default)]
    services: Option<BTreeMap<String, serde_yaml::Value>>,
}

impl Scanner {
    pub fn new(paths: Vec<PathBuf>, exclude: Vec<String>) -> Self {
        let exclude = if exclude.is_empty() {
            DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect()
        } else {
            exclude
        };
        Self {
            paths: RwLock::new(paths),
            exclude,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Discovers all compose files under the configured roots.
    ///
    /// Detection is content-based: a candidate must parse as YAML and declare
    /// at least one service. Files that fail to parse, or parse to zero
    /// services, are skipped silently. Per-path walk errors are collected in
    /// the result instead of aborting the scan.
    pub fn scan(&self) -> ScanResult {
        let start = Instant::now();
        let mut result = ScanResult::default();

        let mut candidates = Vec::new();
        for root in self.paths.read().iter() {
            let root = expand_path(root);
            for entry in WalkDir::new(&root)
                .into_iter()
                .filter_entry(|e| !self.should_skip(e))
            {
                match entry {
                    Ok(entry) => {
                        if entry.file_type().is_file() && is_yaml_file(entry.path()) {
                            candidates.push(entry.into_path());
                        }
                    }
                    Err(err) => {
                        let path = err
                            .path()
                            .map(Path::to_path_buf)
                            .unwrap_or_else(|| root.clone());
                        result.errors.push(ScanError {
                            path,
                            error: format!("walking directory: {err}"),
                        });
                    }
                }
            }
        }

        for path in candidates {
            match self.parse_compose_file(&path) {
                Ok(Some(project)) => result.projects.push(project),
                Ok(None) => {}
                Err(err) => {
                    log::debug!("skipping compose file {}: {err}", path.display());
                }
            }
        }

        result.duration = start.elapsed();
        result
    }

    /// Attempts to parse one YAML file as a compose definition.
    ///
    /// Returns `Ok(None)` for files that are valid YAML but not compose files
    /// (zero declared services). A matching cache entry short-circuits the
    /// parse entirely.
    fn parse_compose_file(&self, path: &Path) -> Result<Option<Project>, ParseError> {
        let abs = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        let modified = std::fs::metadata(&abs)?.modified()?;
        let contents = std::fs::read_to_string(&abs)?;
        let checksum = hex::encode(Sha256::digest(contents.as_bytes()));

        if let Some(cached) = self.cache.read().get(&abs) {
            if cached.modified == modified && cached.checksum == checksum {
                return Ok(Some(cached.project.clone()));
            }
        }

        let doc: ComposeDoc = serde_yaml::from_str(&interpolate_env(&contents))?;
        let services = match doc.services {
            Some(services) if !services.is_empty() => services,
            _ => return Ok(None),
        };

        let now = chrono::Utc::now();
        let project = Project {
            id: generate_project_id(&abs),
            name: derive_project_name(&abs),
            display_name: None,
            path: abs.parent().map(Path::to_path_buf).unwrap_or_default(),
            compose_file: abs
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            compose_file_path: abs.clone(),
            environment: detect_environment(&abs),
            status: ProjectStatus::Unknown,
            protected: false,
            protection_reason: None,
            hidden: false,
            containers: Vec::<Container>::new(),
            services: services.into_keys().collect(),
            created_at: now,
            updated_at: now,
        };

        self.cache.write().insert(
            abs,
            CachedProject {
                project: project.clone(),
                modified,
                checksum,
            },
        );

        Ok(Some(project))
    }

    fn should_skip(&self, entry: &walkdir::DirEntry) -> bool {
        // A configured root is always entered, whatever its name; the
        // exclusion rules apply to directories found below it.
        if entry.depth() == 0 || !entry.file_type().is_dir() {
            return false;
        }
        let name = entry.file_name().to_string_lossy();
        self.should_exclude_dir(&name)
    }

    /// Hidden directories are always excluded unless allow-listed, regardless
    /// of the exclusion set; everything in the exclusion set is excluded too.
    fn should_exclude_dir(&self, name: &str) -> bool {
        if name.starts_with('.') && name != "." && name != ".." {
            if self.exclude.iter().any(|e| e == name) {
                return true;
            }
            if !HIDDEN_ALLOWLIST.contains(&name) {
                return true;
            }
        }

        self.exclude.iter().any(|e| e == name)
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.paths.read().clone()
    }

    pub fn set_paths(&self, paths: Vec<PathBuf>) {
        *self.paths.write() = paths;
    }

    pub fn clear_cache(&self) {
        self.cache.write().clear();
    }
}

fn is_yaml_file(path: &Path) -> bool {
    matches!(
        path.extension()
            .map(|e| e.to_string_lossy().to_lowercase()),
        Some(ext) if ext == "yml" || ext == "yaml"
    )
}

fn expand_path(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    path.to_path_buf()
}

/// Identity is derived from the definition file's absolute path: stable
/// across content edits, unstable across moves.
fn generate_project_id(path: &Path) -> String {
    let digest = Sha256::digest(path.to_string_lossy().as_bytes());
    hex::encode(&digest[..8])
}

fn derive_project_name(compose_path: &Path) -> String {
    let dir = compose_path
        .parent()
        .and_then(Path::file_name)
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    sanitize_project_name(&dir)
}

/// Renders an arbitrary directory name as a compose-safe slug.
///
/// Lowercase, `[a-z0-9_-]` only, leading `p-` when the name does not start
/// with a letter or digit, trimmed of leading/trailing separators. An empty
/// result falls back to the literal `project`.
pub fn sanitize_project_name(name: &str) -> String {
    let name = name.to_lowercase().replace('.', "-");

    let mut out = String::with_capacity(name.len());
    for (i, c) in name.chars().enumerate() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_' {
            out.push(c);
        } else {
            out.push('-');
        }

        if i == 0 && !(c.is_ascii_lowercase() || c.is_ascii_digit()) {
            out.clear();
            out.push_str("p-");
        }
    }

    let out = out.trim_matches(|c| c == '-' || c == '_');
    if out.is_empty() {
        "project".to_string()
    } else {
        out.to_string()
    }
}

/// Expands `$VAR`, `${VAR}` and `${VAR:-default}` references against the
/// process environment before YAML parsing. `$$` escapes a literal dollar.
/// Unset variables without a default expand to the empty string.
fn interpolate_env(input: &str) -> String {
    interpolate(input, |name| std::env::var(name).ok())
}

fn interpolate(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }

        match chars.peek() {
            Some('$') => {
                chars.next();
                out.push('$');
            }
            Some('{') => {
                chars.next();
                let mut inner = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == '}' {
                        closed = true;
                        break;
                    }
                    inner.push(c);
                }
                if !closed {
                    out.push_str("${");
                    out.push_str(&inner);
                    continue;
                }
                let (name, default) = match inner.split_once(":-") {
                    Some((name, default)) => (name, Some(default)),
                    None => (inner.as_str(), None),
                };
                match lookup(name) {
                    Some(value) => out.push_str(&value),
                    None => out.push_str(default.unwrap_or("")),
                }
            }
            Some(c) if c.is_ascii_alphabetic() || *c == '_' => {
                let mut name = String::new();
                while let Some(c) = chars.peek() {
                    if c.is_ascii_alphanumeric() || *c == '_' {
                        name.push(*c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if let Some(value) = lookup(&name) {
                    out.push_str(&value);
                }
            }
            _ => out.push('$'),
        }
    }

    out
}
