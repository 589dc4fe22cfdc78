//! Invocations of the external `docker compose` binary.
//!
//! Lifecycle operations run against a project's definition file with the
//! file's directory as working directory, so relative paths and `.env` files
//! resolve the way a manual invocation would. The [`ComposeInvoker`] trait is
//! the seam the fleet manager is generic over; tests substitute a recording
//! implementation.

use std::path::Path;
use std::time::Duration;

use tokio::process::Command;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("spawning docker compose: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("compose command failed: {stderr}")]
    CommandFailed { stdout: String, stderr: String },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Captured output of one compose invocation.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ComposeOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

pub trait ComposeInvoker: Send + Sync + 'static {
    /// Runs `docker compose -f <file> <args..>` in the file's directory.
    fn invoke(
        &self,
        compose_path: &Path,
        args: &[&str],
    ) -> impl std::future::Future<Output = Result<ComposeOutput>> + Send;
}

/// Invoker backed by the real `docker` binary.
#[derive(Debug, Clone, Copy, Default)]
pub struct DockerCompose;

impl ComposeInvoker for DockerCompose {
    async fn invoke(&self, compose_path: &Path, args: &[&str]) -> Result<ComposeOutput> {
        let dir = compose_path.parent().unwrap_or_else(|| Path::new("."));
        let file = compose_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "docker-compose.yml".to_string());

        log::debug!("docker compose -f {file} {} in {}", args.join(" "), dir.display());

        let output = Command::new("docker")
            .arg("compose")
            .arg("-f")
            .arg(&file)
            .args(args)
            .current_dir(dir)
            .output()
            .await?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if !output.status.success() {
            return Err(Error::CommandFailed { stdout, stderr });
        }

        Ok(ComposeOutput {
            success: true,
            stdout,
            stderr,
        })
    }
}

pub async fn up(invoker: &impl ComposeInvoker, compose_path: &Path) -> Result<ComposeOutput> {
    invoker
        .invoke(compose_path, &["up", "-d", "--remove-orphans"])
        .await
}

pub async fn down(invoker: &impl ComposeInvoker, compose_path: &Path) -> Result<ComposeOutput> {
    invoker.invoke(compose_path, &["down"]).await
}

pub async fn restart(invoker: &impl ComposeInvoker, compose_path: &Path) -> Result<ComposeOutput> {
    invoker.invoke(compose_path, &["restart"]).await
}

pub async fn pull(invoker: &impl ComposeInvoker, compose_path: &Path) -> Result<ComposeOutput> {
    invoker.invoke(compose_path, &["pull"]).await
}

pub async fn ps(invoker: &impl ComposeInvoker, compose_path: &Path) -> Result<ComposeOutput> {
    invoker
        .invoke(compose_path, &["ps", "--format", "json"])
        .await
}

pub async fn logs(
    invoker: &impl ComposeInvoker,
    compose_path: &Path,
    tail: &str,
) -> Result<ComposeOutput> {
    invoker
        .invoke(compose_path, &["logs", "--tail", tail, "--no-color"])
        .await
}

pub async fn config(invoker: &impl ComposeInvoker, compose_path: &Path) -> Result<ComposeOutput> {
    invoker.invoke(compose_path, &["config"]).await
}

#[derive(serde::Deserialize)]
struct ResolvedConfig {
    #[serde(default)]
    name: String,
}

/// Resolves the project name compose will actually use for grouping, which an
/// explicit `name:` key or env interpolation can make differ from the
/// directory name. Falls back to the directory name when resolution fails or
/// takes longer than five seconds.
pub async fn resolved_project_name(
    invoker: &impl ComposeInvoker,
    compose_path: &Path,
) -> String {
    let fallback = || {
        compose_path
            .parent()
            .and_then(Path::file_name)
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    };

    let resolve = invoker.invoke(compose_path, &["config", "--format", "json"]);
    match tokio::time::timeout(Duration::from_secs(5), resolve).await {
        Ok(Ok(output)) => match serde_json::from_str::<ResolvedConfig>(&output.stdout) {
            Ok(config) if !config.name.is_empty() => config.name,
            _ => fallback(),
        },
        Ok(Err(err)) => {
            log::debug!(
                "resolving project name for {}: {err}",
                compose_path.display()
            );
            fallback()
        }
        Err(_) => {
            log::debug!(
                "resolving project name for {} timed out",
                compose_path.display()
            );
            fallback()
        }
    }
}

pub async fn is_compose_installed() -> bool {
    Command::new("docker")
        .args(["compose", "version"])
        .output()
        .await
        .map(|output| output.status.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct RecordingInvoker {
        calls: Mutex<Vec<(PathBuf, Vec<String>)>>,
        stdout: String,
        fail: bool,
        delay: Option<Duration>,
    }

    impl RecordingInvoker {
        fn with_stdout(stdout: &str) -> Self {
            Self {
                stdout: stdout.to_string(),
                ..Default::default()
            }
        }

        fn last_args(&self) -> Vec<String> {
            self.calls.lock().unwrap().last().unwrap().1.clone()
        }
    }

    impl ComposeInvoker for RecordingInvoker {
        async fn invoke(&self, compose_path: &Path, args: &[&str]) -> Result<ComposeOutput> {
            self.calls.lock().unwrap().push((
                compose_path.to_path_buf(),
                args.iter().map(|a| a.to_string()).collect(),
            ));
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                return Err(Error::CommandFailed {
                    stdout: String::new(),
                    stderr: "boom".to_string(),
                });
            }
            Ok(ComposeOutput {
                success: true,
                stdout: self.stdout.clone(),
                stderr: String::new(),
            })
        }
    }

    #[tokio::test]
    async fn test_subcommand_arguments() {
        let invoker = RecordingInvoker::default();
        let path = Path::new("/srv/app/docker-compose.yml");

        up(&invoker, path).await.unwrap();
        assert_eq!(invoker.last_args(), ["up", "-d", "--remove-orphans"]);

        down(&invoker, path).await.unwrap();
        assert_eq!(invoker.last_args(), ["down"]);

        restart(&invoker, path).await.unwrap();
        assert_eq!(invoker.last_args(), ["restart"]);

        pull(&invoker, path).await.unwrap();
        assert_eq!(invoker.last_args(), ["pull"]);

        ps(&invoker, path).await.unwrap();
        assert_eq!(invoker.last_args(), ["ps", "--format", "json"]);

        logs(&invoker, path, "200").await.unwrap();
        assert_eq!(invoker.last_args(), ["logs", "--tail", "200", "--no-color"]);

        config(&invoker, path).await.unwrap();
        assert_eq!(invoker.last_args(), ["config"]);
    }

    #[tokio::test]
    async fn test_resolved_project_name() {
        let invoker = RecordingInvoker::with_stdout(r#"{"name":"custom-stack","services":{}}"#);
        let name =
            resolved_project_name(&invoker, Path::new("/srv/app/docker-compose.yml")).await;
        assert_eq!(name, "custom-stack");
        assert_eq!(invoker.last_args(), ["config", "--format", "json"]);
    }

    #[tokio::test]
    async fn test_resolved_project_name_falls_back_to_directory() {
        let invoker = RecordingInvoker {
            fail: true,
            ..Default::default()
        };
        let name =
            resolved_project_name(&invoker, Path::new("/srv/app/docker-compose.yml")).await;
        assert_eq!(name, "app");

        let invoker = RecordingInvoker::with_stdout("not json");
        let name =
            resolved_project_name(&invoker, Path::new("/srv/app/docker-compose.yml")).await;
        assert_eq!(name, "app");
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolved_project_name_times_out() {
        let invoker = RecordingInvoker {
            stdout: r#"{"name":"slow"}"#.to_string(),
            delay: Some(Duration::from_secs(30)),
            ..Default::default()
        };
        let name =
            resolved_project_name(&invoker, Path::new("/srv/app/docker-compose.yml")).await;
        assert_eq!(name, "app");
    }
}
