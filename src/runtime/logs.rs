//! Container log retrieval and following.
//!
//! Containers allocated a TTY deliver one merged stream; everything lands on
//! stdout. Without a TTY the daemon multiplexes stdout and stderr into typed
//! frames, which are routed onto separate channels so callers can keep the
//! two apart.

use bollard::Docker;
use bollard::container::{LogOutput, LogsOptions};
use futures::StreamExt;
use tokio::sync::mpsc;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("inspecting container {id}: {source}")]
    Inspect {
        id: String,
        #[source]
        source: bollard::errors::Error,
    },
    #[error("fetching logs for {id}: {source}")]
    Fetch {
        id: String,
        #[source]
        source: bollard::errors::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

const DEFAULT_TAIL: &str = "100";
const FOLLOW_TAIL: &str = "50";

/// Collected logs of one container, split by stream.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct LogBundle {
    pub stdout: String,
    pub stderr: String,
}

/// Receivers for a followed log stream. Dropping either receiver cancels the
/// whole stream.
pub struct LogChannels {
    pub stdout: mpsc::Receiver<String>,
    pub stderr: mpsc::Receiver<String>,
}

pub struct LogStream {
    docker: Docker,
}

impl LogStream {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    async fn is_tty(&self, container_id: &str) -> Result<bool> {
        let info = self
            .docker
            .inspect_container(container_id, None)
            .await
            .map_err(|source| Error::Inspect {
                id: container_id.to_string(),
                source,
            })?;
        Ok(info.config.and_then(|c| c.tty).unwrap_or(false))
    }

    /// Fetches the last `tail` lines (default 100) with timestamps.
    pub async fn get_logs(&self, container_id: &str, tail: Option<&str>) -> Result<LogBundle> {
        let tty = self.is_tty(container_id).await?;
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            timestamps: true,
            tail: tail.unwrap_or(DEFAULT_TAIL).to_string(),
            ..Default::default()
        };

        let mut stream = self.docker.logs(container_id, Some(options));
        let mut bundle = LogBundle::default();
        while let Some(frame) = stream.next().await {
            let frame = frame.map_err(|source| Error::Fetch {
                id: container_id.to_string(),
                source,
            })?;
            route_frame(&mut bundle, tty, frame);
        }

        Ok(bundle)
    }

    /// Follows the log stream, seeded with the last `tail` lines (default 50).
    /// The reader task stops when the container exits, the daemon errors or a
    /// receiver is dropped.
    pub async fn stream_logs(
        &self,
        container_id: &str,
        tail: Option<&str>,
    ) -> Result<LogChannels> {
        let tty = self.is_tty(container_id).await?;
        let options = LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            timestamps: true,
            tail: tail.unwrap_or(FOLLOW_TAIL).to_string(),
            ..Default::default()
        };

        let (out_tx, out_rx) = mpsc::channel(100);
        let (err_tx, err_rx) = mpsc::channel(100);
        let mut stream = self.docker.logs(container_id, Some(options));
        let id = container_id.to_string();

        tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                let frame = match frame {
                    Ok(frame) => frame,
                    Err(err) => {
                        log::debug!("log stream for {id} ended: {err}");
                        return;
                    }
                };

                let (to_stderr, message) = split_frame(tty, frame);
                let Some(message) = message else { continue };
                let tx = if to_stderr { &err_tx } else { &out_tx };
                if tx.send(message).await.is_err() {
                    return;
                }
            }
        });

        Ok(LogChannels {
            stdout: out_rx,
            stderr: err_rx,
        })
    }
}

fn route_frame(bundle: &mut LogBundle, tty: bool, frame: LogOutput) {
    let (to_stderr, message) = split_frame(tty, frame);
    let Some(message) = message else { return };
    if to_stderr {
        bundle.stderr.push_str(&message);
    } else {
        bundle.stdout.push_str(&message);
    }
}

/// Routing decision for one frame: `(goes_to_stderr, text)`. Stdin echo
/// frames are dropped; under a TTY everything counts as stdout.
fn split_frame(tty: bool, frame: LogOutput) -> (bool, Option<String>) {
    match frame {
        LogOutput::StdIn { .. } => (false, None),
        LogOutput::StdErr { message } if !tty => {
            (true, Some(String::from_utf8_lossy(&message).into_owned()))
        }
        LogOutput::StdOut { message }
        | LogOutput::StdErr { message }
        | LogOutput::Console { message } => {
            (false, Some(String::from_utf8_lossy(&message).into_owned()))
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    #[test]
    fn test_multiplexed_frames_route_by_stream() {
        let mut bundle = LogBundle::default();
        route_frame(
            &mut bundle,
            false,
            LogOutput::StdOut {
                message: Bytes::from("out line\n"),
            },
        );
        route_frame(
            &mut bundle,
            false,
            LogOutput::StdErr {
                message: Bytes::from("err line\n"),
            },
        );
        assert_eq!(bundle.stdout, "out line\n");
        assert_eq!(bundle.stderr, "err line\n");
    }

    #[test]
    fn test_tty_frames_merge_onto_stdout() {
        let mut bundle = LogBundle::default();
        route_frame(
            &mut bundle,
            true,
            LogOutput::Console {
                message: Bytes::from("merged\n"),
            },
        );
        route_frame(
            &mut bundle,
            true,
            LogOutput::StdErr {
                message: Bytes::from("also merged\n"),
            },
        );
        assert_eq!(bundle.stdout, "merged\nalso merged\n");
        assert!(bundle.stderr.is_empty());
    }

    #[test]
    fn test_stdin_frames_dropped() {
        let mut bundle = LogBundle::default();
        route_frame(
            &mut bundle,
            false,
            LogOutput::StdIn {
                message: Bytes::from("typed\n"),
            },
        );
        assert!(bundle.stdout.is_empty());
        assert!(bundle.stderr.is_empty());
    }
}
