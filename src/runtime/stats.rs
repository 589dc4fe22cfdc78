//! Derived resource metrics from the daemon's raw cumulative counters.
//!
//! CPU percentages need two samples. One-shot reads keep the previous sample
//! per container in a shared map, so the first read after startup reports 0%
//! and subsequent reads report real deltas. Streamed reads keep their
//! previous sample locally instead and never touch the shared map.

use bollard::Docker;
use bollard::container::{Stats, StatsOptions};
use chrono::Utc;
use dashmap::DashMap;
use futures::StreamExt;
use tokio::sync::mpsc;

use crate::model::ContainerStats;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("fetching stats for {id}: {source}")]
    Fetch {
        id: String,
        #[source]
        source: bollard::errors::Error,
    },
    #[error("stats stream for {0} ended before the first sample")]
    NoSample(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// The handful of counters the derivations need, lifted out of the daemon's
/// bulky stats payload.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Sample {
    cpu_total: u64,
    system_cpu: u64,
    online_cpus: u64,
    percpu_len: usize,
    memory_usage: u64,
    memory_limit: u64,
    pids: u64,
    network_rx: u64,
    network_tx: u64,
    block_read: u64,
    block_write: u64,
}

impl Sample {
    fn from_stats(stats: &Stats) -> Self {
        let (network_rx, network_tx) = stats
            .networks
            .as_ref()
            .map(|interfaces| {
                interfaces
                    .values()
                    .fold((0, 0), |(rx, tx), net| (rx + net.rx_bytes, tx + net.tx_bytes))
            })
            .unwrap_or_default();

        let (block_read, block_write) = stats
            .blkio_stats
            .io_service_bytes_recursive
            .as_ref()
            .map(|entries| sum_block_io(entries.iter().map(|e| (e.op.as_str(), e.value))))
            .unwrap_or_default();

        Self {
            cpu_total: stats.cpu_stats.cpu_usage.total_usage,
            system_cpu: stats.cpu_stats.system_cpu_usage.unwrap_or(0),
            online_cpus: stats.cpu_stats.online_cpus.unwrap_or(0),
            percpu_len: stats
                .cpu_stats
                .cpu_usage
                .percpu_usage
                .as_ref()
                .map_or(0, Vec::len),
            memory_usage: stats.memory_stats.usage.unwrap_or(0),
            memory_limit: stats.memory_stats.limit.unwrap_or(0),
            pids: stats.pids_stats.current.unwrap_or(0),
            network_rx,
            network_tx,
            block_read,
            block_write,
        }
    }
}

fn sum_block_io<'a>(entries: impl Iterator<Item = (&'a str, u64)>) -> (u64, u64) {
    let mut read = 0;
    let mut write = 0;
    for (op, value) in entries {
        if op.eq_ignore_ascii_case("read") {
            read += value;
        } else if op.eq_ignore_ascii_case("write") {
            write += value;
        }
    }
    (read, write)
}

fn compute_cpu_percent(prev: Option<&Sample>, curr: &Sample) -> f64 {
    let Some(prev) = prev else { return 0.0 };

    let cpu_delta = curr.cpu_total.saturating_sub(prev.cpu_total);
    let system_delta = curr.system_cpu.saturating_sub(prev.system_cpu);
    if cpu_delta == 0 || system_delta == 0 || curr.system_cpu < prev.system_cpu {
        return 0.0;
    }

    let mut cpus = curr.online_cpus as f64;
    if cpus == 0.0 {
        cpus = curr.percpu_len as f64;
    }
    if cpus == 0.0 {
        cpus = 1.0;
    }

    cpu_delta as f64 / system_delta as f64 * cpus * 100.0
}

fn derive(prev: Option<&Sample>, curr: &Sample) -> ContainerStats {
    let memory_percent = if curr.memory_limit > 0 {
        curr.memory_usage as f64 / curr.memory_limit as f64 * 100.0
    } else {
        0.0
    };

    ContainerStats {
        cpu_percent: compute_cpu_percent(prev, curr),
        memory_usage: curr.memory_usage,
        memory_limit: curr.memory_limit,
        memory_percent,
        network_rx: curr.network_rx,
        network_tx: curr.network_tx,
        block_read: curr.block_read,
        block_write: curr.block_write,
        pids: curr.pids,
        timestamp: Utc::now(),
    }
}

pub struct StatsEngine {
    docker: Docker,
    previous: DashMap<String, Sample>,
}

impl StatsEngine {
    pub fn new(docker: Docker) -> Self {
        Self {
            docker,
            previous: DashMap::new(),
        }
    }

    /// One-shot read. The previous sample for the container is replaced, so
    /// the reported CPU percentage covers the interval since the last call.
    pub async fn get_stats(&self, container_id: &str) -> Result<ContainerStats> {
        let options = StatsOptions {
            stream: false,
            one_shot: false,
        };
        let mut stream = self.docker.stats(container_id, Some(options));
        let raw = stream
            .next()
            .await
            .ok_or_else(|| Error::NoSample(container_id.to_string()))?
            .map_err(|source| Error::Fetch {
                id: container_id.to_string(),
                source,
            })?;

        let sample = Sample::from_stats(&raw);
        let prev = self.previous.insert(container_id.to_string(), sample);
        Ok(derive(prev.as_ref(), &sample))
    }

    /// Continuous stream of derived stats. Ends when the container stops,
    /// when the daemon reports an error (reported once on the channel) or
    /// when the receiver is dropped.
    pub fn stream_stats(&self, container_id: &str) -> mpsc::Receiver<Result<ContainerStats>> {
        let (tx, rx) = mpsc::channel(16);
        let docker = self.docker.clone();
        let id = container_id.to_string();

        tokio::spawn(async move {
            let options = StatsOptions {
                stream: true,
                one_shot: false,
            };
            let mut stream = docker.stats(&id, Some(options));
            let mut prev: Option<Sample> = None;

            while let Some(item) = stream.next().await {
                match item {
                    Ok(raw) => {
                        let sample = Sample::from_stats(&raw);
                        let derived = derive(prev.as_ref(), &sample);
                        prev = Some(sample);
                        if tx.send(Ok(derived)).await.is_err() {
                            return;
                        }
                    }
                    Err(source) => {
                        let _ = tx
                            .send(Err(Error::Fetch {
                                id: id.clone(),
                                source,
                            }))
                            .await;
                        return;
                    }
                }
            }
        });

        rx
    }

    /// Drops the stored previous sample, typically after a container restart
    /// when its counters reset.
    pub fn clear_previous_stats(&self, container_id: &str) {
        self.previous.remove(container_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(cpu_total: u64, system_cpu: u64) -> Sample {
        Sample {
            cpu_total,
            system_cpu,
            online_cpus: 4,
            ..Default::default()
        }
    }

    #[test]
    fn test_cpu_percent_requires_previous_sample() {
        assert_eq!(compute_cpu_percent(None, &sample(500, 10_000)), 0.0);
    }

    #[test]
    fn test_cpu_percent_delta() {
        let prev = sample(1_000, 10_000);
        let curr = sample(1_500, 20_000);
        // 500 / 10_000 * 4 cpus * 100
        let pct = compute_cpu_percent(Some(&prev), &curr);
        assert!((pct - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_cpu_percent_zero_on_non_positive_system_delta() {
        let prev = sample(1_000, 20_000);
        assert_eq!(compute_cpu_percent(Some(&prev), &sample(1_500, 20_000)), 0.0);
        assert_eq!(compute_cpu_percent(Some(&prev), &sample(1_500, 10_000)), 0.0);
    }

    #[test]
    fn test_cpu_count_fallbacks() {
        let prev = Sample {
            cpu_total: 1_000,
            system_cpu: 10_000,
            ..Default::default()
        };
        let mut curr = Sample {
            cpu_total: 2_000,
            system_cpu: 20_000,
            percpu_len: 2,
            ..Default::default()
        };
        let pct = compute_cpu_percent(Some(&prev), &curr);
        assert!((pct - 20.0).abs() < 1e-9);

        curr.percpu_len = 0;
        let pct = compute_cpu_percent(Some(&prev), &curr);
        assert!((pct - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_memory_percent() {
        let curr = Sample {
            memory_usage: 256,
            memory_limit: 1_024,
            ..Default::default()
        };
        let stats = derive(None, &curr);
        assert!((stats.memory_percent - 25.0).abs() < 1e-9);

        let unlimited = Sample::default();
        assert_eq!(derive(None, &unlimited).memory_percent, 0.0);
    }

    #[test]
    fn test_block_io_op_case_insensitive() {
        let entries = [("Read", 100u64), ("WRITE", 50), ("read", 10), ("discard", 5)];
        let (read, write) = sum_block_io(entries.iter().copied());
        assert_eq!(read, 110);
        assert_eq!(write, 50);
    }
}
