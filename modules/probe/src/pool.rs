//! Fixed-width worker pool draining a bounded queue of probe tasks.

use std::collections::HashMap;
use std::sync::Arc;
use svcscan_core::{ProbeOutcome, Protocol};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio::time::{timeout_at, Instant};
use tracing::debug;

use crate::{ProbeTask, Prober};

#[derive(Debug, Clone, Copy)]
pub struct PoolOptions {
    /// Number of workers, i.e. the maximum number of probes in flight.
    pub width: usize,
    /// Global scan deadline. Probes still running are abandoned as timeouts.
    pub deadline: Option<Instant>,
}

impl Default for PoolOptions {
    fn default() -> Self {
        PoolOptions { width: 10, deadline: None }
    }
}

/// Probe every task with at most `opts.width` probes in flight. Results
/// arrive in completion order and are returned keyed by task.
pub async fn run_pool(prober: Arc<Prober>, tasks: Vec<ProbeTask>, opts: PoolOptions) -> HashMap<ProbeTask, ProbeOutcome> {
    let width = opts.width.max(1);
    let total = tasks.len();
    let (task_tx, task_rx) = mpsc::channel::<ProbeTask>(width);
    let task_rx = Arc::new(Mutex::new(task_rx));
    let (res_tx, mut res_rx) = mpsc::unbounded_channel::<(ProbeTask, ProbeOutcome)>();

    let mut workers = JoinSet::new();
    for _ in 0..width.min(total.max(1)) {
        let rx = task_rx.clone();
        let tx = res_tx.clone();
        let prober = prober.clone();
        let deadline = opts.deadline;
        workers.spawn(async move {
            loop {
                let next = rx.lock().await.recv().await;
                let Some(task) = next else { break };
                let outcome = run_one(&prober, task, deadline).await;
                if tx.send((task, outcome)).is_err() {
                    break;
                }
            }
        });
    }
    drop(res_tx);

    // the queue holds `width` tasks; the producer waits while it is full
    let producer = tokio::spawn(async move {
        for t in tasks {
            if task_tx.send(t).await.is_err() {
                break;
            }
        }
    });

    let mut out = HashMap::with_capacity(total);
    while let Some((task, outcome)) = res_rx.recv().await {
        out.insert(task, outcome);
    }
    let _ = producer.await;
    while workers.join_next().await.is_some() {}
    debug!(tasks = total, completed = out.len(), "probe pool drained");
    out
}

async fn run_one(prober: &Prober, task: ProbeTask, deadline: Option<Instant>) -> ProbeOutcome {
    if task.protocol == Protocol::Udp {
        return ProbeOutcome::unprobed(Protocol::Udp);
    }
    let Some(deadline) = deadline else { return prober.probe(task).await };
    let started = Instant::now();
    if started >= deadline {
        return ProbeOutcome::abandoned(task.protocol, 0);
    }
    match timeout_at(deadline, prober.probe(task)).await {
        Ok(outcome) => outcome,
        Err(_) => {
            debug!(port = task.port, "probe abandoned at scan deadline");
            ProbeOutcome::abandoned(task.protocol, started.elapsed().as_millis() as u64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTransport;
    use crate::ProbeOptions;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use svcscan_core::ProbeStatus;

    fn tasks(n: u16) -> Vec<ProbeTask> {
        (1..=n).map(|port| ProbeTask { host: IpAddr::V4(Ipv4Addr::LOCALHOST), port, protocol: Protocol::Tcp }).collect()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn in_flight_never_exceeds_width() {
        let mock = Arc::new(MockTransport { delay: Duration::from_millis(15), ..Default::default() });
        let prober = Arc::new(Prober::new(mock.clone(), ProbeOptions::default()));
        let out = run_pool(prober, tasks(40), PoolOptions { width: 3, deadline: None }).await;
        assert_eq!(out.len(), 40);
        assert_eq!(mock.connects.load(Ordering::SeqCst), 40);
        let max = mock.max_in_flight.load(Ordering::SeqCst);
        assert!(max <= 3, "max in flight was {max}");
        assert!(max >= 1);
    }

    #[tokio::test]
    async fn deadline_abandons_probes_as_timeouts() {
        let mock = Arc::new(MockTransport { delay: Duration::from_millis(300), ..Default::default() });
        let prober = Arc::new(Prober::new(mock, ProbeOptions::default()));
        let deadline = Instant::now() + Duration::from_millis(50);
        let out = run_pool(prober, tasks(6), PoolOptions { width: 2, deadline: Some(deadline) }).await;
        assert_eq!(out.len(), 6);
        assert!(out.values().all(|o| o.status == Some(ProbeStatus::Timeout)));
    }

    #[tokio::test]
    async fn udp_tasks_pass_through() {
        let mock = Arc::new(MockTransport::default());
        let prober = Arc::new(Prober::new(mock.clone(), ProbeOptions::default()));
        let t = ProbeTask { host: IpAddr::V4(Ipv4Addr::LOCALHOST), port: 53, protocol: Protocol::Udp };
        let out = run_pool(prober, vec![t], PoolOptions::default()).await;
        assert_eq!(out[&t].status, None);
        assert_eq!(mock.connects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_task_list() {
        let prober = Arc::new(Prober::new(Arc::new(MockTransport::default()), ProbeOptions::default()));
        assert!(run_pool(prober, Vec::new(), PoolOptions::default()).await.is_empty());
    }
}
