//! Per-cluster fan-out.
//!
//! Every command that touches clusters runs the same workflow once per
//! cluster index, concurrently. One cluster failing never stops the others;
//! the caller only learns that *some* cluster failed; the details are in
//! the log lines, each tagged with its cluster index.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, error, Instrument};

use crate::cluster::{ClusterInfo, ClusterNumber};
use crate::config::Config;
use crate::context::RunContext;
use crate::error::{Error, Result};

/// The one lock shared by all cluster workflows of a run.
///
/// Held around steps that mutate state shared between clusters, such as
/// pushing to the GitOps repository.
#[derive(Debug, Clone, Default)]
pub struct FleetLock(Arc<Mutex<()>>);

impl FleetLock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self) -> MutexGuard<'_, ()> {
        self.0.lock().await
    }
}

/// Run `f` for every cluster index in `1..=count` and wait for all of them.
///
/// # Errors
///
/// Returns [`Error::ClustersFailed`] if any invocation failed or panicked.
pub async fn fan_out<F, Fut>(ctx: &RunContext, count: u16, f: F) -> Result<()>
where
    F: Fn(RunContext, ClusterNumber) -> Fut,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let mut handles = Vec::with_capacity(usize::from(count));
    for index in ClusterNumber::range(count) {
        let cluster_ctx = ctx.for_cluster(index);
        let span = cluster_ctx.span().clone();
        let work = f(cluster_ctx, index);
        let task = async move {
            let result = work.await;
            if let Err(e) = &result {
                error!(error = %e, "Cluster workflow failed");
            }
            result
        };
        handles.push((index, tokio::spawn(task.instrument(span))));
    }

    let mut failed = 0usize;
    for (index, handle) in handles {
        match handle.await {
            Ok(Ok(())) => debug!(cluster = %index, "Cluster workflow finished"),
            Ok(Err(_)) => failed += 1,
            Err(e) => {
                error!(cluster = %index, error = %e, "Cluster workflow panicked");
                failed += 1;
            }
        }
    }

    if failed > 0 {
        error!(failed, total = count, "Not all clusters succeeded");
        return Err(Error::ClustersFailed);
    }
    Ok(())
}

/// [`fan_out`] over the configured fleet, handing each workflow its
/// [`ClusterInfo`].
///
/// # Errors
///
/// Returns [`Error::ClustersFailed`] if any workflow failed.
pub async fn for_each_cluster<F, Fut>(ctx: &RunContext, config: &Arc<Config>, f: F) -> Result<()>
where
    F: Fn(RunContext, ClusterInfo) -> Fut,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    fan_out(ctx, config.clusters, |ctx, index| {
        f(ctx, ClusterInfo::new(Arc::clone(config), index))
    })
    .await
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use super::*;

    fn ctx() -> RunContext {
        RunContext::new(false, "/tmp").unwrap()
    }

    #[tokio::test]
    async fn test_one_failure_does_not_stop_the_others() {
        let ran = Arc::new(StdMutex::new(Vec::new()));
        let result = fan_out(&ctx(), 5, |_, index| {
            let ran = Arc::clone(&ran);
            async move {
                if index.get() == 3 {
                    return Err(Error::provider("boom"));
                }
                // give the failing task a head start
                tokio::time::sleep(Duration::from_millis(20)).await;
                ran.lock().unwrap().push(index.get());
                Ok(())
            }
        })
        .await;

        assert!(matches!(result, Err(Error::ClustersFailed)));
        let mut ran = ran.lock().unwrap().clone();
        ran.sort_unstable();
        assert_eq!(ran, vec![1, 2, 4, 5]);
    }

    #[tokio::test]
    async fn test_every_index_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(StdMutex::new(Vec::new()));
        fan_out(&ctx(), 4, |ctx, index| {
            let calls = Arc::clone(&calls);
            let seen = Arc::clone(&seen);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                seen.lock().unwrap().push((ctx.cluster(), index));
                Ok(())
            }
        })
        .await
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        let mut seen = seen.lock().unwrap().clone();
        seen.sort_by_key(|(_, i)| *i);
        for (n, (scoped, index)) in seen.into_iter().enumerate() {
            assert_eq!(index.get() as usize, n + 1);
            assert_eq!(scoped, Some(index));
        }
    }

    #[tokio::test]
    async fn test_empty_fleet_succeeds() {
        let calls = Arc::new(AtomicUsize::new(0));
        fan_out(&ctx(), 0, |_, _| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await
        .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_panic_counts_as_failure() {
        let result = fan_out(&ctx(), 2, |_, index| async move {
            assert!(index.get() != 2, "cluster 2 explodes");
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(Error::ClustersFailed)));
    }

    #[tokio::test]
    async fn test_fleet_lock_serializes() {
        let lock = FleetLock::new();
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        fan_out(&ctx(), 6, |_, _| {
            let lock = lock.clone();
            let inside = Arc::clone(&inside);
            let max_seen = Arc::clone(&max_seen);
            async move {
                let _guard = lock.lock().await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await
        .unwrap();
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_for_each_cluster_builds_infos() {
        let config = Arc::new(Config {
            clusters: 3,
            root_domain: "workshop.example.com".into(),
            ..Config::default()
        });
        let domains = Arc::new(StdMutex::new(Vec::new()));
        for_each_cluster(&ctx(), &config, |_, info| {
            let domains = Arc::clone(&domains);
            async move {
                domains.lock().unwrap().push(info.domain());
                Ok(())
            }
        })
        .await
        .unwrap();
        let mut domains = domains.lock().unwrap().clone();
        domains.sort();
        assert_eq!(
            domains,
            vec![
                "cluster-01.workshop.example.com",
                "cluster-02.workshop.example.com",
                "cluster-03.workshop.example.com"
            ]
        );
    }
}
