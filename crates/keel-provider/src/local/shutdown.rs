use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{info, warn};

use super::LocalProvider;
use crate::error::ProviderResult;
use crate::provider::ShutdownReport;

impl LocalProvider {
    /// Stop every container labelled with this rack, one task per
    /// container, and wait for all of them.
    pub(super) async fn stop_rack(&self) -> ProviderResult<ShutdownReport> {
        let ids = self.runtime.list_by_labels(&self.rack_labels()).await?;
        info!(rack = %self.config.name, count = ids.len(), "stopping rack processes");

        let mut tasks = JoinSet::new();
        for id in ids {
            let runtime = Arc::clone(&self.runtime);
            tasks.spawn(async move {
                let result = runtime.stop(&id).await;
                (id, result)
            });
        }

        let mut report = ShutdownReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((id, Ok(()))) => report.stopped.push(id),
                Ok((id, Err(e))) => {
                    warn!(%id, error = %e, "stop failed during shutdown");
                    report.failed.push((id, e.to_string()));
                }
                Err(e) => {
                    warn!(error = %e, "stop task panicked");
                    report.failed.push((String::new(), e.to_string()));
                }
            }
        }

        info!(
            stopped = report.stopped.len(),
            failed = report.failed.len(),
            "rack processes stopped"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::harness_with;
    use crate::provider::Provider;
    use keel_container::RunSpec;
    use keel_container::fake::FakeRuntime;
    use std::time::{Duration, Instant};

    #[tokio::test]
    async fn stops_every_rack_process_before_returning() {
        let h = harness_with(FakeRuntime::new().with_stop_delay(10..120));
        let mut seeded = Vec::new();
        for i in 0..12 {
            seeded.push(h.runtime.seed(
                RunSpec::new("web:latest")
                    .label("keel.rack", "keel")
                    .label("keel.app", format!("app{i}")),
            ));
        }

        let report = h.provider.shutdown().await.unwrap();

        assert!(report.is_clean());
        assert_eq!(report.stopped.len(), 12);
        assert_eq!(h.runtime.running_count(), 0);
        let mut stopped = report.stopped.clone();
        stopped.sort();
        seeded.sort();
        assert_eq!(stopped, seeded);
    }

    #[tokio::test]
    async fn stops_run_in_parallel() {
        let h = harness_with(FakeRuntime::new().with_stop_delay(200..201));
        for _ in 0..8 {
            h.runtime
                .seed(RunSpec::new("web:latest").label("keel.rack", "keel"));
        }

        let started = Instant::now();
        let report = h.provider.shutdown().await.unwrap();

        assert_eq!(report.stopped.len(), 8);
        assert!(started.elapsed() < Duration::from_millis(8 * 200));
    }

    #[tokio::test]
    async fn other_racks_are_left_alone() {
        let h = harness_with(FakeRuntime::new());
        h.runtime.seed(RunSpec::new("web:latest").label("keel.rack", "keel"));
        let foreign = h.runtime.seed(RunSpec::new("db:latest").label("keel.rack", "staging"));
        h.runtime.seed(RunSpec::new("unlabelled"));

        let report = h.provider.shutdown().await.unwrap();

        assert_eq!(report.stopped.len(), 1);
        assert!(!report.stopped.contains(&foreign));
        assert_eq!(h.runtime.running_count(), 2);
    }

    #[tokio::test]
    async fn empty_rack_shuts_down_cleanly() {
        let h = harness_with(FakeRuntime::new());
        let report = h.provider.shutdown().await.unwrap();
        assert!(report.stopped.is_empty());
        assert!(report.is_clean());
    }
}
