use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use crate::config::SnapshotConfig;
use crate::export::Exporter;
use crate::graph::Graph;
use crate::{MonitorError, Result};

/// Periodic render, export and reset of the shared graph.
///
/// This is the only place the graph is ever reset.
pub struct SnapshotScheduler {
    graph: Arc<Graph>,
    interval: Duration,
    exporter: Option<Exporter>,
}

impl SnapshotScheduler {
    pub fn new(graph: Arc<Graph>, config: &SnapshotConfig) -> Self {
        let exporter = config
            .export_enabled
            .then(|| Exporter::from_config(config));

        Self::with_exporter(graph, Duration::from_secs(config.interval_secs), exporter)
    }

    pub fn with_exporter(
        graph: Arc<Graph>,
        interval: Duration,
        exporter: Option<Exporter>,
    ) -> Self {
        Self {
            graph,
            interval,
            exporter,
        }
    }

    /// Wait for the capture pipeline to come up, then cycle until an export fails.
    pub async fn run(self, ready: oneshot::Receiver<()>) -> Result<()> {
        if ready.await.is_err() {
            return Err(MonitorError::PipelineNotReady);
        }

        log::info!(
            "Snapshot cycle running every {}s (export {})",
            self.interval.as_secs(),
            match self.exporter {
                Some(ref exporter) => format!("to {}", exporter.dir().display()),
                None => "disabled".to_string(),
            }
        );

        loop {
            tokio::time::sleep(self.interval).await;
            self.run_cycle()?;
        }
    }

    /// One render, optional export, reset step. An export failure skips the reset.
    pub fn run_cycle(&self) -> Result<Option<PathBuf>> {
        // Render before logging so the read lock is not held across logger I/O.
        let rendered = self.graph.render();
        log::info!(
            "Dependency graph at {}:\n{}",
            Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
            rendered
        );

        let exported = match self.exporter {
            Some(ref exporter) => {
                let path = exporter.export_graph(&self.graph)?;
                log::debug!("Exported graph snapshot to {}", path.display());
                Some(path)
            }
            None => None,
        };

        self.graph.reset();
        Ok(exported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Edge, GraphSnapshot, Node};

    fn populated_graph() -> Arc<Graph> {
        let graph = Arc::new(Graph::new());
        graph.add_node(Node::new("10.0.0.1"));
        graph.add_edge(Edge {
            source_address: "10.0.0.1".to_string(),
            dest_address: "10.0.0.2".to_string(),
            source_port: 443,
            dest_port: 51000,
            protocol: "TCP".to_string(),
            length: 60,
        });
        graph
    }

    fn idle_scheduler(graph: Arc<Graph>) -> SnapshotScheduler {
        SnapshotScheduler::with_exporter(graph, Duration::from_secs(30), None)
    }

    #[test]
    fn test_cycle_without_export_resets() {
        let graph = populated_graph();
        let scheduler = idle_scheduler(Arc::clone(&graph));

        let exported = tokio_test::assert_ok!(scheduler.run_cycle());
        assert_eq!(exported, None);
        assert_eq!(graph.node_count(), 0);
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn test_cycle_exports_before_reset() {
        let dir = tempfile::tempdir().unwrap();
        let graph = populated_graph();
        let scheduler = SnapshotScheduler::with_exporter(
            Arc::clone(&graph),
            Duration::from_secs(30),
            Some(Exporter::new(dir.path())),
        );

        let path = scheduler.run_cycle().unwrap().unwrap();
        let snapshot: GraphSnapshot =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(snapshot.nodes.len(), 1);
        assert_eq!(snapshot.edges.len(), 1);
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn test_failed_export_skips_reset() {
        let dir = tempfile::tempdir().unwrap();
        let graph = populated_graph();
        let scheduler = SnapshotScheduler::with_exporter(
            Arc::clone(&graph),
            Duration::from_secs(30),
            Some(Exporter::new(dir.path().join("missing"))),
        );

        assert!(matches!(scheduler.run_cycle(), Err(MonitorError::Io(_))));
        assert_eq!(graph.edge_count(), 1);
    }

    #[tokio::test]
    async fn test_dropped_readiness_signal_is_an_error() {
        let (ready_tx, ready_rx) = oneshot::channel();
        drop(ready_tx);

        let scheduler = idle_scheduler(populated_graph());
        assert!(matches!(
            scheduler.run(ready_rx).await,
            Err(MonitorError::PipelineNotReady)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_until_ready() {
        let graph = populated_graph();
        let (ready_tx, ready_rx) = oneshot::channel();
        let scheduler = idle_scheduler(Arc::clone(&graph));
        let handle = tokio::spawn(scheduler.run(ready_rx));

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(graph.edge_count(), 1);

        ready_tx.send(()).unwrap();
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(graph.edge_count(), 0);

        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_resets_every_interval() {
        let graph = populated_graph();
        let (ready_tx, ready_rx) = oneshot::channel();
        let scheduler = idle_scheduler(Arc::clone(&graph));
        let handle = tokio::spawn(scheduler.run(ready_rx));
        ready_tx.send(()).unwrap();

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert_eq!(graph.edge_count(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(graph.edge_count(), 0);

        graph.add_node(Node::new("10.0.0.7"));
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(graph.node_count(), 0);

        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_export_failure_ends_the_loop() {
        let dir = tempfile::tempdir().unwrap();
        let graph = populated_graph();
        let (ready_tx, ready_rx) = oneshot::channel();
        let scheduler = SnapshotScheduler::with_exporter(
            Arc::clone(&graph),
            Duration::from_secs(30),
            Some(Exporter::new(dir.path().join("missing"))),
        );
        ready_tx.send(()).unwrap();

        let result = scheduler.run(ready_rx).await;
        assert!(matches!(result, Err(MonitorError::Io(_))));
        assert_eq!(graph.edge_count(), 1);
    }
}
