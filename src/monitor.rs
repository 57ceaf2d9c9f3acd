//! Supervises the capture and snapshot tasks for one interface.
//!
//! The first task to fail ends the whole group; there is no partial recovery.

use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinError;
use crate::config::Config;
use crate::graph::Graph;
use crate::network::{pump, FrameSource, PacketCapture, PacketClassifier};
use crate::scheduler::SnapshotScheduler;
use crate::{MonitorError, Result};

pub struct Monitor {
    config: Config,
    graph: Arc<Graph>,
}

impl Monitor {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            config,
            graph: Arc::new(Graph::new()),
        })
    }

    pub fn graph(&self) -> Arc<Graph> {
        Arc::clone(&self.graph)
    }

    /// Capture live from the configured interface.
    pub async fn run(self) -> Result<()> {
        let capture = PacketCapture::new(&self.config.capture)?;
        self.run_with_source(move || capture.open()).await
    }

    /// Run the pipeline against any frame source.
    ///
    /// `open` runs on the blocking capture thread; the scheduler stays idle
    /// until it has returned a source.
    pub async fn run_with_source<S, F>(self, open: F) -> Result<()>
    where
        S: FrameSource,
        F: FnOnce() -> Result<S> + Send + 'static,
    {
        let (ready_tx, ready_rx) = oneshot::channel();
        let classifier = PacketClassifier::new(Arc::clone(&self.graph), &self.config.capture);
        let scheduler = SnapshotScheduler::new(Arc::clone(&self.graph), &self.config.snapshot);

        let mut capture_task = tokio::task::spawn_blocking(move || {
            let mut source = open()?;
            let _ = ready_tx.send(());
            pump(&mut source, &classifier)
        });
        let mut scheduler_task = tokio::spawn(scheduler.run(ready_rx));

        let first = tokio::select! {
            res = &mut capture_task => {
                Some(flatten(res).map(|stats| {
                    log::info!("Capture finished: {} frames, {} edges", stats.frames, stats.edges);
                }))
            }
            res = &mut scheduler_task => match flatten(res) {
                Err(MonitorError::PipelineNotReady) => None,
                other => Some(other),
            },
        };

        let result = match first {
            Some(result) => result,
            // The capture thread holds the reason it never came up.
            None => flatten((&mut capture_task).await).map(|_| ()),
        };

        // A blocking capture thread cannot be interrupted; it ends with the process.
        scheduler_task.abort();
        capture_task.abort();

        result
    }
}

fn flatten<T>(res: std::result::Result<Result<T>, JoinError>) -> Result<T> {
    match res {
        Ok(inner) => inner,
        Err(e) => Err(MonitorError::Task(e.to_string())),
    }
}
