//! Single-worker FIFO queue that linearizes every write.
//!
//! Schema reloads, migrations and article writes are submitted here and
//! run strictly one at a time in submission order. A failing or panicking
//! task only affects its own caller; the worker moves on to the next one.
//!
//! A task must never submit to the serializer and await the result, as it
//! would wait on itself.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;

use futures::FutureExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::EngineError;

type Task = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Handle for submitting tasks to the write worker. Cheap to clone.
#[derive(Clone)]
pub struct WriteSerializer {
    sender: mpsc::UnboundedSender<Task>,
}

impl WriteSerializer {
    /// Spawn the worker. It exits once every handle has been dropped and
    /// the queue is drained.
    pub fn start() -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_worker(receiver));
        (Self { sender }, handle)
    }

    /// Queue `task` and wait for its output.
    pub async fn submit<F, T>(&self, task: F) -> Result<T, EngineError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply, outcome) = oneshot::channel();
        self.enqueue(async move {
            let output = task.await;
            // The caller may have stopped waiting.
            let _ = reply.send(output);
        })?;
        outcome.await.map_err(|_| EngineError::TaskPanicked)
    }

    /// Queue `task` without waiting for it.
    pub fn enqueue<F>(&self, task: F) -> Result<(), EngineError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.sender
            .send(Box::pin(task))
            .map_err(|_| EngineError::SerializerClosed)
    }
}

async fn run_worker(mut receiver: mpsc::UnboundedReceiver<Task>) {
    tracing::debug!("Write serializer started");
    while let Some(task) = receiver.recv().await {
        if AssertUnwindSafe(task).catch_unwind().await.is_err() {
            tracing::error!("Serialized task panicked, continuing with the next task");
        }
    }
    tracing::debug!("Write serializer stopped");
}
