//! Single background writer fed through a bounded queue, so decoding does not
//! wait on output I/O.

use anyhow::{Context, anyhow};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::debug;

use crate::{helper::AnyResult, output::EntrySink, record::RdbEntry};

pub struct OutputWorker {
    tx: mpsc::Sender<RdbEntry>,
    handle: JoinHandle<AnyResult<Box<dyn EntrySink>>>,
}

impl OutputWorker {
    /// Start the writer. Must be called from within a tokio runtime.
    pub fn spawn(mut sink: Box<dyn EntrySink>, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<RdbEntry>(capacity);
        let handle = tokio::task::spawn_blocking(move || {
            let mut written = 0u64;
            while let Some(entry) = rx.blocking_recv() {
                sink.write_entry(entry)?;
                written += 1;
            }
            debug!(operation = "output_worker", written, "Output queue drained");
            Ok(sink)
        });
        Self { tx, handle }
    }

    /// Queue an entry, blocking while the queue is full. Fails once the
    /// writer has stopped; [`OutputWorker::join`] then reports why.
    pub fn send_blocking(&self, entry: RdbEntry) -> AnyResult<()> {
        self.tx
            .blocking_send(entry)
            .map_err(|_| anyhow!("output worker stopped"))
    }

    pub async fn send(&self, entry: RdbEntry) -> AnyResult<()> {
        self.tx
            .send(entry)
            .await
            .map_err(|_| anyhow!("output worker stopped"))
    }

    /// Close the queue and wait for the writer. The sink is handed back
    /// unfinished so the caller can still append the AOF tail.
    pub async fn join(self) -> AnyResult<Box<dyn EntrySink>> {
        drop(self.tx);
        self.handle.await.context("output worker panicked")?
    }
}
