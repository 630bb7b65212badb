//! Fire-and-forget dispatch to the realtime runtime
//!
//! A `Dispatcher` is the sending end of the FIFO channel drained by the
//! realtime worker. Jobs run at most once, in submission order, and only
//! while the realtime runtime is alive.

use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};

use super::error::{CellError, CellResult};
use super::realtime::{RealtimeScope, is_realtime_thread};

/// Closure executed on the realtime runtime
pub type RealtimeJob = Box<dyn FnOnce(&mut RealtimeScope) + Send + 'static>;

/// Message carried by the dispatch channel
pub(crate) enum Envelope {
    /// Run a job
    Job(RealtimeJob),
    /// Stop the worker after the jobs queued before this message
    Shutdown,
}

/// Sending side of the realtime dispatch channel
#[derive(Clone)]
pub struct Dispatcher {
    tx: mpsc::UnboundedSender<Envelope>,
}

impl Dispatcher {
    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<Envelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Enqueue a job and return immediately
    pub fn dispatch<F>(&self, job: F)
    where
        F: FnOnce(&mut RealtimeScope) + Send + 'static,
    {
        if self.tx.send(Envelope::Job(Box::new(job))).is_err() {
            tracing::trace!("realtime runtime stopped; dropping dispatched job");
        }
    }

    /// Whether the realtime runtime has stopped receiving jobs
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Block until every job dispatched before this call has run.
    ///
    /// Returns immediately if the realtime runtime has stopped. Fails when
    /// called from the realtime runtime itself or from inside a tokio runtime
    /// (use [`Dispatcher::settled`] there).
    pub fn flush(&self) -> CellResult<()> {
        if is_realtime_thread() {
            return Err(CellError::InvalidContext {
                operation: "flush",
                expected: "control runtime",
            });
        }
        if Handle::try_current().is_ok() {
            return Err(CellError::InvalidContext {
                operation: "flush",
                expected: "blocking context (await `settled` in async code)",
            });
        }

        let (done_tx, done_rx) = oneshot::channel();
        self.dispatch(move |_| {
            let _ = done_tx.send(());
        });
        // An error means the job was dropped with the channel.
        let _ = done_rx.blocking_recv();
        Ok(())
    }

    /// Wait until every job dispatched before this call has run
    pub async fn settled(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        self.dispatch(move |_| {
            let _ = done_tx.send(());
        });
        let _ = done_rx.await;
    }

    pub(crate) fn shutdown(&self) {
        let _ = self.tx.send(Envelope::Shutdown);
    }
}
