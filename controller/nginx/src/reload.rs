use crate::{Error, ReloadKind, Result};
use tokio::sync::{mpsc, oneshot};

/// Performs one reload.
#[async_trait::async_trait]
pub trait Reload: Send + 'static {
    async fn reload(&mut self, kind: ReloadKind) -> Result<()>;
}

/// Requests reloads from a [`Coalescer`].
#[derive(Clone, Debug)]
pub struct ReloadHandle {
    tx: mpsc::UnboundedSender<Request>,
}

/// Serializes reloads.
///
/// At most one reload runs at a time. Requests that arrive while a reload runs are merged into
/// exactly one follow-up reload, which takes the strongest requested deadline class. Every
/// merged requester receives that reload's result.
pub struct Coalescer<R> {
    reloader: R,
    rx: mpsc::UnboundedReceiver<Request>,
}

#[derive(Debug)]
struct Request {
    kind: ReloadKind,
    done: oneshot::Sender<Result<()>>,
}

// === impl ReloadHandle ===

impl ReloadHandle {
    pub async fn reload(&self, kind: ReloadKind) -> Result<()> {
        let (done, rx) = oneshot::channel();
        self.tx
            .send(Request { kind, done })
            .map_err(|_| Error::Reload("the reloader has stopped".to_string()))?;
        rx.await
            .map_err(|_| Error::Reload("the reloader has stopped".to_string()))?
    }
}

// === impl Coalescer ===

impl<R: Reload> Coalescer<R> {
    pub fn new(reloader: R) -> (Self, ReloadHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { reloader, rx }, ReloadHandle { tx })
    }

    /// Spawns the coalescer on the current runtime.
    pub fn spawn(reloader: R) -> ReloadHandle {
        let (coalescer, handle) = Self::new(reloader);
        tokio::spawn(coalescer.run());
        handle
    }

    /// Runs until every handle is dropped.
    pub async fn run(mut self) {
        while let Some(first) = self.rx.recv().await {
            let mut kind = first.kind;
            let mut waiters = vec![first.done];
            while let Ok(Request { kind: k, done }) = self.rx.try_recv() {
                kind = kind.max(k);
                waiters.push(done);
            }

            tracing::debug!(?kind, requests = waiters.len(), "Reloading");
            let result = self.reloader.reload(kind).await;
            if let Err(error) = &result {
                tracing::warn!(%error, "Reload failed");
            }
            for done in waiters {
                let _ = done.send(result.clone());
            }
        }
        tracing::debug!("Reload handles dropped");
    }
}
