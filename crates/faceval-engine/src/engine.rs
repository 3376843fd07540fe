use faceval_core::{BatchEmbedder, Evaluation, PairDataset, Scorer, ScorerError};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("scorer error: {0}")]
    Scorer(#[from] ScorerError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from handles to the engine thread.
enum EngineRequest<E> {
    Evaluate {
        reply: oneshot::Sender<Result<Evaluation, ScorerError>>,
    },
    SwapEmbedder {
        embedder: E,
        reply: oneshot::Sender<()>,
    },
}

/// Clone-safe handle to the engine thread.
///
/// The async methods are for callers on a tokio runtime; the `blocking_`
/// variants are for plain training loops and must not be called from
/// inside an async context.
pub struct EngineHandle<E> {
    tx: mpsc::Sender<EngineRequest<E>>,
}

impl<E> Clone for EngineHandle<E> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<E> EngineHandle<E> {
    /// Run a full verification pass with the current embedder.
    pub async fn evaluate(&self) -> Result<Evaluation, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Evaluate { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        Ok(reply_rx.await.map_err(|_| EngineError::ChannelClosed)??)
    }

    /// Replace the embedder, e.g. with a freshly exported checkpoint.
    /// Returns once the engine has taken ownership of it.
    pub async fn swap_embedder(&self, embedder: E) -> Result<(), EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::SwapEmbedder {
                embedder,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    pub fn blocking_evaluate(&self) -> Result<Evaluation, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .blocking_send(EngineRequest::Evaluate { reply: reply_tx })
            .map_err(|_| EngineError::ChannelClosed)?;
        Ok(reply_rx.blocking_recv().map_err(|_| EngineError::ChannelClosed)??)
    }

    pub fn blocking_swap_embedder(&self, embedder: E) -> Result<(), EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .blocking_send(EngineRequest::SwapEmbedder {
                embedder,
                reply: reply_tx,
            })
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.blocking_recv().map_err(|_| EngineError::ChannelClosed)
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The thread owns the embedder and the pre-decoded dataset and serves
/// requests one at a time, so an evaluation never runs on the caller's
/// thread. It exits when every handle has been dropped.
pub fn spawn_engine<I, E>(
    embedder: E,
    dataset: PairDataset<I>,
    scorer: Scorer,
    batch_size: usize,
) -> Result<EngineHandle<E>, EngineError>
where
    I: Send + 'static,
    E: BatchEmbedder<I> + Send + 'static,
{
    if dataset.is_empty() {
        return Err(ScorerError::EmptyDataset.into());
    }

    let (tx, mut rx) = mpsc::channel::<EngineRequest<E>>(4);

    std::thread::Builder::new()
        .name("faceval-engine".into())
        .spawn(move || {
            let mut embedder = embedder;
            let mut runs = 0u64;
            tracing::info!(pairs = dataset.len(), batch_size, "engine thread started");

            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Evaluate { reply } => {
                        runs += 1;
                        let started = std::time::Instant::now();
                        let result = scorer.evaluate_batched(&mut embedder, &dataset, batch_size);
                        match &result {
                            Ok(eval) => tracing::debug!(
                                run = runs,
                                accuracy = eval.accuracy(),
                                threshold = eval.threshold(),
                                elapsed_ms = started.elapsed().as_millis() as u64,
                                "evaluation finished"
                            ),
                            Err(err) => tracing::warn!(run = runs, error = %err, "evaluation failed"),
                        }
                        let _ = reply.send(result);
                    }
                    EngineRequest::SwapEmbedder {
                        embedder: next,
                        reply,
                    } => {
                        embedder = next;
                        tracing::info!("embedder replaced");
                        let _ = reply.send(());
                    }
                }
            }
            tracing::info!(runs, "engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}
