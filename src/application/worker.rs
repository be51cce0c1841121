use super::broker::{BrokerClient, IntentHandler};
use crate::error::{LedgerError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// A fixed set of consumer tasks sharing one broker client and one handler.
pub struct WorkerPool {
    broker: BrokerClient,
    workers: Vec<JoinHandle<Result<()>>>,
}

impl WorkerPool {
    pub fn spawn<H>(size: usize, broker: BrokerClient, handler: Arc<H>) -> Self
    where
        H: IntentHandler + 'static,
    {
        let workers = (0..size)
            .map(|worker| {
                let broker = broker.clone();
                let handler = Arc::clone(&handler);
                tokio::spawn(async move {
                    debug!(worker, "consumer started");
                    let result = broker.consume(handler.as_ref()).await;
                    debug!(worker, "consumer stopped");
                    result
                })
            })
            .collect();
        info!(workers = size, "worker pool started");

        Self { broker, workers }
    }

    /// Resolves once no message is waiting or claimed.
    pub async fn drain(&self, poll: Duration) -> Result<()> {
        while !self.broker.stats().await?.is_drained() {
            tokio::time::sleep(poll).await;
        }
        Ok(())
    }

    /// Closes the queue and waits for every consumer to finish its current message.
    pub async fn shutdown(self) -> Result<()> {
        self.broker.close().await?;
        for worker in self.workers {
            worker
                .await
                .map_err(|e| LedgerError::InternalError(Box::new(e)))??;
        }
        info!("worker pool stopped");
        Ok(())
    }
}
