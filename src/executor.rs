use std::sync::Arc;

use anyhow::{anyhow, Result};
use tokio::time::timeout;
use tracing::warn;

use crate::model::{TaskId, TaskOptions};
use crate::task::{Inputs, Producer};

/// Execute a single task according to its options.
///
/// Each attempt runs the producer on its own tokio task so a panic becomes an
/// ordinary failure instead of tearing down the scheduler.
///
/// Returns:
/// - Ok(value) => some attempt succeeded
/// - Err(err) => the last attempt's error
pub(crate) async fn execute_task<V>(
    id: &TaskId,
    producer: &Producer<V>,
    inputs: Inputs<V>,
    options: TaskOptions,
) -> Result<Arc<V>>
where
    V: Send + Sync + 'static,
{
    let max_attempts = options.retry + 1;
    let mut attempt = 1;

    loop {
        let result = run_attempt(id, producer, inputs.clone(), options).await;
        match result {
            Ok(value) => return Ok(Arc::new(value)),
            Err(e) if attempt == max_attempts => return Err(e),
            Err(e) => {
                warn!(
                    task = %id,
                    attempt,
                    max_attempts,
                    "task failed: {:#} - retrying",
                    e
                );
                attempt += 1;
            }
        }
    }
}

async fn run_attempt<V>(
    id: &TaskId,
    producer: &Producer<V>,
    inputs: Inputs<V>,
    options: TaskOptions,
) -> Result<V>
where
    V: Send + Sync + 'static,
{
    // The producer is invoked inside the spawned task so that a panic while
    // building its future is caught by the join handle too.
    let producer = Arc::clone(producer);
    let mut handle = tokio::spawn(async move { producer(inputs).await });

    let joined = match options.timeout {
        Some(limit) => match timeout(limit, &mut handle).await {
            Ok(joined) => joined,
            Err(_elapsed) => {
                handle.abort();
                return Err(anyhow!("task '{}' timed out after {:?}", id, limit));
            }
        },
        None => handle.await,
    };

    match joined {
        Ok(result) => result,
        Err(e) if e.is_panic() => Err(anyhow!("producer of task '{}' panicked", id)),
        Err(e) => Err(anyhow!("producer of task '{}' was aborted: {}", id, e)),
    }
}
