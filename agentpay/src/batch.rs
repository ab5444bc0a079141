//! Bounded-concurrency batch execution.
//!
//! Each payment in a batch is independent — there is no cross-payment
//! atomicity. A semaphore caps how many run at once; per-request outcomes
//! are aggregated in request order.

use futures::future::join_all;
use tokio::sync::Semaphore;

use crate::client::PaymentClient;
use crate::types::{BatchResult, PaymentMethod, PaymentRequest, PaymentResult};

/// Default batch concurrency.
pub const DEFAULT_CONCURRENCY: usize = 5;

pub(crate) async fn process(
    client: &PaymentClient,
    requests: Vec<PaymentRequest>,
    concurrency: usize,
) -> BatchResult {
    let semaphore = Semaphore::new(concurrency.max(1));

    let futures = requests.into_iter().map(|request| {
        let semaphore = &semaphore;
        async move {
            let _permit = semaphore.acquire().await.expect("semaphore never closed");
            let method = PaymentMethod::Transfer;
            let amount = request.amount;
            let recipient = request.recipient.clone();
            match client.pay(request).await {
                Ok(result) => result,
                Err(err) => PaymentResult::failure(method, amount, recipient, &err),
            }
        }
    });

    let results = join_all(futures).await;
    let succeeded = results.iter().filter(|r| r.success).count();
    BatchResult {
        total: results.len(),
        succeeded,
        failed: results.len() - succeeded,
        results,
    }
}
