//! Cooperative cancellation shared by every stage of one request.
//!
//! A request owns one [`CancellationToken`]; stages receive it by reference and
//! check it at each blocking boundary. The token only ever goes from active to
//! cancelled, and cancelling twice is a no-op.

use std::future::Future;

pub use tokio_util::sync::CancellationToken;

use super::PipelineError;

/// Fail with [`PipelineError::Cancelled`] if the token is already set
pub fn ensure_active(token: &CancellationToken) -> Result<(), PipelineError> {
    if token.is_cancelled() {
        Err(PipelineError::Cancelled)
    } else {
        Ok(())
    }
}

/// Await `future`, abandoning it as soon as the token fires.
///
/// The future is dropped on cancellation, so anything it owns (child
/// processes spawned with `kill_on_drop`, open connections) is released.
pub async fn run_cancellable<F>(
    token: &CancellationToken,
    future: F,
) -> Result<F::Output, PipelineError>
where
    F: Future,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(PipelineError::Cancelled),
        output = future => Ok(output),
    }
}
