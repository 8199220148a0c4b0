use futures::FutureExt;
use std::panic::AssertUnwindSafe;

/// Run `future`, turning a panic into an `Err` carrying the panic message.
///
/// Background tasks owe their owner exactly one completion event; wrapping
/// them here lets a panicking task still send it.
pub async fn catch_task_panic<F, T>(future: F) -> Result<T, String>
where
    F: std::future::Future<Output = T>,
{
    AssertUnwindSafe(future)
        .catch_unwind()
        .await
        .map_err(|panic| {
            if let Some(s) = panic.downcast_ref::<&'static str>() {
                s.to_string()
            } else if let Some(s) = panic.downcast_ref::<String>() {
                s.clone()
            } else {
                "Unknown panic payload".to_string()
            }
        })
}
