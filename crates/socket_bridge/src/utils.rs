//! Small async helpers shared across the crate.

use tokio::sync::watch;

/// Resolves once the flag behind `rx` is `true`, or its sender is gone.
///
/// Safe to race in `tokio::select!` from a spawned task: the borrow of the
/// watched value is released before this future completes.
pub(crate) async fn wait_until_set(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|set| *set).await;
}
