use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use proctor_core::events::Dispatch;

use crate::broadcast::BroadcastRouter;

/// Forward engine events to the router in emission order until the channel
/// closes or `cancel` fires.
pub fn spawn_bridge(
    router: Arc<BroadcastRouter>,
    mut rx: broadcast::Receiver<Dispatch>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let received = tokio::select! {
                r = rx.recv() => r,
                () = cancel.cancelled() => break,
            };
            match received {
                Ok(dispatch) => {
                    let _ = router.publish(&dispatch.audience, &dispatch.event);
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "event bridge lagged, dropped events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!("event bridge channel closed");
                    break;
                }
            }
        }
    })
}
