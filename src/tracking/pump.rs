use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::time::{self, Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::dispatch::UpdateDispatcher;
use crate::error::TrackingError;
use crate::location::Subscription;

use super::controller::TrackingController;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

pub(super) async fn sample_loop(
    controller: TrackingController,
    mut subscription: Subscription,
    cancel: CancellationToken,
) {
    let watch_id = subscription.id();

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                log_debug!("sample pump for {:?} shutting down", watch_id);
                break;
            }
            update = subscription.next() => match update {
                Some(Ok(raw)) => controller.on_fix(raw).await,
                Some(Err(err)) => {
                    log_warn!("location source reported failure on {:?}: {err}", watch_id);
                    controller.on_source_failure(err, &cancel).await;
                    break;
                }
                None => {
                    controller
                        .on_source_failure(
                            TrackingError::Platform("location watch closed".into()),
                            &cancel,
                        )
                        .await;
                    break;
                }
            }
        }
    }
}

pub(super) async fn flush_loop(
    dispatcher: Arc<Mutex<UpdateDispatcher>>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let mut dispatcher = dispatcher.lock().await;
                if !dispatcher.has_pending() {
                    continue;
                }
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    delivered = dispatcher.flush() => {
                        if delivered > 0 {
                            log_info!("flush tick delivered {delivered} update(s)");
                        }
                    }
                }
            }
        }
    }
    log_debug!("flush loop stopped");
}
