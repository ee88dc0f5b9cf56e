use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;

use crate::models::{LocationSample, SessionMeta, TrackingStatus};
use crate::settings::DispatchSettings;
use crate::transport::socket::StatusUpdate;
use crate::transport::{ClientEvent, SocketChannel, TrackingBackend};

use super::outbox::{Outbox, PendingUpdate};
use super::route::RouteBuffer;
use super::throttle::Throttle;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

/// Server-pushed intervals below this are ignored as a floor.
const MIN_SERVER_INTERVAL: Duration = Duration::from_millis(1_000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Inside the throttle window; the sample was discarded.
    Throttled,
    SentOverSocket,
    /// Socket unavailable; waiting in the REST fallback outbox.
    Queued,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchStats {
    pub throttled: u64,
    pub sent_over_socket: u64,
    pub queued: u64,
    pub delivered_over_rest: u64,
    pub discarded: u64,
}

/// Turns accepted samples into outbound updates.
///
/// Delivery is best-effort: socket emits are fire-and-forget, and the REST
/// outbox gives up on an update after `max_delivery_attempts`.
pub struct UpdateDispatcher {
    socket: Arc<dyn SocketChannel>,
    backend: Arc<dyn TrackingBackend>,
    throttle: Throttle,
    route: RouteBuffer,
    outbox: Outbox,
    stats: DispatchStats,
}

impl UpdateDispatcher {
    pub fn new(
        socket: Arc<dyn SocketChannel>,
        backend: Arc<dyn TrackingBackend>,
        settings: &DispatchSettings,
    ) -> Self {
        Self {
            socket,
            backend,
            throttle: Throttle::new(settings.min_interval()),
            route: RouteBuffer::new(settings.route_capacity, settings.route_min_spacing_m),
            outbox: Outbox::new(settings.outbox_capacity, settings.max_delivery_attempts),
            stats: DispatchStats::default(),
        }
    }

    pub async fn on_sample(&mut self, sample: LocationSample, meta: SessionMeta) -> DispatchOutcome {
        self.on_sample_at(sample, meta, Instant::now()).await
    }

    /// The route buffer sees every sample; the network only sees the ones
    /// that clear the throttle.
    pub async fn on_sample_at(
        &mut self,
        sample: LocationSample,
        meta: SessionMeta,
        now: Instant,
    ) -> DispatchOutcome {
        self.route.push(&sample);

        if !self.throttle.try_pass(now) {
            self.stats.throttled += 1;
            log_debug!("Sample at {} dropped by throttle", sample.timestamp);
            return DispatchOutcome::Throttled;
        }

        self.emit(sample, meta).await
    }

    pub async fn emit(&mut self, sample: LocationSample, meta: SessionMeta) -> DispatchOutcome {
        let update = PendingUpdate::new(sample, meta);

        if self.socket.is_connected() {
            match self
                .socket
                .emit(ClientEvent::LocationUpdate(update.clone()))
                .await
            {
                Ok(()) => {
                    self.stats.sent_over_socket += 1;
                    return DispatchOutcome::SentOverSocket;
                }
                Err(err) => log_warn!("location:update emit failed, queueing for REST: {err}"),
            }
        }

        if let Some(evicted) = self.outbox.push(update) {
            self.stats.discarded += 1;
            log_warn!(
                "Outbox full; discarded update from {}",
                evicted.sample.timestamp
            );
        }
        self.stats.queued += 1;
        DispatchOutcome::Queued
    }

    /// Posts queued updates oldest-first, stopping at the first failure.
    /// Returns how many were delivered.
    pub async fn flush(&mut self) -> usize {
        let mut delivered = 0;
        while let Some(head) = self.outbox.front().cloned() {
            match self.backend.post_location(&head).await {
                Ok(()) => {
                    self.outbox.pop_delivered();
                    delivered += 1;
                }
                Err(err) => {
                    log_warn!("REST location upload failed: {err}");
                    if let Some(dropped) = self.outbox.record_failure() {
                        self.stats.discarded += 1;
                        log_warn!(
                            "Giving up on update from {} after {} attempts",
                            dropped.sample.timestamp,
                            dropped.attempts
                        );
                    }
                    break;
                }
            }
        }
        if delivered > 0 {
            self.stats.delivered_over_rest += delivered as u64;
            log_info!("Delivered {delivered} queued location updates over REST");
        }
        delivered
    }

    /// Best-effort status-only update; skipped while disconnected.
    pub async fn send_status(&self, session_id: &str, status: TrackingStatus) {
        if !self.socket.is_connected() {
            return;
        }
        let event = ClientEvent::StatusUpdate(StatusUpdate {
            session_id: session_id.to_string(),
            status,
            timestamp: Utc::now(),
        });
        if let Err(err) = self.socket.emit(event).await {
            log_warn!("Status update emit failed: {err}");
        }
    }

    /// Applies a server-pushed `location:update_interval`.
    pub fn set_min_interval(&mut self, interval: Duration) {
        let interval = interval.max(MIN_SERVER_INTERVAL);
        log_info!("Dispatch interval set to {} ms", interval.as_millis());
        self.throttle.set_min_interval(interval);
    }

    pub fn min_interval(&self) -> Duration {
        self.throttle.min_interval()
    }

    pub fn route(&self) -> &RouteBuffer {
        &self.route
    }

    pub fn pending(&self) -> usize {
        self.outbox.len()
    }

    pub fn has_pending(&self) -> bool {
        !self.outbox.is_empty()
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    /// Forgets the session's route and throttle window. Queued updates stay
    /// so a later flush can still deliver them.
    pub fn end_session(&mut self) {
        if !self.route.is_empty() {
            log_info!(
                "Session route closed: {} points, {:.0} m",
                self.route.len(),
                self.route.length_meters()
            );
        }
        self.route.clear();
        self.throttle.reset();
    }
}
