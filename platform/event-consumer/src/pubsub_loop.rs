//! Fire-and-forget subscriber loop (Redis Pub/Sub semantics)
//!
//! ```text
//! Disconnected -> Connecting -> Subscribed <-> liveness check
//!      ^                             |
//!      +---- reconnect delay <-- connection lost
//! ```
//!
//! Messages are handled inline, one at a time. A message whose handling
//! fails is logged and lost: there is no redelivery on this backend.

use crate::router::EventRouter;
use event_bus::consumer_retry::{retry_with_backoff, RetryConfig};
use event_bus::{BusResult, PubSubConnector, PubSubSession};
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct SubscriberPolicy {
    /// Attempts and delay for establishing a subscription
    pub connect_retry: RetryConfig,
    /// How often an idle subscription is pinged
    pub liveness_interval: Duration,
    /// Wait after losing a connection before reconnecting
    pub reconnect_delay: Duration,
}

impl Default for SubscriberPolicy {
    fn default() -> Self {
        Self {
            connect_retry: RetryConfig::fixed(60, Duration::from_secs(2)),
            liveness_interval: Duration::from_secs(5),
            reconnect_delay: Duration::from_secs(10),
        }
    }
}

enum SessionEnd {
    Shutdown,
    ConnectionLost,
}

/// Subscribe to `channel` and handle messages until shutdown
///
/// A connect cycle that exhausts `connect_retry` is followed by
/// `reconnect_delay` and a fresh cycle; the loop only ends on shutdown.
pub async fn run_pubsub_subscriber(
    connector: &dyn PubSubConnector,
    channel: &str,
    router: &EventRouter,
    policy: &SubscriberPolicy,
    mut shutdown: watch::Receiver<bool>,
) -> BusResult<()> {
    let service = router.service_name().to_string();

    loop {
        if *shutdown.borrow() {
            break;
        }

        let connected = tokio::select! {
            _ = shutdown.changed() => break,
            connected = retry_with_backoff(
                || connector.connect(channel),
                &policy.connect_retry,
                "pubsub_subscribe",
            ) => connected,
        };

        let mut session = match connected {
            Ok(session) => session,
            Err(e) => {
                router.metrics().record_reconnect();
                tracing::error!(
                    service = %service,
                    channel = %channel,
                    attempts = policy.connect_retry.max_attempts,
                    retry_in_secs = policy.reconnect_delay.as_secs_f64(),
                    error = %e,
                    "Subscription attempts exhausted, starting a new cycle"
                );

                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = tokio::time::sleep(policy.reconnect_delay) => {}
                }
                continue;
            }
        };

        tracing::info!(service = %service, channel = %channel, "Subscribed");

        match run_session(session.as_mut(), router, policy, &mut shutdown).await {
            SessionEnd::Shutdown => break,
            SessionEnd::ConnectionLost => {
                drop(session);
                router.metrics().record_reconnect();
                tracing::warn!(
                    service = %service,
                    channel = %channel,
                    retry_in_secs = policy.reconnect_delay.as_secs_f64(),
                    "Subscription lost, reconnecting"
                );

                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = tokio::time::sleep(policy.reconnect_delay) => {}
                }
            }
        }
    }

    tracing::info!(service = %service, channel = %channel, "Subscriber stopped");
    Ok(())
}

async fn run_session(
    session: &mut dyn PubSubSession,
    router: &EventRouter,
    policy: &SubscriberPolicy,
    shutdown: &mut watch::Receiver<bool>,
) -> SessionEnd {
    let mut liveness = tokio::time::interval(policy.liveness_interval);
    liveness.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    liveness.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.changed() => return SessionEnd::Shutdown,
            msg = session.next_message() => {
                let Some(msg) = msg else {
                    return SessionEnd::ConnectionLost;
                };

                if let Err(e) = router.route(&msg.payload).await {
                    tracing::error!(
                        service = router.service_name(),
                        channel = %msg.channel,
                        retryable = e.is_retryable(),
                        error = %e,
                        "Failed to process message; it will not be redelivered"
                    );
                }
            }
            _ = liveness.tick() => {
                if let Err(e) = session.ping().await {
                    tracing::warn!(service = router.service_name(), error = %e, "Liveness check failed");
                    return SessionEnd::ConnectionLost;
                }
            }
        }
    }
}
