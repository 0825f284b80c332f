//! # Route Refresh
//!
//! Change notifications arrive asynchronously (admin endpoint, Redis pub/sub) and are
//! funnelled through an `mpsc` channel into one listener task that invalidates the
//! [`RouteSource`]. Request handling never waits on this path.

use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::source::RouteSource;

const CHANNEL_CAPACITY: usize = 64;

/// Sender half handed to anything that can announce a route change
#[derive(Debug, Clone)]
pub struct RefreshSignal {
    sender: mpsc::Sender<String>,
}

impl RefreshSignal {
    /// Create a signal and its receiving end
    pub fn channel() -> (Self, mpsc::Receiver<String>) {
        let (sender, receiver) = mpsc::channel(CHANNEL_CAPACITY);
        (Self { sender }, receiver)
    }

    /// Request a refresh; `origin` is only used for logging
    ///
    /// A full channel already holds a pending refresh, so dropping this one loses nothing.
    pub fn notify(&self, origin: impl Into<String>) -> bool {
        match self.sender.try_send(origin.into()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("Refresh already pending");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("Refresh listener has stopped");
                false
            }
        }
    }
}

/// Invalidate `source` for every signal until all senders are dropped
pub fn spawn_refresh_listener(
    source: Arc<RouteSource>,
    mut receiver: mpsc::Receiver<String>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(origin) = receiver.recv().await {
            // Collapse a burst into a single invalidation
            let mut coalesced = 0usize;
            while receiver.try_recv().is_ok() {
                coalesced += 1;
            }

            info!(origin = %origin, coalesced, "Route refresh signal received");
            source.invalidate();
        }
        debug!("Refresh listener stopped");
    })
}

/// Forward messages from a Redis pub/sub channel as refresh signals
///
/// Connection errors are logged and retried after `reconnect_delay`; the bridge stops
/// once the listener side of `signal` is gone.
pub fn spawn_redis_bridge(
    redis_url: String,
    channel: String,
    reconnect_delay: Duration,
    signal: RefreshSignal,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match subscribe_and_forward(&redis_url, &channel, &signal).await {
                Ok(()) => {
                    info!("Refresh listener closed, stopping Redis bridge");
                    return;
                }
                Err(e) => {
                    error!(error = %e, channel = %channel, "Redis refresh subscription failed");
                }
            }
            tokio::time::sleep(reconnect_delay).await;
        }
    })
}

/// Returns `Ok` only when the listener is gone; a dropped subscription is an error
async fn subscribe_and_forward(
    redis_url: &str,
    channel: &str,
    signal: &RefreshSignal,
) -> redis::RedisResult<()> {
    let client = redis::Client::open(redis_url)?;
    let mut pubsub = client.get_async_connection().await?.into_pubsub();
    pubsub.subscribe(channel).await?;
    info!(channel = %channel, "Subscribed to route change notifications");

    let mut messages = pubsub.on_message();
    while let Some(message) = messages.next().await {
        debug!(channel = %message.get_channel_name(), "Route change notification");
        if !signal.notify(format!("redis:{}", channel)) {
            return Ok(());
        }
    }

    Err(redis::RedisError::from((
        redis::ErrorKind::IoError,
        "pub/sub stream ended",
    )))
}
