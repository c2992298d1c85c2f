//! Ping-based liveness monitor

use crate::{
    action::Action,
    session::Shared,
    transport::{stopped, Generation},
};
use std::sync::Arc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, trace, warn};

/// Ping every `ping_interval` until the generation stops. A ping that fails
/// or goes unanswered within `ping_timeout` tears the generation down.
pub(crate) async fn keepalive_loop(shared: Arc<Shared>, generation: Arc<Generation>) {
    let period = shared
        .settings()
        .ping_interval();
    let deadline = shared
        .settings()
        .ping_timeout();
    let mut stop = generation.stop_signal();
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    debug!("[PING] Keepalive every {:?}", period);
    loop {
        tokio::select! {
            _ = stopped(&mut stop) => {
                trace!("[PING] Stop signal, keepalive exiting");
                return;
            }
            _ = ticker.tick() => {}
        }

        match shared
            .send_on(&generation, Action::ping(), deadline)
            .await
        {
            Ok(response) if response.is_success() => trace!("[PING] Pong"),
            Ok(response) => {
                // Still an answer, so the link is alive.
                debug!("[PING] Unexpected reply {}", response.fields());
            }
            Err(e) => {
                warn!("[PING] Keepalive failed: {}", e);
                generation.teardown("keepalive ping failed");
                return;
            }
        }
    }
}
