//! Pending-action table: matches inbound frames to the action that caused them

use crate::{
    action::ActionResponse,
    constants::DB_GET_RESPONSE_EVENT,
    error::{AmiError, AmiResult},
    event::AmiEvent,
    fields::Fields,
    headers::FieldName,
    protocol::{AmiMessage, MessageKind},
    transport::stopped,
};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch, Mutex};
use tracing::{debug, trace, warn};

/// `true` when a response announces further events under the same ActionID.
///
/// The server's wording varies between versions ("Peer status list will
/// follow", "Channels will follow", ...), so any message mentioning
/// "follow" keeps the action open, except "Command output follows" whose
/// output is already inline in the response.
pub(crate) fn more_data_follows(fields: &Fields) -> bool {
    let Some(message) = fields.get(FieldName::Message) else {
        return false;
    };
    let message = message.to_ascii_lowercase();
    if message.contains("command output follows") {
        return false;
    }
    message.contains("follow")
}

/// `true` for the event that closes an event list.
pub(crate) fn completes_list(event: &AmiEvent) -> bool {
    if event
        .name()
        .is_some_and(|name| name.contains("Complete") || name == DB_GET_RESPONSE_EVENT)
    {
        return true;
    }
    event
        .event_list()
        .is_some_and(|list| list.contains("Complete"))
}

#[derive(Default)]
struct PendingState {
    fields: Fields,
    events: Vec<AmiEvent>,
    /// Taken by the first completion; later fires are no-ops
    done: Option<oneshot::Sender<()>>,
}

struct PendingAction {
    state: Mutex<PendingState>,
}

impl PendingAction {
    async fn store_response(&self, token: &str, fields: Fields) {
        let follows = more_data_follows(&fields);
        let mut state = self
            .state
            .lock()
            .await;
        state.fields = fields;
        if follows {
            trace!("[RECV] Response for {} announces more events", token);
        } else {
            fire(&mut state);
        }
    }

    async fn push_event(&self, event: AmiEvent) {
        let complete = completes_list(&event);
        let mut state = self
            .state
            .lock()
            .await;
        state
            .events
            .push(event);
        if complete {
            fire(&mut state);
        }
    }
}

fn fire(state: &mut PendingState) {
    if let Some(done) = state
        .done
        .take()
    {
        let _ = done.send(());
    }
}

/// Registration for one in-flight action.
///
/// Dropping the handle removes the table entry, so a cancelled caller never
/// leaves its token behind.
pub(crate) struct PendingHandle {
    token: String,
    action: String,
    entry: Arc<PendingAction>,
    done_rx: oneshot::Receiver<()>,
    table: Arc<DashMap<String, Arc<PendingAction>>>,
}

impl PendingHandle {
    #[cfg(test)]
    pub(crate) fn token(&self) -> &str {
        &self.token
    }

    /// Wait for completion, `timeout`, or `stop` turning `true`, whichever
    /// comes first.
    ///
    /// A timeout after the response arrived but before its event list
    /// completed still yields what arrived. Without response fields the
    /// timeout is [`AmiError::ActionTimeout`], even if events were collected.
    pub(crate) async fn wait(
        mut self,
        timeout: Duration,
        mut stop: watch::Receiver<bool>,
    ) -> AmiResult<ActionResponse> {
        let outcome = tokio::select! {
            biased;
            _ = &mut self.done_rx => Outcome::Completed,
            _ = stopped(&mut stop) => Outcome::Stopped,
            _ = tokio::time::sleep(timeout) => Outcome::TimedOut,
        };

        // No frame can reach this entry once it has left the table.
        self.table
            .remove(&self.token);

        let mut state = self
            .entry
            .state
            .lock()
            .await;
        state.done = None;

        match outcome {
            Outcome::Completed => {}
            Outcome::Stopped => {
                debug!(
                    "[SEND] {} ({}) abandoned, connection closed",
                    self.action, self.token
                );
                return Err(AmiError::ConnectionClosed);
            }
            Outcome::TimedOut => {
                if state
                    .fields
                    .is_empty()
                {
                    warn!(
                        "[SEND] {} ({}) timed out after {:?}",
                        self.action, self.token, timeout
                    );
                    return Err(AmiError::ActionTimeout {
                        action: self
                            .action
                            .clone(),
                        timeout_ms: timeout.as_millis() as u64,
                    });
                }
                warn!(
                    "[SEND] {} ({}) list incomplete after {:?}, returning {} events",
                    self.action,
                    self.token,
                    timeout,
                    state
                        .events
                        .len()
                );
            }
        }

        Ok(ActionResponse::new(
            std::mem::take(&mut state.fields),
            std::mem::take(&mut state.events),
        ))
    }
}

impl Drop for PendingHandle {
    fn drop(&mut self) {
        self.table
            .remove(&self.token);
    }
}

enum Outcome {
    Completed,
    Stopped,
    TimedOut,
}

/// Session-wide table of actions awaiting their response.
///
/// Tokens are unique per session, so one table outlives reconnects; waiters
/// of a torn-down connection are released through its stop signal.
#[derive(Clone, Default)]
pub(crate) struct Correlator {
    pending: Arc<DashMap<String, Arc<PendingAction>>>,
}

impl Correlator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Create the entry for `token`. Must happen before the action is written.
    pub(crate) fn register(&self, token: impl Into<String>, action: &str) -> PendingHandle {
        let token = token.into();
        let (done_tx, done_rx) = oneshot::channel();
        let entry = Arc::new(PendingAction {
            state: Mutex::new(PendingState {
                done: Some(done_tx),
                ..Default::default()
            }),
        });
        self.pending
            .insert(token.clone(), Arc::clone(&entry));
        PendingHandle {
            token,
            action: action.to_string(),
            entry,
            done_rx,
            table: Arc::clone(&self.pending),
        }
    }

    /// Route one parsed frame.
    ///
    /// Returns the frame as an event when it belongs on the unsolicited bus
    /// (no ActionID). Correlated frames are absorbed; frames for an unknown
    /// ActionID and unclassified frames are logged and dropped.
    pub(crate) async fn dispatch(&self, message: AmiMessage) -> Option<AmiEvent> {
        if message.kind == MessageKind::Unknown {
            warn!("[RECV] Discarding unclassified frame {}", message.fields);
            return None;
        }

        let Some(token) = message.action_id() else {
            return Some(AmiEvent::from(message));
        };

        let Some(entry) = self
            .pending
            .get(token)
            .map(|e| Arc::clone(e.value()))
        else {
            debug!("[RECV] No pending action for ActionID {}, dropping", token);
            return None;
        };
        let token = token.to_string();

        match message.kind {
            MessageKind::Response => {
                entry
                    .store_response(&token, message.fields)
                    .await
            }
            _ => {
                entry
                    .push_event(AmiEvent::from(message))
                    .await
            }
        }
        None
    }

    /// Number of actions currently awaiting a response.
    pub(crate) fn pending_count(&self) -> usize {
        self.pending
            .len()
    }

    #[cfg(test)]
    pub(crate) fn is_pending(&self, token: &str) -> bool {
        self.pending
            .contains_key(token)
    }
}
