//! Login handshake, run once per generation

use crate::{
    action::{Action, ActionResponse},
    constants::{AUTH_ACCEPTED_MESSAGE, RESPONSE_SUCCESS},
    error::AmiError,
    session::Shared,
    transport::Generation,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug)]
pub(crate) enum LoginOutcome {
    Accepted,
    /// The server answered and said no; retrying would not help
    Rejected(AmiError),
    /// No usable answer (link lost, timeout); the next generation retries
    Failed(AmiError),
}

/// `Response: Success` or the `Authentication accepted` message.
pub(crate) fn login_accepted(response: &ActionResponse) -> bool {
    response.response() == Some(RESPONSE_SUCCESS)
        || response
            .message()
            .is_some_and(|m| m.eq_ignore_ascii_case(AUTH_ACCEPTED_MESSAGE))
}

pub(crate) async fn login(shared: &Shared, generation: &Arc<Generation>) -> LoginOutcome {
    let settings = shared.settings();
    debug!("[LOGIN] Logging in as {}", settings.username);

    let action = Action::login(&settings.username, &settings.password);
    let response = match shared
        .send_on(generation, action, settings.action_timeout())
        .await
    {
        Ok(response) => response,
        Err(e) if e.is_connection_error() || matches!(e, AmiError::ActionTimeout { .. }) => {
            warn!("[LOGIN] No answer to Login: {}", e);
            return LoginOutcome::Failed(e);
        }
        Err(e) => {
            warn!("[LOGIN] Login could not be sent: {}", e);
            return LoginOutcome::Rejected(AmiError::auth_failed(e.to_string()));
        }
    };

    let outcome = judge(&response);
    match &outcome {
        LoginOutcome::Accepted => info!("[LOGIN] Authenticated as {}", settings.username),
        LoginOutcome::Rejected(e) | LoginOutcome::Failed(e) => warn!("[LOGIN] {}", e),
    }
    outcome
}

fn judge(response: &ActionResponse) -> LoginOutcome {
    if login_accepted(response) {
        return LoginOutcome::Accepted;
    }
    LoginOutcome::Rejected(AmiError::auth_failed(
        response
            .message()
            .unwrap_or("login rejected"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::AmiMessage;

    fn response(text: &str) -> ActionResponse {
        ActionResponse::new(AmiMessage::parse(text).fields, Vec::new())
    }

    #[test]
    fn accepted_forms() {
        assert!(login_accepted(&response(
            "Response: Success\r\nMessage: Authentication accepted"
        )));
        assert!(login_accepted(&response("Response: Success")));
        assert!(login_accepted(&response(
            "Response: Goodbye\r\nMessage: Authentication accepted"
        )));
    }

    #[test]
    fn rejected_forms() {
        assert!(!login_accepted(&response(
            "Response: Error\r\nMessage: Authentication failed"
        )));
        assert!(!login_accepted(&response("Response: success")));
        assert!(!login_accepted(&response("Message: Unknown")));
    }

    #[test]
    fn rejection_carries_auth_error() {
        let outcome = judge(&response(
            "Response: Error\r\nActionID: 1\r\nMessage: Authentication failed",
        ));
        let LoginOutcome::Rejected(AmiError::AuthFailed { reason }) = &outcome else {
            panic!("expected AuthFailed, got {:?}", outcome);
        };
        assert_eq!(reason, "Authentication failed");

        assert!(matches!(
            judge(&response("Response: Error")),
            LoginOutcome::Rejected(AmiError::AuthFailed { ref reason }) if reason == "login rejected"
        ));
        assert!(matches!(
            judge(&response("Response: Success")),
            LoginOutcome::Accepted
        ));
    }
}
