//! Message routing logic for dispatching client messages to handlers.

use crate::error::ServerError;
use crate::messaging::{ClientMessage, ErrorReply};
use handler_system::{DispatchError, DispatchRegistry, Session};
use tracing::{debug, trace, warn};

/// Routes a raw client message to the handler registered for its action.
///
/// # Message Flow
///
/// 1. Parse the raw text as a [`ClientMessage`]
/// 2. Look the action up in the live route table
/// 3. Run the handler against the connection's session
///
/// Every failure is answered on `session` with the matching
/// [`ErrorReply`] before it is returned, so the caller only logs.
///
/// # Errors
///
/// `ServerError::Network` for a frame that is not a valid envelope,
/// `ServerError::Internal` for an unknown action or a failed handler.
pub fn route_client_message(
    text: &str,
    session: &mut dyn Session,
    registry: &DispatchRegistry,
) -> Result<(), ServerError> {
    let message = match serde_json::from_str::<ClientMessage>(text) {
        Ok(message) => message,
        Err(e) => {
            session.send(ErrorReply::MalformedMessage.to_json());
            return Err(ServerError::Network(format!("Invalid message format: {e}")));
        }
    };

    trace!(
        "📨 Connection {} -> {}",
        session.connection_id(),
        message.action
    );

    match registry.dispatch(&message.action, session, &message.data) {
        Ok(()) => {
            debug!("✅ Handled {} for connection {}", message.action, session.connection_id());
            Ok(())
        }
        Err(DispatchError::UnknownAction(action)) => {
            debug!("❓ No handler for {} (connection {})", action, session.connection_id());
            session.send(ErrorReply::UnknownAction(action.clone()).to_json());
            Err(ServerError::Internal(format!("Unknown action: {action}")))
        }
        Err(e @ DispatchError::Handler { .. }) => {
            warn!("⚠️ {} (connection {})", e, session.connection_id());
            session.send(ErrorReply::HandlerFailed(message.action.clone()).to_json());
            Err(ServerError::Internal(e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use handler_system::{build, HandlerError, ListenerTable, ModulePath, ModuleRegistrar, RouteTable, ScopeFilter};
    use serde_json::{json, Value};

    #[derive(Default)]
    struct TestSession {
        sent: Vec<Value>,
    }

    impl Session for TestSession {
        fn connection_id(&self) -> u64 {
            1
        }

        fn send(&mut self, message: Value) {
            self.sent.push(message);
        }
    }

    fn registry() -> DispatchRegistry {
        let listeners = ListenerTable::new();
        let mut registrar = ModuleRegistrar::new(ModulePath::new("Handlers.Login.Handshake"), 1);
        registrar.handler("verChk", "handle_version_check", |session, data| {
            match data["version"].as_u64() {
                Some(153) => {
                    session.send(json!({ "action": "apiOK" }));
                    Ok(())
                }
                _ => Err(HandlerError::InvalidPayload("unsupported client".into())),
            }
        });
        registrar.handler("boom", "handle_boom", |_, _| panic!("kaboom"));
        let module = registrar.commit(&listeners).unwrap();
        let table: RouteTable = build(&[module], &listeners, &ScopeFilter::All);
        DispatchRegistry::from_table(table)
    }

    #[test]
    fn test_routes_to_handler() {
        let registry = registry();
        let mut session = TestSession::default();
        route_client_message(r#"{"action":"verChk","data":{"version":153}}"#, &mut session, &registry).unwrap();
        assert_eq!(session.sent, vec![json!({ "action": "apiOK" })]);
    }

    #[test]
    fn test_malformed_unknown_and_failed_are_distinct() {
        let registry = registry();
        let mut session = TestSession::default();

        let malformed = route_client_message("not json", &mut session, &registry);
        assert!(matches!(malformed, Err(ServerError::Network(_))));

        let unknown = route_client_message(r#"{"action":"zz"}"#, &mut session, &registry);
        assert!(matches!(unknown, Err(ServerError::Internal(_))));

        let failed = route_client_message(r#"{"action":"verChk","data":{"version":1}}"#, &mut session, &registry);
        assert!(matches!(failed, Err(ServerError::Internal(_))));

        let panicked = route_client_message(r#"{"action":"boom"}"#, &mut session, &registry);
        assert!(panicked.is_err());

        assert_eq!(
            session.sent,
            vec![
                json!({ "error": "malformed_message" }),
                json!({ "error": "unknown_action", "action": "zz" }),
                json!({ "error": "handler_failed", "action": "verChk" }),
                json!({ "error": "handler_failed", "action": "boom" }),
            ]
        );
    }
}
