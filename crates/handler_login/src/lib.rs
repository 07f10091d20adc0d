//! Login handshake handlers.
//!
//! Build this crate and drop the resulting library into the handler tree
//! (for example as `Handlers/Login/libhandler_login.so`); the login server
//! then routes `verChk`, `rndK` and `login` to it.
//!
//! Logging goes through [`Session::log`] so lines land in the server's logs.

use handler_system::{export_handler_module, HandlerError, LogLevel, ModuleRegistrar, Session};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::{SystemTime, UNIX_EPOCH};

/// Client builds this server speaks to.
pub const SUPPORTED_CLIENT_VERSION: u64 = 153;

#[derive(Debug, Deserialize)]
struct VersionCheck {
    version: u64,
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

fn parse<T: for<'de> Deserialize<'de>>(data: &Value) -> Result<T, HandlerError> {
    T::deserialize(data).map_err(|e| HandlerError::InvalidPayload(e.to_string()))
}

fn handle_version_check(session: &mut dyn Session, data: &Value) -> Result<(), HandlerError> {
    let request: VersionCheck = parse(data)?;
    if request.version == SUPPORTED_CLIENT_VERSION {
        session.send(json!({ "action": "apiOK" }));
    } else {
        session.log(
            LogLevel::Debug,
            &format!("Unsupported client {} rejected", request.version),
        );
        session.send(json!({ "action": "apiKO" }));
        session.close();
    }
    Ok(())
}

fn handle_random_key(session: &mut dyn Session, _data: &Value) -> Result<(), HandlerError> {
    session.send(json!({ "action": "rndK", "key": random_key(session.connection_id()) }));
    Ok(())
}

fn handle_login(session: &mut dyn Session, data: &Value) -> Result<(), HandlerError> {
    let request: LoginRequest = parse(data)?;
    if request.username.trim().is_empty() {
        return Err(HandlerError::InvalidPayload("empty username".to_string()));
    }
    if request.password.is_empty() {
        return Err(HandlerError::InvalidPayload("empty password".to_string()));
    }

    session.log(LogLevel::Info, &format!("🔑 {} is logging in", request.username));
    session.send(json!({ "action": "l", "username": request.username }));
    Ok(())
}

/// Per-connection key used to salt the client's password hash.
fn random_key(connection_id: u64) -> String {
    let mut hasher = DefaultHasher::new();
    connection_id.hash(&mut hasher);
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default()
        .hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

pub fn register(module: &mut ModuleRegistrar) {
    module.handler("verChk", "handle_version_check", handle_version_check);
    module.handler("rndK", "handle_random_key", handle_random_key);

    let login = module.function("handle_login", handle_login);
    module.listen("login", &login);
}

export_handler_module!(register);

#[cfg(test)]
mod tests {
    use super::*;
    use handler_system::{build, DispatchRegistry, ListenerTable, ModulePath, ScopeFilter};

    #[derive(Default)]
    struct TestSession {
        sent: Vec<Value>,
        closed: bool,
        logged: std::cell::RefCell<Vec<(LogLevel, String)>>,
    }

    impl Session for TestSession {
        fn connection_id(&self) -> u64 {
            42
        }

        fn send(&mut self, message: Value) {
            self.sent.push(message);
        }

        fn close(&mut self) {
            self.closed = true;
        }

        fn log(&self, level: LogLevel, message: &str) {
            self.logged.borrow_mut().push((level, message.to_string()));
        }
    }

    fn registry() -> DispatchRegistry {
        let listeners = ListenerTable::new();
        let mut registrar = ModuleRegistrar::new(ModulePath::new("Handlers.Login.Login"), 1);
        register(&mut registrar);
        let module = registrar.commit(&listeners).unwrap();
        DispatchRegistry::from_table(build(&[module], &listeners, &ScopeFilter::All))
    }

    #[test]
    fn test_registers_three_actions() {
        let registry = registry();
        let mut actions: Vec<String> = registry.actions().iter().map(|a| a.to_string()).collect();
        actions.sort();
        assert_eq!(actions, vec!["login", "rndK", "verChk"]);
        assert_eq!(registry.lookup("login").unwrap().name(), "handle_login");
    }

    #[test]
    fn test_version_check() {
        let registry = registry();
        let mut session = TestSession::default();

        registry.dispatch("verChk", &mut session, &json!({ "version": 153 })).unwrap();
        assert_eq!(session.sent, vec![json!({ "action": "apiOK" })]);
        assert!(!session.closed);

        registry.dispatch("verChk", &mut session, &json!({ "version": 100 })).unwrap();
        assert_eq!(session.sent[1], json!({ "action": "apiKO" }));
        assert!(session.closed);
        assert_eq!(session.logged.borrow()[0].0, LogLevel::Debug);

        assert!(registry.dispatch("verChk", &mut session, &json!({})).is_err());
    }

    #[test]
    fn test_random_key_and_login() {
        let registry = registry();
        let mut session = TestSession::default();

        registry.dispatch("rndK", &mut session, &Value::Null).unwrap();
        let key = session.sent[0]["key"].as_str().unwrap();
        assert_eq!(key.len(), 16);

        registry
            .dispatch("login", &mut session, &json!({ "username": "Rockhopper", "password": "x" }))
            .unwrap();
        assert_eq!(session.sent[1], json!({ "action": "l", "username": "Rockhopper" }));
        assert_eq!(
            session.logged.borrow().as_slice(),
            &[(LogLevel::Info, "🔑 Rockhopper is logging in".to_string())]
        );

        assert!(registry
            .dispatch("login", &mut session, &json!({ "username": " ", "password": "x" }))
            .is_err());
    }
}
