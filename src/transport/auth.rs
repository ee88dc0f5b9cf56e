use std::sync::{Arc, RwLock};

/// Bearer token shared by the REST client and the socket.
#[derive(Debug, Clone, Default)]
pub struct AuthToken(Arc<RwLock<Option<String>>>);

impl AuthToken {
    pub fn new(token: impl Into<String>) -> Self {
        let auth = Self::default();
        auth.set(Some(token.into()));
        auth
    }

    pub fn set(&self, token: Option<String>) {
        let mut guard = match self.0.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = token.filter(|t| !t.is_empty());
    }

    pub fn get(&self) -> Option<String> {
        match self.0.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn bearer(&self) -> Option<String> {
        self.get().map(|token| format!("Bearer {token}"))
    }
}
