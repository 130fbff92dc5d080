use std::fmt;

/// Session credential handed in by the auth collaborator.
///
/// The token is opaque here; it is only forwarded as a bearer credential.
#[derive(Clone, Default)]
pub struct SessionContext {
    token: Option<String>,
}

impl SessionContext {
    pub fn anonymous() -> Self {
        Self { token: None }
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        let token = token.into();
        Self {
            token: (!token.is_empty()).then_some(token),
        }
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn bearer(&self) -> Option<String> {
        self.token.as_ref().map(|t| format!("Bearer {}", t))
    }
}

// Keep the credential out of logs.
impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
