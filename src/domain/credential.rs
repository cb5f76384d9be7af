use std::fmt;

use serde::{Deserialize, Serialize};

/// Access token plus the account it belongs to.
///
/// Immutable once issued; a new auth flow replaces it wholesale.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    pub username: String,
}

impl Credential {
    pub fn new(access_token: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            username: username.into(),
        }
    }
}

// Keeps the token out of logs.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("username", &self.username)
            .finish()
    }
}

/// Short-lived token issued at the start of an auth flow.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestToken {
    pub code: String,
    pub redirect_uri: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_token() {
        let cred = Credential::new("secret-token", "alice");
        let printed = format!("{:?}", cred);
        assert!(!printed.contains("secret-token"));
        assert!(printed.contains("alice"));
    }
}
