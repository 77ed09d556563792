//! Authentication context types.

use serde::{Deserialize, Serialize};

/// Method used to authenticate the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    /// Shared static bearer token from configuration.
    StaticToken,
}

/// Identity of an authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthContext {
    /// Principal name used in logs.
    pub principal: String,

    /// Authentication method used.
    pub auth_method: AuthMethod,
}

impl AuthContext {
    /// Context for a caller holding the static bearer token.
    pub fn static_token() -> Self {
        Self {
            principal: "bearer".to_string(),
            auth_method: AuthMethod::StaticToken,
        }
    }
}
