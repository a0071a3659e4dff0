//! Identities, credentials and sessions
//!
//! An [`Identity`] says *who* a call runs as. A [`Session`] is the opaque
//! credential that authorizes calls for that identity; sessions are immutable
//! snapshots and are only ever replaced, never mutated.

use crate::error::{ClientError, Result};
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use zeroize::Zeroize;

/// Secret string with automatic memory clearing
#[derive(Clone)]
pub struct SecureCredential {
    value: String,
}

impl SecureCredential {
    /// Create a new secure credential with validation
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        Self::validate_credential(&value)?;
        Ok(Self { value })
    }

    /// Get the credential value (limited access)
    pub fn expose_secret(&self) -> &str {
        &self.value
    }

    fn validate_credential(value: &str) -> Result<()> {
        if value.is_empty() {
            return Err(ClientError::Validation(
                "Credential cannot be empty".to_string(),
            ));
        }

        if value.len() > 1024 {
            return Err(ClientError::Validation("Credential too long".to_string()));
        }

        // Control characters would end up inside a JSON body or a header
        if value.chars().any(|c| c.is_control()) {
            return Err(ClientError::Validation(
                "Credential contains control characters".to_string(),
            ));
        }

        Ok(())
    }
}

impl fmt::Debug for SecureCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecureCredential(***)")
    }
}

impl Drop for SecureCredential {
    fn drop(&mut self) {
        self.value.zeroize();
    }
}

impl Zeroize for SecureCredential {
    fn zeroize(&mut self) {
        self.value.zeroize();
    }
}

/// Login credentials for one service account
#[derive(Debug, Clone)]
pub struct Credentials {
    database: String,
    login: String,
    password: SecureCredential,
}

impl Credentials {
    pub fn new(
        database: impl Into<String>,
        login: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self> {
        let database = database.into();
        let login = login.into();

        if database.trim().is_empty() {
            return Err(ClientError::validation("Database name cannot be empty"));
        }
        if login.trim().is_empty() {
            return Err(ClientError::validation("Login cannot be empty"));
        }

        Ok(Self {
            database,
            login,
            password: SecureCredential::new(password)?,
        })
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn login(&self) -> &str {
        &self.login
    }

    pub fn password(&self) -> &SecureCredential {
        &self.password
    }
}

/// Named background identity; the name is the session cache key
#[derive(Debug, Clone)]
pub struct ServiceAccount {
    name: String,
    credentials: Arc<Credentials>,
}

impl ServiceAccount {
    pub fn new(name: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            name: name.into(),
            credentials: Arc::new(credentials),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }
}

/// Who a call runs as
#[derive(Debug, Clone)]
pub enum Identity {
    /// End user; the token is the session cookie forwarded from the browser
    User { session_token: String },
    /// Background job identity, logged in and cached by the session store
    ServiceAccount(ServiceAccount),
}

impl Identity {
    pub fn user(session_token: impl Into<String>) -> Self {
        Identity::User {
            session_token: session_token.into(),
        }
    }

    pub fn service_account(account: ServiceAccount) -> Self {
        Identity::ServiceAccount(account)
    }

    /// Short label for logs. Never contains the user token.
    pub fn label(&self) -> &str {
        match self {
            Identity::User { .. } => "user",
            Identity::ServiceAccount(account) => account.name(),
        }
    }
}

/// Scope a session was issued for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionScope {
    User,
    ServiceAccount(String),
}

/// Authorized session snapshot
#[derive(Clone, PartialEq)]
pub struct Session {
    token: String,
    obtained_at: DateTime<Utc>,
    scope: SessionScope,
    uid: Option<i64>,
    display_name: Option<String>,
}

impl Session {
    /// Wrap a forwarded user cookie. No login happens for user sessions.
    pub fn for_user(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            obtained_at: Utc::now(),
            scope: SessionScope::User,
            uid: None,
            display_name: None,
        }
    }

    /// Session freshly issued by a login for a service account
    pub fn for_service_account(account: &str, token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            obtained_at: Utc::now(),
            scope: SessionScope::ServiceAccount(account.to_string()),
            uid: None,
            display_name: None,
        }
    }

    /// Attach the user id and display name echoed by the login body
    pub fn with_profile(mut self, uid: Option<i64>, display_name: Option<String>) -> Self {
        self.uid = uid;
        self.display_name = display_name;
        self
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn obtained_at(&self) -> DateTime<Utc> {
        self.obtained_at
    }

    pub fn scope(&self) -> &SessionScope {
        &self.scope
    }

    pub fn uid(&self) -> Option<i64> {
        self.uid
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("token", &"***")
            .field("obtained_at", &self.obtained_at)
            .field("scope", &self.scope)
            .field("uid", &self.uid)
            .field("display_name", &self.display_name)
            .finish()
    }
}
