//! Credential container with automatic memory zeroing.
//!
//! # Security
//! - Username and password are stored in `Zeroizing<T>` containers
//! - Memory is cleared when the credentials go out of scope
//! - The password never appears in debug output or logs

use std::fmt;

use zeroize::Zeroizing;

/// Database credentials handed to the dump tool.
///
/// The username becomes the `-U` argument; the password only ever reaches
/// the child through `PGPASSWORD`.
///
/// # Example
///
/// ```rust
/// use pgstream_core::security::Credentials;
///
/// let creds = Credentials::new("admin".to_string(), Some("secret".to_string()));
/// assert_eq!(creds.username(), "admin");
/// assert!(creds.has_password());
/// assert!(!format!("{:?}", creds).contains("secret"));
/// ```
#[derive(Clone)]
pub struct Credentials {
    username: Zeroizing<String>,
    password: Zeroizing<Option<String>>,
}

impl Credentials {
    /// Creates new credentials with automatic memory zeroing.
    pub fn new(username: String, password: Option<String>) -> Self {
        Self {
            username: Zeroizing::new(username),
            password: Zeroizing::new(password),
        }
    }

    /// Gets the username.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Checks if a password is present without exposing it.
    pub fn has_password(&self) -> bool {
        self.password.is_some()
    }

    /// Value for `PGPASSWORD`; empty when no password was given.
    pub(crate) fn password_or_empty(&self) -> &str {
        self.password.as_deref().unwrap_or_default()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username())
            .field("password", &self.has_password().then_some("****"))
            .finish()
    }
}
