// ============================================================================
// File: packages/gridplane/src/auth/mod.rs
// ----------------------------------------------------------------------------
// External authentication systems.
//
// Records describing directories (LDAP) the session authority may delegate
// password checks to, the verifier seam that performs those checks, and the
// admin-gated registry that manages the records.
// ============================================================================

mod registry;

use serde::{Deserialize, Serialize};

pub use registry::{AuthSystemQuery, AuthSystemRegistry, AuthSystemSpec, AuthSystemUpdate};

use crate::error::{GridError, GridResult};
use crate::store::ObjectStatus;

/// Placeholder every LDAP base must contain
pub const USERNAME_PLACEHOLDER: &str = "$USERNAME";

/// Kind of authentication system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuthSystemType {
    Local,
    Ldap,
}

/// How the directory stores passwords
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PasswordEncryption {
    Ssha,
}

/// An external authentication system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSystem {
    pub auth_system_id: String,
    pub name: String,
    pub uri: String,
    pub auth_login: String,
    pub auth_password: String,
    pub system_type: AuthSystemType,
    pub ldap_base: String,
    pub password_encryption: PasswordEncryption,
    pub status: ObjectStatus,
}

impl AuthSystem {
    /// Distinguished name to bind as for `login`
    pub fn bind_dn(&self, login: &str) -> String {
        self.ldap_base.replace(USERNAME_PLACEHOLDER, login)
    }

    pub fn is_deleted(&self) -> bool {
        self.status == ObjectStatus::Deleted
    }
}

/// Checks a password against an external authentication system
///
/// The directory protocol lives behind this trait; the control plane only
/// needs a yes/no answer.
pub trait CredentialVerifier: Send + Sync + std::fmt::Debug {
    /// # Returns
    /// `Ok(true)` when `password` is valid for `login` on `system`,
    /// `Ok(false)` when it is rejected, and an error when the system cannot be
    /// reached
    fn verify(&self, system: &AuthSystem, login: &str, password: &str) -> GridResult<bool>;
}

/// Verifier for deployments without external directories
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalOnlyVerifier;

impl CredentialVerifier for LocalOnlyVerifier {
    fn verify(&self, system: &AuthSystem, _login: &str, _password: &str) -> GridResult<bool> {
        Err(GridError::Connection {
            host: system.uri.clone(),
            details: "no directory client configured".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_dn_substitutes_the_login() {
        let system = AuthSystem {
            auth_system_id: "AUTH_1".to_string(),
            name: "corp".to_string(),
            uri: "ldap://ldap.example.org".to_string(),
            auth_login: "cn=admin".to_string(),
            auth_password: "secret".to_string(),
            system_type: AuthSystemType::Ldap,
            ldap_base: "uid=$USERNAME,ou=people,dc=example,dc=org".to_string(),
            password_encryption: PasswordEncryption::Ssha,
            status: ObjectStatus::Active,
        };

        assert_eq!(
            system.bind_dn("alice"),
            "uid=alice,ou=people,dc=example,dc=org"
        );
    }
}
