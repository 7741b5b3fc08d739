// ============================================================================
// File: packages/gridplane/src/auth/registry.rs
// ----------------------------------------------------------------------------
// Admin-gated management of authentication system records.
// ============================================================================

use std::sync::Arc;

use log::info;

use super::{AuthSystem, AuthSystemType, PasswordEncryption, USERNAME_PLACEHOLDER};
use crate::error::{GridError, GridResult};
use crate::ids::{IdentifierAllocator, ObjectType};
use crate::session::{SessionAuthority, SessionContext};
use crate::store::{CommandStatus, Database, ObjectStatus, ServiceCategory};

/// Fields of a new authentication system
#[derive(Debug, Clone)]
pub struct AuthSystemSpec {
    /// Explicit identifier; generated when absent
    pub auth_system_id: Option<String>,
    pub name: String,
    pub uri: String,
    pub auth_login: String,
    pub auth_password: String,
    pub system_type: AuthSystemType,
    pub ldap_base: String,
    pub password_encryption: PasswordEncryption,
}

/// Changes applied by `update`; absent fields are kept
#[derive(Debug, Clone, Default)]
pub struct AuthSystemUpdate {
    pub name: Option<String>,
    pub uri: Option<String>,
    pub auth_login: Option<String>,
    pub auth_password: Option<String>,
    pub ldap_base: Option<String>,
    pub status: Option<ObjectStatus>,
}

/// Filters for `list`
#[derive(Debug, Clone, Default)]
pub struct AuthSystemQuery {
    pub auth_system_id: Option<String>,
    /// Include DELETED systems (admins only)
    pub include_deleted: bool,
}

/// CRUD over authentication systems
#[derive(Debug, Clone)]
pub struct AuthSystemRegistry {
    db: Arc<dyn Database>,
    sessions: SessionAuthority,
    ids: Arc<IdentifierAllocator>,
}

impl AuthSystemRegistry {
    pub fn new(
        db: Arc<dyn Database>,
        sessions: SessionAuthority,
        ids: Arc<IdentifierAllocator>,
    ) -> Self {
        Self { db, sessions, ids }
    }

    /// Register a new LDAP authentication system
    pub fn add(&self, session_key: &str, spec: AuthSystemSpec) -> GridResult<AuthSystem> {
        let ctx = self.sessions.authorize(session_key)?;
        ctx.require_admin("Adding an authentication system")?;

        let result = self.insert(spec);
        let created = result.as_ref().ok().map(|s| s.auth_system_id.as_str());
        self.record(&ctx, "auth_system_create", result.is_ok(), created)?;
        result
    }

    /// Change fields of a live authentication system
    pub fn update(
        &self,
        session_key: &str,
        auth_system_id: &str,
        changes: AuthSystemUpdate,
    ) -> GridResult<AuthSystem> {
        let ctx = self.sessions.authorize(session_key)?;
        ctx.require_admin("Updating an authentication system")?;

        let result = self.apply(auth_system_id, changes);
        self.record(&ctx, "auth_system_update", result.is_ok(), Some(auth_system_id))?;
        result
    }

    /// Soft-delete an authentication system and every account bound to it
    pub fn delete(&self, session_key: &str, auth_system_id: &str) -> GridResult<()> {
        let ctx = self.sessions.authorize(session_key)?;
        ctx.require_admin("Deleting an authentication system")?;

        let result = self.remove(auth_system_id);
        self.record(&ctx, "auth_system_delete", result.is_ok(), Some(auth_system_id))?;
        result
    }

    /// List authentication systems visible to the caller
    pub fn list(&self, session_key: &str, query: &AuthSystemQuery) -> GridResult<Vec<AuthSystem>> {
        let ctx = self.sessions.authorize(session_key)?;
        if query.include_deleted {
            ctx.require_admin("Listing deleted authentication systems")?;
        }

        let mut systems: Vec<AuthSystem> = self
            .db
            .auth_systems()?
            .into_iter()
            .filter(|s| query.include_deleted || !s.is_deleted())
            .collect();

        if let Some(wanted) = query.auth_system_id.as_deref() {
            systems.retain(|s| s.auth_system_id == wanted);
            if systems.is_empty() {
                return Err(GridError::UnknownAuthSystem(wanted.to_string()));
            }
        }

        self.sessions.finish(
            &ctx.session.session_key,
            "auth_system_list",
            ServiceCategory::Ums,
            CommandStatus::Success,
            None,
            true,
        )?;
        Ok(systems)
    }

    fn insert(&self, spec: AuthSystemSpec) -> GridResult<AuthSystem> {
        if spec.system_type != AuthSystemType::Ldap {
            return Err(GridError::invalid(
                "Only LDAP authentication systems can be registered",
            ));
        }
        validate_ldap_base(&spec.ldap_base)?;

        let live = self.db.auth_systems()?;
        if live.iter().any(|s| !s.is_deleted() && s.name == spec.name) {
            return Err(GridError::AuthSystemAlreadyExists(spec.name));
        }

        let auth_system_id = match spec.auth_system_id {
            Some(id) => {
                if self.db.find_auth_system(&id)?.is_some() {
                    return Err(GridError::AuthSystemAlreadyExists(id));
                }
                id
            }
            None => self
                .ids
                .next_id(ObjectType::AuthSystem, Some(spec.name.as_str()), None)?,
        };

        let system = AuthSystem {
            auth_system_id,
            name: spec.name,
            uri: spec.uri,
            auth_login: spec.auth_login,
            auth_password: spec.auth_password,
            system_type: spec.system_type,
            ldap_base: spec.ldap_base,
            password_encryption: spec.password_encryption,
            status: ObjectStatus::Active,
        };
        self.db.insert_auth_system(system.clone())?;
        info!(
            "Authentication system {} ({}) registered",
            system.auth_system_id, system.uri
        );
        Ok(system)
    }

    fn apply(&self, auth_system_id: &str, changes: AuthSystemUpdate) -> GridResult<AuthSystem> {
        let mut system = self.live_system(auth_system_id)?;

        if let Some(status) = changes.status {
            match status {
                ObjectStatus::Locked if system.status == ObjectStatus::Locked => {
                    return Err(GridError::AuthSystemAlreadyLocked(
                        auth_system_id.to_string(),
                    ));
                }
                ObjectStatus::Deleted => {
                    return Err(GridError::invalid(
                        "Use delete to remove an authentication system",
                    ));
                }
                _ => system.status = status,
            }
        }
        if let Some(name) = changes.name {
            let taken = self.db.auth_systems()?.iter().any(|s| {
                !s.is_deleted() && s.name == name && s.auth_system_id != auth_system_id
            });
            if taken {
                return Err(GridError::AuthSystemAlreadyExists(name));
            }
            system.name = name;
        }
        if let Some(ldap_base) = changes.ldap_base {
            validate_ldap_base(&ldap_base)?;
            system.ldap_base = ldap_base;
        }
        if let Some(uri) = changes.uri {
            system.uri = uri;
        }
        if let Some(login) = changes.auth_login {
            system.auth_login = login;
        }
        if let Some(password) = changes.auth_password {
            system.auth_password = password;
        }

        self.db.update_auth_system(system.clone())?;
        Ok(system)
    }

    fn remove(&self, auth_system_id: &str) -> GridResult<()> {
        let mut system = self.live_system(auth_system_id)?;
        system.status = ObjectStatus::Deleted;
        self.db.update_auth_system(system)?;

        let accounts = self
            .db
            .set_auth_accounts_status(auth_system_id, ObjectStatus::Deleted)?;
        info!(
            "Authentication system {} deleted along with {} account(s)",
            auth_system_id, accounts
        );
        Ok(())
    }

    fn live_system(&self, auth_system_id: &str) -> GridResult<AuthSystem> {
        self.db
            .find_auth_system(auth_system_id)?
            .filter(|s| !s.is_deleted())
            .ok_or_else(|| GridError::UnknownAuthSystem(auth_system_id.to_string()))
    }

    fn record(
        &self,
        ctx: &SessionContext,
        description: &str,
        succeeded: bool,
        object_id: Option<&str>,
    ) -> GridResult<()> {
        let status = if succeeded {
            CommandStatus::Success
        } else {
            CommandStatus::Failed
        };
        self.sessions.finish(
            &ctx.session.session_key,
            description,
            ServiceCategory::Ums,
            status,
            object_id.filter(|_| succeeded),
            true,
        )
    }
}

fn validate_ldap_base(ldap_base: &str) -> GridResult<()> {
    if ldap_base.contains(USERNAME_PLACEHOLDER) {
        Ok(())
    } else {
        Err(GridError::invalid(format!(
            "LDAP base '{ldap_base}' must contain {USERNAME_PLACEHOLDER}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::AuthAccount;
    use crate::testing::{ADMIN, ALICE, Fixture};

    fn ldap_spec(name: &str) -> AuthSystemSpec {
        AuthSystemSpec {
            auth_system_id: None,
            name: name.to_string(),
            uri: "ldap://ldap.example.org:389".to_string(),
            auth_login: "cn=admin,dc=example,dc=org".to_string(),
            auth_password: "secret".to_string(),
            system_type: AuthSystemType::Ldap,
            ldap_base: "uid=$USERNAME,ou=people,dc=example,dc=org".to_string(),
            password_encryption: PasswordEncryption::Ssha,
        }
    }

    fn registry(fx: &Fixture) -> AuthSystemRegistry {
        AuthSystemRegistry::new(fx.db.clone(), fx.sessions.clone(), fx.ids.clone())
    }

    #[test]
    fn admin_registers_system_with_generated_id() {
        let fx = Fixture::new();
        let key = fx.login(ADMIN);

        let system = registry(&fx).add(&key, ldap_spec("corp")).expect("add");

        assert_eq!(system.auth_system_id, "AUTH_1");
        assert_eq!(system.status, ObjectStatus::Active);
        let history = fx.db.commands_for_session(&key).expect("history");
        assert!(history.iter().any(|c| c.description == "auth_system_create"
            && c.status == CommandStatus::Success
            && c.object_id.as_deref() == Some("AUTH_1")));
    }

    #[test]
    fn non_admin_cannot_register() {
        let fx = Fixture::new();
        let key = fx.login(ALICE);

        let err = registry(&fx).add(&key, ldap_spec("corp")).expect_err("denied");
        assert!(matches!(err, GridError::PermissionDenied(_)));
        assert!(fx.db.auth_systems().expect("list").is_empty());
    }

    #[test]
    fn ldap_base_needs_username_placeholder() {
        let fx = Fixture::new();
        let key = fx.login(ADMIN);
        let mut spec = ldap_spec("corp");
        spec.ldap_base = "ou=people,dc=example,dc=org".to_string();

        let err = registry(&fx).add(&key, spec).expect_err("invalid base");
        assert!(matches!(err, GridError::InvalidParameter(_)));

        let mut spec = ldap_spec("corp");
        spec.system_type = AuthSystemType::Local;
        assert!(matches!(
            registry(&fx).add(&key, spec),
            Err(GridError::InvalidParameter(_))
        ));
    }

    #[test]
    fn duplicate_name_or_id_is_rejected() {
        let fx = Fixture::new();
        let key = fx.login(ADMIN);
        let reg = registry(&fx);
        reg.add(&key, ldap_spec("corp")).expect("add");

        assert!(matches!(
            reg.add(&key, ldap_spec("corp")),
            Err(GridError::AuthSystemAlreadyExists(_))
        ));

        let mut spec = ldap_spec("other");
        spec.auth_system_id = Some("AUTH_1".to_string());
        assert!(matches!(
            reg.add(&key, spec),
            Err(GridError::AuthSystemAlreadyExists(_))
        ));
    }

    #[test]
    fn locking_twice_fails() {
        let fx = Fixture::new();
        let key = fx.login(ADMIN);
        let reg = registry(&fx);
        let system = reg.add(&key, ldap_spec("corp")).expect("add");
        let lock = AuthSystemUpdate {
            status: Some(ObjectStatus::Locked),
            ..Default::default()
        };

        let locked = reg
            .update(&key, &system.auth_system_id, lock.clone())
            .expect("lock");
        assert_eq!(locked.status, ObjectStatus::Locked);
        assert!(matches!(
            reg.update(&key, &system.auth_system_id, lock),
            Err(GridError::AuthSystemAlreadyLocked(_))
        ));
    }

    #[test]
    fn delete_cascades_to_accounts_and_hides_the_system() {
        let fx = Fixture::new();
        let key = fx.login(ADMIN);
        let reg = registry(&fx);
        let system = reg.add(&key, ldap_spec("corp")).expect("add");
        fx.db
            .insert_auth_account(AuthAccount {
                user_id: ALICE.0.to_string(),
                auth_system_id: system.auth_system_id.clone(),
                login: "alice.l".to_string(),
                status: ObjectStatus::Active,
            })
            .expect("account");

        reg.delete(&key, &system.auth_system_id).expect("delete");

        let accounts = fx.db.auth_accounts_for_user(ALICE.0).expect("accounts");
        assert!(accounts.iter().all(|a| a.status == ObjectStatus::Deleted));
        assert!(reg.list(&key, &AuthSystemQuery::default()).expect("list").is_empty());
        assert!(matches!(
            reg.delete(&key, &system.auth_system_id),
            Err(GridError::UnknownAuthSystem(_))
        ));

        let all = reg
            .list(
                &key,
                &AuthSystemQuery {
                    include_deleted: true,
                    ..Default::default()
                },
            )
            .expect("list all");
        assert_eq!(all.len(), 1);
    }

    #[test]
    fn list_by_unknown_id_fails() {
        let fx = Fixture::new();
        let key = fx.login(ALICE);
        let query = AuthSystemQuery {
            auth_system_id: Some("AUTH_9".to_string()),
            include_deleted: false,
        };

        assert!(matches!(
            registry(&fx).list(&key, &query),
            Err(GridError::UnknownAuthSystem(_))
        ));
    }
}
