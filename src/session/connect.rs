// ============================================================================
// File: packages/gridplane/src/session/connect.rs
// ----------------------------------------------------------------------------
// Session creation and resumption:
// - connect: authenticate, resolve identity, mint key and id, persist
// - reconnect: hand back the key of a still-active session
// ============================================================================

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use rand::Rng;

use super::{
    ClosePolicy, ConnectOptions, Credentials, Session, SessionAuthority, SessionState,
};
use crate::error::{GridError, GridResult};
use crate::store::{ObjectStatus, UserRecord};

const SESSION_KEY_CONTEXT: &str = "gridplane 2024-06 session key";
const SESSION_ID_ATTEMPTS: usize = 8;

impl SessionAuthority {
    /// Open a new session
    ///
    /// # Arguments
    /// * `credentials` - User id and password of the caller
    /// * `client_host` - Host the caller connects from
    /// * `options` - Close policy, timeout and optional substitute identity
    ///
    /// # Returns
    /// The persisted session, including its secret key
    pub fn connect(
        &self,
        credentials: &Credentials,
        client_host: &str,
        options: &ConnectOptions,
    ) -> GridResult<Session> {
        let user = self.authenticate(credentials)?;
        if user.status != ObjectStatus::Active {
            return Err(GridError::UserLocked(user.user_id));
        }

        let acting_user = match options.substitute_user_id.as_deref() {
            Some(substitute) if substitute != user.user_id => {
                if !user.is_admin() {
                    return Err(GridError::PermissionDenied(format!(
                        "{} may not connect as {}",
                        user.user_id, substitute
                    )));
                }
                self.db
                    .find_user(substitute)?
                    .ok_or_else(|| GridError::UnknownUser(substitute.to_string()))?
                    .user_id
            }
            _ => user.user_id.clone(),
        };

        let (close_policy, timeout) = self.solve_connection_mode(options);
        let now = Utc::now();
        let session = Session {
            session_key: generate_session_key(&user.user_id, now),
            session_id: self.unused_session_id(&acting_user, now)?,
            user_id: acting_user,
            authenticated_as: user.user_id,
            client_host: client_host.to_string(),
            close_policy,
            timeout,
            state: SessionState::Active,
            created_at: now,
            last_activity_at: now,
            closed_at: None,
        };

        self.db.insert_session(session.clone())?;
        info!(
            "Session {} opened for {} from {} ({}, timeout {:?})",
            session.session_id, session.user_id, client_host, close_policy, timeout
        );
        Ok(session)
    }

    /// Resume an active session by its identifier
    ///
    /// Admins with valid credentials may resume any session. Everyone else
    /// must present the owning user, the owning host and a valid password.
    pub fn reconnect(
        &self,
        credentials: &Credentials,
        client_host: &str,
        session_id: &str,
    ) -> GridResult<Session> {
        let user = self
            .db
            .find_user(&credentials.user_id)?
            .ok_or_else(|| GridError::UnknownUser(credentials.user_id.clone()))?;

        let mut session = self
            .db
            .find_session_by_id(session_id)?
            .ok_or_else(|| GridError::UnknownSessionId(session_id.to_string()))?;

        if !session.is_active() {
            return Err(GridError::SessionExpired);
        }

        let authenticated = match self.authenticate(credentials) {
            Ok(_) => true,
            Err(GridError::UnknownUser(_)) => false,
            Err(e) => return Err(e),
        };

        let owner_matches = session.client_host == client_host
            && (session.user_id == user.user_id || session.authenticated_as == user.user_id);

        if !(authenticated && (user.is_admin() || owner_matches)) {
            warn!(
                "Refused reconnection of {} to session {} from {}",
                user.user_id, session_id, client_host
            );
            return Err(GridError::SessionNotFound);
        }

        session.last_activity_at = Utc::now();
        if !self.db.touch_session(&session.session_key, session.last_activity_at)? {
            return Err(GridError::SessionExpired);
        }
        debug!("Session {} resumed by {}", session_id, user.user_id);
        Ok(session)
    }

    /// Resolve the persisted close policy and timeout for new sessions
    ///
    /// DEFAULT stays DEFAULT and only carries a timeout when the server
    /// default closes on timeout. ON_TIMEOUT takes the caller's delay, or the
    /// server default when none (or zero) was given. ON_DISCONNECT stores no
    /// timeout.
    pub fn solve_connection_mode(&self, options: &ConnectOptions) -> (ClosePolicy, Option<u64>) {
        match options.close_policy {
            ClosePolicy::Default => {
                let timeout = (self.defaults.effective_policy(ClosePolicy::Default)
                    == ClosePolicy::OnTimeout)
                    .then_some(self.defaults.timeout);
                (ClosePolicy::Default, timeout)
            }
            ClosePolicy::OnTimeout => {
                let timeout = options
                    .timeout
                    .filter(|seconds| *seconds > 0)
                    .unwrap_or(self.defaults.timeout);
                (ClosePolicy::OnTimeout, Some(timeout))
            }
            ClosePolicy::OnDisconnect => (ClosePolicy::OnDisconnect, None),
        }
    }

    /// Resolve credentials to a user.
    ///
    /// The local password is tried first, then every active account the user
    /// holds on an active authentication system.
    fn authenticate(&self, credentials: &Credentials) -> GridResult<UserRecord> {
        let unknown = || GridError::UnknownUser(credentials.user_id.clone());

        let user = self.db.find_user(&credentials.user_id)?.ok_or_else(unknown)?;
        if user.password_matches(&credentials.password) {
            return Ok(user);
        }

        for account in self.db.auth_accounts_for_user(&user.user_id)? {
            if account.status != ObjectStatus::Active {
                continue;
            }
            let Some(system) = self.db.find_auth_system(&account.auth_system_id)? else {
                continue;
            };
            if system.status != ObjectStatus::Active {
                continue;
            }
            match self
                .verifier
                .verify(&system, &account.login, &credentials.password)
            {
                Ok(true) => {
                    debug!(
                        "{} authenticated through {}",
                        user.user_id, system.auth_system_id
                    );
                    return Ok(user);
                }
                Ok(false) => {}
                Err(e) => warn!(
                    "Authentication system {} unavailable: {}",
                    system.auth_system_id, e
                ),
            }
        }

        Err(unknown())
    }

    fn unused_session_id(&self, user_id: &str, now: DateTime<Utc>) -> GridResult<String> {
        for _ in 0..SESSION_ID_ATTEMPTS {
            let candidate = generate_session_id(user_id, now);
            if self.db.find_session_by_id(&candidate)?.is_none() {
                return Ok(candidate);
            }
        }
        Err(GridError::system(format!(
            "Could not generate a free session id for {user_id}"
        )))
    }
}

/// Two-stage keyed hash: keyed by the user, then by the first digest over the
/// connection instant, followed by a random numeric tail.
pub(crate) fn generate_session_key(user_id: &str, instant: DateTime<Utc>) -> String {
    let mut rng = rand::rng();

    let user_key = blake3::derive_key(SESSION_KEY_CONTEXT, user_id.as_bytes());
    let nonce: [u8; 16] = rng.random();
    let first = blake3::keyed_hash(&user_key, &nonce);

    let stamp = instant
        .timestamp_nanos_opt()
        .unwrap_or_else(|| instant.timestamp_micros())
        .to_le_bytes();
    let second = blake3::keyed_hash(first.as_bytes(), &stamp);

    let tail: u32 = rng.random_range(0..1_000_000);
    format!("{}{:06}", second.to_hex(), tail)
}

/// `<userId>-<date>-<time>:<random>`
pub(crate) fn generate_session_id(user_id: &str, instant: DateTime<Utc>) -> String {
    let tail: u32 = rand::rng().random_range(0..100_000);
    format!(
        "{}-{}-{}:{}",
        user_id,
        instant.format("%Y-%m-%d"),
        instant.format("%H:%M:%S"),
        tail
    )
}
