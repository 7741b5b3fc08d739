// ============================================================================
// File: packages/gridplane/src/session/guard.rs
// ----------------------------------------------------------------------------
// The session gate every privileged operation passes through, and the
// command history written around those operations.
// ============================================================================

use chrono::Utc;
use log::debug;

use super::{SessionAuthority, SessionContext};
use crate::error::{GridError, GridResult};
use crate::store::{
    CommandRecord, CommandStatus, ObjectStatus, PasswordState, ServiceCategory, UserRecord,
};

impl SessionAuthority {
    /// Validate a session key without touching its bookkeeping
    ///
    /// Fails, in order, with SessionNotFound, SessionExpired, UserLocked and
    /// TemporaryPassword.
    pub fn check(&self, session_key: &str) -> GridResult<()> {
        self.authorize(session_key).map(|_| ())
    }

    /// `check`, returning the session and the user it acts as
    pub fn authorize(&self, session_key: &str) -> GridResult<SessionContext> {
        let session = self.load_session(session_key)?;
        if !session.is_active() {
            return Err(GridError::SessionExpired);
        }

        let user = self
            .db
            .find_user(&session.user_id)?
            .ok_or_else(|| GridError::UnknownUser(session.user_id.clone()))?;
        validate_user(&user)?;

        Ok(SessionContext { session, user })
    }

    /// Record the start of a command so `close` can see in-flight work
    ///
    /// # Returns
    /// Identifier of the RUNNING history entry
    pub fn start_command(
        &self,
        session_key: &str,
        description: &str,
        category: ServiceCategory,
    ) -> GridResult<u64> {
        self.check(session_key)?;
        let id = self.db.insert_command(CommandRecord {
            id: 0,
            session_key: session_key.to_string(),
            description: description.to_string(),
            category,
            status: CommandStatus::Running,
            object_id: None,
            started_at: Utc::now(),
            ended_at: None,
        })?;
        debug!("Command {} started: {}", id, description);
        Ok(id)
    }

    /// Record a completed operation and refresh the session's activity time
    ///
    /// A RUNNING entry with the same description is completed in place;
    /// otherwise a new entry is written.
    pub fn finish(
        &self,
        session_key: &str,
        description: &str,
        category: ServiceCategory,
        status: CommandStatus,
        new_object_id: Option<&str>,
        skip_check: bool,
    ) -> GridResult<()> {
        if !skip_check {
            self.check(session_key)?;
        }

        let now = Utc::now();
        if !self.db.touch_session(session_key, now)? {
            debug!("Session {session_key} closed before its activity could be refreshed");
        }

        let running = self
            .db
            .commands_for_session(session_key)?
            .into_iter()
            .rev()
            .find(|c| c.status == CommandStatus::Running && c.description == description);

        match running {
            Some(mut command) => {
                command.status = status;
                command.object_id = new_object_id.map(str::to_string);
                command.ended_at = Some(now);
                self.db.update_command(command)?;
            }
            None => {
                self.db.insert_command(CommandRecord {
                    id: 0,
                    session_key: session_key.to_string(),
                    description: description.to_string(),
                    category,
                    status,
                    object_id: new_object_id.map(str::to_string),
                    started_at: now,
                    ended_at: Some(now),
                })?;
            }
        }
        Ok(())
    }

    /// Whether any command of the session is still RUNNING
    pub fn has_running_command(&self, session_key: &str) -> GridResult<bool> {
        Ok(self
            .db
            .commands_for_session(session_key)?
            .iter()
            .any(|c| c.status == CommandStatus::Running))
    }
}

fn validate_user(user: &UserRecord) -> GridResult<()> {
    if user.status != ObjectStatus::Active {
        return Err(GridError::UserLocked(user.user_id.clone()));
    }
    if user.password_state == PasswordState::Temporary {
        return Err(GridError::TemporaryPassword(user.user_id.clone()));
    }
    Ok(())
}
