// ============================================================================
// File: packages/gridplane/src/session/lifecycle.rs
// ----------------------------------------------------------------------------
// Session termination:
// - close: explicit close, demoting disconnect sessions with work in flight
// - close_expired_sessions: one pass of the inactivity sweep
// - spawn_expiry_sweep: the sweep on a fixed interval
// ============================================================================

use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, error, info};

use super::{ClosePolicy, Session, SessionAuthority, SessionState};
use crate::async_task::{AsyncTask, AsyncTaskBuilder};
use crate::error::{GridError, GridResult};

impl SessionAuthority {
    /// Close a session
    ///
    /// When a command is still running, a session that closes on disconnect
    /// is demoted to close on timeout instead; any other policy fails with
    /// CommandRunning.
    pub fn close(&self, session_key: &str) -> GridResult<()> {
        let mut session = self.load_session(session_key)?;
        if !session.is_active() {
            return Err(GridError::SessionExpired);
        }

        if self.has_running_command(session_key)? {
            if self.defaults.effective_policy(session.close_policy) == ClosePolicy::OnDisconnect {
                session.close_policy = ClosePolicy::OnTimeout;
                session.timeout = Some(self.defaults.timeout);
                self.db.update_session(session.clone())?;
                info!(
                    "Session {} has a running command, closing on timeout ({}s) instead",
                    session.session_id, self.defaults.timeout
                );
                return Ok(());
            }
            return Err(GridError::CommandRunning(session.session_id));
        }

        self.mark_closed(session, Utc::now())
    }

    /// Close every active session idle for longer than its timeout
    ///
    /// # Returns
    /// Number of sessions closed
    pub fn close_expired_sessions(&self, now: DateTime<Utc>) -> GridResult<usize> {
        let mut closed = 0;
        for session in self.db.active_sessions()? {
            if self.is_expired(&session, now) {
                self.mark_closed(session, now)?;
                closed += 1;
            }
        }
        if closed > 0 {
            info!("Expiry sweep closed {} session(s)", closed);
        }
        Ok(closed)
    }

    /// Run the expiry sweep every `interval` until the task is aborted
    pub fn spawn_expiry_sweep(&self, interval: Duration) -> AsyncTask<()> {
        let authority = self.clone();

        AsyncTaskBuilder::new(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = authority.close_expired_sessions(Utc::now()) {
                    error!("Session expiry sweep failed: {}", e);
                }
            }
        })
        .spawn()
    }

    fn is_expired(&self, session: &Session, now: DateTime<Utc>) -> bool {
        if self.defaults.effective_policy(session.close_policy) != ClosePolicy::OnTimeout {
            return false;
        }
        let timeout = session.timeout.unwrap_or(self.defaults.timeout);
        let idle = now.signed_duration_since(session.last_activity_at);
        idle.num_seconds() > i64::try_from(timeout).unwrap_or(i64::MAX)
    }

    fn mark_closed(&self, mut session: Session, at: DateTime<Utc>) -> GridResult<()> {
        session.state = SessionState::Closed;
        session.closed_at = Some(at);
        debug!("Closing session {}", session.session_id);
        self.db.update_session(session)?;
        Ok(())
    }
}
