// ============================================================================
// File: packages/gridplane/src/remote/ssh.rs
// ----------------------------------------------------------------------------
// SSH targets, authentication methods and session establishment.
// ============================================================================

use std::net::{TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{RemoteError, RemoteResult};

/// SSH authentication methods
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SshAuth {
    /// Agent-based authentication
    Agent,
    /// Key-based authentication with path to private key
    Key(PathBuf),
    /// Password authentication
    Password(String),
}

/// A remote account to run commands as
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SshTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
    /// Private key for this target; the executor's default auth otherwise
    #[serde(default)]
    pub identity: Option<PathBuf>,
}

impl SshTarget {
    pub fn new<H: Into<String>, U: Into<String>>(host: H, user: U) -> Self {
        Self {
            host: host.into(),
            port: 22,
            user: user.into(),
            identity: None,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_identity<P: Into<PathBuf>>(mut self, key: P) -> Self {
        self.identity = Some(key.into());
        self
    }
}

/// Open an authenticated session to `target`
pub(crate) fn create_session(
    target: &SshTarget,
    default_auth: &SshAuth,
    timeout: Duration,
) -> RemoteResult<ssh2::Session> {
    let connection_error = |details: String| RemoteError::Connection {
        host: target.host.clone(),
        details,
    };

    let address = (target.host.as_str(), target.port)
        .to_socket_addrs()
        .map_err(|e| connection_error(format!("Address resolution failed: {e}")))?
        .next()
        .ok_or_else(|| connection_error("Host resolved to no address".to_string()))?;

    let tcp = TcpStream::connect_timeout(&address, timeout)
        .map_err(|e| connection_error(format!("TCP connection failed: {e}")))?;

    let mut session = ssh2::Session::new()
        .map_err(|e| connection_error(format!("SSH session creation failed: {e}")))?;
    session.set_tcp_stream(tcp);
    session.set_timeout(u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX));
    session
        .handshake()
        .map_err(|e| connection_error(format!("SSH handshake failed: {e}")))?;

    let auth_error = |details: String| RemoteError::Auth {
        host: target.host.clone(),
        user: target.user.clone(),
        details,
    };

    let auth = match &target.identity {
        Some(key) => SshAuth::Key(key.clone()),
        None => default_auth.clone(),
    };
    match &auth {
        SshAuth::Agent => session
            .userauth_agent(&target.user)
            .map_err(|e| auth_error(format!("SSH agent auth failed: {e}")))?,
        SshAuth::Key(key_path) => session
            .userauth_pubkey_file(&target.user, None, key_path, None)
            .map_err(|e| auth_error(format!("SSH key auth failed: {e}")))?,
        SshAuth::Password(password) => session
            .userauth_password(&target.user, password)
            .map_err(|e| auth_error(format!("SSH password auth failed: {e}")))?,
    }

    if !session.authenticated() {
        return Err(auth_error("SSH authentication failed".to_string()));
    }

    Ok(session)
}
