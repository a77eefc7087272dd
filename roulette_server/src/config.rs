//! Server configuration

use crate::error::ServerError;
use crate::pool::SelectionPolicy;
use std::net::SocketAddr;
use std::time::Duration;

/// Default listen address
pub const DEFAULT_ADDR: &str = "0.0.0.0:5002";

/// Knobs of the pairing engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingPolicy {
    /// How a searcher picks among waiting candidates
    pub selection: SelectionPolicy,
    /// Let the janitor pair waiters that are still unmatched after a sweep
    pub force_match: bool,
    /// Put the ex-partner back in the waiting pool on `next-partner`
    pub requeue_partner_on_next: bool,
}

impl Default for PairingPolicy {
    fn default() -> Self {
        Self {
            selection: SelectionPolicy::Fifo,
            force_match: false,
            requeue_partner_on_next: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    /// Origins allowed to open a socket. Empty allows any origin.
    pub allowed_origins: Vec<String>,
    pub janitor_interval: Duration,
    pub ping_interval: Duration,
    /// Close a connection that has sent nothing (pongs included) for this long
    pub idle_timeout: Duration,
    pub pairing: PairingPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 5002)),
            allowed_origins: Vec::new(),
            janitor_interval: Duration::from_secs(10),
            ping_interval: Duration::from_secs(25),
            idle_timeout: Duration::from_secs(60),
            pairing: PairingPolicy::default(),
        }
    }
}

impl ServerConfig {
    /// Loopback address on an OS-assigned port, suitable for tests
    pub fn for_tests() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ServerError> {
        if self.janitor_interval.is_zero() {
            return Err(ServerError::Config("janitor interval must be non-zero".into()));
        }
        if self.ping_interval.is_zero() {
            return Err(ServerError::Config("ping interval must be non-zero".into()));
        }
        if self.idle_timeout <= self.ping_interval {
            return Err(ServerError::Config(
                "idle timeout must be longer than the ping interval".into(),
            ));
        }
        Ok(())
    }

    /// Whether a handshake carrying `origin` may proceed
    pub fn origin_allowed(&self, origin: Option<&str>) -> bool {
        if self.allowed_origins.is_empty() {
            return true;
        }
        origin.is_some_and(|origin| {
            self.allowed_origins
                .iter()
                .any(|allowed| allowed == "*" || allowed.eq_ignore_ascii_case(origin))
        })
    }
}
