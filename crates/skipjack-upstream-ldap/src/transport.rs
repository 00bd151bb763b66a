//! Transport abstraction for LDAP connections.
//!
//! The engine is written entirely against the [`Connection`] and
//! [`Dialer`] capability traits so that protocol logic stays decoupled
//! from network and TLS concerns. The production implementation lives
//! in [`crate::dialer`]; tests substitute in-memory fakes.

use std::net::IpAddr;

use async_trait::async_trait;
use thiserror::Error;
use url::{Host, Url};

use crate::entry::Entry;

/// LDAP result code returned when a bind is rejected because the
/// supplied credentials are wrong.
pub const RESULT_INVALID_CREDENTIALS: u32 = 49;

/// Default port assumed when the configured host omits one.
pub const DEFAULT_LDAPS_PORT: u16 = 636;

/// Error produced by a [`Connection`] or [`Dialer`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectionError {
    /// The server answered an operation with a non-success result code.
    #[error("LDAP result code {code}: {message}")]
    Rejected { code: u32, message: String },

    /// The operation failed below the LDAP protocol layer (TCP, TLS,
    /// host resolution, cancellation).
    #[error("{message}")]
    Transport { message: String },
}

impl ConnectionError {
    /// Creates a transport-level error from a message.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Whether this error is a bind rejection carrying the LDAP
    /// invalid-credentials result code. A wrong end-user password is
    /// the one protocol failure the engine treats as a non-error.
    pub fn is_invalid_credentials(&self) -> bool {
        matches!(
            self,
            Self::Rejected {
                code: RESULT_INVALID_CREDENTIALS,
                ..
            }
        )
    }
}

impl From<ldap3::LdapError> for ConnectionError {
    fn from(err: ldap3::LdapError) -> Self {
        match err {
            ldap3::LdapError::LdapResult { result } => Self::Rejected {
                code: result.rc,
                message: result.text,
            },
            other => Self::Transport {
                message: other.to_string(),
            },
        }
    }
}

/// Search scope requested from the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchScope {
    /// Only the entry named by the base DN itself.
    Base,
    /// The whole subtree under the base DN.
    Subtree,
}

/// A single search operation against the directory.
///
/// Comparable by value so that tests can assert the exact request the
/// engine issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub base_dn: String,
    pub scope: SearchScope,
    /// Maximum number of entries the server should return. Zero means
    /// unlimited, which is only used together with paging.
    pub size_limit: i32,
    /// Server-side time limit in seconds.
    pub time_limit: i32,
    pub filter: String,
    /// Attributes to request. Empty means only the entry DNs are of
    /// interest.
    pub attributes: Vec<String>,
}

/// A live, bindable connection to the directory.
///
/// One connection is acquired per engine call and released on every
/// exit path.
#[async_trait]
pub trait Connection: Send {
    /// Authenticate the connection as the given DN.
    async fn bind(&mut self, dn: &str, password: &str) -> Result<(), ConnectionError>;

    /// Run a size/time-limited search and collect all entries.
    async fn search(&mut self, request: &SearchRequest) -> Result<Vec<Entry>, ConnectionError>;

    /// Run a search using server-side paging controls, collecting the
    /// entries of every page.
    async fn search_paged(
        &mut self,
        request: &SearchRequest,
        page_size: u32,
    ) -> Result<Vec<Entry>, ConnectionError>;

    /// Release the connection. Close failures are not interesting to
    /// callers and must not mask the outcome of the operation.
    async fn close(&mut self);
}

/// Produces a [`Connection`] for a resolved host and port.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, host: &HostPort) -> Result<Box<dyn Connection>, ConnectionError>;
}

/// A validated `host:port` endpoint.
///
/// Parsing rejects anything that is not a plausible hostname or IP
/// literal before any network I/O happens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPort {
    host: String,
    port: u16,
}

impl HostPort {
    /// Parses `host`, `host:port`, or a bracketed IPv6 literal,
    /// falling back to `default_port` when no port is given.
    pub fn parse(hostport: &str, default_port: u16) -> Result<Self, ConnectionError> {
        let invalid = || {
            ConnectionError::transport(format!(
                "host {hostport:?} is not a valid hostname or IP address"
            ))
        };

        // Leaning on the URL parser gives us hostname syntax checks,
        // IPv6 bracket handling, and port validation in one place.
        let url = Url::parse(&format!("ldap://{hostport}")).map_err(|_| invalid())?;
        if !url.username().is_empty()
            || url.password().is_some()
            || url.query().is_some()
            || url.fragment().is_some()
            || !matches!(url.path(), "" | "/")
        {
            return Err(invalid());
        }

        let host = match url.host() {
            Some(Host::Domain(domain)) => {
                if !domain
                    .bytes()
                    .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_'))
                {
                    return Err(invalid());
                }
                domain.to_string()
            }
            Some(Host::Ipv4(ip)) => IpAddr::V4(ip).to_string(),
            // Keep the brackets so the value can be re-joined with a
            // port when forming a connection URL.
            Some(Host::Ipv6(ip)) => format!("[{ip}]"),
            None => return Err(invalid()),
        };

        Ok(Self {
            host,
            port: url.port().unwrap_or(default_port),
        })
    }

    /// The host part, with IPv6 literals kept in bracketed form.
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// The joined `host:port` form.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
