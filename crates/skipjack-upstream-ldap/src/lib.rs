//! Upstream LDAP / Active Directory identity-provider engine.
//!
//! Authenticates end users against an upstream directory using the
//! bind/search/bind pattern: bind as a service account, search for the
//! user's record, then prove the password by binding as the found DN.
//! Also re-validates previously issued identities without a password
//! and offers a dial+bind connectivity check.
//!
//! All directory I/O goes through the [`Connection`] and [`Dialer`]
//! traits; [`TlsDialer`] is the production implementation and tests
//! substitute fakes.

pub mod config;
pub mod dialer;
pub mod entry;
pub mod error;
pub mod filter;
pub mod provider;
pub mod transport;

pub use config::{
    AttributeValidator, ConnectionProtocol, GroupAttributeParser, GroupSearchConfig,
    ProviderConfig, UserSearchConfig,
};
pub use dialer::TlsDialer;
pub use entry::Entry;
pub use error::{BoxError, ProviderError, ProviderResult};
pub use provider::Provider;
pub use transport::{Connection, ConnectionError, Dialer, HostPort, SearchRequest, SearchScope};
