//! Error types for the upstream LDAP provider.
//!
//! The taxonomy distinguishes configuration errors (caught before any
//! network I/O), transport and protocol failures, attribute
//! cardinality violations, and identity drift detected during refresh.
//! A wrong password is deliberately not represented here: the engine
//! reports it as an unauthenticated outcome, not an error.

use thiserror::Error;

use crate::transport::ConnectionError;

/// Boxed error type accepted from caller-supplied validators and
/// group-attribute parsers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Error that can occur while authenticating, refreshing, or testing a
/// connection against the upstream directory.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider configuration is invalid. Detected before any
    /// network I/O is attempted.
    #[error("{message}")]
    InvalidConfiguration { message: String },

    /// Failed to reach the directory host.
    #[error("error dialing host {host:?}: {source}")]
    Dial {
        host: String,
        #[source]
        source: ConnectionError,
    },

    /// The service-account bind before a user search failed, whether
    /// at login or during refresh.
    #[error("error binding as {dn:?} before user search: {source}")]
    ServiceAccountBind {
        dn: String,
        #[source]
        source: ConnectionError,
    },

    /// The service-account bind of a connection test failed.
    #[error("error binding as {dn:?}: {source}")]
    Bind {
        dn: String,
        #[source]
        source: ConnectionError,
    },

    /// The user search operation itself failed.
    #[error("error searching for user: {source}")]
    UserSearch {
        #[source]
        source: ConnectionError,
    },

    /// The refresh-time search by original DN failed.
    #[error("error searching for user {dn:?}: {source}")]
    RefreshUserSearch {
        dn: String,
        #[source]
        source: ConnectionError,
    },

    /// The group-membership search failed, either at the protocol
    /// level or while extracting a group name from a result entry.
    #[error("error searching for group memberships for user with DN {dn:?}: {source}")]
    GroupSearch {
        dn: String,
        #[source]
        source: BoxError,
    },

    /// A configured group-attribute parsing override rejected a group
    /// search result entry.
    #[error("error finding groups for user {dn}: {source}")]
    GroupParsing {
        dn: String,
        #[source]
        source: BoxError,
    },

    /// A user search matched more (or, during refresh, fewer) entries
    /// than the exactly-one the protocol requires.
    #[error("searching for user {user:?} resulted in {count} search results, but expected 1 result")]
    UserSearchResultCount { user: String, count: usize },

    /// A user search result entry carried no DN.
    #[error("searching for user {user:?} resulted in search result without DN")]
    UserSearchResultMissingDn { user: String },

    /// The refresh-time search by original DN returned an entry
    /// without a DN.
    #[error("searching for user with original DN {dn:?} resulted in search result without DN")]
    RefreshSearchResultMissingDn { dn: String },

    /// A group search result entry carried no DN.
    #[error("searching for group memberships for user with DN {dn:?} resulted in search result without DN")]
    GroupSearchResultMissingDn { dn: String },

    /// A required attribute did not have exactly one value.
    #[error("found {count} values for attribute {attribute:?} while searching for user {user:?}, but expected 1 result")]
    AttributeValueCount {
        attribute: String,
        user: String,
        count: usize,
    },

    /// A required attribute had exactly one value, but it was empty.
    #[error("found empty value for attribute {attribute:?} while searching for user {user:?}, but expected value to be non-empty")]
    EmptyAttributeValue { attribute: String, user: String },

    /// Binding as the end user failed for a reason other than the
    /// invalid-credentials result code.
    #[error("error binding for user {username:?} using provided password against DN {dn:?}: {source}")]
    UserBind {
        username: String,
        dn: String,
        #[source]
        source: ConnectionError,
    },

    /// The subject recomputed during refresh differs from the subject
    /// recorded at login.
    #[error("searching for user {dn:?} produced a different subject than the previous value. expected: {expected:?}, actual: {actual:?}")]
    SubjectChanged {
        dn: String,
        expected: String,
        actual: String,
    },

    /// The username re-read during refresh differs from the username
    /// recorded at login.
    #[error("searching for user {dn:?} returned a different username than the previous value. expected: {expected:?}, actual: {actual:?}")]
    UsernameChanged {
        dn: String,
        expected: String,
        actual: String,
    },

    /// A registered per-attribute drift check rejected the freshly
    /// read entry.
    #[error("validation for attribute {attribute:?} failed during upstream refresh: {source}")]
    RefreshAttributeCheck {
        attribute: String,
        #[source]
        source: BoxError,
    },
}

impl ProviderError {
    /// Creates a configuration error.
    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            message: message.into(),
        }
    }
}

/// Convenience alias used throughout the engine.
pub type ProviderResult<T> = Result<T, ProviderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_error_messages() {
        let err = ProviderError::AttributeValueCount {
            attribute: "uid".to_string(),
            user: "alice".to_string(),
            count: 2,
        };
        assert_eq!(
            err.to_string(),
            "found 2 values for attribute \"uid\" while searching for user \"alice\", but expected 1 result"
        );

        let err = ProviderError::EmptyAttributeValue {
            attribute: "uid".to_string(),
            user: "alice".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "found empty value for attribute \"uid\" while searching for user \"alice\", but expected value to be non-empty"
        );
    }

    #[test]
    fn test_drift_error_messages() {
        let err = ProviderError::SubjectChanged {
            dn: "cn=a".to_string(),
            expected: "ldaps://h?base=b&sub=old".to_string(),
            actual: "ldaps://h?base=b&sub=new".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "searching for user \"cn=a\" produced a different subject than the previous value. expected: \"ldaps://h?base=b&sub=old\", actual: \"ldaps://h?base=b&sub=new\""
        );
    }
}
