//! Provider configuration.
//!
//! A [`crate::provider::Provider`] owns a private copy of this
//! configuration taken at construction time; accessors hand out
//! copies, never shared references, so external mutation can never
//! reach the owned copy.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::entry::{Entry, DN_ATTRIBUTE};
use crate::error::{BoxError, ProviderError, ProviderResult};
use crate::transport::Dialer;
use skipjack_idp::RefreshAttributes;

/// How the connection to the directory is encrypted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionProtocol {
    /// No protocol was configured. Dialing fails explicitly rather
    /// than guessing.
    #[default]
    Unspecified,
    /// TLS negotiated immediately on connect (ldaps).
    #[serde(rename = "TLS")]
    Tls,
    /// Plaintext connect followed by an in-place TLS upgrade.
    #[serde(rename = "StartTLS")]
    StartTls,
}

/// Drift check invoked during refresh for one designated attribute.
///
/// Given the freshly read entry and the attributes captured at login,
/// a non-`Ok` result invalidates the refresh.
pub trait AttributeValidator: Send + Sync {
    fn validate(&self, entry: &Entry, attributes: &RefreshAttributes) -> Result<(), BoxError>;
}

impl<F> AttributeValidator for F
where
    F: Fn(&Entry, &RefreshAttributes) -> Result<(), BoxError> + Send + Sync,
{
    fn validate(&self, entry: &Entry, attributes: &RefreshAttributes) -> Result<(), BoxError> {
        self(entry, attributes)
    }
}

/// Override for turning a group search result entry into a group
/// name, replacing the default single-value attribute extraction.
pub trait GroupAttributeParser: Send + Sync {
    fn parse(&self, entry: &Entry) -> Result<String, BoxError>;
}

impl<F> GroupAttributeParser for F
where
    F: Fn(&Entry) -> Result<String, BoxError> + Send + Sync,
{
    fn parse(&self, entry: &Entry) -> Result<String, BoxError> {
        self(entry)
    }
}

/// How to search for the user record at login.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSearchConfig {
    /// Base DN under which users are searched.
    pub base: String,

    /// Filter template with `{}` placeholders for the username. When
    /// blank, an equality match on `username_attribute` is derived.
    #[serde(default)]
    pub filter: String,

    /// Attribute whose value is the user's stable username. The value
    /// `"dn"` selects the entry DN itself.
    pub username_attribute: String,

    /// Attribute whose (possibly binary) value is the user's stable
    /// unique identifier. The value `"dn"` selects the entry DN.
    pub uid_attribute: String,
}

/// How to resolve group memberships, when configured.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSearchConfig {
    /// Base DN under which groups are searched. Blank disables group
    /// search entirely.
    #[serde(default)]
    pub base: String,

    /// Filter template with `{}` placeholders for the user's DN (or
    /// the `user_attribute_for_filter` value). Blank defaults to
    /// `member={}`.
    #[serde(default)]
    pub filter: String,

    /// Attribute holding the group's display name. Blank defaults to
    /// the group entry DN.
    #[serde(default)]
    pub group_name_attribute: String,

    /// When set, refresh skips re-resolving groups.
    #[serde(default)]
    pub skip_group_refresh: bool,

    /// User attribute whose value is interpolated into the group
    /// filter instead of the user's DN. Blank or `"dn"` means the DN.
    #[serde(default)]
    pub user_attribute_for_filter: String,
}

impl GroupSearchConfig {
    /// The effective group-name attribute, defaulting to the DN.
    pub(crate) fn effective_group_name_attribute(&self) -> &str {
        if self.group_name_attribute.is_empty() {
            DN_ATTRIBUTE
        } else {
            &self.group_name_attribute
        }
    }

    /// The user attribute interpolated into the group filter, or
    /// `None` when the DN should be used.
    pub(crate) fn filter_attribute(&self) -> Option<&str> {
        match self.user_attribute_for_filter.as_str() {
            "" | DN_ATTRIBUTE => None,
            attr => Some(attr),
        }
    }
}

/// Complete configuration for one upstream LDAP directory.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Display name of the directory, used only for logging.
    pub name: String,

    /// `host` or `host:port` of the directory server.
    pub host: String,

    /// PEM CA bundle used to verify the server certificate. Empty
    /// means the system trust store.
    #[serde(default)]
    pub ca_bundle: Vec<u8>,

    /// TLS or StartTLS.
    #[serde(default)]
    pub connection_protocol: ConnectionProtocol,

    /// Service-account DN used for searches.
    pub bind_username: String,

    /// Service-account password.
    pub bind_password: String,

    pub user_search: UserSearchConfig,

    #[serde(default)]
    pub group_search: GroupSearchConfig,

    /// Per-attribute drift checks run during refresh. The named
    /// attributes are also captured (encoded) at login time.
    #[serde(skip)]
    pub refresh_attribute_checks: HashMap<String, Arc<dyn AttributeValidator>>,

    /// Per-attribute overrides for parsing group names out of group
    /// search results.
    #[serde(skip)]
    pub group_attribute_parsing_overrides: HashMap<String, Arc<dyn GroupAttributeParser>>,

    /// Replacement dialer. `None` selects the production TLS dialer.
    #[serde(skip)]
    pub dialer: Option<Arc<dyn Dialer>>,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("name", &self.name)
            .field("host", &self.host)
            .field("ca_bundle", &format_args!("{} bytes", self.ca_bundle.len()))
            .field("connection_protocol", &self.connection_protocol)
            .field("bind_username", &self.bind_username)
            .field("bind_password", &"***REDACTED***")
            .field("user_search", &self.user_search)
            .field("group_search", &self.group_search)
            .field(
                "refresh_attribute_checks",
                &self.refresh_attribute_checks.keys().collect::<Vec<_>>(),
            )
            .field(
                "group_attribute_parsing_overrides",
                &self
                    .group_attribute_parsing_overrides
                    .keys()
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl ProviderConfig {
    /// Fast-fail validation run before any network I/O.
    pub(crate) fn validate(&self) -> ProviderResult<()> {
        if self.user_search.username_attribute == DN_ATTRIBUTE && self.user_search.filter.is_empty()
        {
            return Err(ProviderError::invalid_configuration(
                "must specify a user search filter when the username attribute is \"dn\"",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_dn_username_attribute_without_filter() {
        let config = ProviderConfig {
            user_search: UserSearchConfig {
                username_attribute: "dn".to_string(),
                filter: String::new(),
                ..Default::default()
            },
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert_eq!(
            err.to_string(),
            "must specify a user search filter when the username attribute is \"dn\""
        );
    }

    #[test]
    fn test_validate_allows_dn_username_attribute_with_filter() {
        let config = ProviderConfig {
            user_search: UserSearchConfig {
                username_attribute: "dn".to_string(),
                filter: "(uid={})".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_effective_group_name_attribute_defaults_to_dn() {
        let config = GroupSearchConfig::default();
        assert_eq!(config.effective_group_name_attribute(), "dn");

        let config = GroupSearchConfig {
            group_name_attribute: "cn".to_string(),
            ..Default::default()
        };
        assert_eq!(config.effective_group_name_attribute(), "cn");
    }

    #[test]
    fn test_filter_attribute_treats_dn_as_unset() {
        let mut config = GroupSearchConfig::default();
        assert_eq!(config.filter_attribute(), None);

        config.user_attribute_for_filter = "dn".to_string();
        assert_eq!(config.filter_attribute(), None);

        config.user_attribute_for_filter = "sAMAccountName".to_string();
        assert_eq!(config.filter_attribute(), Some("sAMAccountName"));
    }

    #[test]
    fn test_debug_redacts_bind_password() {
        let config = ProviderConfig {
            bind_password: "super-secret".to_string(),
            ..Default::default()
        };
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("***REDACTED***"));
    }

    #[test]
    fn test_connection_protocol_serde_names() {
        assert_eq!(
            serde_json::to_string(&ConnectionProtocol::Tls).unwrap(),
            "\"TLS\""
        );
        assert_eq!(
            serde_json::to_string(&ConnectionProtocol::StartTls).unwrap(),
            "\"StartTLS\""
        );
    }
}
