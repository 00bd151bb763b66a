//! Identity and refresh contract types.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Scope which must be granted before an upstream provider resolves
/// group memberships on behalf of a login or refresh.
pub const SCOPE_GROUPS: &str = "groups";

/// The result of a successful upstream authentication.
///
/// Produced once at login time and immutable thereafter. The pipeline
/// stores it and later round-trips parts of it back to the provider as
/// [`RefreshAttributes`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// The user's stable username as mapped from the upstream record.
    pub username: String,

    /// Opaque stable unique identifier, base64url (no padding) encoded.
    pub uid: String,

    /// Group names in ascending sorted order.
    ///
    /// `None` means group resolution was not performed (scope not
    /// granted, or the provider has no group search configured), which
    /// is distinct from `Some(vec![])` meaning a group search ran and
    /// matched nothing. Callers must preserve this distinction.
    pub groups: Option<Vec<String>>,

    /// The distinguished name of the upstream record, kept so the same
    /// record can be re-read during refresh.
    pub dn: String,

    /// Attribute values captured at login for later drift checks,
    /// keyed by attribute name, base64url (no padding) encoded.
    pub extra_refresh_attributes: HashMap<String, String>,
}

/// Attributes handed back by the pipeline when re-validating a
/// previously authenticated identity.
///
/// Every field was originally produced by the provider at login time
/// and must be round-tripped unmodified.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshAttributes {
    /// Username as returned at login.
    pub username: String,

    /// The storage-stable subject URL derived at login.
    pub subject: String,

    /// Distinguished name found at login.
    pub dn: String,

    /// Extra attribute values captured at login, encoded as in
    /// [`Identity::extra_refresh_attributes`].
    pub additional_attributes: HashMap<String, String>,

    /// Scopes granted to the session being refreshed.
    pub granted_scopes: Vec<String>,
}

impl RefreshAttributes {
    /// Whether the session was granted the given scope.
    pub fn has_granted_scope(&self, scope: &str) -> bool {
        self.granted_scopes.iter().any(|s| s == scope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_granted_scope() {
        let attrs = RefreshAttributes {
            granted_scopes: vec!["openid".to_string(), SCOPE_GROUPS.to_string()],
            ..Default::default()
        };
        assert!(attrs.has_granted_scope("groups"));
        assert!(attrs.has_granted_scope("openid"));
        assert!(!attrs.has_granted_scope("offline_access"));
    }

    #[test]
    fn test_groups_none_and_empty_are_distinct() {
        let not_resolved = Identity {
            username: "alice".to_string(),
            uid: "YWJj".to_string(),
            groups: None,
            dn: "cn=alice,ou=users,dc=example,dc=com".to_string(),
            extra_refresh_attributes: HashMap::new(),
        };
        let resolved_empty = Identity {
            groups: Some(Vec::new()),
            ..not_resolved.clone()
        };
        assert_ne!(not_resolved, resolved_empty);
    }
}
