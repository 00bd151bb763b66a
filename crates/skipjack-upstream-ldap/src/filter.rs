//! LDAP search filter construction.
//!
//! Untrusted values are escaped per RFC 4515 before being
//! interpolated into the configured filter templates, whether they
//! come from end-user input (the login username) or from the directory
//! itself (a DN or attribute value fed into the group search). Both
//! are untrusted from the filter's perspective.

use crate::config::{GroupSearchConfig, UserSearchConfig};

/// Placeholder replaced by the escaped value in filter templates.
const PLACEHOLDER: &str = "{}";

/// Group search filter used when none is configured.
const DEFAULT_GROUP_SEARCH_FILTER: &str = "member={}";

/// Escape special characters in LDAP filter values (RFC 4515).
pub fn escape_filter_value(value: &str) -> String {
    value
        .replace('\\', "\\5c")
        .replace('*', "\\2a")
        .replace('(', "\\28")
        .replace(')', "\\29")
        .replace('\0', "\\00")
}

/// Builds the filter used to locate a user record from the login
/// username. Falls back to an equality match on the username
/// attribute when no template is configured.
pub fn user_search_filter(config: &UserSearchConfig, username: &str) -> String {
    let safe_username = escape_filter_value(username);
    if config.filter.is_empty() {
        return format!("({}={})", config.username_attribute, safe_username);
    }
    interpolate(&config.filter, &safe_username)
}

/// Builds the group membership filter from the user's DN or the
/// configured filter attribute value.
pub fn group_search_filter(config: &GroupSearchConfig, user_value: &str) -> String {
    let safe_value = escape_filter_value(user_value);
    if config.filter.is_empty() {
        return interpolate(DEFAULT_GROUP_SEARCH_FILTER, &safe_value);
    }
    interpolate(&config.filter, &safe_value)
}

/// Substitutes every placeholder and wraps the result in one
/// parenthesis pair, unless the template was already wrapped.
fn interpolate(template: &str, escaped_value: &str) -> String {
    let replaced = template.replace(PLACEHOLDER, escaped_value);
    if template.starts_with('(') && template.ends_with(')') {
        return replaced;
    }
    format!("({replaced})")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_config(filter: &str) -> UserSearchConfig {
        UserSearchConfig {
            base: "ou=users,dc=example,dc=com".to_string(),
            filter: filter.to_string(),
            username_attribute: "uid".to_string(),
            uid_attribute: "uid".to_string(),
        }
    }

    fn group_config(filter: &str) -> GroupSearchConfig {
        GroupSearchConfig {
            base: "ou=groups,dc=example,dc=com".to_string(),
            filter: filter.to_string(),
            group_name_attribute: "cn".to_string(),
            skip_group_refresh: false,
            user_attribute_for_filter: String::new(),
        }
    }

    #[test]
    fn test_escapes_every_metacharacter() {
        assert_eq!(
            escape_filter_value(r"a&b|c(d)e\f*g"),
            r"a&b|c\28d\29e\5cf\2ag"
        );
        assert_eq!(escape_filter_value("nul\0byte"), "nul\\00byte");
        // Backslash escaping must not re-escape the escapes it emits.
        assert_eq!(escape_filter_value(r"\2a"), r"\5c2a");
    }

    #[test]
    fn test_user_filter_interpolates_into_template() {
        let config = user_config("some-filter={}-and-more={}");
        assert_eq!(
            user_search_filter(&config, "alice"),
            "(some-filter=alice-and-more=alice)"
        );
    }

    #[test]
    fn test_wrapped_template_is_not_double_wrapped() {
        let config = user_config("(some-filter={})");
        assert_eq!(user_search_filter(&config, "alice"), "(some-filter=alice)");
    }

    #[test]
    fn test_blank_user_filter_derives_equality_match() {
        let config = user_config("");
        assert_eq!(user_search_filter(&config, "alice"), "(uid=alice)");
        assert_eq!(
            user_search_filter(&config, "a(b)c"),
            r"(uid=a\28b\29c)"
        );
    }

    #[test]
    fn test_username_is_escaped_inside_template() {
        let config = user_config("(uid={})");
        assert_eq!(
            user_search_filter(&config, r"a&b|c(d)e\f*g"),
            r"(uid=a&b|c\28d\29e\5cf\2ag)"
        );
    }

    #[test]
    fn test_blank_group_filter_defaults_to_member_match() {
        let config = group_config("");
        assert_eq!(
            group_search_filter(&config, "cn=alice,ou=users,dc=example,dc=com"),
            "(member=cn=alice,ou=users,dc=example,dc=com)"
        );
    }

    #[test]
    fn test_group_filter_escapes_special_characters_in_dn() {
        let config = group_config("");
        assert_eq!(
            group_search_filter(&config, r"user DN with * \ special characters ()"),
            r"(member=user DN with \2a \5c special characters \28\29)"
        );
    }

    #[test]
    fn test_group_template_wrapping_matches_user_rules() {
        assert_eq!(
            group_search_filter(&group_config("member={}"), "cn=g"),
            "(member=cn=g)"
        );
        assert_eq!(
            group_search_filter(&group_config("(member={})"), "cn=g"),
            "(member=cn=g)"
        );
    }
}
