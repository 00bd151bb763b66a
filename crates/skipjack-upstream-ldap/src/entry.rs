//! Directory entry representation and attribute extraction.
//!
//! Extraction enforces the exactly-one-non-empty-value rule: a
//! username or UID attribute that is missing, multi-valued, or empty
//! is always an error, never guessed at. String-valued and
//! byte-valued attributes are treated as equivalent since UID
//! attributes are commonly binary.

use std::collections::HashMap;

use crate::error::{ProviderError, ProviderResult};

/// Attribute name that is never looked up on the entry's attribute
/// list; it refers to the entry's own DN.
pub const DN_ATTRIBUTE: &str = "dn";

/// One entry returned by a directory search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Entry {
    /// Distinguished name of the entry.
    pub dn: String,
    attributes: HashMap<String, Vec<Vec<u8>>>,
}

impl Entry {
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            attributes: HashMap::new(),
        }
    }

    /// Adds a string-valued attribute. Builder-style, used when
    /// assembling entries by hand.
    pub fn with_attribute(mut self, name: impl Into<String>, values: Vec<&str>) -> Self {
        self.set_raw_attribute(name, values.into_iter().map(|v| v.as_bytes().to_vec()).collect());
        self
    }

    /// Sets an attribute from raw bytes, replacing any previous values.
    pub fn set_raw_attribute(&mut self, name: impl Into<String>, values: Vec<Vec<u8>>) {
        self.attributes.insert(name.into(), values);
    }

    /// All raw values of the named attribute, or an empty slice when
    /// the attribute is absent.
    pub fn raw_values(&self, name: &str) -> &[Vec<u8>] {
        self.attributes.get(name).map_or(&[], Vec::as_slice)
    }

    /// All values of the named attribute as strings. Non-UTF-8 bytes
    /// are replaced rather than dropped so the value count always
    /// matches [`Entry::raw_values`].
    pub fn string_values(&self, name: &str) -> Vec<String> {
        self.raw_values(name)
            .iter()
            .map(|v| String::from_utf8_lossy(v).into_owned())
            .collect()
    }
}

impl From<ldap3::SearchEntry> for Entry {
    fn from(entry: ldap3::SearchEntry) -> Self {
        let mut attributes: HashMap<String, Vec<Vec<u8>>> =
            HashMap::with_capacity(entry.attrs.len() + entry.bin_attrs.len());
        for (name, values) in entry.attrs {
            attributes.insert(name, values.into_iter().map(String::into_bytes).collect());
        }
        // ldap3 routes values that are not valid UTF-8 here instead.
        for (name, values) in entry.bin_attrs {
            attributes.entry(name).or_default().extend(values);
        }
        Self {
            dn: entry.dn,
            attributes,
        }
    }
}

/// Extracts the single string value of `attribute` from `entry`.
///
/// `user` identifies the subject being searched for and only appears
/// in error messages.
pub fn attribute_value(entry: &Entry, attribute: &str, user: &str) -> ProviderResult<String> {
    if attribute == DN_ATTRIBUTE {
        return entry_dn(entry, user);
    }
    let values = entry.string_values(attribute);
    let value = exactly_one(values, attribute, user)?;
    if value.is_empty() {
        return Err(ProviderError::EmptyAttributeValue {
            attribute: attribute.to_string(),
            user: user.to_string(),
        });
    }
    Ok(value)
}

/// Extracts the single raw value of `attribute` from `entry`.
pub fn raw_attribute_value(entry: &Entry, attribute: &str, user: &str) -> ProviderResult<Vec<u8>> {
    if attribute == DN_ATTRIBUTE {
        return entry_dn(entry, user).map(String::into_bytes);
    }
    let values = entry.raw_values(attribute).to_vec();
    let value = exactly_one(values, attribute, user)?;
    if value.is_empty() {
        return Err(ProviderError::EmptyAttributeValue {
            attribute: attribute.to_string(),
            user: user.to_string(),
        });
    }
    Ok(value)
}

fn entry_dn(entry: &Entry, user: &str) -> ProviderResult<String> {
    if entry.dn.is_empty() {
        return Err(ProviderError::UserSearchResultMissingDn {
            user: user.to_string(),
        });
    }
    Ok(entry.dn.clone())
}

fn exactly_one<T>(mut values: Vec<T>, attribute: &str, user: &str) -> ProviderResult<T> {
    if values.len() != 1 {
        return Err(ProviderError::AttributeValueCount {
            attribute: attribute.to_string(),
            user: user.to_string(),
            count: values.len(),
        });
    }
    Ok(values.remove(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> Entry {
        Entry::new("cn=alice,ou=users,dc=example,dc=com")
            .with_attribute("uid", vec!["alice"])
            .with_attribute("mail", vec!["a@example.com", "alice@example.com"])
            .with_attribute("emptyAttr", vec![""])
    }

    #[test]
    fn test_single_value_is_returned() {
        assert_eq!(attribute_value(&entry(), "uid", "alice").unwrap(), "alice");
        assert_eq!(
            raw_attribute_value(&entry(), "uid", "alice").unwrap(),
            b"alice".to_vec()
        );
    }

    #[test]
    fn test_missing_attribute_names_the_attribute_and_count() {
        let err = attribute_value(&entry(), "missing", "alice").unwrap_err();
        assert_eq!(
            err.to_string(),
            "found 0 values for attribute \"missing\" while searching for user \"alice\", but expected 1 result"
        );
    }

    #[test]
    fn test_multiple_values_are_rejected() {
        let err = attribute_value(&entry(), "mail", "alice").unwrap_err();
        assert_eq!(
            err.to_string(),
            "found 2 values for attribute \"mail\" while searching for user \"alice\", but expected 1 result"
        );
    }

    #[test]
    fn test_empty_value_is_rejected() {
        let err = attribute_value(&entry(), "emptyAttr", "alice").unwrap_err();
        assert_eq!(
            err.to_string(),
            "found empty value for attribute \"emptyAttr\" while searching for user \"alice\", but expected value to be non-empty"
        );
        let err = raw_attribute_value(&entry(), "emptyAttr", "alice").unwrap_err();
        assert!(matches!(err, ProviderError::EmptyAttributeValue { .. }));
    }

    #[test]
    fn test_dn_attribute_returns_the_entry_dn() {
        let e = entry();
        assert_eq!(attribute_value(&e, "dn", "alice").unwrap(), e.dn);
        assert_eq!(
            raw_attribute_value(&e, "dn", "alice").unwrap(),
            e.dn.as_bytes().to_vec()
        );
    }

    #[test]
    fn test_dn_attribute_on_entry_without_dn_fails() {
        let e = Entry::new("");
        let err = attribute_value(&e, "dn", "alice").unwrap_err();
        assert_eq!(
            err.to_string(),
            "searching for user \"alice\" resulted in search result without DN"
        );
    }

    #[test]
    fn test_binary_and_string_values_are_equivalent() {
        let mut e = Entry::new("cn=g");
        e.set_raw_attribute("objectGUID", vec![vec![0x01, 0xff, 0x02]]);
        assert_eq!(
            raw_attribute_value(&e, "objectGUID", "alice").unwrap(),
            vec![0x01, 0xff, 0x02]
        );
        // String extraction still counts the binary value.
        assert_eq!(e.string_values("objectGUID").len(), 1);
    }

    #[test]
    fn test_search_entry_conversion_merges_binary_attributes() {
        let converted = Entry::from(ldap3::SearchEntry {
            dn: "cn=alice".to_string(),
            attrs: HashMap::from([("uid".to_string(), vec!["alice".to_string()])]),
            bin_attrs: HashMap::from([("objectGUID".to_string(), vec![vec![0xde, 0xad]])]),
        });
        assert_eq!(converted.dn, "cn=alice");
        assert_eq!(converted.string_values("uid"), vec!["alice"]);
        assert_eq!(converted.raw_values("objectGUID"), [vec![0xde, 0xad]]);
    }
}
