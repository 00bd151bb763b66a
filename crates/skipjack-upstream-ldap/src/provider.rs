//! The upstream LDAP provider engine.
//!
//! Implements the bind/search/bind authentication flow, password-less
//! re-validation of previously authenticated identities, and a minimal
//! dial+bind connectivity check. Every call acquires one connection
//! through the configured [`Dialer`] and releases it on every exit
//! path; the provider itself holds no per-request state and is safe
//! for concurrent use.

use std::collections::HashMap;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use tracing::{debug, info, instrument};
use url::form_urlencoded;

use crate::config::ProviderConfig;
use crate::dialer::TlsDialer;
use crate::entry::{self, Entry, DN_ATTRIBUTE};
use crate::error::{ProviderError, ProviderResult};
use crate::filter;
use crate::transport::{
    Connection, Dialer, HostPort, SearchRequest, SearchScope, DEFAULT_LDAPS_PORT,
};
use skipjack_idp::{Identity, RefreshAttributes, SCOPE_GROUPS};

/// Page size for group membership searches. Group result sets are
/// unbounded, so they are always retrieved with server-side paging.
pub const GROUP_SEARCH_PAGE_SIZE: u32 = 250;

/// User searches expect exactly one result; asking for two lets the
/// server tell us cheaply when the filter was ambiguous.
const USER_SEARCH_SIZE_LIMIT: i32 = 2;

/// Server-side time limit for all searches, in seconds.
const SEARCH_TIME_LIMIT_SECONDS: i32 = 90;

/// Filter matching any entry, used when searching a known DN.
const MATCH_ANY_FILTER: &str = "(objectClass=*)";

/// An authenticator backed by one upstream LDAP directory.
///
/// The provider owns a private copy of its configuration; mutations of
/// the value passed to [`Provider::new`] or returned by
/// [`Provider::config`] never affect it.
pub struct Provider {
    config: ProviderConfig,
}

impl Provider {
    pub fn new(config: ProviderConfig) -> Self {
        Self { config }
    }

    /// Display name of the directory this provider talks to.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// A copy of the provider's configuration.
    pub fn config(&self) -> ProviderConfig {
        self.config.clone()
    }

    /// The identity-provider URL of this directory:
    /// `ldaps://<host>?base=<user search base>`.
    pub fn url(&self) -> String {
        let query = form_urlencoded::Serializer::new(String::new())
            .append_pair("base", &self.config.user_search.base)
            .finish();
        format!("ldaps://{}?{}", self.config.host, query)
    }

    /// The storage-stable subject string for a UID read from the
    /// directory. Byte-for-byte reproducible for the same host, user
    /// search base, and UID bytes.
    fn subject_for_uid(&self, uid: &[u8]) -> String {
        let query = form_urlencoded::Serializer::new(String::new())
            .append_pair("base", &self.config.user_search.base)
            .append_pair("sub", &URL_SAFE_NO_PAD.encode(uid))
            .finish();
        format!("ldaps://{}?{}", self.config.host, query)
    }

    /// Authenticates an end user against the directory.
    ///
    /// Returns `Ok(None)` when the user does not exist or the password
    /// is wrong; both are expected outcomes, not system faults. All
    /// other failures are errors.
    #[instrument(skip(self, password, granted_scopes), fields(provider = %self.config.name))]
    pub async fn authenticate_user(
        &self,
        username: &str,
        password: &str,
        granted_scopes: &[String],
    ) -> ProviderResult<Option<Identity>> {
        self.authenticate(username, Some(password), granted_scopes)
            .await
    }

    /// Runs the full authentication flow except the final end-user
    /// bind. Used to validate directory configuration without a
    /// password.
    #[instrument(skip(self, granted_scopes), fields(provider = %self.config.name))]
    pub async fn dry_run_authenticate_user(
        &self,
        username: &str,
        granted_scopes: &[String],
    ) -> ProviderResult<Option<Identity>> {
        self.authenticate(username, None, granted_scopes).await
    }

    /// Re-validates a previously authenticated identity without the
    /// user's password. Fails on any sign of identity drift. Returns
    /// the freshly resolved groups, or `None` when group refresh was
    /// skipped.
    #[instrument(skip(self, attributes), fields(provider = %self.config.name, dn = %attributes.dn))]
    pub async fn perform_refresh(
        &self,
        attributes: &RefreshAttributes,
    ) -> ProviderResult<Option<Vec<String>>> {
        self.config.validate()?;
        let mut conn = self.dial().await?;
        let result = self.refresh_user(conn.as_mut(), attributes).await;
        conn.close().await;
        result
    }

    /// Dial + service-account bind health check. Never touches user
    /// data.
    #[instrument(skip(self), fields(provider = %self.config.name))]
    pub async fn test_connection(&self) -> ProviderResult<()> {
        self.config.validate()?;
        let mut conn = self.dial().await?;
        let result = conn
            .bind(&self.config.bind_username, &self.config.bind_password)
            .await
            .map_err(|source| ProviderError::Bind {
                dn: self.config.bind_username.clone(),
                source,
            });
        conn.close().await;
        result
    }

    async fn authenticate(
        &self,
        username: &str,
        password: Option<&str>,
        granted_scopes: &[String],
    ) -> ProviderResult<Option<Identity>> {
        if username.is_empty() {
            // Some directories match every entry when an empty value
            // is interpolated into the filter; refuse before dialing.
            debug!("empty username is never authenticated");
            return Ok(None);
        }
        self.config.validate()?;

        let mut conn = self.dial().await?;
        let result = self
            .search_and_bind_user(conn.as_mut(), username, password, granted_scopes)
            .await;
        conn.close().await;

        if let Ok(Some(identity)) = &result {
            info!(username = %identity.username, "upstream LDAP authentication succeeded");
        }
        result
    }

    async fn dial(&self) -> ProviderResult<Box<dyn Connection>> {
        let dial_error = |source| ProviderError::Dial {
            host: self.config.host.clone(),
            source,
        };
        let host = HostPort::parse(&self.config.host, DEFAULT_LDAPS_PORT).map_err(dial_error)?;
        debug!(endpoint = %host.endpoint(), "dialing upstream directory");
        match &self.config.dialer {
            Some(dialer) => dialer.dial(&host).await,
            None => {
                TlsDialer::new(
                    self.config.connection_protocol,
                    self.config.ca_bundle.clone(),
                )
                .dial(&host)
                .await
            }
        }
        .map_err(dial_error)
    }

    async fn search_and_bind_user(
        &self,
        conn: &mut dyn Connection,
        username: &str,
        password: Option<&str>,
        granted_scopes: &[String],
    ) -> ProviderResult<Option<Identity>> {
        let config = &self.config;
        conn.bind(&config.bind_username, &config.bind_password)
            .await
            .map_err(|source| ProviderError::ServiceAccountBind {
                dn: config.bind_username.clone(),
                source,
            })?;

        let request = SearchRequest {
            base_dn: config.user_search.base.clone(),
            scope: SearchScope::Subtree,
            size_limit: USER_SEARCH_SIZE_LIMIT,
            time_limit: SEARCH_TIME_LIMIT_SECONDS,
            filter: filter::user_search_filter(&config.user_search, username),
            attributes: self.user_search_attributes(),
        };
        let entries = conn
            .search(&request)
            .await
            .map_err(|source| ProviderError::UserSearch { source })?;

        if entries.is_empty() {
            // An unknown user is not an error; the same unauthenticated
            // outcome is reported for a wrong password at the final
            // bind, so the two are indistinguishable to callers.
            debug!(filter = %request.filter, "user search returned no results");
            return Ok(None);
        }
        if entries.len() > 1 {
            return Err(ProviderError::UserSearchResultCount {
                user: username.to_string(),
                count: entries.len(),
            });
        }
        let entry = &entries[0];
        if entry.dn.is_empty() {
            return Err(ProviderError::UserSearchResultMissingDn {
                user: username.to_string(),
            });
        }

        let mapped_username =
            entry::attribute_value(entry, &config.user_search.username_attribute, username)?;
        let uid = entry::raw_attribute_value(entry, &config.user_search.uid_attribute, username)?;
        let extra_refresh_attributes = self.capture_refresh_attributes(entry, username)?;

        let want_groups = granted_scopes.iter().any(|s| s == SCOPE_GROUPS);
        let groups = if want_groups && !config.group_search.base.is_empty() {
            let filter_value = match config.group_search.filter_attribute() {
                Some(attribute) => entry::attribute_value(entry, attribute, username)?,
                None => entry.dn.clone(),
            };
            Some(
                self.search_groups(conn, &entry.dn, &filter_value, username)
                    .await?,
            )
        } else {
            None
        };

        if let Some(password) = password {
            if let Err(source) = conn.bind(&entry.dn, password).await {
                if source.is_invalid_credentials() {
                    debug!(dn = %entry.dn, "end-user bind rejected the password");
                    return Ok(None);
                }
                return Err(ProviderError::UserBind {
                    username: username.to_string(),
                    dn: entry.dn.clone(),
                    source,
                });
            }
        }

        Ok(Some(Identity {
            username: mapped_username,
            uid: URL_SAFE_NO_PAD.encode(&uid),
            groups,
            dn: entry.dn.clone(),
            extra_refresh_attributes,
        }))
    }

    async fn refresh_user(
        &self,
        conn: &mut dyn Connection,
        attributes: &RefreshAttributes,
    ) -> ProviderResult<Option<Vec<String>>> {
        let config = &self.config;
        conn.bind(&config.bind_username, &config.bind_password)
            .await
            .map_err(|source| ProviderError::ServiceAccountBind {
                dn: config.bind_username.clone(),
                source,
            })?;

        let request = SearchRequest {
            base_dn: attributes.dn.clone(),
            scope: SearchScope::Base,
            size_limit: USER_SEARCH_SIZE_LIMIT,
            time_limit: SEARCH_TIME_LIMIT_SECONDS,
            filter: MATCH_ANY_FILTER.to_string(),
            attributes: self.user_search_attributes(),
        };
        let entries =
            conn.search(&request)
                .await
                .map_err(|source| ProviderError::RefreshUserSearch {
                    dn: attributes.dn.clone(),
                    source,
                })?;

        if entries.len() != 1 {
            return Err(ProviderError::UserSearchResultCount {
                user: attributes.dn.clone(),
                count: entries.len(),
            });
        }
        let entry = &entries[0];
        if entry.dn.is_empty() {
            return Err(ProviderError::RefreshSearchResultMissingDn {
                dn: attributes.dn.clone(),
            });
        }

        let fresh_uid =
            entry::raw_attribute_value(entry, &config.user_search.uid_attribute, &attributes.dn)?;
        let fresh_subject = self.subject_for_uid(&fresh_uid);
        if fresh_subject != attributes.subject {
            return Err(ProviderError::SubjectChanged {
                dn: attributes.dn.clone(),
                expected: attributes.subject.clone(),
                actual: fresh_subject,
            });
        }

        let fresh_username = entry::attribute_value(
            entry,
            &config.user_search.username_attribute,
            &attributes.dn,
        )?;
        if fresh_username != attributes.username {
            return Err(ProviderError::UsernameChanged {
                dn: attributes.dn.clone(),
                expected: attributes.username.clone(),
                actual: fresh_username,
            });
        }

        let mut checks: Vec<_> = config.refresh_attribute_checks.iter().collect();
        checks.sort_by(|a, b| a.0.cmp(b.0));
        for (attribute, check) in checks {
            check.validate(entry, attributes).map_err(|source| {
                ProviderError::RefreshAttributeCheck {
                    attribute: attribute.clone(),
                    source,
                }
            })?;
        }

        if config.group_search.skip_group_refresh
            || !attributes.has_granted_scope(SCOPE_GROUPS)
            || config.group_search.base.is_empty()
        {
            return Ok(None);
        }

        let filter_value = match config.group_search.filter_attribute() {
            Some(attribute) => entry::attribute_value(entry, attribute, &attributes.dn)?,
            None => entry.dn.clone(),
        };
        let groups = self
            .search_groups(conn, &entry.dn, &filter_value, &attributes.username)
            .await?;
        Ok(Some(groups))
    }

    async fn search_groups(
        &self,
        conn: &mut dyn Connection,
        user_dn: &str,
        filter_value: &str,
        searched_user: &str,
    ) -> ProviderResult<Vec<String>> {
        let group_search = &self.config.group_search;
        let group_attribute = group_search.effective_group_name_attribute();

        let request = SearchRequest {
            base_dn: group_search.base.clone(),
            scope: SearchScope::Subtree,
            // Unlimited size; the paged search bounds each chunk.
            size_limit: 0,
            time_limit: SEARCH_TIME_LIMIT_SECONDS,
            filter: filter::group_search_filter(group_search, filter_value),
            attributes: if group_attribute == DN_ATTRIBUTE {
                Vec::new()
            } else {
                vec![group_attribute.to_string()]
            },
        };
        let entries = conn
            .search_paged(&request, GROUP_SEARCH_PAGE_SIZE)
            .await
            .map_err(|source| ProviderError::GroupSearch {
                dn: user_dn.to_string(),
                source: Box::new(source),
            })?;

        let mut groups = Vec::with_capacity(entries.len());
        for entry in entries {
            if entry.dn.is_empty() {
                return Err(ProviderError::GroupSearchResultMissingDn {
                    dn: user_dn.to_string(),
                });
            }
            let group = match self
                .config
                .group_attribute_parsing_overrides
                .get(group_attribute)
            {
                Some(parser) => {
                    parser
                        .parse(&entry)
                        .map_err(|source| ProviderError::GroupParsing {
                            dn: user_dn.to_string(),
                            source,
                        })?
                }
                None if group_attribute == DN_ATTRIBUTE => entry.dn.clone(),
                None => entry::attribute_value(&entry, group_attribute, searched_user).map_err(
                    |source| ProviderError::GroupSearch {
                        dn: user_dn.to_string(),
                        source: Box::new(source),
                    },
                )?,
            };
            groups.push(group);
        }
        // Deterministic ordering regardless of directory return order.
        groups.sort();
        Ok(groups)
    }

    /// Attributes requested from a user search: the username and UID
    /// attributes (unless they are the DN), the group-filter user
    /// attribute when configured, and every attribute with a
    /// registered refresh check.
    fn user_search_attributes(&self) -> Vec<String> {
        let user_search = &self.config.user_search;
        let mut attributes = Vec::new();
        if user_search.username_attribute != DN_ATTRIBUTE {
            attributes.push(user_search.username_attribute.clone());
        }
        if user_search.uid_attribute != DN_ATTRIBUTE {
            attributes.push(user_search.uid_attribute.clone());
        }
        if let Some(attribute) = self.config.group_search.filter_attribute() {
            attributes.push(attribute.to_string());
        }
        let mut check_attributes: Vec<&String> =
            self.config.refresh_attribute_checks.keys().collect();
        check_attributes.sort();
        attributes.extend(check_attributes.into_iter().cloned());
        attributes
    }

    /// Captures the raw values of every refresh-check attribute from
    /// the login-time entry, base64url (no padding) encoded.
    fn capture_refresh_attributes(
        &self,
        entry: &Entry,
        username: &str,
    ) -> ProviderResult<HashMap<String, String>> {
        let mut captured = HashMap::with_capacity(self.config.refresh_attribute_checks.len());
        for attribute in self.config.refresh_attribute_checks.keys() {
            let value = entry::raw_attribute_value(entry, attribute, username)?;
            captured.insert(attribute.clone(), URL_SAFE_NO_PAD.encode(&value));
        }
        Ok(captured)
    }
}
