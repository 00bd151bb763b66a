//! Production dialer: TLS and StartTLS connections over `ldap3`.
//!
//! The dialer verifies the server certificate against the configured
//! CA bundle (or the system trust store when the bundle is empty) and
//! hands back a [`Connection`] implementation driving a real `ldap3`
//! client.

use std::time::Duration;

use async_trait::async_trait;
use ldap3::adapters::{Adapter, EntriesOnly, PagedResults};
use ldap3::{DerefAliases, Ldap, LdapConnAsync, LdapConnSettings, Scope, SearchEntry, SearchOptions};
use native_tls::{Certificate, TlsConnector};
use tracing::{debug, warn};

use crate::config::ConnectionProtocol;
use crate::entry::Entry;
use crate::transport::{Connection, ConnectionError, Dialer, HostPort, SearchRequest, SearchScope};

/// TCP/TLS connect timeout.
const DIAL_TIMEOUT: Duration = Duration::from_secs(15);

const PEM_CERT_BEGIN: &str = "-----BEGIN CERTIFICATE-----";
const PEM_CERT_END: &str = "-----END CERTIFICATE-----";

/// Dialer establishing TLS or StartTLS connections to the directory.
#[derive(Debug, Clone)]
pub struct TlsDialer {
    protocol: ConnectionProtocol,
    ca_bundle: Vec<u8>,
}

impl TlsDialer {
    pub fn new(protocol: ConnectionProtocol, ca_bundle: Vec<u8>) -> Self {
        Self {
            protocol,
            ca_bundle,
        }
    }

    fn tls_connector(&self) -> Result<TlsConnector, ConnectionError> {
        let mut builder = TlsConnector::builder();
        if !self.ca_bundle.is_empty() {
            let certificates = pem_certificates(&self.ca_bundle)?;
            for certificate in certificates {
                builder.add_root_certificate(certificate);
            }
            // A caller-supplied bundle is the complete trust anchor
            // set; the system store must not widen it.
            builder.disable_built_in_roots(true);
        }
        builder
            .build()
            .map_err(|e| ConnectionError::transport(e.to_string()))
    }

    async fn connect(
        &self,
        host: &HostPort,
        scheme: &str,
        starttls: bool,
    ) -> Result<Box<dyn Connection>, ConnectionError> {
        let url = format!("{scheme}://{}:{}", host.host(), host.port());
        debug!(url = %url, "connecting to LDAP server");

        let settings = LdapConnSettings::new()
            .set_conn_timeout(DIAL_TIMEOUT)
            .set_starttls(starttls)
            .set_connector(self.tls_connector()?);

        let (conn, ldap) = LdapConnAsync::with_settings(settings, &url)
            .await
            .map_err(ConnectionError::from)?;

        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                warn!(error = %e, "LDAP connection driver error");
            }
        });

        Ok(Box::new(LdapConnection { ldap }))
    }
}

#[async_trait]
impl Dialer for TlsDialer {
    async fn dial(&self, host: &HostPort) -> Result<Box<dyn Connection>, ConnectionError> {
        match self.protocol {
            ConnectionProtocol::Tls => self.connect(host, "ldaps", false).await,
            ConnectionProtocol::StartTls => self.connect(host, "ldap", true).await,
            ConnectionProtocol::Unspecified => Err(ConnectionError::transport(
                "did not specify a valid connection protocol",
            )),
        }
    }
}

/// Splits a PEM bundle into its certificates.
///
/// Fails when the bundle contains no parsable certificate at all, so a
/// corrupt bundle can never silently fall back to the system store.
fn pem_certificates(bundle: &[u8]) -> Result<Vec<Certificate>, ConnectionError> {
    let parse_error = || ConnectionError::transport("could not parse CA bundle");

    let text = std::str::from_utf8(bundle).map_err(|_| parse_error())?;
    let mut certificates = Vec::new();
    let mut rest = text;
    while let Some(begin) = rest.find(PEM_CERT_BEGIN) {
        let block = &rest[begin..];
        let end = block.find(PEM_CERT_END).ok_or_else(parse_error)?;
        let block = &block[..end + PEM_CERT_END.len()];
        certificates.push(Certificate::from_pem(block.as_bytes()).map_err(|_| parse_error())?);
        rest = &rest[begin + block.len()..];
    }
    if certificates.is_empty() {
        return Err(parse_error());
    }
    Ok(certificates)
}

/// [`Connection`] backed by a live `ldap3` client.
pub struct LdapConnection {
    ldap: Ldap,
}

impl LdapConnection {
    fn search_options(request: &SearchRequest) -> SearchOptions {
        SearchOptions::new()
            .deref(DerefAliases::Never)
            .sizelimit(request.size_limit)
            .timelimit(request.time_limit)
    }

    fn scope(scope: SearchScope) -> Scope {
        match scope {
            SearchScope::Base => Scope::Base,
            SearchScope::Subtree => Scope::Subtree,
        }
    }
}

#[async_trait]
impl Connection for LdapConnection {
    async fn bind(&mut self, dn: &str, password: &str) -> Result<(), ConnectionError> {
        self.ldap.simple_bind(dn, password).await?.success()?;
        Ok(())
    }

    async fn search(&mut self, request: &SearchRequest) -> Result<Vec<Entry>, ConnectionError> {
        let (entries, _res) = self
            .ldap
            .with_search_options(Self::search_options(request))
            .search(
                &request.base_dn,
                Self::scope(request.scope),
                &request.filter,
                &request.attributes,
            )
            .await?
            .success()?;
        Ok(entries
            .into_iter()
            .map(|entry| Entry::from(SearchEntry::construct(entry)))
            .collect())
    }

    async fn search_paged(
        &mut self,
        request: &SearchRequest,
        page_size: u32,
    ) -> Result<Vec<Entry>, ConnectionError> {
        let adapters: Vec<Box<dyn Adapter<_, _>>> = vec![
            Box::new(EntriesOnly::new()),
            Box::new(PagedResults::new(page_size as i32)),
        ];
        let mut search = self
            .ldap
            .with_search_options(Self::search_options(request))
            .streaming_search_with(
                adapters,
                &request.base_dn,
                Self::scope(request.scope),
                &request.filter,
                &request.attributes,
            )
            .await?;

        let mut entries = Vec::new();
        while let Some(entry) = search.next().await? {
            entries.push(Entry::from(SearchEntry::construct(entry)));
        }
        search.finish().await.success()?;
        Ok(entries)
    }

    async fn close(&mut self) {
        if let Err(e) = self.ldap.unbind().await {
            debug!(error = %e, "error closing LDAP connection");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::DEFAULT_LDAPS_PORT;

    // A self-signed certificate used only to exercise PEM parsing.
    const TEST_CERT: &str = "-----BEGIN CERTIFICATE-----\n\
MIIBhTCCASugAwIBAgIQIRi6zePL6mKjOipn+dNuaTAKBggqhkjOPQQDAjASMRAw\n\
DgYDVQQKEwdBY21lIENvMB4XDTE3MTAyMDE5NDMwNloXDTE4MTAyMDE5NDMwNlow\n\
EjEQMA4GA1UEChMHQWNtZSBDbzBZMBMGByqGSM49AgEGCCqGSM49AwEHA0IABD0d\n\
7VNhbWvZLWPuj/RtHFjvtJBEwOkhbN/BnnE8rnZR8+sbwnc/KhCk3FhnpHZnQz7B\n\
5aETbbIgmuvewdjvSBSjYzBhMA4GA1UdDwEB/wQEAwICpDATBgNVHSUEDDAKBggr\n\
BgEFBQcDATAPBgNVHRMBAf8EBTADAQH/MCkGA1UdEQQiMCCCDmxvY2FsaG9zdDo1\n\
NDUzgg4xMjcuMC4wLjE6NTQ1MzAKBggqhkjOPQQDAgNIADBFAiEA2zpJEPQyz6/l\n\
Wf86aX6PepsntZv2GYlA5UpabfT2EZICICpJ5h/iI+i341gBmLiAFQOyTDT+/wQc\n\
6MF9+Yw1Yy0t\n\
-----END CERTIFICATE-----\n";

    #[test]
    fn test_pem_bundle_with_multiple_certificates() {
        let bundle = format!("{TEST_CERT}{TEST_CERT}");
        let certificates = pem_certificates(bundle.as_bytes()).unwrap();
        assert_eq!(certificates.len(), 2);
    }

    #[test]
    fn test_unparsable_ca_bundle_is_rejected() {
        for bad in [&b"not a ca bundle"[..], &[0xff, 0xfe][..]] {
            let err = pem_certificates(bad).err().unwrap();
            assert_eq!(err.to_string(), "could not parse CA bundle");
        }
    }

    #[test]
    fn test_tls_connector_accepts_empty_bundle() {
        // Empty bundle means the system trust store.
        let dialer = TlsDialer::new(ConnectionProtocol::Tls, Vec::new());
        assert!(dialer.tls_connector().is_ok());
    }

    #[test]
    fn test_tls_connector_rejects_bad_bundle() {
        let dialer = TlsDialer::new(ConnectionProtocol::Tls, b"not a ca bundle".to_vec());
        let err = dialer.tls_connector().unwrap_err();
        assert_eq!(err.to_string(), "could not parse CA bundle");
    }

    #[tokio::test]
    async fn test_unspecified_protocol_fails_before_any_io() {
        let dialer = TlsDialer::new(ConnectionProtocol::Unspecified, Vec::new());
        let host = HostPort::parse("ldap.example.com", DEFAULT_LDAPS_PORT).unwrap();
        let err = dialer.dial(&host).await.err().unwrap();
        assert_eq!(
            err.to_string(),
            "did not specify a valid connection protocol"
        );
    }
}
