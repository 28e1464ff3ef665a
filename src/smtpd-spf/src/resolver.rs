// SPDX-License-Identifier: GPL-3.0-only

use std::net::IpAddr;

/// Abstracts the DNS lookups the SPF evaluator needs, so the mechanism walk
/// can be unit-tested without a real resolver.
#[async_trait::async_trait]
pub trait Resolver: Send + Sync {
    /// Returns the text of every TXT record attached to `domain`. Lookup
    /// failures (NXDOMAIN, timeout, ...) are reported as an empty vector,
    /// matching the original's `res_query` returning nothing on error.
    async fn txt(&self, domain: &str) -> Vec<String>;

    /// Returns every A/AAAA address of `domain`.
    async fn addrs(&self, domain: &str) -> Vec<IpAddr>;

    /// Returns the exchange hostnames of every MX record of `domain`,
    /// lowest-preference-first is not required — mechanism matching treats
    /// them as an unordered set.
    async fn mx(&self, domain: &str) -> Vec<String>;
}

/// Production resolver backed by the system/async DNS stub resolver.
pub struct TrustDnsResolver {
    inner: trust_dns_resolver::TokioAsyncResolver,
}

impl TrustDnsResolver {
    /// Builds a resolver from the system's `/etc/resolv.conf` (or platform
    /// equivalent), matching `vsmtp-config`'s use of `trust-dns-resolver`'s
    /// `system-config` feature.
    pub fn from_system_conf() -> Result<Self, trust_dns_resolver::error::ResolveError> {
        Ok(Self {
            inner: trust_dns_resolver::TokioAsyncResolver::tokio_from_system_conf()?,
        })
    }
}

#[async_trait::async_trait]
impl Resolver for TrustDnsResolver {
    async fn txt(&self, domain: &str) -> Vec<String> {
        match self.inner.txt_lookup(domain).await {
            Ok(lookup) => lookup.iter().map(std::string::ToString::to_string).collect(),
            Err(error) => {
                tracing::trace!(domain, %error, "TXT lookup failed");
                Vec::new()
            }
        }
    }

    async fn addrs(&self, domain: &str) -> Vec<IpAddr> {
        match self.inner.lookup_ip(domain).await {
            Ok(lookup) => lookup.iter().collect(),
            Err(error) => {
                tracing::trace!(domain, %error, "A/AAAA lookup failed");
                Vec::new()
            }
        }
    }

    async fn mx(&self, domain: &str) -> Vec<String> {
        match self.inner.mx_lookup(domain).await {
            Ok(lookup) => lookup
                .iter()
                .map(|mx| mx.exchange().to_utf8())
                .collect(),
            Err(error) => {
                tracing::trace!(domain, %error, "MX lookup failed");
                Vec::new()
            }
        }
    }
}
