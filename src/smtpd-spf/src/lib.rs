// SPDX-License-Identifier: GPL-3.0-only

//! A subset of RFC 7208 (Sender Policy Framework) sufficient to decide
//! whether a given IP is authorized to send mail for a domain.
//!
//! The walk is iterative in spirit but expressed as bounded recursion
//! (`include`/`redirect` are themselves SPF evaluations); depth is capped at
//! 10 and each domain is visited at most once per top-level call, matching
//! the original implementation this was ported from mechanism-for-mechanism.
//!
//! Deliberately **stricter than RFC 7208**: `~all`/`?all` (softfail/neutral)
//! are treated identically to `-all` (fail) — every non-`+` qualifier
//! denies. This mirrors the original's behavior; see the workspace-level
//! design notes for why it was kept rather than "fixed".

mod resolver;

pub use resolver::{Resolver, TrustDnsResolver};

use std::collections::HashSet;
use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;

const MAX_DEPTH: u32 = 10;

/// Evaluates whether `ip` is authorized by `domain`'s SPF policy.
///
/// Returns `false` if `ip` does not parse as an IPv4 or IPv6 address
/// literal, if no TXT record starting with `v=spf1` exists, if recursion
/// exceeds [`MAX_DEPTH`], or if a domain would be visited twice in the same
/// evaluation (an `include`/`redirect` cycle).
pub async fn spf_allows<R: Resolver>(resolver: &R, domain: &str, ip: &str) -> bool {
    let Ok(ip) = ip.parse::<IpAddr>() else {
        return false;
    };

    let mut visited = HashSet::new();
    eval(resolver, domain.to_owned(), ip, 0, &mut visited).await
}

fn eval<'a, R: Resolver>(
    resolver: &'a R,
    domain: String,
    ip: IpAddr,
    depth: u32,
    visited: &'a mut HashSet<String>,
) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
    Box::pin(async move {
        if depth > MAX_DEPTH {
            tracing::trace!(domain, depth, "SPF depth limit exceeded");
            return false;
        }
        if !visited.insert(domain.clone()) {
            tracing::trace!(domain, "SPF cycle detected, domain already visited");
            return false;
        }

        let Some(record) = spf_record(resolver, &domain).await else {
            tracing::trace!(domain, "no v=spf1 TXT record found");
            return false;
        };

        if let Some(target) = find_redirect(&record) {
            tracing::trace!(domain, target, "following SPF redirect");
            return eval(resolver, target, ip, depth + 1, visited).await;
        }

        let mut tokens = record.split_whitespace();
        tokens.next(); // discard "v=spf1"

        let mut deferred_all: Option<char> = None;

        for token in tokens {
            if token.contains('=') {
                continue; // modifier other than redirect, already handled
            }

            let (qualifier, mechanism) = parse_qualifier(token);

            if mechanism == "all" {
                deferred_all = Some(qualifier);
                continue;
            }

            if mechanism_matches(resolver, &domain, ip, mechanism, depth, visited).await {
                return qualifier == '+';
            }
        }

        match deferred_all {
            Some(qualifier) => qualifier == '+',
            None => false,
        }
    })
}

async fn mechanism_matches<'a, R: Resolver>(
    resolver: &'a R,
    domain: &str,
    ip: IpAddr,
    mechanism: &str,
    depth: u32,
    visited: &'a mut HashSet<String>,
) -> bool {
    if let Some(cidr) = mechanism.strip_prefix("ip4:") {
        return match_cidr(ip, cidr, 32);
    }
    if let Some(cidr) = mechanism.strip_prefix("ip6:") {
        return match_cidr(ip, cidr, 128);
    }
    if mechanism == "a" {
        return resolver.addrs(domain).await.contains(&ip);
    }
    if let Some(host) = mechanism.strip_prefix("a:") {
        // the `/n` suffix is parsed and discarded: this mechanism compares
        // addresses for equality rather than CIDR-matching the prefix.
        let host = host.split('/').next().unwrap_or(host);
        return resolver.addrs(host).await.contains(&ip);
    }
    if mechanism == "mx" {
        return mx_matches(resolver, domain, ip).await;
    }
    if let Some(host) = mechanism.strip_prefix("mx:") {
        return mx_matches(resolver, host, ip).await;
    }
    if let Some(target) = mechanism.strip_prefix("include:") {
        return eval(resolver, target.to_owned(), ip, depth + 1, visited).await;
    }
    if let Some(target) = mechanism.strip_prefix("exists:") {
        return !resolver.addrs(target).await.is_empty();
    }

    false
}

async fn mx_matches<R: Resolver>(resolver: &R, domain: &str, ip: IpAddr) -> bool {
    for host in resolver.mx(domain).await {
        if resolver.addrs(&host).await.contains(&ip) {
            return true;
        }
    }
    false
}

async fn spf_record<R: Resolver>(resolver: &R, domain: &str) -> Option<String> {
    resolver
        .txt(domain)
        .await
        .into_iter()
        .find(|record| record.starts_with("v=spf1"))
}

fn find_redirect(record: &str) -> Option<String> {
    record
        .split_whitespace()
        .skip(1)
        .find_map(|token| token.strip_prefix("redirect=").map(str::to_owned))
}

fn parse_qualifier(token: &str) -> (char, &str) {
    match token.chars().next() {
        Some(q @ ('+' | '-' | '~' | '?')) => (q, &token[q.len_utf8()..]),
        _ => ('+', token),
    }
}

fn match_cidr(ip: IpAddr, spec: &str, default_prefix: u8) -> bool {
    use ipnet::Contains;

    let (network_str, prefix) = match spec.split_once('/') {
        Some((network, prefix)) => (network, prefix.parse::<u8>().unwrap_or(default_prefix)),
        None => (spec, default_prefix),
    };

    let Ok(network) = network_str.parse::<IpAddr>() else {
        return false;
    };

    match ipnet::IpNet::new(network, prefix) {
        Ok(net) => net.contains(&ip),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::net::Ipv4Addr;

    #[derive(Default)]
    struct StubDomain {
        txt: Vec<String>,
        addrs: Vec<IpAddr>,
        mx: Vec<String>,
    }

    #[derive(Default)]
    struct StubResolver {
        domains: HashMap<String, StubDomain>,
    }

    impl StubResolver {
        fn with_spf(mut self, domain: &str, record: &str) -> Self {
            self.domains.entry(domain.to_owned()).or_default().txt = vec![record.to_owned()];
            self
        }

        fn with_addr(mut self, domain: &str, addr: IpAddr) -> Self {
            self.domains
                .entry(domain.to_owned())
                .or_default()
                .addrs
                .push(addr);
            self
        }

        fn with_mx(mut self, domain: &str, host: &str) -> Self {
            self.domains
                .entry(domain.to_owned())
                .or_default()
                .mx
                .push(host.to_owned());
            self
        }
    }

    #[async_trait::async_trait]
    impl Resolver for StubResolver {
        async fn txt(&self, domain: &str) -> Vec<String> {
            self.domains.get(domain).map(|d| d.txt.clone()).unwrap_or_default()
        }

        async fn addrs(&self, domain: &str) -> Vec<IpAddr> {
            self.domains.get(domain).map(|d| d.addrs.clone()).unwrap_or_default()
        }

        async fn mx(&self, domain: &str) -> Vec<String> {
            self.domains.get(domain).map(|d| d.mx.clone()).unwrap_or_default()
        }
    }

    #[tokio::test]
    async fn invalid_ip_denies() {
        let resolver = StubResolver::default().with_spf("a.test", "v=spf1 +all");
        assert!(!spf_allows(&resolver, "a.test", "not-an-ip").await);
    }

    #[tokio::test]
    async fn no_spf_record_denies() {
        let resolver = StubResolver::default();
        assert!(!spf_allows(&resolver, "a.test", "1.2.3.4").await);
    }

    #[tokio::test]
    async fn plus_all_allows() {
        let resolver = StubResolver::default().with_spf("a.test", "v=spf1 +all");
        assert!(spf_allows(&resolver, "a.test", "1.2.3.4").await);
    }

    #[tokio::test]
    async fn bare_minus_all_denies() {
        let resolver = StubResolver::default().with_spf("a.test", "v=spf1 -all");
        assert!(!spf_allows(&resolver, "a.test", "1.2.3.4").await);
    }

    #[tokio::test]
    async fn softfail_and_neutral_all_deny_like_fail() {
        let softfail = StubResolver::default().with_spf("a.test", "v=spf1 ~all");
        assert!(!spf_allows(&softfail, "a.test", "1.2.3.4").await);

        let neutral = StubResolver::default().with_spf("a.test", "v=spf1 ?all");
        assert!(!spf_allows(&neutral, "a.test", "1.2.3.4").await);
    }

    #[tokio::test]
    async fn ip4_cidr_match() {
        let resolver = StubResolver::default().with_spf("a.test", "v=spf1 ip4:192.0.2.0/24 -all");
        assert!(spf_allows(&resolver, "a.test", "192.0.2.55").await);
        assert!(!spf_allows(&resolver, "a.test", "192.0.3.1").await);
    }

    #[tokio::test]
    async fn ip4_default_prefix_is_32() {
        let resolver = StubResolver::default().with_spf("a.test", "v=spf1 ip4:203.0.113.9 -all");
        assert!(spf_allows(&resolver, "a.test", "203.0.113.9").await);
        assert!(!spf_allows(&resolver, "a.test", "203.0.113.10").await);
    }

    #[tokio::test]
    async fn a_mechanism_matches_current_domain() {
        let resolver = StubResolver::default()
            .with_spf("a.test", "v=spf1 a -all")
            .with_addr("a.test", IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)));
        assert!(spf_allows(&resolver, "a.test", "10.0.0.1").await);
    }

    #[tokio::test]
    async fn a_colon_host_ignores_prefix_uses_equality() {
        let resolver = StubResolver::default()
            .with_spf("a.test", "v=spf1 a:mail.other.test/24 -all")
            .with_addr("mail.other.test", IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)));
        assert!(spf_allows(&resolver, "a.test", "10.0.0.5").await);
        // equality only: a neighboring address in the same /24 does not match.
        assert!(!spf_allows(&resolver, "a.test", "10.0.0.6").await);
    }

    #[tokio::test]
    async fn mx_mechanism_matches_mail_exchanger_address() {
        let resolver = StubResolver::default()
            .with_spf("a.test", "v=spf1 mx -all")
            .with_mx("a.test", "mx1.a.test")
            .with_addr("mx1.a.test", IpAddr::V4(Ipv4Addr::new(172, 16, 0, 1)));
        assert!(spf_allows(&resolver, "a.test", "172.16.0.1").await);
    }

    #[tokio::test]
    async fn include_recurses_and_uses_inner_result() {
        let resolver = StubResolver::default()
            .with_spf("a.test", "v=spf1 include:b.test -all")
            .with_spf("b.test", "v=spf1 ip4:198.51.100.0/24 -all");
        assert!(spf_allows(&resolver, "a.test", "198.51.100.1").await);
        assert!(!spf_allows(&resolver, "a.test", "203.0.113.1").await);
    }

    #[tokio::test]
    async fn exists_mechanism_checks_resolution() {
        let resolver = StubResolver::default()
            .with_spf("a.test", "v=spf1 exists:sentinel.a.test -all")
            .with_addr("sentinel.a.test", IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1)));
        assert!(spf_allows(&resolver, "a.test", "9.9.9.9").await);
    }

    #[tokio::test]
    async fn redirect_restarts_evaluation() {
        let resolver = StubResolver::default()
            .with_spf("a.test", "v=spf1 redirect=b.test")
            .with_spf("b.test", "v=spf1 +all");
        assert!(spf_allows(&resolver, "a.test", "1.2.3.4").await);
    }

    #[tokio::test]
    async fn include_cycle_terminates_and_denies() {
        let resolver = StubResolver::default()
            .with_spf("a.test", "v=spf1 include:b.test -all")
            .with_spf("b.test", "v=spf1 include:a.test -all");
        assert!(!spf_allows(&resolver, "a.test", "1.2.3.4").await);
    }

    #[tokio::test]
    async fn depth_limit_terminates_long_include_chain() {
        let mut resolver = StubResolver::default();
        for i in 0..20 {
            let record = format!("v=spf1 include:d{}.test -all", i + 1);
            resolver = resolver.with_spf(&format!("d{i}.test"), &record);
        }
        resolver = resolver.with_spf("d20.test", "v=spf1 +all");
        assert!(!spf_allows(&resolver, "d0.test", "1.2.3.4").await);
    }

    #[tokio::test]
    async fn modifiers_other_than_redirect_are_ignored() {
        let resolver =
            StubResolver::default().with_spf("a.test", "v=spf1 exp=explain.a.test +all");
        assert!(spf_allows(&resolver, "a.test", "1.2.3.4").await);
    }
}
