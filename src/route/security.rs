use crate::config::FileSecurityOptions;
use ipnetwork::IpNetwork;
use std::net::{IpAddr, Ipv4Addr};

/// A block of addresses from an allow or block list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpRule {
    Network(IpNetwork),
    /// Inclusive range of IPv4 addresses
    Range(Ipv4Addr, Ipv4Addr),
}

impl IpRule {
    /// Parse CIDR, a single address, `a.b.c.d-a.b.c.e` or `a.b.c.d-e`.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();

        if let Ok(network) = s.parse::<IpNetwork>() {
            return Some(IpRule::Network(network));
        }

        if let Ok(ip) = s.parse::<IpAddr>() {
            return IpNetwork::new(ip, if ip.is_ipv4() { 32 } else { 128 })
                .ok()
                .map(IpRule::Network);
        }

        if let Some((start, end)) = s.split_once('-') {
            let start: Ipv4Addr = start.trim().parse().ok()?;
            let end = end.trim();
            let end: Ipv4Addr = match end.parse::<u8>() {
                Ok(last) => {
                    let [a, b, c, _] = start.octets();
                    Ipv4Addr::new(a, b, c, last)
                }
                Err(_) => end.parse().ok()?,
            };
            if u32::from(start) <= u32::from(end) {
                return Some(IpRule::Range(start, end));
            }
        }

        None
    }

    #[inline]
    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self, ip) {
            (IpRule::Network(network), ip) => network.contains(ip),
            (IpRule::Range(start, end), IpAddr::V4(v4)) => {
                (u32::from(*start)..=u32::from(*end)).contains(&u32::from(v4))
            }
            (IpRule::Range(..), IpAddr::V6(_)) => false,
        }
    }
}

fn parse_rules(entries: &[String]) -> Vec<IpRule> {
    entries
        .iter()
        .filter_map(|entry| {
            let rule = IpRule::parse(entry);
            if rule.is_none() {
                tracing::warn!("Failed to parse IP security rule: {}", entry);
            }
            rule
        })
        .collect()
}

/// Client address allow/block lists attached to a route.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecurityOptions {
    pub allowed: Vec<IpRule>,
    pub blocked: Vec<IpRule>,
    pub exclude_allowed_from_blocked: bool,
}

impl SecurityOptions {
    /// Route options replace the global ones as a whole when they list anything.
    pub fn merge(route: Option<&FileSecurityOptions>, global: Option<&FileSecurityOptions>) -> Self {
        let has_rules =
            |o: &&FileSecurityOptions| !o.ip_allowed_list.is_empty() || !o.ip_blocked_list.is_empty();

        match route.filter(has_rules).or(global.filter(has_rules)) {
            Some(options) => Self {
                allowed: parse_rules(&options.ip_allowed_list),
                blocked: parse_rules(&options.ip_blocked_list),
                exclude_allowed_from_blocked: options.exclude_allowed_from_blocked,
            },
            None => Self::default(),
        }
    }

    pub fn has_rules(&self) -> bool {
        !self.allowed.is_empty() || !self.blocked.is_empty()
    }

    /// Blocked addresses are refused unless `exclude_allowed_from_blocked`
    /// lets the allow list win; a non-empty allow list refuses everything
    /// it does not cover.
    #[inline]
    pub fn is_allowed(&self, ip: IpAddr) -> bool {
        let allowed = self.allowed.iter().any(|rule| rule.contains(ip));

        if self.blocked.iter().any(|rule| rule.contains(ip))
            && !(self.exclude_allowed_from_blocked && allowed)
        {
            return false;
        }

        self.allowed.is_empty() || allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(allowed: &[&str], blocked: &[&str], exclude: bool) -> FileSecurityOptions {
        FileSecurityOptions {
            ip_allowed_list: allowed.iter().map(|s| s.to_string()).collect(),
            ip_blocked_list: blocked.iter().map(|s| s.to_string()).collect(),
            exclude_allowed_from_blocked: exclude,
        }
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_forms() {
        assert!(matches!(IpRule::parse("10.0.0.0/8"), Some(IpRule::Network(_))));
        assert!(matches!(IpRule::parse("192.168.1.1"), Some(IpRule::Network(_))));
        assert!(matches!(IpRule::parse("::1"), Some(IpRule::Network(_))));
        assert_eq!(
            IpRule::parse("192.168.1.10-20"),
            Some(IpRule::Range(Ipv4Addr::new(192, 168, 1, 10), Ipv4Addr::new(192, 168, 1, 20)))
        );
        assert!(IpRule::parse("192.168.1.10-192.168.2.1").is_some());
        assert!(IpRule::parse("192.168.1.20-10").is_none());
        assert!(IpRule::parse("not-an-ip").is_none());
    }

    #[test]
    fn test_blocked_ip() {
        let security = SecurityOptions::merge(Some(&options(&[], &["192.168.1.1"], false)), None);
        assert!(!security.is_allowed(ip("192.168.1.1")));
        assert!(security.is_allowed(ip("192.168.1.2")));
    }

    #[test]
    fn test_allowed_list_refuses_others() {
        let security = SecurityOptions::merge(Some(&options(&["192.168.1.1"], &[], false)), None);
        assert!(security.is_allowed(ip("192.168.1.1")));
        assert!(!security.is_allowed(ip("192.168.1.2")));
    }

    #[test]
    fn test_exclude_allowed_from_blocked() {
        let file = options(&["192.168.1.5"], &["192.168.1.0/24"], true);
        let security = SecurityOptions::merge(Some(&file), None);
        assert!(security.is_allowed(ip("192.168.1.5")));
        assert!(!security.is_allowed(ip("192.168.1.6")));

        let file = options(&["192.168.1.5"], &["192.168.1.0/24"], false);
        let security = SecurityOptions::merge(Some(&file), None);
        assert!(!security.is_allowed(ip("192.168.1.5")));
    }

    #[test]
    fn test_range_rule() {
        let security = SecurityOptions::merge(None, Some(&options(&[], &["10.0.0.10-20"], false)));
        assert!(!security.is_allowed(ip("10.0.0.15")));
        assert!(security.is_allowed(ip("10.0.0.21")));
        assert!(security.is_allowed(ip("::1")));
    }

    #[test]
    fn test_route_replaces_global_and_invalid_entries_skipped() {
        let global = options(&[], &["10.0.0.1"], false);
        let route = options(&["garbage", "172.16.0.0/12"], &[], false);
        let security = SecurityOptions::merge(Some(&route), Some(&global));
        assert_eq!(security.allowed.len(), 1);
        assert!(security.blocked.is_empty());
        assert!(security.has_rules());

        assert!(!SecurityOptions::merge(None, None).has_rules());
    }
}
