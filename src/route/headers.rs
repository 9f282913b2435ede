use std::collections::BTreeMap;
use tracing::warn;

const BASE_URL: &str = "BaseUrl";

/// Placeholders filled in per request by the forwarding pipeline.
const RUNTIME_PLACEHOLDERS: [&str; 4] = ["RemoteIpAddress", "TraceId", "UpstreamHost", "DownstreamBaseUrl"];

/// Values for request-scoped header placeholders.
#[derive(Debug, Clone, Default)]
pub struct RuntimeValues {
    pub remote_ip_address: Option<String>,
    pub trace_id: Option<String>,
    pub upstream_host: Option<String>,
    pub downstream_base_url: Option<String>,
}

impl RuntimeValues {
    fn get(&self, name: &str) -> Option<&str> {
        match name {
            "RemoteIpAddress" => self.remote_ip_address.as_deref(),
            "TraceId" => self.trace_id.as_deref(),
            "UpstreamHost" => self.upstream_host.as_deref(),
            "DownstreamBaseUrl" => self.downstream_base_url.as_deref(),
            _ => None,
        }
    }

    /// Substitute known runtime placeholders; missing values stay verbatim.
    pub fn render(&self, value: &str) -> String {
        let mut out = value.to_string();
        for name in RUNTIME_PLACEHOLDERS {
            if let Some(v) = self.get(name) {
                out = out.replace(&format!("{{{}}}", name), v);
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderFindAndReplace {
    pub header: String,
    pub find: String,
    pub replace: String,
}

impl HeaderFindAndReplace {
    pub fn apply(&self, value: &str, runtime: &RuntimeValues) -> String {
        value.replace(&self.find, &runtime.render(&self.replace))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddHeader {
    pub header: String,
    pub value: String,
}

impl AddHeader {
    pub fn render(&self, runtime: &RuntimeValues) -> String {
        runtime.render(&self.value)
    }
}

/// Header rules for one direction of traffic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderRules {
    pub find_and_replace: Vec<HeaderFindAndReplace>,
    pub add: Vec<AddHeader>,
}

impl HeaderRules {
    pub fn is_empty(&self) -> bool {
        self.find_and_replace.is_empty() && self.add.is_empty()
    }
}

/// Resolve `{BaseUrl}` now and check every other placeholder is one the
/// pipeline knows. Returns the offending placeholder on failure.
fn resolve_placeholders(value: &str, base_url: Option<&str>) -> Result<String, String> {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(open) = rest.find('{') {
        let Some(close) = rest[open..].find('}').map(|c| open + c) else {
            break;
        };
        let name = &rest[open + 1..close];
        out.push_str(&rest[..open]);

        if name == BASE_URL {
            let base_url = base_url.ok_or_else(|| name.to_string())?;
            out.push_str(base_url.trim_end_matches('/'));
        } else if RUNTIME_PLACEHOLDERS.contains(&name) {
            out.push_str(&rest[open..=close]);
        } else {
            return Err(name.to_string());
        }

        rest = &rest[close + 1..];
    }

    out.push_str(rest);
    Ok(out)
}

/// Merge route and global transform tables and split them into rules.
///
/// Route entries replace global entries for the same header name; a value
/// containing `,` is a `find, replace` pair, anything else adds a header.
/// Rules that reference an unknown placeholder are logged and skipped.
pub fn header_rules(
    route: &BTreeMap<String, String>,
    global: &BTreeMap<String, String>,
    base_url: Option<&str>,
) -> HeaderRules {
    let inherited = global
        .iter()
        .filter(|(name, _)| !route.keys().any(|r| r.eq_ignore_ascii_case(name)));

    let mut rules = HeaderRules::default();

    for (header, value) in route.iter().chain(inherited) {
        match value.split_once(',') {
            Some((find, replace)) => match resolve_placeholders(replace.trim(), base_url) {
                Ok(replace) => rules.find_and_replace.push(HeaderFindAndReplace {
                    header: header.clone(),
                    find: find.trim().to_string(),
                    replace,
                }),
                Err(placeholder) => {
                    warn!(
                        "Unable to resolve placeholder '{{{}}}' in header transform for '{}', skipping",
                        placeholder, header
                    );
                }
            },
            None => match resolve_placeholders(value, base_url) {
                Ok(value) => rules.add.push(AddHeader {
                    header: header.clone(),
                    value,
                }),
                Err(placeholder) => {
                    warn!(
                        "Unable to resolve placeholder '{{{}}}' in added header '{}', skipping",
                        placeholder, header
                    );
                }
            },
        }
    }

    rules
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_find_and_replace_and_add() {
        let route = map(&[
            ("Location", "http://internal:5000, {BaseUrl}"),
            ("X-Forwarded-For", "{RemoteIpAddress}"),
        ]);
        let rules = header_rules(&route, &BTreeMap::new(), Some("https://gateway.example.com/"));

        assert_eq!(
            rules.find_and_replace,
            vec![HeaderFindAndReplace {
                header: "Location".to_string(),
                find: "http://internal:5000".to_string(),
                replace: "https://gateway.example.com".to_string(),
            }]
        );
        assert_eq!(rules.add.len(), 1);
        assert_eq!(rules.add[0].value, "{RemoteIpAddress}");

        let runtime = RuntimeValues {
            remote_ip_address: Some("10.0.0.7".to_string()),
            ..Default::default()
        };
        assert_eq!(rules.add[0].render(&runtime), "10.0.0.7");
        assert_eq!(
            rules.find_and_replace[0].apply("http://internal:5000/orders/1", &runtime),
            "https://gateway.example.com/orders/1"
        );
    }

    #[test]
    fn test_route_overrides_global_by_name() {
        let route = map(&[("x-env", "route")]);
        let global = map(&[("X-Env", "global"), ("x-team", "platform")]);
        let rules = header_rules(&route, &global, None);

        assert_eq!(rules.add.len(), 2);
        assert_eq!(rules.add[0], AddHeader { header: "x-env".to_string(), value: "route".to_string() });
        assert_eq!(rules.add[1].header, "x-team");
    }

    #[test]
    fn test_unknown_placeholder_skipped() {
        let route = map(&[("Location", "a, {Nope}"), ("X-Other", "value")]);
        let rules = header_rules(&route, &BTreeMap::new(), None);
        assert!(rules.find_and_replace.is_empty());
        assert_eq!(rules.add.len(), 1);
    }

    #[test]
    fn test_base_url_without_configuration_skipped() {
        let route = map(&[("Location", "http://a, {BaseUrl}")]);
        let rules = header_rules(&route, &BTreeMap::new(), None);
        assert!(rules.is_empty());
    }

    #[test]
    fn test_runtime_placeholder_kept_for_request_time() {
        let route = map(&[("X-Trace", "placeholder, {TraceId}")]);
        let rules = header_rules(&route, &BTreeMap::new(), None);
        assert_eq!(rules.find_and_replace[0].replace, "{TraceId}");

        let runtime = RuntimeValues::default();
        assert_eq!(rules.find_and_replace[0].apply("placeholder", &runtime), "{TraceId}");
    }
}
