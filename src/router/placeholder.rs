use super::template::{parse_query, QueryTemplate, QueryValue, RouteTemplate};
use std::borrow::Cow;

/// A placeholder name (without braces) and the value captured for it,
/// exactly as it appeared in the request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PlaceholderNameAndValue {
    pub name: String,
    pub value: String,
}

impl PlaceholderNameAndValue {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Percent-decoded value. Captured values are never decoded on the way
    /// downstream, so this is the only decoding step.
    pub fn decoded(&self) -> Cow<'_, str> {
        urlencoding::decode(&self.value).unwrap_or(Cow::Borrowed(self.value.as_str()))
    }
}

/// Concrete downstream path and query produced from a downstream template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownstreamUrl {
    pub path: String,
    pub query: Option<String>,
}

impl DownstreamUrl {
    pub fn path_and_query(&self) -> String {
        match &self.query {
            Some(query) => format!("{}?{}", self.path, query),
            None => self.path.clone(),
        }
    }
}

fn find<'a>(placeholders: &'a [PlaceholderNameAndValue], name: &str) -> Option<&'a str> {
    placeholders
        .iter()
        .find(|p| p.name.eq_ignore_ascii_case(name))
        .map(|p| p.value.as_str())
}

/// Replace every `{name}` in `template` with its captured value. Unknown
/// placeholders are left as written. An empty value at the end of a segment
/// takes its leading `/` with it.
pub fn substitute(template: &str, placeholders: &[PlaceholderNameAndValue]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        let Some(close) = rest[open..].find('}').map(|c| open + c) else {
            break;
        };

        out.push_str(&rest[..open]);
        let name = &rest[open + 1..close];
        let after = &rest[close + 1..];

        match find(placeholders, name) {
            Some("") if (after.is_empty() || after.starts_with(['/', '?'])) && out.ends_with('/') => {
                out.pop();
            }
            Some(value) => out.push_str(value),
            None => out.push_str(&rest[open..=close]),
        }

        rest = after;
    }

    out.push_str(rest);
    out
}

/// Placeholder names appearing in a downstream template.
fn template_names(template: &str) -> Vec<&str> {
    let mut names = Vec::new();
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        let Some(close) = rest[open..].find('}').map(|c| open + c) else {
            break;
        };
        names.push(&rest[open + 1..close]);
        rest = &rest[close + 1..];
    }
    names
}

/// Build the downstream path and query for a matched request.
///
/// Request query parameters captured by the upstream template and reused in
/// the downstream template are consumed; everything else is forwarded after
/// the parameters the downstream template produces. A forwarded parameter
/// that shares its name with a produced one is kept alongside it.
pub fn create_downstream_url(
    downstream_template: &str,
    upstream: &RouteTemplate,
    placeholders: &[PlaceholderNameAndValue],
    request_path: &str,
    request_query: Option<&str>,
) -> DownstreamUrl {
    let (template_path, template_query) = match downstream_template.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (downstream_template, None),
    };

    let mut path = substitute(template_path, placeholders);
    if path.is_empty() {
        path.push('/');
    }
    if path.len() > 1 && path.ends_with('/') && !request_path.ends_with('/') {
        path.pop();
    }

    let used = template_names(downstream_template);
    let is_used = |name: &str| used.iter().any(|u| u.eq_ignore_ascii_case(name));

    let request_pairs = parse_query(request_query.unwrap_or_default());
    let forwarded: Vec<String> = match upstream.query() {
        Some(QueryTemplate::CatchAll(name)) if is_used(name.as_str()) => Vec::new(),
        Some(QueryTemplate::Params(params)) => request_pairs
            .iter()
            .filter(|pair| {
                !params.iter().any(|param| {
                    let consumed = match &param.value {
                        QueryValue::Placeholder(name) => is_used(name.as_str()),
                        QueryValue::Literal(_) => false,
                    };
                    consumed && pair.decoded_key().eq_ignore_ascii_case(&param.key)
                })
            })
            .map(|pair| raw_pair(pair.key, pair.value))
            .collect(),
        _ => request_pairs
            .iter()
            .map(|pair| raw_pair(pair.key, pair.value))
            .collect(),
    };

    let produced: Vec<String> = template_query
        .map(|q| substitute(q, placeholders))
        .map(|q| {
            q.split('&')
                .filter(|pair| !pair.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let pairs: Vec<String> = produced.into_iter().chain(forwarded).collect();
    let query = if pairs.is_empty() {
        None
    } else {
        Some(pairs.join("&"))
    };

    DownstreamUrl { path, query }
}

fn raw_pair(key: &str, value: &str) -> String {
    if value.is_empty() {
        key.to_string()
    } else {
        format!("{}={}", key, value)
    }
}
