use super::placeholder::PlaceholderNameAndValue;
use regex::{Regex, RegexBuilder};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum TemplateError {
    #[error("Template is empty")]
    Empty,

    #[error("Template '{0}' must start with '/'")]
    MissingLeadingSlash(String),

    #[error("Unbalanced braces in template '{0}'")]
    UnbalancedBraces(String),

    #[error("Empty placeholder name in template '{0}'")]
    EmptyPlaceholder(String),

    #[error("Placeholder '{name}' appears more than once in template '{template}'")]
    DuplicatePlaceholder { template: String, name: String },

    #[error("Invalid query '{query}' in template '{template}'")]
    InvalidQuery { template: String, query: String },

    #[error("Invalid regex pattern: {0}")]
    InvalidRegex(#[from] regex::Error),
}

/// Shape class of an upstream path template. Declared from least to most
/// specific; the priority of a template is derived from its kind only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TemplateKind {
    /// `/{anything}`: matches every path
    WholePath,
    /// `/`
    Root,
    /// Ends in a placeholder that may span several segments
    CatchAll,
    /// Placeholders, each bounded by a segment
    Segmented,
    /// No placeholders
    Literal,
}

impl TemplateKind {
    pub fn priority(&self) -> i32 {
        match self {
            TemplateKind::WholePath => 0,
            TemplateKind::Root => 1,
            TemplateKind::CatchAll => 2,
            TemplateKind::Segmented => 3,
            TemplateKind::Literal => 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(String),
    Placeholder(String),
}

/// Split a template into literal and `{placeholder}` tokens. When
/// `header_prefix` is set, `{header:name}` is accepted as a spelling of `{name}`.
fn tokenize(template: &str, header_prefix: bool) -> Result<Vec<Token>, TemplateError> {
    let mut tokens = Vec::new();
    let mut literal = String::new();
    let mut chars = template.chars();

    while let Some(c) = chars.next() {
        match c {
            '{' => {
                if !literal.is_empty() {
                    tokens.push(Token::Literal(std::mem::take(&mut literal)));
                }

                let mut name = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    match c {
                        '}' => {
                            closed = true;
                            break;
                        }
                        '{' => return Err(TemplateError::UnbalancedBraces(template.to_string())),
                        _ => name.push(c),
                    }
                }
                if !closed {
                    return Err(TemplateError::UnbalancedBraces(template.to_string()));
                }

                let name = if header_prefix {
                    name.strip_prefix("header:").map(str::to_string).unwrap_or(name)
                } else {
                    name
                };
                let name = name.trim().to_string();
                if name.is_empty() {
                    return Err(TemplateError::EmptyPlaceholder(template.to_string()));
                }
                tokens.push(Token::Placeholder(name));
            }
            '}' => return Err(TemplateError::UnbalancedBraces(template.to_string())),
            _ => literal.push(c),
        }
    }

    if !literal.is_empty() {
        tokens.push(Token::Literal(literal));
    }

    Ok(tokens)
}

fn check_unique<'a>(
    template: &str,
    names: impl IntoIterator<Item = &'a String>,
) -> Result<(), TemplateError> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name.to_ascii_lowercase()) {
            return Err(TemplateError::DuplicatePlaceholder {
                template: template.to_string(),
                name: name.clone(),
            });
        }
    }
    Ok(())
}

fn build_regex(pattern: &str, case_sensitive: bool) -> Result<Regex, TemplateError> {
    Ok(RegexBuilder::new(pattern)
        .case_insensitive(!case_sensitive)
        .build()?)
}

/// Query requirements of an upstream template.
#[derive(Debug, Clone)]
pub enum QueryTemplate {
    /// `?{name}`: captures the whole raw query string, matches any or none
    CatchAll(String),
    /// `?a=1&b={b}`: every listed key must be present, extra keys are ignored.
    /// A literal value matches if any occurrence of its key carries it; a
    /// placeholder captures the first occurrence.
    Params(Vec<QueryParam>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryParam {
    pub key: String,
    pub value: QueryValue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryValue {
    Literal(String),
    Placeholder(String),
}

impl QueryTemplate {
    fn parse(template: &str, query: &str) -> Result<Self, TemplateError> {
        let invalid = || TemplateError::InvalidQuery {
            template: template.to_string(),
            query: query.to_string(),
        };

        let tokens = tokenize(query, false)?;
        if let [Token::Placeholder(name)] = tokens.as_slice() {
            return Ok(QueryTemplate::CatchAll(name.clone()));
        }

        let mut params = Vec::new();
        for pair in query.split('&') {
            let (key, value) = pair.split_once('=').ok_or_else(invalid)?;
            if key.is_empty() || key.contains(['{', '}']) {
                return Err(invalid());
            }

            let value = match tokenize(value, false)?.as_slice() {
                [] => QueryValue::Literal(String::new()),
                [Token::Literal(lit)] => QueryValue::Literal(lit.clone()),
                [Token::Placeholder(name)] => QueryValue::Placeholder(name.clone()),
                _ => return Err(invalid()),
            };

            params.push(QueryParam {
                key: key.to_string(),
                value,
            });
        }

        Ok(QueryTemplate::Params(params))
    }

    fn placeholder_names(&self) -> Vec<&String> {
        match self {
            QueryTemplate::CatchAll(name) => vec![name],
            QueryTemplate::Params(params) => params
                .iter()
                .filter_map(|p| match &p.value {
                    QueryValue::Placeholder(name) => Some(name),
                    QueryValue::Literal(_) => None,
                })
                .collect(),
        }
    }

    fn capture(&self, query: Option<&str>) -> Option<Vec<PlaceholderNameAndValue>> {
        match self {
            QueryTemplate::CatchAll(name) => Some(vec![PlaceholderNameAndValue::new(
                name.as_str(),
                query.unwrap_or_default(),
            )]),
            QueryTemplate::Params(params) => {
                let pairs = parse_query(query.unwrap_or_default());
                let mut values = Vec::new();

                for param in params {
                    let mut with_key = pairs
                        .iter()
                        .filter(|pair| pair.decoded_key().eq_ignore_ascii_case(&param.key));

                    match &param.value {
                        QueryValue::Literal(expected) => {
                            if !with_key.any(|pair| pair.decoded_value() == expected.as_str()) {
                                return None;
                            }
                        }
                        QueryValue::Placeholder(name) => {
                            let pair = with_key.next()?;
                            values.push(PlaceholderNameAndValue::new(name.as_str(), pair.value));
                        }
                    }
                }

                Some(values)
            }
        }
    }
}

/// One raw `key=value` pair of a query string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryPair<'a> {
    pub key: &'a str,
    pub value: &'a str,
}

impl QueryPair<'_> {
    pub fn decoded_key(&self) -> std::borrow::Cow<'_, str> {
        urlencoding::decode(self.key).unwrap_or(std::borrow::Cow::Borrowed(self.key))
    }

    pub fn decoded_value(&self) -> std::borrow::Cow<'_, str> {
        urlencoding::decode(self.value).unwrap_or(std::borrow::Cow::Borrowed(self.value))
    }
}

/// Split a raw query string (without the leading `?`) into pairs, keeping
/// the original encoding.
pub fn parse_query(query: &str) -> Vec<QueryPair<'_>> {
    query
        .trim_start_matches('?')
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) => QueryPair { key, value },
            None => QueryPair { key: pair, value: "" },
        })
        .collect()
}

/// A compiled upstream path template.
#[derive(Debug, Clone)]
pub struct RouteTemplate {
    raw: String,
    pattern: Regex,
    kind: TemplateKind,
    case_sensitive: bool,
    path_names: Vec<String>,
    query: Option<QueryTemplate>,
}

impl RouteTemplate {
    pub fn compile(template: &str, case_sensitive: bool) -> Result<Self, TemplateError> {
        if template.is_empty() {
            return Err(TemplateError::Empty);
        }
        if !template.starts_with('/') {
            return Err(TemplateError::MissingLeadingSlash(template.to_string()));
        }

        let (path, query) = match template.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (template, None),
        };

        let tokens = tokenize(path, false)?;
        let query = query
            .map(|q| QueryTemplate::parse(template, q))
            .transpose()?;

        let path_names: Vec<String> = tokens
            .iter()
            .filter_map(|t| match t {
                Token::Placeholder(name) => Some(name.clone()),
                Token::Literal(_) => None,
            })
            .collect();

        check_unique(
            template,
            path_names
                .iter()
                .chain(query.iter().flat_map(|q| q.placeholder_names())),
        )?;

        let (pattern, kind) = if path == "/" {
            ("^/$".to_string(), TemplateKind::Root)
        } else if query.is_none() && matches!(tokens.as_slice(), [Token::Literal(l), Token::Placeholder(_)] if l == "/")
        {
            ("^/(.*)$".to_string(), TemplateKind::WholePath)
        } else {
            path_pattern(&tokens)
        };

        Ok(Self {
            raw: template.to_string(),
            pattern: build_regex(&pattern, case_sensitive)?,
            kind,
            case_sensitive,
            path_names,
            query,
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    pub fn kind(&self) -> TemplateKind {
        self.kind
    }

    pub fn priority(&self) -> i32 {
        self.kind.priority()
    }

    pub fn is_case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    pub fn query(&self) -> Option<&QueryTemplate> {
        self.query.as_ref()
    }

    pub fn contains_query_placeholder(&self) -> bool {
        self.query
            .as_ref()
            .is_some_and(|q| !q.placeholder_names().is_empty())
    }

    pub fn placeholder_names(&self) -> &[String] {
        &self.path_names
    }

    /// Match a request path and raw query, returning the captured values in
    /// template order (path first, then query).
    pub fn captures(&self, path: &str, query: Option<&str>) -> Option<Vec<PlaceholderNameAndValue>> {
        let caps = self.pattern.captures(path)?;

        let mut values: Vec<PlaceholderNameAndValue> = self
            .path_names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let value = caps.get(i + 1).map(|m| m.as_str()).unwrap_or_default();
                PlaceholderNameAndValue::new(name.as_str(), value)
            })
            .collect();

        if let Some(template) = &self.query {
            values.extend(template.capture(query)?);
        }

        Some(values)
    }

    pub fn is_match(&self, path: &str, query: Option<&str>) -> bool {
        if !self.pattern.is_match(path) {
            return false;
        }
        match &self.query {
            Some(template) => template.capture(query).is_some(),
            None => true,
        }
    }
}

fn path_pattern(tokens: &[Token]) -> (String, TemplateKind) {
    let mut pattern = String::from("^");
    let mut kind = TemplateKind::Literal;

    for (i, token) in tokens.iter().enumerate() {
        let next = tokens.get(i + 1);
        match token {
            Token::Literal(lit) => {
                let whole_segment_tail = matches!(next, Some(Token::Placeholder(_)))
                    && i + 2 == tokens.len()
                    && lit.ends_with('/');

                if whole_segment_tail {
                    pattern.push_str(&regex::escape(&lit[..lit.len() - 1]));
                } else if next.is_none() && lit.ends_with('/') {
                    pattern.push_str(&regex::escape(&lit[..lit.len() - 1]));
                    pattern.push_str("/?");
                } else {
                    pattern.push_str(&regex::escape(lit));
                    if next.is_none() {
                        pattern.push_str("/?");
                    }
                }
            }
            Token::Placeholder(_) => match next {
                Some(Token::Literal(lit)) if lit.starts_with('/') => {
                    pattern.push_str("([^/]+)");
                    kind = kind.min(TemplateKind::Segmented);
                }
                Some(_) => {
                    pattern.push_str("([^/]+?)");
                    kind = kind.min(TemplateKind::Segmented);
                }
                None => {
                    let whole_segment = matches!(
                        tokens.get(i.wrapping_sub(1)),
                        Some(Token::Literal(lit)) if lit.ends_with('/')
                    );
                    if whole_segment {
                        pattern.push_str("(?:|/(.*))");
                    } else {
                        pattern.push_str("(.*)");
                    }
                    kind = TemplateKind::CatchAll;
                }
            },
        }
    }

    pattern.push('$');
    (pattern, kind)
}

/// A compiled upstream header template.
#[derive(Debug, Clone)]
pub struct HeaderTemplate {
    name: String,
    raw: String,
    pattern: Regex,
    names: Vec<String>,
}

impl HeaderTemplate {
    pub fn compile(name: &str, template: &str, case_sensitive: bool) -> Result<Self, TemplateError> {
        let tokens = tokenize(template, true)?;

        let names: Vec<String> = tokens
            .iter()
            .filter_map(|t| match t {
                Token::Placeholder(name) => Some(name.clone()),
                Token::Literal(_) => None,
            })
            .collect();
        check_unique(template, names.iter())?;

        let last_placeholder = tokens
            .iter()
            .rposition(|t| matches!(t, Token::Placeholder(_)));

        let mut pattern = String::from("^");
        for (i, token) in tokens.iter().enumerate() {
            match token {
                Token::Literal(lit) => pattern.push_str(&regex::escape(lit)),
                Token::Placeholder(_) if Some(i) == last_placeholder => pattern.push_str("(.+)"),
                Token::Placeholder(_) => pattern.push_str("([^/]+)"),
            }
        }
        pattern.push('$');

        Ok(Self {
            name: name.to_ascii_lowercase(),
            raw: template.to_string(),
            pattern: build_regex(&pattern, case_sensitive)?,
            names,
        })
    }

    /// Lower-cased header name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn placeholder_names(&self) -> &[String] {
        &self.names
    }

    pub fn captures(&self, value: &str) -> Option<Vec<PlaceholderNameAndValue>> {
        let caps = self.pattern.captures(value)?;
        Some(
            self.names
                .iter()
                .enumerate()
                .map(|(i, name)| {
                    let value = caps.get(i + 1).map(|m| m.as_str()).unwrap_or_default();
                    PlaceholderNameAndValue::new(name.as_str(), value)
                })
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(template: &RouteTemplate, path: &str, query: Option<&str>) -> Vec<(String, String)> {
        template
            .captures(path, query)
            .unwrap()
            .into_iter()
            .map(|p| (p.name, p.value))
            .collect()
    }

    fn pair(name: &str, value: &str) -> (String, String) {
        (name.to_string(), value.to_string())
    }

    #[test]
    fn test_literal_template() {
        let t = RouteTemplate::compile("/api/products", false).unwrap();
        assert_eq!(t.kind(), TemplateKind::Literal);
        assert!(t.is_match("/api/products", None));
        assert!(t.is_match("/api/products/", None));
        assert!(t.is_match("/API/Products", None));
        assert!(!t.is_match("/api/products/1", None));
        assert!(!t.is_match("/api/productsx", None));
    }

    #[test]
    fn test_literal_with_trailing_slash() {
        let t = RouteTemplate::compile("/api/products/", false).unwrap();
        assert!(t.is_match("/api/products", None));
        assert!(t.is_match("/api/products/", None));
    }

    #[test]
    fn test_root_template() {
        let t = RouteTemplate::compile("/", false).unwrap();
        assert_eq!(t.kind(), TemplateKind::Root);
        assert_eq!(t.pattern(), "^/$");
        assert!(t.is_match("/", None));
        assert!(!t.is_match("/a", None));
    }

    #[test]
    fn test_whole_path_template() {
        let t = RouteTemplate::compile("/{url}", false).unwrap();
        assert_eq!(t.kind(), TemplateKind::WholePath);
        assert_eq!(t.priority(), 0);
        assert_eq!(values(&t, "/a/b/c", None), vec![pair("url", "a/b/c")]);
        assert_eq!(values(&t, "/", None), vec![pair("url", "")]);
    }

    #[test]
    fn test_segment_placeholders() {
        let t = RouteTemplate::compile("/products/{id}/reviews/{reviewId}/details", false).unwrap();
        assert_eq!(t.kind(), TemplateKind::Segmented);
        assert_eq!(
            values(&t, "/products/12/reviews/7/details", None),
            vec![pair("id", "12"), pair("reviewId", "7")]
        );
        assert!(!t.is_match("/products/1/2/reviews/7/details", None));
    }

    #[test]
    fn test_trailing_placeholder_spans_segments() {
        let t = RouteTemplate::compile("/products/{everything}", false).unwrap();
        assert_eq!(t.kind(), TemplateKind::CatchAll);
        assert_eq!(values(&t, "/products/123", None), vec![pair("everything", "123")]);
        assert_eq!(values(&t, "/products/a/b", None), vec![pair("everything", "a/b")]);
        assert_eq!(values(&t, "/products", None), vec![pair("everything", "")]);
        assert_eq!(values(&t, "/products/", None), vec![pair("everything", "")]);
        assert!(!t.is_match("/productsx", None));
    }

    #[test]
    fn test_placeholder_inside_segment() {
        let t = RouteTemplate::compile("/api/invoices_{url}", false).unwrap();
        assert_eq!(values(&t, "/api/invoices_123", None), vec![pair("url", "123")]);
        assert_eq!(values(&t, "/api/invoices_", None), vec![pair("url", "")]);
        assert!(!t.is_match("/api/invoices", None));

        let t = RouteTemplate::compile("/api/{version}-beta/items", false).unwrap();
        assert_eq!(values(&t, "/api/v2-beta/items", None), vec![pair("version", "v2")]);
    }

    #[test]
    fn test_case_sensitivity_preserves_capture_case() {
        let t = RouteTemplate::compile("/Products/{id}/Reviews", true).unwrap();
        assert!(t.is_match("/Products/1/Reviews", None));
        assert!(!t.is_match("/products/1/reviews", None));

        let t = RouteTemplate::compile("/products/{id}/reviews", false).unwrap();
        assert_eq!(values(&t, "/PRODUCTS/AbC/REVIEWS", None), vec![pair("id", "AbC")]);
    }

    #[test]
    fn test_query_catch_all() {
        let t = RouteTemplate::compile("/search?{everything}", false).unwrap();
        assert!(t.contains_query_placeholder());
        assert_eq!(
            values(&t, "/search", Some("q=a%20b&page=2")),
            vec![pair("everything", "q=a%20b&page=2")]
        );
        assert_eq!(values(&t, "/search", None), vec![pair("everything", "")]);
    }

    #[test]
    fn test_query_params() {
        let t = RouteTemplate::compile("/units/{unit}/updates?since={since}&kind=full", false).unwrap();
        assert!(t.contains_query_placeholder());
        assert_eq!(
            values(&t, "/units/4/updates", Some("KIND=full&since=2024-01-01&x=1")),
            vec![pair("unit", "4"), pair("since", "2024-01-01")]
        );
        assert!(!t.is_match("/units/4/updates", Some("since=1&kind=partial")));
        assert!(!t.is_match("/units/4/updates", Some("kind=full")));
        assert!(!t.is_match("/units/4/updates", None));
    }

    #[test]
    fn test_query_literal_matches_any_repeated_key() {
        let t = RouteTemplate::compile("/reports?kind=full&owner={owner}", false).unwrap();
        assert_eq!(
            values(&t, "/reports", Some("kind=partial&owner=ann&kind=full&owner=bob")),
            vec![pair("owner", "ann")]
        );
        assert!(!t.is_match("/reports", Some("kind=partial&kind=draft&owner=ann")));
    }

    #[test]
    fn test_query_with_trailing_slash_path() {
        let t = RouteTemplate::compile("/api/values/?id={id}", false).unwrap();
        assert!(t.is_match("/api/values", Some("id=1")));
        assert!(t.is_match("/api/values/", Some("id=1")));
    }

    #[test]
    fn test_priorities_ordered_by_kind() {
        let priority = |t: &str| RouteTemplate::compile(t, false).unwrap().priority();
        assert!(priority("/products/special") > priority("/products/{id}/x"));
        assert!(priority("/products/{id}/x") > priority("/products/{id}"));
        assert!(priority("/products/{id}") > priority("/"));
        assert!(priority("/") > priority("/{all}"));
    }

    #[test]
    fn test_template_errors() {
        assert!(matches!(RouteTemplate::compile("", false), Err(TemplateError::Empty)));
        assert!(matches!(
            RouteTemplate::compile("products", false),
            Err(TemplateError::MissingLeadingSlash(_))
        ));
        assert!(matches!(
            RouteTemplate::compile("/products/{id", false),
            Err(TemplateError::UnbalancedBraces(_))
        ));
        assert!(matches!(
            RouteTemplate::compile("/products/{a{b}}", false),
            Err(TemplateError::UnbalancedBraces(_))
        ));
        assert!(matches!(
            RouteTemplate::compile("/products/id}", false),
            Err(TemplateError::UnbalancedBraces(_))
        ));
        assert!(matches!(
            RouteTemplate::compile("/products/{}", false),
            Err(TemplateError::EmptyPlaceholder(_))
        ));
        assert!(matches!(
            RouteTemplate::compile("/a/{id}/b/{id}", false),
            Err(TemplateError::DuplicatePlaceholder { .. })
        ));
        assert!(matches!(
            RouteTemplate::compile("/a?id={id}&x", false),
            Err(TemplateError::InvalidQuery { .. })
        ));
    }

    #[test]
    fn test_regex_metacharacters_escaped() {
        let t = RouteTemplate::compile("/files/v1.0/{name}", false).unwrap();
        assert!(t.is_match("/files/v1.0/readme", None));
        assert!(!t.is_match("/files/v1x0/readme", None));
    }

    #[test]
    fn test_header_template() {
        let t = HeaderTemplate::compile("x-tenant", "tenant-{header:tenant}", false).unwrap();
        assert_eq!(t.placeholder_names(), ["tenant".to_string()]);
        let caps = t.captures("Tenant-Acme").unwrap();
        assert_eq!(caps[0].value, "Acme");
        assert!(t.captures("other-acme").is_none());

        let t = HeaderTemplate::compile("x-region", "{region}/{zone}", true).unwrap();
        let caps = t.captures("eu/west/1").unwrap();
        assert_eq!(caps[0].value, "eu");
        assert_eq!(caps[1].value, "west/1");
    }

    #[test]
    fn test_literal_header_template() {
        let t = HeaderTemplate::compile("Laura", "1", false).unwrap();
        assert!(t.captures("1").is_some());
        assert!(t.captures("12").is_none());
    }

    #[test]
    fn test_parse_query_keeps_encoding() {
        let pairs = parse_query("a=1&b=x%20y&flag");
        assert_eq!(pairs.len(), 3);
        assert_eq!(pairs[1].value, "x%20y");
        assert_eq!(pairs[1].decoded_value(), "x y");
        assert_eq!(pairs[2], QueryPair { key: "flag", value: "" });
    }
}
