use super::resolver::{RequestMeta, Resolution};
use dashmap::DashMap;
use hyper::Method;

/// The request attributes a resolution depends on. Fields are kept apart
/// so no combination of separator characters in a path, query or header
/// value can make two different requests share an entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    method: Method,
    host: Option<String>,
    path: String,
    query: Option<String>,
    // one entry per routing header, every occurrence in request order
    headers: Vec<Vec<Vec<u8>>>,
}

/// Resolution results keyed by the request attributes routing depends on.
/// One cache belongs to one route table and is dropped with it.
pub struct ResolutionCache {
    entries: DashMap<CacheKey, Resolution>,
    capacity: usize,
}

impl ResolutionCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::with_capacity(capacity.min(10_000)),
            capacity,
        }
    }

    /// Cache key for a request. Only headers some route routes on take part.
    pub fn key(req: &RequestMeta<'_>, routing_headers: &[String]) -> CacheKey {
        let headers = routing_headers
            .iter()
            .map(|name| {
                req.headers
                    .get_all(name.as_str())
                    .iter()
                    .map(|value| value.as_bytes().to_vec())
                    .collect()
            })
            .collect();

        CacheKey {
            method: req.method.clone(),
            host: req.host.map(str::to_ascii_lowercase),
            path: req.path.to_string(),
            query: req.query.map(str::to_string),
            headers,
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<Resolution> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    /// Store a resolution. The cache is cleared when it reaches capacity.
    pub fn insert(&self, key: CacheKey, resolution: Resolution) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.len() >= self.capacity {
            self.entries.clear();
        }
        self.entries.insert(key, resolution);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
