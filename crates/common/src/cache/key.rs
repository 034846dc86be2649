//! Deterministic request fingerprints
//!
//! A [`DedupKey`] is the BLAKE3 digest of
//! `METHOD + normalized path + stable JSON of the sorted parameters`.
//! Query parameters embedded in the path are folded into the parameter set,
//! so `GET /a?x=1` and `GET /a` with `x=1` collide. Embedded query strings
//! are form-decoded first, and neither parameter order nor the order of a
//! repeated key's values matters.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Fingerprint of a logical request
#[derive(Clone)]
pub struct DedupKey {
    digest: [u8; 32],
    label: Arc<str>,
}

impl DedupKey {
    /// Build a key from a method, a path (optionally with a query string) and
    /// extra parameters
    ///
    /// # Examples
    ///
    /// ```
    /// use ledgerlens_common::cache::DedupKey;
    ///
    /// let a = DedupKey::new("get", "/api/accounts/?page=2", [("limit", "50")]);
    /// let b = DedupKey::new("GET", "api//accounts", [("limit", "50"), ("page", "2")]);
    /// assert_eq!(a, b);
    /// ```
    pub fn new<I, K, V>(method: &str, path: &str, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let method = method.trim().to_ascii_uppercase();
        let (path, query) = split_query(path);
        let path = normalize_path(path);

        let mut sorted: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (k, v) in parse_query(query) {
            sorted.entry(k).or_default().push(v);
        }
        for (k, v) in params {
            sorted.entry(k.into()).or_default().push(v.into());
        }
        for values in sorted.values_mut() {
            values.sort_unstable();
        }

        // BTreeMap serializes in key order; this cannot fail for string maps
        let params_json = serde_json::to_string(&sorted).unwrap_or_default();

        let mut hasher = blake3::Hasher::new();
        hasher.update(method.as_bytes());
        hasher.update(b"\n");
        hasher.update(path.as_bytes());
        hasher.update(b"\n");
        hasher.update(params_json.as_bytes());

        Self { digest: *hasher.finalize().as_bytes(), label: format!("{method} {path}").into() }
    }

    /// Key without extra parameters
    pub fn from_request(method: &str, path: &str) -> Self {
        Self::new(method, path, std::iter::empty::<(String, String)>())
    }

    /// Hex-encoded digest
    pub fn to_hex(&self) -> String {
        self.digest.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// `METHOD /path` for logs
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl PartialEq for DedupKey {
    fn eq(&self, other: &Self) -> bool {
        self.digest == other.digest
    }
}

impl Eq for DedupKey {}

impl Hash for DedupKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.digest.hash(state);
    }
}

impl fmt::Debug for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DedupKey({} #{})", self.label, &self.to_hex()[..12])
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

fn split_query(path: &str) -> (&str, &str) {
    let path = path.split('#').next().unwrap_or_default();
    match path.split_once('?') {
        Some((p, q)) => (p, q),
        None => (path, ""),
    }
}

fn parse_query(query: &str) -> impl Iterator<Item = (String, String)> + '_ {
    url::form_urlencoded::parse(query.as_bytes()).map(|(k, v)| (k.into_owned(), v.into_owned()))
}

/// Leading slash, no empty segments, no trailing slash; an absolute URL keeps
/// its lower-cased origin
fn normalize_path(path: &str) -> String {
    let (origin, rest) = match path.split_once("://") {
        Some((scheme, after)) => {
            let (host, rest) = after.split_once('/').unwrap_or((after, ""));
            (format!("{}://{}", scheme.to_ascii_lowercase(), host.to_ascii_lowercase()), rest)
        }
        None => (String::new(), path),
    };

    let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();
    format!("{origin}/{}", segments.join("/"))
}
