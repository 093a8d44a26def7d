//! Deterministic collection identities.
//!
//! The same resolved location set with the same filters always maps to the
//! same name, which is what makes index reuse work. Names only contain
//! `[A-Za-z0-9._-]`, start and end with an alphanumeric character and are
//! at least three characters long.

use sha2::{Digest, Sha256};
use url::Url;

use crate::models::CollectionMode;

/// Keywords beyond this many do not appear in the readable part of the name.
const MAX_NAME_KEYWORDS: usize = 3;

/// Inputs to [`collection_name`].
#[derive(Debug, Clone, Copy)]
pub struct NameParts<'a> {
    pub mode: CollectionMode,
    /// What the caller asked for; only shapes the readable base name.
    pub seeds: &'a [String],
    /// Resolved locations; hashed, order-insensitive.
    pub locations: &'a [String],
    pub keywords: &'a [String],
    pub url_keyword: Option<&'a str>,
}

/// First 8 hex characters of SHA-256 over the sorted, concatenated locations.
pub fn location_hash(locations: &[String]) -> String {
    let mut sorted: Vec<&str> = locations.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    let mut hasher = Sha256::new();
    for location in sorted {
        hasher.update(location.as_bytes());
    }
    let digest = format!("{:x}", hasher.finalize());
    digest[..8].to_string()
}

pub fn collection_name(parts: &NameParts<'_>) -> String {
    let mode = parts.mode.as_str();
    let hash = location_hash(parts.locations);

    let mut name = mode.to_string();
    if let Some(base) = base_name(parts) {
        name.push('_');
        name.push_str(&base);
    }
    if !parts.keywords.is_empty() {
        let kws: Vec<String> = parts
            .keywords
            .iter()
            .take(MAX_NAME_KEYWORDS)
            .map(|k| underscore(k))
            .collect();
        name.push_str("_keywords_");
        name.push_str(&kws.join("_"));
    }
    if let Some(k) = parts.url_keyword.filter(|k| !k.is_empty()) {
        name.push_str("_urlkeyword_");
        name.push_str(&underscore(k));
    }
    name.push('_');
    name.push_str(&hash);

    sanitize(&name, mode, &hash)
}

fn base_name(parts: &NameParts<'_>) -> Option<String> {
    if parts.mode == CollectionMode::Kb {
        return None;
    }
    let netloc = match parts.seeds {
        [single] => Url::parse(single.trim()).ok().and_then(|u| {
            u.host_str().map(|host| match u.port() {
                Some(port) => format!("{host}:{port}"),
                None => host.to_string(),
            })
        }),
        _ => None,
    };
    Some(
        netloc
            .map(|n| n.replace('.', "_"))
            .unwrap_or_else(|| "url_list".to_string()),
    )
}

fn underscore(s: &str) -> String {
    s.replace([' ', '-'], "_")
}

/// Force `raw` into the allowed alphabet and shape.
pub fn sanitize(raw: &str, mode: &str, hash: &str) -> String {
    let replaced: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let mut name = replaced.trim_matches('_').to_string();

    if name.len() < 3 {
        name = format!("{mode}_{hash}");
    }
    if !name.starts_with(|c: char| c.is_ascii_alphanumeric()) {
        name = format!("{mode}_{name}");
    }
    if !name.ends_with(|c: char| c.is_ascii_alphanumeric()) {
        name = format!("{name}_{}", &hash[..4.min(hash.len())]);
    }
    name
}

/// True when `name` satisfies the collection-name constraints.
pub fn is_valid_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    bytes.len() >= 3
        && bytes[0].is_ascii_alphanumeric()
        && bytes[bytes.len() - 1].is_ascii_alphanumeric()
        && bytes
            .iter()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'))
}
