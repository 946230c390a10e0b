//! Issue id handling.
//!
//! Ids have the shape `<prefix>-<suffix>` where the prefix names the
//! repository (e.g., "bd") and the suffix is a base36 token, optionally
//! extended with a hierarchical dotted path (`bd-abc12.1.3`). Hierarchical
//! ids imply a parent-of relation to the id with the last `.<digits>`
//! segment removed.
//!
//! Generated suffixes compose a timestamp, an atomic per-process counter,
//! and a small random tail, so ids are unique per process and overwhelmingly
//! unlikely to collide across processes.

use chrono::{DateTime, Utc};
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{BeadsError, Result};

const BASE36_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Epoch offset keeping generated suffixes short (2024-01-01T00:00:00Z).
const ID_EPOCH_SECS: i64 = 1_704_067_200;

static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn base36_encode(mut num: u64) -> String {
    if num == 0 {
        return "0".to_string();
    }
    let mut chars = Vec::new();
    while num > 0 {
        chars.push(BASE36_ALPHABET[(num % 36) as usize] as char);
        num /= 36;
    }
    chars.into_iter().rev().collect()
}

/// Generator producing unique issue ids for one prefix.
#[derive(Debug, Clone)]
pub struct IdGenerator {
    prefix: String,
}

impl IdGenerator {
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Generate a candidate id for the given creation time.
    ///
    /// Suffix layout: base36 seconds since the id epoch, base36 process
    /// counter, two random base36 characters.
    #[must_use]
    pub fn candidate(&self, created_at: DateTime<Utc>) -> String {
        let secs = created_at.timestamp().saturating_sub(ID_EPOCH_SECS).max(0);
        #[allow(clippy::cast_sign_loss)]
        let ts = base36_encode(secs as u64);
        let counter = base36_encode(ID_COUNTER.fetch_add(1, Ordering::Relaxed));
        let mut rng = rand::rng();
        let tail: String = (0..2)
            .map(|_| BASE36_ALPHABET[rng.random_range(0..36)] as char)
            .collect();
        format!("{}-{ts}{counter}{tail}", self.prefix)
    }

    /// Generate an id that does not collide with existing ones.
    ///
    /// The checker returns `true` if the candidate already exists.
    pub fn generate<F>(&self, created_at: DateTime<Utc>, exists: F) -> String
    where
        F: Fn(&str) -> bool,
    {
        loop {
            let id = self.candidate(created_at);
            if !exists(&id) {
                return id;
            }
            // Counter advanced; the next candidate differs.
        }
    }
}

/// Parsed components of an issue id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedId {
    /// The repository prefix (e.g., "bd").
    pub prefix: String,
    /// The base suffix token.
    pub suffix: String,
    /// Hierarchical path segments (`[1, 3]` for `.1.3`).
    pub child_path: Vec<u32>,
}

impl ParsedId {
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.child_path.is_empty()
    }

    /// Depth in the hierarchy (0 for root ids).
    #[must_use]
    pub fn depth(&self) -> usize {
        self.child_path.len()
    }

    /// Reconstruct the full id string.
    #[must_use]
    pub fn to_id_string(&self) -> String {
        let mut out = format!("{}-{}", self.prefix, self.suffix);
        for segment in &self.child_path {
            use std::fmt::Write as _;
            let _ = write!(out, ".{segment}");
        }
        out
    }
}

/// Parse an issue id into its components.
///
/// # Errors
///
/// Returns `InvalidId` if the id lacks a prefix, has an empty suffix, or has
/// non-numeric hierarchical segments.
pub fn parse_id(id: &str) -> Result<ParsedId> {
    let Some(dash_pos) = id.find('-') else {
        return Err(BeadsError::InvalidId { id: id.to_string() });
    };

    let prefix = &id[..dash_pos];
    let remainder = &id[dash_pos + 1..];
    if prefix.is_empty() || remainder.is_empty() {
        return Err(BeadsError::InvalidId { id: id.to_string() });
    }

    // The suffix may itself contain dashes (e.g., wisp ids); the dotted
    // hierarchy applies only after the last non-numeric segment boundary.
    let parts: Vec<&str> = remainder.split('.').collect();
    let suffix = parts[0].to_string();
    if suffix.is_empty() {
        return Err(BeadsError::InvalidId { id: id.to_string() });
    }

    let mut child_path = Vec::new();
    for part in parts.iter().skip(1) {
        match part.parse::<u32>() {
            Ok(n) => child_path.push(n),
            Err(_) => return Err(BeadsError::InvalidId { id: id.to_string() }),
        }
    }

    Ok(ParsedId {
        prefix: prefix.to_string(),
        suffix,
        child_path,
    })
}

/// Extract the prefix of an id without validating the rest.
#[must_use]
pub fn prefix_of(id: &str) -> Option<&str> {
    let pos = id.find('-')?;
    if pos == 0 { None } else { Some(&id[..pos]) }
}

/// Hierarchical parent: the id with its last `.<digits>` segment stripped.
///
/// Returns `None` for root ids and for ids whose trailing segment is not a
/// pure number.
#[must_use]
pub fn parent_of(id: &str) -> Option<String> {
    let dot = id.rfind('.')?;
    let tail = &id[dot + 1..];
    if tail.is_empty() || !tail.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    // The dot must come after the prefix separator.
    let dash = id.find('-')?;
    if dot < dash {
        return None;
    }
    Some(id[..dot].to_string())
}

/// Hierarchy depth: number of trailing numeric `.N` segments.
#[must_use]
pub fn hierarchy_depth(id: &str) -> usize {
    let mut depth = 0;
    let mut current = id.to_string();
    while let Some(parent) = parent_of(&current) {
        depth += 1;
        current = parent;
    }
    depth
}

/// Validate that an id carries one of the allowed prefixes.
///
/// # Errors
///
/// Returns `PrefixValidation` if the id is malformed or its prefix is neither
/// the expected prefix nor in the allowed list.
pub fn validate_prefix(id: &str, expected_prefix: &str, allowed_prefixes: &[String]) -> Result<()> {
    let Some(prefix) = prefix_of(id) else {
        return Err(BeadsError::InvalidId { id: id.to_string() });
    };

    if prefix == expected_prefix || allowed_prefixes.iter().any(|p| p == prefix) {
        return Ok(());
    }

    Err(BeadsError::PrefixValidation {
        id: id.to_string(),
        expected: expected_prefix.to_string(),
    })
}

/// Normalize an id to consistent lowercase form.
#[must_use]
pub fn normalize_id(id: &str) -> String {
    id.to_lowercase()
}

/// Resolve a partial id to a full id.
///
/// Resolution order:
/// 1. Exact match.
/// 2. If the input lacks a prefix, prepend `default_prefix-` and retry.
/// 3. Unique substring match on the suffix portion.
///
/// # Errors
///
/// - `IssueNotFound` if nothing matches.
/// - `AmbiguousId` listing candidates if the substring matches several ids.
pub fn resolve_id<F, G>(
    input: &str,
    default_prefix: &str,
    exists: F,
    substring_match: G,
) -> Result<String>
where
    F: Fn(&str) -> bool,
    G: Fn(&str) -> Vec<String>,
{
    let input = input.trim();
    if input.is_empty() {
        return Err(BeadsError::InvalidId { id: String::new() });
    }

    let normalized = normalize_id(input);
    if exists(&normalized) {
        return Ok(normalized);
    }

    if !normalized.contains('-') {
        let with_prefix = format!("{default_prefix}-{normalized}");
        if exists(&with_prefix) {
            return Ok(with_prefix);
        }
    }

    let pattern = normalized
        .find('-')
        .map_or(normalized.as_str(), |pos| &normalized[pos + 1..]);
    if !pattern.is_empty() {
        let mut matches = substring_match(pattern);
        matches.sort();
        matches.dedup();
        match matches.len() {
            0 => {}
            1 => return Ok(matches.remove(0)),
            _ => {
                return Err(BeadsError::AmbiguousId {
                    partial: input.to_string(),
                    matches,
                });
            }
        }
    }

    Err(BeadsError::IssueNotFound {
        id: input.to_string(),
    })
}

/// Find ids whose suffix portion contains the given substring.
#[must_use]
pub fn find_matching_ids(all_ids: &[String], suffix_substring: &str) -> Vec<String> {
    all_ids
        .iter()
        .filter(|id| {
            id.find('-').is_some_and(|pos| {
                let suffix = &id[pos + 1..];
                let base = suffix.split('.').next().unwrap_or(suffix);
                base.contains(suffix_substring)
            })
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_root_id() {
        let parsed = parse_id("bd-abc12").unwrap();
        assert_eq!(parsed.prefix, "bd");
        assert_eq!(parsed.suffix, "abc12");
        assert!(parsed.is_root());
        assert_eq!(parsed.to_id_string(), "bd-abc12");
    }

    #[test]
    fn parse_hierarchical_id() {
        let parsed = parse_id("bd-abc12.1.3").unwrap();
        assert_eq!(parsed.child_path, vec![1, 3]);
        assert_eq!(parsed.depth(), 2);
        assert_eq!(parsed.to_id_string(), "bd-abc12.1.3");
    }

    #[test]
    fn parse_rejects_malformed() {
        assert!(parse_id("nodash").is_err());
        assert!(parse_id("-abc").is_err());
        assert!(parse_id("bd-").is_err());
        assert!(parse_id("bd-abc.x").is_err());
    }

    #[test]
    fn parent_strips_last_segment() {
        assert_eq!(parent_of("bd-abc12.1.3"), Some("bd-abc12.1".to_string()));
        assert_eq!(parent_of("bd-abc12.1"), Some("bd-abc12".to_string()));
        assert_eq!(parent_of("bd-abc12"), None);
        assert_eq!(parent_of("bd-wisp-x.y"), None);
    }

    #[test]
    fn depth_counts_numeric_segments() {
        assert_eq!(hierarchy_depth("bd-abc12"), 0);
        assert_eq!(hierarchy_depth("bd-abc12.1"), 1);
        assert_eq!(hierarchy_depth("bd-abc12.1.3"), 2);
    }

    #[test]
    fn prefix_validation() {
        assert!(validate_prefix("bd-abc", "bd", &[]).is_ok());
        assert!(validate_prefix("foo-abc", "bd", &["foo".to_string()]).is_ok());
        assert!(validate_prefix("foo-abc", "bd", &[]).is_err());
    }

    #[test]
    fn generator_produces_valid_unique_ids() {
        let generator = IdGenerator::new("bd");
        let now = Utc::now();
        let a = generator.generate(now, |_| false);
        let b = generator.generate(now, |_| false);
        assert!(a.starts_with("bd-"));
        assert!(parse_id(&a).is_ok());
        assert_ne!(a, b);
    }

    #[test]
    fn generator_skips_collisions() {
        let generator = IdGenerator::new("bd");
        let now = Utc::now();
        let taken = generator.candidate(now);
        let id = generator.generate(now, |candidate| candidate == taken);
        assert_ne!(id, taken);
    }

    #[test]
    fn resolve_exact_and_prefix_normalized() {
        let db = vec!["bd-abc12".to_string(), "bd-xyz89".to_string()];
        let exists = |id: &str| db.contains(&id.to_string());
        let substr = |p: &str| find_matching_ids(&db, p);

        assert_eq!(resolve_id("bd-abc12", "bd", exists, substr).unwrap(), "bd-abc12");
        assert_eq!(resolve_id("abc12", "bd", exists, substr).unwrap(), "bd-abc12");
        assert_eq!(resolve_id("xyz", "bd", exists, substr).unwrap(), "bd-xyz89");
    }

    #[test]
    fn resolve_ambiguous_lists_candidates() {
        let db = vec!["bd-abc12".to_string(), "bd-abd34".to_string()];
        let exists = |id: &str| db.contains(&id.to_string());
        let substr = |p: &str| find_matching_ids(&db, p);

        match resolve_id("ab", "bd", exists, substr) {
            Err(BeadsError::AmbiguousId { matches, .. }) => {
                assert_eq!(matches.len(), 2);
            }
            other => panic!("expected AmbiguousId, got {other:?}"),
        }
    }

    #[test]
    fn resolve_not_found() {
        let db: Vec<String> = vec![];
        let exists = |id: &str| db.contains(&id.to_string());
        let substr = |p: &str| find_matching_ids(&db, p);
        assert!(matches!(
            resolve_id("zzz", "bd", exists, substr),
            Err(BeadsError::IssueNotFound { .. })
        ));
    }
}
