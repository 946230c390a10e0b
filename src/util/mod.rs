//! Shared utilities.
//!
//! - Content hashing over the canonical issue form (SHA-256)
//! - Id parsing, validation, and generation
//! - Time parsing and RFC3339 formatting

pub mod hash;
pub mod id;
pub mod time;

pub use hash::{ContentHashable, content_hash, normalize_text, rehash};
pub use id::{
    IdGenerator, ParsedId, find_matching_ids, hierarchy_depth, normalize_id, parent_of, parse_id,
    prefix_of, resolve_id, validate_prefix,
};
pub use time::{now_rfc3339_nanos, parse_flexible_timestamp, to_rfc3339_nanos};
