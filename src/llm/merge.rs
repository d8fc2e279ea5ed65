//! Reconstruction of monotonically growing output from mixed delta and
//! snapshot fragments.
//!
//! Backends emit pure deltas, cumulative snapshots, or a mix of both. One rule
//! covers all of them:
//!
//! - a candidate that is a prefix of (or equal to) what we have is stale and
//!   ignored;
//! - a candidate that extends what we have is a snapshot and replaces it;
//! - anything else is a delta and is appended.

/// Merge `candidate` into `accumulated`, returning the new text and whether
/// it grew.
pub fn merge(candidate: &str, accumulated: &str) -> (String, bool) {
    let mut merged = accumulated.to_string();
    let grew = merge_into(&mut merged, candidate);
    (merged, grew)
}

/// In-place variant of [`merge`].
pub fn merge_into(accumulated: &mut String, candidate: &str) -> bool {
    if accumulated.starts_with(candidate) {
        return false;
    }
    if candidate.starts_with(accumulated.as_str()) {
        accumulated.clear();
        accumulated.push_str(candidate);
        return true;
    }
    accumulated.push_str(candidate);
    true
}
