//! Resolve user-typed (possibly shortened) task ids to full ids

use crate::error::{Error, Result};
use crate::task::normalize_id;

/// Minimum number of hex characters in a partial id
pub const MIN_PARTIAL_LEN: usize = 3;

/// Resolve `input` against `ids`
///
/// An exact full-id match wins. Otherwise input containing `-` is matched
/// as a prefix of whole ids (`tick-a3f`) and bare input as a prefix of the
/// part after the separator (`a3f`). Candidates are reported sorted.
pub fn resolve_id<I, S>(ids: I, input: &str) -> Result<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let original = input.trim();
    let needle = normalize_id(original);
    let hex_part = needle.rsplit_once('-').map(|(_, hex)| hex).unwrap_or(&needle);
    if hex_part.chars().count() < MIN_PARTIAL_LEN {
        return Err(Error::InvalidArgument(format!(
            "partial ID must be at least {MIN_PARTIAL_LEN} hex characters"
        )));
    }
    let qualified = needle.contains('-');

    let mut matches: Vec<String> = Vec::new();
    for id in ids {
        let id = id.as_ref();
        let folded = normalize_id(id);
        if folded == needle {
            return Ok(id.to_string());
        }
        let candidate = if qualified {
            folded.as_str()
        } else {
            folded.rsplit_once('-').map(|(_, hex)| hex).unwrap_or(&folded)
        };
        if candidate.starts_with(&needle) {
            matches.push(id.to_string());
        }
    }

    matches.sort();
    matches.dedup();
    match matches.len() {
        0 => Err(Error::NotFound(original.to_string())),
        1 => Ok(matches.remove(0)),
        _ => Err(Error::Ambiguous {
            input: original.to_string(),
            candidates: matches,
        }),
    }
}

/// Resolve a comma-separated list, skipping empty entries and duplicates
pub fn resolve_id_list<S: AsRef<str>>(ids: &[S], input: &str) -> Result<Vec<String>> {
    let mut resolved: Vec<String> = Vec::new();
    for part in input.split(',') {
        if part.trim().is_empty() {
            continue;
        }
        let id = resolve_id(ids, part)?;
        if !resolved.contains(&id) {
            resolved.push(id);
        }
    }
    Ok(resolved)
}
