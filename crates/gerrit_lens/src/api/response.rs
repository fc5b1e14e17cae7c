//! Response body normalization.

use serde::de::DeserializeOwned;

use super::error::{GerritError, Result};

/// Anti-XSSI prefix Gerrit puts in front of every JSON body.
pub const MAGIC_PREFIX: &str = ")]}'";

/// Strip the anti-XSSI prefix.
///
/// The body is trimmed first; if it then starts with the prefix, the prefix
/// is removed and the remainder trimmed again. Without the prefix the body is
/// only trimmed.
#[must_use]
pub fn strip_magic_prefix(body: &str) -> &str {
    let trimmed = body.trim();
    match trimmed.strip_prefix(MAGIC_PREFIX) {
        Some(rest) => rest.trim(),
        None => trimmed,
    }
}

/// Parse a (possibly prefixed) Gerrit JSON body.
pub fn parse_json<T: DeserializeOwned>(body: &str) -> Result<T> {
    serde_json::from_str(strip_magic_prefix(body)).map_err(GerritError::from)
}
