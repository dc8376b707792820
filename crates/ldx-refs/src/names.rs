//! Collection name validation.
//!
//! Valid collection names:
//! - Must be non-empty
//! - Must not contain whitespace or `.`, `$`, `;`, `,`, `(`, `)`
//! - Must not start with `_` (reserved for internal collections)

use crate::error::{RefError, Result};

/// Characters that are forbidden anywhere in a collection name.
const FORBIDDEN_CHARS: &[char] = &['.', '$', ';', ',', '(', ')', '\'', '"'];

/// Validate a user-supplied collection name.
///
/// # Examples
///
/// ```
/// use ldx_refs::names::validate_collection_name;
///
/// assert!(validate_collection_name("customers").is_ok());
/// assert!(validate_collection_name("order-lines").is_ok());
/// assert!(validate_collection_name("").is_err());
/// assert!(validate_collection_name("_files").is_err());
/// ```
pub fn validate_collection_name(name: &str) -> Result<()> {
    let invalid = |reason: String| RefError::InvalidName {
        name: name.to_string(),
        reason,
    };

    if name.is_empty() {
        return Err(invalid("collection name must not be empty".into()));
    }
    if let Some(ch) = name.chars().find(|c| c.is_whitespace()) {
        return Err(invalid(format!("contains whitespace: {ch:?}")));
    }
    if let Some(ch) = name.chars().find(|c| FORBIDDEN_CHARS.contains(c)) {
        return Err(invalid(format!("contains forbidden character: {ch:?}")));
    }
    if name.starts_with('_') {
        return Err(invalid("names starting with '_' are reserved".into()));
    }
    Ok(())
}
