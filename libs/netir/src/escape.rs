//! Escaped-identifier handling.
//!
//! Names that cannot be expressed as plain identifiers (or as a plain
//! identifier with a single bit select, such as `data[3]` or `q<0>`) are
//! stored with a leading backslash. Escaped names are atomic: the member
//! name grammar and the rebuild engine never decompose them.

use arcstr::ArcStr;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref SAFE_NAME: Regex =
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\[[0-9]+\]|<[0-9]+>)?$").unwrap();
}

/// Returns `true` if `name` carries a leading escape character.
#[inline]
pub fn is_escaped(name: &str) -> bool {
    name.starts_with('\\')
}

/// Returns `true` if `name` must be escaped before it can be stored.
///
/// Already-escaped names never need escaping again.
pub fn need_escape(name: &str) -> bool {
    if is_escaped(name) {
        return false;
    }
    !SAFE_NAME.is_match(name)
}

/// Escapes `name` if necessary and returns the storable form.
pub fn make_safe(name: &str) -> ArcStr {
    if need_escape(name) {
        arcstr::format!("\\{}", name)
    } else {
        ArcStr::from(name)
    }
}
