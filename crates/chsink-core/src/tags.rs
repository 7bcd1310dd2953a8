//! Tag canonicalization.
//!
//! A tag set is rendered as its `key=value` pairs sorted lexicographically
//! as whole strings and joined by a single space. The rendering depends only
//! on the set's contents, never on iteration order.

/// Tag holding the request URL.
pub const URL_TAG: &str = "url";
/// Tag holding the request label, usually the request name.
pub const LABEL_TAG: &str = "label";
/// Tag holding the response status.
pub const STATUS_TAG: &str = "status";

/// Render a tag set canonically.
///
/// Pairs sort as rendered strings, so `"a-b=2"` comes before `"a=1"`.
/// Empty input gives an empty string.
pub fn canonicalize<I, K, V>(tags: I) -> String
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut pairs: Vec<String> = tags
        .into_iter()
        .map(|(k, v)| format!("{}={}", k.as_ref(), v.as_ref()))
        .collect();
    pairs.sort_unstable();
    pairs.join(" ")
}
