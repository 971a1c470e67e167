//! Shared id types and the element-id wire format.

/// Numeric id of one entity inside a collection. Always positive.
pub type Id = u32;

/// Monotonically increasing id stamped on each update batch. Used for
/// persistence bookkeeping and relation-cache validation.
pub type ChangeId = u64;

/// Anything that can be normalized to a collection string: the string
/// itself, a collection descriptor or a repository.
pub trait HasCollection {
    fn collection_string(&self) -> &str;
}

impl HasCollection for str {
    fn collection_string(&self) -> &str {
        self
    }
}

impl HasCollection for String {
    fn collection_string(&self) -> &str {
        self
    }
}

/// Builds the `"<collection>:<id>"` element id identifying one entity
/// across the whole system.
pub fn element_id(collection: &str, id: Id) -> String {
    format!("{}:{}", collection, id)
}

/// Parses an element id. Returns `None` for malformed strings,
/// non-integer ids and non-positive ids.
pub fn parse_element_id(value: &str) -> Option<(&str, Id)> {
    let (collection, id_part) = value.rsplit_once(':')?;
    if collection.is_empty() || id_part.is_empty() {
        return None;
    }
    // u32::from_str accepts a leading '+', the wire format does not.
    if !id_part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let id: Id = id_part.parse().ok()?;
    if id == 0 {
        return None;
    }
    Some((collection, id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_id_format() {
        assert_eq!(element_id("motions/motion", 42), "motions/motion:42");
    }

    #[test]
    fn test_parse_element_id() {
        assert_eq!(parse_element_id("motions/motion:42"), Some(("motions/motion", 42)));
        assert_eq!(parse_element_id("a:1"), Some(("a", 1)));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert_eq!(parse_element_id("motions/motion"), None);
        assert_eq!(parse_element_id("motions/motion:"), None);
        assert_eq!(parse_element_id(":1"), None);
        assert_eq!(parse_element_id("motions/motion:0"), None);
        assert_eq!(parse_element_id("motions/motion:abc"), None);
        assert_eq!(parse_element_id("motions/motion:+3"), None);
        assert_eq!(parse_element_id("motions/motion:-3"), None);
    }
}
