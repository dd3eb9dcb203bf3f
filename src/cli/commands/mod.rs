pub mod access;
pub mod migrate;
pub mod org;
pub mod system;
pub mod user;

use anyhow::bail;
use serde_json::{Map, Value};

/// Parse a `--data` argument into a JSON object
pub(crate) fn parse_object(raw: Option<&str>) -> anyhow::Result<Map<String, Value>> {
    match raw {
        None => Ok(Map::new()),
        Some(raw) => match serde_json::from_str::<Value>(raw)? {
            Value::Object(map) => Ok(map),
            other => bail!("expected a JSON object, got {}", other),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_objects_only() {
        assert!(parse_object(None).unwrap().is_empty());
        let map = parse_object(Some(r#"{"region":"eu"}"#)).unwrap();
        assert_eq!(map["region"], "eu");
        assert!(parse_object(Some("[1,2]")).is_err());
        assert!(parse_object(Some("not json")).is_err());
    }
}
