use std::collections::BTreeMap;

use corral_core::{Error, Result};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;

/// Value under `key`, from `data` or, for objects not yet round-tripped
/// through an API server, `stringData`.
pub(crate) fn value(secret: &Secret, key: &str) -> Option<String> {
    secret
        .data
        .as_ref()
        .and_then(|d| d.get(key))
        .map(|b| String::from_utf8_lossy(&b.0).into_owned())
        .or_else(|| secret.string_data.as_ref().and_then(|d| d.get(key)).cloned())
        .filter(|v| !v.is_empty())
}

pub(crate) fn required(secret: &Secret, section: &'static str, key: &'static str) -> Result<String> {
    value(secret, key).ok_or(Error::IncompleteConfig { section, field: key })
}

pub(crate) fn data(pairs: impl IntoIterator<Item = (&'static str, String)>) -> BTreeMap<String, ByteString> {
    pairs.into_iter().map(|(k, v)| (k.to_string(), ByteString(v.into_bytes()))).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_wins_over_string_data() {
        let s = Secret {
            data: Some(data([("a", "from-data".to_string())])),
            string_data: Some([("a".to_string(), "from-string".to_string()), ("b".to_string(), "b".to_string())].into()),
            ..Default::default()
        };
        assert_eq!(value(&s, "a").as_deref(), Some("from-data"));
        assert_eq!(value(&s, "b").as_deref(), Some("b"));
        assert!(matches!(required(&s, "logging", "c"), Err(Error::IncompleteConfig { field: "c", .. })));
    }
}
