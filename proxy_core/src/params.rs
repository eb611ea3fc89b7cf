//! Request parameters and their fingerprints.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const TEXT: &str = "text";
pub const TEXT_FILE: &str = "text_file";
pub const PROMPT_AUDIO: &str = "prompt_audio";
pub const PROMPT_TEXT: &str = "prompt_text";
pub const GENDER: &str = "gender";

/// Parameter names accepted when no allow-list is configured.
pub const DEFAULT_ALLOWED_PARAMS: &[&str] = &[
    PROMPT_AUDIO,
    PROMPT_TEXT,
    TEXT,
    TEXT_FILE,
    GENDER,
    "pitch",
    "speed",
    "emotion",
];

/// Number of digest bytes kept in a fingerprint (128 bits).
const FINGERPRINT_BYTES: usize = 16;

/// Normalized generation parameters, always iterated in sorted-key order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestParams(BTreeMap<String, String>);

impl RequestParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep only allow-listed, non-empty parameters. The first occurrence of
    /// a repeated name wins.
    pub fn from_query<S: AsRef<str>>(pairs: &[(String, String)], allowed: &[S]) -> Self {
        let mut params = Self::new();
        for (key, value) in pairs {
            if value.is_empty() || params.contains(key) {
                continue;
            }
            if allowed.iter().any(|name| name.as_ref() == key) {
                params.insert(key.clone(), value.clone());
            }
        }
        params
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Like `get`, but treats an empty value as absent.
    pub fn non_empty(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|v| !v.is_empty())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RequestParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Fixed-length digest identifying a parameter set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint of a normalized parameter set. Independent of the order in
    /// which the parameters were inserted.
    pub fn of(params: &RequestParams) -> Self {
        Self::digest(params.iter())
    }

    /// Fingerprint of raw, unfiltered query pairs. Pairs are reduced to the
    /// first value per name and sorted before hashing.
    pub fn of_pairs(pairs: &[(String, String)]) -> Self {
        let mut first: BTreeMap<&str, &str> = BTreeMap::new();
        for (key, value) in pairs {
            first.entry(key.as_str()).or_insert(value.as_str());
        }
        Self::digest(first.into_iter())
    }

    fn digest<'a>(entries: impl Iterator<Item = (&'a str, &'a str)>) -> Self {
        let mut hasher = Sha256::new();
        for (key, value) in entries {
            // Length prefixes keep ("ab", "c") and ("a", "bc") apart.
            hasher.update((key.len() as u64).to_le_bytes());
            hasher.update(key.as_bytes());
            hasher.update((value.len() as u64).to_le_bytes());
            hasher.update(value.as_bytes());
        }
        let digest = hasher.finalize();
        Self(hex::encode(&digest[..FINGERPRINT_BYTES]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::distributions::Alphanumeric;
    use rand::seq::SliceRandom;
    use rand::{thread_rng, Rng};
    use std::collections::HashSet;

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_fingerprint_ignores_insertion_order() {
        let mut a = RequestParams::new();
        a.insert("text", "hello");
        a.insert("gender", "female");
        a.insert("pitch", "3");

        let mut b = RequestParams::new();
        b.insert("pitch", "3");
        b.insert("text", "hello");
        b.insert("gender", "female");

        assert_eq!(Fingerprint::of(&a), Fingerprint::of(&b));
        assert_eq!(Fingerprint::of(&a).as_str().len(), 32);
    }

    #[test]
    fn test_raw_fingerprint_ignores_pair_order() {
        let mut raw = pairs(&[("text", "hi"), ("gender", "male"), ("_", "1"), ("speed", "2")]);
        let expected = Fingerprint::of_pairs(&raw);
        raw.reverse();
        assert_eq!(Fingerprint::of_pairs(&raw), expected);
    }

    #[test]
    fn test_fingerprint_changes_with_any_value() {
        let base: RequestParams = [("text", "hello"), ("gender", "male")].into_iter().collect();
        let other: RequestParams = [("text", "hello"), ("gender", "female")].into_iter().collect();
        assert_ne!(Fingerprint::of(&base), Fingerprint::of(&other));
    }

    #[test]
    fn test_fingerprint_is_not_fooled_by_shifted_boundaries() {
        let a: RequestParams = [("text", "ab"), ("textc", "")].into_iter().collect();
        let b: RequestParams = [("text", "a"), ("textc", "b")].into_iter().collect();
        assert_ne!(Fingerprint::of(&a), Fingerprint::of(&b));
    }

    #[test]
    fn test_no_collisions_across_random_parameter_sets() {
        let mut rng = thread_rng();
        let names = ["text", "gender", "pitch", "speed", "emotion", "prompt_audio"];
        let mut seen_params = HashSet::new();
        let mut seen_fingerprints = HashSet::new();

        while seen_params.len() < 10_000 {
            let mut params = RequestParams::new();
            let mut chosen = names.to_vec();
            chosen.shuffle(&mut rng);
            for name in chosen.iter().take(rng.gen_range(1..=names.len())) {
                let len = rng.gen_range(1..12);
                let value: String = (&mut rng).sample_iter(&Alphanumeric).take(len).map(char::from).collect();
                params.insert(*name, value);
            }
            let key: Vec<(String, String)> = params.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
            if seen_params.insert(key) {
                assert!(
                    seen_fingerprints.insert(Fingerprint::of(&params)),
                    "collision for {params:?}"
                );
            }
        }
    }

    #[test]
    fn test_from_query_filters_and_keeps_first_value() {
        let raw = pairs(&[
            ("text", "first"),
            ("text", "second"),
            ("gender", ""),
            ("callback", "x"),
            ("speed", "3"),
        ]);
        let params = RequestParams::from_query(&raw, DEFAULT_ALLOWED_PARAMS);
        assert_eq!(params.get("text"), Some("first"));
        assert!(!params.contains("gender"));
        assert!(!params.contains("callback"));
        assert_eq!(params.get("speed"), Some("3"));
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_params_serialize_as_plain_map() {
        let params: RequestParams = [("text", "hi"), ("gender", "male")].into_iter().collect();
        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(json, serde_json::json!({ "gender": "male", "text": "hi" }));
    }
}
