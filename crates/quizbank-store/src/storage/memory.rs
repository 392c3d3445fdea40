//! In-memory key-value store using DashMap (stands in for Redis)

use super::kv::CappedInsert;
use dashmap::DashMap;
use std::sync::{Arc, Mutex};

/// String keys to string values, with Redis-style glob scans.
#[derive(Clone, Default)]
pub struct MemoryStore {
    data: Arc<DashMap<String, String>>,
    // Held across the count and the write of a capped insert.
    capped: Arc<Mutex<()>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a value
    pub fn get(&self, key: &str) -> Option<String> {
        self.data.get(key).map(|entry| entry.value().clone())
    }

    /// Set a value, replacing any previous one
    pub fn set(&self, key: String, value: String) {
        self.data.insert(key, value);
    }

    /// Set only if the key is absent. Returns whether the value was written.
    pub fn set_nx(&self, key: String, value: String) -> bool {
        match self.data.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(value);
                true
            }
        }
    }

    /// Set-if-absent that refuses once `limit` keys already match `pattern`.
    pub fn insert_capped(
        &self,
        key: String,
        value: String,
        pattern: &str,
        limit: usize,
    ) -> CappedInsert {
        let _guard = self
            .capped
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if self.data.contains_key(&key) {
            return CappedInsert::Exists;
        }
        let held = self
            .data
            .iter()
            .filter(|entry| glob_match(pattern, entry.key()))
            .count();
        if held >= limit {
            return CappedInsert::Full;
        }
        if self.set_nx(key, value) {
            CappedInsert::Inserted
        } else {
            CappedInsert::Exists
        }
    }

    /// Delete a key. Returns whether it existed.
    pub fn delete(&self, key: &str) -> bool {
        self.data.remove(key).is_some()
    }

    /// Keys matching a glob pattern, sorted.
    pub fn scan(&self, pattern: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .data
            .iter()
            .filter(|entry| glob_match(pattern, entry.key()))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Redis `MATCH` semantics: `*`, `?`, `[abc]`, `[^a-z]` and `\` escapes.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    // Position of the last `*` and the text index it currently absorbs up to.
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() {
            if p[pi] == '*' {
                star = Some((pi, ti));
                pi += 1;
                continue;
            }
            let (len, matched) = match_token(&p[pi..], t[ti]);
            if matched {
                pi += len;
                ti += 1;
                continue;
            }
        }
        match star {
            Some((sp, st)) => {
                pi = sp + 1;
                ti = st + 1;
                star = Some((sp, st + 1));
            }
            None => return false,
        }
    }
    p[pi..].iter().all(|&c| c == '*')
}

/// Match the token at the start of `p` against `c`. Returns the token length.
fn match_token(p: &[char], c: char) -> (usize, bool) {
    match p[0] {
        '?' => (1, true),
        '\\' if p.len() > 1 => (2, p[1] == c),
        '[' => match p.iter().skip(1).position(|&x| x == ']') {
            Some(offset) => {
                let close = offset + 1;
                let mut class = &p[1..close];
                let negate = class.first() == Some(&'^');
                if negate {
                    class = &class[1..];
                }
                let mut hit = false;
                let mut i = 0;
                while i < class.len() {
                    if i + 2 < class.len() && class[i + 1] == '-' {
                        hit |= class[i] <= c && c <= class[i + 2];
                        i += 3;
                    } else {
                        hit |= class[i] == c;
                        i += 1;
                    }
                }
                (close + 1, hit != negate)
            }
            None => (1, c == '['),
        },
        other => (1, other == c),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_operations() {
        let store = MemoryStore::new();

        store.set("key1".to_string(), "a".to_string());
        assert_eq!(store.get("key1"), Some("a".to_string()));
        assert_eq!(store.get("nonexistent"), None);

        assert!(!store.set_nx("key1".to_string(), "b".to_string()));
        assert_eq!(store.get("key1"), Some("a".to_string()));
        assert!(store.set_nx("key2".to_string(), "b".to_string()));

        assert!(store.delete("key1"));
        assert!(!store.delete("key1"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_insert_capped() {
        let store = MemoryStore::new();
        let put = |key: &str| store.insert_capped(key.to_string(), "{}".to_string(), "P:1:*", 2);

        assert_eq!(put("P:1:a"), CappedInsert::Inserted);
        assert_eq!(put("P:1:a"), CappedInsert::Exists);
        assert_eq!(put("P:1:b"), CappedInsert::Inserted);
        assert_eq!(put("P:1:c"), CappedInsert::Full);
        assert_eq!(
            store.insert_capped("P:2:a".into(), "{}".into(), "P:2:*", 2),
            CappedInsert::Inserted
        );
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_scan_is_sorted_and_filtered() {
        let store = MemoryStore::new();
        for key in ["Problem:global:2", "Problem:global:1", "Problem:5:1", "Quiz:global:1"] {
            store.set(key.to_string(), "{}".to_string());
        }
        assert_eq!(
            store.scan("Problem:global:*"),
            vec!["Problem:global:1", "Problem:global:2"]
        );
        assert_eq!(store.scan("*:1").len(), 3);
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("*", ""));
        assert!(glob_match("Problem:*:*", "Problem:global:12"));
        assert!(!glob_match("Problem:*:*", "Quiz:global:12"));
        assert!(glob_match("h?llo", "hello"));
        assert!(glob_match("h[ae]llo", "hallo"));
        assert!(!glob_match("h[^e]llo", "hello"));
        assert!(glob_match("h[a-c]llo", "hbllo"));
        assert!(glob_match(r"a\*b", "a*b"));
        assert!(!glob_match(r"a\*b", "axb"));
        assert!(glob_match("*a*b", "xxaxxb"));
        assert!(!glob_match("*a*b", "xxaxxc"));
    }
}
