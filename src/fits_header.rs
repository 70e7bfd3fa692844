//! FITS-header store: an ordered keyword -> typed-value map shared between
//! the command thread (`fitsheader add/delete/clear`) and the exposure
//! engine (`write_to`).
//!
//! The header store is one of the "global mutable
//! singletons" that must become owned state behind a coordinator rather than
//! a module-level static; here it is a plain `struct` owned by
//! [`crate::instrument::Instrument`] and handed to callers for the duration
//! of one command, same discipline ci2's device handles use for their
//! mutexes.

use std::collections::HashMap;

use crate::error::{Error, Result};

pub const FITS_VALUE_STRING_MAX_LEN: usize = 70;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Str(String),
    /// A comment card (`COMMENT`/`HISTORY`-style free text, no value slot).
    Comment,
}

#[derive(Debug, Clone)]
pub struct Record {
    pub keyword: String,
    pub value: Value,
    pub comment: Option<String>,
    pub units: Option<String>,
}

/// Ordered map keyword -> [`Record`]. Insertion order is preserved; adding a
/// record whose keyword already exists replaces the value in place without
/// moving its position, and keeps the previous comment/units unless the
/// caller supplies new ones.
#[derive(Debug, Clone, Default)]
pub struct FitsHeaderStore {
    order: Vec<String>,
    records: HashMap<String, Record>,
}

impl FitsHeaderStore {
    pub fn new() -> Self {
        FitsHeaderStore {
            order: Vec::new(),
            records: HashMap::new(),
        }
    }

    fn upsert(&mut self, keyword: &str, value: Value, comment: Option<String>, units: Option<String>) {
        let key = keyword.to_uppercase();
        if let Some(existing) = self.records.get_mut(&key) {
            existing.value = value;
            if comment.is_some() {
                existing.comment = comment;
            }
            if units.is_some() {
                existing.units = units;
            }
        } else {
            self.order.push(key.clone());
            self.records.insert(
                key.clone(),
                Record {
                    keyword: key,
                    value,
                    comment,
                    units,
                },
            );
        }
    }

    fn truncate_string(value: String) -> String {
        if value.chars().count() > FITS_VALUE_STRING_MAX_LEN {
            value.chars().take(FITS_VALUE_STRING_MAX_LEN).collect()
        } else {
            value
        }
    }

    pub fn add_bool(&mut self, keyword: &str, value: bool, comment: Option<&str>) {
        self.upsert(keyword, Value::Boolean(value), comment.map(str::to_string), None);
    }

    pub fn add_int(&mut self, keyword: &str, value: i64, comment: Option<&str>) {
        self.upsert(keyword, Value::Integer(value), comment.map(str::to_string), None);
    }

    pub fn add_float(&mut self, keyword: &str, value: f64, comment: Option<&str>) {
        self.upsert(keyword, Value::Float(value), comment.map(str::to_string), None);
    }

    pub fn add_string(&mut self, keyword: &str, value: &str, comment: Option<&str>) {
        self.upsert(
            keyword,
            Value::Str(Self::truncate_string(value.to_string())),
            comment.map(str::to_string),
            None,
        );
    }

    pub fn add_comment(&mut self, keyword: &str, text: &str) {
        self.upsert(keyword, Value::Comment, Some(text.to_string()), None);
    }

    pub fn add_units(&mut self, keyword: &str, units: &str) -> Result<()> {
        let key = keyword.to_uppercase();
        match self.records.get_mut(&key) {
            Some(record) => {
                record.units = Some(units.to_string());
                Ok(())
            }
            None => Err(Error::ArgumentRange(format!(
                "cannot set units on unknown keyword '{key}'"
            ))),
        }
    }

    pub fn delete(&mut self, keyword: &str) {
        let key = keyword.to_uppercase();
        if self.records.remove(&key).is_some() {
            self.order.retain(|k| k != &key);
        }
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.records.clear();
    }

    pub fn get(&self, keyword: &str) -> Option<&Record> {
        self.records.get(&keyword.to_uppercase())
    }

    /// Records in insertion order, for `write_to` or for cloning into a
    /// per-multrun base snapshot.
    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.order.iter().filter_map(|k| self.records.get(k))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_on_existing_key_replaces_value_keeps_position() {
        let mut store = FitsHeaderStore::new();
        store.add_string("A", "first", None);
        store.add_string("K", "v1", None);
        store.add_string("B", "second", None);
        store.add_string("k", "v2", None); // lowercase key, same keyword

        let order: Vec<&str> = store.iter().map(|r| r.keyword.as_str()).collect();
        assert_eq!(order, vec!["A", "K", "B"]);
        match &store.get("K").unwrap().value {
            Value::Str(v) => assert_eq!(v, "v2"),
            other => panic!("unexpected value: {other:?}"),
        }
    }

    #[test]
    fn keywords_are_uppercased() {
        let mut store = FitsHeaderStore::new();
        store.add_int("obsnote", 1, None);
        assert!(store.get("OBSNOTE").is_some());
    }

    #[test]
    fn long_strings_are_truncated() {
        let mut store = FitsHeaderStore::new();
        let long = "x".repeat(200);
        store.add_string("LONGVAL", &long, None);
        match &store.get("LONGVAL").unwrap().value {
            Value::Str(v) => assert_eq!(v.len(), FITS_VALUE_STRING_MAX_LEN),
            other => panic!("unexpected value: {other:?}"),
        }
    }

    #[test]
    fn delete_and_clear() {
        let mut store = FitsHeaderStore::new();
        store.add_int("A", 1, None);
        store.add_int("B", 2, None);
        store.delete("A");
        assert!(store.get("A").is_none());
        assert_eq!(store.len(), 1);
        store.clear();
        assert!(store.is_empty());
    }

    #[test]
    fn comment_preserved_unless_overridden() {
        let mut store = FitsHeaderStore::new();
        store.add_int("K", 1, Some("first comment"));
        store.add_int("K", 2, None);
        assert_eq!(store.get("K").unwrap().comment.as_deref(), Some("first comment"));
        store.add_int("K", 3, Some("second comment"));
        assert_eq!(store.get("K").unwrap().comment.as_deref(), Some("second comment"));
    }
}
