//! Hybrid array + hash table.
//!
//! Dense 1-based integer keys live in a vector; everything else lives in an
//! insertion-ordered hash part so that `next`-style traversal is stateless
//! and O(1) per step.

use std::rc::Rc;

use indexmap::IndexMap;

use crate::value::{TableRef, Value};

/// A normalized hash-part key.
///
/// Integral floats collapse onto integer keys so `t[2]` and `t[2.0]` address
/// the same slot; heap objects key by identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TableKey {
    Boolean(bool),
    Integer(i64),
    /// Non-integral float, stored as raw bits
    Float(u64),
    Str(Rc<str>),
    /// Table/function/userdata identity
    Obj(usize),
    /// Light userdata handle
    Light(u64),
}

/// Normalize a value into a table key.
///
/// `nil` and NaN keys are rejected, as in the reference language.
pub fn normalize_key(v: &Value) -> Result<TableKey, &'static str> {
    match v {
        Value::Nil => Err("table index is nil"),
        Value::Boolean(b) => Ok(TableKey::Boolean(*b)),
        Value::Number(n) => {
            if n.is_nan() {
                Err("table index is NaN")
            } else if n.fract() == 0.0 && *n >= i64::MIN as f64 && *n <= i64::MAX as f64 {
                Ok(TableKey::Integer(*n as i64))
            } else {
                Ok(TableKey::Float(n.to_bits()))
            }
        }
        Value::Str(s) => Ok(TableKey::Str(s.clone())),
        Value::Table(t) => Ok(TableKey::Obj(Rc::as_ptr(t) as *const () as usize)),
        Value::Function(f) => Ok(TableKey::Obj(Rc::as_ptr(f) as *const () as usize)),
        Value::UserData(u) => Ok(TableKey::Obj(Rc::as_ptr(u) as *const () as usize)),
        Value::LightUserData(h) => Ok(TableKey::Light(*h)),
    }
}

/// A table: array part, hash part, optional metatable.
pub struct Table {
    /// Array part; `array[0]` holds key 1
    array: Vec<Value>,
    /// Hash part; stores the original key value for traversal
    hash: IndexMap<TableKey, (Value, Value)>,
    /// Metatable, if set
    pub meta: Option<TableRef>,
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Entries may reference this table again; print counts only
        f.debug_struct("Table")
            .field("array_len", &self.array.len())
            .field("hash_len", &self.hash.len())
            .field("has_meta", &self.meta.is_some())
            .finish()
    }
}

impl Table {
    /// Create a table with capacity hints for the array and hash parts.
    pub fn new(array_hint: usize, hash_hint: usize) -> Self {
        Table {
            array: Vec::with_capacity(array_hint),
            hash: IndexMap::with_capacity(hash_hint),
            meta: None,
        }
    }

    /// Raw get, no metamethods. Invalid keys read as `nil`.
    pub fn raw_get(&self, key: &Value) -> Value {
        if let Value::Number(n) = key {
            if n.fract() == 0.0 && *n >= 1.0 && *n <= self.array.len() as f64 {
                return self.array[*n as usize - 1].clone();
            }
        }
        match normalize_key(key) {
            Ok(k) => self
                .hash
                .get(&k)
                .map(|(_, v)| v.clone())
                .unwrap_or(Value::Nil),
            Err(_) => Value::Nil,
        }
    }

    /// Raw set, no metamethods.
    pub fn raw_set(&mut self, key: Value, value: Value) -> Result<(), &'static str> {
        let norm = normalize_key(&key)?;
        if let TableKey::Integer(i) = norm {
            if i >= 1 {
                let idx = (i - 1) as usize;
                if idx < self.array.len() {
                    self.array[idx] = value;
                    // Assigning nil to the tail shrinks the border
                    while matches!(self.array.last(), Some(Value::Nil)) {
                        self.array.pop();
                    }
                    return Ok(());
                }
                if idx == self.array.len() {
                    if !value.is_nil() {
                        self.array.push(value);
                        self.absorb_from_hash();
                    }
                    return Ok(());
                }
            }
        }
        if value.is_nil() {
            self.hash.shift_remove(&norm);
        } else {
            self.hash.insert(norm, (key, value));
        }
        Ok(())
    }

    /// Pull keys that became contiguous with the array part out of the hash
    /// part, keeping the border meaningful after out-of-order inserts.
    fn absorb_from_hash(&mut self) {
        loop {
            let next = TableKey::Integer(self.array.len() as i64 + 1);
            match self.hash.shift_remove(&next) {
                Some((_, v)) => self.array.push(v),
                None => break,
            }
        }
    }

    /// Border length (`#t`): the array part length, or a probe of the hash
    /// part when the array is empty.
    pub fn len(&self) -> usize {
        if !self.array.is_empty() {
            return self.array.len();
        }
        let mut n = 0usize;
        while self
            .hash
            .contains_key(&TableKey::Integer(n as i64 + 1))
        {
            n += 1;
        }
        n
    }

    pub fn is_empty(&self) -> bool {
        self.array.is_empty() && self.hash.is_empty()
    }

    /// Number of entries across both parts (not a language concept; used for
    /// capacity pre-sizing and memory accounting).
    pub fn entry_count(&self) -> usize {
        self.array.iter().filter(|v| !v.is_nil()).count() + self.hash.len()
    }

    /// Stateless traversal step: given the previous key (`None` to start),
    /// produce the next key/value pair, or `None` when exhausted.
    ///
    /// Passing a key that is not present in the table is an error, matching
    /// the `invalid key to 'next'` behavior of the reference language.
    pub fn next(&self, prev: Option<&Value>) -> Result<Option<(Value, Value)>, &'static str> {
        let from_array_pos = match prev {
            None => 0,
            Some(Value::Number(n))
                if n.fract() == 0.0 && *n >= 1.0 && *n <= self.array.len() as f64 =>
            {
                *n as usize
            }
            Some(other) => {
                // Key belongs to the hash part
                let norm = normalize_key(other).map_err(|_| "invalid key to 'next'")?;
                let pos = self
                    .hash
                    .get_index_of(&norm)
                    .ok_or("invalid key to 'next'")?;
                return Ok(self.hash_entry_at(pos + 1));
            }
        };
        // Continue through the array part, skipping holes
        for i in from_array_pos..self.array.len() {
            if !self.array[i].is_nil() {
                return Ok(Some((
                    Value::Number((i + 1) as f64),
                    self.array[i].clone(),
                )));
            }
        }
        Ok(self.hash_entry_at(0))
    }

    fn hash_entry_at(&self, pos: usize) -> Option<(Value, Value)> {
        self.hash
            .get_index(pos)
            .map(|(_, (k, v))| (k.clone(), v.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn num(n: f64) -> Value {
        Value::Number(n)
    }

    #[test]
    fn test_array_part_roundtrip() {
        let mut t = Table::new(4, 0);
        for i in 1..=4 {
            t.raw_set(num(i as f64), Value::str(format!("v{i}"))).unwrap();
        }
        assert_eq!(t.len(), 4);
        assert_eq!(t.raw_get(&num(2.0)), Value::str("v2"));
        assert_eq!(t.raw_get(&num(9.0)), Value::Nil);
    }

    #[test]
    fn test_integral_float_collapses_to_integer_key() {
        let mut t = Table::new(0, 0);
        t.raw_set(num(7.0), Value::str("x")).unwrap();
        assert_eq!(t.raw_get(&Value::Number(7.0)), Value::str("x"));
    }

    #[test]
    fn test_nil_and_nan_keys_rejected() {
        let mut t = Table::new(0, 0);
        assert!(t.raw_set(Value::Nil, num(1.0)).is_err());
        assert!(t.raw_set(num(f64::NAN), num(1.0)).is_err());
    }

    #[test]
    fn test_nil_assignment_removes() {
        let mut t = Table::new(0, 0);
        t.raw_set(Value::str("k"), num(1.0)).unwrap();
        t.raw_set(Value::str("k"), Value::Nil).unwrap();
        assert_eq!(t.raw_get(&Value::str("k")), Value::Nil);
        assert!(t.is_empty());
    }

    #[test]
    fn test_absorb_hash_into_array() {
        let mut t = Table::new(0, 0);
        t.raw_set(num(2.0), Value::str("b")).unwrap();
        t.raw_set(num(1.0), Value::str("a")).unwrap();
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn test_next_traverses_everything_once() {
        let mut t = Table::new(0, 0);
        t.raw_set(num(1.0), Value::str("one")).unwrap();
        t.raw_set(Value::str("k1"), num(10.0)).unwrap();
        t.raw_set(Value::str("k2"), num(20.0)).unwrap();

        let mut seen = Vec::new();
        let mut prev: Option<Value> = None;
        while let Some((k, v)) = t.next(prev.as_ref()).unwrap() {
            seen.push((k.clone(), v));
            prev = Some(k);
        }
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn test_next_invalid_key() {
        let t = Table::new(0, 0);
        assert!(t.next(Some(&Value::str("missing"))).is_err());
    }
}
