use indexmap::IndexMap;

use super::value::Value;

/// Scalar key of a container entry.
///
/// Integral doubles collapse to `Int`, so `a[1]` and `a[1.0]` address the
/// same entry. Non-integral doubles are keyed by their bit pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    Int(i64),
    Bool(bool),
    Char(char),
    Str(String),
    Double(u64),
}

impl Key {
    /// Converts a value into a key; null, containers and host objects are not keys.
    pub fn from_value(value: &Value) -> Option<Key> {
        match value {
            Value::Int(n) => Some(Key::Int(*n)),
            Value::Bool(b) => Some(Key::Bool(*b)),
            Value::Char(c) => Some(Key::Char(*c)),
            Value::Str(s) => Some(Key::Str(s.clone())),
            Value::Float(x) => Some(Key::from_f64(*x as f64)),
            Value::Double(x) => Some(Key::from_f64(*x)),
            Value::Null | Value::Container(_) | Value::Foreign(_) => None,
        }
    }

    fn from_f64(x: f64) -> Key {
        if x.fract() == 0.0 && x >= i64::MIN as f64 && x <= i64::MAX as f64 {
            Key::Int(x as i64)
        } else {
            Key::Double(x.to_bits())
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Key::Int(n) => Value::Int(*n),
            Key::Bool(b) => Value::Bool(*b),
            Key::Char(c) => Value::Char(*c),
            Key::Str(s) => Value::Str(s.clone()),
            Key::Double(bits) => Value::Double(f64::from_bits(*bits)),
        }
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_value())
    }
}

/// Ordered map backing the container value.
#[derive(Debug, Default, Clone)]
pub struct Container {
    entries: IndexMap<Key, Value>,
}

impl Container {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &Key) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &Key) -> bool {
        self.entries.contains_key(key)
    }

    /// Inserts or overwrites; a new key goes to the end of the iteration order.
    pub fn insert(&mut self, key: Key, value: Value) {
        self.entries.insert(key, value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Key, &Value)> {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.entries.keys()
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.entries.values()
    }

    /// Appends under the key following the largest non-negative integer key
    /// and returns that key. `None` when no key follows `i64::MAX`.
    pub fn append(&mut self, value: Value) -> Option<Key> {
        let largest = self
            .entries
            .keys()
            .filter_map(|k| match k {
                Key::Int(n) if *n >= 0 => Some(*n),
                _ => None,
            })
            .max();
        let next = match largest {
            Some(n) => n.checked_add(1)?,
            None => 0,
        };
        self.entries.insert(Key::Int(next), value);
        Some(Key::Int(next))
    }

    /// Removes the first entry whose value equals `value`. Order is kept.
    pub fn remove_value(&mut self, value: &Value) -> bool {
        let position = self.entries.values().position(|v| v.loose_eq(value));
        match position {
            Some(index) => {
                self.entries.shift_remove_index(index);
                true
            }
            None => false,
        }
    }

    /// Key following `current` in iteration order, or the first key when
    /// `current` is not a present key. `None` once exhausted.
    pub fn next_key(&self, current: &Value) -> Option<Key> {
        let index = Key::from_value(current).and_then(|k| self.entries.get_index_of(&k));
        match index {
            Some(i) => self.entries.get_index(i + 1).map(|(k, _)| k.clone()),
            None => self.entries.get_index(0).map(|(k, _)| k.clone()),
        }
    }

    /// Values in key order when the keys are exactly `0..len`.
    pub fn as_array(&self) -> Option<Vec<&Value>> {
        let len = self.entries.len();
        let mut slots: Vec<Option<&Value>> = vec![None; len];
        for (key, value) in &self.entries {
            match key {
                Key::Int(n) if *n >= 0 && (*n as usize) < len => slots[*n as usize] = Some(value),
                _ => return None,
            }
        }
        slots.into_iter().collect()
    }
}
