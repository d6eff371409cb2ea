//! Thread-safe key-value store shared across pipeline stages, ported from
//! `attractor.context`. The original uses a Python `RLock`; nothing here
//! ever locks a `Context` while already holding its own lock, so a plain
//! `Mutex` gives the same effective guarantee without needing a
//! re-entrant primitive.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct Inner {
    values: HashMap<String, Value>,
    logs: Vec<String>,
}

/// Cheaply cloneable handle; every clone shares the same underlying
/// store. Use `Context::clone_deep` to get an independent copy for a
/// parallel branch.
#[derive(Clone)]
pub struct Context {
    inner: Arc<Mutex<Inner>>,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    pub fn new() -> Self {
        Context { inner: Arc::new(Mutex::new(Inner::default())) }
    }

    pub fn from_values(values: HashMap<String, Value>, logs: Vec<String>) -> Self {
        Context { inner: Arc::new(Mutex::new(Inner { values, logs })) }
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.inner.lock().unwrap().values.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.lock().unwrap().values.get(key).cloned()
    }

    pub fn get_string(&self, key: &str) -> String {
        match self.get(key) {
            None => String::new(),
            Some(Value::String(s)) => s,
            Some(v) => v.to_string(),
        }
    }

    pub fn append_log(&self, entry: impl Into<String>) {
        self.inner.lock().unwrap().logs.push(entry.into());
    }

    /// Independent copy of the current values; mutations to the
    /// original (or the snapshot) do not affect the other.
    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.inner.lock().unwrap().values.clone()
    }

    /// Produces a fully independent `Context` — a new lock, a deep copy
    /// of values and logs — for a parallel branch.
    pub fn clone_deep(&self) -> Context {
        let guard = self.inner.lock().unwrap();
        Context::from_values(guard.values.clone(), guard.logs.clone())
    }

    pub fn apply_updates(&self, updates: HashMap<String, Value>) {
        self.inner.lock().unwrap().values.extend(updates);
    }

    pub fn logs(&self) -> Vec<String> {
        self.inner.lock().unwrap().logs.clone()
    }

    pub fn values(&self) -> HashMap<String, Value> {
        self.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_deep_is_independent() {
        let ctx = Context::new();
        ctx.set("a", Value::from(1));
        let branch = ctx.clone_deep();
        branch.set("a", Value::from(2));
        assert_eq!(ctx.get("a"), Some(Value::from(1)));
        assert_eq!(branch.get("a"), Some(Value::from(2)));
    }

    #[test]
    fn shallow_clone_shares_store() {
        let ctx = Context::new();
        let handle = ctx.clone();
        handle.set("shared", Value::from(true));
        assert_eq!(ctx.get("shared"), Some(Value::from(true)));
    }

    #[test]
    fn apply_updates_merges_into_existing_values() {
        let ctx = Context::new();
        ctx.set("x", Value::from(1));
        let mut updates = HashMap::new();
        updates.insert("y".to_string(), Value::from(2));
        ctx.apply_updates(updates);
        assert_eq!(ctx.get("x"), Some(Value::from(1)));
        assert_eq!(ctx.get("y"), Some(Value::from(2)));
    }
}
