//! Default context carrier threaded through every step of a run.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

/// Per-run context handed to every step.
///
/// Stores values of any `Send + Sync` type under string keys, retrieved by
/// downcasting, plus plain string metadata such as request or trace ids.
/// Tasks that need a different carrier pick their own `Task::Context` type;
/// this one is what [`Runner::new`](crate::Runner::new) is built for.
///
/// # Examples
///
/// ```
/// use taskflow::Context;
///
/// let mut ctx = Context::new();
/// ctx.insert("attempt", 1u32);
/// ctx.set_metadata("request_id", "req-42".to_string());
///
/// assert_eq!(ctx.get::<u32>("attempt"), Some(&1));
/// // Wrong type returns None
/// assert_eq!(ctx.get::<String>("attempt"), None);
/// assert_eq!(ctx.get_metadata("request_id").map(String::as_str), Some("req-42"));
/// ```
pub struct Context {
    values: HashMap<String, Box<dyn Any + Send + Sync>>,
    metadata: HashMap<String, String>,
    started_at: Instant,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("values", &self.values.keys().collect::<Vec<_>>())
            .field("metadata", &self.metadata)
            .field("started_at", &self.started_at)
            .finish()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    pub fn new() -> Self {
        Self {
            values: HashMap::new(),
            metadata: HashMap::new(),
            started_at: Instant::now(),
        }
    }

    /// Inserts a value, replacing any previous value under `key`.
    pub fn insert<V: Any + Send + Sync>(&mut self, key: impl Into<String>, value: V) {
        self.values.insert(key.into(), Box::new(value));
    }

    /// Returns `None` if the key is missing or holds another type.
    pub fn get<V: Any>(&self, key: &str) -> Option<&V> {
        self.values.get(key).and_then(|v| v.downcast_ref::<V>())
    }

    pub fn get_mut<V: Any>(&mut self, key: &str) -> Option<&mut V> {
        self.values.get_mut(key).and_then(|v| v.downcast_mut::<V>())
    }

    pub fn remove<V: Any>(&mut self, key: &str) -> Option<V> {
        self.values
            .remove(key)
            .and_then(|v| v.downcast::<V>().ok())
            .map(|b| *b)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn set_metadata(&mut self, key: &str, value: String) {
        self.metadata.insert(key.to_string(), value);
    }

    pub fn get_metadata(&self, key: &str) -> Option<&String> {
        self.metadata.get(key)
    }

    /// Time since the context was created.
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}
