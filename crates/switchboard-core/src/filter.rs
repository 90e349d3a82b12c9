//! Client filters for fan-out sends.
//!
//! Filters only see a client's ID and attributes, never the registry.

use crate::attributes::Attributes;
use std::fmt;
use std::sync::Arc;
use switchboard_transport::ClientId;

type Predicate = dyn Fn(&ClientId, &Attributes) -> bool + Send + Sync;

/// A predicate over `(client id, attributes)`.
#[derive(Clone)]
pub struct Filter {
    predicate: Arc<Predicate>,
}

impl Filter {
    /// Build a filter from a closure.
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&ClientId, &Attributes) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Arc::new(predicate),
        }
    }

    /// Match every client.
    #[must_use]
    pub fn all() -> Self {
        Self::new(|_, _| true)
    }

    /// Match clients whose boolean attribute `key` is `true`.
    #[must_use]
    pub fn flag(key: impl Into<String>) -> Self {
        let key = key.into();
        Self::new(move |_, attrs| attrs.is_flag_set(&key))
    }

    /// Match clients whose string attribute `key` equals `value`.
    #[must_use]
    pub fn matching(key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let value = value.into();
        Self::new(move |_, attrs| attrs.has_match(&key, &value))
    }

    /// Match a single client by ID.
    #[must_use]
    pub fn client(id: impl Into<ClientId>) -> Self {
        let id = id.into();
        Self::new(move |client_id, _| *client_id == id)
    }

    /// Evaluate the filter.
    #[must_use]
    pub fn matches(&self, id: &ClientId, attributes: &Attributes) -> bool {
        (self.predicate)(id, attributes)
    }
}

impl Default for Filter {
    fn default() -> Self {
        Self::all()
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Filter(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs() -> Attributes {
        Attributes::new()
            .set_string("room", "lobby")
            .set_bool("admin", true)
    }

    #[test]
    fn test_builtin_filters() {
        let id = ClientId::new("c1");
        let other = ClientId::new("c2");

        assert!(Filter::all().matches(&id, &Attributes::new()));
        assert!(Filter::flag("admin").matches(&id, &attrs()));
        assert!(!Filter::flag("room").matches(&id, &attrs()));
        assert!(Filter::matching("room", "lobby").matches(&id, &attrs()));
        assert!(!Filter::matching("room", "attic").matches(&id, &attrs()));
        assert!(Filter::client("c1").matches(&id, &attrs()));
        assert!(!Filter::client("c1").matches(&other, &attrs()));
    }

    #[test]
    fn test_custom_filter() {
        let filter = Filter::new(|id, attrs| id.as_str().ends_with('2') && attrs.is_empty());
        assert!(filter.matches(&ClientId::new("c2"), &Attributes::new()));
        assert!(!filter.matches(&ClientId::new("c2"), &attrs()));
    }
}
