//! Event routing: maps event types to the queries that consume them

use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Event router that maps event types to query indices.
///
/// Uses `Arc<[usize]>` internally so the hot path clones a route list with
/// one atomic increment. Indices within a route stay in registration order.
#[derive(Debug, Default)]
pub(crate) struct EventRouter {
    routes: FxHashMap<String, Arc<[usize]>>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a query to receive events of a given type.
    pub fn add_route(&mut self, event_type: &str, query: usize) {
        let existing = self.routes.remove(event_type);
        let mut queries: Vec<usize> = existing
            .map(|arc| arc.iter().copied().collect())
            .unwrap_or_default();
        if !queries.contains(&query) {
            queries.push(query);
            queries.sort_unstable();
        }
        self.routes.insert(event_type.to_string(), queries.into());
    }

    /// Clone the route list (O(1) atomic increment).
    /// Returns an empty slice if no query consumes the event type.
    pub fn routes(&self, event_type: &str) -> Arc<[usize]> {
        self.routes
            .get(event_type)
            .cloned()
            .unwrap_or_else(|| Arc::from([]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_single_route() {
        let mut router = EventRouter::new();
        router.add_route("Stock", 0);

        let routes = router.routes("Stock");
        assert_eq!(&*routes, &[0]);
    }

    #[test]
    fn test_routes_keep_registration_order() {
        let mut router = EventRouter::new();
        router.add_route("Stock", 2);
        router.add_route("Stock", 0);
        router.add_route("Growth", 1);

        assert_eq!(&*router.routes("Stock"), &[0, 2]);
        assert_eq!(&*router.routes("Growth"), &[1]);
    }

    #[test]
    fn test_no_duplicate_routes() {
        let mut router = EventRouter::new();
        router.add_route("Stock", 0);
        router.add_route("Stock", 0);

        assert_eq!(router.routes("Stock").len(), 1);
    }

    #[test]
    fn test_unknown_type_routes_nowhere() {
        let router = EventRouter::new();
        assert!(router.routes("Unknown").is_empty());
    }
}
