//! Authorization domains.
//!
//! A domain names the permission bundle a request needs. Domains are interned
//! in a process-wide registry keyed by scope, so every service that registers
//! the same scope shares one value.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, OnceLock};

/// A scope URI treated as an opaque permission identifier.
#[derive(Debug, Clone)]
pub struct AuthorizationDomain {
    service_name: Arc<str>,
    scope: Arc<str>,
}

fn registry() -> &'static Mutex<HashMap<Arc<str>, AuthorizationDomain>> {
    static REGISTRY: OnceLock<Mutex<HashMap<Arc<str>, AuthorizationDomain>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

impl AuthorizationDomain {
    /// Returns the registered domain for `scope`, registering it on first use.
    ///
    /// The service name of the first registration wins.
    pub fn register(service_name: &str, scope: &str) -> Self {
        let mut domains = match registry().lock() {
            Ok(domains) => domains,
            Err(poisoned) => poisoned.into_inner(),
        };
        domains
            .entry(Arc::from(scope))
            .or_insert_with(|| Self {
                service_name: Arc::from(service_name),
                scope: Arc::from(scope),
            })
            .clone()
    }

    /// Looks up a previously registered domain.
    pub fn lookup(scope: &str) -> Option<Self> {
        let domains = match registry().lock() {
            Ok(domains) => domains,
            Err(poisoned) => poisoned.into_inner(),
        };
        domains.get(scope).cloned()
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }
}

impl PartialEq for AuthorizationDomain {
    fn eq(&self, other: &Self) -> bool {
        self.scope == other.scope
    }
}

impl Eq for AuthorizationDomain {}

impl std::hash::Hash for AuthorizationDomain {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.scope.hash(state);
    }
}

impl fmt::Display for AuthorizationDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.service_name, self.scope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_is_interned_by_scope() {
        let first = AuthorizationDomain::register("cl", "https://example.com/test/calendar");
        let second = AuthorizationDomain::register("other", "https://example.com/test/calendar");
        assert_eq!(first, second);
        assert_eq!(second.service_name(), "cl");
        assert!(Arc::ptr_eq(&first.scope, &second.scope));
    }

    #[test]
    fn lookup_finds_registered_domains() {
        assert!(AuthorizationDomain::lookup("https://example.com/test/unregistered").is_none());
        AuthorizationDomain::register("lh2", "https://example.com/test/photos");
        let found = AuthorizationDomain::lookup("https://example.com/test/photos").unwrap();
        assert_eq!(found.service_name(), "lh2");
        assert_eq!(found.to_string(), "lh2 (https://example.com/test/photos)");
    }

    #[test]
    fn distinct_scopes_differ() {
        let a = AuthorizationDomain::register("a", "https://example.com/test/a");
        let b = AuthorizationDomain::register("a", "https://example.com/test/b");
        assert_ne!(a, b);
    }
}
