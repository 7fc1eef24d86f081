//! Host-object identity registry.
//!
//! The only mechanism by which a host object crosses into foreign memory: a
//! monotonically issued 64-bit handle stands in for the object inside
//! userdata cells, and the registry resolves handles back. Registration is
//! idempotent per object (by `Arc` pointer identity), handles are never
//! reused, and the registry holds strong references, so a registered object
//! lives at least as long as its registry.
//!
//! The registry is shared across VM instances on different threads, so both
//! maps are concurrent and the counter is atomic. It is an explicit,
//! constructible object (tests build a fresh one); `global()` is the
//! process-wide default for convenience call sites.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;

use crate::value::HostObject;

/// Opaque identity of a registered host object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(u64);

impl Handle {
    /// The raw handle value stored in userdata cells.
    pub fn raw(self) -> u64 {
        self.0
    }

    /// Reconstruct a handle from a raw value (e.g. one read back out of a
    /// userdata cell). Resolving a handle that was never issued yields
    /// nothing, never an error.
    pub fn from_raw(raw: u64) -> Handle {
        Handle(raw)
    }
}

impl std::fmt::Display for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Bidirectional handle ↔ host object mapping.
pub struct IdentityRegistry {
    next: AtomicU64,
    by_handle: DashMap<u64, HostObject>,
    by_identity: DashMap<usize, u64>,
}

impl IdentityRegistry {
    pub fn new() -> Self {
        IdentityRegistry {
            // Handle 0 is never issued, so a zeroed cell resolves to nothing
            next: AtomicU64::new(1),
            by_handle: DashMap::new(),
            by_identity: DashMap::new(),
        }
    }

    /// The process-wide default registry.
    pub fn global() -> &'static Arc<IdentityRegistry> {
        static GLOBAL: Lazy<Arc<IdentityRegistry>> =
            Lazy::new(|| Arc::new(IdentityRegistry::new()));
        &GLOBAL
    }

    /// Register a host object, returning its handle. Registering the same
    /// object (same `Arc` allocation) again returns the same handle.
    pub fn register(&self, obj: &HostObject) -> Handle {
        let identity = Arc::as_ptr(obj) as *const () as usize;
        let id = *self.by_identity.entry(identity).or_insert_with(|| {
            let id = self.next.fetch_add(1, Ordering::Relaxed);
            self.by_handle.insert(id, Arc::clone(obj));
            id
        });
        Handle(id)
    }

    /// Resolve a handle back to its host object. Unknown handles yield
    /// `None`; a script may hold a stale handle and that must degrade
    /// gracefully.
    pub fn resolve(&self, handle: Handle) -> Option<HostObject> {
        self.by_handle.get(&handle.0).map(|e| Arc::clone(e.value()))
    }

    /// Resolve and downcast in one step.
    pub fn resolve_as<T: std::any::Any + Send + Sync>(&self, handle: Handle) -> Option<Arc<T>> {
        self.resolve(handle).and_then(|o| o.downcast::<T>().ok())
    }

    /// Number of registered objects.
    pub fn len(&self) -> usize {
        self.by_handle.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_handle.is_empty()
    }
}

impl Default for IdentityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for IdentityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityRegistry")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_resolve_roundtrip() {
        let reg = IdentityRegistry::new();
        let obj: HostObject = Arc::new("payload".to_string());
        let h = reg.register(&obj);
        let resolved = reg.resolve(h).unwrap();
        assert!(Arc::ptr_eq(&obj, &resolved));
    }

    #[test]
    fn test_idempotent_registration() {
        let reg = IdentityRegistry::new();
        let obj: HostObject = Arc::new(7i64);
        let h1 = reg.register(&obj);
        let h2 = reg.register(&obj);
        assert_eq!(h1, h2);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_distinct_objects_distinct_handles() {
        let reg = IdentityRegistry::new();
        let a: HostObject = Arc::new(1i64);
        let b: HostObject = Arc::new(1i64);
        assert_ne!(reg.register(&a), reg.register(&b));
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn test_unknown_handle_resolves_to_none() {
        let reg = IdentityRegistry::new();
        assert!(reg.resolve(Handle::from_raw(0)).is_none());
        assert!(reg.resolve(Handle::from_raw(999_999)).is_none());
    }

    #[test]
    fn test_resolve_as_downcast() {
        let reg = IdentityRegistry::new();
        let obj: HostObject = Arc::new(42u32);
        let h = reg.register(&obj);
        assert_eq!(*reg.resolve_as::<u32>(h).unwrap(), 42);
        assert!(reg.resolve_as::<String>(h).is_none());
    }

    #[test]
    fn test_handles_are_monotonic() {
        let reg = IdentityRegistry::new();
        let a: HostObject = Arc::new(1i64);
        let b: HostObject = Arc::new(2i64);
        let ha = reg.register(&a);
        let hb = reg.register(&b);
        assert!(hb.raw() > ha.raw());
    }

    #[test]
    fn test_concurrent_registration() {
        let reg = Arc::new(IdentityRegistry::new());
        let objects: Vec<HostObject> = (0..64).map(|i| Arc::new(i as i64) as HostObject).collect();
        let mut threads = Vec::new();
        for _ in 0..4 {
            let reg = Arc::clone(&reg);
            let objects = objects.clone();
            threads.push(std::thread::spawn(move || {
                objects
                    .iter()
                    .map(|o| reg.register(o))
                    .collect::<Vec<_>>()
            }));
        }
        let results: Vec<Vec<Handle>> =
            threads.into_iter().map(|t| t.join().unwrap()).collect();
        // Every thread observed the same handle per object
        for handles in &results[1..] {
            assert_eq!(handles, &results[0]);
        }
        assert_eq!(reg.len(), 64);
    }
}
