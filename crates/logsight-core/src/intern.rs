//! Process-wide string intern pool
//!
//! Typical PLC traces contain fewer than ten thousand unique device ids and
//! signal names across hundreds of millions of rows. Collapsing equal
//! strings to one shared allocation removes most per-entry string cost.
//!
//! The pool is bounded: past the cap, `intern` hands back an uninterned
//! copy of the input instead of growing, so deduplication degrades
//! gracefully under adversarial inputs.

use std::collections::HashSet;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

/// Canonical interned string reference
///
/// Clones are pointer copies; equal interned values share one allocation.
pub type IStr = Arc<str>;

/// Hard cap applied when `MAX_INTERN_POOL_SIZE` is not set
pub const DEFAULT_POOL_CAPACITY: usize = 500_000;

/// Thread-safe canonical-string map with a hard entry cap
pub struct InternPool {
    strings: RwLock<HashSet<IStr>>,
    capacity: usize,
}

impl InternPool {
    /// Create a pool with the default capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_POOL_CAPACITY)
    }

    /// Create a pool bounded at `capacity` entries
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            strings: RwLock::new(HashSet::new()),
            capacity,
        }
    }

    /// Return the canonical copy of `s`
    ///
    /// Two calls with equal input return pointer-equal references while the
    /// pool has room. A full pool never blocks or fails; it returns a fresh
    /// uninterned copy of the argument.
    pub fn intern(&self, s: &str) -> IStr {
        // Read-locked fast path: the overwhelming majority of lookups hit
        // an already-interned string.
        {
            let strings = self.strings.read();
            if let Some(existing) = strings.get(s) {
                return Arc::clone(existing);
            }
            if strings.len() >= self.capacity {
                return Arc::from(s);
            }
        }

        // Write-locked slow path with re-check: another thread may have
        // inserted the same string between lock releases.
        let mut strings = self.strings.write();
        if let Some(existing) = strings.get(s) {
            return Arc::clone(existing);
        }
        if strings.len() >= self.capacity {
            return Arc::from(s);
        }

        let interned: IStr = Arc::from(s);
        strings.insert(Arc::clone(&interned));
        interned
    }

    /// Intern raw bytes, replacing invalid UTF-8 with the replacement char
    pub fn intern_bytes(&self, bytes: &[u8]) -> IStr {
        match std::str::from_utf8(bytes) {
            Ok(s) => self.intern(s),
            Err(_) => self.intern(&String::from_utf8_lossy(bytes)),
        }
    }

    /// Number of interned entries
    pub fn len(&self) -> usize {
        self.strings.read().len()
    }

    /// Whether the pool holds no entries
    pub fn is_empty(&self) -> bool {
        self.strings.read().is_empty()
    }

    /// Configured entry cap
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Reset the pool
    ///
    /// Safe between ingest jobs; must not be called mid-parse. Previously
    /// returned references stay valid, they just no longer deduplicate
    /// against future calls.
    pub fn clear(&self) {
        self.strings.write().clear();
    }
}

impl Default for InternPool {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide pool shared by every parser
///
/// Capacity comes from `MAX_INTERN_POOL_SIZE` when set. Initialized eagerly
/// at startup (the server touches it during init) and torn down only on
/// shutdown.
static GLOBAL_POOL: Lazy<InternPool> = Lazy::new(|| {
    let capacity = std::env::var("MAX_INTERN_POOL_SIZE")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(DEFAULT_POOL_CAPACITY);
    InternPool::with_capacity(capacity)
});

/// The process-wide intern pool
pub fn global_pool() -> &'static InternPool {
    &GLOBAL_POOL
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_deduplicates() {
        let pool = InternPool::new();
        let a = pool.intern("ConveyorMotor");
        let b = pool.intern("ConveyorMotor");

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_intern_distinct_strings() {
        let pool = InternPool::new();
        let a = pool.intern("CV01");
        let b = pool.intern("CV02");

        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_full_pool_returns_input_unchanged() {
        let pool = InternPool::with_capacity(2);
        pool.intern("one");
        pool.intern("two");

        let overflow = pool.intern("three");
        assert_eq!(&*overflow, "three");
        assert_eq!(pool.len(), 2);

        // Already-interned strings still dedupe at capacity.
        let again = pool.intern("one");
        let first = pool.intern("one");
        assert!(Arc::ptr_eq(&again, &first));
    }

    #[test]
    fn test_cardinality_never_exceeds_cap() {
        let pool = InternPool::with_capacity(8);
        for i in 0..100 {
            pool.intern(&format!("signal-{i}"));
        }
        assert_eq!(pool.len(), 8);
    }

    #[test]
    fn test_intern_bytes() {
        let pool = InternPool::new();
        let a = pool.intern_bytes(b"CarrierID");
        let b = pool.intern("CarrierID");
        assert!(Arc::ptr_eq(&a, &b));

        let lossy = pool.intern_bytes(&[0x43, 0xFF, 0x56]);
        assert!(lossy.contains('\u{FFFD}'));
    }

    #[test]
    fn test_clear() {
        let pool = InternPool::new();
        let before = pool.intern("held");
        pool.clear();
        assert!(pool.is_empty());

        // Old references survive a clear.
        assert_eq!(&*before, "held");
    }

    #[test]
    fn test_concurrent_intern() {
        let pool = std::sync::Arc::new(InternPool::new());
        let mut handles = Vec::new();

        for _ in 0..8 {
            let pool = std::sync::Arc::clone(&pool);
            handles.push(std::thread::spawn(move || {
                for i in 0..500 {
                    pool.intern(&format!("sig-{}", i % 50));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(pool.len(), 50);
    }
}
