//! Remote resource ids.
//!
//! Ids come from an injected [`ContextIdSource`]; the session only carries
//! them in request payloads.

use std::collections::HashMap;

use parking_lot::Mutex;

/// Kind of remote resource an id names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextKind {
    /// TLS configuration.
    SslConfig,
    /// TLS session context.
    SslContext,
    /// X.509 certificate chain.
    X509Certificate,
    /// Public key context.
    PkContext,
    /// Entropy source.
    Entropy,
    /// CTR-DRBG generator.
    CtrDrbg,
}

/// Allocates ids for remote resources.
pub trait ContextIdSource: Send + Sync + 'static {
    /// Next id for a resource of `kind`.
    fn allocate(&self, kind: ContextKind) -> u32;
}

impl<F> ContextIdSource for F
where
    F: Fn(ContextKind) -> u32 + Send + Sync + 'static,
{
    fn allocate(&self, kind: ContextKind) -> u32 {
        self(kind)
    }
}

/// Hands out increasing ids per kind, starting at 1.
#[derive(Debug, Default)]
pub struct SequentialContextIds {
    next: Mutex<HashMap<ContextKind, u32>>,
}

impl SequentialContextIds {
    /// Create a source with every counter at its start.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ContextIdSource for SequentialContextIds {
    fn allocate(&self, kind: ContextKind) -> u32 {
        let mut next = self.next.lock();
        let slot = next.entry(kind).or_insert(0);
        *slot = slot.wrapping_add(1);
        *slot
    }
}
