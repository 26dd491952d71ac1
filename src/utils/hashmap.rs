//! A hash-map that behaves deterministically when the
//! `enhanced-determinism` feature is enabled.
//!
//! Iteration order over node and element maps decides tie-breaks in a few places (which
//! candidate face is tried first, which child element is created first). With
//! `enhanced-determinism` the order is the insertion order.

/// Deterministic hashmap using [`indexmap::IndexMap`].
#[cfg(feature = "enhanced-determinism")]
pub type HashMap<K, V> = indexmap::IndexMap<K, V>;
#[cfg(feature = "enhanced-determinism")]
pub use indexmap::map::Entry;

/// Hashmap using [`hashbrown::HashMap`].
#[cfg(not(feature = "enhanced-determinism"))]
pub type HashMap<K, V> = hashbrown::HashMap<K, V>;
#[cfg(not(feature = "enhanced-determinism"))]
pub use hashbrown::hash_map::Entry;
