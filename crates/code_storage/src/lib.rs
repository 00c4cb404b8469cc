//! Content-addressed, versioned code storage for registered functions:
//! code text on a key-value surface, source maps and compiled binaries on a
//! bytes-object surface, with fallback-chain resolution across versions.

pub mod backends;
mod code_store;
pub mod keys;

pub use backends::{
    InMemoryKeyValueStore,
    InMemoryObjectStore,
    KeyValueStore,
    ObjectStore,
    StoredObject,
};
pub use code_store::{
    CodeStore,
    ResolvedCode,
    VersionPage,
};
