//! Eddy Storage - per-operator key/value persistence for the Eddy engine.
//!
//! Stateful operators remember derived state (seen keys, correlation
//! membership) across calls through this crate:
//!
//! - `Storage`: the minimal store contract (`get`/`set`/`del`/`scan`)
//! - `MemoryStorage`: BTreeMap-backed default implementation
//! - `encode_values` / `encode_value`: injective, prefix-delimited encoding
//!   of row values into storage keys
//!
//! # Example
//!
//! ```rust
//! use eddy_storage::{encode_values, MemoryStorage, Storage};
//! use eddy_core::Value;
//!
//! let mut store: MemoryStorage<u32> = MemoryStorage::new();
//! let key = encode_values(&[Value::Int(7), Value::String("a".into())]);
//! store.set(key, 1);
//!
//! let prefix = encode_values(&[Value::Int(7)]);
//! assert_eq!(store.scan(&prefix).count(), 1);
//! ```

#![no_std]

extern crate alloc;

mod key;
mod store;

pub use key::{encode_value, encode_values};
pub use store::{MemoryStorage, Storage};
