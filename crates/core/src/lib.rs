//! Eddy Core - data model for the Eddy incremental view engine.
//!
//! This crate provides the foundational types the operator graph is built on:
//!
//! - `DataType`: supported column types
//! - `Value` / `JsonValue`: runtime cell values with a total order
//! - `Row`: one table row, positionally aligned with its schema
//! - `Schema`: table metadata (columns, primary key, ordering, relationships,
//!   origin tag) plus the derived row comparator
//! - `Order` / `SortKey` / `RowComparator`: ordering utilities
//!
//! # Example
//!
//! ```rust
//! use eddy_core::{DataType, Order, Row, SchemaBuilder, Value};
//!
//! let schema = SchemaBuilder::new("users")
//!     .unwrap()
//!     .column("id", DataType::Int)
//!     .unwrap()
//!     .column("name", DataType::String)
//!     .unwrap()
//!     .primary_key(&["id"])
//!     .order_by("name", Order::Asc)
//!     .build()
//!     .unwrap();
//!
//! let row = Row::new(vec![Value::Int(1), Value::String("Alice".into())]);
//! assert_eq!(schema.primary_key_values(&row), vec![Value::Int(1)]);
//! ```

#![no_std]

extern crate alloc;

mod compare;
mod error;
mod row;
mod schema;
mod types;
mod value;

pub use compare::{Order, RowComparator, SortKey};
pub use error::{Error, Result};
pub use row::Row;
pub use schema::{Column, Origin, Schema, SchemaBuilder};
pub use types::DataType;
pub use value::{JsonValue, Value};
