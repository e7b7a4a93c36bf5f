//! Eddy IVM - the incremental view maintenance operator graph.
//!
//! This crate turns a base table of rows plus a stream of row-level
//! mutations into correctly ordered, deduplicated, hierarchically-joined
//! result sets, and keeps those results correct as mutations keep
//! arriving, including mutations that arrive while a consumer is still
//! draining a
//! prior read.
//!
//! # Building blocks
//!
//! - `Operator` / `Output`: the composition contract (`fetch`, `push`,
//!   `cleanup`, `set_output`, `destroy`)
//! - `MemorySource`: sorted base table, the graph's root
//! - `Distinct`: storage-backed first-seen deduplication
//! - `ParentJoin` / `ChildJoin`: the correlated join family; `ChildJoin`
//!   carries the reentrancy overlay
//! - `Filter` / `Limit`: the simpler membership operators
//! - `TreeView`: reference terminal consumer
//!
//! # Example
//!
//! ```rust
//! use eddy_core::{DataType, Row, SchemaBuilder, Value};
//! use eddy_ivm::{Distinct, FetchRequest, MemorySource, Operator, TreeView};
//! use std::rc::Rc;
//!
//! let schema = SchemaBuilder::new("events")
//!     .unwrap()
//!     .column("id", DataType::Int)
//!     .unwrap()
//!     .column("kind", DataType::String)
//!     .unwrap()
//!     .primary_key(&["id"])
//!     .build()
//!     .unwrap();
//!
//! let source = MemorySource::with_rows(
//!     schema,
//!     vec![
//!         Row::new(vec![Value::Int(1), "click".into()]),
//!         Row::new(vec![Value::Int(2), "click".into()]),
//!     ],
//! );
//! let distinct = Distinct::new(source.clone() as Rc<dyn Operator>, &["kind"]).unwrap();
//! source.set_output(distinct.clone());
//!
//! let view = TreeView::new(distinct.schema());
//! distinct.set_output(view.clone());
//! view.hydrate(distinct.fetch(FetchRequest::all())).unwrap();
//! assert_eq!(view.len(), 1);
//! ```

mod change;
mod distinct;
mod error;
mod filter;
mod join;
mod limit;
mod node;
mod operator;
mod source;
mod view;

pub use change::{Change, ChildChange};
pub use distinct::Distinct;
pub use error::{Error, Result};
pub use filter::Filter;
pub use join::{ChildJoin, ParentJoin};
pub use limit::Limit;
pub use node::{Node, NodeArena, Relationship, RelationshipSource};
pub use operator::{Constraint, FetchRequest, NodeStream, Operator, Output};
pub use source::MemorySource;
pub use view::{MaterializedNode, TreeView};
