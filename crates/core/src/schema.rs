//! Schema definitions for Eddy sources.
//!
//! A `Schema` describes one logical table as an operator sees it: columns,
//! primary key, output ordering, nested relationships, and whether rows come
//! from the local write path or from the replicated store. Join operators
//! derive new schemas by attaching relationships; everything else treats the
//! schema as immutable for the operator's lifetime.

use crate::compare::{Order, RowComparator, SortKey};
use crate::error::{Error, Result};
use crate::row::Row;
use crate::types::DataType;
use crate::value::Value;
use alloc::collections::BTreeMap;
use alloc::rc::Rc;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::cmp::Ordering as CmpOrdering;

/// Where a source's rows originate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Origin {
    /// Optimistic rows written locally, not yet confirmed durable.
    Local,
    /// Rows replicated from the durable store.
    Durable,
}

/// A column definition.
#[derive(Clone, Debug)]
pub struct Column {
    name: String,
    data_type: DataType,
    index: usize,
}

impl Column {
    /// Creates a column definition. The position is assigned by the builder.
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            index: 0,
        }
    }

    fn with_index(mut self, index: usize) -> Self {
        self.index = index;
        self
    }

    /// Returns the column name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the column data type.
    #[inline]
    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Returns the column position in rows of this schema.
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }
}

/// Schema of one logical table, including derived ordering metadata.
#[derive(Clone, Debug)]
pub struct Schema {
    table_name: String,
    columns: Vec<Column>,
    primary_key: Vec<usize>,
    ordering: Vec<SortKey>,
    comparator: RowComparator,
    relationships: BTreeMap<String, Rc<Schema>>,
    singular: bool,
    origin: Origin,
}

impl Schema {
    /// Returns the table name.
    #[inline]
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Returns the columns.
    #[inline]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Gets a column by name.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name() == name)
    }

    /// Gets a column position by name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name() == name)
    }

    /// Resolves a list of column names to positions.
    pub fn column_indices(&self, names: &[&str]) -> Result<Vec<usize>> {
        names
            .iter()
            .map(|n| {
                self.column_index(n)
                    .ok_or_else(|| Error::column_not_found(&self.table_name, *n))
            })
            .collect()
    }

    /// Returns the primary-key column positions.
    #[inline]
    pub fn primary_key(&self) -> &[usize] {
        &self.primary_key
    }

    /// Returns the declared ordering keys (without the primary-key tiebreak).
    #[inline]
    pub fn ordering(&self) -> &[SortKey] {
        &self.ordering
    }

    /// Returns the comparator realizing this schema's total row order.
    #[inline]
    pub fn comparator(&self) -> &RowComparator {
        &self.comparator
    }

    /// Returns the nested relationship schemas.
    #[inline]
    pub fn relationships(&self) -> &BTreeMap<String, Rc<Schema>> {
        &self.relationships
    }

    /// Gets a relationship schema by name.
    pub fn relationship(&self, name: &str) -> Option<&Rc<Schema>> {
        self.relationships.get(name)
    }

    /// Returns true when results of this schema are at most one row.
    #[inline]
    pub fn singular(&self) -> bool {
        self.singular
    }

    /// Returns the row origin tag.
    #[inline]
    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// Extracts the primary-key values of a row.
    pub fn primary_key_values(&self, row: &Row) -> Vec<Value> {
        row.project(&self.primary_key)
    }

    /// Compares two rows of this schema.
    #[inline]
    pub fn compare_rows(&self, a: &Row, b: &Row) -> CmpOrdering {
        self.comparator.compare(a, b)
    }

    /// Returns true when two rows share the same primary key.
    pub fn same_primary_key(&self, a: &Row, b: &Row) -> bool {
        self.primary_key
            .iter()
            .all(|&i| a.get(i) == b.get(i))
    }

    /// Derives a schema with an additional relationship attached.
    pub fn with_relationship(&self, name: impl Into<String>, child: Rc<Schema>) -> Schema {
        let mut out = self.clone();
        out.relationships.insert(name.into(), child);
        out
    }

    /// Derives a schema with the singular flag set.
    pub fn as_singular(&self, singular: bool) -> Schema {
        let mut out = self.clone();
        out.singular = singular;
        out
    }
}

/// Builder for schema definitions.
pub struct SchemaBuilder {
    table_name: String,
    columns: Vec<Column>,
    primary_key: Vec<String>,
    ordering: Vec<(String, Order)>,
    relationships: BTreeMap<String, Rc<Schema>>,
    singular: bool,
    origin: Origin,
}

impl SchemaBuilder {
    /// Creates a builder for the named table.
    pub fn new(table_name: impl Into<String>) -> Result<Self> {
        let table_name = table_name.into();
        check_naming_rules(&table_name)?;
        Ok(Self {
            table_name,
            columns: Vec::new(),
            primary_key: Vec::new(),
            ordering: Vec::new(),
            relationships: BTreeMap::new(),
            singular: false,
            origin: Origin::Durable,
        })
    }

    /// Adds a column.
    pub fn column(mut self, name: impl Into<String>, data_type: DataType) -> Result<Self> {
        let name = name.into();
        check_naming_rules(&name)?;
        if self.columns.iter().any(|c| c.name() == name) {
            return Err(Error::invalid_schema("duplicate column name"));
        }
        let index = self.columns.len();
        self.columns.push(Column::new(name, data_type).with_index(index));
        Ok(self)
    }

    /// Declares the primary key columns, in order.
    pub fn primary_key(mut self, names: &[&str]) -> Self {
        self.primary_key = names.iter().map(|n| n.to_string()).collect();
        self
    }

    /// Appends an ordering key.
    pub fn order_by(mut self, name: impl Into<String>, order: Order) -> Self {
        self.ordering.push((name.into(), order));
        self
    }

    /// Attaches a nested relationship schema.
    pub fn relationship(mut self, name: impl Into<String>, child: Rc<Schema>) -> Self {
        self.relationships.insert(name.into(), child);
        self
    }

    /// Marks results as singular (at most one row).
    pub fn singular(mut self, singular: bool) -> Self {
        self.singular = singular;
        self
    }

    /// Sets the row origin tag.
    pub fn origin(mut self, origin: Origin) -> Self {
        self.origin = origin;
        self
    }

    /// Validates and builds the schema.
    pub fn build(self) -> Result<Schema> {
        if self.primary_key.is_empty() {
            return Err(Error::invalid_schema("primary key must not be empty"));
        }

        let mut pk_indices = Vec::with_capacity(self.primary_key.len());
        for name in &self.primary_key {
            let col = self
                .columns
                .iter()
                .find(|c| c.name() == name)
                .ok_or_else(|| Error::column_not_found(&self.table_name, name))?;
            if !col.data_type().is_keyable() {
                return Err(Error::invalid_schema("primary key column is not keyable"));
            }
            pk_indices.push(col.index());
        }

        let mut sort_keys = Vec::with_capacity(self.ordering.len());
        for (name, order) in &self.ordering {
            let index = self
                .columns
                .iter()
                .position(|c| c.name() == name)
                .ok_or_else(|| Error::column_not_found(&self.table_name, name))?;
            sort_keys.push(SortKey::new(index, *order));
        }

        let comparator = RowComparator::new(sort_keys.clone(), &pk_indices);

        Ok(Schema {
            table_name: self.table_name,
            columns: self.columns,
            primary_key: pk_indices,
            ordering: sort_keys,
            comparator,
            relationships: self.relationships,
            singular: self.singular,
            origin: self.origin,
        })
    }
}

/// Identifier rules for table and column names.
fn check_naming_rules(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(Error::invalid_schema("invalid identifier"))
    }
}
