//! Row ordering utilities.
//!
//! A `RowComparator` realizes a schema's ordering: a sequence of
//! (column, direction) keys followed by the primary-key columns ascending,
//! so two distinct rows never compare equal.

use crate::row::Row;
use alloc::vec::Vec;
use core::cmp::Ordering as CmpOrdering;

/// Sort direction for one ordering column.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Order {
    /// Ascending order (smallest first)
    Asc,
    /// Descending order (largest first)
    Desc,
}

impl Order {
    /// Applies this direction to a comparison result.
    #[inline]
    pub fn apply(&self, ord: CmpOrdering) -> CmpOrdering {
        match self {
            Order::Asc => ord,
            Order::Desc => ord.reverse(),
        }
    }
}

/// One resolved ordering key: a column position and a direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SortKey {
    /// Column position in the row.
    pub column: usize,
    /// Sort direction.
    pub order: Order,
}

impl SortKey {
    /// Creates a sort key.
    pub fn new(column: usize, order: Order) -> Self {
        Self { column, order }
    }

    /// Ascending key for the given column.
    pub fn asc(column: usize) -> Self {
        Self::new(column, Order::Asc)
    }

    /// Descending key for the given column.
    pub fn desc(column: usize) -> Self {
        Self::new(column, Order::Desc)
    }
}

/// Compares rows by a fixed sequence of sort keys.
///
/// The key sequence always ends with the primary-key columns ascending, so
/// `compare` returning `Equal` implies the rows agree on every primary-key
/// column.
#[derive(Clone, Debug)]
pub struct RowComparator {
    keys: Vec<SortKey>,
}

impl RowComparator {
    /// Creates a comparator from ordering keys plus primary-key tiebreak
    /// columns. Ordering keys that repeat a primary-key column are kept;
    /// tiebreak columns already present among the ordering keys are skipped.
    pub fn new(ordering: Vec<SortKey>, primary_key: &[usize]) -> Self {
        let mut keys = ordering;
        for &pk in primary_key {
            if !keys.iter().any(|k| k.column == pk) {
                keys.push(SortKey::asc(pk));
            }
        }
        Self { keys }
    }

    /// Returns the full key sequence.
    pub fn keys(&self) -> &[SortKey] {
        &self.keys
    }

    /// Compares two rows.
    pub fn compare(&self, a: &Row, b: &Row) -> CmpOrdering {
        for key in &self.keys {
            let av = a.get(key.column);
            let bv = b.get(key.column);
            let cmp = match (av, bv) {
                (Some(av), Some(bv)) => key.order.apply(av.cmp(bv)),
                (None, Some(_)) => CmpOrdering::Less,
                (Some(_), None) => CmpOrdering::Greater,
                (None, None) => CmpOrdering::Equal,
            };
            if cmp != CmpOrdering::Equal {
                return cmp;
            }
        }
        CmpOrdering::Equal
    }

    /// Compares two rows, reversing the result when `reverse` is set.
    #[inline]
    pub fn compare_directed(&self, a: &Row, b: &Row, reverse: bool) -> CmpOrdering {
        let ord = self.compare(a, b);
        if reverse {
            ord.reverse()
        } else {
            ord
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use alloc::vec;

    fn row(values: Vec<i64>) -> Row {
        Row::new(values.into_iter().map(Value::Int).collect())
    }

    #[test]
    fn test_order_apply() {
        assert_eq!(Order::Asc.apply(CmpOrdering::Less), CmpOrdering::Less);
        assert_eq!(Order::Desc.apply(CmpOrdering::Less), CmpOrdering::Greater);
        assert_eq!(Order::Desc.apply(CmpOrdering::Equal), CmpOrdering::Equal);
    }

    #[test]
    fn test_single_key() {
        let cmp = RowComparator::new(vec![SortKey::asc(0)], &[0]);
        assert_eq!(cmp.compare(&row(vec![1]), &row(vec![2])), CmpOrdering::Less);
        assert_eq!(cmp.compare(&row(vec![2]), &row(vec![1])), CmpOrdering::Greater);
        assert_eq!(cmp.compare(&row(vec![1]), &row(vec![1])), CmpOrdering::Equal);
    }

    #[test]
    fn test_desc_key() {
        let cmp = RowComparator::new(vec![SortKey::desc(0)], &[0]);
        assert_eq!(cmp.compare(&row(vec![1]), &row(vec![2])), CmpOrdering::Greater);
    }

    #[test]
    fn test_primary_key_tiebreak() {
        // Order by column 1, tiebreak by primary key column 0.
        let cmp = RowComparator::new(vec![SortKey::asc(1)], &[0]);
        assert_eq!(cmp.keys().len(), 2);

        let a = row(vec![1, 10]);
        let b = row(vec![2, 10]);
        assert_eq!(cmp.compare(&a, &b), CmpOrdering::Less);

        // Equal only when the primary key agrees too.
        let c = row(vec![1, 10]);
        assert_eq!(cmp.compare(&a, &c), CmpOrdering::Equal);
    }

    #[test]
    fn test_pk_column_not_duplicated() {
        let cmp = RowComparator::new(vec![SortKey::desc(0), SortKey::asc(1)], &[0]);
        assert_eq!(cmp.keys().len(), 2);
    }

    #[test]
    fn test_compare_directed() {
        let cmp = RowComparator::new(vec![SortKey::asc(0)], &[0]);
        assert_eq!(
            cmp.compare_directed(&row(vec![1]), &row(vec![2]), true),
            CmpOrdering::Greater
        );
        assert_eq!(
            cmp.compare_directed(&row(vec![1]), &row(vec![2]), false),
            CmpOrdering::Less
        );
    }
}
