//! Query surface for `findMany`: filters, ordering, and pagination
//! (no query planner beyond where/orderBy/paging).

use crate::store::value::Scalar;

#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    In,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub op: Op,
    pub value: FilterValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Scalar(Scalar),
    List(Vec<Scalar>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub column: String,
    pub direction: Direction,
}

impl OrderBy {
    /// `NULLS FIRST` for ascending, `NULLS LAST` for descending — the
    /// default direction-to-null-ordering mapping.
    #[must_use]
    pub fn nulls_clause(&self) -> &'static str {
        match self.direction {
            Direction::Asc => "NULLS FIRST",
            Direction::Desc => "NULLS LAST",
        }
    }

    #[must_use]
    pub fn sql_direction(&self) -> &'static str {
        match self.direction {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

/// A `findMany` request: filters (AND-combined), ordering, and a page
/// bounded by the store's configured maximum.
#[derive(Debug, Clone, Default)]
pub struct FindManyArgs {
    pub filters: Vec<Filter>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<u32>,
    pub cursor: Option<String>,
}

impl FindManyArgs {
    /// Clamp `limit` to `max_page_size`, rejecting an explicit request that
    /// exceeds it outright rather than silently truncating
    /// "argument violated the store's configured limits" is a caller error).
    pub fn validate(&self, max_page_size: u32) -> Result<u32, crate::error::StoreError> {
        match self.limit {
            Some(l) if l > max_page_size => Err(crate::error::StoreError::InvalidQuery {
                message: format!("requested limit {l} exceeds max page size {max_page_size}"),
            }),
            Some(l) => Ok(l),
            None => Ok(max_page_size),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_limit_above_max() {
        let args = FindManyArgs {
            limit: Some(5000),
            ..Default::default()
        };
        assert!(args.validate(1000).is_err());
    }

    #[test]
    fn defaults_to_max_page_size() {
        let args = FindManyArgs::default();
        assert_eq!(args.validate(1000).unwrap(), 1000);
    }

    #[test]
    fn asc_is_nulls_first_desc_is_nulls_last() {
        let asc = OrderBy {
            column: "x".into(),
            direction: Direction::Asc,
        };
        let desc = OrderBy {
            column: "x".into(),
            direction: Direction::Desc,
        };
        assert_eq!(asc.nulls_clause(), "NULLS FIRST");
        assert_eq!(desc.nulls_clause(), "NULLS LAST");
    }
}
