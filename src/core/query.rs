//! Persistent query builder over one table
//!
//! Every builder call returns a new [`TableQuery`]; the receiver is left
//! untouched, so a base query can be reused for several derived queries.
//! Predicates are [`Expr`] trees lowered by the
//! [`QueryCompiler`](crate::core::compiler::QueryCompiler).

use crate::backends::command::DeferredRows;
use crate::backends::sqlite::Connection;
use crate::core::compiler::QueryCompiler;
use crate::core::error::{OrmError, Result};
use crate::core::expr::Expr;
use crate::core::mapping::TableMapping;
use crate::core::schema::Record;
use crate::core::value::FieldValue;
use std::marker::PhantomData;
use std::sync::Arc;

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDirection {
    Asc,
    Desc,
}

/// One `ORDER BY` key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    /// Field name of the sort column
    pub field: String,
    pub direction: OrderDirection,
}

/// Query over the table of `T`
pub struct TableQuery<'c, T> {
    conn: &'c Connection,
    mapping: Arc<TableMapping>,
    where_: Option<Expr>,
    order_bys: Vec<OrderBy>,
    limit: Option<usize>,
    offset: Option<usize>,
    deferred: bool,
    join: Option<String>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for TableQuery<'_, T> {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn,
            mapping: Arc::clone(&self.mapping),
            where_: self.where_.clone(),
            order_bys: self.order_bys.clone(),
            limit: self.limit,
            offset: self.offset,
            deferred: self.deferred,
            join: self.join.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for TableQuery<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableQuery")
            .field("table", &self.mapping.table_name())
            .field("where", &self.where_)
            .field("order_bys", &self.order_bys)
            .field("limit", &self.limit)
            .field("offset", &self.offset)
            .field("deferred", &self.deferred)
            .finish()
    }
}

impl<'c, T: Record> TableQuery<'c, T> {
    pub(crate) fn new(conn: &'c Connection, mapping: Arc<TableMapping>) -> Self {
        Self {
            conn,
            mapping,
            where_: None,
            order_bys: Vec::new(),
            limit: None,
            offset: None,
            deferred: false,
            join: None,
            _marker: PhantomData,
        }
    }

    pub fn mapping(&self) -> &TableMapping {
        &self.mapping
    }

    pub fn is_deferred(&self) -> bool {
        self.deferred
    }

    /// Add a predicate; combined with any earlier one by `AND`.
    ///
    /// # Errors
    ///
    /// `Translation` once `take` or `skip` has been applied, since the
    /// predicate would silently apply before paging.
    pub fn filter(&self, predicate: Expr) -> Result<Self> {
        if self.limit.is_some() || self.offset.is_some() {
            return Err(OrmError::translation(
                "Cannot apply a filter after take or skip",
            ));
        }
        let mut next = self.clone();
        next.where_ = Some(match next.where_.take() {
            Some(existing) => existing.and(predicate),
            None => predicate,
        });
        Ok(next)
    }

    /// Limit the row count; repeated calls keep the smallest limit
    #[must_use]
    pub fn take(&self, n: usize) -> Self {
        let mut next = self.clone();
        next.limit = Some(next.limit.map_or(n, |limit| limit.min(n)));
        next
    }

    /// Skip rows; repeated calls add up
    #[must_use]
    pub fn skip(&self, n: usize) -> Self {
        let mut next = self.clone();
        next.offset = Some(next.offset.unwrap_or(0).saturating_add(n));
        next
    }

    /// Sort ascending by a field. The first ordering is the primary key.
    #[must_use]
    pub fn order_by(&self, field: impl Into<String>) -> Self {
        self.add_ordering(field.into(), OrderDirection::Asc)
    }

    #[must_use]
    pub fn order_by_descending(&self, field: impl Into<String>) -> Self {
        self.add_ordering(field.into(), OrderDirection::Desc)
    }

    /// Secondary ascending sort key
    #[must_use]
    pub fn then_by(&self, field: impl Into<String>) -> Self {
        self.add_ordering(field.into(), OrderDirection::Asc)
    }

    #[must_use]
    pub fn then_by_descending(&self, field: impl Into<String>) -> Self {
        self.add_ordering(field.into(), OrderDirection::Desc)
    }

    fn add_ordering(&self, field: String, direction: OrderDirection) -> Self {
        let mut next = self.clone();
        next.order_bys.push(OrderBy { field, direction });
        next
    }

    /// Stream rows in [`TableQuery::for_each`] instead of collecting them first
    #[must_use]
    pub fn deferred(&self) -> Self {
        let mut next = self.clone();
        next.deferred = true;
        next
    }

    /// Join with the table of `U`. Joined queries cannot be compiled.
    #[must_use]
    pub fn join<U: Record>(&self) -> Self {
        let mut next = self.clone();
        next.join = Some(U::declaration().table_name);
        next
    }

    /// SQL and arguments for `SELECT *`
    pub fn to_sql(&self) -> Result<(String, Vec<FieldValue>)> {
        self.compile("*")
    }

    fn compile(&self, selection: &str) -> Result<(String, Vec<FieldValue>)> {
        if self.join.is_some() {
            return Err(OrmError::translation("Joins are not supported."));
        }

        let mut compiler = QueryCompiler::new(&self.mapping);
        let mut sql = format!(
            "SELECT {} FROM \"{}\"",
            selection,
            self.mapping.table_name()
        );

        if let Some(predicate) = &self.where_ {
            let compiled = compiler.compile(predicate)?;
            sql.push_str(" WHERE ");
            sql.push_str(&compiled.sql);
        }

        if !self.order_bys.is_empty() {
            let keys = self
                .order_bys
                .iter()
                .map(|o| {
                    let column = compiler.compile(&Expr::Column(o.field.clone()))?;
                    Ok(match o.direction {
                        OrderDirection::Asc => column.sql,
                        OrderDirection::Desc => format!("{} DESC", column.sql),
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            sql.push_str(" ORDER BY ");
            sql.push_str(&keys.join(", "));
        }

        match (self.limit, self.offset) {
            (Some(limit), _) => sql.push_str(&format!(" LIMIT {}", sql_bound(limit))),
            // OFFSET is only valid after a LIMIT clause.
            (None, Some(_)) => sql.push_str(" LIMIT -1"),
            (None, None) => {}
        }
        if let Some(offset) = self.offset {
            sql.push_str(&format!(" OFFSET {}", sql_bound(offset)));
        }

        Ok((sql, compiler.into_args()))
    }

    /// Run the query and collect every row
    pub fn to_list(&self) -> Result<Vec<T>> {
        let (sql, args) = self.to_sql()?;
        self.conn
            .create_command(&sql, &args)?
            .execute_query_with(Arc::clone(&self.mapping))
    }

    /// Visit every row; streamed from the live statement when deferred
    pub fn for_each<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(T) -> Result<()>,
    {
        if !self.deferred {
            return self.to_list()?.into_iter().try_for_each(f);
        }
        self.with_deferred(|rows| {
            for record in rows {
                f(record?)?;
            }
            Ok(())
        })
    }

    /// Hand the lazy row sequence to `f`
    pub fn with_deferred<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(DeferredRows<'_, T>) -> Result<R>,
    {
        let (sql, args) = self.to_sql()?;
        let command = self.conn.create_command(&sql, &args)?;
        let mut prepared = command.prepare()?;
        let rows = prepared.deferred_with(Arc::clone(&self.mapping))?;
        f(rows)
    }

    /// Number of rows matched
    pub fn count(&self) -> Result<usize> {
        let (sql, args) = self.compile("count(*)")?;
        let count: i64 = self.conn.execute_scalar(&sql, &args)?;
        usize::try_from(count).map_err(|_| OrmError::type_mismatch("usize", &count.to_string()))
    }

    /// Number of rows matched together with an extra predicate
    pub fn count_where(&self, predicate: Expr) -> Result<usize> {
        self.filter(predicate)?.count()
    }

    /// First row; `NotFound` when there is none
    pub fn first(&self) -> Result<T> {
        self.first_or_default()?.ok_or_else(|| {
            OrmError::not_found(format!("Query on {} returned no rows", self.mapping.table_name()))
        })
    }

    /// First row, if any
    pub fn first_or_default(&self) -> Result<Option<T>> {
        Ok(self.take(1).to_list()?.into_iter().next())
    }

    /// Row at a zero-based position
    pub fn element_at(&self, index: usize) -> Result<T> {
        self.skip(index).take(1).first()
    }

    /// Delete the rows matching the query's predicate and `predicate`.
    ///
    /// # Errors
    ///
    /// `UnsupportedOperation` when paging is applied or no predicate is
    /// given at all.
    pub fn delete(&self, predicate: impl Into<Option<Expr>>) -> Result<usize> {
        if self.limit.is_some() || self.offset.is_some() {
            return Err(OrmError::unsupported("Cannot delete with take or skip"));
        }
        let predicate = match (self.where_.clone(), predicate.into()) {
            (Some(existing), Some(extra)) => existing.and(extra),
            (Some(only), None) | (None, Some(only)) => only,
            (None, None) => return Err(OrmError::unsupported("No condition specified for delete")),
        };

        let mut compiler = QueryCompiler::new(&self.mapping);
        let compiled = compiler.compile(&predicate)?;
        let sql = format!(
            "DELETE FROM \"{}\" WHERE {}",
            self.mapping.table_name(),
            compiled.sql
        );
        self.conn.execute(&sql, compiler.args())
    }
}

/// SQLite integers are signed 64-bit
fn sql_bound(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::expr::{captured, col, list};
    use crate::core::schema::CreateFlags;

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Item {
        id: i64,
        name: String,
        rank: Option<i32>,
    }

    crate::impl_record!(Item, "Item", {
        id: i64 => "Id" [primary_key, auto_increment],
        name: String => "Name",
        rank: Option<i32> => "Rank",
    });

    #[derive(Debug, Default, Clone)]
    struct Other {
        id: i64,
    }

    crate::impl_record!(Other, "Other", {
        id: i64 => "Id" [primary_key],
    });

    fn seeded() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.create_table::<Item>(CreateFlags::NONE).unwrap();
        for (name, rank) in [("b", Some(2)), ("a", None), ("c", Some(1)), ("d", Some(2))] {
            let mut item = Item {
                name: name.into(),
                rank,
                ..Default::default()
            };
            conn.insert(&mut item).unwrap();
        }
        conn
    }

    fn names(items: &[Item]) -> Vec<&str> {
        items.iter().map(|i| i.name.as_str()).collect()
    }

    #[test]
    fn test_sql_shape() {
        let conn = seeded();
        let query = conn
            .table::<Item>()
            .unwrap()
            .filter(col("Name").eq("x"))
            .unwrap()
            .order_by("Rank")
            .then_by_descending("Name")
            .take(10)
            .skip(3);
        let (sql, args) = query.to_sql().unwrap();
        assert_eq!(
            sql,
            "SELECT * FROM \"Item\" WHERE (\"Name\" = ?) ORDER BY \"Rank\", \"Name\" DESC LIMIT 10 OFFSET 3"
        );
        assert_eq!(args, vec![FieldValue::Text("x".into())]);

        let (sql, _) = conn.table::<Item>().unwrap().skip(2).to_sql().unwrap();
        assert_eq!(sql, "SELECT * FROM \"Item\" LIMIT -1 OFFSET 2");
    }

    #[test]
    fn test_builders_do_not_mutate_base() {
        let conn = seeded();
        let base = conn.table::<Item>().unwrap().order_by("Name");
        let first_two = base.take(2);
        let ranked = base.filter(col("Rank").eq(2)).unwrap();

        assert_eq!(names(&base.to_list().unwrap()), vec!["a", "b", "c", "d"]);
        assert_eq!(names(&first_two.to_list().unwrap()), vec!["a", "b"]);
        assert_eq!(names(&ranked.to_list().unwrap()), vec!["b", "d"]);
    }

    #[test]
    fn test_take_and_skip_accumulate() {
        let conn = seeded();
        let q = conn.table::<Item>().unwrap().order_by("Id");
        assert_eq!(q.take(3).take(5).to_list().unwrap().len(), 3);
        assert_eq!(names(&q.skip(1).skip(1).to_list().unwrap()), vec!["c", "d"]);

        let far = q.skip(usize::MAX).skip(1);
        let (sql, _) = far.to_sql().unwrap();
        assert!(sql.ends_with(" LIMIT -1 OFFSET 9223372036854775807"));
        assert!(far.to_list().unwrap().is_empty());
        assert_eq!(q.take(usize::MAX).to_list().unwrap().len(), 4);
        assert!(matches!(
            q.take(1).filter(col("Id").gt(0)),
            Err(OrmError::Translation(_))
        ));
    }

    #[test]
    fn test_null_predicates() {
        let conn = seeded();
        let q = conn.table::<Item>().unwrap();
        let none: Option<i32> = None;
        assert_eq!(names(&q.filter(col("Rank").eq(none)).unwrap().to_list().unwrap()), vec!["a"]);
        assert_eq!(q.count_where(col("Rank").ne(none)).unwrap(), 3);
    }

    #[test]
    fn test_first_element_at_count() {
        let conn = seeded();
        let q = conn.table::<Item>().unwrap().order_by("Name");
        assert_eq!(q.first().unwrap().name, "a");
        assert_eq!(q.element_at(2).unwrap().name, "c");
        assert!(matches!(q.element_at(10), Err(OrmError::NotFound(_))));
        assert!(q
            .filter(col("Name").eq("zzz"))
            .unwrap()
            .first_or_default()
            .unwrap()
            .is_none());
        assert_eq!(q.count().unwrap(), 4);
    }

    #[test]
    fn test_in_list() {
        let conn = seeded();
        let q = conn
            .table::<Item>()
            .unwrap()
            .filter(col("Name").is_in(list(["a", "d"])))
            .unwrap()
            .order_by("Name");
        assert_eq!(names(&q.to_list().unwrap()), vec!["a", "d"]);
    }

    #[test]
    fn test_deferred_for_each() {
        let conn = seeded();
        let mut seen = Vec::new();
        conn.table::<Item>()
            .unwrap()
            .order_by_descending("Id")
            .deferred()
            .for_each(|item| {
                seen.push(item.name);
                Ok(())
            })
            .unwrap();
        assert_eq!(seen, vec!["d", "c", "a", "b"]);

        let taken = conn
            .table::<Item>()
            .unwrap()
            .with_deferred(|rows| rows.take(2).collect::<Result<Vec<_>>>())
            .unwrap();
        assert_eq!(taken.len(), 2);
    }

    #[test]
    fn test_delete_by_predicate() {
        let conn = seeded();
        let q = conn.table::<Item>().unwrap();
        assert_eq!(q.delete(col("Rank").eq(captured(2))).unwrap(), 2);
        assert_eq!(q.count().unwrap(), 2);
        assert!(matches!(q.take(1).delete(None::<Expr>), Err(OrmError::UnsupportedOperation(_))));
        assert!(matches!(q.delete(None::<Expr>), Err(OrmError::UnsupportedOperation(_))));
    }

    #[test]
    fn test_join_rejected() {
        let conn = seeded();
        let q = conn.table::<Item>().unwrap().join::<Other>();
        match q.to_list() {
            Err(OrmError::Translation(msg)) => assert_eq!(msg, "Joins are not supported."),
            other => panic!("unexpected {other:?}"),
        }
    }
}
