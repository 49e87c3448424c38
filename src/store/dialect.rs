//! SQL dialect differences, isolated behind one small trait.
//!
//! The store builds paginated queries through `build_select_first_sql`
//! and stays dialect-agnostic otherwise.

pub trait SqlDialect: Send + Sync {
    /// Wrap a `columns FROM table WHERE ...` fragment into a query that
    /// returns at most `limit` rows, optionally ordered.
    fn build_select_first_sql(&self, limit: usize, order_by: Option<&str>, core_sql: &str) -> String;

    /// Whether `X IN (?,?,...)` scans are worth batching.
    fn supports_in_array(&self) -> bool;
}

pub struct SqliteDialect;

impl SqlDialect for SqliteDialect {
    fn build_select_first_sql(&self, limit: usize, order_by: Option<&str>, core_sql: &str) -> String {
        match order_by {
            Some(order) => format!("SELECT {core_sql} ORDER BY {order} LIMIT {limit}"),
            None => format!("SELECT {core_sql} LIMIT {limit}"),
        }
    }

    fn supports_in_array(&self) -> bool {
        true
    }
}
