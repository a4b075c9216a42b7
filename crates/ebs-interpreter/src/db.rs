//! Database collaborator contracts.
//!
//! The interpreter never talks to a real driver; hosts supply an adapter
//! implementing these traits. Errors cross the boundary as plain strings
//! and are wrapped into runtime errors at the call site.

use indexmap::IndexMap;
use smol_str::SmolStr;

use crate::Value;

pub type HostResult<T> = std::result::Result<T, String>;

/// Entry point for opening connections from a connection spec string.
pub trait DbAdapter: Send + Sync {
    fn connect(&self, spec: &str) -> HostResult<Box<dyn DbConnection>>;
}

/// An open connection able to run parameterized selects.
pub trait DbConnection: Send + Sync {
    fn open_cursor(&self, sql: &str, args: &[Value]) -> HostResult<Box<dyn DbCursor>>;

    /// Run a select to completion and hand back all rows at once.
    fn execute_select(&self, sql: &str, args: &[Value]) -> HostResult<Vec<Row>>;

    fn close(&self) -> HostResult<()>;
}

/// Forward-only row cursor.
pub trait DbCursor: Send {
    fn has_next(&mut self) -> HostResult<bool>;

    fn next_row(&mut self) -> HostResult<Option<Row>>;

    fn close(&mut self) -> HostResult<()>;
}

/// One result row, column order preserved.
pub type Row = IndexMap<SmolStr, Value>;

/// Adapter used when the host wires no database; every operation fails.
#[derive(Debug, Default)]
pub struct NoopAdapter;

impl DbAdapter for NoopAdapter {
    fn connect(&self, _spec: &str) -> HostResult<Box<dyn DbConnection>> {
        Err("No database adapter configured.".to_string())
    }
}

/// In-memory adapter for tests: every select yields the rows it was
/// seeded with, regardless of the SQL text.
#[derive(Debug, Default)]
pub struct MemoryAdapter {
    rows: Vec<Row>,
}

impl MemoryAdapter {
    pub fn with_rows(rows: Vec<Row>) -> Self {
        MemoryAdapter { rows }
    }
}

impl DbAdapter for MemoryAdapter {
    fn connect(&self, _spec: &str) -> HostResult<Box<dyn DbConnection>> {
        Ok(Box::new(MemoryConnection {
            rows: self.rows.clone(),
        }))
    }
}

struct MemoryConnection {
    rows: Vec<Row>,
}

impl DbConnection for MemoryConnection {
    fn open_cursor(&self, _sql: &str, _args: &[Value]) -> HostResult<Box<dyn DbCursor>> {
        Ok(Box::new(MemoryCursor {
            rows: self.rows.clone().into_iter(),
        }))
    }

    fn execute_select(&self, _sql: &str, _args: &[Value]) -> HostResult<Vec<Row>> {
        Ok(self.rows.clone())
    }

    fn close(&self) -> HostResult<()> {
        Ok(())
    }
}

struct MemoryCursor {
    rows: std::vec::IntoIter<Row>,
}

impl DbCursor for MemoryCursor {
    fn has_next(&mut self) -> HostResult<bool> {
        Ok(!self.rows.as_slice().is_empty())
    }

    fn next_row(&mut self) -> HostResult<Option<Row>> {
        Ok(self.rows.next())
    }

    fn close(&mut self) -> HostResult<()> {
        Ok(())
    }
}
