//! Repository layer: entity-scoped database operations.
//!
//! One sub-module per table family; all public functions are re-exported here.
//! Dynamic list queries are assembled with [`SqlFilter`], which also
//! translates access [`Scope`]s into SQL.

mod assessment;
mod audit;
mod communication;
mod file;
mod patient;
mod template;
mod token;
mod user;
mod visit;

use rusqlite::types::ToSql;

use crate::access::Scope;

// Re-export all public items from sub-modules
pub use assessment::*;
pub use audit::*;
pub use communication::*;
pub use file::*;
pub use patient::*;
pub use template::*;
pub use token::*;
pub use user::*;
pub use visit::*;

/// Row builders shared by tests across the crate.
#[cfg(test)]
pub(crate) mod fixtures {
    pub(crate) use super::patient::tests::make_patient;
    pub(crate) use super::user::tests::make_user;
    pub(crate) use super::visit::tests::make_visit;
}

/// A child record (visit, assessment, file) with its patient context and
/// the display name of the user who owns it.
#[derive(Debug, Clone)]
pub struct Joined<T> {
    pub record: T,
    pub patient_name: String,
    pub patient_physician: Option<uuid::Uuid>,
    pub user_name: String,
}

/// Which table a scoped query is rooted at. The patients table is always
/// reachable under alias `p`.
#[derive(Debug, Clone, Copy)]
pub(crate) enum ScopeTarget {
    Patients,
    /// Child records; `clinician` names the clinician column when the table has one.
    Records { clinician: Option<&'static str> },
    /// Threads; names the thread id column.
    Threads { thread_id: &'static str },
}

/// Incrementally built `WHERE` clause with numbered positional parameters.
pub(crate) struct SqlFilter {
    sql: String,
    params: Vec<Box<dyn ToSql>>,
}

impl SqlFilter {
    pub fn new() -> Self {
        Self {
            sql: String::from(" WHERE 1=1"),
            params: Vec::new(),
        }
    }

    fn next_index(&self) -> usize {
        self.params.len() + 1
    }

    /// Append ` AND {expr} {op} ?n`.
    pub fn and(&mut self, expr: &str, op: &str, value: impl ToSql + 'static) -> &mut Self {
        let idx = self.next_index();
        self.sql.push_str(&format!(" AND {expr} {op} ?{idx}"));
        self.params.push(Box::new(value));
        self
    }

    pub fn and_eq(&mut self, expr: &str, value: impl ToSql + 'static) -> &mut Self {
        self.and(expr, "=", value)
    }

    /// Case-insensitive substring match against any of `exprs`.
    pub fn and_contains_any(&mut self, exprs: &[&str], needle: &str) -> &mut Self {
        let needle = needle.trim();
        if needle.is_empty() || exprs.is_empty() {
            return self;
        }
        let idx = self.next_index();
        let ors: Vec<String> = exprs
            .iter()
            .map(|e| format!("{e} LIKE ?{idx} ESCAPE '\\'"))
            .collect();
        self.sql.push_str(&format!(" AND ({})", ors.join(" OR ")));
        self.params.push(Box::new(format!("%{}%", escape_like(needle))));
        self
    }

    pub fn and_raw(&mut self, fragment: &str) -> &mut Self {
        self.sql.push_str(" AND ");
        self.sql.push_str(fragment);
        self
    }

    /// Restrict rows to what `scope` admits.
    pub fn scope(&mut self, scope: &Scope, target: ScopeTarget) -> &mut Self {
        match (*scope, target) {
            (Scope::All, _) => self,
            (Scope::ActivePatients, ScopeTarget::Patients) => self.and_raw("p.is_active = 1"),
            (Scope::ActivePatients, _) => self,
            (Scope::AssignedPatients(user), ScopeTarget::Patients) => self
                .and_raw("p.is_active = 1")
                .and_eq("p.assigned_physician", user.to_string()),
            (Scope::AssignedPatients(user), _) | (Scope::PatientsUnderCare(user), _) => {
                self.and_eq("p.assigned_physician", user.to_string())
            }
            (Scope::OwnRecords(user), ScopeTarget::Records { clinician: Some(col) }) => {
                self.and_eq(col, user.to_string())
            }
            (Scope::Participant(user), ScopeTarget::Threads { thread_id }) => {
                let idx = self.next_index();
                self.sql.push_str(&format!(
                    " AND EXISTS (SELECT 1 FROM thread_participants tp
                                  WHERE tp.thread_id = {thread_id} AND tp.user_id = ?{idx})"
                ));
                self.params.push(Box::new(user.to_string()));
                self
            }
            // A scope that cannot apply to this table admits nothing.
            _ => self.and_raw("0"),
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> Vec<&dyn ToSql> {
        self.params.iter().map(|p| p.as_ref()).collect()
    }

    /// `base` with this filter's clause, ordering and a LIMIT/OFFSET window.
    /// Limits are integers, so they are inlined rather than bound.
    pub fn paged(&self, base: &str, order_by: &str, limit: u32, offset: u32) -> String {
        format!("{base}{} ORDER BY {order_by} LIMIT {limit} OFFSET {offset}", self.sql)
    }
}

/// Escape LIKE wildcards so user input matches literally; pair with `ESCAPE '\'`.
fn escape_like(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Count rows matching `filter` for a `FROM ... JOIN ...` clause.
pub(crate) fn count_rows(
    conn: &rusqlite::Connection,
    from: &str,
    filter: &SqlFilter,
) -> Result<i64, super::DatabaseError> {
    let sql = format!("SELECT COUNT(*) {from}{}", filter.sql());
    let count = conn.query_row(&sql, filter.params().as_slice(), |row| row.get(0))?;
    Ok(count)
}
