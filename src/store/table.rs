//! Table definitions with forward-only schema evolution.

/// A column added to a table after its first release.
///
/// Applied with `ALTER TABLE ... ADD COLUMN` when the column is missing from
/// an existing database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnAddition {
    pub column: &'static str,
    /// Column type and constraints, e.g. `"TEXT NOT NULL DEFAULT ''"`.
    pub definition: &'static str,
}

/// Declarative description of one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableDef {
    pub name: &'static str,
    /// The column list, as it appears between the parentheses of
    /// `CREATE TABLE`.
    pub columns: &'static str,
    /// Index statements, run with `IF NOT EXISTS` semantics.
    pub indexes: &'static [&'static str],
    /// Columns added since the table was first created.
    pub additions: &'static [ColumnAddition],
}

impl TableDef {
    pub(crate) fn create_sql(&self) -> String {
        format!("CREATE TABLE IF NOT EXISTS {} ({})", self.name, self.columns)
    }

    pub(crate) fn add_column_sql(&self, addition: &ColumnAddition) -> String {
        format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            self.name, addition.column, addition.definition
        )
    }
}
