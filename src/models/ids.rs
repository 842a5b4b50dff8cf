use rusqlite::types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Declare a row identifier newtype.
///
/// Each table gets its own id type so a template stage id can never be
/// handed to a query that expects a project stage id. The wrapped value is
/// the SQLite rowid.
macro_rules! row_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            pub fn get(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                $name(id)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> i64 {
                id.0
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.0))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                i64::column_result(value).map($name)
            }
        }
    };
}

row_id!(
    /// Identifier of a `process_templates` row
    TemplateId
);
row_id!(
    /// Identifier of a `stage_definitions` row
    StageDefId
);
row_id!(
    /// Identifier of a `projects` row
    ProjectId
);
row_id!(
    /// Identifier of a `project_stages` row
    StageInstanceId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_is_bare_number() {
        assert_eq!(TemplateId(7).to_string(), "7");
        assert_eq!(StageInstanceId(42).to_string(), "42");
    }

    #[test]
    fn test_serializes_transparently() {
        let json = serde_json::to_string(&StageDefId(3)).unwrap();
        assert_eq!(json, "3");
        let back: StageDefId = serde_json::from_str("3").unwrap();
        assert_eq!(back, StageDefId(3));
    }

    #[test]
    fn test_sql_round_trip() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let id: ProjectId = conn
            .query_row("SELECT ?1", [ProjectId(99)], |row| row.get(0))
            .unwrap();
        assert_eq!(id, ProjectId(99));
    }
}
