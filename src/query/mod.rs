//! Query construction
//!
//! Turns command-line input into the text sent to the data source:
//! - a table name with optional WHERE clause and column list, or a full
//!   `SELECT` statement passed through verbatim
//! - a routine call whose first placeholder receives the output cursor
//! - `label:query` sheet arguments
//! - the whole of standard input when nothing else is given

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{QueryBuildError, Result};

/// A query ready to be executed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryRequest {
    /// Plain statement returning rows
    Sql(String),
    /// Call block returning an output cursor
    Call(CallQuery),
}

impl QueryRequest {
    /// Statement or block text, for logging
    pub fn text(&self) -> &str {
        match self {
            QueryRequest::Sql(sql) => sql,
            QueryRequest::Call(call) => &call.block,
        }
    }
}

/// Call block with the values bound to its input placeholders
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallQuery {
    /// e.g. `BEGIN :1 := pkg.fn(a=>:2, b=>:3); END;`
    pub block: String,
    /// Values for placeholders `:2`, `:3`, ... in order
    pub params: Vec<String>,
}

/// Build a SELECT statement from its parts.
///
/// A `table` that already starts with `SELECT ` (any case) is returned as-is.
///
/// # Arguments
/// * `table` - Table or view name, or a complete SELECT statement
/// * `where_clause` - Optional filter, without the `WHERE` keyword
/// * `columns` - Columns to select; empty means `*`
///
/// # Returns
/// * `Result<String>` - Statement text, or a build error when no table is given
pub fn build_query(table: &str, where_clause: Option<&str>, columns: &[String]) -> Result<String> {
    let table = table.trim();
    if table.len() > 6 && table.get(..7).is_some_and(|p| p.eq_ignore_ascii_case("SELECT ")) {
        return Ok(table.to_string());
    }
    if table.is_empty() {
        return Err(QueryBuildError::MissingTable.into());
    }

    let cols = if columns.is_empty() {
        "*".to_string()
    } else {
        columns.join(", ")
    };

    Ok(match where_clause.map(str::trim).filter(|w| !w.is_empty()) {
        Some(filter) => format!("SELECT {cols} FROM {table} WHERE {filter}"),
        None => format!("SELECT {cols} FROM {table}"),
    })
}

/// Build a call block for a routine returning a cursor.
///
/// Placeholder `:1` receives the cursor; each `name=value` argument is bound
/// by name to the next placeholder. An argument without `=` binds the empty
/// string.
///
/// # Arguments
/// * `routine` - Qualified routine name
/// * `args` - `name=value` pairs
///
/// # Returns
/// * `Result<CallQuery>` - Block text and parameter values
pub fn build_call(routine: &str, args: &[String]) -> Result<CallQuery> {
    let routine = routine.trim();
    if routine.is_empty() {
        return Err(QueryBuildError::MissingRoutine.into());
    }

    let mut bindings = Vec::with_capacity(args.len());
    let mut params = Vec::with_capacity(args.len());
    for (i, arg) in args.iter().enumerate() {
        let (name, value) = arg.split_once('=').unwrap_or((arg.as_str(), ""));
        let name = name.trim();
        if name.is_empty() {
            return Err(QueryBuildError::InvalidArgument(arg.clone()).into());
        }
        bindings.push(format!("{name}=>:{}", i + 2));
        params.push(value.to_string());
    }

    Ok(CallQuery {
        block: format!("BEGIN :1 := {routine}({}); END;", bindings.join(", ")),
        params,
    })
}

/// One `--sheet` argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetSpec {
    /// Text before the first colon, if any and non-empty
    pub label: Option<String>,
    pub query: String,
}

impl SheetSpec {
    /// Sheet name: the label, or the 1-based position when unlabelled
    pub fn name(&self, index: usize) -> String {
        match &self.label {
            Some(label) => label.clone(),
            None => (index + 1).to_string(),
        }
    }
}

/// Split a `label:query` sheet argument at the first colon
pub fn parse_sheet_spec(spec: &str) -> SheetSpec {
    match spec.split_once(':') {
        Some((label, query)) => SheetSpec {
            label: (!label.is_empty()).then(|| label.to_string()),
            query: query.to_string(),
        },
        None => SheetSpec {
            label: None,
            query: spec.to_string(),
        },
    }
}

/// Read a whole query from `input` (standard input in the binary)
pub async fn read_query<R: AsyncRead + Unpin>(mut input: R) -> Result<String> {
    let mut query = String::new();
    input.read_to_string(&mut query).await?;
    Ok(query)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DumpError;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_build_query_from_parts() {
        assert_eq!(build_query("T_able", None, &[]).unwrap(), "SELECT * FROM T_able");
        assert_eq!(
            build_query("T_able", Some("F_ield=1"), &[]).unwrap(),
            "SELECT * FROM T_able WHERE F_ield=1"
        );
        assert_eq!(
            build_query(" users ", Some(""), &strings(&["id", "name"])).unwrap(),
            "SELECT id, name FROM users"
        );
    }

    #[test]
    fn test_build_query_passes_select_through() {
        let sql = "  select id from users where id > 3 ";
        assert_eq!(
            build_query(sql, Some("ignored"), &[]).unwrap(),
            "select id from users where id > 3"
        );
    }

    #[test]
    fn test_build_query_requires_table() {
        let err = build_query("", Some("x=1"), &[]).unwrap_err();
        assert!(matches!(err, DumpError::QueryBuild(QueryBuildError::MissingTable)));
    }

    #[test]
    fn test_build_call() {
        let call = build_call("DB_lista.csv", &strings(&["p_a=1", "p_b=c"])).unwrap();
        assert_eq!(call.block, "BEGIN :1 := DB_lista.csv(p_a=>:2, p_b=>:3); END;");
        assert_eq!(call.params, strings(&["1", "c"]));
    }

    #[test]
    fn test_build_call_argument_without_value() {
        let call = build_call("pkg.fn", &strings(&["p_flag", "p_x=a=b"])).unwrap();
        assert_eq!(call.block, "BEGIN :1 := pkg.fn(p_flag=>:2, p_x=>:3); END;");
        assert_eq!(call.params, strings(&["", "a=b"]));

        let call = build_call("pkg.fn", &[]).unwrap();
        assert_eq!(call.block, "BEGIN :1 := pkg.fn(); END;");
    }

    #[test]
    fn test_build_call_rejects_bad_input() {
        assert!(matches!(
            build_call(" ", &[]).unwrap_err(),
            DumpError::QueryBuild(QueryBuildError::MissingRoutine)
        ));
        assert!(matches!(
            build_call("pkg.fn", &strings(&["=1"])).unwrap_err(),
            DumpError::QueryBuild(QueryBuildError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_parse_sheet_spec() {
        let spec = parse_sheet_spec("Users:SELECT * FROM users");
        assert_eq!(spec.label.as_deref(), Some("Users"));
        assert_eq!(spec.query, "SELECT * FROM users");
        assert_eq!(spec.name(0), "Users");

        let spec = parse_sheet_spec(":SELECT 1");
        assert_eq!(spec.label, None);
        assert_eq!(spec.query, "SELECT 1");
        assert_eq!(spec.name(1), "2");

        let spec = parse_sheet_spec("SELECT 2");
        assert_eq!(spec.query, "SELECT 2");
        assert_eq!(spec.name(2), "3");

        // Only the first colon separates
        let spec = parse_sheet_spec("T:SELECT '10:30' FROM dual");
        assert_eq!(spec.query, "SELECT '10:30' FROM dual");
    }

    #[tokio::test]
    async fn test_read_query() {
        let input: &[u8] = b"SELECT 1\nFROM dual\n";
        assert_eq!(read_query(input).await.unwrap(), "SELECT 1\nFROM dual\n");
    }
}
