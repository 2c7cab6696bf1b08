use fxq_common::{FxqError, Result, SqlDialect};
use sqlparser::ast::Statement;
use sqlparser::dialect::{Dialect, GenericDialect, MsSqlDialect};
use sqlparser::parser::Parser;

pub use sqlparser::ast;

/// Parse `sql` into statements using the configured dialect.
///
/// Parser failures are surfaced unchanged as [`FxqError::Parse`].
pub fn parse_sql(sql: &str, dialect: SqlDialect) -> Result<Vec<Statement>> {
    let dialect: Box<dyn Dialect> = match dialect {
        SqlDialect::MsSql => Box::new(MsSqlDialect {}),
        SqlDialect::Generic => Box::new(GenericDialect {}),
    };
    Parser::parse_sql(dialect.as_ref(), sql).map_err(|e| FxqError::Parse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tsql_top_and_hints() {
        let stmts = parse_sql(
            "SELECT TOP 10 name FROM account WITH (NOLOCK); DELETE FROM contact",
            SqlDialect::MsSql,
        )
        .expect("parse");
        assert_eq!(stmts.len(), 2);
        assert!(matches!(stmts[0], Statement::Query(_)));
    }

    #[test]
    fn parse_errors_are_classified() {
        let err = parse_sql("SELEC name FROM", SqlDialect::MsSql).expect_err("bad sql");
        assert!(matches!(err, FxqError::Parse(_)), "got {err:?}");
    }
}
