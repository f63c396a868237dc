//! The four standard SQL tools

use std::sync::LazyLock;

use askdb_agent::tool::{Tool, ToolError, ToolOutput};
use async_trait::async_trait;
use regex::Regex;

use super::database::{Database, MAX_RESULT_ROWS};

/// Lists the user tables
pub struct ListTablesTool {
    db: Database,
}

impl ListTablesTool {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Tool for ListTablesTool {
    fn name(&self) -> &str {
        "sql_db_list_tables"
    }

    fn description(&self) -> &str {
        "Input is an empty string, output is a comma-separated list of tables in the database."
    }

    async fn invoke(&self, _input: &str) -> Result<ToolOutput, ToolError> {
        let tables = self.db.table_names().await?;
        if tables.is_empty() {
            return Ok(ToolOutput::text("The database has no tables."));
        }
        Ok(ToolOutput::text(tables.join(", ")))
    }
}

/// Schema and sample rows for named tables
pub struct SchemaTool {
    db: Database,
}

impl SchemaTool {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Tool for SchemaTool {
    fn name(&self) -> &str {
        "sql_db_schema"
    }

    fn description(&self) -> &str {
        "Input to this tool is a comma-separated list of tables, output is the schema and sample \
         rows for those tables. Be sure that the tables actually exist by calling \
         sql_db_list_tables first! Example Input: table1, table2, table3"
    }

    async fn invoke(&self, input: &str) -> Result<ToolOutput, ToolError> {
        let tables: Vec<String> = input
            .split(',')
            .map(|t| t.trim().trim_matches(|c: char| matches!(c, '"' | '\'' | '`')))
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();
        if tables.is_empty() {
            return Err(ToolError::invalid_input(
                "expected a comma-separated list of table names",
            ));
        }
        Ok(ToolOutput::text(self.db.schema(tables).await?))
    }
}

/// Runs a query and returns the rows
pub struct QueryTool {
    db: Database,
}

impl QueryTool {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Tool for QueryTool {
    fn name(&self) -> &str {
        "sql_db_query"
    }

    fn description(&self) -> &str {
        "Input to this tool is a detailed and correct SQL query, output is a result from the \
         database. If the query is not correct, an error message will be returned. If an error \
         is returned, rewrite the query, check the query, and try again. If you encounter an \
         issue with an unknown column, use sql_db_schema to query the correct table fields."
    }

    async fn invoke(&self, input: &str) -> Result<ToolOutput, ToolError> {
        let sql = input.trim();
        if sql.is_empty() {
            return Err(ToolError::invalid_input("expected a SQL query"));
        }
        tracing::debug!("sql_db_query: {}", sql);
        let result = self.db.run_query(sql, MAX_RESULT_ROWS).await?;
        Ok(ToolOutput::text(result.to_observation()))
    }
}

static NOT_IN_SUBQUERY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bNOT\s+IN\s*\(\s*SELECT\b").unwrap());
static NULL_COMPARISON_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(?:!=|<>|=)\s*NULL\b").unwrap());
static UNION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bUNION\b(\s+ALL\b)?").unwrap());
static BETWEEN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bBETWEEN\b").unwrap());

/// Static checks for common mistakes
pub fn lint_query(sql: &str) -> Vec<&'static str> {
    let mut issues = Vec::new();
    if NOT_IN_SUBQUERY_RE.is_match(sql) {
        issues.push(
            "NOT IN with a subquery matches nothing if the subquery returns a NULL; \
             consider NOT EXISTS",
        );
    }
    if NULL_COMPARISON_RE.is_match(sql) {
        issues.push("comparisons with NULL are never true; use IS NULL or IS NOT NULL");
    }
    if UNION_RE
        .captures_iter(sql)
        .any(|caps| caps.get(1).is_none())
    {
        issues.push("UNION removes duplicate rows; use UNION ALL to keep them");
    }
    if BETWEEN_RE.is_match(sql) {
        issues.push("BETWEEN includes both endpoints; check the range boundaries");
    }

    let mut depth: i64 = 0;
    let mut in_string = false;
    for c in sql.chars() {
        match c {
            '\'' => in_string = !in_string,
            '(' if !in_string => depth += 1,
            ')' if !in_string => depth -= 1,
            _ => {}
        }
        if depth < 0 {
            break;
        }
    }
    if in_string {
        issues.push("unterminated string literal");
    } else if depth != 0 {
        issues.push("unbalanced parentheses");
    }
    issues
}

/// Checks a query before it is run
pub struct QueryCheckerTool {
    db: Database,
}

impl QueryCheckerTool {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Tool for QueryCheckerTool {
    fn name(&self) -> &str {
        "sql_db_query_checker"
    }

    fn description(&self) -> &str {
        "Use this tool to double check if your query is correct before executing it. Always use \
         this tool before executing a query with sql_db_query!"
    }

    async fn invoke(&self, input: &str) -> Result<ToolOutput, ToolError> {
        let sql = input.trim();
        if sql.is_empty() {
            return Err(ToolError::invalid_input("expected a SQL query"));
        }

        let issues = lint_query(sql);
        self.db.explain(sql).await?;

        if issues.is_empty() {
            return Ok(ToolOutput::text(sql));
        }
        let mut text = format!("{}\n\nPossible issues:", sql);
        for issue in issues {
            text.push_str("\n- ");
            text.push_str(issue);
        }
        Ok(ToolOutput::text(text))
    }
}
