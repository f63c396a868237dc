//! Chart tool: runs a query and writes a Vega-Lite specification, or a
//! Graphviz graph for network charts

use std::path::PathBuf;
use std::str::FromStr;

use askdb_agent::tool::{Artifact, ArtifactKind, Tool, ToolError, ToolOutput, parse_input};
use async_trait::async_trait;
use rusqlite::types::Value;
use serde::Deserialize;
use serde_json::{Map, json};

use super::database::{Database, QueryResult, format_value};
use super::diagram::escape_id;

const VEGA_LITE_SCHEMA: &str = "https://vega.github.io/schema/vega-lite/v5.json";

/// Rows read from the query and embedded in a chart file
pub const MAX_CHART_ROWS: usize = 5_000;

fn default_title() -> String {
    "Database Visualization".to_string()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    #[default]
    Bar,
    Line,
    Scatter,
    Pie,
    Histogram,
    Heatmap,
    Network,
}

impl ChartType {
    pub const ALL: [&'static str; 7] = [
        "bar",
        "line",
        "scatter",
        "pie",
        "histogram",
        "heatmap",
        "network",
    ];
}

impl FromStr for ChartType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "bar" => Ok(ChartType::Bar),
            "line" => Ok(ChartType::Line),
            "scatter" => Ok(ChartType::Scatter),
            "pie" => Ok(ChartType::Pie),
            "histogram" | "hist" => Ok(ChartType::Histogram),
            "heatmap" => Ok(ChartType::Heatmap),
            "network" | "graph" => Ok(ChartType::Network),
            other => Err(format!("unknown chart type '{}'", other)),
        }
    }
}

/// Structured chart request
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChartRequest {
    pub query: String,
    #[serde(default)]
    pub chart_type: ChartType,
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default)]
    pub x_column: Option<String>,
    #[serde(default)]
    pub y_column: Option<String>,
}

impl ChartRequest {
    /// Accept a JSON object or the `query|chart_type|title|x_column|y_column` form
    pub fn parse(input: &str) -> Result<Self, ToolError> {
        let input = input.trim();
        if input.starts_with('{') {
            return parse_input(input);
        }

        let parts: Vec<&str> = input.split('|').map(str::trim).collect();
        if parts.len() < 2 || parts[0].is_empty() {
            return Err(ToolError::invalid_input(
                "expected a JSON object or query|chart_type|title|x_column|y_column",
            ));
        }
        let field = |i: usize| {
            parts
                .get(i)
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string())
        };

        Ok(Self {
            query: parts[0].to_string(),
            // Unknown types fall back to a bar chart
            chart_type: parts[1].parse().unwrap_or_else(|e| {
                tracing::warn!("{}, drawing a bar chart instead", e);
                ChartType::Bar
            }),
            title: field(2).unwrap_or_else(default_title),
            x_column: field(3),
            y_column: field(4),
        })
    }
}

/// Builds a chart from query results
pub struct ChartTool {
    db: Database,
    output_dir: PathBuf,
}

impl ChartTool {
    pub fn new(db: Database, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            db,
            output_dir: output_dir.into(),
        }
    }
}

#[async_trait]
impl Tool for ChartTool {
    fn name(&self) -> &str {
        "create_database_visualization"
    }

    fn description(&self) -> &str {
        "Execute a SQL query and create a chart from the results. Input is a JSON object: \
         {\"query\": \"SELECT ...\", \"chart_type\": \"bar|line|scatter|pie|histogram|heatmap|network\", \
         \"title\": \"...\", \"x_column\": \"...\", \"y_column\": \"...\"}. Only query is required. \
         A network chart links source and target values from two columns and labels each \
         link with a numeric third column when there is one."
    }

    fn input_schema(&self) -> Option<serde_json::Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "minLength": 1 },
                "chart_type": { "type": "string", "enum": ChartType::ALL },
                "title": { "type": "string" },
                "x_column": { "type": ["string", "null"] },
                "y_column": { "type": ["string", "null"] }
            },
            "required": ["query"],
            "additionalProperties": false
        }))
    }

    async fn invoke(&self, input: &str) -> Result<ToolOutput, ToolError> {
        let request = ChartRequest::parse(input)?;
        let result = self.db.run_query(&request.query, MAX_CHART_ROWS).await?;
        if result.is_empty() {
            return Ok(ToolOutput::text("No data returned from query"));
        }

        let (prefix, extension, content) = match request.chart_type {
            ChartType::Network => ("network", "dot", render_network(&request, &result)?),
            _ => {
                let spec = build_spec(&request, &result)?;
                let content = serde_json::to_string_pretty(&spec)
                    .map_err(|e| ToolError::failed(e.to_string()))?;
                ("chart", "vl.json", content)
            }
        };

        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| ToolError::failed(format!("cannot create {}: {}", self.output_dir.display(), e)))?;
        let filename = format!(
            "{}_{}_{}.{}",
            prefix,
            chrono::Local::now().format("%Y%m%d_%H%M%S"),
            &uuid::Uuid::new_v4().simple().to_string()[..8],
            extension
        );
        let path = self.output_dir.join(filename);
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| ToolError::failed(format!("cannot write {}: {}", path.display(), e)))?;

        tracing::debug!("Wrote {:?} chart to {}", request.chart_type, path.display());
        let mut text = format!("Visualization created successfully: {}", path.display());
        if result.truncated {
            text.push_str(&format!(
                "\nOnly the first {} rows were plotted.",
                MAX_CHART_ROWS
            ));
        }
        Ok(ToolOutput::text(text)
            .with_artifact(Artifact::new(ArtifactKind::Chart, path).with_title(request.title)))
    }
}

fn column(result: &QueryResult, name: &str) -> Result<usize, ToolError> {
    result.column_index(name).ok_or_else(|| {
        ToolError::invalid_input(format!(
            "column '{}' not found. Available columns: {}",
            name,
            result.columns.join(", ")
        ))
    })
}

/// X defaults to the first column, Y to the first other numeric column
fn pick_columns(
    request: &ChartRequest,
    result: &QueryResult,
) -> Result<(usize, Option<usize>), ToolError> {
    let x = match request.x_column {
        Some(ref name) => column(result, name)?,
        None => 0,
    };
    let y = match request.y_column {
        Some(ref name) => Some(column(result, name)?),
        None => (0..result.columns.len())
            .find(|&i| i != x && result.is_numeric(i))
            .or_else(|| (result.columns.len() > 1).then(|| if x == 1 { 0 } else { 1 })),
    };
    Ok((x, y))
}

fn field_type(result: &QueryResult, index: usize) -> &'static str {
    if result.is_numeric(index) {
        "quantitative"
    } else {
        "nominal"
    }
}

fn json_value(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Integer(i) => json!(i),
        Value::Real(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        other => serde_json::Value::String(format_value(other)),
    }
}

fn records(result: &QueryResult) -> Vec<serde_json::Value> {
    result
        .rows
        .iter()
        .map(|row| {
            let mut record = Map::new();
            for (name, value) in result.columns.iter().zip(row) {
                record.insert(name.clone(), json_value(value));
            }
            serde_json::Value::Object(record)
        })
        .collect()
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Integer(i) => Some(*i as f64),
        Value::Real(f) => Some(*f),
        _ => None,
    }
}

/// Pearson correlation over rows where both values are present
fn correlation(result: &QueryResult, a: usize, b: usize) -> Option<f64> {
    let pairs: Vec<(f64, f64)> = result
        .rows
        .iter()
        .filter_map(|row| Some((as_f64(&row[a])?, as_f64(&row[b])?)))
        .collect();
    if pairs.len() < 2 {
        return None;
    }
    let n = pairs.len() as f64;
    let mean_a = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_b = pairs.iter().map(|p| p.1).sum::<f64>() / n;
    let (mut cov, mut var_a, mut var_b) = (0.0, 0.0, 0.0);
    for (x, y) in &pairs {
        cov += (x - mean_a) * (y - mean_b);
        var_a += (x - mean_a).powi(2);
        var_b += (y - mean_b).powi(2);
    }
    if var_a == 0.0 || var_b == 0.0 {
        return None;
    }
    Some(cov / (var_a.sqrt() * var_b.sqrt()))
}

/// Undirected Graphviz graph of source/target pairs. Edges are labelled
/// with the first other numeric column when there is one.
pub fn render_network(request: &ChartRequest, result: &QueryResult) -> Result<String, ToolError> {
    if result.columns.len() < 2 {
        return Err(ToolError::invalid_input(
            "a network chart needs a source and a target column",
        ));
    }
    let source = match request.x_column {
        Some(ref name) => column(result, name)?,
        None => 0,
    };
    let target = match request.y_column {
        Some(ref name) => column(result, name)?,
        None => (0..result.columns.len())
            .find(|&i| i != source)
            .unwrap_or(source),
    };
    let weight = (0..result.columns.len())
        .find(|&i| i != source && i != target && result.is_numeric(i));

    let mut dot = format!(
        "strict graph network {{\n  label=\"{}\";\n  layout=neato;\n  overlap=false;\n  node [shape=ellipse, style=filled, fillcolor=lightblue, fontname=\"Helvetica\"];\n",
        escape_id(&request.title)
    );
    for row in &result.rows {
        let from = escape_id(&format_value(&row[source]));
        let to = escape_id(&format_value(&row[target]));
        match weight.map(|i| &row[i]).filter(|v| as_f64(v).is_some()) {
            Some(value) => dot.push_str(&format!(
                "  \"{}\" -- \"{}\" [label=\"{}\"];\n",
                from,
                to,
                format_value(value)
            )),
            None => dot.push_str(&format!("  \"{}\" -- \"{}\";\n", from, to)),
        }
    }
    dot.push_str("}\n");
    Ok(dot)
}

pub fn build_spec(
    request: &ChartRequest,
    result: &QueryResult,
) -> Result<serde_json::Value, ToolError> {
    let (x, y) = pick_columns(request, result)?;
    let x_name = result.columns[x].as_str();
    let needs_y = || {
        y.ok_or_else(|| {
            ToolError::invalid_input(format!(
                "a {:?} chart needs a value column; the query returned only '{}'",
                request.chart_type, x_name
            ))
        })
    };

    let (mark, encoding, values) = match request.chart_type {
        ChartType::Bar => {
            let y = needs_y()?;
            (
                json!("bar"),
                json!({
                    "x": { "field": x_name, "type": "nominal", "sort": null },
                    "y": { "field": result.columns[y], "type": field_type(result, y) }
                }),
                records(result),
            )
        }
        ChartType::Line => {
            let y = needs_y()?;
            let x_type = if result.is_numeric(x) { "quantitative" } else { "ordinal" };
            (
                json!({ "type": "line", "point": true }),
                json!({
                    "x": { "field": x_name, "type": x_type },
                    "y": { "field": result.columns[y], "type": field_type(result, y) }
                }),
                records(result),
            )
        }
        ChartType::Scatter => {
            let y = needs_y()?;
            (
                json!("point"),
                json!({
                    "x": { "field": x_name, "type": field_type(result, x) },
                    "y": { "field": result.columns[y], "type": field_type(result, y) }
                }),
                records(result),
            )
        }
        ChartType::Pie => {
            let y = needs_y()?;
            (
                json!("arc"),
                json!({
                    "theta": { "field": result.columns[y], "type": "quantitative" },
                    "color": { "field": x_name, "type": "nominal" }
                }),
                records(result),
            )
        }
        ChartType::Histogram => {
            let field = y
                .filter(|&i| result.is_numeric(i))
                .or_else(|| (0..result.columns.len()).find(|&i| result.is_numeric(i)))
                .ok_or_else(|| ToolError::invalid_input("a histogram needs a numeric column"))?;
            (
                json!("bar"),
                json!({
                    "x": { "field": result.columns[field], "bin": { "maxbins": 20 }, "type": "quantitative" },
                    "y": { "aggregate": "count", "type": "quantitative", "title": "Frequency" }
                }),
                records(result),
            )
        }
        ChartType::Heatmap => {
            let numeric: Vec<usize> = (0..result.columns.len())
                .filter(|&i| result.is_numeric(i))
                .collect();
            if numeric.len() < 2 {
                return Err(ToolError::invalid_input(
                    "a heatmap needs at least two numeric columns",
                ));
            }
            let mut cells = Vec::with_capacity(numeric.len() * numeric.len());
            for &a in &numeric {
                for &b in &numeric {
                    cells.push(json!({
                        "row": result.columns[a],
                        "column": result.columns[b],
                        "correlation": correlation(result, a, b),
                    }));
                }
            }
            (
                json!("rect"),
                json!({
                    "x": { "field": "column", "type": "nominal", "sort": null },
                    "y": { "field": "row", "type": "nominal", "sort": null },
                    "color": {
                        "field": "correlation",
                        "type": "quantitative",
                        "scale": { "scheme": "redblue", "domain": [-1, 1], "reverse": true }
                    }
                }),
                cells,
            )
        }
        ChartType::Network => {
            return Err(ToolError::invalid_input(
                "network charts are written as Graphviz DOT, not Vega-Lite",
            ));
        }
    };

    Ok(json!({
        "$schema": VEGA_LITE_SCHEMA,
        "title": request.title,
        "data": { "values": values },
        "mark": mark,
        "encoding": encoding,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::database::tests::open_sample;

    fn request(query: &str, chart_type: ChartType) -> ChartRequest {
        ChartRequest {
            query: query.into(),
            chart_type,
            title: default_title(),
            x_column: None,
            y_column: None,
        }
    }

    #[test]
    fn test_parse_json_with_defaults() {
        let req = ChartRequest::parse(r#"{"query": "SELECT name, age FROM users"}"#).unwrap();
        assert_eq!(req.chart_type, ChartType::Bar);
        assert_eq!(req.title, "Database Visualization");
        assert!(req.x_column.is_none());

        let req = ChartRequest::parse(
            r#"{"query": "SELECT 1", "chart_type": "pie", "title": "Share", "y_column": "n"}"#,
        )
        .unwrap();
        assert_eq!(req.chart_type, ChartType::Pie);
        assert_eq!(req.y_column.as_deref(), Some("n"));
    }

    #[test]
    fn test_parse_legacy_pipe_form() {
        let req = ChartRequest::parse("SELECT name, age FROM users|line|Ages||age").unwrap();
        assert_eq!(req.query, "SELECT name, age FROM users");
        assert_eq!(req.chart_type, ChartType::Line);
        assert_eq!(req.title, "Ages");
        assert_eq!(req.x_column, None);
        assert_eq!(req.y_column.as_deref(), Some("age"));

        let req = ChartRequest::parse("SELECT 1|sparkline").unwrap();
        assert_eq!(req.chart_type, ChartType::Bar);

        let req = ChartRequest::parse("SELECT a, b FROM links|network|Links").unwrap();
        assert_eq!(req.chart_type, ChartType::Network);

        assert!(ChartRequest::parse("SELECT 1").is_err());
    }

    #[tokio::test]
    async fn test_bar_chart_written_as_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let out_dir = dir.path().join("reports");
        let tool = ChartTool::new(open_sample(dir.path()), &out_dir);

        let output = tool
            .invoke(r#"{"query": "SELECT name, age FROM users", "title": "Ages"}"#)
            .await
            .unwrap();

        assert_eq!(output.artifacts.len(), 1);
        let artifact = &output.artifacts[0];
        assert_eq!(artifact.kind, ArtifactKind::Chart);
        assert_eq!(artifact.title.as_deref(), Some("Ages"));
        assert!(artifact.path.starts_with(&out_dir));
        assert!(output.text.contains(&artifact.path.display().to_string()));

        let spec: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&artifact.path).unwrap()).unwrap();
        assert_eq!(spec["mark"], "bar");
        assert_eq!(spec["encoding"]["x"]["field"], "name");
        assert_eq!(spec["encoding"]["y"]["field"], "age");
        assert_eq!(spec["data"]["values"].as_array().unwrap().len(), 3);
        assert_eq!(spec["data"]["values"][0]["name"], "Alice");
    }

    #[tokio::test]
    async fn test_empty_result() {
        let dir = tempfile::tempdir().unwrap();
        let tool = ChartTool::new(open_sample(dir.path()), dir.path());
        let output = tool
            .invoke("SELECT name, age FROM users WHERE age > 100|bar")
            .await
            .unwrap();
        assert_eq!(output.text, "No data returned from query");
        assert!(output.artifacts.is_empty());
    }

    #[tokio::test]
    async fn test_network_written_as_dot() {
        let dir = tempfile::tempdir().unwrap();
        let tool = ChartTool::new(open_sample(dir.path()), dir.path());
        let output = tool
            .invoke(
                r#"{"query": "SELECT u.name, 'order ' || o.id AS ord, o.total FROM orders o JOIN users u ON u.id = o.user_id ORDER BY o.id", "chart_type": "network", "title": "Who ordered"}"#,
            )
            .await
            .unwrap();

        let artifact = &output.artifacts[0];
        assert_eq!(artifact.kind, ArtifactKind::Chart);
        let name = artifact.path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("network_") && name.ends_with(".dot"));

        let dot = std::fs::read_to_string(&artifact.path).unwrap();
        assert!(dot.starts_with("strict graph network {\n  label=\"Who ordered\";"));
        assert!(dot.contains("  \"Alice\" -- \"order 1\" [label=\"19.5\"];\n"));
        assert!(dot.contains("  \"Carol\" -- \"order 2\" [label=\"7.25\"];\n"));
        assert!(dot.ends_with("}\n"));
    }

    #[tokio::test]
    async fn test_chart_rows_capped() {
        let dir = tempfile::tempdir().unwrap();
        let tool = ChartTool::new(open_sample(dir.path()), dir.path());
        let output = tool
            .invoke(
                r#"{"query": "WITH RECURSIVE n(i) AS (SELECT 1 UNION ALL SELECT i + 1 FROM n WHERE i < 500000) SELECT i, i * 2 AS twice FROM n", "chart_type": "line"}"#,
            )
            .await
            .unwrap();
        assert!(output.text.ends_with("Only the first 5000 rows were plotted."));

        let spec: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&output.artifacts[0].path).unwrap())
                .unwrap();
        assert_eq!(spec["data"]["values"].as_array().unwrap().len(), MAX_CHART_ROWS);
    }

    #[tokio::test]
    async fn test_unknown_column() {
        let dir = tempfile::tempdir().unwrap();
        let tool = ChartTool::new(open_sample(dir.path()), dir.path());
        let err = tool
            .invoke(r#"{"query": "SELECT name, age FROM users", "y_column": "salary"}"#)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput(ref m) if m.contains("name, age")));
    }

    #[test]
    fn test_auto_detects_numeric_y() {
        let result = QueryResult {
            columns: vec!["id".into(), "name".into(), "total".into()],
            rows: vec![
                vec![Value::Integer(1), Value::Text("a".into()), Value::Real(2.5)],
                vec![Value::Integer(2), Value::Text("b".into()), Value::Real(4.0)],
            ],
            truncated: false,
        };
        let mut req = request("q", ChartType::Bar);
        req.x_column = Some("name".into());
        let spec = build_spec(&req, &result).unwrap();
        assert_eq!(spec["encoding"]["y"]["field"], "id");

        let spec = build_spec(&request("q", ChartType::Histogram), &result).unwrap();
        assert_eq!(spec["encoding"]["x"]["field"], "total");
    }

    #[test]
    fn test_heatmap_correlations() {
        let result = QueryResult {
            columns: vec!["a".into(), "b".into()],
            rows: vec![
                vec![Value::Integer(1), Value::Integer(2)],
                vec![Value::Integer(2), Value::Integer(4)],
                vec![Value::Integer(3), Value::Integer(6)],
            ],
            truncated: false,
        };
        let spec = build_spec(&request("q", ChartType::Heatmap), &result).unwrap();
        let cells = spec["data"]["values"].as_array().unwrap();
        assert_eq!(cells.len(), 4);
        let ab = cells
            .iter()
            .find(|c| c["row"] == "a" && c["column"] == "b")
            .unwrap();
        assert!((ab["correlation"].as_f64().unwrap() - 1.0).abs() < 1e-9);
        assert_eq!(spec["mark"], "rect");
    }

    #[test]
    fn test_single_column_bar_rejected() {
        let result = QueryResult {
            columns: vec!["name".into()],
            rows: vec![vec![Value::Text("a".into())]],
            truncated: false,
        };
        assert!(build_spec(&request("q", ChartType::Bar), &result).is_err());
        assert!(build_spec(&request("q", ChartType::Heatmap), &result).is_err());
    }
}
