//! Table relationship diagram in Graphviz DOT

use std::path::PathBuf;

use askdb_agent::tool::{Artifact, ArtifactKind, Tool, ToolError, ToolOutput};
use async_trait::async_trait;

use super::database::{ColumnInfo, Database, ForeignKey};

pub struct DiagramTool {
    db: Database,
    output_dir: PathBuf,
}

impl DiagramTool {
    pub fn new(db: Database, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            db,
            output_dir: output_dir.into(),
        }
    }
}

/// Escape text for a DOT record label
fn escape_record(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '{' | '}' | '|' | '<' | '>' | '"' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

pub(super) fn escape_id(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

pub fn render_dot(tables: &[(String, Vec<ColumnInfo>)], keys: &[ForeignKey]) -> String {
    let mut dot = String::from(
        "digraph table_relationships {\n  rankdir=LR;\n  label=\"Database Table Relationships\";\n  node [shape=record, fontname=\"Helvetica\"];\n",
    );

    for (table, columns) in tables {
        let fields: Vec<String> = columns
            .iter()
            .map(|c| {
                let pk = if c.primary_key { " (PK)" } else { "" };
                format!("{} : {}{}\\l", escape_record(&c.name), escape_record(&c.data_type), pk)
            })
            .collect();
        dot.push_str(&format!(
            "  \"{}\" [label=\"{{{}|{}}}\"];\n",
            escape_id(table),
            escape_record(table),
            fields.join("")
        ));
    }

    for key in keys {
        let label = if key.to_column.is_empty() {
            key.from_column.clone()
        } else {
            format!("{} -> {}", key.from_column, key.to_column)
        };
        dot.push_str(&format!(
            "  \"{}\" -> \"{}\" [label=\"{}\"];\n",
            escape_id(&key.from_table),
            escape_id(&key.to_table),
            escape_id(&label)
        ));
    }

    dot.push_str("}\n");
    dot
}

#[async_trait]
impl Tool for DiagramTool {
    fn name(&self) -> &str {
        "create_table_relationship_diagram"
    }

    fn description(&self) -> &str {
        "Create a diagram showing the tables, their columns and the foreign-key relationships \
         between them. Input is ignored."
    }

    async fn invoke(&self, _input: &str) -> Result<ToolOutput, ToolError> {
        let names = self.db.table_names().await?;
        if names.is_empty() {
            return Ok(ToolOutput::text("The database has no tables."));
        }

        let mut tables = Vec::with_capacity(names.len());
        for name in names {
            let columns = self.db.columns(&name).await?;
            tables.push((name, columns));
        }
        let keys = self.db.foreign_keys().await?;
        let dot = render_dot(&tables, &keys);

        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| ToolError::failed(format!("cannot create {}: {}", self.output_dir.display(), e)))?;
        let path = self.output_dir.join(format!(
            "table_relationships_{}.dot",
            chrono::Local::now().format("%Y%m%d_%H%M%S")
        ));
        tokio::fs::write(&path, dot)
            .await
            .map_err(|e| ToolError::failed(format!("cannot write {}: {}", path.display(), e)))?;

        Ok(ToolOutput::text(format!(
            "Table relationship diagram created: {} ({} tables, {} relationships)",
            path.display(),
            tables.len(),
            keys.len()
        ))
        .with_artifact(
            Artifact::new(ArtifactKind::Diagram, path).with_title("Database Table Relationships"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::database::tests::open_sample;

    #[tokio::test]
    async fn test_diagram_lists_tables_and_edges() {
        let dir = tempfile::tempdir().unwrap();
        let tool = DiagramTool::new(open_sample(dir.path()), dir.path().join("out"));

        let output = tool.invoke("").await.unwrap();
        assert!(output.text.contains("(2 tables, 1 relationships)"));
        let artifact = &output.artifacts[0];
        assert_eq!(artifact.kind, ArtifactKind::Diagram);

        let dot = std::fs::read_to_string(&artifact.path).unwrap();
        assert!(dot.starts_with("digraph table_relationships {"));
        assert!(dot.contains("\"orders\" -> \"users\" [label=\"user_id -> id\"];"));
        assert!(dot.contains("id : INTEGER (PK)\\l"));
        assert!(dot.trim_end().ends_with('}'));
    }

    #[test]
    fn test_record_labels_escaped() {
        let tables = vec![(
            "odd|name".to_string(),
            vec![ColumnInfo {
                name: "a<b>".into(),
                data_type: "TEXT".into(),
                primary_key: false,
            }],
        )];
        let dot = render_dot(&tables, &[]);
        assert!(dot.contains("label=\"{odd\\|name|a\\<b\\> : TEXT\\l}\""));
    }
}
