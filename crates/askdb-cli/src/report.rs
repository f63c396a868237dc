//! Markdown report of the conversation

use std::fs;
use std::path::{Path, PathBuf};

use askdb_agent::{Artifact, ArtifactKind, ChatMessage, Role};

/// Render the conversation and any files produced along the way
pub fn render(messages: &[ChatMessage], artifacts: &[Artifact], model: &str) -> String {
    let mut out = String::from("# SQL Chat Analysis Report\n\n");
    out.push_str(&format!(
        "Generated on {}  \nModel: {}  \nTotal messages: {}\n",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        model,
        messages.len()
    ));

    let mut question = 0;
    for message in messages {
        match message.role {
            Role::User => {
                question += 1;
                out.push_str(&format!("\n## Question {}\n\n{}\n", question, message.content));
            }
            Role::Assistant => {
                out.push_str(&format!("\n**Answer:**\n\n{}\n", message.content));
            }
        }
    }

    if !artifacts.is_empty() {
        out.push_str("\n## Generated files\n\n");
        for artifact in artifacts {
            let kind = match artifact.kind {
                ArtifactKind::Chart => "Chart",
                ArtifactKind::Diagram => "Diagram",
                ArtifactKind::Report => "Report",
                ArtifactKind::Email => "Email",
            };
            match artifact.title {
                Some(ref title) => out.push_str(&format!(
                    "- {}: {} (`{}`)\n",
                    kind,
                    title,
                    artifact.path.display()
                )),
                None => out.push_str(&format!("- {}: `{}`\n", kind, artifact.path.display())),
            }
        }
    }
    out
}

/// Write a report into `dir` and return its path
pub fn write(dir: &Path, content: &str) -> std::io::Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(format!(
        "sql_analysis_report_{}.md",
        chrono::Local::now().format("%Y%m%d_%H%M%S")
    ));
    fs::write(&path, content)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_numbers_questions() {
        let messages = vec![
            ChatMessage::user("How many users?"),
            ChatMessage::assistant("3"),
            ChatMessage::user("And orders?"),
            ChatMessage::assistant("2"),
        ];
        let artifacts = vec![
            Artifact::new(ArtifactKind::Chart, "reports/chart.vl.json").with_title("Ages"),
        ];
        let report = render(&messages, &artifacts, "gpt-4o-mini");

        assert!(report.starts_with("# SQL Chat Analysis Report\n"));
        assert!(report.contains("Total messages: 4"));
        assert!(report.contains("## Question 1\n\nHow many users?\n\n**Answer:**\n\n3\n"));
        assert!(report.contains("## Question 2\n\nAnd orders?"));
        assert!(report.contains("- Chart: Ages (`reports/chart.vl.json`)"));
    }

    #[test]
    fn test_write_creates_dir() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("reports");
        let path = write(&target, "# Report\n").unwrap();
        assert!(path.starts_with(&target));
        assert_eq!(fs::read_to_string(path).unwrap(), "# Report\n");
    }
}
