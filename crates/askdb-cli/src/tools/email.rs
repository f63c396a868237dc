//! Email tool: writes an RFC 5322 message with the report attached into an
//! outbox directory. Delivery is left to whatever drains the outbox.
//!
//! Only files inside the report directory can be attached.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use askdb_agent::tool::{Artifact, ArtifactKind, Tool, ToolError, ToolOutput, parse_input};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use regex::Regex;
use serde::Deserialize;
use serde_json::json;

static ADDRESS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s<>,]+@[^@\s<>,]+$").unwrap());

fn default_subject() -> String {
    "SQL Analysis Report".to_string()
}

fn default_body() -> String {
    "Please find the attached SQL analysis report.".to_string()
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EmailRequest {
    pub report_path: String,
    pub to: String,
    #[serde(default = "default_subject")]
    pub subject: String,
    #[serde(default = "default_body")]
    pub body: String,
}

impl EmailRequest {
    /// Accept a JSON object or `report_path|to|subject|body`
    pub fn parse(input: &str) -> Result<Self, ToolError> {
        let input = input.trim();
        if input.starts_with('{') {
            return parse_input(input);
        }
        let parts: Vec<&str> = input.splitn(4, '|').map(str::trim).collect();
        if parts.len() < 2 {
            return Err(ToolError::invalid_input(
                "expected a JSON object with report_path and to",
            ));
        }
        let field = |i: usize| parts.get(i).filter(|s| !s.is_empty()).map(|s| s.to_string());
        Ok(Self {
            report_path: parts[0].to_string(),
            to: parts[1].to_string(),
            subject: field(2).unwrap_or_else(default_subject),
            body: field(3).unwrap_or_else(default_body),
        })
    }

    fn recipients(&self) -> Result<Vec<&str>, ToolError> {
        let recipients: Vec<&str> = self
            .to
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        if recipients.is_empty() {
            return Err(ToolError::invalid_input("no recipient given"));
        }
        if let Some(bad) = recipients.iter().find(|r| !ADDRESS_RE.is_match(r)) {
            return Err(ToolError::invalid_input(format!(
                "'{}' is not a valid email address",
                bad
            )));
        }
        Ok(recipients)
    }
}

fn content_type(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("md") => "text/markdown; charset=utf-8",
        Some("txt") => "text/plain; charset=utf-8",
        Some("csv") => "text/csv; charset=utf-8",
        Some("json") => "application/json",
        Some("dot") => "text/vnd.graphviz",
        Some("pdf") => "application/pdf",
        Some("png") => "image/png",
        _ => "application/octet-stream",
    }
}

/// RFC 2047 encoded-word for non-ASCII header values
fn encode_header(value: &str) -> String {
    if value.is_ascii() {
        value.to_string()
    } else {
        format!("=?utf-8?B?{}?=", STANDARD.encode(value))
    }
}

/// Build the message text with CRLF line endings
pub fn compose_message(
    from: &str,
    recipients: &[&str],
    subject: &str,
    body: &str,
    filename: &str,
    mime: &str,
    attachment: &[u8],
) -> String {
    let boundary = format!("askdb-{}", uuid::Uuid::new_v4().simple());
    let domain = from.rsplit('@').next().unwrap_or("localhost");
    let filename = filename.replace('"', "");

    let mut lines = vec![
        format!("From: {}", from),
        format!("To: {}", recipients.join(", ")),
        format!("Subject: {}", encode_header(subject)),
        format!("Date: {}", chrono::Local::now().to_rfc2822()),
        format!("Message-ID: <{}@{}>", uuid::Uuid::new_v4(), domain),
        "MIME-Version: 1.0".to_string(),
        format!("Content-Type: multipart/mixed; boundary=\"{}\"", boundary),
        String::new(),
        format!("--{}", boundary),
        "Content-Type: text/plain; charset=utf-8".to_string(),
        "Content-Transfer-Encoding: 8bit".to_string(),
        String::new(),
    ];
    lines.extend(body.lines().map(str::to_string));
    lines.push(format!("--{}", boundary));
    lines.push(format!("Content-Type: {}; name=\"{}\"", mime, filename));
    lines.push(format!(
        "Content-Disposition: attachment; filename=\"{}\"",
        filename
    ));
    lines.push("Content-Transfer-Encoding: base64".to_string());
    lines.push(String::new());

    let encoded = STANDARD.encode(attachment);
    for chunk in encoded.as_bytes().chunks(76) {
        lines.push(String::from_utf8_lossy(chunk).into_owned());
    }
    lines.push(format!("--{}--", boundary));
    lines.push(String::new());

    lines.join("\r\n")
}

pub struct EmailTool {
    from: String,
    outbox_dir: PathBuf,
    report_dir: PathBuf,
}

impl EmailTool {
    pub fn new(
        from: impl Into<String>,
        outbox_dir: impl Into<PathBuf>,
        report_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            from: from.into(),
            outbox_dir: outbox_dir.into(),
            report_dir: report_dir.into(),
        }
    }

    /// Resolve the attachment and require it to live under the report directory
    async fn resolve_attachment(&self, report_path: &str) -> Result<PathBuf, ToolError> {
        let report = tokio::fs::canonicalize(report_path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ToolError::failed(format!("Report file not found: {}", report_path))
            } else {
                ToolError::failed(format!("cannot read {}: {}", report_path, e))
            }
        })?;
        let allowed = tokio::fs::canonicalize(&self.report_dir).await.map_err(|_| {
            ToolError::invalid_input(format!(
                "no reports have been written to {} yet",
                self.report_dir.display()
            ))
        })?;
        if !report.starts_with(&allowed) || !report.is_file() {
            return Err(ToolError::invalid_input(format!(
                "only files in the report directory {} can be attached",
                self.report_dir.display()
            )));
        }
        Ok(report)
    }
}

#[async_trait]
impl Tool for EmailTool {
    fn name(&self) -> &str {
        "send_email"
    }

    fn description(&self) -> &str {
        "Send an email with an attached report file. Input is a JSON object: \
         {\"report_path\": \"...\", \"to\": \"name@example.com\", \"subject\": \"...\", \"body\": \"...\"}. \
         subject and body are optional. report_path must be a file written to the report directory."
    }

    fn input_schema(&self) -> Option<serde_json::Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "report_path": { "type": "string", "minLength": 1 },
                "to": { "type": "string", "minLength": 3 },
                "subject": { "type": "string" },
                "body": { "type": "string" }
            },
            "required": ["report_path", "to"],
            "additionalProperties": false
        }))
    }

    async fn invoke(&self, input: &str) -> Result<ToolOutput, ToolError> {
        let request = EmailRequest::parse(input)?;
        let recipients = request.recipients()?;
        if request.subject.contains(['\r', '\n']) {
            return Err(ToolError::invalid_input("subject must be a single line"));
        }

        let report = self.resolve_attachment(&request.report_path).await?;
        let attachment = tokio::fs::read(&report)
            .await
            .map_err(|e| ToolError::failed(format!("cannot read {}: {}", report.display(), e)))?;
        let filename = report
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "report".to_string());

        let message = compose_message(
            &self.from,
            &recipients,
            &request.subject,
            &request.body,
            &filename,
            content_type(&report),
            &attachment,
        );

        tokio::fs::create_dir_all(&self.outbox_dir)
            .await
            .map_err(|e| ToolError::failed(format!("cannot create outbox: {}", e)))?;
        let path = self.outbox_dir.join(format!(
            "{}_{}.eml",
            chrono::Local::now().format("%Y%m%d_%H%M%S"),
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        ));
        tokio::fs::write(&path, message)
            .await
            .map_err(|e| ToolError::failed(format!("cannot write {}: {}", path.display(), e)))?;

        tracing::info!("Queued email to {} in {}", request.to, path.display());
        Ok(ToolOutput::text(format!(
            "Email to {} queued in the outbox: {}",
            recipients.join(", "),
            path.display()
        ))
        .with_artifact(Artifact::new(ArtifactKind::Email, path).with_title(request.subject.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_defaults() {
        let req = EmailRequest::parse(r#"{"report_path": "r.md", "to": "a@b.com"}"#).unwrap();
        assert_eq!(req.subject, "SQL Analysis Report");
        assert_eq!(req.body, "Please find the attached SQL analysis report.");

        let req = EmailRequest::parse("r.md|a@b.com||Hi there").unwrap();
        assert_eq!(req.subject, "SQL Analysis Report");
        assert_eq!(req.body, "Hi there");
    }

    #[test]
    fn test_recipient_validation() {
        let mut req = EmailRequest::parse("r.md|a@b.com, c@d.org").unwrap();
        assert_eq!(req.recipients().unwrap(), vec!["a@b.com", "c@d.org"]);

        req.to = "not-an-address".into();
        assert!(matches!(req.recipients(), Err(ToolError::InvalidInput(_))));
    }

    #[test]
    fn test_compose_message() {
        let message = compose_message(
            "askdb@example.com",
            &["a@b.com"],
            "Résumé",
            "Hello\nWorld",
            "report.md",
            "text/markdown; charset=utf-8",
            b"# Report",
        );
        assert!(message.starts_with("From: askdb@example.com\r\nTo: a@b.com\r\n"));
        assert!(message.contains("Subject: =?utf-8?B?"));
        assert!(message.contains("\r\nHello\r\nWorld\r\n"));
        assert!(message.contains("Content-Disposition: attachment; filename=\"report.md\""));
        assert!(message.contains(&STANDARD.encode(b"# Report")));
        assert!(message.trim_end().ends_with("--"));
    }

    #[tokio::test]
    async fn test_writes_to_outbox() {
        let dir = tempfile::tempdir().unwrap();
        let report = dir.path().join("report.md");
        std::fs::write(&report, "# Findings").unwrap();
        let tool = EmailTool::new("askdb@localhost", dir.path().join("outbox"), dir.path());

        let input = json!({ "report_path": report, "to": "team@example.com" }).to_string();
        let output = tool.invoke(&input).await.unwrap();

        let artifact = &output.artifacts[0];
        assert_eq!(artifact.kind, ArtifactKind::Email);
        let message = std::fs::read_to_string(&artifact.path).unwrap();
        assert!(message.contains("To: team@example.com"));
        assert!(message.contains("Subject: SQL Analysis Report"));
    }

    #[tokio::test]
    async fn test_missing_report() {
        let dir = tempfile::tempdir().unwrap();
        let tool = EmailTool::new("askdb@localhost", dir.path(), dir.path());
        let err = tool
            .invoke(r#"{"report_path": "/nonexistent/report.md", "to": "a@b.com"}"#)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ToolError::failed("Report file not found: /nonexistent/report.md")
        );
    }

    #[tokio::test]
    async fn test_attachment_outside_report_dir_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let reports = dir.path().join("reports");
        std::fs::create_dir_all(&reports).unwrap();
        let secret = dir.path().join("config.toml");
        std::fs::write(&secret, "[api_keys]\nopenai = \"sk-secret\"\n").unwrap();
        let outbox = dir.path().join("outbox");
        let tool = EmailTool::new("askdb@localhost", &outbox, &reports);

        let input = json!({ "report_path": secret, "to": "someone@example.com" }).to_string();
        let err = tool.invoke(&input).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput(_)));

        let sneaky = reports.join("..").join("config.toml");
        let input = json!({ "report_path": sneaky, "to": "someone@example.com" }).to_string();
        let err = tool.invoke(&input).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput(_)));

        let input = json!({ "report_path": reports, "to": "someone@example.com" }).to_string();
        assert!(matches!(
            tool.invoke(&input).await.unwrap_err(),
            ToolError::InvalidInput(_)
        ));
        assert!(!outbox.exists());
    }
}
