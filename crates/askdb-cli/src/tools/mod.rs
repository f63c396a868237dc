//! Built-in tools for the SQL agent

mod chart;
pub mod database;
mod diagram;
mod email;
mod sql;

pub use chart::ChartTool;
pub use database::{Database, DbError};
pub use diagram::DiagramTool;
pub use email::EmailTool;
pub use sql::{ListTablesTool, QueryCheckerTool, QueryTool, SchemaTool};

use std::sync::Arc;

use askdb_agent::{ToolError, ToolRegistry};

use crate::config::Config;

impl From<DbError> for ToolError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::Timeout(_) => ToolError::Timeout(e.to_string()),
            other => ToolError::Failed(other.to_string()),
        }
    }
}

/// Register the SQL toolkit plus whichever optional tools the config enables
pub fn build_registry(config: &Config, db: &Database) -> askdb_agent::Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(ListTablesTool::new(db.clone())))?;
    registry.register(Arc::new(SchemaTool::new(db.clone())))?;
    registry.register(Arc::new(QueryTool::new(db.clone())))?;
    registry.register(Arc::new(QueryCheckerTool::new(db.clone())))?;

    if config.tools.charts {
        let dir = config.report_dir();
        registry.register(Arc::new(ChartTool::new(db.clone(), &dir)))?;
        registry.register(Arc::new(DiagramTool::new(db.clone(), dir)))?;
    }
    if config.tools.email {
        registry.register(Arc::new(EmailTool::new(
            config.email_from(),
            config.outbox_dir(),
            config.report_dir(),
        )))?;
    }
    Ok(registry)
}
