//! `psql` over `docker exec`.

use super::{parse_rows, Row, SqlClient, SqlTarget, FIELD_SEPARATOR, NULL_MARKER};
use crate::error::Result;
use crate::runtime::ContainerRuntime;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

const PSQL: &str = "psql";

/// SQL client that runs `psql` inside the target container.
#[derive(Clone)]
pub struct PsqlClient {
    runtime: Arc<dyn ContainerRuntime>,
}

impl PsqlClient {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime }
    }

    fn base_args(target: &SqlTarget) -> Vec<String> {
        vec![
            PSQL.to_string(),
            "-v".into(),
            "ON_ERROR_STOP=1".into(),
            "-U".into(),
            target.user.clone(),
            "-d".into(),
            target.db.clone(),
            "-tA".into(),
            "-F".into(),
            FIELD_SEPARATOR.to_string(),
            "-P".into(),
            format!("null={}", NULL_MARKER),
        ]
    }

    async fn run(&self, target: &SqlTarget, tail: [String; 2]) -> Result<String> {
        let mut cmd = Self::base_args(target);
        cmd.extend(tail);
        let out = self.runtime.exec(&target.container, &cmd).await?;
        Ok(out.check(PSQL)?.stdout)
    }
}

#[async_trait]
impl SqlClient for PsqlClient {
    async fn execute(&self, target: &SqlTarget, sql: &str) -> Result<String> {
        self.run(target, ["-c".into(), sql.to_string()]).await
    }

    async fn query_rows(&self, target: &SqlTarget, sql: &str) -> Result<Vec<Row>> {
        let stdout = self.execute(target, sql).await?;
        Ok(parse_rows(&stdout))
    }

    async fn execute_file(&self, target: &SqlTarget, path: &str) -> Result<String> {
        self.run(target, ["-f".into(), path.to_string()]).await
    }

    async fn is_ready(&self, target: &SqlTarget) -> bool {
        let cmd: Vec<String> =
            vec!["pg_isready".into(), "-U".into(), target.user.clone(), "-d".into(), target.db.clone()];
        match self.runtime.exec(&target.container, &cmd).await {
            Ok(out) => out.success(),
            Err(e) => {
                debug!(container = %target.container, error = %e, "pg_isready failed");
                false
            }
        }
    }
}
