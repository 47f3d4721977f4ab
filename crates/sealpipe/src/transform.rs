//! Transformation steps.
//!
//! A step is written as statement fragments. Running it interns the
//! tables and columns it touches, seals its literal values, appends the
//! resulting templates to the node's WAL, executes them through a
//! [`QueryExecutor`] and records each side effect as an artifact. Other
//! clients replay the same WAL with [`replay`].

use std::time::Duration;

use async_trait::async_trait;
use sealpipe_channel::SecureChannel;
use sealpipe_core::{Artifact, ContentId, CoreError, KeyStore};
use sealpipe_store::{Store, TransformerNode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, SealpipeError};
use crate::session::Session;

/// One output column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub data_type: String,
}

/// What the executor reports for one statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Table the statement produced or modified.
    pub table: String,
    pub schema: Vec<ColumnSchema>,
    /// Engine-specific side effect worth replaying, if any.
    pub effect: Option<serde_json::Value>,
}

/// The columnar engine that runs materialized statements.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Name recorded on artifacts this executor produces.
    fn engine(&self) -> &str {
        "sql"
    }

    async fn execute(&self, statement: &str, table: &str) -> anyhow::Result<ExecutionResult>;
}

/// Something that has to finish loading before it can be used.
#[async_trait]
pub trait EngineLoader: Send + Sync {
    type Engine: Send;

    async fn load(&self) -> anyhow::Result<Self::Engine>;
}

/// Load an engine, giving up after `timeout`.
pub async fn load_engine<L>(loader: &L, timeout: Duration) -> Result<L::Engine>
where
    L: EngineLoader + ?Sized,
{
    match tokio::time::timeout(timeout, loader.load()).await {
        Ok(engine) => Ok(engine?),
        Err(_) => Err(SealpipeError::LoaderTimeout(timeout)),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Fragment {
    Sql(String),
    Table(String),
    Column(String),
    Value(String),
}

/// A statement built from raw SQL and references.
///
/// Raw SQL is copied into the template as-is, so it must not contain
/// `$<digits>` or `%<digits>$I` of its own.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Statement {
    parts: Vec<Fragment>,
}

impl Statement {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sql(mut self, text: impl Into<String>) -> Self {
        self.parts.push(Fragment::Sql(text.into()));
        self
    }

    pub fn table(mut self, id: impl Into<String>) -> Self {
        self.parts.push(Fragment::Table(id.into()));
        self
    }

    pub fn column(mut self, id: impl Into<String>) -> Self {
        self.parts.push(Fragment::Column(id.into()));
        self
    }

    /// A literal; it is sealed and stored in the value registry, never in
    /// the template.
    pub fn value(mut self, literal: impl Into<String>) -> Self {
        self.parts.push(Fragment::Value(literal.into()));
        self
    }
}

/// Result of running a step.
#[derive(Debug, Clone)]
pub struct StepOutput {
    /// The node as committed.
    pub node: TransformerNode,
    /// Templates appended by this step.
    pub templates: Vec<String>,
    pub results: Vec<ExecutionResult>,
}

/// A transformation step against one node.
#[derive(Debug, Clone)]
pub struct TransformStep {
    node_id: String,
    table: String,
    statements: Vec<Statement>,
    internal: bool,
}

impl TransformStep {
    pub fn new(node_id: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            table: table.into(),
            statements: Vec::new(),
            internal: false,
        }
    }

    pub fn statement(mut self, statement: Statement) -> Self {
        self.statements.push(statement);
        self
    }

    /// Seal artifacts under the space key instead of storing them plain.
    pub fn internal(mut self, internal: bool) -> Self {
        self.internal = internal;
        self
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Build the WAL fragment, execute it and commit the node.
    ///
    /// Nothing is committed if execution fails. Sealed literals stay in
    /// the registry either way.
    pub async fn run<S, C, K, E>(&self, session: &Session<S, C, K>, executor: &E) -> Result<StepOutput>
    where
        S: Store + ?Sized,
        C: SecureChannel + ?Sized,
        K: KeyStore + ?Sized,
        E: QueryExecutor + ?Sized,
    {
        let mut sealed_values = Vec::new();
        for part in self.statements.iter().flat_map(|s| &s.parts) {
            if let Fragment::Value(literal) = part {
                sealed_values.push(session.seal_value(literal).await?);
            }
        }

        let _guard = session.lock_transformer(&self.node_id).await?;
        let mut node = session.transformer(&self.node_id).await?;
        let templates = self.append_templates(&mut node, sealed_values)?;

        let mut results = Vec::with_capacity(templates.len());
        for template in &templates {
            let statement = session.materialize(template, &node.wal).await?;
            debug!(node = %self.node_id, %template, "executing statement");
            let result = executor.execute(&statement, &self.table).await?;

            if let Some(effect) = &result.effect {
                let artifact = if self.internal {
                    let bytes = serde_json::to_vec(effect)
                        .map_err(|e| CoreError::Encoding(e.to_string()))?;
                    Artifact::sealed(executor.engine(), session.seal_bytes(&bytes).await?)
                } else {
                    Artifact::plain(executor.engine(), effect.clone())
                };
                node.wal.push_artifact(artifact);
            }
            results.push(result);
        }

        session.commit_transformer(&node).await?;
        info!(
            node = %self.node_id,
            statements = templates.len(),
            artifacts = node.wal.artifacts.len(),
            "transform step committed"
        );

        Ok(StepOutput {
            node,
            templates,
            results,
        })
    }

    /// Intern references and push one template per statement.
    fn append_templates(
        &self,
        node: &mut TransformerNode,
        sealed_values: Vec<ContentId>,
    ) -> Result<Vec<String>> {
        let mut tables = Vec::new();
        let mut columns = Vec::new();
        for part in self.statements.iter().flat_map(|s| &s.parts) {
            match part {
                Fragment::Table(id) => tables.push(id.as_str()),
                Fragment::Column(id) => columns.push(id.as_str()),
                _ => {}
            }
        }
        let index = node.wal.intern_identifiers(&tables, &columns)?;
        let lookup = |id: &str| {
            index.get(id).copied().ok_or_else(|| {
                SealpipeError::Core(CoreError::Encoding(format!("identifier {id} not interned")))
            })
        };

        let mut values = sealed_values.into_iter();
        let mut templates = Vec::with_capacity(self.statements.len());
        for statement in &self.statements {
            let mut template = String::new();
            for part in &statement.parts {
                match part {
                    Fragment::Sql(text) => template.push_str(text),
                    Fragment::Table(id) | Fragment::Column(id) => {
                        template.push_str(&format!("%{}$I", lookup(id)?));
                    }
                    Fragment::Value(_) => {
                        let content_id = values.next().ok_or_else(|| {
                            SealpipeError::Core(CoreError::Encoding("unsealed literal".into()))
                        })?;
                        let key = node.wal.intern_value(content_id)?;
                        template.push_str(&format!("${key}"));
                    }
                }
            }
            node.wal.push_transaction(template.clone());
            templates.push(template);
        }
        Ok(templates)
    }
}

/// Re-execute every transaction of a node in order.
pub async fn replay<S, C, K, E>(
    session: &Session<S, C, K>,
    node_id: &str,
    table: &str,
    executor: &E,
) -> Result<Vec<ExecutionResult>>
where
    S: Store + ?Sized,
    C: SecureChannel + ?Sized,
    K: KeyStore + ?Sized,
    E: QueryExecutor + ?Sized,
{
    session.ensure_active().await?;
    let node = session
        .store
        .get_transformer(session.handle(), node_id)
        .await?
        .ok_or_else(|| SealpipeError::TransformerNotFound(node_id.to_string()))?;

    let mut results = Vec::with_capacity(node.wal.transactions.len());
    for template in &node.wal.transactions {
        let statement = session.materialize(template, &node.wal).await?;
        results.push(executor.execute(&statement, table).await?);
    }
    debug!(node = node_id, statements = results.len(), "replayed transformer");
    Ok(results)
}
