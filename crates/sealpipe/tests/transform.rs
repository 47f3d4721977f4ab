//! Transform steps: WAL construction, execution and replay by other members.

use std::sync::Mutex;

use async_trait::async_trait;
use sealpipe::core::{ArtifactBody, KeyStore};
use sealpipe::store::Store;
use sealpipe::{
    replay, ColumnSchema, ExecutionResult, QueryExecutor, SealpipeError, Statement, TransformStep,
};
use sealpipe_testkit::SpaceFixture;

/// Records every statement and reports a fixed effect.
#[derive(Default)]
struct RecordingExecutor {
    statements: Mutex<Vec<String>>,
    fail: bool,
}

impl RecordingExecutor {
    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    fn statements(&self) -> Vec<String> {
        self.statements.lock().unwrap().clone()
    }
}

#[async_trait]
impl QueryExecutor for RecordingExecutor {
    fn engine(&self) -> &str {
        "duck"
    }

    async fn execute(&self, statement: &str, table: &str) -> anyhow::Result<ExecutionResult> {
        if self.fail {
            anyhow::bail!("syntax error near {statement:?}");
        }
        self.statements.lock().unwrap().push(statement.to_string());
        Ok(ExecutionResult {
            table: table.to_string(),
            schema: vec![ColumnSchema {
                name: "amount".into(),
                data_type: "DOUBLE".into(),
            }],
            effect: Some(serde_json::json!({ "rows": 2 })),
        })
    }
}

fn filter_step(node: &str) -> TransformStep {
    TransformStep::new(node, "sales").statement(
        Statement::new()
            .sql("SELECT ")
            .column("amount")
            .sql(" FROM ")
            .table("sales")
            .sql(" WHERE ")
            .column("region")
            .sql(" = ")
            .value("'EU'"),
    )
}

#[tokio::test]
async fn step_materializes_executes_and_commits() {
    let fixture = SpaceFixture::new("sales", &["alice", "bob"]).await;
    let alice = fixture.session(0).await;
    let executor = RecordingExecutor::default();

    let output = filter_step("t1").run(&alice, &executor).await.unwrap();

    assert_eq!(
        executor.statements(),
        vec![r#"SELECT "amount" FROM "sales" WHERE "region" = 'EU'"#]
    );
    assert_eq!(output.templates, vec!["SELECT %2$I FROM %1$I WHERE %3$I = $1"]);
    assert_eq!(output.results[0].table, "sales");

    // The literal lives in the registry, never in the WAL.
    let stored = fixture
        .store
        .get_transformer(&fixture.handle, "t1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored, output.node);
    assert!(!stored.wal.to_json().unwrap().contains("EU"));
    assert_eq!(stored.wal.artifacts.len(), 1);
    assert!(matches!(stored.wal.artifacts[0].body, ArtifactBody::Plain(_)));
    assert_eq!(stored.wal.artifacts[0].engine, "duck");
    assert_eq!(alice.value_registry().await.unwrap().len(), 1);
}

#[tokio::test]
async fn internal_step_seals_artifacts() {
    let fixture = SpaceFixture::new("sales", &["alice"]).await;
    let alice = fixture.session(0).await;

    let output = filter_step("t1")
        .internal(true)
        .run(&alice, &RecordingExecutor::default())
        .await
        .unwrap();

    let sealed = output.node.wal.artifacts[0].sealed_body().unwrap();
    assert!(sealed.is_under(&fixture.initial_key_id));
    let effect: serde_json::Value =
        serde_json::from_slice(&alice.open_bytes(sealed).await.unwrap()).unwrap();
    assert_eq!(effect["rows"], 2);
}

#[tokio::test]
async fn failed_execution_commits_nothing() {
    let fixture = SpaceFixture::new("sales", &["alice"]).await;
    let alice = fixture.session(0).await;

    let err = filter_step("t1")
        .run(&alice, &RecordingExecutor::failing())
        .await
        .unwrap_err();
    assert!(matches!(err, SealpipeError::Executor(_)));
    assert!(fixture
        .store
        .get_transformer(&fixture.handle, "t1")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn later_steps_reuse_interned_keys() {
    let fixture = SpaceFixture::new("sales", &["alice"]).await;
    let alice = fixture.session(0).await;
    let executor = RecordingExecutor::default();

    filter_step("t1").run(&alice, &executor).await.unwrap();
    let second = TransformStep::new("t1", "sales")
        .statement(
            Statement::new()
                .sql("SELECT ")
                .column("amount")
                .sql(", ")
                .column("margin")
                .sql(" FROM ")
                .table("sales"),
        )
        .run(&alice, &executor)
        .await
        .unwrap();

    assert_eq!(second.templates, vec!["SELECT %2$I, %4$I FROM %1$I"]);
    assert_eq!(second.node.wal.transactions.len(), 2);
    assert_eq!(second.node.wal.identifiers.len(), 4);
}

#[tokio::test]
async fn concurrent_steps_on_one_node_are_serialized() {
    let fixture = SpaceFixture::new("sales", &["alice"]).await;
    let alice = fixture.session(0).await;
    let executor = RecordingExecutor::default();

    let a = filter_step("t1");
    let b = TransformStep::new("t1", "sales")
        .statement(Statement::new().sql("SELECT * FROM ").table("returns"));
    let (ra, rb) = tokio::join!(a.run(&alice, &executor), b.run(&alice, &executor));
    ra.unwrap();
    rb.unwrap();

    let node = alice.transformer("t1").await.unwrap();
    assert_eq!(node.wal.transactions.len(), 2);
    let mut ids: Vec<_> = node.wal.identifiers.values().map(|i| i.id.clone()).collect();
    ids.sort();
    assert_eq!(ids, vec!["amount", "region", "returns", "sales"]);
}

#[tokio::test]
async fn edit_transformer_commits_under_lock() {
    let fixture = SpaceFixture::new("sales", &["alice"]).await;
    let alice = fixture.session(0).await;

    let (node, index) = alice
        .edit_transformer("t2", |node| {
            let index = node.wal.intern_identifiers(&["orders"], &["id"]).unwrap();
            node.wal.push_transaction("SELECT %2$I FROM %1$I");
            index
        })
        .await
        .unwrap();

    assert_eq!(index["orders"], 1);
    assert_eq!(alice.transformer("t2").await.unwrap(), node);
}

#[tokio::test]
async fn other_member_replays_after_rotation() {
    let fixture = SpaceFixture::new("sales", &["alice", "bob"]).await;
    let alice = fixture.session(0).await;
    filter_step("t1")
        .internal(true)
        .run(&alice, &RecordingExecutor::default())
        .await
        .unwrap();

    let report = alice.rotate_key().await.unwrap();

    let bob = fixture.session(1).await;
    assert!(fixture.member(1).keys.has_key(&report.new_key_id));
    let executor = RecordingExecutor::default();
    replay(&bob, "t1", "sales", &executor).await.unwrap();
    assert_eq!(
        executor.statements(),
        vec![r#"SELECT "amount" FROM "sales" WHERE "region" = 'EU'"#]
    );

    let node = bob.transformer("t1").await.unwrap();
    let sealed = node.wal.artifacts[0].sealed_body().unwrap();
    assert!(sealed.is_under(&report.new_key_id));
    assert!(bob.open_bytes(sealed).await.is_ok());
}

#[tokio::test]
async fn replay_unknown_node() {
    let fixture = SpaceFixture::new("sales", &["alice"]).await;
    let alice = fixture.session(0).await;
    assert!(matches!(
        replay(&alice, "nope", "sales", &RecordingExecutor::default()).await,
        Err(SealpipeError::TransformerNotFound(_))
    ));
}
