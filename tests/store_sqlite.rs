//! SQLite graph store round-trips and transactional behaviour.

mod common;
use common::*;

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;

use trellis::engine::Engine;
use trellis::store::{
    EdgeDefinition, GraphStore, SqliteGraphStore, StepDefinition, StoreError,
};
use trellis::types::{BoolOperator, EngineStatus, StepStatus};

async fn memory_store() -> SqliteGraphStore {
    // One connection so the in-memory database is shared by every call.
    SqliteGraphStore::connect("sqlite::memory:", 1)
        .await
        .expect("connect sqlite memory")
}

#[tokio::test]
async fn step_round_trip() {
    let store = memory_store().await;
    let step = StepDefinition::new("generate-answer")
        .with_function("utils.reply.reply")
        .with_input(&json!({"message": "@{SESSION_ID}.gen.text"}))
        .with_description("final reply")
        .with_tag("conversation");
    store.insert_step(&step).await.unwrap();

    let loaded = store.get_step("generate-answer").await.unwrap().unwrap();
    assert_eq!(loaded, step);
    assert!(store.get_step("absent").await.unwrap().is_none());
}

#[tokio::test]
async fn edges_keep_discovery_order_and_attributes() {
    let store = memory_store().await;
    store
        .insert_edge(
            "gen",
            &EdgeDefinition::to("yes")
                .with_condition(&json!([{"true": "@{SESSION_ID}.gen.ok"}]))
                .with_operator(BoolOperator::Or)
                .with_priority(1),
        )
        .await
        .unwrap();
    store
        .insert_edge("gen", &EdgeDefinition::to("no"))
        .await
        .unwrap();

    let edges = store.outgoing_edges("gen").await.unwrap();
    assert_eq!(edges.len(), 2);
    assert_eq!(edges[0].target, "yes");
    assert_eq!(edges[0].operator, BoolOperator::Or);
    assert_eq!(edges[0].priority, Some(1));
    assert!(edges[0].condition.as_deref().unwrap().contains("gen.ok"));
    assert_eq!(edges[1].target, "no");
    assert_eq!(edges[1].condition, None);
    assert_eq!(edges[1].operator, BoolOperator::And);
}

#[tokio::test]
async fn session_create_read_update() {
    let store = memory_store().await;
    store
        .create_session("s1", r#"{"v":1}"#, Utc::now())
        .await
        .unwrap();
    assert_eq!(
        store.read_session_state("s1").await.unwrap().unwrap(),
        r#"{"v":1}"#
    );

    store
        .update_session_state("s1", Box::new(|_| Ok(r#"{"v":2}"#.to_string())))
        .await
        .unwrap();
    assert_eq!(
        store.read_session_state("s1").await.unwrap().unwrap(),
        r#"{"v":2}"#
    );

    let err = store
        .create_session("s1", "{}", Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::SessionExists { .. }));
}

#[tokio::test]
async fn failed_update_rolls_back() {
    let store = memory_store().await;
    store
        .create_session("s1", r#"{"v":1}"#, Utc::now())
        .await
        .unwrap();

    let err = store
        .update_session_state(
            "s1",
            Box::new(|_| {
                Err(StoreError::Backend {
                    message: "mutator blew up".into(),
                })
            }),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Backend { .. }));
    assert_eq!(
        store.read_session_state("s1").await.unwrap().unwrap(),
        r#"{"v":1}"#
    );

    let err = store
        .update_session_state("missing", Box::new(Ok))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::SessionNotFound { .. }));
}

#[tokio::test]
async fn engine_runs_a_workflow_over_sqlite() {
    let store = memory_store().await;
    store.insert_step(&StepDefinition::new("root")).await.unwrap();
    store
        .insert_step(
            &StepDefinition::new("greet")
                .with_function(REPLY)
                .with_input(&json!({"message": "hi"})),
        )
        .await
        .unwrap();
    store
        .insert_edge("root", &EdgeDefinition::to("greet"))
        .await
        .unwrap();

    let engine = Engine::new(Arc::new(store), Arc::new(test_registry()));
    let sid = engine.create_session("default", None).await.unwrap();
    let status = engine.process(&sid).await.unwrap();
    assert_eq!(status, EngineStatus::Completed);

    let state = engine.get_session(&sid).await.unwrap().unwrap();
    assert_eq!(state.workflow["greet"].status, StepStatus::Complete);
    assert_eq!(state.data.messages[0].content, "hi");
}
