use std::sync::Arc;

use operator_core::domain::conversation::{ConversationState, ThreadId};
use operator_core::domain::message::{Message, ToolCallId, ToolCallRequest};
use operator_db::migrations;
use operator_db::repositories::{InMemoryCheckpointStore, SqlCheckpointStore};
use operator_db::{connect_with_settings, CheckpointStore};
use serde_json::json;

async fn sql_store() -> SqlCheckpointStore {
    let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
    migrations::run_pending(&pool).await.expect("migrate");
    SqlCheckpointStore::new(pool, 3_600)
}

fn tool_turn(thread_id: &ThreadId) -> ConversationState {
    let mut state = ConversationState::new(thread_id.clone());
    state.append(Message::system("prompt"));
    state.append(Message::user("What's my open-opportunity count?"));
    state.append(Message::assistant_with_tool_calls(
        "",
        vec![ToolCallRequest::new(
            "call-1",
            "execute_salesforce_soql",
            json!({"soql_query": "SELECT COUNT() FROM Opportunity", "profile_id": "P1"}),
        )],
    ));
    state.append(Message::tool_result(ToolCallId("call-1".to_string()), "{\"totalSize\":3}"));
    state
}

async fn assert_store_contract<S: CheckpointStore + 'static>(store: Arc<S>) {
    let thread_id = ThreadId::from("P1");
    let state = tool_turn(&thread_id);

    assert!(store.load(&thread_id).await.expect("load missing").is_none());
    let step = store.save(&thread_id, &state, 0).await.expect("create");
    assert_eq!(step, 1);

    let loaded = store.load(&thread_id).await.expect("load").expect("present");
    assert_eq!(loaded.state.current_messages(), state.current_messages());
    assert_eq!(
        loaded.state.current_messages()[2].tool_calls()[0].name,
        "execute_salesforce_soql"
    );

    let first = {
        let (store, thread_id, state) = (store.clone(), thread_id.clone(), state.clone());
        tokio::spawn(async move { store.save(&thread_id, &state, 1).await })
    };
    let second = {
        let (store, thread_id, state) = (store.clone(), thread_id.clone(), state.clone());
        tokio::spawn(async move { store.save(&thread_id, &state, 1).await })
    };
    let outcomes = [first.await.expect("join"), second.await.expect("join")];

    let successes: Vec<u64> =
        outcomes.iter().filter_map(|outcome| outcome.as_ref().ok().copied()).collect();
    let conflicts = outcomes
        .iter()
        .filter(|outcome| matches!(outcome, Err(error) if error.is_conflict()))
        .count();
    assert_eq!(successes, vec![2]);
    assert_eq!(conflicts, 1);

    let other = ThreadId::from("P2");
    let step = store
        .save(&other, &ConversationState::new(other.clone()), 0)
        .await
        .expect("independent thread");
    assert_eq!(step, 1, "threads do not share step counters");
}

#[tokio::test]
async fn sql_store_honours_optimistic_save_contract() {
    assert_store_contract(Arc::new(sql_store().await)).await;
}

#[tokio::test]
async fn in_memory_store_honours_optimistic_save_contract() {
    assert_store_contract(Arc::new(InMemoryCheckpointStore::default())).await;
}
