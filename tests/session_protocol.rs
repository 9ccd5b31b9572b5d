use std::{sync::Arc, time::Duration};

use futures::future::join_all;
use serde_json::json;
use vote_session::{
    dao::{
        models::CreateOutcome,
        session_store::{SessionStore, memory::MemorySessionStore},
    },
    error::ServiceError,
    services::{
        question_source::DeckQuestionSource,
        session_client::{ClientSettings, EntryPolicy, EntryRequest, SessionClient, SessionStatus},
    },
    state::{
        session::{OptionRef, ParticipantId, Round, SessionCode, SessionPhase},
        view::SessionView,
    },
};

fn settings() -> ClientSettings {
    ClientSettings {
        reveal_debounce: Duration::from_millis(30),
        join_timeout: Duration::from_secs(3),
    }
}

async fn enter(store: &MemorySessionStore, code: &str, id: &str, name: &str) -> SessionClient {
    let request = EntryRequest {
        code: SessionCode::parse(code).unwrap(),
        participant: ParticipantId::new(id),
        display_name: name.to_string(),
        policy: EntryPolicy::CreateOrJoin,
    };
    SessionClient::ensure_session(Arc::new(store.clone()), request, settings())
        .await
        .unwrap()
}

async fn wait_phase(client: &SessionClient, phase: SessionPhase) -> SessionView {
    tokio::time::timeout(
        Duration::from_secs(3),
        client.wait_for(|view| view.document.phase == phase),
    )
    .await
    .expect("phase not reached in time")
    .unwrap()
}

fn pizza_or_sushi() -> DeckQuestionSource {
    DeckQuestionSource::new(vec![Round::new("Pizza", "Sushi")])
}

#[tokio::test]
async fn two_players_reach_results_at_fifty_fifty() {
    let store = MemorySessionStore::new();
    let questions = pizza_or_sushi();

    let ann = enter(&store, "AB12CD", "ann", "Ann").await;
    let bo = enter(&store, "AB12CD", "bo", "Bo").await;

    let lobby = wait_phase(&ann, SessionPhase::Lobby).await;
    assert!(lobby.is_host);

    ann.start_round(&questions).await.unwrap();
    let voting = wait_phase(&bo, SessionPhase::Voting).await;
    assert_eq!(voting.document.current_round, Some(Round::new("Pizza", "Sushi")));
    assert_eq!(voting.document.participants.len(), 2);
    wait_phase(&ann, SessionPhase::Voting).await;

    ann.submit_vote(OptionRef::A).await.unwrap();
    bo.submit_vote(OptionRef::B).await.unwrap();

    for client in [&ann, &bo] {
        let view = wait_phase(client, SessionPhase::Results).await;
        let results = view.results.unwrap();
        assert_eq!(results.option_a.percentage, 50);
        assert_eq!(results.option_b.percentage, 50);
        assert_eq!(results.option_a.votes + results.option_b.votes, results.participants);
    }
}

#[tokio::test]
async fn concurrent_creates_have_exactly_one_winner() {
    let store = MemorySessionStore::new();
    let attempts = (0..8).map(|i| {
        let store = store.clone();
        async move {
            store
                .create_if_absent("ZZ99ZZ", json!({"id": "ZZ99ZZ", "hostId": format!("p{i}")}))
                .await
                .unwrap()
        }
    });

    let outcomes = join_all(attempts).await;
    let created = outcomes
        .iter()
        .filter(|outcome| **outcome == CreateOutcome::Created)
        .count();
    assert_eq!(created, 1);
}

#[tokio::test]
async fn racing_clients_end_up_in_one_session() {
    let store = MemorySessionStore::new();
    let (first, second) = tokio::join!(
        enter(&store, "RACE01", "p1", "One"),
        enter(&store, "RACE01", "p2", "Two"),
    );

    let view = first
        .wait_for(|view| view.document.participants.len() == 2)
        .await
        .unwrap();
    let host = view.document.host_id.clone();
    assert!(host == ParticipantId::new("p1") || host == ParticipantId::new("p2"));

    let other = second
        .wait_for(|view| view.document.participants.len() == 2)
        .await
        .unwrap();
    assert_eq!(other.document.host_id, host);
    assert_ne!(view.is_host, other.is_host);
}

#[tokio::test]
async fn next_round_resets_votes_and_double_votes_are_ignored() {
    let store = MemorySessionStore::new();
    let questions = pizza_or_sushi();

    let ann = enter(&store, "AB12CD", "ann", "Ann").await;
    let bo = enter(&store, "AB12CD", "bo", "Bo").await;
    wait_phase(&ann, SessionPhase::Lobby).await;
    ann.wait_for(|view| view.document.participants.len() == 2)
        .await
        .unwrap();

    ann.start_round(&questions).await.unwrap();
    wait_phase(&ann, SessionPhase::Voting).await;
    wait_phase(&bo, SessionPhase::Voting).await;

    ann.submit_vote(OptionRef::A).await.unwrap();
    ann.wait_for(|view| view.my_vote == Some(OptionRef::A))
        .await
        .unwrap();
    // A second vote in the same round changes nothing.
    ann.submit_vote(OptionRef::B).await.unwrap();
    bo.submit_vote(OptionRef::A).await.unwrap();

    let results = wait_phase(&bo, SessionPhase::Results).await.results.unwrap();
    assert_eq!(results.option_a.votes, 2);
    assert_eq!(results.option_a.percentage, 100);
    assert_eq!(results.option_b.percentage, 0);

    wait_phase(&ann, SessionPhase::Results).await;
    ann.advance_round(&questions).await.unwrap();
    let next = wait_phase(&bo, SessionPhase::Voting).await;
    assert!(next.document.participants.values().all(|p| p.vote.is_none()));
    assert_eq!(next.my_vote, None);
}

#[tokio::test]
async fn guest_cannot_start_and_departed_players_still_owe_a_vote() {
    let store = MemorySessionStore::new();
    let questions = pizza_or_sushi();

    let ann = enter(&store, "SOLO01", "ann", "Ann").await;
    let bo = enter(&store, "SOLO01", "bo", "Bo").await;
    bo.wait_for(|view| view.document.participants.len() == 2)
        .await
        .unwrap();

    let err = bo.start_round(&questions).await.unwrap_err();
    assert!(matches!(err, ServiceError::Forbidden(_)));
    drop(bo);

    // Leaving writes nothing: Bo is still listed and still has to vote.
    ann.start_round(&questions).await.unwrap();
    wait_phase(&ann, SessionPhase::Voting).await;
    ann.submit_vote(OptionRef::B).await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    match ann.status() {
        SessionStatus::Active(view) => assert_eq!(view.document.phase, SessionPhase::Voting),
        SessionStatus::Failed(reason) => panic!("session failed: {reason}"),
    }
}
