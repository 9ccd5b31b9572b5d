use std::{convert::Infallible, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;

use crate::{
    dto::{
        session::SessionViewDto,
        sse::{Handshake, ServerEvent},
    },
    services::{
        session_client::SessionStatus,
        sse_events::{EVENT_HANDSHAKE, EVENT_SESSION_SNAPSHOT},
    },
    state::SharedState,
};

const STREAM_NAME: &str = "session";

/// Subscribe to the session stream.
///
/// Returns the live receiver together with the events a fresh subscriber
/// needs first: the handshake and, when a session is active, its latest view.
pub async fn subscribe_session(
    state: &SharedState,
) -> (broadcast::Receiver<ServerEvent>, Vec<ServerEvent>) {
    // Subscribe before reading the current view so no change falls in between.
    let receiver = state.sse().subscribe();
    let mut initial = Vec::with_capacity(2);

    let handshake = Handshake {
        stream: STREAM_NAME.to_string(),
        message: "session stream connected".to_string(),
        degraded: state.is_degraded().await,
        participant_id: state.participant().to_string(),
    };
    push_json(&mut initial, EVENT_HANDSHAKE, &handshake);

    if let Ok(client) = state.active_client().await {
        if let SessionStatus::Active(view) = client.status() {
            push_json(&mut initial, EVENT_SESSION_SNAPSHOT, &SessionViewDto::from(view));
        }
    }

    (receiver, initial)
}

/// Convert a broadcast receiver into an SSE response, emitting `initial`
/// first and forwarding live events until the client disconnects.
pub fn to_sse_stream(
    mut receiver: broadcast::Receiver<ServerEvent>,
    initial: Vec<ServerEvent>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // small bounded channel between forwarder and response
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(8);

    tokio::spawn(async move {
        for payload in initial {
            if tx.send(Ok(to_event(payload))).await.is_err() {
                return;
            }
        }

        loop {
            tokio::select! {
                _ = tx.closed() => break,
                recv_result = receiver.recv() => {
                    match recv_result {
                        Ok(payload) => {
                            if tx.send(Ok(to_event(payload))).await.is_err() {
                                break;
                            }
                        }
                        Err(RecvError::Closed) => break,
                        Err(RecvError::Lagged(skipped)) => {
                            // Snapshots are full state; the next one catches the client up.
                            warn!(skipped, "SSE subscriber lagged");
                            continue;
                        }
                    }
                }
            }
        }

        tracing::info!("session SSE stream disconnected");
    });

    let stream = ReceiverStream::new(rx);
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

fn to_event(payload: ServerEvent) -> Event {
    let mut event = Event::default().data(payload.data);
    if let Some(name) = payload.event {
        event = event.event(name);
    }
    event
}

fn push_json(events: &mut Vec<ServerEvent>, name: &str, payload: &impl serde::Serialize) {
    match ServerEvent::json(Some(name.to_string()), payload) {
        Ok(event) => events.push(event),
        Err(err) => warn!(event = name, error = %err, "failed to serialize SSE payload"),
    }
}
