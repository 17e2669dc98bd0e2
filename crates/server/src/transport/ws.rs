// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `/events` — streaming subscription over WebSocket.
//!
//! Each frame is one `{kind, timestamp, payload}` JSON event.  A
//! `?kinds=status_update,progress` query filters delivery; slow consumers
//! see a `lagged` marker counting dropped events.  Disconnecting cancels
//! the subscription only, never in-flight work.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;

use crate::events::{lagged_wire_json, EventFilter, Published, WorkflowEvent};
use crate::session::epoch_ms;
use crate::transport::App;

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    #[serde(default)]
    pub kinds: Option<String>,
}

/// WebSocket upgrade handler for the event stream.
pub async fn events_handler(
    State(app): State<Arc<App>>,
    Query(query): Query<EventsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let filter = EventFilter::new(query.kinds.as_deref().unwrap_or_default());
    ws.on_upgrade(move |socket| handle_connection(app, filter, socket))
}

/// Per-connection event loop.
async fn handle_connection(app: Arc<App>, filter: EventFilter, socket: WebSocket) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    // Subscribe before the backfill snapshot so nothing published in
    // between is lost.
    let mut event_rx = app.store.events().subscribe();

    // Backfill: late joiners immediately learn the current status.
    let session = app.store.snapshot();
    let backfill = Published {
        timestamp: epoch_ms(),
        event: WorkflowEvent::StatusUpdate {
            status: session.status,
            phase: session.conversation_phase,
        },
    };
    if filter.wants(&backfill.event) {
        if let Ok(json) = backfill.to_wire_json() {
            if ws_tx.send(Message::Text(json.into())).await.is_err() {
                return;
            }
        }
    }

    loop {
        tokio::select! {
            event = event_rx.recv() => {
                match event {
                    Ok(published) => {
                        if !filter.wants(&published.event) {
                            continue;
                        }
                        let Ok(json) = published.to_wire_json() else {
                            continue;
                        };
                        if ws_tx.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        let json = lagged_wire_json(n, epoch_ms());
                        if ws_tx.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    // Inbound frames other than close are ignored.
                    Some(Ok(_)) => continue,
                }
            }
            _ = app.shutdown.cancelled() => break,
        }
    }
}
