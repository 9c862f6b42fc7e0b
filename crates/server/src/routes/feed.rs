//! Change feed over Server-Sent Events.

use std::convert::Infallible;

use async_stream::stream;
use axum::{
    Router,
    extract::State,
    response::{
        Sse,
        sse::{Event, KeepAlive},
    },
    routing::get,
};
use futures::Stream;
use tokio::sync::broadcast::error::RecvError;

use dosirak_core::{Actor, Role};

use crate::feed::OrderChange;
use crate::middleware::RequireActor;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/orders/feed", get(feed))
}

/// Whether `actor` may see a change.
fn visible_to(actor: &Actor, change: &OrderChange) -> bool {
    match actor.role {
        Role::Buyer => actor.id == change.uid.as_str(),
        Role::Seller => actor.id == change.store_id.as_str(),
        Role::Admin => true,
    }
}

/// Stream changes to orders the caller can see.
///
/// GET /api/orders/feed
///
/// Each `change` event carries an [`OrderChange`] as JSON. A `resync` event
/// means changes were dropped and the client should reload its view.
async fn feed(
    State(state): State<AppState>,
    RequireActor(actor): RequireActor,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut receiver = state.orders().feed().subscribe();
    tracing::debug!(%actor, "feed subscriber connected");

    let events = stream! {
        loop {
            match receiver.recv().await {
                Ok(change) => {
                    if !visible_to(&actor, &change) {
                        continue;
                    }
                    let json = serde_json::to_string(change.as_ref()).unwrap_or_else(|_| {
                        r#"{"kind":"error","message":"Failed to serialize change"}"#.to_string()
                    });
                    yield Ok(Event::default().event("change").data(json));
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(%actor, skipped, "feed subscriber lagged");
                    yield Ok(Event::default().event("resync").data(skipped.to_string()));
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Sse::new(events).keep_alive(KeepAlive::default())
}
