use std::convert::Infallible;
use std::pin::Pin;
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::{Stream, StreamExt};
use tokio_stream::wrappers::BroadcastStream;

use crate::session::SessionBroadcasts;

pub type VerdictStream = Sse<Pin<Box<dyn Stream<Item = Result<Event, Infallible>> + Send>>>;

/// Build a Server-Sent Events stream of verdicts as they are emitted.
///
/// Lagging subscribers skip what they missed rather than closing the stream.
pub fn verdicts(broadcasts: &SessionBroadcasts) -> VerdictStream {
    let stream =
        BroadcastStream::new(broadcasts.subscribe_verdicts()).filter_map(|result| async move {
            match result {
                Ok(verdict) => match serde_json::to_string(&verdict) {
                    Ok(payload) => Some(Ok(Event::default().event("verdict").data(payload))),
                    Err(_) => None,
                },
                Err(_) => None,
            }
        });

    Sse::new(Box::pin(stream) as Pin<Box<_>>).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(5))
            .text("debug-keepalive"),
    )
}
