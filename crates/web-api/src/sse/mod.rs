//! Server-Sent Events 推送通道

mod frame;
mod transport;

pub use frame::encode_event;
pub use transport::{
    event_stream, ChannelSink, DeliveryTransport, EventSink, EventStream, TransportError,
};

use axum::{
    extract::State,
    http::{header, HeaderName},
    response::{
        sse::{KeepAlive, Sse},
        IntoResponse,
    },
};
use tokio_util::sync::CancellationToken;

use crate::{auth::AuthSession, error::ApiError, state::AppState};

/// `GET /api/events`：为已认证会话打开事件流
///
/// `Sse` 负责 `text/event-stream` 与 `no-cache` 响应头；停机期间返回 503。
pub async fn events(
    State(state): State<AppState>,
    AuthSession(identity): AuthSession,
) -> Result<impl IntoResponse, ApiError> {
    let cancel = CancellationToken::new();
    let (sink, stream) = event_stream(cancel.clone());

    let transport = DeliveryTransport::open(state.registry.clone(), identity, sink).await?;
    tokio::spawn(transport.run(cancel));

    Ok((
        [
            (header::CONNECTION, "keep-alive"),
            (HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        Sse::new(stream).keep_alive(KeepAlive::default()),
    ))
}
