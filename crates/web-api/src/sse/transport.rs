//! 推送连接的投递任务
//!
//! 每个 SSE 连接对应一个 [`DeliveryTransport`]：向注册表登记自己的通道，
//! 把收到的消息转换成 SSE 事件写给对端，直到通道被关闭。
//! 事件的字节编码由 axum 的 `Sse` 响应体完成。

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use application::{ApplicationError, ClientRegistry, MessageReceiver};
use async_trait::async_trait;
use axum::response::sse::Event;
use domain::{ConnectionId, PushMessage, SessionIdentity};
use futures::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use super::frame::encode_event;

/// 响应体和投递任务之间的缓冲区大小
const BODY_BUFFER: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("streaming unsupported")]
    StreamingUnsupported,
    #[error("server is shutting down")]
    ShuttingDown,
    #[error("peer closed the connection")]
    PeerClosed,
}

/// SSE 事件的输出端
#[async_trait]
pub trait EventSink: Send {
    /// 能否逐条刷新输出
    fn supports_flush(&self) -> bool;

    async fn write(&mut self, event: Event) -> Result<(), TransportError>;

    async fn flush(&mut self) -> Result<(), TransportError>;
}

/// 把事件写入 HTTP 响应体的输出端
pub struct ChannelSink {
    pending: Vec<Event>,
    body: mpsc::Sender<Event>,
}

/// SSE 事件流，交给 `axum::response::sse::Sse` 作为响应体。
/// 被丢弃（对端断开）时取消对应的连接令牌。
pub struct EventStream {
    inner: ReceiverStream<Event>,
    _guard: DropGuard,
}

/// 创建一对输出端和响应体，响应体被丢弃时 `cancel` 会被触发
pub fn event_stream(cancel: CancellationToken) -> (ChannelSink, EventStream) {
    let (body, rx) = mpsc::channel(BODY_BUFFER);
    (
        ChannelSink {
            pending: Vec::new(),
            body,
        },
        EventStream {
            inner: ReceiverStream::new(rx),
            _guard: cancel.drop_guard(),
        },
    )
}

impl Stream for EventStream {
    type Item = Result<Event, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner)
            .poll_next(cx)
            .map(|event| event.map(Ok))
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    fn supports_flush(&self) -> bool {
        true
    }

    async fn write(&mut self, event: Event) -> Result<(), TransportError> {
        if self.body.is_closed() {
            return Err(TransportError::PeerClosed);
        }
        self.pending.push(event);
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), TransportError> {
        for event in std::mem::take(&mut self.pending) {
            self.body
                .send(event)
                .await
                .map_err(|_| TransportError::PeerClosed)?;
        }
        Ok(())
    }
}

/// 单个推送连接
pub struct DeliveryTransport<S> {
    registry: Arc<ClientRegistry>,
    identity: SessionIdentity,
    connection_id: ConnectionId,
    receiver: MessageReceiver,
    sink: S,
    closed: Arc<AtomicBool>,
}

impl<S: EventSink> DeliveryTransport<S> {
    /// 检查输出端能力并向注册表登记连接。
    ///
    /// 输出端不支持刷新时直接失败，不做任何登记；注册表已关闭（停机中）时同样失败。
    pub async fn open(
        registry: Arc<ClientRegistry>,
        identity: SessionIdentity,
        sink: S,
    ) -> Result<Self, TransportError> {
        if !sink.supports_flush() {
            warn!(
                user_id = %identity.user_id(),
                session_id = %identity.session_id(),
                "输出端不支持流式写入"
            );
            return Err(TransportError::StreamingUnsupported);
        }

        let (sender, receiver) = registry.channel();
        let connection_id = registry
            .connect(identity.clone(), sender)
            .await
            .map_err(|err| match err {
                ApplicationError::RegistryClosed => TransportError::ShuttingDown,
                other => {
                    warn!(error = %other, "推送连接登记失败");
                    TransportError::ShuttingDown
                }
            })?;

        Ok(Self {
            registry,
            identity,
            connection_id,
            receiver,
            sink,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// 持续投递直到通道关闭，返回成功写出的消息数。
    ///
    /// `cancel` 触发（对端断开）时从注册表注销，注销会关闭通道从而结束循环。
    pub async fn run(mut self, cancel: CancellationToken) -> usize {
        let watcher = tokio::spawn({
            let registry = Arc::clone(&self.registry);
            let identity = self.identity.clone();
            let connection_id = self.connection_id;
            let closed = Arc::clone(&self.closed);
            let cancel = cancel.clone();
            async move {
                cancel.cancelled().await;
                if !closed.swap(true, Ordering::SeqCst) {
                    registry.release(&identity, connection_id).await;
                }
            }
        });

        let mut delivered = 0;
        while let Some(message) = self.receiver.recv().await {
            match self.deliver(&message).await {
                Ok(()) => delivered += 1,
                Err(err) => warn!(
                    connection_id = %self.connection_id,
                    error = %err,
                    message = ?message,
                    "事件写入失败，丢弃消息"
                ),
            }
        }

        if !self.closed.swap(true, Ordering::SeqCst) {
            self.registry
                .release(&self.identity, self.connection_id)
                .await;
        }
        cancel.cancel();
        if let Err(err) = watcher.await {
            debug!(error = %err, "连接监视任务异常结束");
        }

        info!(
            user_id = %self.identity.user_id(),
            session_id = %self.identity.session_id(),
            connection_id = %self.connection_id,
            delivered,
            "推送连接结束"
        );
        delivered
    }

    async fn deliver(&mut self, message: &PushMessage) -> Result<(), TransportError> {
        self.sink.write(encode_event(message)).await?;
        self.sink.flush().await
    }
}
