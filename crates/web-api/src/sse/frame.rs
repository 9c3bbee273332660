//! 推送消息到 SSE 事件的转换

use axum::response::sse::Event;
use domain::PushMessage;

/// 把消息转换为一个 SSE 事件。
///
/// 没有 ID 或类型时省略对应的行，最小的帧是 `data: <payload>\n\n`。
/// 数据中的 `\r\n`、`\r`、`\n` 都按换行处理，每行一个 `data:` 字段。
pub fn encode_event(message: &PushMessage) -> Event {
    let mut event = Event::default();

    if let Some(id) = message.id().map(single_line).filter(|id| !id.is_empty()) {
        event = event.id(id);
    }
    if let Some(event_type) = message
        .event_type()
        .map(single_line)
        .filter(|t| !t.is_empty())
    {
        event = event.event(event_type);
    }

    event.data(normalize_newlines(message.data()))
}

/// `id`/`event` 字段不允许出现行结束符和空字符，反序列化得到的消息也要处理
fn single_line(value: &str) -> String {
    value.replace(['\r', '\n', '\0'], "")
}

fn normalize_newlines(data: &str) -> String {
    data.replace("\r\n", "\n").replace('\r', "\n")
}

#[cfg(test)]
pub(crate) async fn render_events(events: Vec<Event>) -> String {
    use std::convert::Infallible;

    use axum::body::to_bytes;
    use axum::response::{sse::Sse, IntoResponse};

    let stream = futures::stream::iter(events.into_iter().map(Ok::<_, Infallible>));
    let body = Sse::new(stream).into_response().into_body();
    let bytes = to_bytes(body, usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}
