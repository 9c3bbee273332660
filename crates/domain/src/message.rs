use serde::{Deserialize, Serialize};

/// 推送给客户端的消息。
///
/// 构造后不可变，通常包在 `Arc` 中在多个连接之间共享。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(
        rename = "type",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    event_type: Option<String>,
    data: String,
}

impl PushMessage {
    /// 只有数据的消息
    pub fn new(data: impl Into<String>) -> Self {
        Self {
            id: None,
            event_type: None,
            data: data.into(),
        }
    }

    /// 带事件类型的消息
    pub fn typed(event_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self::new(data).with_type(event_type)
    }

    /// 设置消息 ID，空字符串视为没有 ID。换行、回车和空字符会被去掉。
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(single_line(id.into())).filter(|id| !id.is_empty());
        self
    }

    /// 设置事件类型，空字符串视为没有类型。换行、回车和空字符会被去掉。
    pub fn with_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(single_line(event_type.into())).filter(|t| !t.is_empty());
        self
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref().filter(|id| !id.is_empty())
    }

    pub fn event_type(&self) -> Option<&str> {
        self.event_type.as_deref().filter(|t| !t.is_empty())
    }

    pub fn data(&self) -> &str {
        &self.data
    }
}

/// 事件流的单行字段不能包含行结束符
fn single_line(value: String) -> String {
    if value.contains(['\r', '\n', '\0']) {
        value.replace(['\r', '\n', '\0'], "")
    } else {
        value
    }
}
