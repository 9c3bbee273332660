use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{DomainError, DomainResult};

/// 用户唯一标识。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for UserId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// 会话唯一标识。同一用户可以同时持有多个会话。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// 生成随机会话标识
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// 已认证的会话身份 `(user_id, session_id)`，两部分均不为空。
///
/// 注册表以它作为连接的键。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionIdentity {
    user_id: UserId,
    session_id: SessionId,
}

impl SessionIdentity {
    pub fn new(user_id: impl Into<UserId>, session_id: impl Into<SessionId>) -> DomainResult<Self> {
        let user_id = user_id.into();
        let session_id = session_id.into();

        if user_id.is_empty() {
            return Err(DomainError::invalid_identity("user_id"));
        }
        if session_id.is_empty() {
            return Err(DomainError::invalid_identity("session_id"));
        }

        Ok(Self {
            user_id,
            session_id,
        })
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }
}

impl fmt::Display for SessionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.user_id, self.session_id)
    }
}

/// 单个连接的唯一标识，每次注册都会分配新的值。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 推送消息的投递范围
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Audience {
    /// 所有用户的所有会话
    All,
    /// 指定用户的所有会话
    User(UserId),
    /// 指定用户的单个会话
    Session(SessionIdentity),
}

impl Audience {
    /// 按标识是否为空选择投递范围：
    /// 两者都为空时广播，只有用户时投递给该用户全部会话，两者都有时只投递给该会话。
    ///
    /// 用户为空时会话标识被忽略。
    pub fn from_parts(user_id: &str, session_id: &str) -> Self {
        if user_id.is_empty() {
            return Self::All;
        }
        match SessionIdentity::new(user_id, session_id) {
            Ok(identity) => Self::Session(identity),
            Err(_) => Self::User(UserId::from(user_id)),
        }
    }

    pub fn user(user_id: impl Into<UserId>) -> Self {
        Self::User(user_id.into())
    }

    pub fn session(identity: SessionIdentity) -> Self {
        Self::Session(identity)
    }
}

impl fmt::Display for Audience {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Audience::All => f.write_str("all"),
            Audience::User(user_id) => write!(f, "user:{user_id}"),
            Audience::Session(identity) => write!(f, "session:{identity}"),
        }
    }
}
