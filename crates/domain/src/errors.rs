//! 领域模型错误定义

use thiserror::Error;

/// 领域模型错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    /// 会话标识不完整
    #[error("无效的会话标识: {field} 不能为空")]
    InvalidIdentity { field: String },
}

impl DomainError {
    /// 创建会话标识错误
    pub fn invalid_identity(field: impl Into<String>) -> Self {
        Self::InvalidIdentity {
            field: field.into(),
        }
    }
}

/// 领域模型结果类型
pub type DomainResult<T> = Result<T, DomainError>;
