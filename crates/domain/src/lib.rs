//! 推送系统核心领域模型
//!
//! 包含推送消息、会话标识、投递地址以及服务状态快照等值对象。

pub mod errors;
pub mod message;
pub mod status;
pub mod value_objects;

// 重新导出常用类型
pub use errors::*;
pub use message::PushMessage;
pub use status::{format_uptime, ServiceStatus};
pub use value_objects::*;
