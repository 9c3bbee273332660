//! 应用层实现。
//!
//! 提供在线客户端注册表、推送扇出以及心跳服务。
//! 这一层不依赖任何 HTTP 细节，投递通道由传输层创建并注册进来。

pub mod clock;
pub mod error;
pub mod heartbeat;
pub mod registry;

pub use clock::{Clock, SystemClock};
pub use error::ApplicationError;
pub use heartbeat::{HeartbeatService, HeartbeatState, HEARTBEAT_EVENT};
pub use registry::{
    ClientRegistry, LifecycleTrigger, MessageReceiver, MessageSender, RegistryOptions,
};
