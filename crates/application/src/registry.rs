//! 在线客户端注册表
//!
//! 记录当前持有推送连接的 `(user_id, session_id)`，并把消息扇出到一个、多个或全部会话。
//! 连接成员只能通过这里修改。

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use domain::{Audience, ConnectionId, PushMessage, SessionId, SessionIdentity, UserId};
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use crate::ApplicationError;

/// 注册表持有的发送端
pub type MessageSender = mpsc::Sender<Arc<PushMessage>>;
/// 投递任务独占的接收端
pub type MessageReceiver = mpsc::Receiver<Arc<PushMessage>>;

/// 连接/断开时触发的回调，每次调用都在独立任务中执行
pub type LifecycleTrigger = Arc<dyn Fn(SessionIdentity) -> BoxFuture<'static, ()> + Send + Sync>;

/// 注册表配置
#[derive(Debug, Clone)]
pub struct RegistryOptions {
    /// 每个连接的消息队列容量
    pub channel_capacity: usize,
    /// 单个连接写入的最长等待时间，超时的消息被丢弃
    pub send_timeout: Duration,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            channel_capacity: 64,
            send_timeout: Duration::from_secs(1),
        }
    }
}

struct ClientEntry {
    connection_id: ConnectionId,
    sender: MessageSender,
}

type SessionMap = HashMap<SessionId, ClientEntry>;
type UserMap = HashMap<UserId, SessionMap>;

#[derive(Default)]
struct RegistryState {
    clients: UserMap,
    on_connect: Vec<LifecycleTrigger>,
    on_disconnect: Vec<LifecycleTrigger>,
    closed: bool,
}

/// 在线客户端注册表
pub struct ClientRegistry {
    state: RwLock<RegistryState>,
    options: RegistryOptions,
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new(RegistryOptions::default())
    }
}

impl ClientRegistry {
    pub fn new(options: RegistryOptions) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            options,
        }
    }

    pub fn options(&self) -> &RegistryOptions {
        &self.options
    }

    /// 按配置容量创建一条投递通道
    pub fn channel(&self) -> (MessageSender, MessageReceiver) {
        mpsc::channel(self.options.channel_capacity.max(1))
    }

    /// 注册连接回调
    pub async fn add_on_connect_trigger<F, Fut>(&self, trigger: F)
    where
        F: Fn(SessionIdentity) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let trigger: LifecycleTrigger = Arc::new(move |identity| trigger(identity).boxed());
        self.state.write().await.on_connect.push(trigger);
    }

    /// 注册断开回调
    pub async fn add_on_disconnect_trigger<F, Fut>(&self, trigger: F)
    where
        F: Fn(SessionIdentity) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let trigger: LifecycleTrigger = Arc::new(move |identity| trigger(identity).boxed());
        self.state.write().await.on_disconnect.push(trigger);
    }

    /// 注册连接的发送端。
    ///
    /// 同一会话已有连接时新连接替换旧连接，旧的发送端被丢弃，旧连接的接收端随之结束。
    /// 返回本次注册的连接 ID，供 [`ClientRegistry::release`] 使用。
    /// 注册表关闭后拒绝新连接，传入的发送端被丢弃。
    pub async fn connect(
        &self,
        identity: SessionIdentity,
        sender: MessageSender,
    ) -> Result<ConnectionId, ApplicationError> {
        let connection_id = ConnectionId::new();
        let mut state = self.state.write().await;
        if state.closed {
            debug!(
                user_id = %identity.user_id(),
                session_id = %identity.session_id(),
                "注册表已关闭，拒绝连接"
            );
            return Err(ApplicationError::RegistryClosed);
        }

        let replaced = state
            .clients
            .entry(identity.user_id().clone())
            .or_default()
            .insert(
                identity.session_id().clone(),
                ClientEntry {
                    connection_id,
                    sender,
                },
            );

        if let Some(previous) = replaced {
            info!(
                user_id = %identity.user_id(),
                session_id = %identity.session_id(),
                previous_connection = %previous.connection_id,
                "同一会话重复连接，替换旧连接"
            );
        }

        spawn_triggers(&state.on_connect, &identity);
        drop(state);

        debug!(
            user_id = %identity.user_id(),
            session_id = %identity.session_id(),
            connection_id = %connection_id,
            "客户端已连接"
        );
        Ok(connection_id)
    }

    /// 断开会话并关闭其投递通道。会话不存在时什么也不做。
    pub async fn disconnect(&self, identity: &SessionIdentity) -> bool {
        self.remove(identity, None).await
    }

    /// 只有当会话仍属于给定连接时才断开。
    ///
    /// 连接被同一会话的新连接替换后，旧连接的清理不会影响新连接。
    pub async fn release(&self, identity: &SessionIdentity, connection_id: ConnectionId) -> bool {
        self.remove(identity, Some(connection_id)).await
    }

    /// 关闭注册表：断开所有会话并拒绝之后的连接，返回断开的数量。
    ///
    /// 停机时调用，所有推送连接随之结束。
    pub async fn close(&self) -> usize {
        let mut state = self.state.write().await;
        state.closed = true;
        let clients = std::mem::take(&mut state.clients);

        let mut count = 0;
        for (user_id, sessions) in clients {
            for session_id in sessions.into_keys() {
                count += 1;
                // 键在连接时已校验过
                if let Ok(identity) = SessionIdentity::new(user_id.clone(), session_id) {
                    spawn_triggers(&state.on_disconnect, &identity);
                }
            }
        }
        drop(state);

        info!(count, "注册表已关闭，所有客户端已断开");
        count
    }

    async fn remove(&self, identity: &SessionIdentity, owner: Option<ConnectionId>) -> bool {
        let mut state = self.state.write().await;

        let Some(sessions) = state.clients.get_mut(identity.user_id()) else {
            return false;
        };

        let owned = match (sessions.get(identity.session_id()), owner) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(entry), Some(connection_id)) => entry.connection_id == connection_id,
        };
        if !owned {
            return false;
        }

        // 丢弃发送端即关闭通道
        let removed = sessions.remove(identity.session_id());
        if sessions.is_empty() {
            state.clients.remove(identity.user_id());
        }

        spawn_triggers(&state.on_disconnect, identity);
        drop(state);

        if let Some(entry) = removed {
            debug!(
                user_id = %identity.user_id(),
                session_id = %identity.session_id(),
                connection_id = %entry.connection_id,
                "客户端已断开"
            );
        }
        true
    }

    /// 把消息投递给指定范围内的所有会话，返回成功写入的通道数。
    ///
    /// 持读锁期间只复制目标发送端，写入在释放锁之后并发进行，
    /// 每个通道的等待时间受 `send_timeout` 限制，超时或已关闭的通道不计数。
    pub async fn send(&self, message: impl Into<Arc<PushMessage>>, audience: &Audience) -> usize {
        let message = message.into();
        let targets = self.targets(audience).await;
        if targets.is_empty() {
            return 0;
        }

        let timeout = self.options.send_timeout;
        let deliveries = targets.into_iter().map(|(connection_id, sender)| {
            let message = Arc::clone(&message);
            async move {
                match tokio::time::timeout(timeout, sender.send(message)).await {
                    Ok(Ok(())) => true,
                    Ok(Err(_)) => {
                        debug!(connection_id = %connection_id, "投递通道已关闭，丢弃消息");
                        false
                    }
                    Err(_) => {
                        warn!(
                            connection_id = %connection_id,
                            timeout_ms = timeout.as_millis() as u64,
                            "投递超时，丢弃消息"
                        );
                        false
                    }
                }
            }
        });

        join_all(deliveries)
            .await
            .into_iter()
            .filter(|delivered| *delivered)
            .count()
    }

    async fn targets(&self, audience: &Audience) -> Vec<(ConnectionId, MessageSender)> {
        let state = self.state.read().await;
        let snapshot = |sessions: &SessionMap| {
            sessions
                .values()
                .map(|entry| (entry.connection_id, entry.sender.clone()))
                .collect::<Vec<_>>()
        };

        match audience {
            Audience::All => state.clients.values().flat_map(snapshot).collect(),
            Audience::User(user_id) => state.clients.get(user_id).map(snapshot).unwrap_or_default(),
            Audience::Session(identity) => state
                .clients
                .get(identity.user_id())
                .and_then(|sessions| sessions.get(identity.session_id()))
                .map(|entry| vec![(entry.connection_id, entry.sender.clone())])
                .unwrap_or_default(),
        }
    }

    /// 当前在线的会话数
    pub async fn connection_count(&self) -> usize {
        let state = self.state.read().await;
        state.clients.values().map(HashMap::len).sum()
    }

    pub async fn is_closed(&self) -> bool {
        self.state.read().await.closed
    }

    /// 当前在线的用户数
    pub async fn user_count(&self) -> usize {
        self.state.read().await.clients.len()
    }

    pub async fn is_connected(&self, identity: &SessionIdentity) -> bool {
        let state = self.state.read().await;
        state
            .clients
            .get(identity.user_id())
            .is_some_and(|sessions| sessions.contains_key(identity.session_id()))
    }
}

fn spawn_triggers(triggers: &[LifecycleTrigger], identity: &SessionIdentity) {
    for trigger in triggers {
        tokio::spawn(trigger(identity.clone()));
    }
}
