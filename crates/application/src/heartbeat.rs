//! 心跳服务
//!
//! 周期性地（或按需）把服务状态快照推送给在线客户端，
//! 既保持长连接活跃，也让客户端知道服务的运行情况。

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use domain::{status::truncate_to_second, Audience, PushMessage, ServiceStatus, SessionIdentity};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{ApplicationError, ClientRegistry, Clock};

/// 心跳消息的事件类型
pub const HEARTBEAT_EVENT: &str = "heartbeat";

/// 心跳服务的生命周期：`Idle -> Running -> Stopped`，停止后不能再启动。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatState {
    Idle,
    Running,
    Stopped,
}

pub struct HeartbeatService {
    registry: Arc<ClientRegistry>,
    status: ServiceStatus,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
    state: Mutex<HeartbeatState>,
}

impl HeartbeatService {
    pub fn new(registry: Arc<ClientRegistry>, status: ServiceStatus, clock: Arc<dyn Clock>) -> Self {
        Self {
            registry,
            status,
            clock,
            cancel: CancellationToken::new(),
            state: Mutex::new(HeartbeatState::Idle),
        }
    }

    pub fn state(&self) -> HeartbeatState {
        *self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 按给定周期广播心跳，直到 [`HeartbeatService::stop`] 被调用。
    ///
    /// 第一次心跳在一个周期之后发出。周期为零时返回 [`ApplicationError::InvalidInterval`]。
    pub async fn start(&self, period: Duration) -> Result<(), ApplicationError> {
        if period.is_zero() {
            return Err(ApplicationError::InvalidInterval(period));
        }
        self.transition(HeartbeatState::Running)?;
        info!(period_secs = period.as_secs_f64(), "心跳服务启动");

        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.send_heartbeat(self.clock.now(), &Audience::All).await;
                }
            }
        }

        drop(ticker);
        info!("心跳服务已退出");
        Ok(())
    }

    /// 请求停止。`start` 会在当前心跳发送完成后返回。
    pub fn stop(&self) {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *state = HeartbeatState::Stopped;
        self.cancel.cancel();
        debug!("请求停止心跳服务");
    }

    /// 以 `now`（截断到秒）生成状态快照并推送给指定范围，返回投递数。
    pub async fn send_heartbeat(&self, now: DateTime<Utc>, audience: &Audience) -> usize {
        let snapshot = self.status.populated(truncate_to_second(now));
        let data = serde_json::to_string(&snapshot).unwrap_or_else(|err| {
            warn!(error = %err, "服务状态序列化失败");
            "{}".to_string()
        });

        let count = self
            .registry
            .send(PushMessage::typed(HEARTBEAT_EVENT, data), audience)
            .await;
        debug!(count, audience = %audience, "心跳已发送");
        count
    }

    /// 按用户/会话标识发送心跳，空标识表示更大的范围，规则同 [`Audience::from_parts`]。
    pub async fn send_heartbeat_to(
        &self,
        now: DateTime<Utc>,
        user_id: &str,
        session_id: &str,
    ) -> usize {
        self.send_heartbeat(now, &Audience::from_parts(user_id, session_id))
            .await
    }

    /// 注册连接回调：新会话连接后立即收到一次心跳
    pub async fn greet_new_sessions(self: &Arc<Self>) {
        let service: Weak<Self> = Arc::downgrade(self);
        self.registry
            .add_on_connect_trigger(move |identity: SessionIdentity| {
                let service = service.upgrade();
                async move {
                    if let Some(service) = service {
                        let now = service.clock.now();
                        service
                            .send_heartbeat(now, &Audience::session(identity))
                            .await;
                    }
                }
            })
            .await;
    }

    fn transition(&self, next: HeartbeatState) -> Result<(), ApplicationError> {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match (*state, next) {
            (HeartbeatState::Idle, HeartbeatState::Running) => {
                *state = next;
                Ok(())
            }
            (HeartbeatState::Running, HeartbeatState::Running) => {
                Err(ApplicationError::HeartbeatAlreadyRunning)
            }
            _ => Err(ApplicationError::HeartbeatStopped),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use chrono::{TimeDelta, TimeZone};
    use tokio::sync::mpsc::error::TryRecvError;

    fn start_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()
    }

    fn status() -> ServiceStatus {
        ServiceStatus::new("push-server", "1.2.3", None, start_time())
    }

    fn identity(user: &str, session: &str) -> SessionIdentity {
        SessionIdentity::new(user, session).unwrap()
    }

    fn fixed_clock(now: DateTime<Utc>) -> Arc<dyn Clock> {
        let mut clock = MockClock::new();
        clock.expect_now().returning(move || now);
        Arc::new(clock)
    }

    #[tokio::test]
    async fn test_send_heartbeat_broadcasts() {
        let registry = Arc::new(ClientRegistry::default());
        let (tx1, mut rx1) = registry.channel();
        let (tx2, mut rx2) = registry.channel();
        registry.connect(identity("u1", "s1"), tx1).await.unwrap();
        registry.connect(identity("u2", "s1"), tx2).await.unwrap();

        let service = HeartbeatService::new(registry, status(), fixed_clock(start_time()));
        let count = service.send_heartbeat_to(start_time(), "", "").await;
        assert_eq!(count, 2);

        for rx in [&mut rx1, &mut rx2] {
            let message = rx.recv().await.unwrap();
            assert_eq!(message.event_type(), Some(HEARTBEAT_EVENT));
            assert_eq!(message.id(), None);
        }
    }

    #[tokio::test]
    async fn test_send_heartbeat_to_single_session() {
        let registry = Arc::new(ClientRegistry::default());
        let (tx1, mut rx1) = registry.channel();
        let (tx2, mut rx2) = registry.channel();
        registry.connect(identity("u1", "s1"), tx1).await.unwrap();
        registry.connect(identity("u1", "s2"), tx2).await.unwrap();

        let service = HeartbeatService::new(registry, status(), fixed_clock(start_time()));
        let now = start_time() + TimeDelta::seconds(90) + TimeDelta::milliseconds(999);
        assert_eq!(service.send_heartbeat_to(now, "u1", "s1").await, 1);

        let message = rx1.recv().await.unwrap();
        let payload: serde_json::Value = serde_json::from_str(message.data()).unwrap();
        assert_eq!(payload["time"], "2024-03-01T10:01:30Z");
        assert_eq!(payload["uptime"], "1m30s");
        assert_eq!(payload["service"], "push-server");
        assert_eq!(payload["version"], "1.2.3");
        assert!(matches!(rx2.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_new_session_is_greeted() {
        let registry = Arc::new(ClientRegistry::default());
        let service = Arc::new(HeartbeatService::new(
            registry.clone(),
            status(),
            fixed_clock(start_time() + TimeDelta::seconds(5)),
        ));
        service.greet_new_sessions().await;

        let (tx1, mut rx1) = registry.channel();
        let (tx2, mut rx2) = registry.channel();
        registry.connect(identity("u1", "s1"), tx1).await.unwrap();

        let message = rx1.recv().await.unwrap();
        assert_eq!(message.event_type(), Some(HEARTBEAT_EVENT));
        let payload: serde_json::Value = serde_json::from_str(message.data()).unwrap();
        assert_eq!(payload["uptime"], "5s");

        // 只问候新连接的会话
        registry.connect(identity("u1", "s2"), tx2).await.unwrap();
        assert!(rx2.recv().await.is_some());
        assert!(matches!(rx1.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_ticks_until_stopped() {
        let registry = Arc::new(ClientRegistry::default());
        let (tx, mut rx) = registry.channel();
        registry.connect(identity("u1", "s1"), tx).await.unwrap();

        let service = Arc::new(HeartbeatService::new(
            registry,
            status(),
            fixed_clock(start_time() + TimeDelta::seconds(60)),
        ));
        let runner = tokio::spawn({
            let service = Arc::clone(&service);
            async move { service.start(Duration::from_secs(60)).await }
        });

        let message = rx.recv().await.unwrap();
        assert_eq!(message.event_type(), Some(HEARTBEAT_EVENT));
        assert_eq!(service.state(), HeartbeatState::Running);

        service.stop();
        runner.await.unwrap().unwrap();
        assert_eq!(service.state(), HeartbeatState::Stopped);
    }

    #[tokio::test]
    async fn test_zero_interval_rejected() {
        let registry = Arc::new(ClientRegistry::default());
        let service = HeartbeatService::new(registry, status(), fixed_clock(start_time()));

        assert!(matches!(
            service.start(Duration::ZERO).await,
            Err(ApplicationError::InvalidInterval(period)) if period.is_zero()
        ));
        // 参数错误不改变状态，之后仍可正常启动
        assert_eq!(service.state(), HeartbeatState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_service_cannot_restart() {
        let registry = Arc::new(ClientRegistry::default());
        let service = HeartbeatService::new(registry, status(), fixed_clock(start_time()));

        service.stop();
        assert!(matches!(
            service.start(Duration::from_secs(1)).await,
            Err(ApplicationError::HeartbeatStopped)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_double_start_rejected() {
        let registry = Arc::new(ClientRegistry::default());
        let service = Arc::new(HeartbeatService::new(
            registry,
            status(),
            fixed_clock(start_time()),
        ));
        let runner = tokio::spawn({
            let service = Arc::clone(&service);
            async move { service.start(Duration::from_secs(1)).await }
        });
        tokio::task::yield_now().await;
        while service.state() != HeartbeatState::Running {
            tokio::task::yield_now().await;
        }

        assert!(matches!(
            service.start(Duration::from_secs(1)).await,
            Err(ApplicationError::HeartbeatAlreadyRunning)
        ));

        service.stop();
        runner.await.unwrap().unwrap();
    }
}
