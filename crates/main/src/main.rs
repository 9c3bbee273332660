//! 主应用程序入口
//!
//! 启动推送服务：加载配置、初始化日志、装配注册表与心跳服务，然后运行 Axum 服务器。
//! `push-server version` 只打印服务状态后退出。

use std::sync::Arc;

use anyhow::Context;
use application::{ClientRegistry, Clock, HeartbeatService, RegistryOptions, SystemClock};
use chrono::Utc;
use config::{AppConfig, LoggingConfig};
use domain::{status::truncate_to_second, ServiceStatus};
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState, JwtService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load().context("加载配置失败")?;
    let status = ServiceStatus::new(
        config.service.name.clone(),
        config.service.version.clone(),
        ServiceStatus::parse_build_time(&config.service.build_time),
        Utc::now(),
    );

    if std::env::args().nth(1).as_deref() == Some("version") {
        print_version(&status);
        return Ok(());
    }

    init_tracing(&config.logging);
    if config.uses_development_secret() {
        tracing::warn!("正在使用开发环境 JWT 密钥，生产环境请设置 APP_JWT__SECRET");
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let registry = Arc::new(ClientRegistry::new(RegistryOptions {
        channel_capacity: config.push.channel_capacity,
        send_timeout: config.send_timeout(),
    }));

    let heartbeat = Arc::new(HeartbeatService::new(
        registry.clone(),
        status.clone(),
        clock.clone(),
    ));
    heartbeat.greet_new_sessions().await;
    registry
        .add_on_disconnect_trigger(|identity| async move {
            tracing::debug!(
                user_id = %identity.user_id(),
                session_id = %identity.session_id(),
                "客户端已离开"
            );
        })
        .await;

    let heartbeat_task = tokio::spawn({
        let heartbeat = heartbeat.clone();
        let interval = config.heartbeat_interval();
        async move { heartbeat.start(interval).await }
    });

    let jwt_service = Arc::new(JwtService::new(config.jwt.clone()));
    let state = AppState::new(registry.clone(), jwt_service, status, clock);
    let app = router(state);

    let address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("无法绑定地址 {}", address))?;

    tracing::info!(
        service = %config.service.name,
        version = %config.service.version,
        heartbeat_secs = config.heartbeat.interval_secs,
        "推送服务启动在 http://{}",
        address
    );

    axum::serve(listener, app)
        .with_graceful_shutdown({
            let heartbeat = heartbeat.clone();
            let registry = registry.clone();
            async move {
                shutdown_signal().await;
                tracing::info!("收到停止信号，开始关闭");
                heartbeat.stop();
                // 关闭注册表：现有事件流结束，之后的连接请求返回 503
                let disconnected = registry.close().await;
                tracing::info!(disconnected, "推送通道已全部关闭");
            }
        })
        .await?;

    heartbeat.stop();
    if let Err(err) = heartbeat_task.await? {
        tracing::warn!(error = %err, "心跳服务未正常运行");
    }
    tracing::info!("推送服务已停止");

    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.filter.as_str()));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn print_version(status: &ServiceStatus) {
    let status = status.populated(truncate_to_second(Utc::now()));
    let build_time = status
        .build_time
        .map(|time| time.to_rfc3339())
        .unwrap_or_else(|| "unknown".to_string());

    println!("Service:      {}", status.service_name);
    println!("Version:      {}", status.version);
    println!("Runtime:      {}", status.runtime);
    println!("Build Time:   {}", build_time);
    println!("Start Time:   {}", status.start_time.to_rfc3339());
    println!("System Time:  {}", status.system_time.to_rfc3339());
    println!("Uptime:       {}", status.uptime);
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "无法监听 Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "无法监听 SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
