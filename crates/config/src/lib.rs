//! 统一配置中心
//!
//! 提供推送服务的全局配置，包括：
//! - HTTP 监听地址
//! - 服务元信息（心跳与状态接口使用）
//! - 心跳周期
//! - 推送通道容量与投递超时
//! - JWT 会话校验
//! - 日志输出
//!
//! 加载顺序：内置默认值 -> `APP_CONFIG_FILE` 指定的文件 -> `APP_` 前缀的环境变量
//! （嵌套字段用 `__` 分隔，例如 `APP_HEARTBEAT__INTERVAL_SECS=30`）。

use std::time::Duration;

use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};

/// 开发环境默认的 JWT 密钥，生产环境必须覆盖
pub const DEVELOPMENT_JWT_SECRET: &str = "dev-secret-key-not-for-production-use-minimum-32-chars";

/// 全局应用配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// 服务器配置
    pub server: ServerConfig,
    /// 服务元信息
    pub service: ServiceConfig,
    /// 心跳配置
    pub heartbeat: HeartbeatConfig,
    /// 推送配置
    pub push: PushConfig,
    /// JWT认证配置
    pub jwt: JwtConfig,
    /// 日志配置
    pub logging: LoggingConfig,
}

/// 服务器配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// 服务元信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub version: String,
    /// RFC 3339 格式的构建时间，可以为空
    #[serde(default)]
    pub build_time: String,
}

/// 心跳配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    pub interval_secs: u64,
}

/// 推送配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushConfig {
    /// 每个连接的消息队列容量
    pub channel_capacity: usize,
    /// 单个连接写入超时（毫秒）
    pub send_timeout_ms: u64,
}

/// JWT配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub expiration_hours: i64,
}

/// 日志配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// 输出 JSON 格式日志
    #[serde(default)]
    pub json: bool,
    /// 未设置 RUST_LOG 时使用的过滤规则
    pub filter: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8888,
            },
            service: ServiceConfig {
                name: "push-server".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                build_time: option_env!("BUILD_TIME").unwrap_or_default().to_string(),
            },
            heartbeat: HeartbeatConfig { interval_secs: 60 },
            push: PushConfig {
                channel_capacity: 64,
                send_timeout_ms: 1000,
            },
            jwt: JwtConfig {
                secret: DEVELOPMENT_JWT_SECRET.to_string(),
                expiration_hours: 24,
            },
            logging: LoggingConfig {
                json: false,
                filter: "info".to_string(),
            },
        }
    }
}

impl AppConfig {
    /// 按默认值、配置文件、环境变量的顺序加载并校验配置
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_figment(Self::figment())
    }

    /// 组装配置来源
    pub fn figment() -> Figment {
        let mut fig = Figment::new().merge(Serialized::defaults(AppConfig::default()));
        if let Ok(path) = std::env::var("APP_CONFIG_FILE") {
            if path.ends_with(".yml") || path.ends_with(".yaml") {
                fig = fig.merge(Yaml::file(path));
            } else if path.ends_with(".json") {
                fig = fig.merge(Json::file(path));
            } else {
                fig = fig.merge(Toml::file(path));
            }
        }
        fig.merge(Env::prefixed("APP_").split("__"))
    }

    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: AppConfig = figment.extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.host.is_empty() {
            return Err(ConfigError::InvalidServerConfig(
                "host cannot be empty".to_string(),
            ));
        }
        if self.server.port == 0 {
            return Err(ConfigError::InvalidServerConfig(
                "port must be greater than 0".to_string(),
            ));
        }

        if self.service.name.is_empty() {
            return Err(ConfigError::InvalidServiceConfig(
                "service name cannot be empty".to_string(),
            ));
        }

        if self.heartbeat.interval_secs == 0 {
            return Err(ConfigError::InvalidHeartbeatConfig(
                "interval must be at least one second".to_string(),
            ));
        }

        if self.push.channel_capacity == 0 {
            return Err(ConfigError::InvalidPushConfig(
                "channel capacity must be greater than 0".to_string(),
            ));
        }
        if self.push.send_timeout_ms == 0 {
            return Err(ConfigError::InvalidPushConfig(
                "send timeout must be greater than 0".to_string(),
            ));
        }

        // 至少256位/32字节
        if self.jwt.secret.len() < 32 {
            return Err(ConfigError::InvalidJwtSecret(
                "JWT secret must be at least 32 characters long".to_string(),
            ));
        }
        if self.jwt.expiration_hours <= 0 {
            return Err(ConfigError::InvalidJwtSecret(
                "expiration must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// 是否仍在使用开发环境的 JWT 密钥
    pub fn uses_development_secret(&self) -> bool {
        self.jwt.secret == DEVELOPMENT_JWT_SECRET
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat.interval_secs)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.push.send_timeout_ms)
    }
}

/// 配置错误类型
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
    #[error("Invalid server configuration: {0}")]
    InvalidServerConfig(String),
    #[error("Invalid service configuration: {0}")]
    InvalidServiceConfig(String),
    #[error("Invalid heartbeat configuration: {0}")]
    InvalidHeartbeatConfig(String),
    #[error("Invalid push configuration: {0}")]
    InvalidPushConfig(String),
    #[error("Invalid JWT secret: {0}")]
    InvalidJwtSecret(String),
}
