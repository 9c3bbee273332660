//! JWT 会话认证
//!
//! 推送连接只需要知道调用方的 `(user_id, session_id)`，两者都来自 token 的声明。
//! token 可以放在 `Authorization: Bearer` 头里，也可以放在名为 `jwt` 的 cookie 里。

use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap},
};
use config::JwtConfig;
use domain::SessionIdentity;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::{error::ApiError, state::AppState};

/// 携带 token 的 cookie 名
pub const TOKEN_COOKIE: &str = "jwt";

/// JWT Claims 结构
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// 用户 ID
    pub sub: String,
    /// 会话 ID
    pub sid: String,
    pub exp: i64, // 过期时间 (Unix timestamp)
}

impl Claims {
    pub fn identity(&self) -> Result<SessionIdentity, ApiError> {
        SessionIdentity::new(self.sub.as_str(), self.sid.as_str())
            .map_err(|err| ApiError::unauthorized(format!("Invalid token: {}", err)))
    }
}

/// JWT Token 服务
#[derive(Clone)]
pub struct JwtService {
    config: JwtConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtService {
    pub fn new(config: JwtConfig) -> Self {
        let encoding_key = EncodingKey::from_secret(config.secret.as_ref());
        let decoding_key = DecodingKey::from_secret(config.secret.as_ref());

        Self {
            config,
            encoding_key,
            decoding_key,
        }
    }

    /// 为会话生成 JWT token
    pub fn generate_token(&self, identity: &SessionIdentity) -> Result<String, ApiError> {
        let now = chrono::Utc::now();
        let exp = now + chrono::Duration::hours(self.config.expiration_hours);

        let claims = Claims {
            sub: identity.user_id().to_string(),
            sid: identity.session_id().to_string(),
            exp: exp.timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding_key).map_err(|err| {
            ApiError::internal_server_error(format!("Token generation failed: {}", err))
        })
    }

    /// 验证并解析 JWT token
    pub fn verify_token(&self, token: &str) -> Result<Claims, ApiError> {
        decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map(|token_data| token_data.claims)
            .map_err(|err| ApiError::unauthorized(format!("Invalid token: {}", err)))
    }

    /// 从 headers 中提取和验证 token，Authorization 头优先于 cookie
    pub fn extract_identity_from_headers(
        &self,
        headers: &HeaderMap,
    ) -> Result<SessionIdentity, ApiError> {
        let token = match headers.get(header::AUTHORIZATION) {
            Some(value) => value
                .to_str()
                .ok()
                .and_then(|value| value.strip_prefix("Bearer "))
                .ok_or_else(|| ApiError::unauthorized("Invalid authorization header format"))?,
            None => token_from_cookies(headers)
                .ok_or_else(|| ApiError::unauthorized("Missing authorization token"))?,
        };

        self.verify_token(token.trim())?.identity()
    }
}

fn token_from_cookies(headers: &HeaderMap) -> Option<&str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == TOKEN_COOKIE)
        .map(|(_, token)| token)
        .filter(|token| !token.is_empty())
}

/// 已认证的推送会话
#[derive(Debug, Clone)]
pub struct AuthSession(pub SessionIdentity);

impl FromRequestParts<AppState> for AuthSession {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        state
            .jwt_service
            .extract_identity_from_headers(&parts.headers)
            .map(AuthSession)
    }
}
