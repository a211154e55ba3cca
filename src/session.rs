//! 会话签发与会话守卫。
//!
//! 会话只存在于客户端：服务端不保存已签发的令牌，守卫也只检查
//! `session_token` Cookie 是否存在，不校验令牌内容或过期时间。

use axum::body::Body as AxumBody;
use axum::http::{HeaderMap, Request, header};
use axum::{middleware, response::Response};
use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::Cookie;
use cookie::time::{Duration as CookieDuration, OffsetDateTime};
use std::fmt;
use tracing::{debug, error};
use uuid::{Builder, Uuid};

use crate::config::{SESSION_COOKIE_NAME, SESSION_TTL_SECS};
use crate::error::ApiError;

#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub expires_at: OffsetDateTime,
}

#[derive(Debug)]
pub struct SessionError(getrandom::Error);

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session token generation failed: {}", self.0)
    }
}

impl Session {
    /// 转换为客户端保存的 Cookie（只设置 `Expires`）。
    pub fn into_cookie(self) -> Cookie<'static> {
        Cookie::build((SESSION_COOKIE_NAME, self.token))
            .expires(self.expires_at)
            .build()
    }
}

/// 生成 128 位随机令牌，有效期为当前时间起 120 秒。
pub fn issue_session() -> Result<Session, SessionError> {
    let mut bytes = [0u8; 16];
    getrandom::getrandom(&mut bytes).map_err(SessionError)?;
    let token: Uuid = Builder::from_random_bytes(bytes).into_uuid();
    Ok(Session {
        token: token.to_string(),
        expires_at: OffsetDateTime::now_utc() + CookieDuration::seconds(SESSION_TTL_SECS),
    })
}

/// 签发会话并写入 Cookie；随机源失败时不签发。
pub fn start_session(jar: CookieJar) -> Result<CookieJar, ApiError> {
    let session = issue_session().map_err(|err| {
        error!(error = %err, "failed to create session token");
        ApiError::Internal("internal error".into())
    })?;
    debug!(expires_at = %session.expires_at, "session issued");
    Ok(jar.add(session.into_cookie()))
}

#[derive(Debug, PartialEq, Eq)]
pub enum CredentialError {
    Missing,
    Unreadable,
}

/// 从请求头读取会话令牌。
///
/// 跳过无法按文本读取的 Cookie 头继续查找；只有找不到可读令牌且某个
/// 不可读的头中带有 `session_token` 时才返回 `Unreadable`。
pub fn read_session_token(headers: &HeaderMap) -> Result<String, CredentialError> {
    let mut unreadable = false;
    for value in headers.get_all(header::COOKIE) {
        let Ok(raw) = value.to_str() else {
            let lossy = String::from_utf8_lossy(value.as_bytes());
            unreadable |= find_session_cookie(&lossy).is_some();
            continue;
        };
        if let Some(token) = find_session_cookie(raw) {
            return Ok(token);
        }
    }
    if unreadable {
        Err(CredentialError::Unreadable)
    } else {
        Err(CredentialError::Missing)
    }
}

fn find_session_cookie(raw: &str) -> Option<String> {
    Cookie::split_parse(raw)
        .filter_map(Result::ok)
        .find(|cookie| cookie.name() == SESSION_COOKIE_NAME)
        .map(|cookie| cookie.value().to_string())
}

/// 会话守卫中间件：缺少 Cookie 返回 401，无法读取返回 400。
pub async fn require_session(
    req: Request<AxumBody>,
    next: middleware::Next,
) -> Result<Response, ApiError> {
    match read_session_token(req.headers()) {
        Ok(_) => Ok(next.run(req).await),
        Err(CredentialError::Missing) => Err(ApiError::Unauthorized),
        Err(CredentialError::Unreadable) => Err(ApiError::MalformedCredential),
    }
}
