//! 路由与页面控制：首页、登录、选择文件与上传。

use axum::extract::rejection::FormRejection;
use axum::extract::{DefaultBodyLimit, Extension, Form};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Router, middleware};
use axum_extra::extract::CookieJar;
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

use crate::config::DirectoryConfig;
use crate::directory::{DirectoryAuthenticator, DirectoryConnector, LdapConnector};
use crate::error::ApiError;
use crate::http::found;
use crate::pages::{self, Page};
use crate::session;
use crate::upload::{self, UploadTarget};

/// 登录方式：目录认证或直接签发会话。
pub enum LoginMode<C = LdapConnector> {
    Directory(DirectoryAuthenticator<C>),
    Open,
}

impl LoginMode<LdapConnector> {
    pub fn from_config(config: &DirectoryConfig) -> Self {
        if config.enabled {
            LoginMode::Directory(DirectoryAuthenticator::new(config.clone()))
        } else {
            LoginMode::Open
        }
    }
}

/// 构建应用路由；`/choose` 与 `/upload` 需要会话 Cookie。
pub fn build_router<C>(login_mode: Arc<LoginMode<C>>, uploads: Arc<UploadTarget>) -> Router
where
    C: DirectoryConnector + Send + Sync + 'static,
{
    let guarded = Router::new()
        .route("/choose", get(choose_file))
        .route(
            "/upload",
            post(upload::handle_upload).layer(DefaultBodyLimit::disable()),
        )
        .route_layer(middleware::from_fn(session::require_session));

    Router::new()
        .route("/", get(home::<C>))
        .route("/login", post(login::<C>))
        .merge(guarded)
        .layer(Extension(login_mode))
        .layer(Extension(uploads))
}

async fn home<C>(
    Extension(login_mode): Extension<Arc<LoginMode<C>>>,
    jar: CookieJar,
) -> Result<Response, ApiError> {
    match login_mode.as_ref() {
        LoginMode::Directory(_) => pages::render(Page::Login),
        LoginMode::Open => {
            let jar = session::start_session(jar)?;
            info!("redirect / to /choose");
            Ok((jar, found("/choose")).into_response())
        }
    }
}

#[derive(Deserialize, Default)]
pub(crate) struct LoginForm {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

async fn login<C: DirectoryConnector>(
    Extension(login_mode): Extension<Arc<LoginMode<C>>>,
    jar: CookieJar,
    form: Result<Form<LoginForm>, FormRejection>,
) -> Result<Response, ApiError> {
    let LoginMode::Directory(authenticator) = login_mode.as_ref() else {
        return Ok(found("/"));
    };
    let form = form.map(|Form(form)| form).unwrap_or_default();

    info!(username = %form.username, "logging in");
    if !authenticator
        .authenticate(&form.username, &form.password)
        .await
    {
        info!(username = %form.username, "user did not authenticate");
        return Ok(found("/"));
    }

    let jar = session::start_session(jar)?;
    info!("redirect /login to /choose");
    Ok((jar, found("/choose")).into_response())
}

async fn choose_file() -> Result<Response, ApiError> {
    pages::render(Page::ChooseFile)
}
