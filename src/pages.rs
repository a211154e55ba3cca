//! 嵌入式 HTML 页面：登录、选择文件与上传完成。

use axum::body::Body as AxumBody;
use axum::http::{HeaderMap, HeaderValue, header};
use axum::response::{IntoResponse, Response};
use rust_embed::RustEmbed;
use tracing::error;

use crate::error::ApiError;

#[derive(RustEmbed)]
#[folder = "pages"]
/// 编译期嵌入的页面文件。
pub struct PageAssets;

#[derive(Debug, Clone, Copy)]
pub enum Page {
    Login,
    ChooseFile,
    Done,
}

impl Page {
    fn asset_path(self) -> &'static str {
        match self {
            Page::Login => "login.html",
            Page::ChooseFile => "upload.html",
            Page::Done => "done.html",
        }
    }
}

/// 渲染指定页面。
pub fn render(page: Page) -> Result<Response, ApiError> {
    let path = page.asset_path();
    let Some(asset) = PageAssets::get(path) else {
        error!(path, "embedded page missing");
        return Err(ApiError::Internal("internal error".into()));
    };
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(mime.essence_str())
            .map_err(|_| ApiError::Internal("internal error".into()))?,
    );
    Ok((headers, AxumBody::from(asset.data.into_owned())).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_text(response: Response) -> String {
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("collect body")
            .to_bytes();
        String::from_utf8(bytes.to_vec()).expect("utf8 body")
    }

    #[tokio::test]
    async fn login_page_posts_credentials() {
        let response = render(Page::Login).expect("render login");
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE),
            Some(&HeaderValue::from_static("text/html"))
        );
        let body = body_text(response).await;
        assert!(body.contains(r#"action="/login""#));
        assert!(body.contains(r#"name="password""#));
    }

    #[tokio::test]
    async fn choose_page_uses_upload_field() {
        let body = body_text(render(Page::ChooseFile).expect("render choose")).await;
        assert!(body.contains(r#"name="fileupload""#));
        assert!(body.contains(r#"enctype="multipart/form-data""#));
    }
}
