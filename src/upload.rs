//! 单文件上传：读取 multipart 字段并流式写入上传目录。

use axum::extract::multipart::Field;
use axum::extract::{Extension, Multipart};
use axum::response::Response;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::config::UPLOAD_FIELD_NAME;
use crate::error::ApiError;
use crate::pages::{self, Page};

#[derive(Debug)]
pub struct UploadTarget {
    root: PathBuf,
}

impl UploadTarget {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub async fn ensure_root(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root).await
    }

    pub fn root_path(&self) -> &Path {
        &self.root
    }

    /// `<root>/<file_name>`，文件名原样拼接，不做规范化。
    pub fn destination(&self, file_name: &str) -> PathBuf {
        let mut joined = OsString::from(self.root.as_os_str());
        joined.push("/");
        joined.push(file_name);
        PathBuf::from(joined)
    }
}

/// 上传处理器：保存 `fileupload` 字段并渲染完成页。
pub async fn handle_upload(
    Extension(target): Extension<Arc<UploadTarget>>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    info!("handling form file");

    while let Some(mut field) = multipart.next_field().await.map_err(|err| {
        warn!(error = %err, "invalid multipart body");
        ApiError::BadRequest("invalid upload".into())
    })? {
        if field.name() != Some(UPLOAD_FIELD_NAME) {
            continue;
        }

        let Some(file_name) = field
            .file_name()
            .filter(|name| !name.is_empty())
            .map(str::to_owned)
        else {
            warn!("upload field has no filename");
            return Err(ApiError::BadRequest("invalid upload".into()));
        };

        let path = target.destination(&file_name);
        info!(path = ?path, "saving file");
        let written = save_field(&path, &mut field).await?;
        info!(path = ?path, bytes = written, "file saved");
        return pages::render(Page::Done);
    }

    warn!(field = UPLOAD_FIELD_NAME, "upload field missing");
    Err(ApiError::BadRequest("invalid upload".into()))
}

/// 截断或创建目标文件并写入字段内容；失败时已写入的部分保留在磁盘上。
async fn save_field(path: &Path, field: &mut Field<'_>) -> Result<u64, ApiError> {
    let mut file = File::create(path).await.map_err(|err| {
        warn!(path = ?path, error = %err, "failed to open upload destination");
        ApiError::Internal("failed to save file".into())
    })?;

    let mut written: u64 = 0;
    while let Some(chunk) = field.chunk().await.map_err(|err| {
        warn!(path = ?path, error = %err, "failed to read upload stream");
        ApiError::BadRequest("invalid upload".into())
    })? {
        file.write_all(&chunk).await.map_err(|err| {
            warn!(path = ?path, error = %err, "failed to write upload");
            ApiError::Internal("failed to save file".into())
        })?;
        written += chunk.len() as u64;
    }

    file.flush().await.map_err(|err| {
        warn!(path = ?path, error = %err, "failed to flush upload");
        ApiError::Internal("failed to save file".into())
    })?;
    Ok(written)
}
