//! HTTPS 监听证书：优先使用配置的 PEM 文件，否则在内存中生成自签名证书。

use axum_server::tls_rustls::RustlsConfig;
use rcgen::{CertifiedKey, generate_simple_self_signed};
use std::net::IpAddr;
use tracing::{info, warn};

use crate::config::ListenConfig;

/// 构建 Rustls 配置。
pub async fn build_rustls_config(
    listen: &ListenConfig,
    host: IpAddr,
) -> Result<RustlsConfig, std::io::Error> {
    match (&listen.cert, &listen.key) {
        (Some(cert), Some(key)) => {
            info!(cert = ?cert, key = ?key, "loading TLS certificate");
            RustlsConfig::from_pem_file(cert, key).await
        }
        _ => {
            warn!(%host, "listen.ssl is enabled without cert/key, using a self-signed certificate");
            let (cert, key) = self_signed_pem(host)?;
            RustlsConfig::from_pem(cert, key).await
        }
    }
}

/// 为监听地址生成自签名证书与私钥（PEM）。
fn self_signed_pem(host: IpAddr) -> Result<(Vec<u8>, Vec<u8>), std::io::Error> {
    let CertifiedKey { cert, key_pair } = generate_simple_self_signed([host.to_string()])
        .map_err(|err| std::io::Error::other(err.to_string()))?;
    Ok((cert.pem().into_bytes(), key_pair.serialize_pem().into_bytes()))
}
