//! 命令行参数、TOML 配置文件与服务常量。

use clap::Parser;
use serde::Deserialize;
use shadow_rs::formatcp;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use crate::build;

const VERSION_INFO: &str = formatcp!(
    r#"{}\ncommit_hash: {}\nbuild_time: {}\nbuild_env: {},{}"#,
    build::PKG_VERSION,
    build::SHORT_COMMIT,
    build::BUILD_TIME,
    build::RUST_VERSION,
    build::RUST_CHANNEL
);

pub const SESSION_COOKIE_NAME: &str = "session_token";
pub const SESSION_TTL_SECS: i64 = 120;
pub const UPLOAD_FIELD_NAME: &str = "fileupload";
pub const DIRECTORY_SEARCH_SIZE_LIMIT: i32 = 10;
pub const DEFAULT_LISTEN_PORT: u16 = 8080;
pub const DEFAULT_DIRECTORY_PORT: u16 = 389;
pub const SHUTDOWN_GRACE_SECS: u64 = 10;

/// 命令行参数（支持环境变量覆盖）。
#[derive(Parser, Debug)]
#[command(name = "upload-gate", version = VERSION_INFO, about = "LDAP gated file upload server")]
pub struct Args {
    #[arg(
        short = 'c',
        long = "conf",
        env = "UPLOAD_GATE_CONF",
        help = "Config file for the listener, ldap and upload settings"
    )]
    pub conf: PathBuf,
    #[arg(
        short = 'b',
        long = "bind",
        env = "UPLOAD_GATE_BIND",
        default_value = "0.0.0.0",
        help = "Bind address for the listener"
    )]
    pub host: String,
}

/// 进程启动时加载的只读配置。
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub listen: ListenConfig,
    #[serde(default, alias = "directory")]
    pub ldap: DirectoryConfig,
    pub upload: UploadConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ListenConfig {
    #[serde(alias = "SSL")]
    pub ssl: bool,
    #[serde(alias = "Cert")]
    pub cert: Option<PathBuf>,
    #[serde(alias = "Key")]
    pub key: Option<PathBuf>,
    #[serde(alias = "Port")]
    pub port: u16,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            ssl: false,
            cert: None,
            key: None,
            port: DEFAULT_LISTEN_PORT,
        }
    }
}

/// 目录服务（LDAP）连接与组过滤配置。
///
/// 未知键会使加载失败，同时接受旧版配置文件中的键名（`useldap`、`binddn` 等），
/// 避免拼写差异让目录认证被静默关闭。
#[derive(Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DirectoryConfig {
    #[serde(alias = "use_ldap", alias = "useldap", alias = "UseLDAP")]
    pub enabled: bool,
    #[serde(alias = "Host")]
    pub host: String,
    #[serde(alias = "Port")]
    pub port: u16,
    #[serde(alias = "Base")]
    pub base: String,
    #[serde(alias = "groupbase", alias = "GroupBase")]
    pub group_base: String,
    #[serde(alias = "groupname", alias = "GroupName")]
    pub group_name: String,
    #[serde(alias = "binddn", alias = "BindDN")]
    pub bind_dn: String,
    #[serde(alias = "bindpassword", alias = "BindPassword")]
    pub bind_password: String,
    /// 跳过目录服务证书校验（不安全，保持与既有部署一致的默认值）。
    pub insecure_skip_verify: bool,
    pub connect_timeout_secs: Option<u64>,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: String::new(),
            port: DEFAULT_DIRECTORY_PORT,
            base: String::new(),
            group_base: String::new(),
            group_name: String::new(),
            bind_dn: String::new(),
            bind_password: String::new(),
            insecure_skip_verify: true,
            connect_timeout_secs: None,
        }
    }
}

impl DirectoryConfig {
    /// 组的完整 DN：`<group_name>,<group_base>`。
    pub fn group_dn(&self) -> String {
        format!("{},{}", self.group_name, self.group_base)
    }

    pub fn url(&self) -> String {
        format!("ldap://{}:{}", self.host, self.port)
    }
}

impl fmt::Debug for DirectoryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectoryConfig")
            .field("enabled", &self.enabled)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("base", &self.base)
            .field("group_base", &self.group_base)
            .field("group_name", &self.group_name)
            .field("bind_dn", &self.bind_dn)
            .field("bind_password", &"<redacted>")
            .field("insecure_skip_verify", &self.insecure_skip_verify)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UploadConfig {
    #[serde(alias = "Path")]
    pub path: PathBuf,
}

#[derive(Debug)]
pub enum ConfigError {
    Io(io::Error),
    Parse(toml::de::Error),
    Invalid(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "failed to read config: {err}"),
            ConfigError::Parse(err) => write!(f, "failed to parse config: {err}"),
            ConfigError::Invalid(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<io::Error> for ConfigError {
    fn from(err: io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::Parse(err)
    }
}

impl Config {
    /// 从 TOML 文件读取并校验配置。
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.upload.path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("upload.path is required"));
        }
        if self.ldap.enabled {
            if self.ldap.host.trim().is_empty() {
                return Err(ConfigError::Invalid("ldap.host is required"));
            }
            if self.ldap.base.trim().is_empty() {
                return Err(ConfigError::Invalid("ldap.base is required"));
            }
            if self.ldap.bind_dn.trim().is_empty() {
                return Err(ConfigError::Invalid("ldap.bind_dn is required"));
            }
        }
        if self.listen.cert.is_some() != self.listen.key.is_some() {
            return Err(ConfigError::Invalid(
                "listen.cert and listen.key must be set together",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_config() {
        let config = Config::parse(
            r#"
            [listen]
            ssl = true
            cert = "/etc/gate/cert.pem"
            key = "/etc/gate/key.pem"
            port = 8443

            [ldap]
            use_ldap = true
            host = "ldap.example.org"
            port = 389
            base = "dc=example,dc=org"
            group_base = "ou=groups,dc=example,dc=org"
            group_name = "cn=uploaders"
            bind_dn = "cn=readonly,dc=example,dc=org"
            bind_password = "secret"

            [upload]
            path = "/srv/uploads"
            "#,
        )
        .expect("parse config");

        assert!(config.listen.ssl);
        assert_eq!(config.listen.port, 8443);
        assert!(config.ldap.enabled);
        assert!(config.ldap.insecure_skip_verify);
        assert_eq!(
            config.ldap.group_dn(),
            "cn=uploaders,ou=groups,dc=example,dc=org"
        );
        assert_eq!(config.ldap.url(), "ldap://ldap.example.org:389");
        assert_eq!(config.upload.path, PathBuf::from("/srv/uploads"));
    }

    #[test]
    fn directory_section_defaults_to_disabled() {
        let config = Config::parse("[upload]\npath = \"/tmp/up\"\n").expect("parse config");
        assert!(!config.ldap.enabled);
        assert!(!config.listen.ssl);
        assert_eq!(config.listen.port, DEFAULT_LISTEN_PORT);
    }

    #[test]
    fn enabled_directory_requires_host() {
        let result = Config::parse(
            r#"
            [directory]
            enabled = true
            base = "dc=example,dc=org"
            bind_dn = "cn=readonly,dc=example,dc=org"

            [upload]
            path = "/tmp/up"
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn legacy_key_spellings_enable_directory() {
        let config = Config::parse(
            r#"
            [ldap]
            useldap = true
            host = "ldap.example.org"
            base = "dc=example,dc=org"
            groupbase = "ou=groups,dc=example,dc=org"
            groupname = "cn=uploaders"
            binddn = "cn=readonly,dc=example,dc=org"
            bindpassword = "secret"

            [upload]
            Path = "/tmp/up"
            "#,
        )
        .expect("parse config");

        assert!(config.ldap.enabled);
        assert_eq!(config.ldap.bind_dn, "cn=readonly,dc=example,dc=org");
        assert_eq!(config.ldap.bind_password, "secret");
        assert_eq!(
            config.ldap.group_dn(),
            "cn=uploaders,ou=groups,dc=example,dc=org"
        );
    }

    #[test]
    fn unknown_directory_key_is_rejected() {
        let result = Config::parse(
            r#"
            [ldap]
            use_ldpa = true
            host = "ldap.example.org"

            [upload]
            path = "/tmp/up"
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn unknown_section_is_rejected() {
        let result = Config::parse("[ldpa]\nenabled = true\n[upload]\npath = \"/tmp/up\"\n");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn missing_upload_section_is_parse_error() {
        let result = Config::parse("[listen]\nport = 80\n");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn debug_output_hides_bind_password() {
        let config = DirectoryConfig {
            bind_password: "hunter2".into(),
            ..DirectoryConfig::default()
        };
        assert!(!format!("{config:?}").contains("hunter2"));
    }
}
