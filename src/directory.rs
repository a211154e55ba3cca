//! 目录服务（LDAP）认证：服务账号绑定、组成员搜索与用户密码校验。
//!
//! 认证是一条严格线性的步骤链：连接并升级 StartTLS、以只读服务账号绑定、
//! 在组内按 `uid` 搜索且要求恰好一条结果、最后以该条目的 DN 和用户密码重新绑定。
//! 任意一步失败都会使整个认证失败，失败细节只写日志，不返回给调用方。

use ldap3::{
    DerefAliases, Ldap, LdapConnAsync, LdapConnSettings, LdapError, Scope, SearchEntry,
    SearchOptions, ldap_escape,
};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{DIRECTORY_SEARCH_SIZE_LIMIT, DirectoryConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStep {
    Credentials,
    Connect,
    ServiceBind,
    Search,
    Match,
    UserBind,
}

#[derive(Debug)]
pub struct DirectoryError {
    pub step: AuthStep,
    pub detail: String,
}

impl DirectoryError {
    fn new(step: AuthStep, detail: impl fmt::Display) -> Self {
        Self {
            step,
            detail: detail.to_string(),
        }
    }
}

impl fmt::Display for DirectoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.step, self.detail)
    }
}

/// 已建立的目录连接上可执行的操作。
pub trait DirectoryConnection {
    type Error: fmt::Display;

    /// 以指定 DN 与密码执行 simple bind。
    fn bind(
        &mut self,
        dn: &str,
        password: &str,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// 子树搜索，只返回匹配条目的 DN。
    fn search_dns(
        &mut self,
        base: &str,
        filter: &str,
    ) -> impl Future<Output = Result<Vec<String>, Self::Error>> + Send;

    fn close(self) -> impl Future<Output = ()> + Send;
}

/// 为每次认证建立一条新的目录连接。
pub trait DirectoryConnector {
    type Connection: DirectoryConnection + Send;
    type Error: fmt::Display;

    fn connect(
        &self,
        config: &DirectoryConfig,
    ) -> impl Future<Output = Result<Self::Connection, Self::Error>> + Send;
}

/// 基于 ldap3 的目录连接。
pub struct LdapDirectory {
    ldap: Ldap,
}

impl LdapDirectory {
    /// 建立明文连接并立即升级为 StartTLS。
    pub async fn connect(config: &DirectoryConfig) -> Result<Self, LdapError> {
        let mut settings = LdapConnSettings::new()
            .set_starttls(true)
            .set_no_tls_verify(config.insecure_skip_verify);
        if let Some(secs) = config.connect_timeout_secs {
            settings = settings.set_conn_timeout(Duration::from_secs(secs));
        }

        let (conn, ldap) = LdapConnAsync::with_settings(settings, &config.url()).await?;
        tokio::spawn(async move {
            if let Err(err) = conn.drive().await {
                warn!(error = %err, "directory connection error");
            }
        });
        Ok(Self { ldap })
    }
}

impl DirectoryConnection for LdapDirectory {
    type Error = LdapError;

    async fn bind(&mut self, dn: &str, password: &str) -> Result<(), LdapError> {
        self.ldap.simple_bind(dn, password).await?.success()?;
        Ok(())
    }

    async fn search_dns(&mut self, base: &str, filter: &str) -> Result<Vec<String>, LdapError> {
        let options = SearchOptions::new()
            .deref(DerefAliases::Never)
            .sizelimit(DIRECTORY_SEARCH_SIZE_LIMIT);
        let (entries, _) = self
            .ldap
            .with_search_options(options)
            .search(base, Scope::Subtree, filter, vec!["dn"])
            .await?
            .success()?;
        Ok(entries
            .into_iter()
            .map(|entry| SearchEntry::construct(entry).dn)
            .collect())
    }

    async fn close(mut self) {
        if let Err(err) = self.ldap.unbind().await {
            debug!(error = %err, "directory unbind failed");
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LdapConnector;

impl DirectoryConnector for LdapConnector {
    type Connection = LdapDirectory;
    type Error = LdapError;

    async fn connect(&self, config: &DirectoryConfig) -> Result<LdapDirectory, LdapError> {
        LdapDirectory::connect(config).await
    }
}

/// 构造 `(&(uid=<username>)(memberOf=<group dn>))` 过滤器，值经过转义。
pub fn member_filter(config: &DirectoryConfig, username: &str) -> String {
    format!(
        "(&(uid={})(memberOf={}))",
        ldap_escape(username),
        ldap_escape(config.group_dn())
    )
}

/// 在已连接的目录上完成服务绑定、搜索、唯一性检查与用户绑定，成功时返回用户 DN。
pub async fn verify_credentials<C: DirectoryConnection>(
    conn: &mut C,
    config: &DirectoryConfig,
    username: &str,
    password: &str,
) -> Result<String, DirectoryError> {
    debug!("bind as readonly user");
    conn.bind(&config.bind_dn, &config.bind_password)
        .await
        .map_err(|err| DirectoryError::new(AuthStep::ServiceBind, err))?;

    let filter = member_filter(config, username);
    debug!(username, filter = %filter, "executing search query");
    let dns = conn
        .search_dns(&config.base, &filter)
        .await
        .map_err(|err| DirectoryError::new(AuthStep::Search, err))?;

    let user_dn = single_match(dns)?;

    debug!(username, "binding as matched user");
    conn.bind(&user_dn, password)
        .await
        .map_err(|err| DirectoryError::new(AuthStep::UserBind, err))?;
    Ok(user_dn)
}

fn single_match(mut dns: Vec<String>) -> Result<String, DirectoryError> {
    match dns.len() {
        1 => Ok(dns.remove(0)),
        0 => Err(DirectoryError::new(AuthStep::Match, "user does not exist")),
        n => Err(DirectoryError::new(
            AuthStep::Match,
            format!("too many entries returned: {n}"),
        )),
    }
}

/// 目录认证器，每次认证使用一条新连接。
pub struct DirectoryAuthenticator<C = LdapConnector> {
    config: DirectoryConfig,
    connector: C,
}

impl DirectoryAuthenticator<LdapConnector> {
    pub fn new(config: DirectoryConfig) -> Self {
        Self::with_connector(config, LdapConnector)
    }
}

impl<C: DirectoryConnector> DirectoryAuthenticator<C> {
    pub fn with_connector(config: DirectoryConfig, connector: C) -> Self {
        if config.insecure_skip_verify {
            warn!(
                host = %config.host,
                "directory TLS certificate verification is disabled (ldap.insecure_skip_verify)"
            );
        }
        Self { config, connector }
    }

    /// 认证用户名与密码，只返回是否成功。
    pub async fn authenticate(&self, username: &str, password: &str) -> bool {
        match self.try_authenticate(username, password).await {
            Ok(user_dn) => {
                info!(username, user_dn = %user_dn, "directory authentication succeeded");
                true
            }
            Err(err) => {
                warn!(username, step = ?err.step, error = %err.detail, "directory authentication failed");
                false
            }
        }
    }

    /// 执行完整认证链。
    ///
    /// 空用户名或空密码在连接目录前即被拒绝：空密码的 simple bind 在多数
    /// 目录服务上是匿名绑定并会返回成功，不能作为密码校验结果。
    async fn try_authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<String, DirectoryError> {
        if username.is_empty() || password.is_empty() {
            return Err(DirectoryError::new(
                AuthStep::Credentials,
                "empty username or password",
            ));
        }

        info!(host = %self.config.host, port = self.config.port, "connecting to directory");
        let mut conn = self
            .connector
            .connect(&self.config)
            .await
            .map_err(|err| DirectoryError::new(AuthStep::Connect, err))?;
        let result = verify_credentials(&mut conn, &self.config, username, password).await;
        conn.close().await;
        result
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[tokio::test]
    async fn single_match_with_correct_password_succeeds() {
        let mut conn = FakeDirectory::with_entries(&[ALICE_DN]);
        let result = verify_credentials(&mut conn, &directory_config(), "alice", ALICE_PASS).await;

        assert_eq!(result.expect("authenticated"), ALICE_DN);
        assert_eq!(conn.binds, vec![SERVICE_DN.to_string(), ALICE_DN.to_string()]);
    }

    #[tokio::test]
    async fn wrong_password_fails_after_successful_search() {
        let mut conn = FakeDirectory::with_entries(&[ALICE_DN]);
        let err = verify_credentials(&mut conn, &directory_config(), "alice", "wrong")
            .await
            .expect_err("wrong password must fail");

        assert_eq!(err.step, AuthStep::UserBind);
        assert_eq!(conn.filters.len(), 1);
    }

    #[tokio::test]
    async fn no_match_fails_without_user_bind() {
        let mut conn = FakeDirectory::with_entries(&[]);
        let err = verify_credentials(&mut conn, &directory_config(), "alice", ALICE_PASS)
            .await
            .expect_err("missing user must fail");

        assert_eq!(err.step, AuthStep::Match);
        assert_eq!(conn.binds, vec![SERVICE_DN.to_string()]);
    }

    #[tokio::test]
    async fn ambiguous_match_fails_even_with_correct_password() {
        let mut conn = FakeDirectory::with_entries(&[
            ALICE_DN,
            "uid=alice,ou=contractors,dc=example,dc=org",
        ]);
        let err = verify_credentials(&mut conn, &directory_config(), "alice", ALICE_PASS)
            .await
            .expect_err("ambiguous user must fail");

        assert_eq!(err.step, AuthStep::Match);
        assert_eq!(conn.binds.len(), 1);
    }

    #[tokio::test]
    async fn service_bind_failure_skips_search() {
        let mut conn = FakeDirectory::with_entries(&[ALICE_DN]);
        let config = DirectoryConfig {
            bind_password: "stale".into(),
            ..directory_config()
        };
        let err = verify_credentials(&mut conn, &config, "alice", ALICE_PASS)
            .await
            .expect_err("service bind must fail");

        assert_eq!(err.step, AuthStep::ServiceBind);
        assert!(conn.filters.is_empty());
    }

    #[tokio::test]
    async fn search_failure_collapses_to_error() {
        let mut conn = FakeDirectory::with_entries(&[ALICE_DN]);
        conn.fail_search = true;
        let err = verify_credentials(&mut conn, &directory_config(), "alice", ALICE_PASS)
            .await
            .expect_err("search must fail");

        assert_eq!(err.step, AuthStep::Search);
    }

    #[test]
    fn member_filter_escapes_username() {
        let filter = member_filter(&directory_config(), "al*ce)(uid=*");
        assert_eq!(
            filter,
            r"(&(uid=al\2ace\29\28uid=\2a)(memberOf=cn=uploaders,ou=groups,dc=example,dc=org))"
        );
    }

    #[tokio::test]
    async fn unreachable_directory_rejects() {
        let authenticator = DirectoryAuthenticator::new(DirectoryConfig {
            host: "127.0.0.1".into(),
            port: 1,
            connect_timeout_secs: Some(2),
            ..directory_config()
        });
        assert!(!authenticator.authenticate("alice", ALICE_PASS).await);
    }

    #[tokio::test]
    async fn empty_password_rejected_before_connecting() {
        let authenticator = DirectoryAuthenticator::new(directory_config());
        let err = authenticator
            .try_authenticate("alice", "")
            .await
            .expect_err("empty password must fail");
        assert_eq!(err.step, AuthStep::Credentials);
    }

    fn fake_authenticator(entries: &[&str]) -> DirectoryAuthenticator<FakeConnector> {
        DirectoryAuthenticator::with_connector(
            directory_config(),
            FakeConnector {
                directory: FakeDirectory::with_entries(entries),
            },
        )
    }

    #[tokio::test]
    async fn authenticate_through_connector() {
        let authenticator = fake_authenticator(&[ALICE_DN]);
        assert!(authenticator.authenticate("alice", ALICE_PASS).await);
        assert!(!authenticator.authenticate("alice", "wrong").await);
    }

    #[tokio::test]
    async fn authenticate_rejects_ambiguous_user_through_connector() {
        let authenticator = fake_authenticator(&[ALICE_DN, ALICE_DN]);
        assert!(!authenticator.authenticate("alice", ALICE_PASS).await);
    }
}
