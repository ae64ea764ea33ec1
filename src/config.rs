use std::env;

use crate::error::{AppError, AppResult};
use crate::services::VersionControlService;

pub const TRAC_REMOTE: &str = "trac";
pub const DEVELOP_BRANCH: &str = "develop";
pub const RELEASE_MANAGER: &str = "Release Manager <release@sagemath.org>";

pub const ANONYMOUS_XMLRPC: &str = "xmlrpc";
pub const AUTHENTICATED_XMLRPC: &str = "login/xmlrpc";

pub const DEFAULT_SERVER_URL: &str = "https://trac.sagemath.org";
pub const DEFAULT_REMOTE_URL: &str = "https://github.com/sagemath/sage.git";

pub const USERNAME_KEY: &str = "trac.username";
pub const PASSWORD_KEY: &str = "trac.password";
pub const SERVER_URL_KEY: &str = "trac.url";
pub const REMOTE_URL_KEY: &str = "trac.remoteurl";

pub const USERNAME_ENV: &str = "TRAC_USERNAME";
pub const PASSWORD_ENV: &str = "TRAC_PASSWORD";
pub const SERVER_URL_ENV: &str = "TRAC_URL";
pub const GIT_PROGRAM_ENV: &str = "GIT_TRAC_GIT";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub username: Option<String>,
    pub password: Option<String>,
    pub server_url: String,
    pub remote_url: String,
}

impl AppConfig {
    /// Reads settings from git's config store; environment variables win.
    pub async fn load(version_control: &dyn VersionControlService) -> AppResult<Self> {
        let username = lookup(version_control, USERNAME_ENV, USERNAME_KEY).await?;
        let password = lookup(version_control, PASSWORD_ENV, PASSWORD_KEY).await?;
        let server_url = lookup(version_control, SERVER_URL_ENV, SERVER_URL_KEY)
            .await?
            .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string());
        let remote_url = version_control
            .config_get(REMOTE_URL_KEY)
            .await?
            .unwrap_or_else(|| DEFAULT_REMOTE_URL.to_string());

        Ok(Self {
            username,
            password,
            server_url: server_url.trim_end_matches('/').to_string(),
            remote_url,
        })
    }

    pub fn require_username(&self) -> AppResult<&str> {
        self.username.as_deref().ok_or_else(|| {
            AppError::Configuration(
                "trac username is not set; run \"git trac config --user <name>\"".to_string(),
            )
        })
    }

    pub fn ticket_url(&self, number: u64) -> String {
        format!("{}/{number}", self.server_url)
    }

    pub fn anonymous_endpoint(&self) -> String {
        format!("{}/{ANONYMOUS_XMLRPC}", self.server_url)
    }

    pub fn authenticated_endpoint(&self) -> String {
        format!("{}/{AUTHENTICATED_XMLRPC}", self.server_url)
    }
}

async fn lookup(
    version_control: &dyn VersionControlService,
    env_key: &str,
    config_key: &str,
) -> AppResult<Option<String>> {
    if let Some(value) = env::var(env_key).ok().filter(|v| !v.is_empty()) {
        return Ok(Some(value));
    }
    version_control.config_get(config_key).await
}

pub fn git_program() -> String {
    env::var(GIT_PROGRAM_ENV)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "git".to_string())
}
