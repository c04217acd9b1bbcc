//! Application configuration module / 应用配置模块
//!
//! Settings are layered, later sources winning:
//! built-in defaults, `settings.toml`, `.secrets.toml`, then `SC2SENTRY_*`
//! environment variables (`SC2SENTRY_MINIO__ENDPOINT` sets `minio.endpoint`),
//! merged with figment.
//! Configuration is loaded once and never changes afterwards.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use once_cell::sync::OnceCell;
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Global configuration instance / 全局配置实例
static CONFIG: OnceCell<Arc<AppConfig>> = OnceCell::new();

/// Environment variable prefix / 环境变量前缀
pub const ENV_PREFIX: &str = "SC2SENTRY_";

/// Settings files, in load order / 配置文件（按加载顺序）
pub const SETTINGS_FILES: [&str; 2] = ["settings.toml", ".secrets.toml"];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Load(#[from] figment::Error),
    #[error("Config already initialized")]
    AlreadyInitialized,
}

/// Application configuration / 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    /// Object storage / 对象存储
    pub minio: StorageConfig,
}

/// Server configuration / 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    #[serde(deserialize_with = "string_or_scalar")]
    pub host: String,
    pub port: u16,
}

/// Database configuration / 数据库配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Full connection URL; overrides `data_dir`/`db_file` when set
    #[serde(deserialize_with = "string_or_scalar")]
    pub url: String,
    /// Data directory path / 数据目录路径
    #[serde(deserialize_with = "string_or_scalar")]
    pub data_dir: String,
    /// Database file name (relative to data_dir) / 数据库文件名
    #[serde(deserialize_with = "string_or_scalar")]
    pub db_file: String,
}

/// Authentication configuration / 认证配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HMAC secret for every token type / 令牌签名密钥
    #[serde(deserialize_with = "string_or_scalar")]
    pub secret: String,
    /// Access token lifetime in seconds / 访问令牌有效期（秒）
    pub jwt_lifetime: u64,
    pub reset_password_token_lifetime: u64,
    pub verification_token_lifetime: u64,
    pub bcrypt_cost: u32,
    /// `/users` routes only accept verified users / 用户接口要求已验证邮箱
    pub users_require_verification: bool,
}

/// Object storage configuration / 对象存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// `host:port`, or a full URL with scheme / 端点地址
    #[serde(deserialize_with = "string_or_scalar")]
    pub endpoint: String,
    #[serde(deserialize_with = "string_or_scalar")]
    pub access_key: String,
    #[serde(deserialize_with = "string_or_scalar")]
    pub secret_key: String,
    /// Session Token（用于临时凭证，空表示不使用）
    #[serde(deserialize_with = "string_or_scalar")]
    pub session_token: String,
    /// Use https when `endpoint` has no scheme / 是否使用HTTPS
    pub secure: bool,
    #[serde(deserialize_with = "string_or_scalar")]
    pub region: String,
    /// Buckets that must exist, created in this order / 需要确保存在的存储桶
    pub buckets: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8010,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            data_dir: "data".to_string(),
            db_file: "sc2sentry.db".to_string(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            jwt_lifetime: 3600,
            reset_password_token_lifetime: 3600,
            verification_token_lifetime: 3600,
            bcrypt_cost: bcrypt::DEFAULT_COST,
            users_require_verification: true,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            endpoint: "localhost:9000".to_string(),
            access_key: String::new(),
            secret_key: String::new(),
            session_token: String::new(),
            secure: false,
            region: "us-east-1".to_string(),
            buckets: Vec::new(),
        }
    }
}

impl StorageConfig {
    /// Endpoint as a URL, scheme picked from `secure` if missing / 获取完整端点URL
    pub fn endpoint_url(&self) -> String {
        if self.endpoint.contains("://") {
            self.endpoint.trim_end_matches('/').to_string()
        } else {
            let scheme = if self.secure { "https" } else { "http" };
            format!("{}://{}", scheme, self.endpoint.trim_end_matches('/'))
        }
    }

    pub fn session_token(&self) -> Option<&str> {
        if self.session_token.is_empty() {
            None
        } else {
            Some(&self.session_token)
        }
    }
}

impl AppConfig {
    /// Get the full database URL / 获取完整的数据库URL
    pub fn get_database_url(&self) -> String {
        if !self.database.url.is_empty() {
            return self.database.url.clone();
        }
        let db_path = Path::new(&self.database.data_dir).join(&self.database.db_file);
        format!("sqlite:{}?mode=rwc", db_path.to_string_lossy())
    }

    /// Get the full data directory path / 获取完整的数据目录路径
    pub fn get_data_dir(&self) -> PathBuf {
        PathBuf::from(&self.database.data_dir)
    }

    /// Get the server bind address / 获取服务器绑定地址
    pub fn get_bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

/// Accept any scalar for a string field / 字符串字段接受任意标量
///
/// Env values are parsed (`1234` becomes an integer), so numeric-looking
/// secrets and keys are turned back into strings here.
fn string_or_scalar<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    struct ScalarVisitor;

    impl<'de> Visitor<'de> for ScalarVisitor {
        type Value = String;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a string, number or boolean")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_string<E: de::Error>(self, v: String) -> Result<String, E> {
            Ok(v)
        }

        fn visit_bool<E: de::Error>(self, v: bool) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_i128<E: de::Error>(self, v: i128) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_u128<E: de::Error>(self, v: u128) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<String, E> {
            Ok(v.to_string())
        }
    }

    deserializer.deserialize_any(ScalarVisitor)
}

/// Settings providers for `dir`, lowest priority first / 配置来源
pub fn figment(dir: &Path) -> Figment {
    Figment::from(Serialized::defaults(AppConfig::default()))
        .merge(Toml::file(dir.join(SETTINGS_FILES[0])))
        .merge(Toml::file(dir.join(SETTINGS_FILES[1])))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
}

/// Load settings from `dir` plus the process environment / 从目录和环境变量加载配置
pub fn load_from(dir: &Path) -> Result<AppConfig, ConfigError> {
    let mut config: AppConfig = figment(dir).extract()?;

    if config.auth.secret.is_empty() {
        tracing::warn!("auth.secret is not set, using a random secret (tokens will not survive a restart)");
        config.auth.secret = format!(
            "{}{}",
            uuid::Uuid::new_v4().simple(),
            uuid::Uuid::new_v4().simple()
        );
    }

    Ok(config)
}

/// Load configuration from the working directory and process environment / 加载配置
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    load_from(&dir)
}

/// Initialize global configuration / 初始化全局配置
pub fn init_config(config: AppConfig) -> Result<Arc<AppConfig>, ConfigError> {
    let config = Arc::new(config);
    CONFIG
        .set(config.clone())
        .map_err(|_| ConfigError::AlreadyInitialized)?;
    Ok(config)
}

/// Get global configuration instance, loading it on first use / 获取全局配置实例
///
/// A failed load is returned and nothing is stored, so a later call retries.
pub fn config() -> Result<Arc<AppConfig>, ConfigError> {
    CONFIG
        .get_or_try_init(|| load_config().map(Arc::new))
        .cloned()
}
