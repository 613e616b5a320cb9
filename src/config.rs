use std::path::PathBuf;

use anyhow::{anyhow, bail, Context as _};

pub const MIN_USERNAME_LENGTH: usize = 3;
pub const MAX_USERNAME_LENGTH: usize = 50;
pub const MIN_PASSWORD_LENGTH: usize = 6;
pub const MAX_POST_LENGTH: usize = 5000;
pub const RESET_TOKEN_LENGTH: usize = 32;
pub const RESET_TOKEN_TTL_MINUTES: i64 = 60;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_SMTP_PORT: u16 = 587;
const SNAPSHOT_FILE: &str = "mkfeed.json";

#[derive(Debug, Clone, PartialEq)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub port: u16,
    /// Base URL used when building links sent by email.
    pub public_url: String,
    pub data_dir: Option<PathBuf>,
    /// Key for the text-rewrite service, handed to the browser as-is.
    pub gemini_api_key: Option<String>,
    pub smtp: Option<SmtpConfig>,
    /// HTTP worker threads for the native server; actix picks one per core when unset.
    pub workers: Option<usize>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary variable source. Blank values count as unset.
    pub fn from_vars<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let port = match var("PORT") {
            Some(raw) => raw
                .parse::<u16>()
                .with_context(|| format!("PORT must be a port number, got {raw:?}"))?,
            None => DEFAULT_PORT,
        };

        let public_url = var("MKFEED_PUBLIC_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|| format!("http://localhost:{port}"));

        let smtp = match var("SMTP_HOST") {
            Some(host) => {
                let required = |key: &str| {
                    var(key).ok_or_else(|| anyhow!("{key} is required when SMTP_HOST is set"))
                };
                let port = match var("SMTP_PORT") {
                    Some(raw) => raw
                        .parse::<u16>()
                        .with_context(|| format!("SMTP_PORT must be a port number, got {raw:?}"))?,
                    None => DEFAULT_SMTP_PORT,
                };
                Some(SmtpConfig {
                    host,
                    port,
                    username: required("SMTP_USERNAME")?,
                    password: required("SMTP_PASSWORD")?,
                    from: required("EMAIL_FROM")?,
                })
            }
            None => {
                if var("SMTP_USERNAME").is_some() || var("SMTP_PASSWORD").is_some() {
                    bail!("SMTP credentials are set but SMTP_HOST is missing");
                }
                None
            }
        };

        let workers = match var("MKFEED_WORKERS") {
            Some(raw) => match raw.parse::<usize>() {
                Ok(n) if n > 0 => Some(n),
                _ => bail!("MKFEED_WORKERS must be a positive number, got {raw:?}"),
            },
            None => None,
        };

        Ok(Self {
            port,
            public_url,
            data_dir: var("MKFEED_DATA_DIR").map(PathBuf::from),
            gemini_api_key: var("GEMINI_API_KEY"),
            smtp,
            workers,
        })
    }

    pub fn snapshot_path(&self) -> Option<PathBuf> {
        self.data_dir.as_ref().map(|dir| dir.join(SNAPSHOT_FILE))
    }

    pub fn reset_link(&self, token: &str) -> String {
        format!(
            "{}/reset-password?token={}",
            self.public_url,
            urlencoding::encode(token)
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            public_url: format!("http://localhost:{DEFAULT_PORT}"),
            data_dir: None,
            gemini_api_key: None,
            smtp: None,
            workers: None,
        }
    }
}
