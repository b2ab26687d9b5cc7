use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub server: String,
    pub port: u16,
    pub sender: String,
    pub username: String,
    pub password: String,
}

/// Everything the service reads from the environment, gathered once at startup
/// and passed down explicitly.
#[derive(Debug, Clone)]
pub struct Config {
    pub smtp: SmtpConfig,
    pub openai_api_key: String,
    pub openai_model: String,
    pub news_api_key: Option<String>,
    pub finnhub_api_key: Option<String>,
    pub server_port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let smtp = SmtpConfig {
            server: required("SMTP_SERVER")?,
            port: std::env::var("SMTP_PORT")
                .unwrap_or_else(|_| "587".to_string())
                .parse()
                .context("SMTP_PORT must be a port number")?,
            sender: required("SMTP_SENDER")?,
            username: required("SMTP_USERNAME")?,
            password: required("SMTP_PASSWORD")?,
        };

        Ok(Config {
            smtp,
            openai_api_key: required("OPENAI_API_KEY")?,
            openai_model: std::env::var("OPENAI_MODEL")
                .unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            news_api_key: optional("NEWS_API_KEY"),
            finnhub_api_key: optional("FINNHUB_API_KEY"),
            server_port: std::env::var("DIGEST_SERVER_PORT")
                .unwrap_or_else(|_| "8000".to_string())
                .parse()
                .context("DIGEST_SERVER_PORT must be a port number")?,
        })
    }
}

fn required(name: &str) -> Result<String> {
    std::env::var(name).with_context(|| format!("{} must be set", name))
}

fn optional(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
