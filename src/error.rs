use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable fetching error: {0}")]
    EnvVarNotSet(#[from] dotenvy::Error),
    #[error("HTTP request error: {0}")]
    HttpRequest(#[from] reqwest::Error),
    #[error("JSON serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Invalid log level: {0}")]
    InvalidLevel(#[from] log::ParseLevelError),
    #[error("No tokio runtime available: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
    #[error("Logger installation error: {0}")]
    Logger(#[from] log::SetLoggerError),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error(
        "Required webhook URL is empty, set it in the config file or with the WEBHOOK_URL environment variable"
    )]
    MissingWebhookUrl,
    #[error("Webhook URL must start with \"http://\" or \"https://\", got {0:?}")]
    UnsupportedScheme(String),
}
