use anyhow::Context;

/// Service configuration, read from the environment at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// When unset the service runs on in-memory storage.
    pub database_url: Option<String>,
    pub llm_api_key: Option<String>,
    pub llm_api_url: String,
    pub llm_model: String,
    /// The single privileged role allowed to decide on bookings. When
    /// unset, every decision is ignored.
    pub approver_id: Option<i64>,
    pub knowledge_file: String,
    /// Where outbound notifications are POSTed. When unset they are only
    /// logged.
    pub notify_url: Option<String>,
}

const DEFAULT_LLM_API_URL: &str = "https://api.groq.com/openai/v1/chat/completions";
const DEFAULT_LLM_MODEL: &str = "llama-3.3-70b-versatile";

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let port = match std::env::var("PORT") {
            Ok(raw) => raw.parse::<u16>().context("PORT must be a port number")?,
            Err(_) => 3000,
        };

        let approver_id = match std::env::var("APPROVER_ID") {
            Ok(raw) => Some(
                raw.parse::<i64>()
                    .context("APPROVER_ID must be a numeric user id")?,
            ),
            Err(_) => None,
        };

        Ok(Self {
            port,
            database_url: std::env::var("DATABASE_URL").ok(),
            llm_api_key: std::env::var("LLM_API_KEY").ok(),
            llm_api_url: std::env::var("LLM_API_URL")
                .unwrap_or_else(|_| DEFAULT_LLM_API_URL.to_string()),
            llm_model: std::env::var("LLM_MODEL").unwrap_or_else(|_| DEFAULT_LLM_MODEL.to_string()),
            approver_id,
            knowledge_file: std::env::var("KNOWLEDGE_FILE")
                .unwrap_or_else(|_| "knowledge.txt".to_string()),
            notify_url: std::env::var("NOTIFY_URL").ok(),
        })
    }
}
