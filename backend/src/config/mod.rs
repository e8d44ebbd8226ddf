use dotenv::dotenv;
use serde::Deserialize;

#[derive(Clone, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// Postgres URL; the in-memory store is used when absent.
    pub database_url: Option<String>,
    pub database_pool_size: u32,
    pub jwt_secret: String,
    pub token_ttl_hours: i64,
    pub login_window_secs: i64,

    pub solana_rpc_url: String,
    pub reward_program_id: Option<String>,
    pub reward_mint: Option<String>,
    pub reward_decimals: u8,
    pub reward_tokens_per_kg: u64,

    pub roboflow_api_key: Option<String>,
    pub roboflow_model: String,
    pub roboflow_endpoint: String,
    pub detection_min_confidence: f64,

    pub github_token: Option<String>,
    pub github_repo: Option<String>,
    pub github_branch: String,
}

impl AppConfig {
    /// Defaults, overridden by the process environment (and `.env`).
    pub fn load() -> Result<Self, ::config::ConfigError> {
        dotenv().ok(); // Load .env file if present
        ::config::Config::builder()
            .set_default("host", "127.0.0.1")?
            .set_default("port", 8080)?
            .set_default("database_pool_size", 10)?
            .set_default("token_ttl_hours", 24)?
            .set_default("login_window_secs", 300)?
            .set_default("solana_rpc_url", "https://api.devnet.solana.com")?
            .set_default("reward_decimals", 9)?
            .set_default("reward_tokens_per_kg", 1)?
            .set_default("roboflow_model", "scrap-detection/1")?
            .set_default("roboflow_endpoint", "https://detect.roboflow.com")?
            .set_default("detection_min_confidence", 0.4)?
            .set_default("github_branch", "main")?
            .add_source(::config::Environment::default().try_parsing(true))
            .build()?
            .try_deserialize()
    }

    /// Local defaults with no database or integrations configured.
    pub fn local(jwt_secret: &str) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            database_url: None,
            database_pool_size: 10,
            jwt_secret: jwt_secret.to_string(),
            token_ttl_hours: 24,
            login_window_secs: 300,
            solana_rpc_url: "https://api.devnet.solana.com".to_string(),
            reward_program_id: None,
            reward_mint: None,
            reward_decimals: 9,
            reward_tokens_per_kg: 1,
            roboflow_api_key: None,
            roboflow_model: "scrap-detection/1".to_string(),
            roboflow_endpoint: "https://detect.roboflow.com".to_string(),
            detection_min_confidence: 0.4,
            github_token: None,
            github_repo: None,
            github_branch: "main".to_string(),
        }
    }
}

// Secrets stay out of the startup log.
impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database_url.is_some())
            .field("solana_rpc_url", &self.solana_rpc_url)
            .field("rewards", &self.reward_program_id.is_some())
            .field("detection", &self.roboflow_api_key.is_some())
            .field("image_host", &self.github_repo.is_some())
            .finish()
    }
}
