use rocket::figment::providers::Env;
use rocket::figment::Figment;
use serde::Deserialize;
use std::path::PathBuf;

/// Application settings extracted from the Rocket figment (`Rocket.toml`,
/// `ROCKET_*` variables and a bare `DATABASE_URL`).
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub database_url: String,
    #[serde(default = "default_page_size")]
    pub page_size: i64,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    /// Seconds a request waits for a free database connection.
    #[serde(default = "default_pool_timeout")]
    pub pool_timeout: u64,
    #[serde(default = "default_media_dir")]
    pub media_dir: PathBuf,
    pub session_secret: String,
}

fn default_page_size() -> i64 {
    10
}

fn default_pool_size() -> u32 {
    8
}

fn default_pool_timeout() -> u64 {
    5
}

fn default_media_dir() -> PathBuf {
    PathBuf::from("media")
}

/// Rocket's default figment, with `DATABASE_URL` from the process environment
/// (or `.env`) taking precedence over `Rocket.toml`.
pub fn figment() -> Figment {
    dotenv::dotenv().ok();
    rocket::Config::figment().merge(Env::raw().only(&["DATABASE_URL"]))
}
