// src/config.rs

use dotenvy::dotenv;
use std::env;

/// Exam groups that are open by default: every student may sit the first
/// exam of the foundation group (0) and of group 1 without a teacher
/// override.
pub const DEFAULT_OPEN_GROUPS: &[i64] = &[0, 1];

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub jwt_expiration: u64,
    pub rust_log: String,
    pub seed_teacher_username: Option<String>,
    pub seed_teacher_password: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv().ok();

        let database_url = env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://examtrek.db?mode=rwc".to_string());

        let jwt_secret = env::var("JWT_SECRET").expect("JWT_SECRET must be set");

        let jwt_expiration = env::var("JWT_EXPIRATION")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(86400);

        let rust_log = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        Self {
            database_url,
            jwt_secret,
            jwt_expiration,
            rust_log,
            seed_teacher_username: env::var("SEED_TEACHER_USERNAME").ok(),
            seed_teacher_password: env::var("SEED_TEACHER_PASSWORD").ok(),
        }
    }
}
