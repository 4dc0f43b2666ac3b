//! Configuration for Lectern
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use std::net::SocketAddr;
use uuid::Uuid;

/// Lectern - educational content portal gateway
#[derive(Parser, Debug, Clone)]
#[command(name = "lectern")]
#[command(about = "REST gateway for the portal's tabular information workflow")]
pub struct Args {
    /// Unique node identifier for this gateway instance
    #[arg(long, env = "NODE_ID", default_value_t = Uuid::new_v4())]
    pub node_id: Uuid,

    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Enable development mode (in-memory store fallback, relaxed auth config)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "lectern")]
    pub mongodb_db: String,

    /// JWT secret for token signing (required in production)
    #[arg(long, env = "JWT_SECRET")]
    pub jwt_secret: Option<String>,

    /// JWT token expiry in seconds
    #[arg(long, env = "JWT_EXPIRY_SECONDS", default_value = "3600")]
    pub jwt_expiry_seconds: u64,

    /// Webhook endpoint for broadcast notifications (mail relay).
    /// When unset, broadcasts are logged only.
    #[arg(long, env = "NOTIFY_WEBHOOK_URL")]
    pub notify_webhook_url: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Args {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if !self.dev_mode && self.jwt_secret.is_none() {
            return Err("JWT_SECRET is required in production mode".to_string());
        }

        if let Some(ref url) = self.notify_webhook_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err("NOTIFY_WEBHOOK_URL must be an http(s) URL".to_string());
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dev_mode_allows_missing_secret() {
        let args = Args::parse_from(["lectern", "--dev-mode"]);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_production_requires_secret() {
        let args = Args::parse_from(["lectern"]);
        assert!(args.validate().is_err());

        let args = Args::parse_from([
            "lectern",
            "--jwt-secret",
            "a-secret-that-is-long-enough-for-hs256",
        ]);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_webhook_url_scheme_checked() {
        let mut args = Args::parse_from(["lectern", "--dev-mode"]);
        args.notify_webhook_url = Some("ftp://mail.example.org".into());
        assert!(args.validate().is_err());

        args.notify_webhook_url = Some("https://mail.example.org/broadcast".into());
        assert!(args.validate().is_ok());
    }
}
