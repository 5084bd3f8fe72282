use std::collections::HashMap;
use std::env;

use crate::storage::CloudinaryConfig;

/// Prefix for per-provider webhook secrets, e.g. `WEBHOOK_SECRET_PAYSTACK`.
const WEBHOOK_SECRET_PREFIX: &str = "WEBHOOK_SECRET_";

#[derive(Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    /// Directory for locally rendered receipt PDFs
    pub receipts_dir: String,
    /// Dev vs prod mode flag; only toggles logging verbosity and the mock
    /// webhook default
    pub dev_mode: bool,
    /// Whether the `mock` provider may bypass signature verification
    pub allow_mock_webhooks: bool,
    /// Per-provider webhook HMAC secrets (provider name, lowercase)
    pub webhook_secrets: HashMap<String, String>,
    pub cloudinary: CloudinaryConfig,
    pub resend_api_key: String,
    /// From-address for receipt emails
    pub email_from: String,
    /// Lifetime of signed artifact download URLs
    pub signed_url_ttl_secs: i64,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let dev_mode = env::var("RECEIPTD_ENV")
            .map(|v| v == "dev" || v == "development")
            .unwrap_or(false);

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);

        // Mock webhooks are a dev/test convenience; production must opt in
        // explicitly (and should not).
        let allow_mock_webhooks = env::var("ALLOW_MOCK_WEBHOOKS")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(dev_mode);

        // Scan WEBHOOK_SECRET_<PROVIDER> variables into a provider map.
        let webhook_secrets: HashMap<String, String> = env::vars()
            .filter_map(|(key, value)| {
                key.strip_prefix(WEBHOOK_SECRET_PREFIX)
                    .map(|provider| (provider.to_lowercase(), value))
            })
            .collect();

        if webhook_secrets.is_empty() && !allow_mock_webhooks {
            panic!(
                "No webhook secrets configured.\n\n\
                 Set one per payment provider:\n  \
                   export WEBHOOK_SECRET_PAYSTACK=whsec_...\n\n\
                 (or enable mock webhooks for local development with\n  \
                   RECEIPTD_ENV=dev)"
            );
        }

        let cloudinary = CloudinaryConfig {
            cloud_name: require_or_dev_default(dev_mode, "CLOUDINARY_CLOUD_NAME", "dev"),
            api_key: require_or_dev_default(dev_mode, "CLOUDINARY_API_KEY", "dev"),
            api_secret: require_or_dev_default(dev_mode, "CLOUDINARY_API_SECRET", "dev"),
        };

        let resend_api_key = require_or_dev_default(dev_mode, "RESEND_API_KEY", "dev");

        let signed_url_ttl_secs: i64 = env::var("SIGNED_URL_TTL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(7 * 86_400);

        Self {
            host,
            port,
            database_path: env::var("DATABASE_PATH").unwrap_or_else(|_| "receiptd.db".to_string()),
            receipts_dir: env::var("RECEIPTS_DIR")
                .unwrap_or_else(|_| "uploads/receipts".to_string()),
            dev_mode,
            allow_mock_webhooks,
            webhook_secrets,
            cloudinary,
            resend_api_key,
            email_from: env::var("EMAIL_FROM")
                .unwrap_or_else(|_| "receipts@example.com".to_string()),
            signed_url_ttl_secs,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Require a credential in production; fall back to a placeholder with a
/// loud warning in dev mode so the server can still start without real
/// provider accounts.
fn require_or_dev_default(dev_mode: bool, key: &str, placeholder: &str) -> String {
    match env::var(key) {
        Ok(value) => value,
        Err(_) if dev_mode => {
            eprintln!(
                "WARNING: {} not set; using a dev placeholder. Provider calls will fail.",
                key
            );
            placeholder.to_string()
        }
        Err(_) => {
            panic!(
                "{} environment variable is required in production.\n\n\
                 Set it and restart the server.",
                key
            );
        }
    }
}
