use std::env;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub fiscal: FiscalConfig,
    pub payments: PaymentsConfig,
    pub loyalty: LoyaltyConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub root: String,
    pub public_base_url: String,
}

#[derive(Debug, Clone)]
pub struct FiscalConfig {
    pub ruc: String,
    pub sri_base_url: Option<String>,
    pub sri_api_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PaymentsConfig {
    pub webhook_secret: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LoyaltyConfig {
    pub cron: String,
}

fn get_str(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn get_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

impl AppConfig {
    pub fn from_env() -> Self {
        let port = env::var("SERVER_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8080);

        Self {
            server: ServerConfig {
                host: get_str("SERVER_HOST", "0.0.0.0"),
                port,
            },
            storage: StorageConfig {
                root: get_str("STORAGE_ROOT", "./work/storage"),
                public_base_url: get_str(
                    "STORAGE_PUBLIC_URL",
                    &format!("http://localhost:{port}/files"),
                ),
            },
            fiscal: FiscalConfig {
                ruc: get_str("FISCAL_RUC", "9999999999001"),
                sri_base_url: get_opt("SRI_BASE_URL"),
                sri_api_token: get_opt("SRI_API_TOKEN"),
            },
            payments: PaymentsConfig {
                webhook_secret: get_opt("PAYMENTS_WEBHOOK_SECRET"),
            },
            loyalty: LoyaltyConfig {
                // Daily, off-peak.
                cron: get_str("LOYALTY_CRON", "0 0 6 * * *"),
            },
        }
    }
}
