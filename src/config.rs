use std::env;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub email: EmailConfig,
    pub sla: SlaConfig,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Clone, Debug)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
}

#[derive(Clone, Debug)]
pub struct SlaConfig {
    /// Seconds between breach-scanner passes.
    pub scan_interval_secs: u64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("SERVER_PORT")
                    .ok()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(8080),
            },
            email: EmailConfig {
                smtp_host: env::var("SMTP_HOST").unwrap_or_else(|_| "localhost".to_string()),
                smtp_port: env::var("SMTP_PORT")
                    .ok()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(587),
                username: env::var("SMTP_USER").ok(),
                password: env::var("SMTP_PASS").ok(),
                from: env::var("SMTP_FROM")
                    .unwrap_or_else(|_| "noreply@servicedesk.local".to_string()),
            },
            sla: SlaConfig {
                scan_interval_secs: env::var("SLA_SCAN_INTERVAL_SECS")
                    .ok()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(300),
            },
        }
    }
}
