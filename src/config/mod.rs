use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub xp: XpConfig,
    pub attendance: AttendanceConfig,
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub max_upload_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Postgres connection string. When unset the service runs on the in-memory store.
    pub url: Option<String>,
    pub max_connections: u32,
    pub connection_timeout: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XpConfig {
    pub api_url: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub request_timeout_secs: u64,
    /// Pause between two users of the same run
    pub request_delay_ms: u64,
    /// Extra pause after an error that looks like a provider rate limit
    pub rate_limit_cooldown_secs: u64,
    /// Period of the background sync task; disabled when unset
    pub schedule_interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendanceConfig {
    pub processor_url: String,
    pub request_timeout_secs: u64,
    /// Share of the meeting a student must attend to be marked present
    pub present_threshold: f64,
    pub default_meeting_minutes: f64,
    pub enrollment_first_sequence: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub cors_origins: Vec<String>,
    #[serde(skip_serializing)]
    pub sync_secret: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let environment = match env::var("APP_ENV").as_deref() {
            Ok("production") | Ok("prod") => Environment::Production,
            Ok("staging") | Ok("stage") => Environment::Staging,
            _ => Environment::Development,
        };

        match environment {
            Environment::Production => Self::production(),
            Environment::Staging => Self::staging(),
            Environment::Development => Self::development(),
        }
        .with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Self {
        // Server overrides
        if let Some(v) = env::var("MENTIBY_PORT").ok().or_else(|| env::var("PORT").ok()) {
            self.server.port = v.parse().unwrap_or(self.server.port);
        }
        if let Ok(v) = env::var("SERVER_MAX_UPLOAD_BYTES") {
            self.server.max_upload_bytes = v.parse().unwrap_or(self.server.max_upload_bytes);
        }

        // Database overrides
        if let Ok(v) = env::var("DATABASE_URL") {
            self.database.url = Some(v).filter(|s| !s.trim().is_empty());
        }
        if let Ok(v) = env::var("DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = v.parse().unwrap_or(self.database.max_connections);
        }
        if let Ok(v) = env::var("DATABASE_CONNECTION_TIMEOUT") {
            self.database.connection_timeout = v.parse().unwrap_or(self.database.connection_timeout);
        }

        // XP provider overrides
        if let Ok(v) = env::var("XP_API_URL") {
            self.xp.api_url = v;
        }
        if let Ok(v) = env::var("XP_API_KEY") {
            self.xp.api_key = Some(v).filter(|s| !s.is_empty());
        }
        if let Ok(v) = env::var("XP_REQUEST_TIMEOUT_SECS") {
            self.xp.request_timeout_secs = v.parse().unwrap_or(self.xp.request_timeout_secs);
        }
        if let Ok(v) = env::var("XP_REQUEST_DELAY_MS") {
            self.xp.request_delay_ms = v.parse().unwrap_or(self.xp.request_delay_ms);
        }
        if let Ok(v) = env::var("XP_RATE_LIMIT_COOLDOWN_SECS") {
            self.xp.rate_limit_cooldown_secs = v.parse().unwrap_or(self.xp.rate_limit_cooldown_secs);
        }
        if let Ok(v) = env::var("XP_SYNC_INTERVAL_SECS") {
            self.xp.schedule_interval_secs = v.parse().ok().filter(|secs| *secs > 0);
        }

        // Attendance overrides
        if let Ok(v) = env::var("ATTENDANCE_PROCESSOR_URL") {
            self.attendance.processor_url = v;
        }
        if let Ok(v) = env::var("ATTENDANCE_REQUEST_TIMEOUT_SECS") {
            self.attendance.request_timeout_secs = v.parse().unwrap_or(self.attendance.request_timeout_secs);
        }
        if let Ok(v) = env::var("ATTENDANCE_PRESENT_THRESHOLD") {
            self.attendance.present_threshold = v.parse().unwrap_or(self.attendance.present_threshold);
        }
        if let Ok(v) = env::var("ATTENDANCE_DEFAULT_MEETING_MINUTES") {
            self.attendance.default_meeting_minutes = v.parse().unwrap_or(self.attendance.default_meeting_minutes);
        }
        if let Ok(v) = env::var("ENROLLMENT_FIRST_SEQUENCE") {
            self.attendance.enrollment_first_sequence = v.parse().unwrap_or(self.attendance.enrollment_first_sequence);
        }

        // Security overrides
        if let Ok(v) = env::var("SECURITY_CORS_ORIGINS") {
            self.security.cors_origins = v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
        }
        if let Ok(v) = env::var("XP_SYNC_SECRET") {
            self.security.sync_secret = Some(v).filter(|s| !s.is_empty());
        }

        self
    }

    fn development() -> Self {
        Self {
            environment: Environment::Development,
            server: ServerConfig {
                port: 5000,
                max_upload_bytes: 16 * 1024 * 1024, // 16MB
            },
            database: DatabaseConfig {
                url: None,
                max_connections: 5,
                connection_timeout: 30,
            },
            xp: XpConfig {
                api_url: "http://localhost:4010/xp".to_string(),
                api_key: None,
                request_timeout_secs: 30,
                request_delay_ms: 1200,
                rate_limit_cooldown_secs: 5 * 60,
                schedule_interval_secs: None,
            },
            attendance: AttendanceConfig {
                processor_url: "http://localhost:5000".to_string(),
                request_timeout_secs: 120,
                present_threshold: 0.1,
                default_meeting_minutes: 90.0,
                enrollment_first_sequence: 1001,
            },
            security: SecurityConfig {
                cors_origins: vec!["http://localhost:3000".to_string()],
                sync_secret: None,
            },
        }
    }

    fn staging() -> Self {
        let mut config = Self::development();
        config.environment = Environment::Staging;
        config.database.max_connections = 10;
        config.database.connection_timeout = 10;
        config.security.cors_origins = vec!["https://staging.mentiby.com".to_string()];
        config
    }

    fn production() -> Self {
        let mut config = Self::development();
        config.environment = Environment::Production;
        config.database.max_connections = 20;
        config.database.connection_timeout = 5;
        // Hourly refresh keeps the leaderboard current without hammering the provider
        config.xp.schedule_interval_secs = Some(60 * 60);
        config.security.cors_origins = vec!["https://admin.mentiby.com".to_string()];
        config
    }

    pub fn xp_request_delay(&self) -> Duration {
        Duration::from_millis(self.xp.request_delay_ms)
    }

    pub fn xp_rate_limit_cooldown(&self) -> Duration {
        Duration::from_secs(self.xp.rate_limit_cooldown_secs)
    }

    /// Configuration suitable for tests: in-memory store, no delays
    pub fn for_tests() -> Self {
        let mut config = Self::development();
        config.xp.request_delay_ms = 0;
        config.xp.rate_limit_cooldown_secs = 0;
        config
    }
}

// Global singleton config - initialized once at startup
pub static CONFIG: Lazy<AppConfig> = Lazy::new(AppConfig::from_env);

pub fn config() -> &'static AppConfig {
    &CONFIG
}
