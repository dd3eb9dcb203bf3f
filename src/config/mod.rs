use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub hierarchy: HierarchyConfig,
    pub cascade: CascadeConfig,
    pub database: DatabaseConfig,
    pub idp: IdpConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HierarchyConfig {
    pub cache_ttl_secs: u64,
    pub cache_max_entries: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CascadeConfig {
    /// Fixed number of remote calls in flight during a cascade
    pub concurrency: usize,
    pub call_timeout_ms: u64,
    /// Upper bound on the whole cascade
    pub deadline_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
    pub connection_timeout: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdpConfig {
    /// Tenant endpoint, e.g. https://auth.example.com
    pub endpoint: String,
    pub client_id: String,
    #[serde(skip_serializing, default)]
    pub client_secret: String,
    pub request_timeout_secs: u64,
}

impl HierarchyConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

impl CascadeConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }
}

impl DatabaseConfig {
    /// Connection URL with any password masked, for display
    pub fn redacted_url(&self) -> Option<String> {
        let raw = self.url.as_deref()?;
        match url::Url::parse(raw) {
            Ok(mut parsed) => {
                if parsed.password().is_some() {
                    let _ = parsed.set_password(Some("****"));
                }
                Some(parsed.to_string())
            }
            Err(_) => Some("<unparseable>".to_string()),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let environment = match env::var("APP_ENV").as_deref() {
            Ok("production") | Ok("prod") => Environment::Production,
            Ok("staging") | Ok("stage") => Environment::Staging,
            _ => Environment::Development,
        };

        // Set defaults based on environment, then override with specific env vars
        match environment {
            Environment::Production => Self::production(),
            Environment::Staging => Self::staging(),
            Environment::Development => Self::development(),
        }
        .with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Self {
        // Hierarchy overrides
        if let Ok(v) = env::var("HIERARCHY_CACHE_TTL_SECS") {
            self.hierarchy.cache_ttl_secs = v.parse().unwrap_or(self.hierarchy.cache_ttl_secs);
        }
        if let Ok(v) = env::var("HIERARCHY_CACHE_MAX_ENTRIES") {
            self.hierarchy.cache_max_entries = v.parse().unwrap_or(self.hierarchy.cache_max_entries);
        }

        // Cascade overrides
        if let Ok(v) = env::var("CASCADE_CONCURRENCY") {
            self.cascade.concurrency = v.parse().unwrap_or(self.cascade.concurrency);
        }
        if let Ok(v) = env::var("CASCADE_CALL_TIMEOUT_MS") {
            self.cascade.call_timeout_ms = v.parse().unwrap_or(self.cascade.call_timeout_ms);
        }
        if let Ok(v) = env::var("CASCADE_DEADLINE_SECS") {
            self.cascade.deadline_secs = v.parse().unwrap_or(self.cascade.deadline_secs);
        }

        // Database overrides
        if let Ok(v) = env::var("DATABASE_URL") {
            self.database.url = Some(v);
        }
        if let Ok(v) = env::var("DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = v.parse().unwrap_or(self.database.max_connections);
        }
        if let Ok(v) = env::var("DATABASE_CONNECTION_TIMEOUT") {
            self.database.connection_timeout = v.parse().unwrap_or(self.database.connection_timeout);
        }

        // Identity provider overrides
        if let Ok(v) = env::var("IDP_ENDPOINT") {
            self.idp.endpoint = v.trim_end_matches('/').to_string();
        }
        if let Ok(v) = env::var("IDP_CLIENT_ID") {
            self.idp.client_id = v;
        }
        if let Ok(v) = env::var("IDP_CLIENT_SECRET") {
            self.idp.client_secret = v;
        }
        if let Ok(v) = env::var("IDP_REQUEST_TIMEOUT_SECS") {
            self.idp.request_timeout_secs = v.parse().unwrap_or(self.idp.request_timeout_secs);
        }

        // A zero-sized pool would never drain
        self.cascade.concurrency = self.cascade.concurrency.max(1);
        self
    }

    pub fn development() -> Self {
        Self {
            environment: Environment::Development,
            hierarchy: HierarchyConfig {
                cache_ttl_secs: 60,
                cache_max_entries: 1_000,
            },
            cascade: CascadeConfig {
                concurrency: 4,
                call_timeout_ms: 10_000,
                deadline_secs: 300,
            },
            database: DatabaseConfig {
                url: None,
                max_connections: 10,
                connection_timeout: 30,
            },
            idp: IdpConfig {
                endpoint: "http://localhost:3001".to_string(),
                client_id: String::new(),
                client_secret: String::new(),
                request_timeout_secs: 30,
            },
        }
    }

    pub fn staging() -> Self {
        Self {
            environment: Environment::Staging,
            hierarchy: HierarchyConfig {
                cache_ttl_secs: 300,
                cache_max_entries: 10_000,
            },
            cascade: CascadeConfig {
                concurrency: 8,
                call_timeout_ms: 10_000,
                deadline_secs: 120,
            },
            database: DatabaseConfig {
                url: None,
                max_connections: 20,
                connection_timeout: 10,
            },
            idp: IdpConfig {
                endpoint: String::new(),
                client_id: String::new(),
                client_secret: String::new(),
                request_timeout_secs: 30,
            },
        }
    }

    pub fn production() -> Self {
        Self {
            environment: Environment::Production,
            hierarchy: HierarchyConfig {
                cache_ttl_secs: 300,
                cache_max_entries: 50_000,
            },
            cascade: CascadeConfig {
                concurrency: 16,
                call_timeout_ms: 5_000,
                deadline_secs: 120,
            },
            database: DatabaseConfig {
                url: None,
                max_connections: 50,
                connection_timeout: 5,
            },
            idp: IdpConfig {
                endpoint: String::new(),
                client_id: String::new(),
                client_secret: String::new(),
                request_timeout_secs: 15,
            },
        }
    }
}

// Process-wide config for the binary. Services receive their sections by value.
pub static CONFIG: Lazy<AppConfig> = Lazy::new(AppConfig::from_env);

pub fn config() -> &'static AppConfig {
    &CONFIG
}
