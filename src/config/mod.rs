use anyhow::Result;
use dotenvy::dotenv;
use secrecy::Secret;
use serde::Deserialize;
use std::env;

#[derive(Deserialize, Clone, Debug)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub gateway: GatewayConfig,
    pub service_name: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Deserialize, Clone, Debug)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    pub db_name: String,
}

/// Payment gateway credentials, used to verify the signature on the
/// verified-payment callback for online donations.
#[derive(Deserialize, Clone, Debug)]
pub struct GatewayConfig {
    pub key_id: String,
    pub key_secret: Secret<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let host = env::var("DONATION_SERVICE_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("DONATION_SERVICE_PORT")
            .unwrap_or_else(|_| "3007".to_string())
            .parse()?;

        let db_url = env::var("DONATION_DATABASE_URL").expect("DONATION_DATABASE_URL must be set");
        let db_name =
            env::var("DONATION_DATABASE_NAME").unwrap_or_else(|_| "donation_db".to_string());

        let gateway_key_id = env::var("DONATION_GATEWAY_KEY_ID").unwrap_or_default();
        let gateway_key_secret = env::var("DONATION_GATEWAY_KEY_SECRET").unwrap_or_default();

        Ok(Self {
            server: ServerConfig { host, port },
            database: DatabaseConfig {
                url: Secret::new(db_url),
                db_name,
            },
            gateway: GatewayConfig {
                key_id: gateway_key_id,
                key_secret: Secret::new(gateway_key_secret),
            },
            service_name: "donation-service".to_string(),
        })
    }
}
