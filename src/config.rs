use anyhow::Result;
use serde::Deserialize;
use std::fs;
use std::sync::OnceLock;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub dokuweb: DokuwebConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DokuwebConfig {
    /// Base URL of the REST side, e.g. `https://dokuweb.example.com`
    pub base_url: String,
    /// Endpoint URL of the SOAP side (the service location from the WSDL)
    pub soap_endpoint: String,
    pub username: String,
    pub password: String,
    /// Ticket system passed to createTicket/getKeywords when the caller
    /// does not name one
    pub ticketsystem: Option<String>,
}

static CONFIG: OnceLock<Config> = OnceLock::new();

pub fn init(path: &str) -> Result<()> {
    let config_str = fs::read_to_string(path)?;
    let config: Config = serde_yaml::from_str(&config_str)?;
    CONFIG.set(config).unwrap();
    Ok(())
}

pub fn get() -> &'static Config {
    CONFIG.get().expect("Config not initialized")
}

pub fn get_dokuweb() -> &'static DokuwebConfig {
    &get().dokuweb
}
