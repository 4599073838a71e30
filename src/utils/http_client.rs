use anyhow::{Context, Result};
use reqwest::{Client, ClientBuilder};
use std::time::Duration;

const USER_AGENT: &str = "gitreport/1.0.0";

/// Create a configured HTTP client for making requests to git platform APIs
pub fn create_http_client() -> Result<Client> {
    create_http_client_with_timeout(Duration::from_secs(30))
}

/// HTTP client for slower upstreams such as LLM completions
pub fn create_http_client_with_timeout(timeout: Duration) -> Result<Client> {
    ClientBuilder::new()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .context("Failed to create HTTP client")
}
