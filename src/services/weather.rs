//! Weather module for fetching current conditions
//!
//! Uses the wttr.in one-line format (`?format=3&u`), which already returns a
//! human-readable `Location: ☀️ +72°F` string small enough for a single mesh frame.
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use log::{debug, warn};
use std::time::Duration;
use tokio::time::timeout;

use super::CommandHandler;
use crate::config::WeatherConfig;
use crate::logutil::safe_text;
use crate::meshtastic::Target;

/// Longest location string forwarded to the weather API.
pub const MAX_LOCATION_CHARS: usize = 256;

pub struct WeatherService {
    config: WeatherConfig,
    client: reqwest::Client,
}

impl WeatherService {
    pub fn new(config: WeatherConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| anyhow!("Failed to build weather HTTP client: {}", e))?;
        Ok(Self { config, client })
    }

    /// Request URL for `location` (already sanitized).
    pub fn build_api_url(&self, location: &str) -> String {
        format!(
            "{}/{}?format=3&u",
            self.config.base_url.trim_end_matches('/'),
            urlencoding::encode(location)
        )
    }

    /// Fetch the one-line report, turning every failure into a reply string.
    pub async fn fetch_weather_for_location(&self, location: &str) -> String {
        if !self.config.enabled {
            debug!("Weather service is disabled");
            return "Weather service is disabled".to_string();
        }
        let location = safe_text(location.trim(), MAX_LOCATION_CHARS);
        match self.fetch_from_api(&location).await {
            Ok(Some(report)) => report,
            Ok(None) => "Unable to retrieve weather.".to_string(),
            Err(e) => {
                warn!("Failed to fetch weather for {}: {}", location, e);
                format!("Error retrieving weather: {}", e)
            }
        }
    }

    /// `Ok(None)` for a non-200 answer, `Err` for transport problems.
    async fn fetch_from_api(&self, location: &str) -> Result<Option<String>> {
        let url = self.build_api_url(location);
        debug!("Fetching weather from: {}", url);

        let timeout_duration = Duration::from_secs(self.config.timeout_secs);
        let response = timeout(timeout_duration, self.client.get(&url).send())
            .await
            .map_err(|_| anyhow!("Request timeout after {}s", self.config.timeout_secs))?
            .map_err(|e| anyhow!("HTTP request failed: {}", e))?;

        if response.status() != reqwest::StatusCode::OK {
            debug!("Weather API returned status: {}", response.status());
            return Ok(None);
        }
        let body = response
            .text()
            .await
            .map_err(|e| anyhow!("Failed to read response body: {}", e))?;
        Ok(Some(body.trim().to_string()))
    }
}

#[async_trait]
impl CommandHandler for WeatherService {
    fn keyword(&self) -> &'static str {
        "weather"
    }

    async fn handle(&self, args: &str, _target: Target, _user: u32) -> String {
        let location = if args.trim().is_empty() {
            self.config.default_location.clone()
        } else {
            args.to_string()
        };
        self.fetch_weather_for_location(&location).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(enabled: bool) -> WeatherService {
        WeatherService::new(WeatherConfig {
            enabled,
            ..WeatherConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn url_encodes_location() {
        let s = service(true);
        assert_eq!(
            s.build_api_url("San Francisco"),
            "https://wttr.in/San%20Francisco?format=3&u"
        );
        assert_eq!(s.build_api_url(""), "https://wttr.in/?format=3&u");
    }

    #[tokio::test]
    async fn disabled_service_says_so() {
        let s = service(false);
        assert_eq!(
            s.handle("Paris", Target::Node(1), 1).await,
            "Weather service is disabled"
        );
    }

    #[tokio::test]
    async fn unreachable_host_reports_error() {
        let s = WeatherService::new(WeatherConfig {
            base_url: "http://127.0.0.1:9".into(),
            timeout_secs: 2,
            ..WeatherConfig::default()
        })
        .unwrap();
        let reply = s.handle("", Target::Node(1), 1).await;
        assert!(reply.starts_with("Error retrieving weather: "), "{}", reply);
    }
}
