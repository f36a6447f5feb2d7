//! City name resolution against the Open-Meteo geocoding API.

use std::time::Duration;

use anyhow::Context;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::config::GeocodingConfig;
use crate::models::GeoMatch;
use crate::{MeteoError, Result};

/// Results requested per lookup
const RESULT_COUNT: u8 = 5;
const SUGGEST_TIMEOUT: Duration = Duration::from_secs(5);
const USER_AGENT: &str = concat!("meteo/", env!("CARGO_PKG_VERSION"));

/// True when `text` holds at least one letter of the Russian alphabet
#[must_use]
pub fn is_cyrillic(text: &str) -> bool {
    text.chars()
        .any(|c| matches!(c, 'А'..='я' | 'Ё' | 'ё'))
}

#[derive(Debug, Deserialize)]
struct GeocodingResponse {
    #[serde(default)]
    results: Option<Vec<GeoMatch>>,
}

/// Resolves free-text city names to a single [`GeoMatch`]
pub struct GeoResolver {
    client: Client,
    suggest_client: Client,
    base_url: String,
}

impl GeoResolver {
    pub fn new(config: &GeocodingConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds.into()))
            .user_agent(USER_AGENT)
            .build()
            .with_context(|| "Failed to create geocoding HTTP client")?;
        let suggest_client = Client::builder()
            .timeout(SUGGEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .with_context(|| "Failed to create autocomplete HTTP client")?;

        Ok(Self {
            client,
            suggest_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Best match for `city`, optionally narrowed by country code and admin region.
    ///
    /// With `admin`, the first result in that region wins; when none is in
    /// that region the top result is returned.
    #[instrument(skip(self))]
    pub async fn resolve(
        &self,
        city: &str,
        country_code: Option<&str>,
        admin: Option<&str>,
    ) -> Result<GeoMatch> {
        let url = self.search_url(city, country_code);
        let mut results = self.lookup(&self.client, &url).await?;
        if results.is_empty() {
            return Err(MeteoError::GeoNotFound);
        }

        if let Some(admin) = admin.filter(|a| !a.is_empty()) {
            match results
                .iter()
                .position(|r| r.admin_region.as_deref() == Some(admin))
            {
                Some(index) => return Ok(results.swap_remove(index)),
                None => warn!(
                    "No geocoding result for '{}' in region '{}', using top candidate",
                    city, admin
                ),
            }
        }

        let geo = results.swap_remove(0);
        debug!(
            "Found location: {} ({})",
            geo.name,
            geo.format_coordinates()
        );
        Ok(geo)
    }

    /// Autocomplete candidates for `query`, most populous first
    #[instrument(skip(self))]
    pub async fn suggest(&self, query: &str) -> Result<Vec<GeoMatch>> {
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let url = self.search_url(query, None);
        let mut results = self.lookup(&self.suggest_client, &url).await?;
        results.sort_by(|a, b| b.population.unwrap_or(0).cmp(&a.population.unwrap_or(0)));
        Ok(results)
    }

    fn search_url(&self, name: &str, country_code: Option<&str>) -> String {
        let mut url = format!(
            "{}/search?name={}&count={}",
            self.base_url,
            urlencoding::encode(name),
            RESULT_COUNT
        );
        if let Some(code) = country_code.filter(|c| !c.is_empty()) {
            url.push_str("&countryCode=");
            url.push_str(&urlencoding::encode(code));
        }
        if is_cyrillic(name) {
            url.push_str("&language=ru");
        }
        url
    }

    async fn lookup(&self, client: &Client, url: &str) -> Result<Vec<GeoMatch>> {
        debug!("Geocoding request URL: {}", url);

        let response = client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| {
                warn!("Geocoding request failed: {}", e);
                MeteoError::GeoServiceUnavailable
            })?;

        let body = response.text().await.map_err(|e| {
            warn!("Failed to read geocoding response: {}", e);
            MeteoError::GeoServiceUnavailable
        })?;

        let parsed: GeocodingResponse = serde_json::from_str(&body).map_err(|e| {
            warn!("Failed to parse geocoding response: {}", e);
            MeteoError::GeoMalformedResponse
        })?;

        Ok(parsed.results.unwrap_or_default())
    }
}
