//! Weather lookup with a time-bounded cache
//!
//! Entries are cached per city per day under `weather:{city}:{date}`.
//! Today's entry expires the day after tomorrow at local midnight, so
//! yesterday's report stays readable until today rolls over.

use anyhow::{Context, Result};
use chrono::{Days, NaiveDate, NaiveDateTime};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::backend::Backend;
use crate::config::WeatherConfig;

const DAY_SECS: u64 = 24 * 60 * 60;

pub(crate) fn weather_key(city: &str, date: NaiveDate) -> String {
    format!("weather:{}:{}", city, date.format("%Y-%m-%d"))
}

/// TTL for a weather entry written "now": until local midnight, plus a day
pub(crate) fn cache_ttl(now: NaiveDateTime) -> Duration {
    let midnight = (now.date() + Days::new(1))
        .and_hms_opt(0, 0, 0)
        .unwrap_or(now);
    let to_midnight = (midnight - now).num_seconds().max(1) as u64;
    Duration::from_secs(to_midnight + DAY_SECS)
}

#[derive(Debug, Deserialize, serde::Serialize)]
struct CachedWeather {
    weather: String,
}

#[derive(Debug, Deserialize)]
struct OwmResponse {
    weather: Vec<OwmCondition>,
}

#[derive(Debug, Deserialize)]
struct OwmCondition {
    description: String,
}

/// Weather report for one city
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeatherReport {
    pub yesterday: Option<String>,
    pub today: String,
}

/// Fetch-and-cache weather lookups keyed by city and date
pub struct WeatherService {
    backend: Arc<dyn Backend>,
    client: reqwest::Client,
    config: WeatherConfig,
}

impl WeatherService {
    pub fn new(backend: Arc<dyn Backend>, config: WeatherConfig) -> Self {
        Self {
            backend,
            client: reqwest::Client::new(),
            config,
        }
    }

    /// Look up a city's weather, serving from cache when possible
    pub async fn lookup(&self, city: &str) -> Result<WeatherReport> {
        let now = chrono::Local::now().naive_local();
        let today = now.date();

        let yesterday = match today.checked_sub_days(Days::new(1)) {
            Some(date) => self.cached(&weather_key(city, date)).await,
            None => None,
        };

        let today_report = match self.cached(&weather_key(city, today)).await {
            Some(cached) => cached,
            None => self.fetch_and_cache(city, now).await?,
        };

        Ok(WeatherReport {
            yesterday,
            today: today_report,
        })
    }

    /// Cities with at least one cached entry
    pub async fn cached_cities(&self) -> Result<Vec<String>> {
        let keys = self.backend.kv_keys("weather:*").await?;

        let cities: BTreeSet<String> = keys
            .iter()
            .filter_map(|key| key.strip_prefix("weather:"))
            .filter_map(|rest| rest.split(':').next())
            .map(|city| city.to_string())
            .collect();

        Ok(cities.into_iter().collect())
    }

    async fn cached(&self, key: &str) -> Option<String> {
        let raw = self.backend.kv_get(key).await.ok()??;
        match serde_json::from_str::<CachedWeather>(&raw) {
            Ok(cached) => Some(cached.weather),
            Err(e) => {
                debug!("Malformed weather cache entry {}: {}", key, e);
                None
            }
        }
    }

    async fn fetch_and_cache(&self, city: &str, now: NaiveDateTime) -> Result<String> {
        if self.config.api_key.is_empty() {
            anyhow::bail!("weather API key not configured");
        }

        let query_city = format!("{},{}", city, self.config.country);
        let response: OwmResponse = self
            .client
            .get(&self.config.api_url)
            .query(&[
                ("q", query_city.as_str()),
                ("appid", self.config.api_key.as_str()),
            ])
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .context("weather request failed")?
            .error_for_status()
            .context("weather provider returned an error")?
            .json()
            .await
            .context("failed to parse weather response")?;

        let description = response
            .weather
            .into_iter()
            .next()
            .map(|condition| condition.description)
            .context("weather response carried no conditions")?;

        let payload = serde_json::to_string(&CachedWeather {
            weather: description.clone(),
        })?;
        self.backend
            .kv_set_ex(&weather_key(city, now.date()), &payload, cache_ttl(now))
            .await?;

        Ok(description)
    }
}
