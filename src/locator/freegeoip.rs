use super::IpLocator;
use crate::structures::Location;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

pub const DEFAULT_URL: &str = "https://ipapi.co/json/";

/// Freegeoip compatible lookup of the caller's public address.
#[derive(Debug, Clone)]
pub struct FreeGeoIp {
    client: Client,
    url: String,
}

#[derive(Debug, Deserialize)]
struct GeoIpResp {
    #[serde(default)]
    ip: String,
    #[serde(default)]
    country_code: String,
    #[serde(default)]
    country_name: String,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    latitude: f64,
    #[serde(default)]
    longitude: f64,
}

impl From<GeoIpResp> for Location {
    fn from(r: GeoIpResp) -> Self {
        Self {
            ip: Some(r.ip).filter(|ip| !ip.is_empty()),
            country_code: r.country_code,
            country_name: r.country_name,
            city: r.city.filter(|c| !c.is_empty()),
            latitude: r.latitude,
            longitude: r.longitude,
        }
    }
}

impl FreeGeoIp {
    pub fn new(client: Client, url: Option<String>) -> Self {
        Self {
            client,
            url: url.unwrap_or_else(|| DEFAULT_URL.to_string()),
        }
    }
}

#[async_trait]
impl IpLocator for FreeGeoIp {
    async fn locate(&self) -> Result<Location> {
        let resp = self
            .client
            .get(&self.url)
            .send()
            .await
            .with_context(|| format!("GET {} failed", self.url))?;

        if !resp.status().is_success() {
            return Err(anyhow!("GET {} {}", self.url, resp.status()));
        }

        let body = resp
            .json::<GeoIpResp>()
            .await
            .context("Failed to parse geoip response")?;

        Ok(body.into())
    }
}
