use super::PlaceLocator;
use crate::structures::Location;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

pub const DEFAULT_URL: &str = "https://nominatim.openstreetmap.org/search";
const ACCEPT_LANGUAGE: &str = "en-US";

/// Nominatim search, single best match.
#[derive(Debug, Clone)]
pub struct Nominatim {
    client: Client,
    url: String,
}

#[derive(Debug, Deserialize)]
struct Place {
    lat: String,
    lon: String,
    #[serde(default)]
    address: Address,
}

#[derive(Debug, Default, Deserialize)]
struct Address {
    #[serde(default)]
    country_code: String,
    #[serde(default)]
    country: String,
    city: Option<String>,
    town: Option<String>,
    village: Option<String>,
}

impl TryFrom<Place> for Location {
    type Error = anyhow::Error;

    fn try_from(p: Place) -> Result<Self> {
        let latitude = p
            .lat
            .parse::<f64>()
            .with_context(|| format!("invalid lat {:?}", p.lat))?;
        let longitude = p
            .lon
            .parse::<f64>()
            .with_context(|| format!("invalid lon {:?}", p.lon))?;
        let a = p.address;

        Ok(Self {
            ip: None,
            country_code: a.country_code,
            country_name: a.country,
            city: a.city.or(a.town).or(a.village),
            latitude,
            longitude,
        })
    }
}

impl Nominatim {
    pub fn new(client: Client, url: Option<String>) -> Self {
        Self {
            client,
            url: url.unwrap_or_else(|| DEFAULT_URL.to_string()),
        }
    }
}

#[async_trait]
impl PlaceLocator for Nominatim {
    async fn geocode(&self, query: &str) -> Result<Location> {
        let qp = [
            ("q", query),
            ("format", "json"),
            ("addressdetails", "1"),
            ("limit", "1"),
            ("accept-language", ACCEPT_LANGUAGE),
        ];

        let resp = self
            .client
            .get(&self.url)
            .query(&qp)
            .send()
            .await
            .with_context(|| format!("GET {} failed", self.url))?;

        if !resp.status().is_success() {
            return Err(anyhow!("GET {} {}", self.url, resp.status()));
        }

        let places = resp
            .json::<Vec<Place>>()
            .await
            .context("Failed to parse nominatim response")?;

        places
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("no place matches {:?}", query))?
            .try_into()
    }
}
