mod freegeoip;
mod nominatim;

pub use freegeoip::FreeGeoIp;
pub use nominatim::Nominatim;

use crate::error::ResolveError;
use crate::structures::Location;
use crate::util::retry_fixed;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{self, JoinError};
use tracing::{info, warn};

const LOOKUP_ATTEMPTS: u32 = 2;
const RETRY_PAUSE: Duration = Duration::from_secs(2);

/// Location of the measuring host, keyed on its public address.
#[async_trait]
pub trait IpLocator: Send + Sync {
    async fn locate(&self) -> anyhow::Result<Location>;
}

/// Best match for a free-text place name. Never carries an ip.
#[async_trait]
pub trait PlaceLocator: Send + Sync {
    async fn geocode(&self, query: &str) -> anyhow::Result<Location>;
}

/// Joins the ip based and name based lookups into one location.
#[derive(Clone)]
pub struct Locator {
    ip: Arc<dyn IpLocator>,
    place: Arc<dyn PlaceLocator>,
    attempts: u32,
    pause: Duration,
}

impl Locator {
    pub fn new(ip: Arc<dyn IpLocator>, place: Arc<dyn PlaceLocator>) -> Self {
        Self {
            ip,
            place,
            attempts: LOOKUP_ATTEMPTS,
            pause: RETRY_PAUSE,
        }
    }

    /// Without a query the ip source result is returned as is, or the unknown
    /// sentinel if it gave up. With a query the place source must answer;
    /// only its ip field is taken from the ip source.
    pub async fn resolve(&self, query: Option<&str>) -> Result<Location, ResolveError> {
        let query = query.map(str::trim).filter(|q| !q.is_empty());

        let ip_task = task::spawn(Self::lookup_ip(self.ip.clone(), self.attempts, self.pause));

        let query = match query {
            Some(q) => q,
            None => {
                let ip_loc = ip_task.await.map_err(task_failed)?;
                return Ok(ip_loc.unwrap_or_else(|| {
                    warn!("Ip location unavailable, report location unknown");
                    Location::unknown()
                }));
            }
        };

        let place_task = task::spawn(Self::lookup_place(
            self.place.clone(),
            query.to_string(),
            self.attempts,
            self.pause,
        ));

        let (ip_loc, place_loc) = tokio::join!(ip_task, place_task);
        let ip_loc = ip_loc.map_err(task_failed)?;
        let mut loc = place_loc
            .map_err(task_failed)?
            .ok_or_else(|| ResolveError::Geocode(query.to_string()))?;

        loc.ip = ip_loc.and_then(|l| l.ip);
        info!("Geocoded {:?} to {}, {}", query, loc.country_code, loc.country_name);

        Ok(loc)
    }

    async fn lookup_ip(
        src: Arc<dyn IpLocator>,
        attempts: u32,
        pause: Duration,
    ) -> Option<Location> {
        retry_fixed("Ip location lookup", attempts, pause, || src.locate())
            .await
            .map(Location::normalized)
    }

    async fn lookup_place(
        src: Arc<dyn PlaceLocator>,
        query: String,
        attempts: u32,
        pause: Duration,
    ) -> Option<Location> {
        retry_fixed("Geocode", attempts, pause, || src.geocode(&query))
            .await
            .map(|l| Location {
                ip: None,
                ..l.normalized()
            })
    }
}

fn task_failed(e: JoinError) -> ResolveError {
    ResolveError::Task(e.to_string())
}
