use crate::error::ConfigError;
use chrono::{DateTime, Utc};
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::fmt;
use std::time::Duration;
use url::{Host, Url};

const DEFAULT_TCP_PORT: u16 = 1883;
const DEFAULT_SSL_PORT: u16 = 8883;

/// One measured hop of an mtr report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HopRecord {
    #[serde(rename = "ip")]
    pub address: Option<String>,
    #[serde(default)]
    pub hostname: String,
    #[serde(rename = "hop-number")]
    pub hop: u32,
    pub sent: u32,
    #[serde(rename = "lost-percent")]
    pub loss_percent: f64,
    pub last: f64,
    pub avg: f64,
    pub best: f64,
    pub worst: f64,
    #[serde(rename = "standard-dev")]
    pub stddev: f64,
}

/// Geographic origin of the probing host, or of a geocoded place name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub country_code: String,
    #[serde(default)]
    pub country_name: String,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub latitude: f64,
    #[serde(default)]
    pub longitude: f64,
}

impl Location {
    pub fn unknown() -> Self {
        Self::default()
    }

    /// True when no geographic field is populated. The ip is not geographic.
    pub fn is_unknown(&self) -> bool {
        self.country_code.is_empty()
            && self.country_name.is_empty()
            && self.city.as_deref().map_or(true, str::is_empty)
            && self.latitude == 0.0
            && self.longitude == 0.0
    }

    /// Lower-cases the country code whatever casing the source used.
    pub fn normalized(mut self) -> Self {
        self.country_code = self.country_code.to_lowercase();
        self
    }
}

/// One complete measurement, as sent on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireReport")]
pub struct Report {
    pub time: DateTime<Utc>,
    pub hosts: Vec<HopRecord>,
    hops: usize,
    #[serde(with = "nanos")]
    pub elapsed_time: Duration,
    pub location: Option<Location>,
}

impl Report {
    pub fn new(time: DateTime<Utc>, hosts: Vec<HopRecord>, elapsed_time: Duration) -> Self {
        let hops = hosts.len();
        Self {
            time,
            hosts,
            hops,
            elapsed_time,
            location: None,
        }
    }

    pub fn hops(&self) -> usize {
        self.hops
    }

    /// Attaches a resolved location. The unknown sentinel is sent as null
    /// unless it still carries the observed ip.
    pub fn with_location(mut self, location: Location) -> Self {
        self.location = if location.is_unknown() && location.ip.is_none() {
            None
        } else {
            Some(location)
        };
        self
    }
}

/// Incoming payload before the hop count is checked.
#[derive(Deserialize)]
struct WireReport {
    time: DateTime<Utc>,
    hosts: Vec<HopRecord>,
    hops: usize,
    #[serde(with = "nanos")]
    elapsed_time: Duration,
    location: Option<Location>,
}

impl TryFrom<WireReport> for Report {
    type Error = String;

    fn try_from(w: WireReport) -> Result<Self, Self::Error> {
        if w.hops != w.hosts.len() {
            return Err(format!(
                "hops is {} but {} hosts are listed",
                w.hops,
                w.hosts.len()
            ));
        }
        Ok(Self {
            time: w.time,
            hosts: w.hosts,
            hops: w.hops,
            elapsed_time: w.elapsed_time,
            location: w.location,
        })
    }
}

/// `elapsed_time` travels as integer nanoseconds.
mod nanos {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_nanos() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_nanos)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Tcp,
    Ssl,
}

impl Scheme {
    pub fn is_encrypted(self) -> bool {
        self == Scheme::Ssl
    }
}

/// One configured delivery endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct BrokerCandidate {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl TryFrom<&str> for BrokerCandidate {
    type Error = ConfigError;

    fn try_from(raw: &str) -> Result<Self, Self::Error> {
        let invalid = |reason: &str| ConfigError::BrokerUrl {
            url: raw.to_string(),
            reason: reason.to_string(),
        };

        let uri = Url::parse(raw).map_err(|e| invalid(&e.to_string()))?;
        let scheme = match uri.scheme() {
            "tcp" => Scheme::Tcp,
            "ssl" => Scheme::Ssl,
            other => return Err(invalid(&format!("unsupported scheme {}", other))),
        };
        let host = match uri.host() {
            Some(Host::Domain(d)) if !d.is_empty() => d.to_string(),
            Some(Host::Ipv4(a)) => a.to_string(),
            Some(Host::Ipv6(a)) => a.to_string(),
            _ => return Err(invalid("missing host")),
        };
        let port = uri.port().unwrap_or(match scheme {
            Scheme::Tcp => DEFAULT_TCP_PORT,
            Scheme::Ssl => DEFAULT_SSL_PORT,
        });
        let decode = |raw: &str| {
            percent_decode_str(raw)
                .decode_utf8()
                .map(|v| v.into_owned())
                .map_err(|_| invalid("credentials are not valid utf-8"))
        };
        let username = match uri.username() {
            "" => None,
            user => Some(decode(user)?),
        };
        let password = uri.password().map(decode).transpose()?;

        Ok(Self {
            scheme,
            host,
            port,
            username,
            password,
        })
    }
}

impl fmt::Display for BrokerCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = match self.scheme {
            Scheme::Tcp => "tcp",
            Scheme::Ssl => "ssl",
        };
        if self.host.contains(':') {
            write!(f, "{}://[{}]:{}", scheme, self.host, self.port)
        } else {
            write!(f, "{}://{}:{}", scheme, self.host, self.port)
        }
    }
}

// Credentials stay out of logs.
impl fmt::Debug for BrokerCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerCandidate")
            .field("url", &self.to_string())
            .field("username", &self.username)
            .finish()
    }
}

/// Splits a comma separated broker list, trimming each entry.
pub fn split_broker_urls(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
