use crate::error::ConfigError;
use crate::structures::split_broker_urls;
use crate::util::host_name;
use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

const DEFAULT_COUNT: u32 = 10;
const DEFAULT_TOPIC: &str = "/metrics/mtr";

/// Runs mtr against a host and pushes the report to an MQTT broker.
#[derive(Parser, Debug, Default)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// Target host
    pub host: Option<String>,

    /// Report cycles (mtr -c)
    #[clap(long)]
    pub count: Option<u32>,

    /// Send the report every X seconds, 0 runs once
    #[clap(long)]
    pub repeat: Option<u64>,

    /// MQTT topic
    #[clap(long)]
    pub topic: Option<String>,

    /// Comma separated MQTT broker urls
    #[clap(long, env = "MQTT_URLS")]
    pub broker_urls: Option<String>,

    /// CA certificate when using TLS
    #[clap(long)]
    pub cafile: Option<PathBuf>,

    /// Don't verify the server's certificate chain and host name
    #[clap(long)]
    pub insecure: bool,

    /// Custom MQTT client id, defaults to the host name
    #[clap(long)]
    pub clientid: Option<String>,

    /// Geocode this place name instead of using the ip location
    #[clap(long)]
    pub location: Option<String>,

    /// Print the report to stdout instead of publishing it
    #[clap(long)]
    pub stdout: bool,

    /// Extra argument passed through to mtr, repeatable
    #[clap(long = "mtr-arg", allow_hyphen_values = true)]
    pub mtr_args: Vec<String>,

    /// Print debugging messages
    #[clap(long)]
    pub debug: bool,

    /// Optional TOML file with the same keys, flags take precedence
    #[clap(short, long)]
    pub conf: Option<PathBuf>,
}

/// Keys accepted in the TOML file.
#[derive(Deserialize, Debug, Default)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct FileConf {
    pub host: Option<String>,
    pub count: Option<u32>,
    pub repeat: Option<u64>,
    pub topic: Option<String>,
    pub broker_urls: Vec<String>,
    pub cafile: Option<PathBuf>,
    pub insecure: bool,
    pub clientid: Option<String>,
    pub location: Option<String>,
    pub stdout: bool,
    pub mtr_args: Vec<String>,
    pub geoip_url: Option<String>,
    pub nominatim_url: Option<String>,
}

/// Validated settings, built once at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub host: String,
    pub count: u32,
    pub repeat: Option<Duration>,
    pub topic: String,
    pub broker_urls: Vec<String>,
    pub cafile: Option<PathBuf>,
    pub insecure: bool,
    pub client_id: String,
    pub location: Option<String>,
    pub stdout: bool,
    pub mtr_args: Vec<String>,
    pub geoip_url: Option<String>,
    pub nominatim_url: Option<String>,
}

impl Settings {
    pub fn merge(args: Args, file: FileConf) -> Result<Self, ConfigError> {
        let host = args
            .host
            .or(file.host)
            .filter(|h| !h.trim().is_empty())
            .ok_or(ConfigError::Invalid {
                name: "host",
                reason: "target host is required".into(),
            })?;

        let count = args.count.or(file.count).unwrap_or(DEFAULT_COUNT);
        if count == 0 {
            return Err(ConfigError::Invalid {
                name: "count",
                reason: "must be at least 1".into(),
            });
        }

        let repeat = args
            .repeat
            .or(file.repeat)
            .filter(|s| *s > 0)
            .map(Duration::from_secs);

        let broker_urls = match args.broker_urls {
            Some(raw) => split_broker_urls(&raw),
            None => file
                .broker_urls
                .iter()
                .flat_map(|raw| split_broker_urls(raw))
                .collect(),
        };
        let stdout = args.stdout || file.stdout;
        if broker_urls.is_empty() && !stdout {
            return Err(ConfigError::NoBrokers);
        }

        let client_id = match args.clientid.or(file.clientid) {
            Some(id) => id,
            None => host_name().ok_or(ConfigError::ClientId)?,
        };
        if client_id.is_empty() || client_id.starts_with(' ') {
            return Err(ConfigError::Invalid {
                name: "clientid",
                reason: format!("{:?} is not a usable client id", client_id),
            });
        }

        let mtr_args = if args.mtr_args.is_empty() {
            file.mtr_args
        } else {
            args.mtr_args
        };

        Ok(Self {
            host,
            count,
            repeat,
            topic: args
                .topic
                .or(file.topic)
                .unwrap_or_else(|| DEFAULT_TOPIC.to_string()),
            broker_urls,
            cafile: args.cafile.or(file.cafile),
            insecure: args.insecure || file.insecure,
            client_id,
            location: args.location.or(file.location).filter(|l| !l.trim().is_empty()),
            stdout,
            mtr_args,
            geoip_url: file.geoip_url,
            nominatim_url: file.nominatim_url,
        })
    }
}

pub async fn read_file_conf(path: &Path) -> Result<FileConf> {
    use tokio::fs;

    info!("read conf from {}", path.display());
    let conf = fs::read_to_string(path)
        .await
        .with_context(|| format!("error reading {}", path.display()))?;
    let conf = toml::from_str::<FileConf>(&conf)
        .with_context(|| format!("error parsing {}", path.display()))?;

    Ok(conf)
}

/// Merges flags, environment and the optional TOML file.
pub async fn read_conf(args: Args) -> Result<Settings> {
    let file = match &args.conf {
        Some(path) => read_file_conf(path).await?,
        None => FileConf::default(),
    };
    let settings = Settings::merge(args, file)?;
    debug!("MQTT Client ID: {}", settings.client_id);

    Ok(settings)
}
