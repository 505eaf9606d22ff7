use crate::conf::Settings;
use crate::detectors::{MtrDetector, SystemMtr};
use crate::error::{ConfigError, CycleError};
use crate::locator::{FreeGeoIp, Locator, Nominatim};
use crate::reporter::transport::{client_config, TlsProbe, TransportSelector};
use crate::reporter::{MqttReporter, Reporter};
use crate::structures::Report;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::task;
use tokio::time::{self, MissedTickBehavior};
use tracing::{error, info};

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);
const USER_AGENT: &str = concat!("push-mtr/", env!("CARGO_PKG_VERSION"));

/// Everything one report cycle needs, built once at startup.
#[derive(Clone)]
pub struct Probe {
    detector: MtrDetector,
    locator: Locator,
    reporter: Reporter,
    location_query: Option<String>,
}

impl Probe {
    pub fn new(
        detector: MtrDetector,
        locator: Locator,
        reporter: Reporter,
        location_query: Option<String>,
    ) -> Self {
        Self {
            detector,
            locator,
            reporter,
            location_query,
        }
    }

    pub async fn from_settings(s: &Settings) -> Result<Self, ConfigError> {
        let mtr = SystemMtr::locate()?;
        let detector = MtrDetector::new(Arc::new(mtr), s.host.clone(), s.count)
            .with_extra_args(s.mtr_args.clone());

        let http = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ConfigError::Invalid {
                name: "http client",
                reason: e.to_string(),
            })?;
        let locator = Locator::new(
            Arc::new(FreeGeoIp::new(http.clone(), s.geoip_url.clone())),
            Arc::new(Nominatim::new(http, s.nominatim_url.clone())),
        );

        // the CA file is checked even when printing to stdout
        let tls = client_config(s.cafile.as_deref(), s.insecure)?;
        let reporter = if s.stdout {
            Reporter::Stdout
        } else {
            let selector = TransportSelector::new(Arc::new(TlsProbe::new(tls.clone())));
            let mqtt = MqttReporter::new(
                s.client_id.clone(),
                s.topic.clone(),
                s.broker_urls.clone(),
                tls,
                selector,
            )
            .await;
            Reporter::Mqtt(Arc::new(mqtt))
        };

        Ok(Self::new(detector, locator, reporter, s.location.clone()))
    }

    /// One measurement, location and delivery. The mtr run and the location
    /// lookups proceed concurrently; delivery starts once both are done.
    pub async fn run_once(&self) -> Result<Report, CycleError> {
        let (report, location) = tokio::join!(
            self.detector.detect(),
            self.locator.resolve(self.location_query.as_deref()),
        );
        let report = report?.with_location(location?);

        self.reporter.report(&report).await?;
        Ok(report)
    }

    /// Starts a cycle every `period`. Slow cycles may overlap the next tick;
    /// failures are logged and the timer keeps going.
    pub async fn run_every(self, period: Duration) {
        let probe = Arc::new(self);
        let mut timer = time::interval_at(time::Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Send the report every {:?}", period);
        loop {
            timer.tick().await;
            let probe = probe.clone();
            task::spawn(async move {
                if let Err(e) = probe.run_once().await {
                    error!("Report cycle fail, err:{}", e);
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::MtrRunner;
    use crate::error::MeasureError;
    use crate::locator::{IpLocator, PlaceLocator};
    use crate::structures::Location;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Canned {
        text: &'static str,
        runs: AtomicU32,
    }

    #[async_trait]
    impl MtrRunner for Canned {
        async fn run(&self, _: &str, _: u32, _: &[String]) -> Result<String, MeasureError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(self.text.to_string())
        }
    }

    struct Here;

    #[async_trait]
    impl IpLocator for Here {
        async fn locate(&self) -> anyhow::Result<Location> {
            Ok(Location {
                ip: Some("198.51.100.7".into()),
                country_code: "FR".into(),
                country_name: "France".into(),
                city: Some("Paris".into()),
                latitude: 48.8,
                longitude: 2.3,
            })
        }
    }

    struct Nowhere;

    #[async_trait]
    impl PlaceLocator for Nowhere {
        async fn geocode(&self, _: &str) -> anyhow::Result<Location> {
            Err(anyhow::anyhow!("no result"))
        }
    }

    const ONE_HOP: &str = "  1.|-- 10.0.0.1   0.0%  3  1.0  1.0  1.0  1.0  0.0\n";

    fn probe(runner: Arc<Canned>, query: Option<&str>) -> Probe {
        Probe::new(
            MtrDetector::new(runner, "example.com".into(), 3),
            Locator::new(Arc::new(Here), Arc::new(Nowhere)),
            Reporter::Stdout,
            query.map(String::from),
        )
    }

    #[tokio::test]
    async fn cycle_joins_location_into_report() {
        let runner = Arc::new(Canned {
            text: ONE_HOP,
            runs: AtomicU32::new(0),
        });
        let report = probe(runner, None).run_once().await.unwrap();

        let loc = report.location.as_ref().unwrap();
        assert_eq!(loc.country_code, "fr");
        assert_eq!(report.hops(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_geocode_fails_the_cycle() {
        let runner = Arc::new(Canned {
            text: ONE_HOP,
            runs: AtomicU32::new(0),
        });
        let err = probe(runner, Some("Atlantis")).run_once().await.unwrap_err();
        assert!(matches!(err, CycleError::Resolve(_)));
    }

    #[tokio::test]
    async fn parse_failure_fails_the_cycle() {
        let runner = Arc::new(Canned {
            text: "  1.|-- 10.0.0.1   0.0%  x  1.0  1.0  1.0  1.0  0.0\n",
            runs: AtomicU32::new(0),
        });
        let err = probe(runner, None).run_once().await.unwrap_err();
        assert!(matches!(err, CycleError::Measure(_)));
        assert_eq!(err.exit_code(), exitcode::SOFTWARE);
    }

    #[tokio::test(start_paused = true)]
    async fn repeat_keeps_ticking() {
        let runner = Arc::new(Canned {
            text: ONE_HOP,
            runs: AtomicU32::new(0),
        });
        let p = probe(runner.clone(), None);
        let driver = task::spawn(p.run_every(Duration::from_secs(60)));

        time::sleep(Duration::from_secs(60 * 3 + 1)).await;
        driver.abort();

        assert_eq!(runner.runs.load(Ordering::SeqCst), 3);
    }
}
