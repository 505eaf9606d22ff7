pub mod transport;

use crate::error::DeliveryError;
use crate::structures::{BrokerCandidate, Report};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS, TlsConfiguration, Transport};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time;
use tokio_rustls::rustls::ClientConfig;
use tracing::{debug, info, warn};
use transport::TransportSelector;

const WRITE_TIMEOUT: Duration = Duration::from_secs(10);
const KEEP_ALIVE: Duration = Duration::from_secs(30);
const DISCONNECT_GRACE: Duration = Duration::from_secs(1);
const REQUEST_CAP: usize = 10;
const MAX_PACKET_SIZE: usize = 1024 * 1024;

/// Where finished reports go.
#[derive(Clone)]
pub enum Reporter {
    /// Indented JSON on standard output.
    Stdout,
    Mqtt(Arc<MqttReporter>),
}

impl Reporter {
    pub async fn report(&self, report: &Report) -> Result<(), DeliveryError> {
        match self {
            Reporter::Stdout => {
                let body = serde_json::to_string_pretty(report)?;
                println!("{}", body);
                Ok(())
            }
            Reporter::Mqtt(r) => {
                let body = serde_json::to_vec(report)?;
                r.publish(body).await
            }
        }
    }
}

/// Publishes to the first broker candidate that accepts the message.
pub struct MqttReporter {
    client_id: String,
    topic: String,
    urls: Vec<String>,
    tls: Arc<ClientConfig>,
    selector: TransportSelector,
    candidates: Mutex<Vec<BrokerCandidate>>,
    // one session at a time, the broker drops a session when its client id reconnects
    session: Mutex<()>,
    write_timeout: Duration,
}

impl MqttReporter {
    /// Runs the transport pre-flight once; the surviving candidates are kept
    /// for the life of the reporter.
    pub async fn new(
        client_id: String,
        topic: String,
        urls: Vec<String>,
        tls: Arc<ClientConfig>,
        selector: TransportSelector,
    ) -> Self {
        let candidates = selector.select(&urls).await;
        if candidates.is_empty() {
            warn!("No usable broker among {} configured", urls.len());
        } else {
            info!("Usable brokers: {:?}", candidates);
        }

        Self {
            client_id,
            topic,
            urls,
            tls,
            selector,
            candidates: Mutex::new(candidates),
            session: Mutex::new(()),
            write_timeout: WRITE_TIMEOUT,
        }
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Probes the configured urls again only when every candidate was rejected.
    async fn candidates(&self) -> Vec<BrokerCandidate> {
        let mut candidates = self.candidates.lock().await;
        if candidates.is_empty() {
            info!("Probe brokers again");
            *candidates = self.selector.select(&self.urls).await;
        }
        candidates.clone()
    }

    /// Publishes are serialized; overlapping cycles wait for the running one.
    pub async fn publish(&self, body: Vec<u8>) -> Result<(), DeliveryError> {
        let _session = self.session.lock().await;
        let candidates = self.candidates().await;
        if candidates.is_empty() {
            return Err(DeliveryError::NoCandidates);
        }

        let mut errors = Vec::with_capacity(candidates.len());
        for broker in &candidates {
            let attempt = self.publish_to(broker, body.clone());
            let sent = time::timeout(self.write_timeout, attempt).await;
            let err = match sent {
                Ok(Ok(())) => {
                    info!("Send report to {} topic {} success", broker, self.topic);
                    return Ok(());
                }
                Ok(Err(e)) => e,
                Err(_) => DeliveryError::Timeout(self.write_timeout),
            };
            warn!("Send report to {} fail, err:{}", broker, err);
            errors.push(format!("{}: {}", broker, err));
        }

        Err(DeliveryError::Connect(errors.join("; ")))
    }

    fn options(&self, broker: &BrokerCandidate) -> MqttOptions {
        let mut opts =
            MqttOptions::new(self.client_id.clone(), broker.host.clone(), broker.port);
        opts.set_clean_session(true);
        opts.set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE);
        opts.set_keep_alive(KEEP_ALIVE);
        if let Some(user) = &broker.username {
            opts.set_credentials(user.clone(), broker.password.clone().unwrap_or_default());
        }
        if broker.scheme.is_encrypted() {
            opts.set_transport(Transport::Tls(TlsConfiguration::Rustls(self.tls.clone())));
        }
        opts
    }

    async fn publish_to(
        &self,
        broker: &BrokerCandidate,
        body: Vec<u8>,
    ) -> Result<(), DeliveryError> {
        let connect_err =
            |e: rumqttc::ConnectionError| DeliveryError::Connect(format!("{}: {}", broker, e));
        let publish_err = |reason: String| DeliveryError::Publish {
            broker: broker.to_string(),
            reason,
        };

        let (client, mut eventloop) = AsyncClient::new(self.options(broker), REQUEST_CAP);

        loop {
            match eventloop.poll().await.map_err(connect_err)? {
                Event::Incoming(Packet::ConnAck(_)) => break,
                other => debug!("Mqtt event {:?}", other),
            }
        }
        debug!("Connected to {} as {}", broker, self.client_id);

        client
            .publish(self.topic.as_str(), QoS::AtLeastOnce, false, body)
            .await
            .map_err(|e| publish_err(e.to_string()))?;

        loop {
            match eventloop.poll().await.map_err(|e| publish_err(e.to_string()))? {
                Event::Incoming(Packet::PubAck(_)) => break,
                other => debug!("Mqtt event {:?}", other),
            }
        }

        if client.disconnect().await.is_ok() {
            // flush the disconnect request, the broker closes on its side
            let _ = time::timeout(DISCONNECT_GRACE, eventloop.poll()).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::transport::{client_config, TlsProbe};
    use tokio::net::TcpListener;

    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    async fn reporter(urls: Vec<String>) -> MqttReporter {
        let tls = client_config(None, false).unwrap();
        let selector = TransportSelector::new(Arc::new(TlsProbe::new(tls.clone())));
        MqttReporter::new("probe-1".into(), "/metrics/mtr".into(), urls, tls, selector).await
    }

    #[tokio::test]
    async fn unreachable_broker_is_delivery_failure() {
        let port = closed_port().await;
        let r = reporter(vec![format!("tcp://127.0.0.1:{}", port)]).await;

        let err = r.publish(b"{}".to_vec()).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Connect(_)));
    }

    #[tokio::test]
    async fn no_candidates_left() {
        let r = reporter(vec!["bogus://x".into()]).await;
        let err = r.publish(b"{}".to_vec()).await.unwrap_err();
        assert!(matches!(err, DeliveryError::NoCandidates));
    }

    #[tokio::test]
    async fn silent_broker_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((sock, _)) = listener.accept().await {
                held.push(sock);
            }
        });

        let r = reporter(vec![format!("tcp://127.0.0.1:{}", port)])
            .await
            .with_write_timeout(Duration::from_millis(200));
        let err = r.publish(b"{}".to_vec()).await.unwrap_err();

        match err {
            DeliveryError::Connect(msg) => assert!(msg.contains("timed out")),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn credentials_go_into_options() {
        let r = reporter(vec![]).await;
        let broker = BrokerCandidate::try_from("tcp://user:pw@broker.local:1884").unwrap();

        let opts = r.options(&broker);
        assert_eq!(opts.broker_address(), ("broker.local".to_string(), 1884));
        assert_eq!(opts.credentials(), Some(("user".to_string(), "pw".to_string())));
        assert!(opts.clean_session());
        assert_eq!(opts.client_id(), "probe-1");
        assert_eq!(opts.max_packet_size(), MAX_PACKET_SIZE);
    }
}
