//! MQTT transport for the command adapter (rumqttc, MQTT v5, QoS 0).

use anyhow::{anyhow, Context, Result};
use rumqttc::v5::{mqttbytes::QoS, Client, Connection, Event, Incoming, MqttOptions};
use rumqttc::Transport;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use super::{CommandAdapter, Publisher};
use crate::config::BrokerSettings;

const REQUEST_CHANNEL_CAPACITY: usize = 10;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MqttEndpoint {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
}

const DEFAULT_PORT: u16 = 1883;
const DEFAULT_TLS_PORT: u16 = 8883;

/// Accepts `host`, `host:port`, `[v6]:port`, and `mqtt://`/`tcp://`/`mqtts://`/`ssl://` prefixes.
pub fn parse_mqtt_endpoint(addr: &str) -> Result<MqttEndpoint> {
    let mut use_tls = false;
    let mut remainder = addr.trim();

    if let Some((scheme, rest)) = remainder.split_once("://") {
        match scheme {
            "mqtt" | "tcp" => {}
            "mqtts" | "ssl" => use_tls = true,
            other => return Err(anyhow!("unsupported MQTT scheme: {}", other)),
        }
        remainder = rest;
    }

    let default_port = if use_tls { DEFAULT_TLS_PORT } else { DEFAULT_PORT };
    let (host, port) = split_host_port(remainder, default_port)?;
    if host.is_empty() {
        return Err(anyhow!("missing MQTT host in {}", addr));
    }
    Ok(MqttEndpoint {
        host,
        port,
        use_tls,
    })
}

fn split_host_port(addr: &str, default_port: u16) -> Result<(String, u16)> {
    if let Some(rest) = addr.strip_prefix('[') {
        let (host, rest) = rest
            .split_once(']')
            .ok_or_else(|| anyhow!("invalid MQTT address: {}", addr))?;
        let port = match rest.strip_prefix(':') {
            Some(port) => port.parse().context("invalid MQTT port")?,
            None if rest.is_empty() => default_port,
            None => return Err(anyhow!("invalid MQTT address: {}", addr)),
        };
        return Ok((host.to_string(), port));
    }

    match addr.rsplit_once(':') {
        Some((host, port)) => {
            let port: u16 = port.parse().context("invalid MQTT port")?;
            Ok((host.to_string(), port))
        }
        None => Ok((addr.to_string(), default_port)),
    }
}

/// Publishing half, handed to the adapter.
///
/// Uses the non-blocking client calls: the adapter publishes from inside
/// the event-loop thread, which is also the thread draining the request
/// channel.
pub struct MqttPublisher {
    client: Client,
    connected: Arc<AtomicBool>,
}

impl Publisher for MqttPublisher {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload)
            .with_context(|| format!("publish to {}", topic))
    }

    fn subscribe(&self, topic: &str) -> Result<()> {
        self.client
            .try_subscribe(topic, QoS::AtMostOnce)
            .with_context(|| format!("subscribe to {}", topic))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

/// Event-loop half, consumed by `MqttRuntime::spawn`.
pub struct MqttConnection {
    connection: Connection,
    client: Client,
    connected: Arc<AtomicBool>,
    settings: BrokerSettings,
}

/// Build client options and split into publisher and event loop. Nothing
/// touches the network until the runtime is spawned.
pub fn connect(settings: &BrokerSettings) -> Result<(Arc<MqttPublisher>, MqttConnection)> {
    let endpoint = parse_mqtt_endpoint(&settings.addr)
        .with_context(|| format!("invalid broker address {}", settings.addr))?;

    let mut options = MqttOptions::new(settings.client_id.clone(), &endpoint.host, endpoint.port);
    options.set_keep_alive(settings.keep_alive);
    options.set_clean_start(true);
    if endpoint.use_tls {
        options.set_transport(Transport::tls_with_default_config());
    } else {
        options.set_transport(Transport::tcp());
    }

    let (client, connection) = Client::new(options, REQUEST_CHANNEL_CAPACITY);
    let connected = Arc::new(AtomicBool::new(false));
    log::info!(
        "MQTT broker {}:{} (TLS: {}, client id: {})",
        endpoint.host,
        endpoint.port,
        endpoint.use_tls,
        settings.client_id
    );
    Ok((
        Arc::new(MqttPublisher {
            client: client.clone(),
            connected: Arc::clone(&connected),
        }),
        MqttConnection {
            connection,
            client,
            connected,
            settings: settings.clone(),
        },
    ))
}

/// Background thread driving the MQTT event loop into the adapter.
pub struct MqttRuntime {
    client: Client,
    stopping: Arc<AtomicBool>,
    connection_handle: Option<JoinHandle<()>>,
}

impl MqttRuntime {
    pub fn spawn(link: MqttConnection, adapter: Arc<CommandAdapter>) -> Result<Self> {
        let MqttConnection {
            mut connection,
            client,
            connected,
            settings,
        } = link;
        let stopping = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stopping);

        let handle = std::thread::Builder::new()
            .name("mqtt".to_string())
            .spawn(move || {
                for event in connection.iter() {
                    if stop_flag.load(Ordering::Acquire) {
                        break;
                    }
                    match event {
                        Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
                            connected.store(true, Ordering::Release);
                            adapter.on_connect(&format!("{:?}", ack.code));
                        }
                        Ok(Event::Incoming(Incoming::Publish(publish))) => {
                            let topic = String::from_utf8_lossy(&publish.topic).into_owned();
                            adapter.on_message(&topic, &publish.payload);
                        }
                        Ok(Event::Incoming(Incoming::Disconnect(disconnect))) => {
                            connected.store(false, Ordering::Release);
                            adapter.on_disconnect(&format!("{:?}", disconnect.reason_code));
                        }
                        Ok(Event::Incoming(_)) | Ok(Event::Outgoing(_)) => {}
                        Err(e) => {
                            if connected.swap(false, Ordering::AcqRel) {
                                adapter.on_disconnect(&e.to_string());
                            } else {
                                log::warn!("MQTT connection error: {}", e);
                            }
                            if stop_flag.load(Ordering::Acquire) {
                                break;
                            }
                            std::thread::sleep(settings.reconnect_delay);
                        }
                    }
                }
            })
            .context("spawn MQTT event loop")?;

        Ok(Self {
            client,
            stopping,
            connection_handle: Some(handle),
        })
    }

    pub fn shutdown(mut self) -> Result<()> {
        self.stopping.store(true, Ordering::Release);
        if let Err(err) = self.client.try_disconnect() {
            log::debug!("MQTT disconnect request failed: {}", err);
        }
        if let Some(handle) = self.connection_handle.take() {
            let _ = handle.join();
        }
        Ok(())
    }
}
