use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Outgoing,
    Packet, QoS,
};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::MqttConfig;
use super::transport::{Transport, TransportError, TransportListener};

/// How long a requested disconnect may take before the loop is cancelled.
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

type ListenerSlot = Option<Weak<dyn TransportListener>>;

struct Session {
    client: AsyncClient,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// [`Transport`] backed by `rumqttc`.
///
/// Each successful `connect` creates a fresh client/event-loop pair; the event
/// loop runs in its own tokio task until the broker goes away, the client
/// disconnects, or the session is cancelled.
pub struct MqttHandler {
    config: MqttConfig,
    credentials: RwLock<(String, String)>,
    listener: RwLock<ListenerSlot>,
    client: RwLock<Option<AsyncClient>>,
    session: Mutex<Option<Session>>,
    connected: Arc<AtomicBool>,
}

impl MqttHandler {
    pub fn new(config: MqttConfig) -> Self {
        let credentials = (config.server.user.clone(), config.server.pw.clone());
        MqttHandler {
            config,
            credentials: RwLock::new(credentials),
            listener: RwLock::new(None),
            client: RwLock::new(None),
            session: Mutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    fn client(&self) -> Result<AsyncClient, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.client
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(TransportError::NotConnected)
    }

    fn mqtt_options(&self, address: &str, port: u16) -> MqttOptions {
        let (user, pw) = self
            .credentials
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let mut options = MqttOptions::new(self.config.client_id.clone(), address, port);
        options.set_keep_alive(self.config.keep_alive());
        if !user.is_empty() {
            options.set_credentials(user, pw);
        }
        options
    }
}

#[async_trait]
impl Transport for MqttHandler {
    fn set_credentials(&self, username: &str, password: &str) {
        *self.credentials.write().unwrap_or_else(PoisonError::into_inner) =
            (username.to_string(), password.to_string());
    }

    fn set_listener(&self, listener: Weak<dyn TransportListener>) {
        *self.listener.write().unwrap_or_else(PoisonError::into_inner) = Some(listener);
    }

    async fn connect(&self, address: &str, port: u16) -> Result<(), TransportError> {
        let mut session = self.session.lock().await;
        if let Some(existing) = session.as_ref() {
            if !existing.task.is_finished() {
                return Err(TransportError::Other("session already running".to_string()));
            }
        }

        info!("Connecting to MQTT broker {}:{}", address, port);
        let options = self.mqtt_options(address, port);
        let (client, mut eventloop) = AsyncClient::new(options, self.config.channel_capacity);

        let code = await_connack(&mut eventloop, self.config.connect_timeout()).await?;
        self.connected.store(true, Ordering::SeqCst);
        *self.client.write().unwrap_or_else(PoisonError::into_inner) = Some(client.clone());

        let cancel = CancellationToken::new();
        let listener = self
            .listener
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let task = tokio::spawn(run_event_loop(
            eventloop,
            listener,
            cancel.clone(),
            self.connected.clone(),
            code,
        ));

        *session = Some(Session {
            client,
            cancel,
            task,
        });
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let session = self.session.lock().await.take();
        *self.client.write().unwrap_or_else(PoisonError::into_inner) = None;

        let Some(mut session) = session else {
            return Err(TransportError::NotConnected);
        };

        if let Err(e) = session.client.disconnect().await {
            warn!("Failed to queue MQTT disconnect: {}", e);
        }

        if tokio::time::timeout(DISCONNECT_GRACE, &mut session.task)
            .await
            .is_err()
        {
            warn!(
                "MQTT event loop did not stop within {:?}, cancelling",
                DISCONNECT_GRACE
            );
            session.cancel.cancel();
            if let Err(e) = session.task.await {
                error!("MQTT event loop task failed: {}", e);
            }
        }
        Ok(())
    }

    async fn subscribe(&self, topic_pattern: &str) -> Result<(), TransportError> {
        let client = self.client()?;
        debug!("Subscribing to {}", topic_pattern);
        client
            .subscribe(topic_pattern, QoS::AtMostOnce)
            .await
            .map_err(|e| TransportError::Client(e.to_string()))
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        retain: bool,
    ) -> Result<(), TransportError> {
        let client = self.client()?;
        client
            .publish(topic, QoS::AtMostOnce, retain, payload)
            .await
            .map_err(|e| TransportError::Client(e.to_string()))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Drives the event loop until the broker acknowledges the connection.
async fn await_connack(eventloop: &mut EventLoop, timeout: Duration) -> Result<u8, TransportError> {
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        let event = tokio::time::timeout_at(deadline, eventloop.poll())
            .await
            .map_err(|_| TransportError::Timeout)?;

        match event {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                return match ack.code {
                    ConnectReturnCode::Success => Ok(0),
                    code => Err(TransportError::Refused(format!("{:?}", code))),
                };
            }
            Ok(other) => debug!("Event before CONNACK: {:?}", other),
            Err(e) => return Err(map_connection_error(e)),
        }
    }
}

fn map_connection_error(error: ConnectionError) -> TransportError {
    match error {
        ConnectionError::ConnectionRefused(code) => TransportError::Refused(format!("{:?}", code)),
        ConnectionError::NetworkTimeout | ConnectionError::FlushTimeout => TransportError::Timeout,
        ConnectionError::Io(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
            TransportError::Refused(e.to_string())
        }
        ConnectionError::Io(e) if e.kind() == io::ErrorKind::TimedOut => TransportError::Timeout,
        other => TransportError::Other(other.to_string()),
    }
}

fn upgrade(listener: &ListenerSlot) -> Option<Arc<dyn TransportListener>> {
    listener.as_ref().and_then(Weak::upgrade)
}

async fn run_event_loop(
    mut eventloop: EventLoop,
    listener: ListenerSlot,
    cancel: CancellationToken,
    connected: Arc<AtomicBool>,
    connack_code: u8,
) {
    info!("MQTT event loop started");
    if let Some(listener) = upgrade(&listener) {
        listener.on_connect(connack_code).await;
    }

    let code = loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("MQTT event loop cancelled");
                break 0;
            }
            event = eventloop.poll() => match event {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    if let Some(listener) = upgrade(&listener) {
                        listener
                            .on_message(publish.topic.clone(), publish.payload.to_vec())
                            .await;
                    }
                }
                Ok(Event::Outgoing(Outgoing::Publish(pkid))) => {
                    if let Some(listener) = upgrade(&listener) {
                        listener.on_publish(pkid).await;
                    }
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    info!("Disconnect sent to MQTT broker");
                    break 0;
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    warn!("MQTT broker closed the session");
                    break 1;
                }
                Ok(event) => debug!("MQTT event: {:?}", event),
                Err(e) => {
                    error!("MQTT event loop error: {}", e);
                    break 1;
                }
            }
        }
    };

    connected.store(false, Ordering::SeqCst);
    if let Some(listener) = upgrade(&listener) {
        listener.on_disconnect(code).await;
    }
    info!("MQTT event loop stopped with code {}", code);
}
