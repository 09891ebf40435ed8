//! The bridge between the bus and the device registry.

use async_trait::async_trait;
use chrono::Local;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, watch, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::animation::{self, AnimationOutcome, AnimationSettings, ANIMATION_PALETTE};
use super::error::{BridgeError, ConnectError};
use super::events::{BridgeEvent, ConnectionState, MQTTStatus};
use super::probe::{self, ProbeError, ProbeReport, ProbeSettings};
use crate::device::color::palette;
use crate::device::{Device, DeviceRegistry, DeviceSnapshot, RegistryError, Rgb};
use crate::mqtt::codec::{self, MessageKind};
use crate::mqtt::{MQTTMessage, MQTTServer, Transport, TransportListener};

const EVENT_CAPACITY: usize = 256;

/// Behaviour knobs the bridge reads but never changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeSettings {
    /// LED count given to devices discovered through an unknown topic
    pub default_led_count: usize,
    /// How long `connect` waits for the session to be set up once the broker
    /// has accepted it
    pub connect_timeout: Duration,
    pub probe_enabled: bool,
    pub probe: ProbeSettings,
    pub animation: AnimationSettings,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            default_led_count: 1,
            connect_timeout: Duration::from_secs(5),
            probe_enabled: true,
            probe: ProbeSettings::default(),
            animation: AnimationSettings::default(),
        }
    }
}

/// Slot for the running animation or probe. A new sequence cancels the old one.
#[derive(Default)]
struct SequenceSlot {
    generation: u64,
    token: Option<CancellationToken>,
}

/// Held for the whole lifetime of one sequence, cleanup included.
struct SequenceRun {
    generation: u64,
    cancel: CancellationToken,
    _running: OwnedMutexGuard<()>,
}

/// Owns the device registry and keeps it in sync with the bus.
///
/// Inbound traffic arrives through [`TransportListener`]; user commands come
/// through the async methods below. Both paths take the registry write lock, so
/// every device has exactly one writer at a time. The lock is never held across
/// a publish.
///
/// Observers follow state through [`BridgeController::subscribe`] and
/// [`BridgeController::connection_watch`] and read devices as
/// [`DeviceSnapshot`] copies.
pub struct BridgeController {
    me: Weak<Self>,
    transport: Arc<dyn Transport>,
    server: RwLock<MQTTServer>,
    registry: tokio::sync::RwLock<DeviceRegistry>,
    events: broadcast::Sender<BridgeEvent>,
    connection: watch::Sender<ConnectionState>,
    status: Mutex<MQTTStatus>,
    sequence: Mutex<SequenceSlot>,
    running: Arc<tokio::sync::Mutex<()>>,
    settings: BridgeSettings,
}

impl BridgeController {
    pub fn new(
        transport: Arc<dyn Transport>,
        server: MQTTServer,
        settings: BridgeSettings,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (connection, _) = watch::channel(ConnectionState::Disconnected);

        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            transport,
            server: RwLock::new(server),
            registry: tokio::sync::RwLock::new(DeviceRegistry::new()),
            events,
            connection,
            status: Mutex::new(MQTTStatus::default()),
            sequence: Mutex::new(SequenceSlot::default()),
            running: Arc::new(tokio::sync::Mutex::new(())),
            settings,
        })
    }

    pub fn settings(&self) -> &BridgeSettings {
        &self.settings
    }

    // ---- observation ----

    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.events.subscribe()
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.connection.borrow()
    }

    pub fn connection_watch(&self) -> watch::Receiver<ConnectionState> {
        self.connection.subscribe()
    }

    /// Traffic counters and the last status line.
    pub fn status(&self) -> MQTTStatus {
        self.lock_status().clone()
    }

    pub fn server(&self) -> MQTTServer {
        self.server
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub async fn devices(&self) -> Vec<DeviceSnapshot> {
        self.registry.read().await.iter().map(Device::snapshot).collect()
    }

    pub async fn device(&self, id: &str) -> Option<DeviceSnapshot> {
        self.registry.read().await.find_by_id(id).map(Device::snapshot)
    }

    pub async fn online_devices(&self) -> Vec<DeviceSnapshot> {
        self.registry
            .read()
            .await
            .online_devices()
            .map(Device::snapshot)
            .collect()
    }

    pub async fn selected_device(&self) -> Option<DeviceSnapshot> {
        let registry = self.registry.read().await;
        registry
            .selected()
            .and_then(|id| registry.find_by_id(id))
            .map(Device::snapshot)
    }

    pub async fn list_devices(&self) {
        self.registry.read().await.list_devices();
    }

    // ---- broker settings ----

    /// Changes the broker address. Only allowed while disconnected.
    pub fn set_broker_address(&self, address: impl Into<String>) -> Result<(), BridgeError> {
        let address = address.into();
        self.with_server(|server| server.address = address)
    }

    /// Changes the broker port. Only allowed while disconnected.
    pub fn set_broker_port(&self, port: u16) -> Result<(), BridgeError> {
        self.with_server(|server| server.port = port)
    }

    fn with_server(&self, f: impl FnOnce(&mut MQTTServer)) -> Result<(), BridgeError> {
        if self.connection_state() != ConnectionState::Disconnected {
            warn!("Refusing to change broker settings while connected");
            return Err(BridgeError::SettingsLocked);
        }
        let mut server = self.server.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut server);
        info!("Broker set to {}", server);
        Ok(())
    }

    // ---- connection ----

    /// Connects to the configured broker.
    ///
    /// Returns once the subscriptions are in place and the state is
    /// [`ConnectionState::Connected`]. The returned text, or the error's
    /// `Display`, is also broadcast as [`BridgeEvent::Status`].
    pub async fn connect(&self) -> Result<String, ConnectError> {
        let started = self.connection.send_if_modified(|state| {
            if *state == ConnectionState::Disconnected {
                *state = ConnectionState::Connecting;
                true
            } else {
                false
            }
        });
        if !started {
            warn!("Connect requested while {:?}", self.connection_state());
            return Err(ConnectError::AlreadyConnected);
        }
        self.lock_status().connection_state = ConnectionState::Connecting;
        self.emit(BridgeEvent::ConnectionChanged(ConnectionState::Connecting));

        let server = self.server();
        info!("Connecting to MQTT broker {}", server);
        self.transport.set_credentials(&server.user, &server.pw);
        let listener: Weak<dyn TransportListener> = self.me.clone();
        self.transport.set_listener(listener);

        let mut state = self.connection_watch();
        let connected = match self.transport.connect(&server.address, server.port).await {
            Ok(()) => self.await_session(&mut state).await,
            Err(e) => Err(ConnectError::from(e)),
        };

        match connected {
            Ok(()) => {
                let line = format!("Connected to MQTT broker {}", server.address);
                self.set_status_line(line.clone());
                Ok(line)
            }
            Err(error) => {
                error!("Failed to connect to {}: {}", server, error);
                if self.transport.is_connected() {
                    if let Err(e) = self.transport.disconnect().await {
                        warn!("Could not close half-open session: {}", e);
                    }
                }
                self.set_connection_state(ConnectionState::Disconnected);
                self.set_status_line(error.to_string());
                Err(error)
            }
        }
    }

    /// Waits for `on_connect`, which the transport may run on another task.
    async fn await_session(
        &self,
        state: &mut watch::Receiver<ConnectionState>,
    ) -> Result<(), ConnectError> {
        let settled = tokio::time::timeout(
            self.settings.connect_timeout,
            state.wait_for(|state| *state != ConnectionState::Connecting),
        )
        .await;

        match settled {
            Ok(Ok(state)) if *state == ConnectionState::Connected => Ok(()),
            Ok(_) => Err(ConnectError::Other(
                "connection closed during setup".to_string(),
            )),
            Err(_) => Err(ConnectError::Timeout),
        }
    }

    /// Stops any running sequence, then disconnects.
    pub async fn disconnect(&self) -> Result<(), BridgeError> {
        self.cancel_sequence();
        if self.connection_state() == ConnectionState::Disconnected {
            debug!("Disconnect requested while already disconnected");
            return Ok(());
        }
        self.set_status_line("Disconnecting from MQTT broker".to_string());
        self.transport.disconnect().await?;
        Ok(())
    }

    // ---- device commands ----

    /// Registers a device by hand. It starts offline with unset lights.
    pub async fn add_device(&self, id: &str, led_count: usize) -> Result<(), BridgeError> {
        let mut registry = self.registry.write().await;
        self.register(&mut registry, Device::new(id, led_count))?;
        Ok(())
    }

    pub async fn select_device(&self, id: &str) -> Result<(), BridgeError> {
        self.registry
            .write()
            .await
            .select(id)
            .map_err(|_| BridgeError::UnknownDevice(id.to_string()))
    }

    /// Flips the online flag locally, as if a last-will message had arrived.
    pub async fn set_device_online(&self, id: &str, online: bool) -> Result<bool, BridgeError> {
        self.with_device_mut(id, |device| device.set_online(online))
            .await
    }

    /// Writes one light locally without sending it.
    pub async fn update_light(&self, id: &str, index: usize, color: Rgb) -> Result<bool, BridgeError> {
        let written = self
            .with_device_mut(id, |device| device.update_light(index, color))
            .await?;
        if written {
            self.emit(BridgeEvent::LightsChanged {
                device_id: id.to_string(),
            });
        }
        Ok(written)
    }

    pub async fn set_led_count(&self, id: &str, led_count: usize) -> Result<bool, BridgeError> {
        let changed = self
            .with_device_mut(id, |device| device.set_led_count(led_count))
            .await?;
        if changed {
            self.emit(BridgeEvent::LedCountChanged {
                device_id: id.to_string(),
                led_count,
            });
        }
        Ok(changed)
    }

    /// Paints every light the same color and sends the result.
    pub async fn set_all_lights(&self, id: &str, color: Rgb) -> Result<(), BridgeError> {
        self.with_device_mut(id, |device| device.fill(color)).await?;
        self.emit(BridgeEvent::LightsChanged {
            device_id: id.to_string(),
        });
        self.send_color(id).await
    }

    /// Publishes the device's full light state to its command topic.
    pub async fn send_color(&self, id: &str) -> Result<(), BridgeError> {
        let (payload, retain) = {
            let registry = self.registry.read().await;
            let device = registry
                .find_by_id(id)
                .ok_or_else(|| BridgeError::UnknownDevice(id.to_string()))?;
            (codec::encode_command(device)?, device.retain_on_publish())
        };
        self.publish_command(id, payload.into_bytes(), retain).await
    }

    /// Changes whether commands to this device are retained by the broker.
    ///
    /// Whatever the broker retained so far is cleared when connected.
    pub async fn set_retain_on_publish(&self, id: &str, retain: bool) -> Result<(), BridgeError> {
        self.with_device_mut(id, |device| device.set_retain_on_publish(retain))
            .await?;
        info!("Retain on publish for {} set to {}", id, retain);

        if self.connection_state() == ConnectionState::Connected {
            self.clear_retained_state(id).await?;
        } else {
            debug!("Not connected, leaving retained state of {} untouched", id);
        }
        Ok(())
    }

    /// Publishes an empty retained message to the device and broadcast command
    /// topics, which makes the broker forget the retained command.
    pub async fn clear_retained_state(&self, id: &str) -> Result<(), BridgeError> {
        if !self.registry.read().await.contains(id) {
            return Err(BridgeError::UnknownDevice(id.to_string()));
        }

        for topic in [codec::command_topic(id), codec::broadcast_command_topic()] {
            let message = MQTTMessage::from_topic(topic, Vec::new()).retained(true);
            self.transport
                .publish(&message.topic, Vec::new(), message.retain)
                .await?;
            debug!("Cleared retained state with {}", message);
        }
        Ok(())
    }

    // ---- sequences ----

    /// Plays the demonstration animation on one device.
    ///
    /// Supersedes any running sequence and is itself superseded by the next one,
    /// [`BridgeController::cancel_sequence`] or a disconnect.
    pub async fn run_animation(&self, id: &str) -> Result<AnimationOutcome, BridgeError> {
        let led_count = self
            .device(id)
            .await
            .ok_or_else(|| BridgeError::UnknownDevice(id.to_string()))?
            .led_count;

        let settings = &self.settings.animation;
        let frames = animation::animation_frames(
            led_count,
            &palette(&ANIMATION_PALETTE),
            settings.rotations,
            settings.step_delay(),
        );

        let run = self.begin_sequence().await;
        let outcome = animation::play(self, id, &frames, &run.cancel).await;
        self.end_sequence(run);
        outcome
    }

    /// Measures command-to-status round trips against one device.
    pub async fn run_performance_probe(
        self: &Arc<Self>,
        id: &str,
        cycles: usize,
    ) -> Result<ProbeReport, ProbeError> {
        if !self.settings.probe_enabled {
            return Err(ProbeError::Disabled);
        }

        let run = self.begin_sequence().await;
        let report = probe::run(
            Arc::clone(self),
            id,
            cycles,
            self.settings.probe.clone(),
            run.cancel.clone(),
        )
        .await;
        self.end_sequence(run);
        report
    }

    /// Cancels the running animation or probe, if any.
    pub fn cancel_sequence(&self) {
        if let Some(token) = self.lock_sequence().token.take() {
            info!("Cancelling running sequence");
            token.cancel();
        }
    }

    /// Cancels the running sequence and waits until it has finished its
    /// cleanup, so two sequences never touch the device at the same time.
    async fn begin_sequence(&self) -> SequenceRun {
        let cancel = CancellationToken::new();
        let generation = {
            let mut slot = self.lock_sequence();
            if let Some(previous) = slot.token.replace(cancel.clone()) {
                info!("Superseding running sequence");
                previous.cancel();
            }
            slot.generation = slot.generation.wrapping_add(1);
            slot.generation
        };

        let running = Arc::clone(&self.running).lock_owned().await;
        SequenceRun {
            generation,
            cancel,
            _running: running,
        }
    }

    fn end_sequence(&self, run: SequenceRun) {
        let mut slot = self.lock_sequence();
        if slot.generation == run.generation {
            slot.token = None;
        }
    }

    // ---- helpers shared with the sequences ----

    pub(crate) async fn publish_command(
        &self,
        id: &str,
        payload: Vec<u8>,
        retain: bool,
    ) -> Result<(), BridgeError> {
        let message = MQTTMessage::from_topic(codec::command_topic(id), payload).retained(retain);
        self.transport
            .publish(&message.topic, message.payload.clone(), message.retain)
            .await?;
        debug!("Sent {}", message);
        Ok(())
    }

    /// Sets one light, encodes the command and puts the light back to off, all
    /// under one write lock. The echoed status is then the only way the light
    /// can reach `color` again.
    pub(crate) async fn stage_probe_command(
        &self,
        id: &str,
        index: usize,
        color: Rgb,
    ) -> Result<(String, bool), BridgeError> {
        let staged = self
            .with_device_mut(id, |device| {
                device.update_light(index, color);
                let payload = codec::encode_command(device);
                device.update_light(index, Rgb::OFF);
                payload.map(|payload| (payload, device.retain_on_publish()))
            })
            .await?;
        Ok(staged?)
    }

    pub(crate) async fn light_matches(&self, id: &str, index: usize, color: Rgb) -> bool {
        self.registry
            .read()
            .await
            .find_by_id(id)
            .and_then(|device| device.light(index))
            == Some(color)
    }

    pub(crate) async fn apply_frame(&self, id: &str, lights: &[Rgb]) -> Result<(), BridgeError> {
        self.with_device_mut(id, |device| {
            for (index, color) in lights.iter().enumerate() {
                device.update_light(index, *color);
            }
        })
        .await?;
        self.emit(BridgeEvent::LightsChanged {
            device_id: id.to_string(),
        });
        Ok(())
    }

    async fn with_device_mut<R>(
        &self,
        id: &str,
        f: impl FnOnce(&mut Device) -> R,
    ) -> Result<R, BridgeError> {
        let mut registry = self.registry.write().await;
        let device = registry
            .find_by_id_mut(id)
            .ok_or_else(|| BridgeError::UnknownDevice(id.to_string()))?;
        Ok(f(device))
    }

    // ---- inbound ----

    fn register(&self, registry: &mut DeviceRegistry, mut device: Device) -> Result<(), RegistryError> {
        let events = self.events.clone();
        let device_id = device.id().to_string();
        device.set_online_change_event(Box::new(move |online| {
            let _ = events.send(BridgeEvent::OnlineChanged {
                device_id: device_id.clone(),
                online,
            });
        }));

        let device = registry.add_device(device)?;
        info!("Registered device {} with {} LEDs", device.id(), device.led_count());
        self.emit(BridgeEvent::DeviceAdded {
            device_id: device.id().to_string(),
        });
        Ok(())
    }

    fn apply_status(&self, registry: &mut DeviceRegistry, id: &str, payload: &[u8]) {
        let update = match codec::decode_status(payload) {
            Ok(update) => update,
            Err(e) => {
                warn!("Ignoring status from {}: {}", id, e);
                return;
            }
        };
        let Some(device) = registry.find_by_id_mut(id) else {
            return;
        };

        if device.set_led_count(update.led_count) {
            self.emit(BridgeEvent::LedCountChanged {
                device_id: id.to_string(),
                led_count: update.led_count,
            });
        }

        let mut written = false;
        for (index, color) in update.lights {
            written |= device.update_light(index, color);
        }
        if written {
            self.emit(BridgeEvent::LightsChanged {
                device_id: id.to_string(),
            });
        }
    }

    fn apply_last_will(&self, registry: &mut DeviceRegistry, id: &str, payload: &[u8]) {
        match codec::decode_last_will(payload) {
            Ok(state) => {
                if let Some(device) = registry.find_by_id_mut(id) {
                    if device.set_online(state.is_online()) {
                        info!("Device {} is now {}", id, device.online_label());
                    }
                }
            }
            Err(e) => warn!("Ignoring last will from {}: {}", id, e),
        }
    }

    // ---- bookkeeping ----

    fn emit(&self, event: BridgeEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }

    fn set_connection_state(&self, state: ConnectionState) {
        let previous = self.connection.send_replace(state);
        self.lock_status().connection_state = state;
        if previous != state {
            debug!("Connection state {:?} -> {:?}", previous, state);
            self.emit(BridgeEvent::ConnectionChanged(state));
        }
    }

    fn set_status_line(&self, line: String) {
        info!("{}", line);
        self.lock_status().status_line = line.clone();
        self.emit(BridgeEvent::Status(line));
    }

    fn lock_status(&self) -> MutexGuard<'_, MQTTStatus> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_sequence(&self) -> MutexGuard<'_, SequenceSlot> {
        self.sequence.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl TransportListener for BridgeController {
    async fn on_connect(&self, code: u8) {
        info!("Connected with result code {}", code);

        for pattern in [
            codec::last_will_subscription(),
            codec::status_subscription(),
        ] {
            match self.transport.subscribe(&pattern).await {
                Ok(()) => info!("Subscribed to {}", pattern),
                Err(e) => error!("Failed to subscribe to {}: {}", pattern, e),
            }
        }

        self.set_connection_state(ConnectionState::Connected);
        self.lock_status().last_activity = Some(Local::now());
    }

    async fn on_message(&self, topic: String, payload: Vec<u8>) {
        let message = MQTTMessage::from_topic(topic, payload);
        debug!("Received {}", message);
        {
            let mut status = self.lock_status();
            status.messages_received += 1;
            status.last_activity = Some(Local::now());
        }

        let (device_id, kind) = match codec::parse_topic(&message.topic) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("Dropping message: {}", e);
                return;
            }
        };

        let mut registry = self.registry.write().await;
        if !registry.contains(&device_id) {
            let device = Device::new(device_id.as_str(), self.settings.default_led_count);
            if let Err(e) = self.register(&mut registry, device) {
                warn!("Could not register {}: {}", device_id, e);
                return;
            }
        }

        match kind {
            MessageKind::Status => self.apply_status(&mut registry, &device_id, &message.payload),
            MessageKind::LastWill => {
                self.apply_last_will(&mut registry, &device_id, &message.payload)
            }
            other => info!("Ignoring {:?} message from {}", other, device_id),
        }
    }

    async fn on_publish(&self, message_id: u16) {
        debug!("Message {} published", message_id);
        let mut status = self.lock_status();
        status.messages_sent += 1;
        status.last_activity = Some(Local::now());
    }

    async fn on_disconnect(&self, code: u8) {
        info!("Disconnected with result code {}", code);

        let went_offline = self.registry.write().await.mark_all_offline();
        debug!("{} devices went offline", went_offline);

        self.set_connection_state(ConnectionState::Disconnected);
        self.set_status_line("Disconnected from MQTT broker".to_string());
        self.cancel_sequence();
    }
}
