//! btleplug-backed sensor SDK.
//!
//! Talks to any sensor exposing the standard Heart Rate GATT service, which
//! includes the Polar H-series straps and Verity Sense. Heart-rate batches come
//! from Heart Rate Measurement notifications; pulse-interval batches are the
//! RR intervals carried in the same notifications.

use std::sync::Arc;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CentralState, Manager as _, Peripheral as _, ScanFilter,
    ValueNotification,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::measurement::HeartRateMeasurement;
use super::uuids::{
    is_heart_rate_device, BATTERY_LEVEL_UUID, DEVICE_INFO_SERVICE_UUID, HEART_RATE_MEASUREMENT_UUID,
};
use super::{
    AdapterState, DeviceInfo, HrBatch, HrSample, PpiBatch, PpiSample, SdkError, SdkEvent,
    SdkFeature, SdkProvider, SdkResult, SdkStream, SensorSdk, StreamError,
};
use crate::error::{Error, Result};

/// Provider of GATT SDK clients bound to one Bluetooth adapter.
pub struct GattProvider {
    adapter: Option<Adapter>,
}

impl GattProvider {
    /// Create a provider using the first available adapter.
    ///
    /// A missing adapter is not an error here; it is reported by
    /// `adapter_state()` and by `create()`.
    ///
    /// # Errors
    ///
    /// Returns an error if the Bluetooth manager cannot be started.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|_| Error::BluetoothUnavailable)?;

        let adapter = manager
            .adapters()
            .await
            .map_err(Error::Bluetooth)?
            .into_iter()
            .next();

        match &adapter {
            Some(adapter) => info!(
                "Using Bluetooth adapter: {:?}",
                adapter.adapter_info().await.ok()
            ),
            None => warn!("No Bluetooth adapter found"),
        }

        Ok(Self { adapter })
    }

    /// Create a provider with a specific adapter.
    pub fn with_adapter(adapter: Adapter) -> Self {
        Self {
            adapter: Some(adapter),
        }
    }
}

#[async_trait]
impl SdkProvider for GattProvider {
    async fn create(&self, features: &[SdkFeature]) -> SdkResult<Arc<dyn SensorSdk>> {
        let adapter = self.adapter.clone().ok_or(SdkError::Unavailable)?;
        let sdk = GattSdk::start(adapter, features.to_vec()).await?;
        Ok(Arc::new(sdk))
    }

    async fn adapter_state(&self) -> SdkResult<AdapterState> {
        let Some(adapter) = &self.adapter else {
            return Ok(AdapterState::Unavailable);
        };
        let state = adapter.adapter_state().await?;
        Ok(match state {
            CentralState::PoweredOff => AdapterState::PoweredOff,
            // Unknown is treated as powered.
            _ => AdapterState::PoweredOn,
        })
    }
}

/// Update fanned out to every open measurement stream.
#[derive(Debug, Clone)]
enum LinkUpdate {
    Measurement(HeartRateMeasurement),
    /// The link dropped; open streams end with this reason.
    Lost(String),
}

/// Sensor SDK client over btleplug.
pub struct GattSdk {
    adapter: Adapter,
    features: Vec<SdkFeature>,
    lifecycle_tx: broadcast::Sender<SdkEvent>,
    measurement_tx: broadcast::Sender<LinkUpdate>,
    /// Peripheral with an established link, if any.
    connected: Arc<RwLock<Option<Peripheral>>>,
    central_task: Mutex<Option<JoinHandle<()>>>,
    link_task: Mutex<Option<JoinHandle<()>>>,
}

impl GattSdk {
    /// Create a client and start watching adapter events.
    pub async fn start(adapter: Adapter, features: Vec<SdkFeature>) -> SdkResult<Self> {
        let (lifecycle_tx, _) = broadcast::channel(64);
        let (measurement_tx, _) = broadcast::channel(256);
        let connected = Arc::new(RwLock::new(None));

        let mut events = adapter.events().await?;
        let central_lifecycle_tx = lifecycle_tx.clone();
        let central_measurement_tx = measurement_tx.clone();
        let central_connected = connected.clone();

        let central_task = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                match event {
                    CentralEvent::StateUpdate(state) => {
                        let powered = matches!(state, CentralState::PoweredOn);
                        debug!("Adapter state changed: {:?}", state);
                        let _ = central_lifecycle_tx.send(SdkEvent::PowerStateChanged { powered });
                    }
                    CentralEvent::DeviceDisconnected(id) => {
                        if link_lost(
                            &central_connected,
                            &id,
                            &central_lifecycle_tx,
                            &central_measurement_tx,
                        ) {
                            info!("Sensor disconnected: {}", id);
                        }
                    }
                    _ => {}
                }
            }
            debug!("Adapter event loop ended");
        });

        Ok(Self {
            adapter,
            features,
            lifecycle_tx,
            measurement_tx,
            connected,
            central_task: Mutex::new(Some(central_task)),
            link_task: Mutex::new(None),
        })
    }

    /// Find a known peripheral by id, ignoring case.
    async fn find_peripheral(&self, device_id: &str) -> SdkResult<Peripheral> {
        self.adapter
            .peripherals()
            .await?
            .into_iter()
            .find(|p| p.id().to_string().eq_ignore_ascii_case(device_id))
            .ok_or_else(|| SdkError::InvalidArgument(format!("Unknown device {}", device_id)))
    }

    /// Check that `device_id` is the connected peripheral.
    fn require_connected(&self, device_id: &str) -> SdkResult<Peripheral> {
        self.connected
            .read()
            .as_ref()
            .filter(|p| p.id().to_string().eq_ignore_ascii_case(device_id))
            .cloned()
            .ok_or_else(|| SdkError::InvalidArgument(format!("Device {} not connected", device_id)))
    }
}

#[async_trait]
impl SensorSdk for GattSdk {
    fn subscribe_lifecycle(&self) -> broadcast::Receiver<SdkEvent> {
        self.lifecycle_tx.subscribe()
    }

    async fn search_for_device(&self) -> SdkResult<SdkStream<DeviceInfo>> {
        let events = self.adapter.events().await?;
        self.adapter.start_scan(ScanFilter::default()).await?;
        info!("Scanning for heart rate sensors");

        let guard = ScanGuard {
            adapter: self.adapter.clone(),
        };

        let found = stream::unfold((events, guard), |(mut events, guard)| async move {
            loop {
                let Some(event) = events.next().await else {
                    return None;
                };
                if let CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) = event {
                    if let Some(info) = heart_rate_device_info(&guard.adapter, &id).await {
                        debug!("Found heart rate sensor {} ({:?})", info.device_id, info.name);
                        return Some((Ok::<_, StreamError>(info), (events, guard)));
                    }
                }
            }
        });

        Ok(found.boxed())
    }

    async fn connect_to_device(&self, device_id: &str) -> SdkResult<()> {
        let peripheral = self.find_peripheral(device_id).await?;
        let features = self.features.clone();
        let lifecycle_tx = self.lifecycle_tx.clone();
        let measurement_tx = self.measurement_tx.clone();
        let connected = self.connected.clone();

        info!("Connecting to sensor {}", device_id);

        let handle = tokio::spawn(async move {
            let id = peripheral.id();
            match establish_link(&peripheral, &features, &lifecycle_tx, &connected).await {
                Ok(notifications) => {
                    pump_notifications(notifications, &id, &measurement_tx).await;
                    if link_lost(&connected, &id, &lifecycle_tx, &measurement_tx) {
                        info!("Link to {} closed", id);
                    }
                }
                Err(e) => {
                    warn!("Link to {} failed: {}", id, e);
                    // Report the failed attempt even if it never connected
                    if !link_lost(&connected, &id, &lifecycle_tx, &measurement_tx) {
                        let _ = lifecycle_tx
                            .send(SdkEvent::DeviceDisconnected(DeviceInfo::new(id.to_string())));
                    }
                }
            }
        });

        if let Some(previous) = self.link_task.lock().replace(handle) {
            previous.abort();
        }

        Ok(())
    }

    async fn disconnect_from_device(&self, device_id: &str) -> SdkResult<()> {
        let peripheral = self.require_connected(device_id)?;
        peripheral.disconnect().await?;

        // Not every platform reports a central event for a local disconnect.
        link_lost(
            &self.connected,
            &peripheral.id(),
            &self.lifecycle_tx,
            &self.measurement_tx,
        );
        Ok(())
    }

    async fn start_hr_streaming(&self, device_id: &str) -> SdkResult<SdkStream<HrBatch>> {
        self.require_connected(device_id)?;
        Ok(hr_batches(self.measurement_tx.subscribe()))
    }

    async fn start_ppi_streaming(&self, device_id: &str) -> SdkResult<SdkStream<PpiBatch>> {
        self.require_connected(device_id)?;
        Ok(ppi_batches(self.measurement_tx.subscribe()))
    }

    async fn shut_down(&self) {
        info!("Shutting down GATT SDK");

        let tasks = [self.link_task.lock().take(), self.central_task.lock().take()];
        for handle in tasks.into_iter().flatten() {
            handle.abort();
        }

        if let Err(e) = self.adapter.stop_scan().await {
            debug!("Stop scan during shutdown: {}", e);
        }

        let peripheral = self.connected.write().take();
        if let Some(peripheral) = peripheral {
            if let Err(e) = peripheral.disconnect().await {
                warn!("Error disconnecting {}: {}", peripheral.id(), e);
            }
        }
    }
}

impl Drop for GattSdk {
    fn drop(&mut self) {
        if let Some(handle) = self.link_task.lock().take() {
            handle.abort();
        }
        if let Some(handle) = self.central_task.lock().take() {
            handle.abort();
        }
    }
}

/// Stops the adapter scan when a discovery stream is dropped.
struct ScanGuard {
    adapter: Adapter,
}

impl Drop for ScanGuard {
    fn drop(&mut self) {
        let adapter = self.adapter.clone();
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                if let Err(e) = adapter.stop_scan().await {
                    debug!("Failed to stop scan: {}", e);
                }
            });
        }
    }
}

/// Connect and subscribe to measurements.
///
/// On success the peripheral is recorded as connected and the connect and
/// feature-ready callbacks have been sent.
async fn establish_link(
    peripheral: &Peripheral,
    features: &[SdkFeature],
    lifecycle_tx: &broadcast::Sender<SdkEvent>,
    connected: &RwLock<Option<Peripheral>>,
) -> SdkResult<BoxStream<'static, ValueNotification>> {
    if !peripheral.is_connected().await.unwrap_or(false) {
        peripheral.connect().await?;
    }
    peripheral.discover_services().await?;

    let characteristics = peripheral.characteristics();
    let measurement = characteristics
        .iter()
        .find(|c| c.uuid == HEART_RATE_MEASUREMENT_UUID)
        .cloned()
        .ok_or_else(|| SdkError::Operation {
            message: "Heart rate measurement characteristic not found".to_string(),
        })?;

    peripheral.subscribe(&measurement).await?;
    let notifications = peripheral.notifications().await?;

    let info = peripheral_info(peripheral).await;
    *connected.write() = Some(peripheral.clone());
    info!("Connected to sensor {} ({:?})", info.device_id, info.name);
    let _ = lifecycle_tx.send(SdkEvent::DeviceConnected(info.clone()));

    let has_battery = characteristics.iter().any(|c| c.uuid == BATTERY_LEVEL_UUID);
    let has_device_info = peripheral
        .services()
        .iter()
        .any(|s| s.uuid == DEVICE_INFO_SERVICE_UUID);

    for feature in features {
        let ready = match feature {
            SdkFeature::OnlineStreaming => true,
            SdkFeature::BatteryInfo => has_battery,
            SdkFeature::DeviceInfo => has_device_info,
        };
        if ready {
            let _ = lifecycle_tx.send(SdkEvent::FeatureReady {
                device_id: info.device_id.clone(),
                feature: *feature,
            });
        }
    }

    Ok(notifications)
}

/// Parse measurement notifications until the notification stream ends.
async fn pump_notifications(
    mut notifications: BoxStream<'static, ValueNotification>,
    id: &PeripheralId,
    measurement_tx: &broadcast::Sender<LinkUpdate>,
) {
    while let Some(notification) = notifications.next().await {
        if notification.uuid != HEART_RATE_MEASUREMENT_UUID {
            continue;
        }
        match HeartRateMeasurement::parse(&notification.value) {
            Ok(m) => {
                trace!("HR {} bpm, RR {:?}", m.bpm, m.rr_intervals_ms);
                if m.contact_lost() {
                    debug!("Sensor contact lost on {}", id);
                }
                let _ = measurement_tx.send(LinkUpdate::Measurement(m));
            }
            Err(e) => debug!("Dropping malformed measurement: {}", e),
        }
    }

    debug!("Notification stream for {} ended", id);
}

/// Report a dropped link: clear the connected peripheral, send the
/// disconnect callback and end every open measurement stream.
///
/// Does nothing and returns false unless `id` is the connected peripheral.
fn link_lost(
    connected: &RwLock<Option<Peripheral>>,
    id: &PeripheralId,
    lifecycle_tx: &broadcast::Sender<SdkEvent>,
    measurement_tx: &broadcast::Sender<LinkUpdate>,
) -> bool {
    if !take_if_connected(connected, id) {
        return false;
    }
    let _ = lifecycle_tx.send(SdkEvent::DeviceDisconnected(DeviceInfo::new(id.to_string())));
    let _ = measurement_tx.send(LinkUpdate::Lost(format!("Connection to {} lost", id)));
    true
}

/// Heart-rate batches, one per measurement.
fn hr_batches(rx: broadcast::Receiver<LinkUpdate>) -> SdkStream<HrBatch> {
    stream::unfold(Some(rx), |rx| async move {
        let Some(mut rx) = rx else {
            return None;
        };
        let Some(update) = next_update(&mut rx).await else {
            return None;
        };
        match update {
            Ok(m) => {
                let sample = HrSample::with_rr(m.bpm, m.rr_intervals_ms);
                Some((Ok(HrBatch { samples: vec![sample] }), Some(rx)))
            }
            Err(e) => Some((Err(e), None)),
        }
    })
    .boxed()
}

/// Pulse-interval batches from the RR intervals of each measurement.
/// Measurements without intervals are skipped.
fn ppi_batches(rx: broadcast::Receiver<LinkUpdate>) -> SdkStream<PpiBatch> {
    stream::unfold(Some(rx), |rx| async move {
        let Some(mut rx) = rx else {
            return None;
        };
        loop {
            let Some(update) = next_update(&mut rx).await else {
                return None;
            };
            let measurement = match update {
                Ok(m) => m,
                Err(e) => return Some((Err(e), None)),
            };
            if measurement.rr_intervals_ms.is_empty() {
                continue;
            }
            let samples = measurement
                .rr_intervals_ms
                .iter()
                .map(|&ppi_ms| PpiSample { ppi_ms })
                .collect();
            return Some((Ok(PpiBatch { samples }), Some(rx)));
        }
    })
    .boxed()
}

/// Receive the next measurement, skipping over lag. A lost link becomes an
/// error; a closed channel ends the stream.
async fn next_update(
    rx: &mut broadcast::Receiver<LinkUpdate>,
) -> Option<std::result::Result<HeartRateMeasurement, StreamError>> {
    loop {
        match rx.recv().await {
            Ok(LinkUpdate::Measurement(m)) => return Some(Ok(m)),
            Ok(LinkUpdate::Lost(reason)) => return Some(Err(StreamError::new(reason))),
            Err(RecvError::Lagged(n)) => warn!("Measurement stream lagged, skipped {} samples", n),
            Err(RecvError::Closed) => return None,
        }
    }
}

/// Clear the connected peripheral if it has the given id.
fn take_if_connected(connected: &RwLock<Option<Peripheral>>, id: &PeripheralId) -> bool {
    let mut connected = connected.write();
    if connected.as_ref().map(|p| p.id() == *id).unwrap_or(false) {
        connected.take();
        true
    } else {
        false
    }
}

async fn peripheral_info(peripheral: &Peripheral) -> DeviceInfo {
    let properties = peripheral.properties().await.ok().flatten();
    DeviceInfo {
        device_id: peripheral.id().to_string(),
        name: properties.as_ref().and_then(|p| p.local_name.clone()),
        rssi: properties.as_ref().and_then(|p| p.rssi),
    }
}

/// Describe a peripheral if it looks like a heart-rate sensor.
async fn heart_rate_device_info(adapter: &Adapter, id: &PeripheralId) -> Option<DeviceInfo> {
    let peripheral = adapter.peripheral(id).await.ok()?;
    let properties = peripheral.properties().await.ok().flatten()?;

    if !is_heart_rate_device(&properties.services, properties.local_name.as_deref()) {
        trace!("Ignoring non heart rate device {}", id);
        return None;
    }

    Some(DeviceInfo {
        device_id: id.to_string(),
        name: properties.local_name,
        rssi: properties.rssi,
    })
}
