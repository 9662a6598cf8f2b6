//! In-process sensor SDK simulator.
//!
//! [`SimulatedProvider`] hands out SDK clients whose behaviour is driven by a
//! [`SimulatedController`]: push lifecycle events, discovered devices and
//! sample batches, and inspect which SDK calls were made. Used by the bridge
//! tests and the `simulated_session` demo; no Bluetooth hardware involved.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::channel::mpsc::{unbounded, UnboundedSender};
use futures::stream::StreamExt;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::debug;

use super::{
    AdapterState, DeviceInfo, HrBatch, PpiBatch, SdkError, SdkEvent, SdkFeature, SdkProvider,
    SdkResult, SdkStream, SensorSdk, StreamError,
};

/// A call made against a simulated SDK client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SdkCall {
    /// Client constructed with these features.
    Create(Vec<SdkFeature>),
    /// Discovery started.
    SearchForDevice,
    /// Connect requested.
    ConnectToDevice(String),
    /// Disconnect requested.
    DisconnectFromDevice(String),
    /// Heart-rate stream opened.
    StartHrStreaming(String),
    /// Pulse-interval stream opened.
    StartPpiStreaming(String),
    /// Client shut down.
    ShutDown,
}

type Item<T> = std::result::Result<T, StreamError>;

/// State shared between the provider, its clients and the controller.
struct SimState {
    lifecycle_tx: broadcast::Sender<SdkEvent>,
    calls: Mutex<Vec<SdkCall>>,
    scan_tx: Mutex<Option<UnboundedSender<Item<DeviceInfo>>>>,
    hr_tx: Mutex<Option<UnboundedSender<Item<HrBatch>>>>,
    ppi_tx: Mutex<Option<UnboundedSender<Item<PpiBatch>>>>,
    adapter_state: Mutex<AdapterState>,
    create_failure: Mutex<Option<String>>,
    connect_failure: Mutex<Option<String>>,
    hr_open_failure: Mutex<Option<String>>,
    auto_connect: AtomicBool,
    enable_requests: AtomicUsize,
}

impl SimState {
    fn record(&self, call: SdkCall) {
        debug!("Simulated SDK call: {:?}", call);
        self.calls.lock().push(call);
    }

    fn emit(&self, event: SdkEvent) {
        let _ = self.lifecycle_tx.send(event);
    }
}

/// Provider for simulated SDK clients.
pub struct SimulatedProvider {
    state: Arc<SimState>,
}

impl SimulatedProvider {
    /// Create a provider and the controller that drives it.
    pub fn new() -> (Self, SimulatedController) {
        let (lifecycle_tx, _) = broadcast::channel(64);
        let state = Arc::new(SimState {
            lifecycle_tx,
            calls: Mutex::new(Vec::new()),
            scan_tx: Mutex::new(None),
            hr_tx: Mutex::new(None),
            ppi_tx: Mutex::new(None),
            adapter_state: Mutex::new(AdapterState::PoweredOn),
            create_failure: Mutex::new(None),
            connect_failure: Mutex::new(None),
            hr_open_failure: Mutex::new(None),
            auto_connect: AtomicBool::new(false),
            enable_requests: AtomicUsize::new(0),
        });

        (
            Self {
                state: state.clone(),
            },
            SimulatedController { state },
        )
    }
}

#[async_trait]
impl SdkProvider for SimulatedProvider {
    async fn create(&self, features: &[SdkFeature]) -> SdkResult<Arc<dyn SensorSdk>> {
        if let Some(message) = self.state.create_failure.lock().clone() {
            return Err(SdkError::Operation { message });
        }
        self.state.record(SdkCall::Create(features.to_vec()));
        Ok(Arc::new(SimulatedSdk {
            state: self.state.clone(),
            features: features.to_vec(),
        }))
    }

    async fn adapter_state(&self) -> SdkResult<AdapterState> {
        Ok(*self.state.adapter_state.lock())
    }

    async fn request_enable(&self) -> SdkResult<()> {
        self.state.enable_requests.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A simulated SDK client.
pub struct SimulatedSdk {
    state: Arc<SimState>,
    features: Vec<SdkFeature>,
}

#[async_trait]
impl SensorSdk for SimulatedSdk {
    fn subscribe_lifecycle(&self) -> broadcast::Receiver<SdkEvent> {
        self.state.lifecycle_tx.subscribe()
    }

    async fn search_for_device(&self) -> SdkResult<SdkStream<DeviceInfo>> {
        self.state.record(SdkCall::SearchForDevice);
        let (tx, rx) = unbounded();
        *self.state.scan_tx.lock() = Some(tx);
        Ok(rx.boxed())
    }

    async fn connect_to_device(&self, device_id: &str) -> SdkResult<()> {
        self.state
            .record(SdkCall::ConnectToDevice(device_id.to_string()));
        if let Some(message) = self.state.connect_failure.lock().clone() {
            return Err(SdkError::Operation { message });
        }

        if self.state.auto_connect.load(Ordering::SeqCst) {
            self.state
                .emit(SdkEvent::DeviceConnected(DeviceInfo::new(device_id)));
            for feature in &self.features {
                self.state.emit(SdkEvent::FeatureReady {
                    device_id: device_id.to_string(),
                    feature: *feature,
                });
            }
        }
        Ok(())
    }

    async fn disconnect_from_device(&self, device_id: &str) -> SdkResult<()> {
        self.state
            .record(SdkCall::DisconnectFromDevice(device_id.to_string()));
        if self.state.auto_connect.load(Ordering::SeqCst) {
            self.state
                .emit(SdkEvent::DeviceDisconnected(DeviceInfo::new(device_id)));
        }
        Ok(())
    }

    async fn start_hr_streaming(&self, device_id: &str) -> SdkResult<SdkStream<HrBatch>> {
        self.state
            .record(SdkCall::StartHrStreaming(device_id.to_string()));
        if let Some(message) = self.state.hr_open_failure.lock().clone() {
            return Err(SdkError::Operation { message });
        }
        let (tx, rx) = unbounded();
        *self.state.hr_tx.lock() = Some(tx);
        Ok(rx.boxed())
    }

    async fn start_ppi_streaming(&self, device_id: &str) -> SdkResult<SdkStream<PpiBatch>> {
        self.state
            .record(SdkCall::StartPpiStreaming(device_id.to_string()));
        let (tx, rx) = unbounded();
        *self.state.ppi_tx.lock() = Some(tx);
        Ok(rx.boxed())
    }

    async fn shut_down(&self) {
        self.state.record(SdkCall::ShutDown);
        // Dropping the senders ends every open stream.
        self.state.scan_tx.lock().take();
        self.state.hr_tx.lock().take();
        self.state.ppi_tx.lock().take();
    }
}

/// Drives simulated SDK clients.
#[derive(Clone)]
pub struct SimulatedController {
    state: Arc<SimState>,
}

impl SimulatedController {
    /// Emit connect/feature-ready callbacks automatically on connect requests,
    /// and disconnect callbacks on disconnect requests.
    pub fn set_auto_connect(&self, enabled: bool) {
        self.state.auto_connect.store(enabled, Ordering::SeqCst);
    }

    /// Make the next client construction fail.
    pub fn fail_create(&self, message: impl Into<String>) {
        *self.state.create_failure.lock() = Some(message.into());
    }

    /// Make connect requests fail.
    pub fn fail_connect(&self, message: impl Into<String>) {
        *self.state.connect_failure.lock() = Some(message.into());
    }

    /// Make opening the heart-rate stream fail.
    pub fn fail_hr_open(&self, message: impl Into<String>) {
        *self.state.hr_open_failure.lock() = Some(message.into());
    }

    /// Set the reported adapter state.
    pub fn set_adapter_state(&self, state: AdapterState) {
        *self.state.adapter_state.lock() = state;
    }

    /// Number of times the platform was asked to enable Bluetooth.
    pub fn enable_requests(&self) -> usize {
        self.state.enable_requests.load(Ordering::SeqCst)
    }

    /// All SDK calls so far, in order.
    pub fn calls(&self) -> Vec<SdkCall> {
        self.state.calls.lock().clone()
    }

    /// Count calls matching a predicate.
    pub fn count_calls(&self, predicate: impl Fn(&SdkCall) -> bool) -> usize {
        self.state.calls.lock().iter().filter(|c| predicate(c)).count()
    }

    /// Emit a power state callback.
    pub fn set_powered(&self, powered: bool) {
        self.state.emit(SdkEvent::PowerStateChanged { powered });
    }

    /// Emit a device-connected callback.
    pub fn connect_device(&self, device_id: &str) {
        self.state
            .emit(SdkEvent::DeviceConnected(DeviceInfo::new(device_id)));
    }

    /// Emit a device-disconnected callback.
    pub fn disconnect_device(&self, device_id: &str) {
        self.state
            .emit(SdkEvent::DeviceDisconnected(DeviceInfo::new(device_id)));
    }

    /// Emit a feature-ready callback.
    pub fn feature_ready(&self, device_id: &str, feature: SdkFeature) {
        self.state.emit(SdkEvent::FeatureReady {
            device_id: device_id.to_string(),
            feature,
        });
    }

    /// Deliver a discovered device to the open scan. Returns false when no
    /// scan is listening.
    pub fn discover(&self, device: DeviceInfo) -> bool {
        Self::push(&self.state.scan_tx, Ok(device))
    }

    /// Fail the open scan.
    pub fn fail_scan(&self, error: StreamError) -> bool {
        Self::push(&self.state.scan_tx, Err(error))
    }

    /// Deliver a heart-rate batch.
    pub fn push_hr(&self, batch: HrBatch) -> bool {
        Self::push(&self.state.hr_tx, Ok(batch))
    }

    /// Fail the open heart-rate stream.
    pub fn fail_hr(&self, error: StreamError) -> bool {
        Self::push(&self.state.hr_tx, Err(error))
    }

    /// Deliver a pulse-interval batch.
    pub fn push_ppi(&self, batch: PpiBatch) -> bool {
        Self::push(&self.state.ppi_tx, Ok(batch))
    }

    /// Fail the open pulse-interval stream.
    pub fn fail_ppi(&self, error: StreamError) -> bool {
        Self::push(&self.state.ppi_tx, Err(error))
    }

    fn push<T>(slot: &Mutex<Option<UnboundedSender<Item<T>>>>, item: Item<T>) -> bool {
        match slot.lock().as_ref() {
            Some(tx) => tx.unbounded_send(item).is_ok(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_calls() {
        let (provider, controller) = SimulatedProvider::new();
        let sdk = provider.create(&SdkFeature::ALL).await.unwrap();

        sdk.connect_to_device("A1").await.unwrap();
        let _hr = sdk.start_hr_streaming("A1").await.unwrap();
        sdk.shut_down().await;

        assert_eq!(
            controller.calls(),
            vec![
                SdkCall::Create(SdkFeature::ALL.to_vec()),
                SdkCall::ConnectToDevice("A1".to_string()),
                SdkCall::StartHrStreaming("A1".to_string()),
                SdkCall::ShutDown,
            ]
        );
    }

    #[tokio::test]
    async fn test_stream_delivery_and_shutdown() {
        let (provider, controller) = SimulatedProvider::new();
        let sdk = provider.create(&[]).await.unwrap();

        let mut stream = sdk.start_ppi_streaming("A1").await.unwrap();
        assert!(controller.push_ppi(PpiBatch::from_intervals(&[900])));

        let item = stream.next().await.unwrap().unwrap();
        assert_eq!(item.samples[0].ppi_ms, 900);

        sdk.shut_down().await;
        assert!(stream.next().await.is_none());
        assert!(!controller.push_ppi(PpiBatch::default()));
    }

    #[tokio::test]
    async fn test_auto_connect_emits_lifecycle() {
        let (provider, controller) = SimulatedProvider::new();
        controller.set_auto_connect(true);
        let sdk = provider.create(&[SdkFeature::OnlineStreaming]).await.unwrap();
        let mut rx = sdk.subscribe_lifecycle();

        sdk.connect_to_device("B2").await.unwrap();

        assert_eq!(
            rx.recv().await.unwrap(),
            SdkEvent::DeviceConnected(DeviceInfo::new("B2"))
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            SdkEvent::FeatureReady {
                device_id: "B2".to_string(),
                feature: SdkFeature::OnlineStreaming,
            }
        );
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let (provider, controller) = SimulatedProvider::new();
        controller.fail_create("radio exploded");
        assert!(provider.create(&[]).await.is_err());
        assert!(controller.calls().is_empty());
    }
}
