//! Device streaming bridge.
//!
//! [`DeviceBridge`] owns one sensor SDK client per initialized session and
//! turns its callbacks and streams into [`BridgeEvent`]s for the host.
//!
//! Every SDK callback and stream item is queued to a single dispatch task.
//! Only that task mutates bridge state and publishes events, and it drops
//! any item whose stream has been disposed or superseded since the item was
//! produced.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::config::BridgeConfig;
use crate::data::{DeviceStore, IntervalRecording, MemoryDeviceStore};
use crate::error::{Error, Result};
use crate::events::{BridgeEvent, StampedInterval};
use crate::sdk::{
    AdapterState, DeviceInfo, HrBatch, PpiBatch, SdkEvent, SdkFeature, SdkProvider, SdkStream,
    SensorSdk, StreamError,
};
use crate::subscription::{CallbackHandle, StreamKind, StreamRegistry, StreamToken};
use crate::utils::{format_clock_time, normalize_device_id, Clock, SystemClock};

/// Work queued to the dispatch task.
#[derive(Debug)]
enum Dispatch {
    Lifecycle(SdkEvent),
    Found {
        token: StreamToken,
        device: DeviceInfo,
    },
    Hr {
        token: StreamToken,
        batch: HrBatch,
    },
    Ppi {
        token: StreamToken,
        batch: PpiBatch,
    },
    StreamFailed {
        kind: StreamKind,
        token: StreamToken,
        error: StreamError,
    },
    StreamEnded {
        kind: StreamKind,
        token: StreamToken,
    },
}

/// State shared between the bridge and its tasks.
struct Shared {
    config: BridgeConfig,
    clock: Arc<dyn Clock>,
    store: Arc<dyn DeviceStore>,
    /// Currently connected device.
    device_id: RwLock<Option<String>>,
    streams: StreamRegistry,
    recording: Mutex<IntervalRecording>,
    event_tx: broadcast::Sender<BridgeEvent>,
    initialized: AtomicBool,
}

impl Shared {
    fn emit(&self, event: BridgeEvent) {
        trace!("Emitting {}", event.name());
        let _ = self.event_tx.send(event);
    }

    fn fallback_for(&self, kind: StreamKind) -> &str {
        match kind {
            StreamKind::Scan => self.config.scan_error_fallback.as_str(),
            StreamKind::HeartRate => self.config.hr_error_fallback.as_str(),
            StreamKind::PulseInterval => self.config.ppi_error_fallback.as_str(),
        }
    }
}

/// One initialized SDK session.
struct Session {
    sdk: Arc<dyn SensorSdk>,
    dispatch_tx: mpsc::UnboundedSender<Dispatch>,
    dispatcher: JoinHandle<()>,
    lifecycle: JoinHandle<()>,
}

/// Builder for [`DeviceBridge`].
pub struct DeviceBridgeBuilder {
    provider: Arc<dyn SdkProvider>,
    config: BridgeConfig,
    clock: Arc<dyn Clock>,
    store: Arc<dyn DeviceStore>,
}

impl DeviceBridgeBuilder {
    /// Use `config` instead of [`BridgeConfig::default`].
    pub fn config(mut self, config: BridgeConfig) -> Self {
        self.config = config;
        self
    }

    /// Stamp samples with `clock` instead of the system clock.
    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Persist the last connected device in `store`.
    pub fn store(mut self, store: Arc<dyn DeviceStore>) -> Self {
        self.store = store;
        self
    }

    /// Build the bridge. No SDK client exists until [`DeviceBridge::initialize`].
    pub fn build(self) -> DeviceBridge {
        let (event_tx, _) = broadcast::channel(self.config.event_capacity.max(1));

        DeviceBridge {
            provider: self.provider,
            shared: Arc::new(Shared {
                config: self.config,
                clock: self.clock,
                store: self.store,
                device_id: RwLock::new(None),
                streams: StreamRegistry::new(),
                recording: Mutex::new(IntervalRecording::new()),
                event_tx,
                initialized: AtomicBool::new(false),
            }),
            session: AsyncMutex::new(None),
            callback_counter: AtomicU64::new(0),
        }
    }
}

/// Bridge between a sensor SDK and a host application.
pub struct DeviceBridge {
    provider: Arc<dyn SdkProvider>,
    shared: Arc<Shared>,
    session: AsyncMutex<Option<Session>>,
    callback_counter: AtomicU64,
}

impl DeviceBridge {
    /// Create a bridge with the default configuration, the system clock and
    /// an in-memory device store.
    pub fn new(provider: impl SdkProvider + 'static) -> Self {
        Self::builder(provider).build()
    }

    /// Start building a bridge around `provider`.
    pub fn builder(provider: impl SdkProvider + 'static) -> DeviceBridgeBuilder {
        DeviceBridgeBuilder {
            provider: Arc::new(provider),
            config: BridgeConfig::default(),
            clock: Arc::new(SystemClock),
            store: Arc::new(MemoryDeviceStore::new()),
        }
    }

    /// Construct the SDK client and start forwarding its callbacks.
    ///
    /// Calling this on an initialized bridge does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Init`] if the SDK client cannot be constructed.
    pub async fn initialize(&self) -> Result<()> {
        let mut session = self.session.lock().await;
        if session.is_some() {
            debug!("Bridge already initialized");
            return Ok(());
        }

        info!(
            "Initializing sensor SDK with features {:?}",
            self.shared.config.features
        );

        let sdk = self
            .provider
            .create(&self.shared.config.features)
            .await
            .map_err(|e| Error::Init {
                reason: e.to_string(),
            })?;

        self.shared.recording.lock().clear();

        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();

        let mut lifecycle_rx = sdk.subscribe_lifecycle();
        let lifecycle_tx = dispatch_tx.clone();
        let lifecycle = tokio::spawn(async move {
            loop {
                match lifecycle_rx.recv().await {
                    Ok(event) => {
                        if lifecycle_tx.send(Dispatch::Lifecycle(event)).is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        warn!("Dropped {} lifecycle callbacks", n);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("Lifecycle forwarding ended");
        });

        let dispatcher = Dispatcher {
            shared: self.shared.clone(),
            sdk: sdk.clone(),
            dispatch_tx: dispatch_tx.clone(),
        };
        let dispatcher = tokio::spawn(dispatcher.run(dispatch_rx));

        *session = Some(Session {
            sdk,
            dispatch_tx,
            dispatcher,
            lifecycle,
        });
        self.shared.initialized.store(true, Ordering::SeqCst);

        info!("Sensor SDK initialized");
        Ok(())
    }

    /// Search for a device. The first one found is reported as
    /// [`BridgeEvent::DeviceFound`] and the search stops.
    ///
    /// A scan already in progress is cancelled first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotInitialized`] before [`initialize`](Self::initialize),
    /// or [`Error::Scan`] if the SDK refuses to start discovery.
    pub async fn scan(&self) -> Result<()> {
        let (sdk, dispatch_tx) = self.session_parts().await?;

        let token = self.shared.streams.begin(StreamKind::Scan);
        info!("Scanning for devices");

        match sdk.search_for_device().await {
            Ok(stream) => {
                let task = spawn_forwarder(
                    stream,
                    StreamKind::Scan,
                    token,
                    dispatch_tx,
                    move |device| Dispatch::Found { token, device },
                );
                self.shared.streams.attach(StreamKind::Scan, token, task);
                Ok(())
            }
            Err(e) => {
                self.shared.streams.release(StreamKind::Scan, token);
                Err(Error::Scan {
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Check the Bluetooth adapter.
    ///
    /// When the adapter is powered off the platform is asked to enable it and
    /// [`AdapterState::PoweredOff`] is returned.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BluetoothUnavailable`] when there is no adapter.
    pub async fn check_bluetooth(&self) -> Result<AdapterState> {
        let state = self.provider.adapter_state().await?;
        match state {
            AdapterState::Unavailable => Err(Error::BluetoothUnavailable),
            AdapterState::PoweredOff => {
                info!("Bluetooth is off, requesting enable");
                if let Err(e) = self.provider.request_enable().await {
                    warn!("Enable request failed: {}", e);
                }
                Ok(state)
            }
            AdapterState::PoweredOn => Ok(state),
        }
    }

    /// Request a connection to `device_id`.
    ///
    /// Only acceptance of the request is reported here; completion arrives as
    /// [`BridgeEvent::DeviceConnected`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotInitialized`] before initialization, or
    /// [`Error::Connect`] if the id is blank or the SDK rejects the request.
    pub async fn connect(&self, device_id: &str) -> Result<()> {
        let (sdk, _) = self.session_parts().await?;

        let device_id = normalize_device_id(device_id).ok_or_else(|| Error::Connect {
            reason: "Device id is empty".to_string(),
        })?;

        info!("Connecting to {}", device_id);
        sdk.connect_to_device(&device_id)
            .await
            .map_err(|e| Error::Connect {
                reason: e.to_string(),
            })
    }

    /// Connect to the device stored by the last successful connection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoDevice`] when no device id has been stored.
    pub async fn connect_last_device(&self) -> Result<()> {
        self.session_parts().await?;
        let device_id = self.shared.store.load()?.ok_or(Error::NoDevice)?;
        self.connect(&device_id).await
    }

    /// Disconnect the current device and stop its streams.
    ///
    /// The device handle is cleared when the SDK reports the disconnect.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotInitialized`] or [`Error::NoDevice`].
    pub async fn disconnect(&self) -> Result<()> {
        let (sdk, _) = self.session_parts().await?;
        let device_id = self.device_id().ok_or(Error::NoDevice)?;

        self.shared.streams.dispose(StreamKind::HeartRate);
        self.shared.streams.dispose(StreamKind::PulseInterval);

        info!("Disconnecting from {}", device_id);
        sdk.disconnect_from_device(&device_id).await?;
        Ok(())
    }

    /// Start heart-rate streaming for the connected device.
    ///
    /// Any previous heart-rate stream is disposed first. Every sample is
    /// published as [`BridgeEvent::HrData`]; a failure to open the stream is
    /// published as [`BridgeEvent::HrError`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotInitialized`] before initialization (without
    /// touching the SDK) or [`Error::NoDevice`] without a connected device.
    pub async fn start_hr_streaming(&self) -> Result<()> {
        let (sdk, dispatch_tx) = self.session_parts().await?;
        let device_id = self.device_id().ok_or(Error::NoDevice)?;

        let token = self.shared.streams.begin(StreamKind::HeartRate);
        info!("Starting heart rate streaming for {}", device_id);

        match sdk.start_hr_streaming(&device_id).await {
            Ok(stream) => {
                let task = spawn_forwarder(
                    stream,
                    StreamKind::HeartRate,
                    token,
                    dispatch_tx,
                    move |batch| Dispatch::Hr { token, batch },
                );
                self.shared
                    .streams
                    .attach(StreamKind::HeartRate, token, task);
            }
            Err(e) => {
                warn!("Heart rate stream failed to open: {}", e);
                let _ = dispatch_tx.send(Dispatch::StreamFailed {
                    kind: StreamKind::HeartRate,
                    token,
                    error: StreamError::new(e.to_string()),
                });
            }
        }
        Ok(())
    }

    /// Stop heart-rate streaming. Does nothing when no stream is active.
    pub fn stop_hr_streaming(&self) {
        if self.shared.streams.dispose(StreamKind::HeartRate) {
            info!("Heart rate streaming stopped");
        }
    }

    /// Dispose every stream, stop the background tasks and shut the SDK down.
    ///
    /// The bridge can be initialized again afterwards. Safe to call at any
    /// time, including repeatedly.
    pub async fn teardown(&self) {
        let mut session = self.session.lock().await;

        self.shared.streams.dispose_all();
        *self.shared.device_id.write() = None;
        self.shared.initialized.store(false, Ordering::SeqCst);

        if let Some(session) = session.take() {
            info!("Tearing down sensor SDK");
            session.lifecycle.abort();
            session.dispatcher.abort();
            session.sdk.shut_down().await;
        }
    }

    /// Subscribe to bridge events.
    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.shared.event_tx.subscribe()
    }

    /// Register a callback for every bridge event.
    ///
    /// Delivery stops when the returned handle is dropped or unregistered.
    pub fn on_event<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(&BridgeEvent) + Send + Sync + 'static,
    {
        let callback_id = self.callback_counter.fetch_add(1, Ordering::SeqCst);
        let mut rx = self.shared.event_tx.subscribe();

        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => callback(&event),
                    Err(RecvError::Lagged(n)) => {
                        warn!("Event callback {} missed {} events", callback_id, n);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        CallbackHandle::new(callback_id, move || {
            handle.abort();
        })
    }

    /// Whether an SDK session is active.
    pub fn is_initialized(&self) -> bool {
        self.shared.initialized.load(Ordering::SeqCst)
    }

    /// The connected device, if any.
    pub fn device_id(&self) -> Option<String> {
        self.shared.device_id.read().clone()
    }

    /// Stream kinds with an active subscription.
    pub fn active_streams(&self) -> Vec<StreamKind> {
        self.shared.streams.active_kinds()
    }

    /// Snapshot of the intervals recorded since initialization.
    pub fn recording(&self) -> IntervalRecording {
        self.shared.recording.lock().clone()
    }

    /// Write the recording into `dir`. See [`IntervalRecording::write_json`].
    ///
    /// The file is attributed to the connected device, or the last stored one.
    pub fn save_recording(&self, dir: &Path) -> Result<Option<PathBuf>> {
        let device_id = match self.device_id() {
            Some(id) => id,
            None => self.shared.store.load()?.unwrap_or_default(),
        };
        let recording = self.recording();
        recording.write_json(dir, &device_id, self.shared.clock.now())
    }

    async fn session_parts(
        &self,
    ) -> Result<(Arc<dyn SensorSdk>, mpsc::UnboundedSender<Dispatch>)> {
        let session = self.session.lock().await;
        match session.as_ref() {
            Some(s) => Ok((s.sdk.clone(), s.dispatch_tx.clone())),
            None => Err(Error::NotInitialized),
        }
    }
}

/// Dropping an initialized bridge disposes its streams and shuts the SDK
/// down on a spawned task when a runtime is available. Call
/// [`DeviceBridge::teardown`] to wait for the shutdown instead.
impl Drop for DeviceBridge {
    fn drop(&mut self) {
        self.shared.streams.dispose_all();
        let Ok(mut session) = self.session.try_lock() else {
            return;
        };
        if let Some(session) = session.take() {
            session.lifecycle.abort();
            session.dispatcher.abort();
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    let sdk = session.sdk;
                    handle.spawn(async move { sdk.shut_down().await });
                }
                Err(_) => warn!("Bridge dropped outside a runtime, SDK not shut down"),
            }
        }
    }
}

/// Forward items from an SDK stream to the dispatch task.
///
/// Discovery forwards a single device and stops. Other streams run until
/// they fail, end, or the task is aborted.
fn spawn_forwarder<T, F>(
    mut stream: SdkStream<T>,
    kind: StreamKind,
    token: StreamToken,
    dispatch_tx: mpsc::UnboundedSender<Dispatch>,
    wrap: F,
) -> JoinHandle<()>
where
    T: Send + 'static,
    F: Fn(T) -> Dispatch + Send + 'static,
{
    let single = kind == StreamKind::Scan;

    tokio::spawn(async move {
        while let Some(item) = stream.next().await {
            match item {
                Ok(value) => {
                    if dispatch_tx.send(wrap(value)).is_err() || single {
                        return;
                    }
                }
                Err(error) => {
                    let _ = dispatch_tx.send(Dispatch::StreamFailed { kind, token, error });
                    return;
                }
            }
        }
        let _ = dispatch_tx.send(Dispatch::StreamEnded { kind, token });
    })
}

/// The single task that applies SDK callbacks to bridge state.
struct Dispatcher {
    shared: Arc<Shared>,
    sdk: Arc<dyn SensorSdk>,
    dispatch_tx: mpsc::UnboundedSender<Dispatch>,
}

impl Dispatcher {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<Dispatch>) {
        while let Some(item) = rx.recv().await {
            self.handle(item).await;
        }
        debug!("Dispatch task ended");
    }

    async fn handle(&self, item: Dispatch) {
        match item {
            Dispatch::Lifecycle(event) => self.handle_lifecycle(event).await,
            Dispatch::Found { token, device } => {
                if !self.take_if_current(StreamKind::Scan, token) {
                    return;
                }
                info!("Found device {}", device.device_id);
                self.shared.emit(BridgeEvent::DeviceFound {
                    device_id: device.device_id,
                });
            }
            Dispatch::Hr { token, batch } => {
                if !self.is_current(StreamKind::HeartRate, token) {
                    return;
                }
                self.handle_hr(batch);
            }
            Dispatch::Ppi { token, batch } => {
                if !self.is_current(StreamKind::PulseInterval, token) {
                    return;
                }
                self.handle_ppi(batch);
            }
            Dispatch::StreamFailed { kind, token, error } => {
                if !self.take_if_current(kind, token) {
                    return;
                }
                let message = error.message_or(self.shared.fallback_for(kind));
                warn!("{} stream failed: {}", kind, message);
                self.shared.emit(match kind {
                    StreamKind::Scan => BridgeEvent::ScanError { message },
                    StreamKind::HeartRate => BridgeEvent::HrError { message },
                    StreamKind::PulseInterval => BridgeEvent::PpiError { message },
                });
            }
            Dispatch::StreamEnded { kind, token } => {
                if self.shared.streams.release(kind, token) {
                    debug!("{} stream ended", kind);
                }
            }
        }
    }

    async fn handle_lifecycle(&self, event: SdkEvent) {
        match event {
            SdkEvent::PowerStateChanged { powered } => {
                info!("Bluetooth powered: {}", powered);
                self.shared.emit(BridgeEvent::BlePowerChanged { powered });
            }
            SdkEvent::DeviceConnected(device) => {
                let device_id = device.device_id;
                let previous = self.shared.device_id.write().replace(device_id.clone());
                if let Some(previous) = previous.filter(|p| *p != device_id) {
                    debug!("Replacing device {} with {}", previous, device_id);
                    self.shared.streams.dispose(StreamKind::HeartRate);
                    self.shared.streams.dispose(StreamKind::PulseInterval);
                }

                if let Err(e) = self.shared.store.save(&device_id) {
                    warn!("Failed to store device id {}: {}", device_id, e);
                }

                info!("Connected to {}", device_id);
                self.shared.emit(BridgeEvent::DeviceConnected { device_id });
            }
            SdkEvent::DeviceDisconnected(device) => {
                let device_id = device.device_id;
                let was_current = {
                    let mut current = self.shared.device_id.write();
                    let matches = current.as_deref() == Some(device_id.as_str());
                    if matches {
                        *current = None;
                    }
                    matches
                };
                if was_current {
                    // Streams belong to the link that just went away
                    self.shared.streams.dispose(StreamKind::HeartRate);
                    self.shared.streams.dispose(StreamKind::PulseInterval);
                }
                info!("Disconnected from {}", device_id);
                self.shared
                    .emit(BridgeEvent::DeviceDisconnected { device_id });
            }
            SdkEvent::FeatureReady { device_id, feature } => {
                debug!("Feature {} ready on {}", feature, device_id);
                self.shared.emit(BridgeEvent::FeatureReady {
                    device_id: device_id.clone(),
                    feature,
                });

                let is_current_device =
                    self.shared.device_id.read().as_deref() == Some(device_id.as_str());
                if feature == SdkFeature::OnlineStreaming && is_current_device {
                    self.start_ppi_streaming(&device_id).await;
                }
            }
        }
    }

    async fn start_ppi_streaming(&self, device_id: &str) {
        let token = self.shared.streams.begin(StreamKind::PulseInterval);
        info!("Starting pulse interval streaming for {}", device_id);

        match self.sdk.start_ppi_streaming(device_id).await {
            Ok(stream) => {
                let task = spawn_forwarder(
                    stream,
                    StreamKind::PulseInterval,
                    token,
                    self.dispatch_tx.clone(),
                    move |batch| Dispatch::Ppi { token, batch },
                );
                self.shared
                    .streams
                    .attach(StreamKind::PulseInterval, token, task);
            }
            Err(e) => {
                self.shared
                    .streams
                    .release(StreamKind::PulseInterval, token);
                let message = StreamError::new(e.to_string())
                    .message_or(&self.shared.config.ppi_error_fallback);
                warn!("Pulse interval stream failed to open: {}", message);
                self.shared.emit(BridgeEvent::PpiError { message });
            }
        }
    }

    fn handle_hr(&self, batch: HrBatch) {
        // Pulse intervals already cover the beats when that stream is live.
        let record = self.shared.config.record_intervals
            && !self
                .shared
                .streams
                .active_kinds()
                .contains(&StreamKind::PulseInterval);
        let now = self.shared.clock.now();

        for sample in batch.samples {
            trace!("HR {} bpm, RR {:?}", sample.hr, sample.rr_ms);
            if record {
                self.shared
                    .recording
                    .lock()
                    .extend(now, sample.rr_ms.iter().copied());
            }
            self.shared.emit(BridgeEvent::HrData {
                hr: sample.hr,
                rr: sample.rr_ms.first().copied(),
            });
        }
    }

    fn handle_ppi(&self, batch: PpiBatch) {
        let now = self.shared.clock.now();
        let timestamp = format_clock_time(&now);

        if self.shared.config.record_intervals {
            self.shared
                .recording
                .lock()
                .extend(now, batch.samples.iter().map(|s| s.ppi_ms));
        }

        let ppi = batch
            .samples
            .into_iter()
            .map(|sample| StampedInterval {
                ppi: sample.ppi_ms,
                timestamp: timestamp.clone(),
            })
            .collect::<Vec<_>>();
        trace!("PPI batch of {} at {}", ppi.len(), timestamp);
        self.shared.emit(BridgeEvent::PpiData { ppi });
    }

    fn is_current(&self, kind: StreamKind, token: StreamToken) -> bool {
        let current = self.shared.streams.is_current(kind, token);
        if !current {
            trace!("Dropping stale {} item #{}", kind, token);
        }
        current
    }

    /// Retire the subscription if `token` is still current.
    fn take_if_current(&self, kind: StreamKind, token: StreamToken) -> bool {
        let current = self.shared.streams.release(kind, token);
        if !current {
            trace!("Dropping stale {} item #{}", kind, token);
        }
        current
    }
}
