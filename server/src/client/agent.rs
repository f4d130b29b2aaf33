//! Location capture agent: raw device positions in, a filtered and
//! rate-controlled stream of `location_update` events out.
//!
//! Device positioning sits behind the [`PositionSource`] trait (one-shot fix
//! plus a continuous watch stream) so the agent runs against scripted
//! sources in tests; the forwarding side is the [`UpdateSink`] seam the
//! transport client implements.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::client::transport::TransportClient;
use crate::config::TrackingConfig;
use crate::geo;
use crate::protocol::{GeoPoint, LocationRecord};

const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(5);

/// Why a position could not be obtained.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PositionError {
    #[error("location permission denied; enable location access and retry")]
    PermissionDenied,

    #[error("position unavailable: {0}")]
    Unavailable(String),

    #[error("timed out waiting for a position fix")]
    Timeout,
}

impl PositionError {
    /// Transient errors are retried on a fixed backoff; permission denial
    /// needs user action and is not.
    pub fn is_transient(&self) -> bool {
        !matches!(self, PositionError::PermissionDenied)
    }
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("tracking is already active")]
    AlreadyTracking,

    #[error(transparent)]
    Position(#[from] PositionError),
}

/// Continuous stream of position fixes (or errors) from the device.
pub type PositionStream = mpsc::Receiver<Result<GeoPoint, PositionError>>;

/// Abstraction over the platform's positioning capability.
pub trait PositionSource: Send + Sync + 'static {
    /// One-shot position fix, independent of any watch subscription.
    fn current(&self) -> BoxFuture<'_, Result<GeoPoint, PositionError>>;

    /// Subscribe to continuous position updates.
    fn watch(&self) -> BoxFuture<'_, Result<PositionStream, PositionError>>;
}

/// Where admitted samples go. Forwarding is fire-and-forget; the sink owns
/// nothing beyond handing the record to the transport.
pub trait UpdateSink: Send + Sync + 'static {
    fn forward(&self, record: LocationRecord);
}

impl UpdateSink for TransportClient {
    fn forward(&self, record: LocationRecord) {
        if let Err(e) = self.update_location(record) {
            tracing::debug!(error = %e, "location update not dispatched");
        }
    }
}

/// Per-tracking-session options.
#[derive(Debug, Clone)]
pub struct TrackingOptions {
    pub ride_id: Option<String>,
    pub daily_route_id: Option<String>,
    /// Backup re-emit cadence while the device is stationary.
    pub interval: Duration,
    /// Minimum movement before a fresh sample is forwarded.
    pub min_distance_m: f64,
}

impl Default for TrackingOptions {
    fn default() -> Self {
        Self {
            ride_id: None,
            daily_route_id: None,
            interval: Duration::from_millis(5000),
            min_distance_m: 10.0,
        }
    }
}

impl TrackingOptions {
    /// Derive session options from the server-distributed tracking defaults.
    pub fn from_config(config: &TrackingConfig) -> Self {
        Self {
            interval: Duration::from_millis(config.interval_ms),
            min_distance_m: config.min_distance_m,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
struct RideContext {
    ride_id: Option<String>,
    daily_route_id: Option<String>,
}

/// Turns raw device samples into gated, rate-controlled location updates.
pub struct LocationAgent {
    source: Arc<dyn PositionSource>,
    sink: Arc<dyn UpdateSink>,
    retry_backoff: Duration,
    context: Arc<Mutex<RideContext>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl LocationAgent {
    pub fn new(source: Arc<dyn PositionSource>, sink: Arc<dyn UpdateSink>) -> Self {
        Self::with_retry_backoff(source, sink, DEFAULT_RETRY_BACKOFF)
    }

    pub fn with_retry_backoff(
        source: Arc<dyn PositionSource>,
        sink: Arc<dyn UpdateSink>,
        retry_backoff: Duration,
    ) -> Self {
        Self {
            source,
            sink,
            retry_backoff,
            context: Arc::new(Mutex::new(RideContext::default())),
            task: Mutex::new(None),
        }
    }

    /// Begin continuous tracking for a driver.
    ///
    /// Fails fast if tracking is already active or the platform has no
    /// positioning capability (the initial watch subscription is taken out
    /// here, so a denied permission surfaces to the caller instead of
    /// silently looping).
    pub async fn start_tracking(
        &self,
        driver_id: &str,
        options: TrackingOptions,
    ) -> Result<(), AgentError> {
        if self.task.lock().unwrap().is_some() {
            return Err(AgentError::AlreadyTracking);
        }

        let stream = self.source.watch().await?;

        *self.context.lock().unwrap() = RideContext {
            ride_id: options.ride_id.clone(),
            daily_route_id: options.daily_route_id.clone(),
        };

        let handle = tokio::spawn(track_loop(
            self.source.clone(),
            self.sink.clone(),
            driver_id.to_string(),
            options,
            self.context.clone(),
            self.retry_backoff,
            stream,
        ));

        let mut slot = self.task.lock().unwrap();
        if slot.is_some() {
            // Lost a start/start race while awaiting the subscription.
            handle.abort();
            return Err(AgentError::AlreadyTracking);
        }
        *slot = Some(handle);
        Ok(())
    }

    /// Cancel the watch subscription and the backup timer, and clear
    /// last-known state. Idempotent.
    pub fn stop_tracking(&self) {
        if let Some(handle) = self.task.lock().unwrap().take() {
            handle.abort();
            tracing::debug!("tracking stopped");
        }
        *self.context.lock().unwrap() = RideContext::default();
    }

    pub fn is_tracking(&self) -> bool {
        self.task.lock().unwrap().is_some()
    }

    /// One-shot fix, independent of the continuous subscription.
    pub async fn current_location(&self) -> Result<GeoPoint, PositionError> {
        self.source.current().await
    }

    /// Retag subsequent forwards with a new ride/route without restarting
    /// the watch subscription.
    pub fn update_ride_context(&self, ride_id: Option<String>, daily_route_id: Option<String>) {
        *self.context.lock().unwrap() = RideContext {
            ride_id,
            daily_route_id,
        };
    }
}

enum StreamEnd {
    Transient,
    Fatal,
}

async fn track_loop(
    source: Arc<dyn PositionSource>,
    sink: Arc<dyn UpdateSink>,
    driver_id: String,
    options: TrackingOptions,
    context: Arc<Mutex<RideContext>>,
    backoff: Duration,
    mut stream: PositionStream,
) {
    let mut last_forwarded: Option<GeoPoint> = None;

    loop {
        match pump_stream(
            sink.as_ref(),
            &driver_id,
            &options,
            &context,
            &mut last_forwarded,
            &mut stream,
        )
        .await
        {
            StreamEnd::Fatal => {
                tracing::error!(driver_id = %driver_id, "permission denied, tracking stopped");
                return;
            }
            StreamEnd::Transient => {
                tracing::warn!(driver_id = %driver_id, "positioning error, restarting tracking");
                tokio::time::sleep(backoff).await;
                // Unbounded retries: GPS dropouts are usually momentary.
                loop {
                    match source.watch().await {
                        Ok(fresh) => {
                            stream = fresh;
                            break;
                        }
                        Err(e) if e.is_transient() => {
                            tracing::warn!(error = %e, "re-subscribe failed, backing off");
                            tokio::time::sleep(backoff).await;
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "tracking stopped");
                            return;
                        }
                    }
                }
            }
        }
    }
}

/// Pump one watch subscription until it errors or ends. Admits a sample only
/// when it moved beyond the distance gate; independently re-emits the last
/// forwarded sample every interval so a stationary driver never goes silent.
async fn pump_stream(
    sink: &dyn UpdateSink,
    driver_id: &str,
    options: &TrackingOptions,
    context: &Mutex<RideContext>,
    last_forwarded: &mut Option<GeoPoint>,
    stream: &mut PositionStream,
) -> StreamEnd {
    let mut ticker = tokio::time::interval(options.interval);
    // Skip the first immediate tick
    ticker.tick().await;

    loop {
        tokio::select! {
            sample = stream.recv() => match sample {
                Some(Ok(position)) => {
                    if admits(last_forwarded.as_ref(), &position, options.min_distance_m) {
                        forward(sink, driver_id, position, context);
                        *last_forwarded = Some(position);
                    }
                }
                Some(Err(e)) if e.is_transient() => return StreamEnd::Transient,
                Some(Err(_)) => return StreamEnd::Fatal,
                None => return StreamEnd::Transient,
            },
            _ = ticker.tick() => {
                if let Some(position) = *last_forwarded {
                    forward(sink, driver_id, position, context);
                }
            }
        }
    }
}

/// Admission rule: forward only when the great-circle distance from the last
/// forwarded sample exceeds the gate. The first sample always passes.
fn admits(last: Option<&GeoPoint>, next: &GeoPoint, min_distance_m: f64) -> bool {
    match last {
        None => true,
        Some(prev) => {
            geo::distance_meters(prev.latitude, prev.longitude, next.latitude, next.longitude)
                > min_distance_m
        }
    }
}

fn forward(sink: &dyn UpdateSink, driver_id: &str, position: GeoPoint, context: &Mutex<RideContext>) {
    let ctx = context.lock().unwrap().clone();
    sink.forward(LocationRecord {
        driver_id: driver_id.to_string(),
        latitude: position.latitude,
        longitude: position.longitude,
        ride_id: ctx.ride_id,
        daily_route_id: ctx.daily_route_id,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ScriptedSource {
        watch_rx: Mutex<Option<PositionStream>>,
        current: Mutex<Option<Result<GeoPoint, PositionError>>>,
    }

    impl ScriptedSource {
        fn with_stream(rx: PositionStream) -> Arc<Self> {
            Arc::new(Self {
                watch_rx: Mutex::new(Some(rx)),
                current: Mutex::new(None),
            })
        }

        fn without_capability() -> Arc<Self> {
            Arc::new(Self {
                watch_rx: Mutex::new(None),
                current: Mutex::new(Some(Err(PositionError::Unavailable(
                    "no positioning capability".into(),
                )))),
            })
        }
    }

    impl PositionSource for ScriptedSource {
        fn current(&self) -> BoxFuture<'_, Result<GeoPoint, PositionError>> {
            Box::pin(async move {
                self.current
                    .lock()
                    .unwrap()
                    .take()
                    .unwrap_or(Err(PositionError::Timeout))
            })
        }

        fn watch(&self) -> BoxFuture<'_, Result<PositionStream, PositionError>> {
            Box::pin(async move {
                self.watch_rx
                    .lock()
                    .unwrap()
                    .take()
                    .ok_or(PositionError::Unavailable("no positioning capability".into()))
            })
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        records: Mutex<Vec<LocationRecord>>,
    }

    impl UpdateSink for RecordingSink {
        fn forward(&self, record: LocationRecord) {
            self.records.lock().unwrap().push(record);
        }
    }

    fn point(latitude: f64, longitude: f64) -> GeoPoint {
        GeoPoint {
            latitude,
            longitude,
        }
    }

    /// Options with an interval long enough that the backup timer stays out
    /// of a short test's way.
    fn quiet_options() -> TrackingOptions {
        TrackingOptions {
            interval: Duration::from_secs(60),
            ..TrackingOptions::default()
        }
    }

    #[tokio::test]
    async fn distance_gate_suppresses_small_movements() {
        let (tx, rx) = mpsc::channel(16);
        let source = ScriptedSource::with_stream(rx);
        let sink = Arc::new(RecordingSink::default());
        let agent = LocationAgent::new(source, sink.clone());

        agent
            .start_tracking("D1", quiet_options())
            .await
            .expect("tracking starts");

        // Base fix, then jitter all within ~9 m of it. Gate is 10 m.
        tx.send(Ok(point(6.9300, 79.8600))).await.unwrap();
        tx.send(Ok(point(6.93005, 79.8600))).await.unwrap();
        tx.send(Ok(point(6.93000, 79.86005))).await.unwrap();
        tx.send(Ok(point(6.93004, 79.86004))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(
            sink.records.lock().unwrap().len(),
            1,
            "jitter inside the gate must not be forwarded"
        );

        // A real move (~110 m) passes the gate.
        tx.send(Ok(point(6.9310, 79.8600))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(sink.records.lock().unwrap().len(), 2);
        agent.stop_tracking();
    }

    #[tokio::test]
    async fn starting_twice_fails_fast() {
        let (_tx, rx) = mpsc::channel(1);
        let source = ScriptedSource::with_stream(rx);
        let sink = Arc::new(RecordingSink::default());
        let agent = LocationAgent::new(source, sink);

        agent
            .start_tracking("D1", quiet_options())
            .await
            .expect("first start succeeds");

        let second = agent.start_tracking("D1", quiet_options()).await;
        assert!(matches!(second, Err(AgentError::AlreadyTracking)));
        agent.stop_tracking();
    }

    #[tokio::test]
    async fn missing_capability_fails_start() {
        let source = ScriptedSource::without_capability();
        let sink = Arc::new(RecordingSink::default());
        let agent = LocationAgent::new(source, sink);

        let result = agent.start_tracking("D1", quiet_options()).await;
        assert!(matches!(
            result,
            Err(AgentError::Position(PositionError::Unavailable(_)))
        ));
        assert!(!agent.is_tracking());
    }

    #[tokio::test]
    async fn stop_tracking_is_idempotent() {
        let (_tx, rx) = mpsc::channel(1);
        let source = ScriptedSource::with_stream(rx);
        let sink = Arc::new(RecordingSink::default());
        let agent = LocationAgent::new(source, sink);

        agent
            .start_tracking("D1", quiet_options())
            .await
            .expect("tracking starts");

        agent.stop_tracking();
        agent.stop_tracking();
        assert!(!agent.is_tracking());
    }

    #[tokio::test]
    async fn ride_context_retags_without_restart() {
        let (tx, rx) = mpsc::channel(16);
        let source = ScriptedSource::with_stream(rx);
        let sink = Arc::new(RecordingSink::default());
        let agent = LocationAgent::new(source, sink.clone());

        agent
            .start_tracking(
                "D1",
                TrackingOptions {
                    ride_id: Some("R1".into()),
                    ..quiet_options()
                },
            )
            .await
            .expect("tracking starts");

        tx.send(Ok(point(6.93, 79.86))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        agent.update_ride_context(Some("R2".into()), Some("DR9".into()));
        tx.send(Ok(point(6.94, 79.86))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let records = sink.records.lock().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].ride_id.as_deref(), Some("R1"));
        assert_eq!(records[1].ride_id.as_deref(), Some("R2"));
        assert_eq!(records[1].daily_route_id.as_deref(), Some("DR9"));
        drop(records);
        agent.stop_tracking();
    }

    #[tokio::test]
    async fn backup_timer_reemits_last_sample() {
        let (tx, rx) = mpsc::channel(16);
        let source = ScriptedSource::with_stream(rx);
        let sink = Arc::new(RecordingSink::default());
        let agent = LocationAgent::new(source, sink.clone());

        agent
            .start_tracking(
                "D1",
                TrackingOptions {
                    interval: Duration::from_millis(100),
                    ..TrackingOptions::default()
                },
            )
            .await
            .expect("tracking starts");

        tx.send(Ok(point(6.93, 79.86))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(450)).await;
        agent.stop_tracking();

        let count = sink.records.lock().unwrap().len();
        assert!(
            count >= 3,
            "stationary driver must keep emitting via the backup timer, got {count}"
        );
    }

    #[tokio::test]
    async fn current_location_reports_descriptive_error() {
        let source = ScriptedSource::without_capability();
        let sink = Arc::new(RecordingSink::default());
        let agent = LocationAgent::new(source, sink);

        let err = agent.current_location().await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "position unavailable: no positioning capability"
        );
    }
}
