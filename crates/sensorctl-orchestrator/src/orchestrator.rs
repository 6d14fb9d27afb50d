//! The orchestrator event loop
//!
//! [`Orchestrator::run`] is the only place operation state and the cached
//! inventory are mutated. It consumes one [`Event`] at a time from a single
//! queue fed by user commands, its own ticker and completed I/O tasks.
//!
//! # Scheduling
//!
//! Every operation carries the instant its next step is due. On each tick
//! the loop dispatches the steps that are due and marks them in flight; the
//! task's result event reschedules the operation (or finishes it). A result
//! for a phase the operation already left is ignored.
//!
//! # Soft cancellation
//!
//! Dismissing an active operation only hides it. Its tasks keep running and
//! their results still drive it to a terminal phase.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use sensorctl_core::config::{FleetConfig, TimingConfig};
use sensorctl_core::time::format_elapsed;
use sensorctl_core::types::short_id;
use sensorctl_core::{InventoryFile, Sensor};

use crate::control_plane::{ControlPlane, CreateRequest};
use crate::error::OperationError;
use crate::event::{Command, Event};
use crate::operation::deploy::{self, DeployProgress, DeployStep};
use crate::operation::oneshot::{self, OneShotProgress, OneShotStep};
use crate::operation::upgrade::{self, UpgradeProgress, UpgradeStep};
use crate::operation::{
    DeployPhase, Deployment, OneShot, OneShotAction, OneShotPhase, OperationDetail, OperationKey,
    OperationKind, OperationState, Phase, TrafficAction, UpgradeInfo, UpgradeMonitor, UpgradePhase,
    UpgradeTarget,
};
use crate::remote::RemoteRunner;
use crate::snapshot::{OperationView, OrchestratorSnapshot};
use crate::tasks;

const EVENT_QUEUE: usize = 256;

/// Collaborators the orchestrator's tasks talk to
#[derive(Clone)]
pub struct Services {
    pub control_plane: Arc<dyn ControlPlane>,
    pub remote: Arc<dyn RemoteRunner>,
    pub inventory: InventoryFile,
    /// Serializes writes to the inventory file across tasks
    inventory_lock: Arc<Mutex<()>>,
}

impl Services {
    pub fn new(
        control_plane: Arc<dyn ControlPlane>,
        remote: Arc<dyn RemoteRunner>,
        inventory: InventoryFile,
    ) -> Self {
        Self {
            control_plane,
            remote,
            inventory,
            inventory_lock: Arc::new(Mutex::new(())),
        }
    }

    pub(crate) fn inventory_lock(&self) -> &Mutex<()> {
        &self.inventory_lock
    }
}

/// Cloneable front door to a running orchestrator
#[derive(Clone)]
pub struct OrchestratorHandle {
    tx: mpsc::Sender<Event>,
    snapshots: watch::Receiver<OrchestratorSnapshot>,
}

impl OrchestratorHandle {
    /// Submit a command and wait for the loop to accept or reject it
    pub async fn submit(&self, command: Command) -> Result<Option<OperationKey>, OperationError> {
        let (reply, answer) = tokio::sync::oneshot::channel();
        self.tx
            .send(Event::Command {
                command,
                reply: Some(reply),
            })
            .await
            .map_err(|_| OperationError::Stopped)?;
        answer.await.map_err(|_| OperationError::Stopped)?
    }

    /// Submit a command that starts an operation
    pub async fn start(&self, command: Command) -> Result<OperationKey, OperationError> {
        self.submit(command).await?.ok_or(OperationError::Stopped)
    }

    pub async fn deploy(&self, request: CreateRequest) -> Result<OperationKey, OperationError> {
        self.start(Command::Deploy(request)).await
    }

    pub async fn delete(&self, sensor: &str) -> Result<OperationKey, OperationError> {
        self.start(Command::Delete {
            sensor: sensor.to_string(),
        })
        .await
    }

    pub async fn dismiss(&self, key: OperationKey) -> Result<(), OperationError> {
        self.submit(Command::Dismiss(key)).await.map(|_| ())
    }

    pub async fn refresh(&self) -> Result<(), OperationError> {
        self.submit(Command::Refresh).await.map(|_| ())
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> OrchestratorSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<OrchestratorSnapshot> {
        self.snapshots.clone()
    }
}

enum Step {
    Deploy(DeployStep),
    Upgrade(UpgradeStep),
    OneShot(OneShotStep),
}

/// Owner of all operation state and the cached inventory
pub struct Orchestrator {
    services: Services,
    timing: TimingConfig,
    fleet: FleetConfig,

    operations: BTreeMap<OperationKey, OperationState>,
    sensors: Vec<Sensor>,
    upgrade_info: BTreeMap<String, UpgradeInfo>,
    status: Option<String>,
    error: Option<String>,
    api_online: Option<bool>,
    loaded: bool,
    load_error: Option<String>,
    refreshing: bool,
    /// A refresh was requested while one was running
    refresh_queued: bool,
    last_refresh: Option<Instant>,

    tx: mpsc::Sender<Event>,
    rx: mpsc::Receiver<Event>,
    snapshots: watch::Sender<OrchestratorSnapshot>,
}

impl Orchestrator {
    pub fn new(services: Services, timing: TimingConfig, fleet: FleetConfig) -> (Self, OrchestratorHandle) {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE);
        let (snapshots, snapshot_rx) = watch::channel(OrchestratorSnapshot::default());

        let handle = OrchestratorHandle {
            tx: tx.clone(),
            snapshots: snapshot_rx,
        };
        let orchestrator = Self {
            services,
            timing,
            fleet,
            operations: BTreeMap::new(),
            sensors: Vec::new(),
            upgrade_info: BTreeMap::new(),
            status: None,
            error: None,
            api_online: None,
            loaded: false,
            load_error: None,
            refreshing: false,
            refresh_queued: false,
            last_refresh: None,
            tx,
            rx,
            snapshots,
        };
        (orchestrator, handle)
    }

    /// Run until `cancel` fires
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.timing.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            "Orchestrator started (tick {:?}, refresh every {:?})",
            self.timing.tick,
            self.timing.refresh_interval
        );
        self.start_refresh();
        self.publish();

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Orchestrator shutting down");
                    break;
                }
                _ = ticker.tick() => Event::Tick,
                Some(event) = self.rx.recv() => event,
            };
            self.handle(event);
            self.publish();
        }

        let active = self.operations.values().filter(|op| op.is_active()).count();
        if active > 0 {
            tracing::warn!("Stopped with {} operation(s) still active", active);
        }
    }

    fn publish(&self) {
        self.snapshots.send_replace(self.snapshot());
    }

    fn snapshot(&self) -> OrchestratorSnapshot {
        OrchestratorSnapshot {
            sensors: self.sensors.clone(),
            operations: self.operations.values().map(OperationView::from).collect(),
            upgrade_info: self.upgrade_info.clone(),
            status: self.status.clone(),
            error: self.error.clone(),
            api_online: self.api_online,
            loaded: self.loaded,
            load_error: self.load_error.clone(),
            refreshing: self.refreshing,
        }
    }

    fn handle(&mut self, event: Event) {
        if !matches!(event, Event::Tick) {
            tracing::trace!("Handling {}", event.name());
        }
        match event {
            Event::Command { command, reply } => {
                let result = self.handle_command(command);
                if let Err(e) = &result {
                    tracing::warn!("Rejected command: {}", e);
                    self.error = Some(e.to_string());
                }
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
                self.dispatch_due();
            }
            Event::Tick => self.on_tick(),
            Event::InventoryLoaded {
                sensors,
                removed,
                api_online,
            } => self.on_inventory(sensors, removed, api_online),
            Event::InventoryFailed { error } => {
                self.refreshing = false;
                tracing::error!("Failed to load sensors: {}", error);
                let message = format!("Failed to load sensors: {}", error);
                self.load_error = Some(message.clone());
                self.error = Some(message);
                self.run_queued_refresh();
            }
            Event::MetricsCollected { sensor, metrics } => match metrics {
                Ok(metrics) => {
                    if let Some(s) = self.sensors.iter_mut().find(|s| s.name == sensor) {
                        s.metrics = Some(metrics);
                    }
                }
                Err(e) => tracing::debug!("No metrics from {}: {}", sensor, e),
            },
            Event::DeployCreated { key, result } => {
                let created = result.as_ref().ok().cloned();
                let Some(op) = self.operation_mut(&key) else { return };
                let progress = deploy::apply_created(op, result);
                self.after_deploy(&key, progress);
                if let Some(name) = created {
                    self.status = Some(format!("Sensor {} created", short_id(&name)));
                    self.start_refresh();
                }
            }
            Event::DeployProbed { key, probe } => {
                let timing = self.timing.clone();
                let Some(op) = self.operation_mut(&key) else { return };
                let progress = deploy::apply_probe(op, probe, &timing);
                self.after_deploy(&key, progress);
            }
            Event::DeployCompleted { key, sensor, address } => {
                let Some(op) = self.operation_mut(&key) else { return };
                op.push_log(format!("Total time: {}", format_elapsed(op.elapsed())));
                op.complete(format!("✓ Sensor is READY at {}", address));
                tracing::info!("Sensor {} ready at {}", sensor, address);
                self.status = Some(format!("Sensor {} is ready at {}", short_id(&sensor), address));
                self.start_refresh();
            }
            Event::UpgradeInfoLoaded { sensor, result } => match result {
                Ok(info) => {
                    self.status = Some(format!(
                        "{}: version {} ({}), {} update(s) available",
                        short_id(&sensor),
                        info.current_version,
                        info.release_channel,
                        info.available.len()
                    ));
                    self.upgrade_info.insert(sensor, info);
                }
                Err(e) => {
                    tracing::warn!("Upgrade info for {} failed: {}", sensor, e);
                    self.error = Some(format!("Failed to load upgrade info: {}", e));
                }
            },
            Event::UpgradeLaunched { key, result } => {
                let timing = self.timing.clone();
                let Some(op) = self.operation_mut(&key) else { return };
                let progress = upgrade::apply_launch(op, result, &timing);
                self.after_upgrade(&key, progress);
            }
            Event::UpgradeObserved { key, observation } => {
                let timing = self.timing.clone();
                let Some(op) = self.operation_mut(&key) else { return };
                let progress = upgrade::apply_observation(op, observation, &timing);
                self.after_upgrade(&key, progress);
            }
            Event::PreconditionChecked { key, result } => {
                let Some(op) = self.operation_mut(&key) else { return };
                let progress = oneshot::apply_precondition(op, result);
                self.after_oneshot(&key, progress);
                self.dispatch_due();
            }
            Event::OneShotFinished { key, result } => {
                let Some(op) = self.operation_mut(&key) else { return };
                let progress = oneshot::apply_outcome(op, result);
                self.after_oneshot(&key, progress);
            }
        }
    }

    fn handle_command(&mut self, command: Command) -> Result<Option<OperationKey>, OperationError> {
        match command {
            Command::Deploy(request) => {
                let key = OperationKey::deploy();
                self.ensure_idle(&key)?;
                tracing::info!(
                    "Deploying sensor (branch {}, team {}, user {})",
                    request.development_branch,
                    request.team_name,
                    request.username
                );
                let mut op = self.new_operation(
                    key.clone(),
                    Phase::Deploy(DeployPhase::Requested),
                    OperationDetail::Deploy(Deployment::new(request)),
                );
                op.push_log("Creating sensor...");
                self.insert(op);
                Ok(Some(key))
            }
            Command::Delete { sensor } => {
                self.start_oneshot(sensor, OneShotAction::Delete).map(Some)
            }
            Command::EnableFeatures { sensor } => {
                self.start_oneshot(sensor, OneShotAction::EnableFeatures).map(Some)
            }
            Command::AddToFleet { sensor } => {
                let action = OneShotAction::AddToFleet {
                    address: self.fleet.address.clone(),
                    port: self.fleet.port,
                };
                self.start_oneshot(sensor, action).map(Some)
            }
            Command::ConfigureTraffic { sensor, action } => {
                if let TrafficAction::Start(spec) = &action {
                    spec.validate()?;
                }
                self.start_oneshot(sensor, OneShotAction::Traffic(action)).map(Some)
            }
            Command::LoadUpgradeInfo { sensor } => {
                self.ensure_idle(&OperationKey::new(sensor.as_str(), OperationKind::Upgrade))?;
                let host = self.host_of(&sensor)?;
                self.upgrade_info.remove(&sensor);
                self.status = Some(format!("Loading upgrade info for {}...", short_id(&sensor)));
                tasks::load_upgrade_info(&self.services, &self.tx, sensor, host);
                Ok(None)
            }
            Command::StartUpgrade { sensor, version } => {
                let key = OperationKey::new(sensor.as_str(), OperationKind::Upgrade);
                self.ensure_idle(&key)?;
                let info = self
                    .upgrade_info
                    .get(&sensor)
                    .cloned()
                    .ok_or_else(|| OperationError::UpgradeInfoMissing(sensor.clone()))?;
                let target = UpgradeTarget::resolve(version.as_deref(), &info)?;

                let mut op = self.new_operation(
                    key.clone(),
                    Phase::Upgrade(UpgradePhase::Launching),
                    OperationDetail::Upgrade(UpgradeMonitor::new(info.clone(), target.clone())),
                );
                op.push_log(format!(
                    "Upgrading {} from {} to {} ({})",
                    short_id(&sensor),
                    info.current_version,
                    target,
                    info.repository()
                ));
                tracing::info!("Starting upgrade of {} to {}", sensor, target);
                self.insert(op);
                Ok(Some(key))
            }
            Command::Dismiss(key) => {
                let op = self
                    .operations
                    .get_mut(&key)
                    .ok_or_else(|| OperationError::NotFound(key.to_string()))?;
                if op.is_active() {
                    tracing::info!("{} dismissed, continuing in background", key);
                    op.detach();
                    self.status = Some(format!("{} continues in the background", key));
                } else {
                    self.operations.remove(&key);
                }
                Ok(Some(key))
            }
            Command::Refresh => {
                self.start_refresh();
                Ok(None)
            }
        }
    }

    fn start_oneshot(&mut self, sensor: String, action: OneShotAction) -> Result<OperationKey, OperationError> {
        let key = OperationKey::new(sensor.as_str(), action.kind());
        self.ensure_idle(&key)?;
        let host = if action.needs_host() {
            Some(self.host_of(&sensor)?)
        } else {
            None
        };

        let action_op = OneShot::new(action, sensor, host);
        let initial = action_op.initial_phase();
        let first_line = match initial {
            OneShotPhase::Precondition => "Checking sensor status...".to_string(),
            _ => format!("{}...", action_op.action.describe()),
        };
        tracing::info!("{}: {}", key, action_op.action.describe());

        let mut op = self.new_operation(
            key.clone(),
            Phase::OneShot(initial),
            OperationDetail::OneShot(action_op),
        );
        op.push_log(first_line);
        self.insert(op);
        Ok(key)
    }

    fn new_operation(&self, key: OperationKey, phase: Phase, detail: OperationDetail) -> OperationState {
        OperationState::new(key, phase, detail, self.timing.log_capacity)
    }

    fn insert(&mut self, op: OperationState) {
        self.error = None;
        self.operations.insert(op.key().clone(), op);
    }

    /// At most one active operation per key; a finished one is replaced
    fn ensure_idle(&self, key: &OperationKey) -> Result<(), OperationError> {
        match self.operations.get(key) {
            Some(op) if op.is_active() => Err(OperationError::AlreadyActive {
                target: key.target.clone(),
                kind: key.kind.to_string(),
            }),
            _ => Ok(()),
        }
    }

    fn host_of(&self, sensor: &str) -> Result<String, OperationError> {
        let found = self
            .sensors
            .iter()
            .find(|s| s.name == sensor)
            .ok_or_else(|| OperationError::UnknownSensor(sensor.to_string()))?;
        found
            .valid_address()
            .map(str::to_string)
            .ok_or_else(|| OperationError::NoAddress(sensor.to_string()))
    }

    fn operation_mut(&mut self, key: &OperationKey) -> Option<&mut OperationState> {
        let op = self.operations.get_mut(key);
        if op.is_none() {
            tracing::debug!("Result for unknown operation {}", key);
        }
        op
    }

    fn on_tick(&mut self) {
        self.dispatch_due();
        let refresh_due = self
            .last_refresh
            .map_or(true, |at| at.elapsed() >= self.timing.refresh_interval);
        if refresh_due {
            self.start_refresh();
        }
    }

    fn start_refresh(&mut self) {
        if self.refreshing {
            self.refresh_queued = true;
            return;
        }
        self.refreshing = true;
        self.last_refresh = Some(Instant::now());
        tasks::refresh(&self.services, &self.tx);
    }

    fn run_queued_refresh(&mut self) {
        if std::mem::take(&mut self.refresh_queued) {
            self.start_refresh();
        }
    }

    fn on_inventory(&mut self, mut sensors: Vec<Sensor>, removed: Vec<String>, api_online: bool) {
        self.refreshing = false;
        self.loaded = true;
        self.load_error = None;
        self.api_online = Some(api_online);

        for sensor in &mut sensors {
            if let Some(previous) = self.sensors.iter().find(|s| s.name == sensor.name) {
                sensor.metrics = sensor.metrics.or(previous.metrics);
            }
        }
        self.sensors = sensors;
        tracing::debug!("Inventory refreshed: {} sensor(s)", self.sensors.len());

        if !removed.is_empty() {
            self.status = Some(format!("Removed {} deleted sensor(s) from inventory", removed.len()));
        }

        for sensor in self.sensors.iter().filter(|s| s.is_ready()) {
            if let Some(host) = sensor.valid_address() {
                tasks::collect_metrics(&self.services, &self.tx, sensor.name.clone(), host.to_string());
            }
        }
        self.run_queued_refresh();
    }

    fn dispatch_due(&mut self) {
        let now = Instant::now();
        let due: Vec<OperationKey> = self
            .operations
            .values()
            .filter(|op| op.is_due(now))
            .map(|op| op.key().clone())
            .collect();
        for key in due {
            self.dispatch(&key);
        }
    }

    fn dispatch(&mut self, key: &OperationKey) {
        let Some(op) = self.operations.get_mut(key) else { return };
        let step = match op.detail() {
            OperationDetail::Deploy(_) => deploy::next_step(op).map(Step::Deploy),
            OperationDetail::Upgrade(_) => upgrade::next_step(op).map(Step::Upgrade),
            OperationDetail::OneShot(_) => oneshot::next_step(op).map(Step::OneShot),
        };
        let Some(step) = step else {
            op.fail(format!("nothing to do in phase {}", op.phase()));
            return;
        };

        op.mark_dispatched();
        let key = key.clone();
        match step {
            Step::Deploy(step) => tasks::deploy_step(&self.services, &self.tx, key, step),
            Step::Upgrade(step) => tasks::upgrade_step(&self.services, &self.tx, key, step),
            Step::OneShot(step) => tasks::oneshot_step(&self.services, &self.tx, key, step),
        }
    }

    fn record_failure(&mut self, key: &OperationKey) {
        if let Some(error) = self.operations.get(key).and_then(|op| op.last_error()) {
            self.error = Some(format!("{}: {}", key, error));
        }
    }

    fn after_deploy(&mut self, key: &OperationKey, progress: Result<DeployProgress, OperationError>) {
        match progress {
            Ok(DeployProgress::Ready { sensor, address }) => {
                let completed = Event::DeployCompleted {
                    key: key.clone(),
                    sensor,
                    address,
                };
                if let Err(e) = self.tx.try_send(completed) {
                    tracing::warn!("Event queue full, completing {} inline", key);
                    self.handle(e.into_inner());
                }
            }
            Ok(DeployProgress::Failed) => self.record_failure(key),
            Ok(_) => {}
            Err(e) => tracing::error!("{}: {}", key, e),
        }
    }

    fn after_upgrade(&mut self, key: &OperationKey, progress: Result<UpgradeProgress, OperationError>) {
        match progress {
            Ok(UpgradeProgress::Succeeded(version)) => {
                self.status = Some(format!("{} upgraded to {}", short_id(&key.target), version));
                self.upgrade_info.remove(&key.target);
                self.start_refresh();
            }
            Ok(UpgradeProgress::Failed) => self.record_failure(key),
            Ok(_) => {}
            Err(e) => tracing::error!("{}: {}", key, e),
        }
    }

    fn after_oneshot(&mut self, key: &OperationKey, progress: Result<OneShotProgress, OperationError>) {
        match progress {
            Ok(OneShotProgress::Succeeded) => {
                if key.kind == OperationKind::Delete {
                    self.sensors.retain(|s| s.name != key.target);
                    self.status = Some(format!("Sensor {} deleted", short_id(&key.target)));
                    self.start_refresh();
                } else if let Some(line) = self.operations.get(key).and_then(|op| op.log().iter().last()) {
                    self.status = Some(line.message.trim_start_matches("✓ ").to_string());
                }
            }
            Ok(OneShotProgress::Rejected) | Ok(OneShotProgress::Failed) => self.record_failure(key),
            Ok(_) => {}
            Err(e) => tracing::error!("{}: {}", key, e),
        }
    }
}
