//! Asynchronous work dispatched by the loop
//!
//! Each function spawns one task that performs I/O and reports back with a
//! single [`Event`]. Nothing here touches orchestrator state.

use std::future::Future;

use futures::future::join_all;
use tokio::sync::mpsc;

use crate::control_plane::CreateRequest;
use crate::event::Event;
use crate::operation::deploy::DeployStep;
use crate::operation::oneshot::{ActionFailure, OneShotStep, Precondition};
use crate::operation::upgrade::{self, UpgradeStep};
use crate::operation::{DeployProbe, OperationKey};
use crate::orchestrator::Services;
use crate::probe::{self, ProbeResult};
use crate::remote::scripts;

fn spawn_event<F>(tx: &mpsc::Sender<Event>, work: F)
where
    F: Future<Output = Event> + Send + 'static,
{
    let tx = tx.clone();
    tokio::spawn(async move {
        let event = work.await;
        let name = event.name();
        if tx.send(event).await.is_err() {
            tracing::debug!("Orchestrator stopped, dropping {} result", name);
        }
    });
}

/// Re-read the inventory file and fetch every sensor in it
pub(crate) fn refresh(services: &Services, tx: &mpsc::Sender<Event>) {
    let services = services.clone();
    spawn_event(tx, async move {
        let names = match services.inventory.read_sorted().await {
            Ok(names) => names,
            Err(e) => return Event::InventoryFailed { error: e.to_string() },
        };

        let fetches = names.iter().map(|name| services.control_plane.fetch(name));
        let results = join_all(fetches).await;

        let mut sensors = Vec::with_capacity(names.len());
        let mut removed = Vec::new();
        for (name, result) in names.iter().zip(results) {
            match result {
                Ok(sensor) if sensor.is_deleted() => removed.push(name.clone()),
                Ok(sensor) => sensors.push(sensor),
                Err(e) => tracing::warn!("Skipping sensor {}: {}", name, e),
            }
        }

        if !removed.is_empty() {
            let _guard = services.inventory_lock().lock().await;
            for name in &removed {
                match services.inventory.remove(name).await {
                    Ok(_) => tracing::info!("Removed deleted sensor {} from inventory", name),
                    Err(e) => tracing::warn!("Failed to remove {} from inventory: {}", name, e),
                }
            }
        }

        let api_online = services.control_plane.ping().await;
        Event::InventoryLoaded {
            sensors,
            removed,
            api_online,
        }
    });
}

/// Collect resource usage from one sensor
pub(crate) fn collect_metrics(services: &Services, tx: &mpsc::Sender<Event>, sensor: String, host: String) {
    let remote = services.remote.clone();
    spawn_event(tx, async move {
        let metrics = match remote.run(&host, scripts::METRICS).await {
            Ok(output) => sensorctl_core::SensorMetrics::parse(&output)
                .ok_or_else(|| format!("unparseable metrics output {:?}", output.trim())),
            Err(e) => Err(e.to_string()),
        };
        Event::MetricsCollected { sensor, metrics }
    });
}

/// Provision a sensor and record it in the inventory file
fn create(services: &Services, tx: &mpsc::Sender<Event>, key: OperationKey, request: CreateRequest) {
    let services = services.clone();
    spawn_event(tx, async move {
        let result = match services.control_plane.create(&request).await {
            Ok(name) => {
                let _guard = services.inventory_lock().lock().await;
                if let Err(e) = services.inventory.add(&name).await {
                    tracing::warn!("Created {} but could not record it: {}", name, e);
                }
                Ok(name)
            }
            Err(e) => Err(e.to_string()),
        };
        Event::DeployCreated { key, result }
    });
}

pub(crate) fn deploy_step(services: &Services, tx: &mpsc::Sender<Event>, key: OperationKey, step: DeployStep) {
    tracing::debug!("{}: dispatching {:?}", key, step);
    let services = services.clone();
    match step {
        DeployStep::Create(request) => create(&services, tx, key, request),
        DeployStep::FetchInventory { sensor } => spawn_event(tx, async move {
            let result = probe::inventory_running(services.control_plane.as_ref(), &sensor).await;
            Event::DeployProbed {
                key,
                probe: DeployProbe::Inventory(result),
            }
        }),
        DeployStep::ProbePort { host } => spawn_event(tx, async move {
            let result = probe::port_reachable(services.remote.as_ref(), &host).await;
            Event::DeployProbed {
                key,
                probe: DeployProbe::Port(result),
            }
        }),
        DeployStep::ProbeService { host } => spawn_event(tx, async move {
            let result = probe::service_ready(services.remote.as_ref(), &host).await;
            Event::DeployProbed {
                key,
                probe: DeployProbe::Service(result),
            }
        }),
        DeployStep::ProbeSeeded { host } => spawn_event(tx, async move {
            let result = probe::seeded(services.remote.as_ref(), &host).await;
            Event::DeployProbed {
                key,
                probe: DeployProbe::Seeded(result),
            }
        }),
    }
}

pub(crate) fn load_upgrade_info(services: &Services, tx: &mpsc::Sender<Event>, sensor: String, host: String) {
    let remote = services.remote.clone();
    spawn_event(tx, async move {
        let result = upgrade::load_info(remote.as_ref(), &sensor, &host).await;
        Event::UpgradeInfoLoaded { sensor, result }
    });
}

pub(crate) fn upgrade_step(services: &Services, tx: &mpsc::Sender<Event>, key: OperationKey, step: UpgradeStep) {
    let remote = services.remote.clone();
    match step {
        UpgradeStep::Launch { host, command, latest } => spawn_event(tx, async move {
            let result = match command {
                Ok(command) => match remote.run(&host, &command).await {
                    Ok(output) if latest && !scripts::upgrade_apply_succeeded(&output) => {
                        Err(format!("update service did not report success: {}", output.trim()))
                    }
                    Ok(_) => Ok(()),
                    Err(e) => Err(e.to_string()),
                },
                Err(e) => Err(e),
            };
            Event::UpgradeLaunched { key, result }
        }),
        UpgradeStep::Check {
            host,
            admin_password,
            previous,
        } => spawn_event(tx, async move {
            let observation = upgrade::observe(remote.as_ref(), &host, &admin_password, &previous).await;
            Event::UpgradeObserved { key, observation }
        }),
    }
}

pub(crate) fn oneshot_step(services: &Services, tx: &mpsc::Sender<Event>, key: OperationKey, step: OneShotStep) {
    let services = services.clone();
    match step {
        OneShotStep::CheckPrecondition { host, precondition } => spawn_event(tx, async move {
            let remote = services.remote.as_ref();
            let result = match precondition {
                Precondition::Seeded => probe::seeded(remote, &host).await,
                Precondition::ServiceReady => probe::service_ready(remote, &host).await,
                Precondition::None => ProbeResult::Satisfied(()),
            };
            Event::PreconditionChecked { key, result }
        }),
        OneShotStep::RunCommand { host, command } => spawn_event(tx, async move {
            let result = services.remote.run(&host, &command).await.map_err(|e| ActionFailure {
                error: e.to_string(),
                output: e.output().map(str::to_string),
            });
            Event::OneShotFinished { key, result }
        }),
        OneShotStep::DeleteSensor { sensor } => spawn_event(tx, async move {
            let result = match services.control_plane.delete(&sensor).await {
                Ok(()) => {
                    let _guard = services.inventory_lock().lock().await;
                    if let Err(e) = services.inventory.remove(&sensor).await {
                        tracing::warn!("Deleted {} but could not update inventory: {}", sensor, e);
                    }
                    Ok(String::new())
                }
                Err(e) => Err(ActionFailure::new(format!("Failed to delete sensor: {}", e))),
            };
            Event::OneShotFinished { key, result }
        }),
    }
}
