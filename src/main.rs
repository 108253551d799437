//! tintd: electrochromic panel tint-control daemon.
//!
//! Wires the configured device backend to the control service and runs the
//! confirmation reconcile loop. Command submission happens through the
//! library API (embedding routes or a UI on top is the caller's business).

use std::time::Duration;

use anyhow::Context;
use log::{info, warn};

use tintd::adapters::{remote, JsonFileStore, RemoteBackend, SimulatedBackend, WallClock};
use tintd::app::ports::{Clock, DeviceBackend, SnapshotStore};
use tintd::app::service::ControlService;
use tintd::audit::AuditLog;
use tintd::config::{Mode, ServiceConfig};
use tintd::registry::PanelRegistry;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ServiceConfig::from_env().context("loading configuration")?;
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating data dir {}", config.data_dir.display()))?;
    info!("tintd starting in {:?} mode", config.mode);

    let store = JsonFileStore::new(config.panels_state_file());
    let mut registry = PanelRegistry::from_store(&store).context("loading panel state")?;
    if registry.bootstrap_default_if_empty() {
        store
            .save(registry.snapshot_data())
            .context("persisting seeded panel state")?;
        info!("seeded default installation ({} panels)", registry.panels().len());
    }

    let audit = AuditLog::open(config.audit_file());
    let clock = WallClock;

    match config.mode {
        Mode::Sim => {
            let backend = SimulatedBackend::with_persistence(config.sim_state_file(), config.settle())
                .context("loading simulator state")?;
            backend.seed_missing(registry.snapshot_data());
            let service = ControlService::new(config, registry, audit, store);
            run(&service, &backend, &clock)
        }
        Mode::Real => {
            let mapping = remote::mapping_from_file(&config.window_mapping_file())
                .context("loading window mapping")?;
            if mapping.is_empty() {
                warn!("window mapping is empty; every remote command will fail with NotFound");
            }
            let backend =
                RemoteBackend::new(&config, mapping).context("building remote backend")?;
            let service = ControlService::new(config, registry, audit, store);
            run(&service, &backend, &clock)
        }
    }
}

/// Reconcile loop: poll unconfirmed changes until the process is stopped.
fn run<S: SnapshotStore>(
    service: &ControlService<S>,
    backend: &impl DeviceBackend,
    clock: &impl Clock,
) -> ! {
    let interval = Duration::from_secs(service.config().reconcile_interval_secs);
    info!("reconcile loop running every {interval:?}");
    loop {
        let finalized = service.reconcile(backend, clock);
        if finalized > 0 {
            info!("reconcile: finalized {finalized} pending change(s)");
        }
        std::thread::sleep(interval);
    }
}
