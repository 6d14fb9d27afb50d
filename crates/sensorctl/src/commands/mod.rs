//! CLI command implementations

mod config;
mod delete;
mod deploy;
mod features;
mod follow;
mod list;
mod status;
mod traffic;
mod upgrade;
mod watch;

pub use config::{config_init, config_path, config_show};
pub use delete::delete_command;
pub use deploy::deploy_command;
pub use features::{add_to_fleet_command, enable_features_command};
pub use follow::follow_operation;
pub use list::list_command;
pub use status::status_command;
pub use traffic::traffic_command;
pub use upgrade::upgrade_command;
pub use watch::watch_command;

use anyhow::Result;

use sensorctl_orchestrator::OrchestratorSnapshot;

use crate::output::print_warning;

/// Ask "Continue? [y/N]" unless `assume_yes`; anything but `y` aborts
pub(crate) fn confirm(prompt: &str, assume_yes: bool) -> Result<bool> {
    if assume_yes {
        return Ok(true);
    }

    print_warning(prompt);
    print!("Continue? [y/N] ");
    std::io::Write::flush(&mut std::io::stdout())?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;

    if !input.trim().eq_ignore_ascii_case("y") {
        print_warning("Aborted");
        return Ok(false);
    }
    Ok(true)
}

/// Resolve a full sensor name or its short ID against the inventory
pub(crate) fn resolve_sensor(snapshot: &OrchestratorSnapshot, input: &str) -> Result<String> {
    if snapshot.sensor(input).is_some() {
        return Ok(input.to_string());
    }

    let matches: Vec<&str> = snapshot
        .sensors
        .iter()
        .filter(|s| s.short_id() == input || s.name.ends_with(input))
        .map(|s| s.name.as_str())
        .collect();

    match matches.as_slice() {
        [name] => Ok(name.to_string()),
        [] => anyhow::bail!("Sensor {} is not in the inventory", input),
        _ => anyhow::bail!(
            "{} matches several sensors: {}",
            input,
            matches.join(", ")
        ),
    }
}
