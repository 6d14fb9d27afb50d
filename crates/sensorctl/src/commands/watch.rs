//! Live dashboard of sensors and operations

use anyhow::Result;
use crossterm::cursor::MoveTo;
use crossterm::terminal::{Clear, ClearType};

use sensorctl_orchestrator::{OrchestratorHandle, OrchestratorSnapshot};

use crate::output::{format_operations, format_sensors, print_error, print_info};

fn render(snapshot: &OrchestratorSnapshot) -> Result<()> {
    let mut stdout = std::io::stdout();
    crossterm::execute!(stdout, Clear(ClearType::All), MoveTo(0, 0))?;

    println!("{}", format_sensors(&snapshot.sensors, false));
    println!();
    println!("{}", format_operations(snapshot.visible_operations()));
    println!();
    if snapshot.refreshing {
        print_info("Refreshing inventory...");
    } else if let Some(status) = &snapshot.status {
        print_info(status);
    }
    if let Some(error) = &snapshot.error {
        print_error(error);
    }
    println!("Press Ctrl-C to exit");
    Ok(())
}

/// Execute the watch command: redraw on every snapshot until Ctrl-C
pub async fn watch_command(handle: &OrchestratorHandle) -> Result<()> {
    let mut rx = handle.subscribe();

    loop {
        let snapshot = rx.borrow_and_update().clone();
        render(&snapshot)?;

        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    anyhow::bail!("Orchestrator stopped");
                }
            }
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }
}
