//! Output formatting utilities for the CLI
//!
//! Tables for sensors and operations, the status summary, and the coloured
//! one-line messages every command uses.

use tabled::{
    settings::{Style, Width},
    Table, Tabled,
};

use sensorctl_core::time::format_elapsed;
use sensorctl_core::types::short_id;
use sensorctl_core::Sensor;
use sensorctl_orchestrator::operation::UpgradeInfo;
use sensorctl_orchestrator::snapshot::OperationView;
use sensorctl_orchestrator::OrchestratorSnapshot;

/// Format the sensor inventory as a table
///
/// The detailed view adds branch, stack and creation time, and wraps to
/// fit a terminal.
pub fn format_sensors(sensors: &[Sensor], detailed: bool) -> String {
    if sensors.is_empty() {
        return "No sensors in inventory".to_string();
    }

    #[derive(Tabled)]
    struct SensorRow {
        #[tabled(rename = "ID")]
        id: String,
        #[tabled(rename = "ADDRESS")]
        address: String,
        #[tabled(rename = "STATUS")]
        status: String,
        #[tabled(rename = "VERSION")]
        version: String,
        #[tabled(rename = "CPU/MEM/DISK")]
        usage: String,
        #[tabled(rename = "PODS")]
        pods: String,
    }

    #[derive(Tabled)]
    struct SensorRowDetailed {
        #[tabled(rename = "NAME")]
        name: String,
        #[tabled(rename = "ADDRESS")]
        address: String,
        #[tabled(rename = "STATUS")]
        status: String,
        #[tabled(rename = "VERSION")]
        version: String,
        #[tabled(rename = "BRANCH")]
        branch: String,
        #[tabled(rename = "STACK")]
        stack: String,
        #[tabled(rename = "CPU/MEM/DISK")]
        usage: String,
        #[tabled(rename = "PODS")]
        pods: String,
        #[tabled(rename = "CREATED")]
        created: String,
    }

    if detailed {
        let rows: Vec<SensorRowDetailed> = sensors
            .iter()
            .map(|s| SensorRowDetailed {
                name: s.name.clone(),
                address: dash(s.valid_address()),
                status: s.status.to_string(),
                version: dash(s.version.as_deref()),
                branch: dash(s.dev_branch.as_deref()),
                stack: truncate(s.stack_name.as_deref().unwrap_or("-"), 24),
                usage: format_usage(s),
                pods: s
                    .metrics
                    .map(|m| m.pods.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                created: dash(s.created_at.as_deref()),
            })
            .collect();

        Table::new(rows)
            .with(Style::rounded())
            .with(Width::wrap(120))
            .to_string()
    } else {
        let rows: Vec<SensorRow> = sensors
            .iter()
            .map(|s| SensorRow {
                id: s.short_id().to_string(),
                address: dash(s.valid_address()),
                status: s.status.to_string(),
                version: dash(s.version.as_deref()),
                usage: format_usage(s),
                pods: s
                    .metrics
                    .map(|m| m.pods.to_string())
                    .unwrap_or_else(|| "-".to_string()),
            })
            .collect();

        Table::new(rows).with(Style::rounded()).to_string()
    }
}

/// Format operations as a table, in the order the loop reports them
pub fn format_operations<'a>(operations: impl IntoIterator<Item = &'a OperationView>) -> String {
    #[derive(Tabled)]
    struct OperationRow {
        #[tabled(rename = "OPERATION")]
        kind: String,
        #[tabled(rename = "SENSOR")]
        sensor: String,
        #[tabled(rename = "PHASE")]
        phase: String,
        #[tabled(rename = "ELAPSED")]
        elapsed: String,
        #[tabled(rename = "LAST")]
        last: String,
    }

    let rows: Vec<OperationRow> = operations
        .into_iter()
        .map(|op| OperationRow {
            kind: op.key.kind.to_string(),
            sensor: short_id(&op.key.target).to_string(),
            phase: if op.detached {
                format!("{} (dismissed)", op.phase)
            } else {
                op.phase.to_string()
            },
            elapsed: format_elapsed(op.elapsed),
            last: op
                .log
                .last()
                .map(|entry| truncate(&entry.message, 60))
                .unwrap_or_default(),
        })
        .collect();

    if rows.is_empty() {
        return "No operations".to_string();
    }

    Table::new(rows)
        .with(Style::rounded())
        .with(Width::wrap(120))
        .to_string()
}

/// Summary of API connectivity, inventory health and operations
pub fn format_status(snapshot: &OrchestratorSnapshot) -> String {
    let mut output = String::new();

    output.push_str(&format!(
        "Control-plane API: {}\n",
        match snapshot.api_online {
            Some(true) => "online",
            Some(false) => "offline",
            None => "unknown",
        }
    ));
    output.push_str(&format!("Sensors: {}\n", snapshot.sensors.len()));
    output.push_str(&format!(
        "Ready: {}\n",
        snapshot.sensors.iter().filter(|s| s.is_ready()).count()
    ));
    output.push_str(&format!("Active operations: {}\n", snapshot.active_count()));

    if let Some(status) = &snapshot.status {
        output.push_str(&format!("Last status: {}\n", status));
    }
    if let Some(error) = &snapshot.error {
        output.push_str(&format!("Last error: {}\n", error));
    }

    output
}

/// Upgrade facts shown before the user confirms
pub fn format_upgrade_info(info: &UpgradeInfo) -> String {
    let mut output = String::new();
    output.push_str(&format!("Sensor: {}\n", info.sensor));
    output.push_str(&format!("Current version: {}\n", info.current_version));
    output.push_str(&format!("Release channel: {}\n", info.release_channel));
    output.push_str(&format!("Repository: {}\n", info.repository()));
    if info.has_updates() {
        output.push_str("Available updates:\n");
        for version in &info.available {
            output.push_str(&format!("  - {}\n", version));
        }
    } else {
        output.push_str("Available updates: none\n");
    }
    output
}

fn format_usage(sensor: &Sensor) -> String {
    match sensor.metrics {
        Some(m) => format!("{}%/{}%/{}%", m.cpu, m.memory, m.disk),
        None => "-".to_string(),
    }
}

fn dash(value: Option<&str>) -> String {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => "-".to_string(),
    }
}

/// Truncate a string with ellipsis if too long
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Print a success message in green with a checkmark prefix
pub fn print_success(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Green),
        Print("✓ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an error message in red with an X prefix, to stderr
pub fn print_error(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Red),
        Print("✗ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print a warning message in yellow, to stderr
pub fn print_warning(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Yellow),
        Print("⚠ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

pub fn print_info(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Cyan),
        Print("ℹ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}
