//! Follow an operation's log until it finishes

use anyhow::Result;

use sensorctl_orchestrator::operation::{LogEntry, OperationKey};
use sensorctl_orchestrator::snapshot::OperationView;
use sensorctl_orchestrator::OrchestratorHandle;

use crate::output::{print_error, print_success, print_warning};

/// Entries of `log` after `last`, or the whole log if `last` has rolled off
fn unseen<'a>(log: &'a [LogEntry], last: Option<&LogEntry>) -> &'a [LogEntry] {
    match last.and_then(|last| log.iter().rposition(|entry| entry == last)) {
        Some(pos) => &log[pos + 1..],
        None => log,
    }
}

/// Print new log lines as they appear until the operation is terminal, or
/// until `stop_when` says following is no longer needed.
///
/// Ctrl-C dismisses the operation and returns.
pub async fn follow_until<F>(
    handle: &OrchestratorHandle,
    key: &OperationKey,
    stop_when: F,
) -> Result<Option<OperationView>>
where
    F: Fn(&OperationView) -> bool,
{
    let mut rx = handle.subscribe();
    let mut last: Option<LogEntry> = None;

    loop {
        let view = rx.borrow_and_update().operation(key).cloned();
        let Some(view) = view else {
            anyhow::bail!("Operation {} disappeared", key);
        };

        for entry in unseen(&view.log, last.as_ref()) {
            println!("{}", entry);
        }
        last = view.log.last().cloned().or(last);

        if !view.active || stop_when(&view) {
            return Ok(Some(view));
        }

        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    anyhow::bail!("Orchestrator stopped while {} was running", key);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                handle.dismiss(key.clone()).await?;
                println!();
                print_warning(&format!("Stopped following {}", key));
                return Ok(None);
            }
        }
    }
}

/// Follow `key` to completion and report the outcome
pub async fn follow_operation(handle: &OrchestratorHandle, key: &OperationKey) -> Result<()> {
    let Some(view) = follow_until(handle, key, |_| false).await? else {
        return Ok(());
    };

    if view.succeeded() {
        print_success(&format!("{} finished", key));
        Ok(())
    } else {
        let error = view
            .last_error
            .unwrap_or_else(|| format!("ended in phase {}", view.phase));
        print_error(&format!("{} failed: {}", key, error));
        anyhow::bail!("{} failed", key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn entry(secs: u64, message: &str) -> LogEntry {
        LogEntry {
            elapsed: Duration::from_secs(secs),
            message: message.to_string(),
        }
    }

    #[test]
    fn test_unseen_after_last_printed() {
        let log = vec![entry(0, "a"), entry(5, "b"), entry(9, "c")];
        assert_eq!(unseen(&log, None).len(), 3);
        assert_eq!(unseen(&log, Some(&entry(5, "b"))), &log[2..]);
        assert!(unseen(&log, Some(&entry(9, "c"))).is_empty());
    }

    #[test]
    fn test_unseen_when_last_rolled_off() {
        let log = vec![entry(30, "x"), entry(40, "y")];
        assert_eq!(unseen(&log, Some(&entry(1, "gone"))).len(), 2);
    }
}
