//! Time utilities for sensorctl

use std::time::Duration;

/// Format an elapsed duration for operation logs: `30s`, `1m30s`, `2m`, `1h5m`.
///
/// # Examples
/// ```
/// use std::time::Duration;
/// use sensorctl_core::time::format_elapsed;
///
/// assert_eq!(format_elapsed(Duration::from_secs(90)), "1m30s");
/// ```
pub fn format_elapsed(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        let mins = secs / 60;
        let rem = secs % 60;
        if rem == 0 {
            format!("{}m", mins)
        } else {
            format!("{}m{}s", mins, rem)
        }
    } else {
        format!("{}h{}m", secs / 3600, (secs % 3600) / 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(Duration::from_secs(0)), "0s");
        assert_eq!(format_elapsed(Duration::from_secs(59)), "59s");
        assert_eq!(format_elapsed(Duration::from_secs(120)), "2m");
        assert_eq!(format_elapsed(Duration::from_secs(125)), "2m5s");
        assert_eq!(format_elapsed(Duration::from_secs(3900)), "1h5m");
    }

    #[test]
    fn test_format_elapsed_ignores_subsecond() {
        assert_eq!(format_elapsed(Duration::from_millis(1999)), "1s");
    }
}
