//! Remote command strings and the textual contracts of their output
//!
//! Commands are opaque to the gateway. Success is decided here by looking for
//! sentinel markers (`=== CONFIG_SET_OK ===` and friends) rather than by
//! understanding what the scripts do.

/// Sensor-local management API address used by `corelight-client`
const CLIENT_BIND: &str = "192.0.2.1:30443";

/// Trivial command proving the SSH service answers
pub const SERVICE_CHECK: &str = "echo ok";

/// Prints the seeding flag; `1` once seeding has finished
pub const SEEDED_QUERY: &str = "sudo /opt/broala/bin/broala-config get system.seeded 2>&1";

/// Admin credential lookups, most specific first
pub const ADMIN_PASSWORD_QUERIES: [&str; 2] = [
    "sudo grep -A5 'api:' /etc/corelight/corelightctl.yaml 2>/dev/null | grep password | awk '{print $2}'",
    "sudo grep 'password:' /etc/corelight/corelightctl.yaml 2>/dev/null | awk '{print $2}'",
];

/// Version query that needs no credential
pub const VERSION_FALLBACK: &str =
    "sudo corelightctl version 2>/dev/null | jq -r '.version // \"unknown\"'";

pub const RELEASE_CHANNEL_QUERY: &str =
    "sudo grep 'release_channel:' /etc/corelight/corelightctl.yaml 2>/dev/null | awk '{print $2}'";

/// `corelight-client` refuses to run when its cache dir belongs to root
pub const FIX_CLIENT_CACHE: &str =
    "mkdir -p ~/.corelight-client && sudo chown -R $(whoami) ~/.corelight-client 2>/dev/null";

/// Prints a pid if any package or update tooling is running
pub const UPGRADE_PROCESS_CHECK: &str =
    "pgrep -f 'dpkg|apt|update-system|corelight.*update|broala-update' 2>/dev/null | head -1";

/// Prints `cpu|mem|disk|pods`
pub const METRICS: &str = r#"cpu=$(awk "/^cpu / {printf \"%.0f\", (\$2+\$4)*100/(\$2+\$4+\$5)}" /proc/stat 2>/dev/null || echo "0"); \
mem=$(free 2>/dev/null | awk "/Mem:/ {printf \"%.0f\", \$3/\$2*100}" || echo "0"); \
disk=$(df / 2>/dev/null | awk "NR==2 {gsub(/%/,\"\"); print \$5}" || echo "0"); \
pods=$(sudo corelightctl sensor status 2>/dev/null | grep -c "Ok" || sudo kubectl get pods --all-namespaces 2>/dev/null | grep -c Running || echo "0"); \
echo "${cpu}|${mem}|${disk}|${pods}""#;

/// Enables the licensed features, then applies configuration.
///
/// Prints `CONFIG_SET_OK|FAILED` followed by
/// `APPLY_CONFIG_OK|FAILED|SKIPPED`.
pub const ENABLE_FEATURES: &str = r#"set +u
echo "=== Setting feature configuration ==="
FAILED=0
for key in http.access license.yara license.suricata license.smartpcap corelight.yara suricata smartpcap; do
    echo "Running: broala-config set ${key}.enable=1"
    if sudo /opt/broala/bin/broala-config set "${key}.enable=1" 2>&1; then
        echo "OK"
    else
        echo "FAILED"
        FAILED=1
    fi
done

if [ "$FAILED" = "1" ]; then
    echo "=== CONFIG_SET_FAILED ==="
else
    echo "=== CONFIG_SET_OK ==="
fi

echo "=== Applying configuration ==="
ADMIN_PASSWORD=$(sudo grep "password:" /etc/corelight/corelightctl.yaml | awk "{print \$2}")
if [ -z "$ADMIN_PASSWORD" ]; then
    echo "Warning: Could not read admin password"
    echo "=== APPLY_CONFIG_SKIPPED ==="
    exit 0
fi

WRAPPER_DIR="/tmp/corelight-wrapper-$$"
mkdir -p "$WRAPPER_DIR"
cat > "$WRAPPER_DIR/corelight-client" << 'WRAPPER'
#!/bin/bash
ARGS=()
for arg in "$@"; do
    if [[ "$arg" != --dynamic_backfill* ]]; then
        ARGS+=("$arg")
    fi
done
WRAPPER
echo "exec /usr/bin/corelight-client --ssl-no-verify-certificate -u admin -p $ADMIN_PASSWORD \"\${ARGS[@]}\"" >> "$WRAPPER_DIR/corelight-client"
chmod +x "$WRAPPER_DIR/corelight-client"
export PATH="$WRAPPER_DIR:$PATH"

if sudo -E LC_ALL=en_US.utf8 LANG=en_US.utf8 PATH="$PATH" /opt/broala/bin/broala-apply-config -q 2>&1; then
    rm -rf "$WRAPPER_DIR" 2>/dev/null
    echo "=== APPLY_CONFIG_OK ==="
else
    rm -rf "$WRAPPER_DIR" 2>/dev/null
    echo "=== APPLY_CONFIG_FAILED ==="
fi"#;

/// Installs the traffic generator under /tmp
pub const TRAFFIC_INSTALL: &str = r#"echo "Configuring traffic generator..."
cat > /tmp/simple_traffic_generator.py << 'SCRIPT'
#!/usr/bin/env python3
import socket
import time
import argparse
import random
import string

def generate_payload(size=100):
    return ''.join(random.choices(string.ascii_letters + string.digits, k=size)).encode()

def main():
    parser = argparse.ArgumentParser(description='Simple traffic generator')
    parser.add_argument('-t', '--target', required=True, help='Target IP')
    parser.add_argument('-p', '--port', type=int, default=5555, help='Target port')
    parser.add_argument('--protocol', default='udp', choices=['udp', 'tcp'], help='Protocol')
    parser.add_argument('-r', '--rate', type=int, default=1000, help='Packets per second')
    parser.add_argument('-D', '--duration', type=int, default=60, help='Duration in seconds')
    args = parser.parse_args()

    print(f"Starting {args.protocol.upper()} traffic to {args.target}:{args.port}")
    print(f"Rate: {args.rate} pps, Duration: {args.duration}s")

    if args.protocol == 'udp':
        sock = socket.socket(socket.AF_INET, socket.SOCK_DGRAM)
    else:
        sock = socket.socket(socket.AF_INET, socket.SOCK_STREAM)
        sock.connect((args.target, args.port))

    start = time.time()
    count = 0
    interval = 1.0 / args.rate

    while time.time() - start < args.duration:
        payload = generate_payload()
        try:
            if args.protocol == 'udp':
                sock.sendto(payload, (args.target, args.port))
            else:
                sock.send(payload)
            count += 1
        except Exception as e:
            print(f"Error: {e}")
            break
        time.sleep(interval)

    print(f"Sent {count} packets in {time.time() - start:.1f}s")
    sock.close()

if __name__ == '__main__':
    main()
SCRIPT
chmod +x /tmp/simple_traffic_generator.py
echo "Traffic generator installed at /tmp/simple_traffic_generator.py""#;

pub const TRAFFIC_STOP: &str = "sudo pkill -f simple_traffic_generator.py 2>/dev/null || true";

/// Prints the generator's process line, or nothing when idle
pub const TRAFFIC_STATUS: &str = "ps aux | grep simple_traffic_generator | grep -v grep | head -1";

/// Duration passed to the generator for "run until stopped"
pub const CONTINUOUS_DURATION_SECS: u32 = 999_999;

/// Invoke the sensor's management client as admin
pub fn client_command(admin_password: &str, args: &str) -> String {
    format!(
        "corelight-client -b {} --ssl-no-verify-certificate -u admin -p {} {}",
        CLIENT_BIND, admin_password, args
    )
}

pub fn version_query(admin_password: &str) -> String {
    format!(
        "{} 2>&1 | grep -i version | head -1 | awk '{{print $NF}}'",
        client_command(admin_password, "information get")
    )
}

pub fn updates_list(admin_password: &str) -> String {
    format!("{} 2>&1", client_command(admin_password, "updates list"))
}

pub fn updates_apply(admin_password: &str) -> String {
    format!("{} 2>&1", client_command(admin_password, "updates apply"))
}

/// Switch package repository and install an explicit version
pub fn repository_upgrade(repository: &str, version: &str) -> String {
    format!(
        "sudo broala-update-repository -r {} -R -U {} 2>&1",
        repository, version
    )
}

/// Point the sensor at a fleet manager; prints `FLEET_CONFIG_OK|FAILED`
pub fn fleet_registration(address: &str, port: u16) -> String {
    format!(
        r#"echo "Adding sensor to fleet manager..."
ADMIN_PASSWORD=$(sudo grep "password:" /etc/corelight/corelightctl.yaml | awk "{{print \$2}}")
if [ -z "$ADMIN_PASSWORD" ]; then
    echo "Error: Could not read admin password"
    echo "=== FLEET_CONFIG_FAILED ==="
    exit 0
fi

echo "Configuring fleet manager connection to {address}:{port}..."
if sudo corelight-client -b {bind} --ssl-no-verify-certificate -u admin -p "$ADMIN_PASSWORD" \
    fleet-manager set --address "{address}" --port "{port}" --enabled true 2>&1; then
    echo "Sensor should now appear in fleet manager at https://{address}"
    echo "=== FLEET_CONFIG_OK ==="
else
    echo "=== FLEET_CONFIG_FAILED ==="
fi"#,
        address = address,
        port = port,
        bind = CLIENT_BIND,
    )
}

/// Launch the generator in the background; a zero duration runs until stopped
pub fn traffic_start(target: &str, port: u16, protocol: &str, rate: u32, duration_secs: u32) -> String {
    let duration = if duration_secs == 0 {
        CONTINUOUS_DURATION_SECS
    } else {
        duration_secs
    };
    format!(
        "cd /tmp && nohup python3 simple_traffic_generator.py -t {} -p {} --protocol {} -r {} -D {} > /tmp/traffic.log 2>&1 &",
        target, port, protocol, rate, duration
    )
}

/// Package repository serving a release channel
pub fn repository_for_channel(channel: &str) -> &'static str {
    match channel.trim() {
        "dev" | "development" => "brolin-development",
        "release" | "stable" => "brolin-release",
        _ => "brolin-testing",
    }
}

/// Versions offered by `updates list`, excluding the installed one.
///
/// Installed entries are prefixed with `*`; only entries whose text after
/// `version` starts with a digit are kept.
pub fn parse_available_updates(output: &str) -> Vec<String> {
    if output.contains("No entries") {
        return Vec::new();
    }

    output
        .lines()
        .filter(|line| !line.starts_with('*'))
        .map(str::trim)
        .filter(|line| line.contains("version:") || line.contains("version "))
        .filter_map(|line| {
            let idx = line.find("version")?;
            let rest = line[idx + "version".len()..].trim();
            let rest = rest.strip_prefix(':').unwrap_or(rest).trim();
            rest.starts_with(|c: char| c.is_ascii_digit())
                .then(|| rest.to_string())
        })
        .collect()
}

/// Output contract of `updates apply`
pub fn upgrade_apply_succeeded(output: &str) -> bool {
    output.contains("success") || output.contains("True")
}

pub fn fleet_succeeded(output: &str) -> bool {
    output.contains("=== FLEET_CONFIG_OK ===")
}

/// What the feature-enable script reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureOutcome {
    /// Configuration set and applied
    Applied,
    /// Configuration set, apply skipped for lack of a credential
    ApplySkipped,
    /// Configuration set, apply failed
    ApplyFailed,
    /// Setting the configuration failed
    ConfigFailed,
}

impl FeatureOutcome {
    pub fn from_output(output: &str) -> Self {
        let config_set = output.contains("=== CONFIG_SET_OK ===");
        if !config_set {
            FeatureOutcome::ConfigFailed
        } else if output.contains("=== APPLY_CONFIG_OK ===") {
            FeatureOutcome::Applied
        } else if output.contains("=== APPLY_CONFIG_SKIPPED ===") {
            FeatureOutcome::ApplySkipped
        } else {
            FeatureOutcome::ApplyFailed
        }
    }

    pub fn is_success(self) -> bool {
        self == FeatureOutcome::Applied
    }

    pub fn message(self) -> &'static str {
        match self {
            FeatureOutcome::Applied => "Features enabled and configuration applied successfully",
            FeatureOutcome::ApplySkipped => {
                "Features configured but apply-config was skipped (restart sensor to apply)"
            }
            FeatureOutcome::ApplyFailed => "Features configured but apply-config failed",
            FeatureOutcome::ConfigFailed => "Failed to set feature configuration",
        }
    }
}
