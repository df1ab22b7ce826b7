use std::time::Duration;

use serde_json::Value;

use crate::error::DeployError;
use crate::exec::Executor;

const POLL_INTERVAL: Duration = Duration::from_secs(2);
const MAX_POLL_ATTEMPTS: u32 = 30;

/// Start the VM and wait (bounded) for it to report running, then make
/// one best-effort attempt to learn its primary IP from the guest agent.
///
/// Poll exhaustion is not an error: the VM may simply be slow to boot,
/// so the deployment is reported as completed with a caveat. A missing
/// IP is likewise not an error — the agent may not be up yet.
pub async fn start_and_wait<E: Executor>(
    vmid: u32,
    exec: &E,
) -> Result<Option<String>, DeployError> {
    println!("Starting VM {vmid}...");
    exec.run_checked(&format!("qm start {vmid}")).await?;

    for attempt in 1..=MAX_POLL_ATTEMPTS {
        let status = exec.run(&format!("qm status {vmid}")).await?;
        if status.success() && status.stdout.contains("running") {
            tracing::info!(attempt, "VM reported running");
            return Ok(guest_ip(vmid, exec).await);
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }

    tracing::warn!(
        vmid,
        attempts = MAX_POLL_ATTEMPTS,
        "VM did not report running in time; it may still be booting"
    );
    Ok(None)
}

/// Best-effort guest-agent query for the primary IPv4 address.
async fn guest_ip<E: Executor>(vmid: u32, exec: &E) -> Option<String> {
    let output = exec
        .run(&format!("qm guest cmd {vmid} network-get-interfaces"))
        .await
        .ok()?;
    if !output.success() {
        tracing::warn!("guest agent not responsive yet, IP unknown");
        return None;
    }
    parse_guest_ip(&output.stdout)
}

/// Pick the first non-loopback IPv4 out of a `network-get-interfaces`
/// response. Tolerates both the bare array and a `{"result": [...]}`
/// wrapper.
fn parse_guest_ip(json: &str) -> Option<String> {
    let value: Value = serde_json::from_str(json).ok()?;
    let interfaces = match &value {
        Value::Object(obj) => obj.get("result")?.as_array()?,
        Value::Array(arr) => arr,
        _ => return None,
    };

    for iface in interfaces {
        if iface.get("name").and_then(Value::as_str) == Some("lo") {
            continue;
        }
        let Some(addresses) = iface.get("ip-addresses").and_then(Value::as_array) else {
            continue;
        };
        for addr in addresses {
            if addr.get("ip-address-type").and_then(Value::as_str) == Some("ipv4")
                && let Some(ip) = addr.get("ip-address").and_then(Value::as_str)
            {
                return Some(ip.to_string());
            }
        }
    }
    None
}
