//! Binding the bridge port, reclaiming it from a stale process if needed

use quill_core::{QuillError, Result};
use std::io::ErrorKind;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::process::Command;
use tracing::{info, warn};

/// Grace period between killing the holder and retrying the bind
const RECLAIM_SETTLE: Duration = Duration::from_millis(500);

/// Bind `host:port`
///
/// When the port is taken and `reclaim` is set, the processes listening on
/// it are terminated and the bind is retried once.
pub async fn bind_with_reclaim(host: &str, port: u16, reclaim: bool) -> Result<TcpListener> {
    let addr = format!("{}:{}", host, port);
    match TcpListener::bind(&addr).await {
        Ok(listener) => return Ok(listener),
        Err(e) if e.kind() == ErrorKind::AddrInUse => {
            if !reclaim {
                return Err(QuillError::PortInUse(port));
            }
        }
        Err(e) => return Err(e.into()),
    }

    let pids = holders(port).await;
    if pids.is_empty() {
        warn!("Port {} is in use but no owning process was found", port);
        return Err(QuillError::PortInUse(port));
    }
    for pid in &pids {
        warn!("Terminating process {} holding port {}", pid, port);
        if let Err(e) = terminate(*pid).await {
            warn!("Failed to terminate {}: {}", pid, e);
        }
    }

    tokio::time::sleep(RECLAIM_SETTLE).await;
    match TcpListener::bind(&addr).await {
        Ok(listener) => {
            info!("Reclaimed port {}", port);
            Ok(listener)
        }
        Err(e) if e.kind() == ErrorKind::AddrInUse => Err(QuillError::PortInUse(port)),
        Err(e) => Err(e.into()),
    }
}

#[cfg(not(windows))]
async fn holders(port: u16) -> Vec<u32> {
    match Command::new("lsof")
        .args(["-ti", &format!("tcp:{}", port)])
        .output()
        .await
    {
        Ok(output) => parse_lsof(&String::from_utf8_lossy(&output.stdout), std::process::id()),
        Err(e) => {
            warn!("lsof unavailable: {}", e);
            Vec::new()
        }
    }
}

#[cfg(windows)]
async fn holders(port: u16) -> Vec<u32> {
    match Command::new("netstat").args(["-ano"]).output().await {
        Ok(output) => parse_netstat(
            &String::from_utf8_lossy(&output.stdout),
            port,
            std::process::id(),
        ),
        Err(e) => {
            warn!("netstat unavailable: {}", e);
            Vec::new()
        }
    }
}

#[cfg(not(windows))]
async fn terminate(pid: u32) -> Result<()> {
    let status = Command::new("kill")
        .args(["-9", &pid.to_string()])
        .status()
        .await?;
    if status.success() {
        Ok(())
    } else {
        Err(QuillError::Other(format!("kill exited with {}", status)))
    }
}

#[cfg(windows)]
async fn terminate(pid: u32) -> Result<()> {
    let status = Command::new("taskkill")
        .args(["/F", "/PID", &pid.to_string()])
        .status()
        .await?;
    if status.success() {
        Ok(())
    } else {
        Err(QuillError::Other(format!("taskkill exited with {}", status)))
    }
}

/// Pids from `lsof -t` output, one per line
pub fn parse_lsof(output: &str, own_pid: u32) -> Vec<u32> {
    let mut pids: Vec<u32> = output
        .lines()
        .filter_map(|line| line.trim().parse().ok())
        .filter(|pid| *pid != own_pid)
        .collect();
    pids.sort_unstable();
    pids.dedup();
    pids
}

/// Pids of LISTENING sockets on `port` from `netstat -ano` output
pub fn parse_netstat(output: &str, port: u16, own_pid: u32) -> Vec<u32> {
    let suffix = format!(":{}", port);
    let mut pids: Vec<u32> = output
        .lines()
        .filter_map(|line| {
            let cols: Vec<&str> = line.split_whitespace().collect();
            // Proto  Local  Foreign  State  PID
            if cols.len() < 5 || !cols[0].eq_ignore_ascii_case("tcp") {
                return None;
            }
            if !cols[1].ends_with(&suffix) || !cols[3].eq_ignore_ascii_case("listening") {
                return None;
            }
            cols[4].parse().ok()
        })
        .filter(|pid| *pid != own_pid && *pid != 0)
        .collect();
    pids.sort_unstable();
    pids.dedup();
    pids
}
