//! Human-readable statistics dump (§6 "Persisted state"). The master writes
//! the header block once per SIGIOT/SIGIO; each worker appends its own
//! process line, matching the source's line-oriented, `O_APPEND`-for-atomicity
//! convention so interleaved writes from multiple workers never tear a line.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use weir_timing::Nanos;

fn nanos_since_epoch(t: SystemTime) -> Nanos {
    let since_epoch = t.duration_since(UNIX_EPOCH).unwrap_or_default();
    Nanos(since_epoch.as_nanos().min(u128::from(u64::MAX)) as u64)
}

/// One worker's row in the per-process table (§3 "Statistics snapshot").
#[derive(Debug, Clone)]
pub struct ProcessStats {
    pub pid: libc::pid_t,
    pub memory_rss_kb: u64,
    pub listen: String,
    pub server_name: String,
    pub connections: u64,
    pub send_fail: u64,
    pub timers: u64,
    pub total_request: u64,
    pub qps: u64,
    pub status: String,
}

/// One connection's row for a connection dump (SIGIO, §6).
#[derive(Debug, Clone)]
pub struct ConnectionRow {
    pub pid: libc::pid_t,
    pub server: String,
    pub cid: u64,
    pub transport: String,
    pub protocol: String,
    pub ipv4: bool,
    pub ipv6: bool,
    pub recv_q: usize,
    pub send_q: usize,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub state: String,
    pub local_addr: String,
    pub remote_addr: String,
}

fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{line}")
}

/// Overwrites the statusfile with the header block plus the per-exit-status
/// table (master-owned; run once at the start of a status dump before
/// children append their rows).
pub fn write_header(
    path: &Path,
    start_time: SystemTime,
    listener_count: usize,
    worker_count: usize,
    exit_counts: &[(i32, u64)],
) -> std::io::Result<()> {
    let mut file = OpenOptions::new().create(true).write(true).truncate(true).open(path)?;
    let uptime = SystemTime::now().duration_since(start_time).unwrap_or_default();
    let load = load_average();
    writeln!(file, "weir status dump")?;
    writeln!(file, "start time: {}", nanos_since_epoch(start_time))?;
    writeln!(file, "uptime: {}s", uptime.as_secs())?;
    writeln!(file, "load average: {load:.2}")?;
    writeln!(file, "event loop: weir-net::reactor::EventLoop (mio, epoll/kqueue)")?;
    writeln!(file, "listeners: {listener_count}  workers: {worker_count}")?;
    writeln!(file)?;
    writeln!(file, "exit_status  count")?;
    for (status, count) in exit_counts {
        writeln!(file, "{status:>11}  {count}")?;
    }
    writeln!(file)?;
    writeln!(file, "pid  memory  listen  server_name  connections  send_fail  timers  total_request  qps  status")?;
    Ok(())
}

pub fn append_process_row(path: &Path, row: &ProcessStats) -> std::io::Result<()> {
    append_line(
        path,
        &format!(
            "{}  {}K  {}  {}  {}  {}  {}  {}  {}  {}",
            row.pid,
            row.memory_rss_kb,
            row.listen,
            row.server_name,
            row.connections,
            row.send_fail,
            row.timers,
            row.total_request,
            row.qps,
            row.status
        ),
    )
}

pub fn append_connection_row(path: &Path, row: &ConnectionRow) -> std::io::Result<()> {
    append_line(
        path,
        &format!(
            "{}  {}  {}  {}  {}  {}  {}  {}  {}  {}  {}  {}  {}  {}",
            row.pid,
            row.server,
            row.cid,
            row.transport,
            row.protocol,
            row.ipv4,
            row.ipv6,
            row.recv_q,
            row.send_q,
            row.bytes_read,
            row.bytes_written,
            row.state,
            row.local_addr,
            row.remote_addr
        ),
    )
}

/// Reads the kernel's 1-minute load average, falling back to `0.0` where
/// unavailable (non-Linux, containers without `/proc`).
fn load_average() -> f64 {
    let mut loads = [0f64; 3];
    let n = unsafe { libc::getloadavg(loads.as_mut_ptr(), 3) };
    if n <= 0 { 0.0 } else { loads[0] }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_then_rows_append_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weir.status");
        write_header(&path, SystemTime::now(), 1, 4, &[(0, 3), (1, 1)]).unwrap();
        append_process_row(
            &path,
            &ProcessStats {
                pid: 100,
                memory_rss_kb: 2048,
                listen: "tcp://0.0.0.0:8080".into(),
                server_name: "demo".into(),
                connections: 5,
                send_fail: 0,
                timers: 2,
                total_request: 42,
                qps: 7,
                status: "running".into(),
            },
        )
        .unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("weir status dump"));
        assert!(contents.contains("tcp://0.0.0.0:8080"));
    }
}
