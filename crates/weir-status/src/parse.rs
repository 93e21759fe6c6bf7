//! Parses the statusfile format written by `weir_supervisor::statusfile`
//! back into structured rows for the live terminal view (§6 "Persisted
//! state").

#[derive(Debug, Clone, Default)]
pub struct ProcessRow {
    pub pid: i32,
    pub memory: String,
    pub listen: String,
    pub server_name: String,
    pub connections: String,
    pub send_fail: String,
    pub timers: String,
    pub total_request: String,
    pub qps: String,
    pub status: String,
}

#[derive(Debug, Clone, Default)]
pub struct ConnectionRow {
    pub pid: i32,
    pub server: String,
    pub cid: u64,
    pub transport: String,
    pub protocol: String,
    pub ipv4: String,
    pub ipv6: String,
    pub recv_q: String,
    pub send_q: String,
    pub bytes_read: String,
    pub bytes_written: String,
    pub state: String,
    pub local_addr: String,
    pub remote_addr: String,
}

#[derive(Debug, Clone, Default)]
pub struct StatusSnapshot {
    pub start_time: String,
    pub uptime: String,
    pub load_average: String,
    pub event_loop: String,
    pub listeners: String,
    pub workers: String,
    pub exit_counts: Vec<(String, String)>,
    pub processes: Vec<ProcessRow>,
}

/// Splits a statusfile row on its double-space column separator (the
/// convention `weir_supervisor::statusfile::append_*` writes with).
fn columns(line: &str) -> Vec<&str> {
    line.split("  ").map(str::trim).filter(|s| !s.is_empty()).collect()
}

pub fn parse_snapshot(contents: &str) -> StatusSnapshot {
    let mut snapshot = StatusSnapshot::default();
    let mut lines = contents.lines();
    let mut in_exit_table = false;
    let mut in_process_table = false;

    for line in &mut lines {
        if let Some(rest) = line.strip_prefix("start time: ") {
            snapshot.start_time = rest.to_string();
        } else if let Some(rest) = line.strip_prefix("uptime: ") {
            snapshot.uptime = rest.to_string();
        } else if let Some(rest) = line.strip_prefix("load average: ") {
            snapshot.load_average = rest.to_string();
        } else if let Some(rest) = line.strip_prefix("event loop: ") {
            snapshot.event_loop = rest.to_string();
        } else if let Some(rest) = line.strip_prefix("listeners: ") {
            let mut parts = rest.splitn(2, "workers:");
            snapshot.listeners = parts.next().unwrap_or_default().trim().to_string();
            snapshot.workers = parts.next().unwrap_or_default().trim().to_string();
        } else if line.starts_with("exit_status") {
            in_exit_table = true;
        } else if line.starts_with("pid  memory") {
            in_process_table = true;
            in_exit_table = false;
        } else if in_exit_table && !line.trim().is_empty() {
            let cols = columns(line);
            if cols.len() == 2 {
                snapshot.exit_counts.push((cols[0].to_string(), cols[1].to_string()));
            }
        } else if in_process_table && !line.trim().is_empty() {
            let cols = columns(line);
            if cols.len() >= 10 {
                snapshot.processes.push(ProcessRow {
                    pid: cols[0].parse().unwrap_or(0),
                    memory: cols[1].to_string(),
                    listen: cols[2].to_string(),
                    server_name: cols[3].to_string(),
                    connections: cols[4].to_string(),
                    send_fail: cols[5].to_string(),
                    timers: cols[6].to_string(),
                    total_request: cols[7].to_string(),
                    qps: cols[8].to_string(),
                    status: cols[9].to_string(),
                });
            }
        }
    }
    snapshot
}

pub fn parse_connections(contents: &str) -> Vec<ConnectionRow> {
    contents
        .lines()
        .filter_map(|line| {
            let cols = columns(line);
            if cols.len() < 14 {
                return None;
            }
            Some(ConnectionRow {
                pid: cols[0].parse().unwrap_or(0),
                server: cols[1].to_string(),
                cid: cols[2].parse().unwrap_or(0),
                transport: cols[3].to_string(),
                protocol: cols[4].to_string(),
                ipv4: cols[5].to_string(),
                ipv6: cols[6].to_string(),
                recv_q: cols[7].to_string(),
                send_q: cols[8].to_string(),
                bytes_read: cols[9].to_string(),
                bytes_written: cols[10].to_string(),
                state: cols[11].to_string(),
                local_addr: cols[12].to_string(),
                remote_addr: cols[13].to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_header_and_one_process_row() {
        let contents = "\
weir status dump
start time: 123
uptime: 9s
load average: 0.42
event loop: weir-net::reactor::EventLoop (mio, epoll/kqueue)
listeners: 1  workers: 4

exit_status  count
          0  3
          1  1

pid  memory  listen  server_name  connections  send_fail  timers  total_request  qps  status
100  2048K  tcp://0.0.0.0:8080  demo  5  0  2  42  7  running
";
        let snapshot = parse_snapshot(contents);
        assert_eq!(snapshot.uptime, "9s");
        assert_eq!(snapshot.exit_counts, vec![("0".into(), "3".into()), ("1".into(), "1".into())]);
        assert_eq!(snapshot.processes.len(), 1);
        assert_eq!(snapshot.processes[0].pid, 100);
        assert_eq!(snapshot.processes[0].server_name, "demo");
    }
}
