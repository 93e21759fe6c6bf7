//! Live `status -d` / `connections` terminal view (§6), re-reading the
//! statusfile on a fixed interval rather than holding any push channel to
//! the master.

use std::path::PathBuf;
use std::time::Duration;

use ratatui::Frame;
use ratatui::text::Text;

use crate::parse::{self, ConnectionRow, ProcessRow};
use crate::tui::CyclingTableState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewMode {
    Processes,
    Connections,
}

pub struct StatusApp {
    statusfile: PathBuf,
    mode: ViewMode,
    processes: Vec<ProcessRow>,
    connections: Vec<ConnectionRow>,
    header: String,
    process_table: CyclingTableState<i32>,
    connection_table: CyclingTableState<u64>,
}

impl StatusApp {
    pub fn new(statusfile: PathBuf, mode: ViewMode) -> Self {
        Self {
            statusfile,
            mode,
            processes: Vec::new(),
            connections: Vec::new(),
            header: String::new(),
            process_table: CyclingTableState::default(),
            connection_table: CyclingTableState::default(),
        }
    }

    pub fn poll_interval() -> Duration {
        Duration::from_millis(500)
    }

    /// Re-reads the statusfile; a missing file (master not running yet) is
    /// not an error, just an empty snapshot.
    pub fn refresh(&mut self) {
        let Ok(contents) = std::fs::read_to_string(&self.statusfile) else {
            self.header = format!("waiting for {}", self.statusfile.display());
            return;
        };
        match self.mode {
            ViewMode::Processes => {
                let snapshot = parse::parse_snapshot(&contents);
                self.header = format!(
                    "uptime {}  load {}  listeners {}  workers {}",
                    snapshot.uptime, snapshot.load_average, snapshot.listeners, snapshot.workers
                );
                self.processes = snapshot.processes;
            }
            ViewMode::Connections => {
                self.connections = parse::parse_connections(&contents);
                self.header = format!("{} connections", self.connections.len());
            }
        }
    }

    pub fn render(&mut self, frame: &mut Frame) {
        let area = frame.area();
        match self.mode {
            ViewMode::Processes => {
                let header = ["pid", "mem", "listen", "server", "conns", "fail", "timers", "req", "qps", "status"];
                let rows = self.processes.iter().map(|p| {
                    (
                        p.pid,
                        vec![
                            Text::from(p.pid.to_string()),
                            Text::from(p.memory.clone()),
                            Text::from(p.listen.clone()),
                            Text::from(p.server_name.clone()),
                            Text::from(p.connections.clone()),
                            Text::from(p.send_fail.clone()),
                            Text::from(p.timers.clone()),
                            Text::from(p.total_request.clone()),
                            Text::from(p.qps.clone()),
                            Text::from(p.status.clone()),
                        ],
                    )
                });
                self.process_table.render(Some(self.header.clone()), header.into_iter(), rows, frame, area);
            }
            ViewMode::Connections => {
                let header = ["pid", "server", "cid", "transport", "protocol", "recv_q", "send_q", "state", "local", "remote"];
                let rows = self.connections.iter().map(|c| {
                    (
                        c.cid,
                        vec![
                            Text::from(c.pid.to_string()),
                            Text::from(c.server.clone()),
                            Text::from(c.cid.to_string()),
                            Text::from(c.transport.clone()),
                            Text::from(c.protocol.clone()),
                            Text::from(c.recv_q.clone()),
                            Text::from(c.send_q.clone()),
                            Text::from(c.state.clone()),
                            Text::from(c.local_addr.clone()),
                            Text::from(c.remote_addr.clone()),
                        ],
                    )
                });
                self.connection_table.render(Some(self.header.clone()), header.into_iter(), rows, frame, area);
            }
        }
    }
}
