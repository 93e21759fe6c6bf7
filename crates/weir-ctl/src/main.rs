//! Convenience CLI wrapper (C11, §6): `<program> {start|stop|restart|reload|status|connections}`.
//!
//! This binary never touches listener configuration — it only ever signals
//! an already-bootstrapped master (located by its pidfile) or, for `start`
//! and `restart`, launches the caller's own server binary that embeds
//! [`weir::ServerBuilder`]. The master/worker machinery itself lives in
//! `weir-supervisor`; this is strictly the operator-facing surface §6
//! describes as an external collaborator.

use std::path::PathBuf;
use std::process::{Command as Process, ExitCode};
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "weir-ctl", about = "Start, stop, reload, and inspect a weir server")]
struct Cli {
    /// Identifies the pidfile/lockfile/statusfile under the platform data
    /// dir (`weir_utils::directories`), unless overridden below.
    #[arg(long, global = true, default_value = "weir")]
    app_name: String,

    #[arg(long, global = true)]
    pidfile: Option<PathBuf>,

    #[arg(long, global = true)]
    statusfile: Option<PathBuf>,

    /// Seconds to wait for a stopped master's PID to disappear before
    /// giving up (used by `stop` and the stop phase of `restart`).
    #[arg(long, global = true, default_value_t = 5)]
    stop_timeout: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Bootstrap master: launches `program [args...]`, which is expected to
    /// call `ServerBuilder::run()` itself.
    Start {
        #[arg(short = 'd', long)]
        daemonize: bool,
        program: PathBuf,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// SIGINT (or SIGQUIT with `-g`) to master.
    Stop {
        #[arg(short = 'g', long)]
        graceful: bool,
    },
    /// Stop, wait for the master to exit, then start again.
    Restart {
        #[arg(short = 'd', long)]
        daemonize: bool,
        #[arg(short = 'g', long)]
        graceful: bool,
        program: PathBuf,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// SIGUSR1 (or SIGUSR2 with `-g`) to master.
    Reload {
        #[arg(short = 'g', long)]
        graceful: bool,
    },
    /// SIGIOT to master; `-d` opens the live `weir-status` view instead of
    /// a single dump.
    Status {
        #[arg(short = 'd', long)]
        repeat: bool,
    },
    /// SIGIO to master; opens the live `weir-status` connections view.
    Connections,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();
    let cli = Cli::parse();

    let pidfile = cli.pidfile.clone().unwrap_or_else(|| weir_utils::directories::pid_file(&cli.app_name));
    let statusfile = cli.statusfile.clone().unwrap_or_else(|| weir_utils::directories::status_file(&cli.app_name));
    let stop_timeout = Duration::from_secs(cli.stop_timeout);

    let result = match &cli.command {
        Command::Start { daemonize, program, args } => cmd_start(&pidfile, *daemonize, program, args),
        Command::Stop { graceful } => cmd_stop(&pidfile, *graceful, stop_timeout),
        Command::Restart { daemonize, graceful, program, args } => {
            cmd_stop(&pidfile, *graceful, stop_timeout).and_then(|()| cmd_start(&pidfile, *daemonize, program, args))
        }
        Command::Reload { graceful } => cmd_reload(&pidfile, *graceful),
        Command::Status { repeat } => cmd_status(&pidfile, &statusfile, &cli.app_name, *repeat),
        Command::Connections => cmd_connections(&pidfile, &statusfile, &cli.app_name),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            error!("{message}");
            eprintln!("weir-ctl: {message}");
            ExitCode::FAILURE
        }
    }
}

fn cmd_start(pidfile: &PathBuf, daemonize: bool, program: &PathBuf, args: &[String]) -> Result<(), String> {
    if weir_supervisor::is_running(pidfile).is_some() {
        return Err(format!("already running (pidfile {})", pidfile.display()));
    }

    if daemonize {
        daemonize_self()?;
    }

    use std::os::unix::process::CommandExt;
    let err = Process::new(program).args(args).exec();
    Err(format!("failed to exec {}: {err}", program.display()))
}

/// `fork`+`setsid`+redirect-stdio, the textbook double-detach daemonize
/// sequence; the first child exits immediately so the shell's wait
/// returns right away.
fn daemonize_self() -> Result<(), String> {
    unsafe {
        match libc::fork() {
            -1 => return Err("daemonize: first fork failed".into()),
            0 => {}
            _ => std::process::exit(0),
        }

        if libc::setsid() == -1 {
            return Err("daemonize: setsid failed".into());
        }

        match libc::fork() {
            -1 => return Err("daemonize: second fork failed".into()),
            0 => {}
            _ => std::process::exit(0),
        }

        libc::chdir(c"/".as_ptr());
        let devnull = libc::open(c"/dev/null".as_ptr(), libc::O_RDWR);
        if devnull >= 0 {
            libc::dup2(devnull, libc::STDIN_FILENO);
            libc::dup2(devnull, libc::STDOUT_FILENO);
            libc::dup2(devnull, libc::STDERR_FILENO);
            if devnull > libc::STDERR_FILENO {
                libc::close(devnull);
            }
        }
    }
    Ok(())
}

fn cmd_stop(pidfile: &PathBuf, graceful: bool, timeout: Duration) -> Result<(), String> {
    let signal = if graceful { libc::SIGQUIT } else { libc::SIGINT };
    let pid = weir_supervisor::signal(pidfile, signal).map_err(|e| e.to_string())?;
    info!(pid, graceful, "stop requested");

    let deadline = std::time::Instant::now() + timeout;
    while weir_supervisor::is_running(pidfile).is_some() {
        if std::time::Instant::now() >= deadline {
            warn!(pid, "master still running after stop_timeout, giving up wait");
            return Ok(());
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    Ok(())
}

fn cmd_reload(pidfile: &PathBuf, graceful: bool) -> Result<(), String> {
    let signal = if graceful { libc::SIGUSR2 } else { libc::SIGUSR1 };
    weir_supervisor::signal(pidfile, signal).map_err(|e| e.to_string())?;
    Ok(())
}

fn cmd_status(pidfile: &PathBuf, statusfile: &PathBuf, app_name: &str, repeat: bool) -> Result<(), String> {
    // SIGIOT is SIGABRT's alias; the master repurposes it per §4.8.
    weir_supervisor::signal(pidfile, libc::SIGABRT).map_err(|e| e.to_string())?;
    std::thread::sleep(Duration::from_millis(150));

    if repeat {
        spawn_status_viewer(statusfile, app_name, None)
    } else {
        print_statusfile(statusfile)
    }
}

fn cmd_connections(pidfile: &PathBuf, statusfile: &PathBuf, app_name: &str) -> Result<(), String> {
    weir_supervisor::signal(pidfile, libc::SIGIO).map_err(|e| e.to_string())?;
    std::thread::sleep(Duration::from_millis(150));
    spawn_status_viewer(statusfile, app_name, Some("connections"))
}

fn print_statusfile(statusfile: &PathBuf) -> Result<(), String> {
    let contents = std::fs::read_to_string(statusfile)
        .map_err(|e| format!("reading statusfile {}: {e}", statusfile.display()))?;
    print!("{contents}");
    Ok(())
}

/// Execs the sibling `weir-status` binary for the live TUI view (§6
/// "status | repeat"); falls back to `PATH` if it isn't next to us.
fn spawn_status_viewer(statusfile: &PathBuf, app_name: &str, mode: Option<&str>) -> Result<(), String> {
    let bin = sibling_binary("weir-status");
    let mut cmd = Process::new(bin);
    cmd.arg("--statusfile").arg(statusfile).arg("--app-name").arg(app_name);
    if let Some(mode) = mode {
        cmd.arg(mode);
    }
    let status = cmd.status().map_err(|e| format!("launching weir-status: {e}"))?;
    if status.success() { Ok(()) } else { Err(format!("weir-status exited with {status}")) }
}

fn sibling_binary(name: &str) -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(name)))
        .filter(|path| path.exists())
        .unwrap_or_else(|| PathBuf::from(name))
}
