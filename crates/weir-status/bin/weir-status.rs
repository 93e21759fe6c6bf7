use std::env;
use std::io::stdout;
use std::panic;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use crossterm::ExecutableCommand;
use crossterm::cursor::Show;
use crossterm::event::{self, DisableMouseCapture, EnableMouseCapture, KeyCode, KeyEvent, KeyEventKind};
use crossterm::terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode};
use ratatui::Terminal;
use ratatui::prelude::CrosstermBackend;
use signal_hook::consts::SIGTERM;
use signal_hook::low_level;
use weir_status::{StatusApp, ViewMode};

static TERMINAL_INITIALIZED: AtomicBool = AtomicBool::new(false);

fn cleanup_terminal() {
    if TERMINAL_INITIALIZED.load(Ordering::Relaxed) {
        let _ = stdout().execute(Show);
        let _ = stdout().execute(DisableMouseCapture);
        let _ = stdout().execute(LeaveAlternateScreen);
        let _ = disable_raw_mode();
        TERMINAL_INITIALIZED.store(false, Ordering::Relaxed);
    }
}

fn setup_panic_hook() {
    let original_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        cleanup_terminal();
        original_hook(panic_info);
    }));
}

fn setup_signal_handler() {
    unsafe {
        let _ = low_level::register(SIGTERM, || {
            cleanup_terminal();
            std::process::exit(1);
        });
    }
}

fn get_arg(flags: &[&str]) -> Option<String> {
    env::args()
        .enumerate()
        .find_map(|(i, arg)| flags.contains(&arg.as_str()).then_some(i))
        .and_then(|idx| env::args().nth(idx + 1))
}

fn main() {
    setup_panic_hook();
    setup_signal_handler();

    let statusfile = get_arg(&["--statusfile"]).map_or_else(
        || weir_utils::directories::status_file(get_arg(&["--app-name"]).unwrap_or_else(|| "weir".into())),
        PathBuf::from,
    );
    let mode = if env::args().any(|a| a == "connections") { ViewMode::Connections } else { ViewMode::Processes };

    let mut stdout_val = stdout();
    stdout_val.execute(EnterAlternateScreen).unwrap();
    stdout_val.execute(EnableMouseCapture).unwrap();
    enable_raw_mode().unwrap();
    TERMINAL_INITIALIZED.store(true, Ordering::Relaxed);

    let mut terminal = Terminal::new(CrosstermBackend::new(stdout())).unwrap();
    let _ = terminal.clear();

    let mut app = StatusApp::new(statusfile, mode);

    loop {
        app.refresh();
        if let Err(e) = terminal.draw(|frame| app.render(frame)) {
            cleanup_terminal();
            eprintln!("issue drawing terminal: {e}");
            break;
        }

        let mut quit = false;
        while event::poll(std::time::Duration::from_millis(0)).is_ok_and(|ready| ready) {
            if let Ok(event::Event::Key(KeyEvent { kind: KeyEventKind::Press, code: KeyCode::Char('q'), .. })) =
                event::read()
            {
                quit = true;
            }
        }
        if quit {
            break;
        }
        std::thread::sleep(StatusApp::poll_interval());
    }

    cleanup_terminal();
}
