mod config;
mod host;
mod simulation;
mod tui;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{self, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::{cursor, execute};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;

use config::ServerSettings;
use host::ServerHost;
use tickwire::ServerEvent;
use tui::TuiState;

#[derive(Parser, Debug)]
#[command(name = "tickwire-server")]
#[command(about = "Authoritative tickwire server")]
pub struct Args {
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    #[arg(short, long, default_value_t = tickwire::DEFAULT_PORT)]
    port: u16,

    #[arg(short, long, help = "Ticks per second (overrides the config file)")]
    tick_rate: Option<u32>,

    #[arg(short, long, help = "Client slots (overrides the config file)")]
    max_clients: Option<usize>,

    #[arg(short, long, help = "TOML file with network settings")]
    config: Option<PathBuf>,

    #[arg(long, help = "Server name shown to clients and the master directory")]
    name: Option<String>,

    #[arg(long)]
    headless: bool,

    #[arg(long, help = "Record a demo per client into this directory")]
    demo_dir: Option<PathBuf>,

    #[arg(long, help = "Enable global packet loss simulation")]
    simulate_packet_loss: bool,

    #[arg(long, default_value_t = 0.0, help = "Packet loss percentage (0-100)")]
    loss_percent: f32,

    #[arg(long, default_value_t = 0, help = "Minimum latency in ms")]
    min_latency: u32,

    #[arg(long, default_value_t = 0, help = "Maximum latency in ms")]
    max_latency: u32,

    #[arg(long, default_value_t = 0, help = "Jitter in ms")]
    jitter: u32,

    #[arg(long, help = "Start with networking disabled")]
    no_net: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let settings = ServerSettings::from_args(&args)?;

    if args.headless {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    let mut host = ServerHost::new(&settings)?;

    if args.headless {
        stop_on_ctrl_c(host.running());
        log::info!("server started on {}", host.local_addr());
        host.run()?;
        log::info!("server stopped");
    } else {
        run_with_tui(&mut host)?;
    }

    Ok(())
}

fn stop_on_ctrl_c(running: Arc<AtomicBool>) {
    std::thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(err) => {
                log::warn!("ctrl-c handler unavailable: {}", err);
                return;
            }
        };
        if runtime.block_on(tokio::signal::ctrl_c()).is_ok() {
            log::info!("interrupted, shutting down");
        }
        running.store(false, Ordering::SeqCst);
    });
}

fn run_with_tui(host: &mut ServerHost) -> Result<()> {
    terminal::enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, cursor::Hide)?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let running = host.running();
    let mut tui_state = TuiState::new();
    tui_state.log_info(format!("Server started on {}", host.local_addr()));

    let result = tui_loop(host, &mut terminal, &running, &mut tui_state);

    host.shutdown()?;
    terminal::disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, cursor::Show)?;

    result
}

fn tui_loop(
    host: &mut ServerHost,
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    running: &AtomicBool,
    tui_state: &mut TuiState,
) -> Result<()> {
    while running.load(Ordering::SeqCst) {
        match host.tick_once() {
            Ok(events) => {
                for event in events {
                    log_event(tui_state, event);
                }
            }
            Err(err) => {
                tui_state.log_error(format!("Network error: {}", err));
                running.store(false, Ordering::SeqCst);
            }
        }

        if event::poll(Duration::from_millis(1))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    let clients = host.clients();
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Esc => {
                            running.store(false, Ordering::SeqCst);
                        }
                        KeyCode::Up => tui_state.select_prev(clients.len()),
                        KeyCode::Down => tui_state.select_next(clients.len()),
                        KeyCode::Char('k') | KeyCode::Char('K') => {
                            if let Some(slot) = tui_state.selected_slot(&clients) {
                                if let Err(err) = host.kick(slot) {
                                    tui_state.log_warn(format!("Kick failed: {}", err));
                                }
                            }
                        }
                        KeyCode::Char('r') | KeyCode::Char('R') => {
                            if let Some(slot) = tui_state.selected_slot(&clients) {
                                match host.toggle_recording(slot) {
                                    Ok(true) => tui_state.log_info(format!("Recording slot {}", slot)),
                                    Ok(false) => {
                                        tui_state.log_info(format!("Stopped recording slot {}", slot))
                                    }
                                    Err(err) => tui_state.log_warn(format!("Demo: {}", err)),
                                }
                            }
                        }
                        _ => {}
                    }
                }
            }
        }

        let stats = host.stats();
        let clients = host.clients();
        terminal.draw(|frame| {
            tui::render(frame, tui_state, &stats, &clients);
        })?;
    }

    tui_state.log_info("Shutting down...");
    Ok(())
}

fn log_event(tui_state: &mut TuiState, event: ServerEvent) {
    match event {
        ServerEvent::ClientConnecting { slot, addr, name } => {
            tui_state.log_info(format!("{} connecting from {} (slot {})", name, addr, slot));
        }
        ServerEvent::ClientReady {
            slot,
            client_id,
            name,
        } => {
            tui_state.log_info(format!("{} entered the game (slot {}, client {})", name, slot, client_id));
        }
        ServerEvent::ConnectionRejected { addr, reason } => {
            tui_state.log_warn(format!("Connection from {} rejected: {}", addr, reason));
        }
        ServerEvent::ClientLeft { slot, name, reason, .. } => {
            tui_state.log_info(format!("{} left slot {}: {}", name, slot, reason));
        }
        ServerEvent::Chat { name, text, .. } => {
            tui_state.log_info(format!("<{}> {}", name, text));
        }
        ServerEvent::ReliableDropped {
            slot, client_id, ..
        } => {
            tui_state.log_warn(format!(
                "Message to client {} (slot {}) was never acknowledged",
                client_id, slot
            ));
        }
    }
}
