mod session;

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Parser;

use session::{Flow, Session};
use tickwire::{NetClient, NetConfig, NetworkContext, UdpChannel};

#[derive(Parser)]
#[command(name = "tickwire-client")]
#[command(about = "Console tickwire client")]
struct Args {
    #[arg(
        short,
        long,
        default_value = "127.0.0.1:13209",
        help = "Server address to connect to"
    )]
    server: SocketAddr,

    #[arg(short, long, default_value = "player")]
    name: String,

    #[arg(long, help = "Chat line to send once connected (repeatable)")]
    say: Vec<String>,

    #[arg(long, help = "Slot to spectate once connected")]
    spectate: Option<usize>,

    #[arg(long, help = "Disconnect after this many seconds")]
    seconds: Option<u64>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let ctx = NetworkContext::client(NetConfig::default());
    let tick_duration = Duration::from_millis(ctx.ticks_to_ms(1).max(1));
    let channel = UdpChannel::bind("0.0.0.0:0")?;
    let mut client = NetClient::new(ctx, channel)?;
    client.connect(args.server, &args.name)?;

    let mut session = Session::new(client, args.say, args.spectate);
    let running = Arc::new(AtomicBool::new(true));
    stop_on_ctrl_c(Arc::clone(&running));

    let deadline = args.seconds.map(|s| Instant::now() + Duration::from_secs(s));
    while running.load(Ordering::SeqCst) {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
        if let Flow::Stop(reason) = session.tick()? {
            println!("{}", reason);
            return Ok(());
        }
        std::thread::sleep(tick_duration);
    }

    if let Some(tick) = session.client().server_tick() {
        log::info!(
            "leaving at server tick {} after {} deltas",
            tick,
            session.client().deltas_applied()
        );
    }
    session.disconnect()?;
    Ok(())
}

fn stop_on_ctrl_c(running: Arc<AtomicBool>) {
    std::thread::spawn(move || {
        let Ok(runtime) = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        else {
            return;
        };
        if runtime.block_on(tokio::signal::ctrl_c()).is_ok() {
            running.store(false, Ordering::SeqCst);
        }
    });
}
