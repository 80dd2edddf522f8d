use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use tickwire::{
    ClientConnection, ClientSummary, DemoSink, FileDemoSink, MasterAnnouncer, MemoryDirectory,
    NetServer, NetworkContext, PacketChannel, PendingDemos, ServerEvent, SimulatedChannel,
    SlotIndex, UdpChannel,
};

use crate::config::ServerSettings;
use crate::simulation::simulate_world;

#[derive(Debug, Clone)]
pub struct HostStats {
    pub name: String,
    pub tick: u32,
    pub uptime_secs: u64,
    pub capacity: usize,
    pub occupied: usize,
    pub ready: usize,
    pub entity_count: usize,
    pub announcements: usize,
    pub net_enabled: bool,
}

/// Runs a [`NetServer`] at its configured tick rate and keeps the demo world moving.
pub struct ServerHost {
    server: NetServer<Box<dyn PacketChannel>>,
    directory: MemoryDirectory,
    demo_dir: Option<PathBuf>,
    demos: PendingDemos,
    tick_duration: Duration,
    last_tick_time: Instant,
    accumulator: Duration,
    running: Arc<AtomicBool>,
    start_time: Instant,
}

impl ServerHost {
    pub fn new(settings: &ServerSettings) -> Result<Self> {
        let udp = UdpChannel::bind(settings.bind_addr.as_str())
            .with_context(|| format!("binding {}", settings.bind_addr))?;
        let channel: Box<dyn PacketChannel> = if settings.link.enabled {
            log::info!(
                "simulating {:.1}% loss, {}-{} ms latency, {} ms jitter",
                settings.link.loss_percent,
                settings.link.min_latency_ms,
                settings.link.max_latency_ms,
                settings.link.jitter_ms
            );
            Box::new(SimulatedChannel::new(udp, settings.link.clone()))
        } else {
            Box::new(udp)
        };

        let mut ctx = NetworkContext::server(settings.net.clone());
        if !settings.net_enabled {
            log::warn!("networking disabled; the server will not answer anyone");
            ctx.set_net_enabled(false);
        }
        let tick_duration = Duration::from_millis(ctx.ticks_to_ms(1).max(1));

        let mut server = NetServer::new(ctx, channel)?;
        let directory = MemoryDirectory::new();
        server.set_announcer(MasterAnnouncer::new(
            Box::new(directory.clone()),
            settings.net.announce_interval_ticks,
        ));

        let demos = PendingDemos::new();
        if let Some(dir) = &settings.demo_dir {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating demo directory {}", dir.display()))?;
            let dir = dir.clone();
            let demos = demos.clone();
            server.set_demo_recorder(Box::new(
                move |_: SlotIndex, client: &ClientConnection, tick: u32| {
                    open_demo(&dir, client, tick, &demos)
                },
            ));
        }

        Ok(Self {
            server,
            directory,
            demo_dir: settings.demo_dir.clone(),
            demos,
            tick_duration,
            last_tick_time: Instant::now(),
            accumulator: Duration::ZERO,
            running: Arc::new(AtomicBool::new(true)),
            start_time: Instant::now(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.server.local_addr()
    }

    pub fn running(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Runs until the running flag is cleared, then says goodbye to everyone.
    pub fn run(&mut self) -> Result<()> {
        while self.running.load(Ordering::SeqCst) {
            self.tick_once()?;
            std::thread::sleep(Duration::from_millis(1));
        }
        self.shutdown()
    }

    /// Runs every tick that has come due since the last call and returns the
    /// events they produced.
    pub fn tick_once(&mut self) -> Result<Vec<ServerEvent>> {
        let now = Instant::now();
        self.accumulator += now - self.last_tick_time;
        self.last_tick_time = now;

        let dt = self.tick_duration.as_secs_f32();
        let mut events = Vec::new();
        while self.accumulator >= self.tick_duration {
            self.accumulator -= self.tick_duration;
            simulate_world(self.server.world_mut(), dt);
            self.server.tick()?;
            events.extend(self.server.drain_events());
        }
        Ok(events)
    }

    fn start_recording(&mut self, slot: SlotIndex) {
        let Some(dir) = &self.demo_dir else {
            return;
        };
        let Some(client) = self.server.registry().get(slot) else {
            return;
        };
        let Some(sink) = open_demo(dir, client, self.server.current_tick(), &self.demos) else {
            return;
        };
        if let Err(err) = self.server.attach_demo(slot, sink) {
            log::warn!("could not record slot {}: {}", slot, err);
        }
    }

    /// Starts or stops recording a slot. Returns whether it is now recording.
    pub fn toggle_recording(&mut self, slot: SlotIndex) -> Result<bool> {
        if self.server.detach_demo(slot)? {
            return Ok(false);
        }
        if self.demo_dir.is_none() {
            anyhow::bail!("no demo directory configured");
        }
        self.start_recording(slot);
        Ok(self
            .server
            .registry()
            .get(slot)
            .is_some_and(|c| c.has_demo()))
    }

    pub fn kick(&mut self, slot: SlotIndex) -> Result<()> {
        self.server.kick(slot, "kicked by operator")?;
        Ok(())
    }

    pub fn shutdown(&mut self) -> Result<()> {
        self.server.shutdown()?;
        self.server.announce_now();
        let flushed = self.demos.wait().context("finishing demo recordings")?;
        if flushed > 0 {
            log::info!("finished writing {} demo(s)", flushed);
        }
        Ok(())
    }

    pub fn clients(&self) -> Vec<ClientSummary> {
        self.server.client_summaries()
    }

    pub fn stats(&self) -> HostStats {
        let registry = self.server.registry();
        HostStats {
            name: self.server.context().config().server_name.clone(),
            tick: self.server.current_tick(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            capacity: registry.capacity(),
            occupied: registry.occupied_count(),
            ready: registry.ready_count(),
            entity_count: self.server.world().entity_count(),
            announcements: self.directory.announcements(),
            net_enabled: self.server.context().net_enabled(),
        }
    }
}

fn open_demo(
    dir: &Path,
    client: &ClientConnection,
    tick: u32,
    demos: &PendingDemos,
) -> Option<Box<dyn DemoSink>> {
    let name: String = client
        .name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    let path = dir.join(format!("{}-{}-t{}.twdemo", name, client.id, tick));

    match FileDemoSink::create(&path, demos) {
        Ok(sink) => Some(Box::new(sink)),
        Err(err) => {
            log::warn!("could not create {}: {}", path.display(), err);
            None
        }
    }
}
