use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use tickwire::{DemoReader, Packet, Payload};

#[derive(Parser)]
#[command(name = "tickwire-demo")]
#[command(about = "Inspect a recorded tickwire demo")]
struct Args {
    path: PathBuf,

    #[arg(short, long, help = "Print every recorded packet")]
    verbose: bool,
}

#[derive(Debug, Default)]
struct DemoSummary {
    frames: u64,
    bytes: u64,
    undecodable: u64,
    by_kind: BTreeMap<&'static str, u64>,
    first_tick: Option<u32>,
    last_tick: Option<u32>,
    incomplete_deltas: u64,
    max_entities: usize,
}

impl DemoSummary {
    fn record(&mut self, size: usize, packet: Option<&Packet>) {
        self.frames += 1;
        self.bytes += size as u64;

        let Some(packet) = packet else {
            self.undecodable += 1;
            return;
        };
        *self.by_kind.entry(packet.payload.kind()).or_default() += 1;

        if let Payload::StateDelta(delta) = &packet.payload {
            self.first_tick.get_or_insert(delta.tick);
            self.last_tick = Some(delta.tick);
            self.max_entities = self.max_entities.max(delta.entities.len());
            if !delta.complete {
                self.incomplete_deltas += 1;
            }
        }
    }

    fn print(&self) {
        println!("frames:      {}", self.frames);
        println!("bytes:       {}", self.bytes);
        if let (Some(first), Some(last)) = (self.first_tick, self.last_tick) {
            println!("ticks:       {}..={}", first, last);
        }
        println!("max entities per delta: {}", self.max_entities);
        println!("truncated deltas:       {}", self.incomplete_deltas);
        if self.undecodable > 0 {
            println!("undecodable frames:     {}", self.undecodable);
        }
        for (kind, count) in &self.by_kind {
            println!("  {:<14} {}", kind, count);
        }
    }
}

fn describe(packet: &Packet) -> String {
    match &packet.payload {
        Payload::StateDelta(delta) => format!(
            "state-delta seq={} tick={} base={:?} entities={} removed={}{}",
            delta.sequence,
            delta.tick,
            delta.base_tick,
            delta.entities.len(),
            delta.removed.len(),
            if delta.complete { "" } else { " (truncated)" }
        ),
        Payload::Reliable { sequence, message } => {
            format!("reliable seq={} {:?}", sequence, message)
        }
        Payload::Goodbye { reason } => format!("goodbye: {}", reason),
        other => other.kind().to_string(),
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let reader = DemoReader::open(&args.path)
        .with_context(|| format!("opening {}", args.path.display()))?;

    let mut summary = DemoSummary::default();
    for (index, frame) in reader.enumerate() {
        let frame = frame.with_context(|| format!("reading frame {}", index))?;
        match Packet::decode(&frame) {
            Ok(packet) => {
                if args.verbose {
                    println!("{:>6} {:>5}B {}", index, frame.len(), describe(&packet));
                }
                summary.record(frame.len(), Some(&packet));
            }
            Err(err) => {
                log::warn!("frame {} does not decode: {}", index, err);
                summary.record(frame.len(), None);
            }
        }
    }

    summary.print();
    Ok(())
}
