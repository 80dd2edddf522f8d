use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use tokio::sync::mpsc::{self, UnboundedSender};

pub const DEMO_MAGIC: &[u8; 8] = b"TWDEMO\x00\x01";

const COMPRESSION_LEVEL: i32 = 3;
const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Sequential byte sink receiving an exact copy of what a client was sent.
pub trait DemoSink {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()>;

    fn close(&mut self) -> io::Result<()>;
}

type Writer = JoinHandle<io::Result<u64>>;

/// Writer threads of closed demos that may still be flushing.
#[derive(Debug, Clone, Default)]
pub struct PendingDemos {
    writers: Arc<Mutex<Vec<(PathBuf, Writer)>>>,
}

impl PendingDemos {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, path: PathBuf, writer: Writer) {
        let mut writers = self.writers.lock().unwrap_or_else(|e| e.into_inner());
        let (done, running): (Vec<_>, Vec<_>) =
            writers.drain(..).partition(|(_, w)| w.is_finished());
        *writers = running;
        writers.push((path, writer));
        drop(writers);

        for (path, writer) in done {
            if let Err(err) = join_writer(writer) {
                log::warn!("failed to finish demo {}: {}", path.display(), err);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.writers.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Blocks until every closed demo is on disk. Returns how many were
    /// waited for, or the first failure.
    pub fn wait(&self) -> io::Result<usize> {
        let writers = {
            let mut guard = self.writers.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *guard)
        };
        let count = writers.len();
        let mut first_err = None;
        for (path, writer) in writers {
            if let Err(err) = join_writer(writer) {
                log::warn!("failed to finish demo {}: {}", path.display(), err);
                first_err.get_or_insert(err);
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(count),
        }
    }
}

fn join_writer(writer: Writer) -> io::Result<u64> {
    writer
        .join()
        .map_err(|_| io::Error::other("demo writer panicked"))?
}

/// Demo file writer. Frames are handed to a background thread so a slow
/// disk never stalls the caller, and closing does not wait for the flush.
///
/// File layout: [`DEMO_MAGIC`] followed by a zstd stream of frames, each a
/// little-endian `u32` length and the raw packet bytes.
pub struct FileDemoSink {
    path: PathBuf,
    tx: Option<UnboundedSender<Vec<u8>>>,
    writer: Option<Writer>,
    pending: PendingDemos,
    queued: u64,
}

impl FileDemoSink {
    /// Creates the file; once closed its writer is tracked by `pending`.
    pub fn create(path: impl AsRef<Path>, pending: &PendingDemos) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = BufWriter::new(File::create(&path)?);
        file.write_all(DEMO_MAGIC)?;
        let mut encoder = zstd::stream::write::Encoder::new(file, COMPRESSION_LEVEL)?;

        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let display = path.display().to_string();
        let writer = std::thread::Builder::new()
            .name("demo-writer".into())
            .spawn(move || -> io::Result<u64> {
                let mut frames = 0u64;
                while let Some(frame) = rx.blocking_recv() {
                    encoder.write_all(&(frame.len() as u32).to_le_bytes())?;
                    encoder.write_all(&frame)?;
                    frames += 1;
                }
                encoder.finish()?.flush()?;
                log::info!("demo {} closed after {} frames", display, frames);
                Ok(frames)
            })?;

        log::info!("recording demo to {}", path.display());
        Ok(Self {
            path,
            tx: Some(tx),
            writer: Some(writer),
            pending: pending.clone(),
            queued: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn queued(&self) -> u64 {
        self.queued
    }
}

impl DemoSink for FileDemoSink {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "demo already closed"))?;
        tx.send(bytes.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "demo writer stopped"))?;
        self.queued += 1;
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        drop(self.tx.take());
        if let Some(writer) = self.writer.take() {
            self.pending.push(self.path.clone(), writer);
        }
        Ok(())
    }
}

impl Drop for FileDemoSink {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            log::warn!("failed to finish demo {}: {}", self.path.display(), err);
        }
    }
}

/// Iterates the frames of a demo file written by [`FileDemoSink`].
pub struct DemoReader {
    decoder: zstd::stream::read::Decoder<'static, BufReader<File>>,
}

impl DemoReader {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let mut file = File::open(path)?;
        let mut magic = [0u8; 8];
        file.read_exact(&mut magic)?;
        if &magic != DEMO_MAGIC {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "not a tickwire demo file",
            ));
        }
        Ok(Self {
            decoder: zstd::stream::read::Decoder::new(file)?,
        })
    }

    fn next_frame(&mut self) -> io::Result<Option<Vec<u8>>> {
        let mut len = [0u8; 4];
        match self.decoder.read_exact(&mut len) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(err) => return Err(err),
        }

        let len = u32::from_le_bytes(len) as usize;
        if len > MAX_FRAME_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("demo frame of {} bytes is implausible", len),
            ));
        }

        let mut frame = vec![0u8; len];
        self.decoder.read_exact(&mut frame)?;
        Ok(Some(frame))
    }
}

impl Iterator for DemoReader {
    type Item = io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_frame().transpose()
    }
}
