//! File-backed log output
//!
//! env_logger formats records on the calling thread; the bytes travel over
//! an unbounded channel to a single task that owns the log file, so logging
//! never blocks on disk.

use std::{
    io::{self, Write},
    path::{Path, PathBuf},
};

use env_logger::{Builder, Target};
use log::LevelFilter;
use tokio::{
    fs::{create_dir_all, File, OpenOptions},
    io::{AsyncWriteExt, BufWriter},
    sync::{
        mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
        watch,
    },
};

use crate::{
    config,
    core::{error::ErrorContext, OrchestratorResult},
    internal_error,
};

/// `io::Write` end handed to env_logger
pub struct ChannelWriter {
    tx: UnboundedSender<Vec<u8>>,
}

impl Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tx
            .send(buf.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "log file writer stopped"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub struct FileLogger {
    path: PathBuf,
    file: BufWriter<File>,
    tx: UnboundedSender<Vec<u8>>,
    rx: UnboundedReceiver<Vec<u8>>,
}

impl FileLogger {
    /// Create parent directories and open the configured file for appending
    pub async fn open(config: &config::Log) -> OrchestratorResult<Self> {
        let path = PathBuf::from(&config.path);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            create_dir_all(parent)
                .await
                .with_context("Failed to create log directory")?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context("Failed to open log file")?;

        let (tx, rx) = unbounded_channel();
        Ok(Self {
            path,
            file: BufWriter::new(file),
            tx,
            rx,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn writer(&self) -> ChannelWriter {
        ChannelWriter {
            tx: self.tx.clone(),
        }
    }

    /// Route the `log` facade into this file. `RUST_LOG` overrides the
    /// default `info` level. Fails if a global logger is already installed.
    pub fn install(&self) -> OrchestratorResult<()> {
        Builder::new()
            .filter_level(LevelFilter::Info)
            .parse_default_env()
            .target(Target::Pipe(Box::new(self.writer())))
            .try_init()
            .map_err(|e| internal_error!("Failed to install file logger: {e}"))
    }

    /// Append queued lines until shutdown, then write out the backlog
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> OrchestratorResult<()> {
        let mut failed_writes = 0usize;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                chunk = self.rx.recv() => match chunk {
                    Some(chunk) => {
                        if self.file.write_all(&chunk).await.is_err() {
                            failed_writes += 1;
                        }
                    }
                    None => break,
                },
            }
        }

        // buffered chunks are still delivered after close
        self.rx.close();
        while let Some(chunk) = self.rx.recv().await {
            if self.file.write_all(&chunk).await.is_err() {
                failed_writes += 1;
            }
        }

        self.file
            .flush()
            .await
            .with_context("Failed to flush log file")?;

        if failed_writes > 0 {
            return Err(internal_error!(
                "{failed_writes} log writes to {} failed",
                self.path.display()
            ));
        }
        Ok(())
    }
}
