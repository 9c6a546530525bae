// src/cold_store.rs
//
// Cold-tier archival. A dedicated writer thread drains a channel and
// appends CSV rows to per-instrument, per-UTC-day files:
//
//   {instrument}_{yyyymmdd}_orderbook.csv
//   {instrument}_{yyyymmdd}_trades.csv
//   {instrument}_{yyyymmdd}_ohlcv.csv
//
// Archival is strictly best-effort. A failed write is logged with a
// COLD_BATCH_DROPPED line and dropped; nothing here can stall or fail
// the trading path.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::NaiveDate;

use crate::types::{utc_date, OhlcvBar, PriceLevel, TimestampMs, Trade};

const IDLE_FLUSH_MS: u64 = 100;

/// Top-of-book copy captured at flush time.
#[derive(Debug, Clone, PartialEq)]
pub struct BookArchive {
    pub instrument: String,
    pub timestamp_ms: TimestampMs,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ColdRecord {
    Snapshot(BookArchive),
    Trades {
        instrument: String,
        trades: Vec<Trade>,
    },
    Ohlcv {
        instrument: String,
        bars: Vec<OhlcvBar>,
    },
}

enum ColdCommand {
    Record(ColdRecord),
    Flush,
    Shutdown,
}

pub fn archive_path(dir: &Path, instrument: &str, date: NaiveDate, kind: &str) -> PathBuf {
    dir.join(format!("{instrument}_{}_{kind}.csv", date.format("%Y%m%d")))
}

/// Handle to the background archiver. Dropping it flushes and joins.
pub struct ColdWriter {
    tx: Sender<ColdCommand>,
    handle: Option<JoinHandle<()>>,
}

impl ColdWriter {
    pub fn spawn(dir: PathBuf) -> Self {
        let (tx, rx) = mpsc::channel();
        let handle = thread::spawn(move || run_writer(dir, rx));
        Self {
            tx,
            handle: Some(handle),
        }
    }

    pub fn submit(&self, record: ColdRecord) {
        if self.tx.send(ColdCommand::Record(record)).is_err() {
            eprintln!("COLD_BATCH_DROPPED reason=writer_down");
        }
    }

    pub fn flush(&self) {
        let _ = self.tx.send(ColdCommand::Flush);
    }
}

impl Drop for ColdWriter {
    fn drop(&mut self) {
        let _ = self.tx.send(ColdCommand::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run_writer(dir: PathBuf, rx: Receiver<ColdCommand>) {
    let mut writers: HashMap<PathBuf, BufWriter<File>> = HashMap::new();
    loop {
        match rx.recv_timeout(Duration::from_millis(IDLE_FLUSH_MS)) {
            Ok(ColdCommand::Record(record)) => write_record(&dir, &mut writers, &record),
            Ok(ColdCommand::Flush) | Err(RecvTimeoutError::Timeout) => flush_all(&mut writers),
            Ok(ColdCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => {
                flush_all(&mut writers);
                break;
            }
        }
    }
}

fn write_record(dir: &Path, writers: &mut HashMap<PathBuf, BufWriter<File>>, record: &ColdRecord) {
    match record {
        ColdRecord::Snapshot(archive) => {
            let date = utc_date(archive.timestamp_ms);
            let path = archive_path(dir, &archive.instrument, date, "orderbook");
            let header = "timestamp_ms,side,level,price,size,order_count";
            with_writer(dir, writers, &path, header, |w| {
                for (i, level) in archive.bids.iter().enumerate() {
                    writeln!(
                        w,
                        "{},bid,{},{},{},{}",
                        archive.timestamp_ms, i, level.price, level.size, level.order_count
                    )?;
                }
                for (i, level) in archive.asks.iter().enumerate() {
                    writeln!(
                        w,
                        "{},ask,{},{},{},{}",
                        archive.timestamp_ms, i, level.price, level.size, level.order_count
                    )?;
                }
                Ok(())
            });
        }
        ColdRecord::Trades { instrument, trades } => {
            for trade in trades {
                let date = utc_date(trade.timestamp_ms);
                let path = archive_path(dir, instrument, date, "trades");
                let header = "timestamp_ms,trade_id,side,price,size";
                with_writer(dir, writers, &path, header, |w| {
                    writeln!(
                        w,
                        "{},{},{},{},{}",
                        trade.timestamp_ms,
                        trade.trade_id,
                        trade.side.as_str(),
                        trade.price,
                        trade.size
                    )
                });
            }
        }
        ColdRecord::Ohlcv { instrument, bars } => {
            for bar in bars {
                let date = utc_date(bar.start_ms);
                let path = archive_path(dir, instrument, date, "ohlcv");
                let header = "start_ms,open,high,low,close,volume";
                with_writer(dir, writers, &path, header, |w| {
                    writeln!(
                        w,
                        "{},{},{},{},{},{}",
                        bar.start_ms, bar.open, bar.high, bar.low, bar.close, bar.volume
                    )
                });
            }
        }
    }
}

/// Run `write` against the (possibly newly opened) writer for `path`.
/// Any failure drops the rows with a log line.
fn with_writer<F>(
    dir: &Path,
    writers: &mut HashMap<PathBuf, BufWriter<File>>,
    path: &Path,
    header: &str,
    write: F,
) where
    F: FnOnce(&mut BufWriter<File>) -> std::io::Result<()>,
{
    if !writers.contains_key(path) {
        match open_archive(dir, path, header) {
            Ok(writer) => {
                writers.insert(path.to_path_buf(), writer);
            }
            Err(err) => {
                eprintln!("COLD_BATCH_DROPPED path={} err={err}", path.display());
                return;
            }
        }
    }
    if let Some(writer) = writers.get_mut(path) {
        if let Err(err) = write(writer) {
            eprintln!("COLD_BATCH_DROPPED path={} err={err}", path.display());
            writers.remove(path);
        }
    }
}

fn open_archive(dir: &Path, path: &Path, header: &str) -> std::io::Result<BufWriter<File>> {
    fs::create_dir_all(dir)?;
    let is_new = !path.exists();
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut writer = BufWriter::new(file);
    if is_new {
        writeln!(writer, "{header}")?;
    }
    Ok(writer)
}

fn flush_all(writers: &mut HashMap<PathBuf, BufWriter<File>>) {
    for (path, writer) in writers.iter_mut() {
        if let Err(err) = writer.flush() {
            eprintln!("COLD_BATCH_DROPPED path={} err={err}", path.display());
        }
    }
}
