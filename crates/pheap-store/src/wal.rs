use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use pheap_types::Handle;

use crate::config::{SyncMode, WalConfig};
use crate::error::{StoreError, StoreResult};
use crate::layout::RegionLayout;
use crate::traits::SlotWrite;

/// One redo record in the heap's write-ahead log.
///
/// Every record belongs to a transaction group identified by `txn`. A group
/// takes effect on recovery only once its [`LogRecord::Commit`] is read.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogRecord {
    /// A region was carved out at `handle`.
    Allocate {
        txn: u64,
        handle: Handle,
        layout: RegionLayout,
        payload: Vec<u8>,
    },
    /// A region was released.
    Free { txn: u64, handle: Handle },
    /// A slot was assigned.
    Write { txn: u64, write: SlotWrite },
    /// The heap's root reference changed.
    SetRoot { txn: u64, root: Option<Handle> },
    /// The group `txn` is complete.
    Commit { txn: u64 },
}

impl LogRecord {
    pub fn txn(&self) -> u64 {
        match self {
            Self::Allocate { txn, .. }
            | Self::Free { txn, .. }
            | Self::Write { txn, .. }
            | Self::SetRoot { txn, .. }
            | Self::Commit { txn } => *txn,
        }
    }
}

/// Frame header: payload length then payload CRC32, both little-endian.
const FRAME_HEADER: u64 = 8;

/// The body of one group whose commit record was found.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommittedGroup {
    pub txn: u64,
    pub records: Vec<LogRecord>,
}

/// What [`WriteAheadLog::recover`] found.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LogRecovery {
    /// Committed groups, in commit order.
    pub groups: Vec<CommittedGroup>,
    /// Groups cut off before their commit record.
    pub discarded: usize,
    /// Highest transaction id seen in any readable frame.
    pub max_txn: u64,
    /// Bytes removed from the end of the file.
    pub truncated_bytes: u64,
}

struct WalWriter {
    writer: BufWriter<File>,
    /// Length of the log file as far as this writer knows.
    offset: u64,
}

/// Crash-recoverable redo log of commit groups.
///
/// On-disk format, one frame per record:
/// ```text
/// [4 bytes: payload length (little-endian u32)]
/// [4 bytes: CRC32 of payload (little-endian u32)]
/// [N bytes: payload (bincode-serialized LogRecord)]
/// ```
/// Groups are written contiguously: body frames, then a `Commit` frame.
/// The durable log is the prefix ending at the last `Commit` frame that can
/// be read intact. [`recover`](Self::recover) cuts the file back to that
/// prefix, so later appends never land behind a torn or orphaned tail.
pub struct WriteAheadLog {
    path: PathBuf,
    writer: Mutex<WalWriter>,
    config: WalConfig,
}

impl WriteAheadLog {
    /// Open (or create) the log file at `path`.
    ///
    /// Call [`recover`](Self::recover) before appending to a log that may
    /// hold a torn tail.
    pub fn open(path: &Path, config: WalConfig) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;
        let offset = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(WalWriter {
                writer: BufWriter::new(file),
                offset,
            }),
            config,
        })
    }

    /// Append a single frame and flush it. Returns the frame's offset.
    ///
    /// A lone record forms no group on its own; it takes effect only if a
    /// `Commit` for its `txn` follows.
    pub fn append(&self, record: &LogRecord) -> StoreResult<u64> {
        let mut w = self.writer.lock().expect("WAL mutex poisoned");
        let offset = write_frame(&mut w, record)?;
        self.flush(&mut w)?;
        debug!(offset, txn = record.txn(), "WAL append");
        Ok(offset)
    }

    /// Append a whole transaction group: every body record, a flush, then
    /// the commit record and a second flush.
    ///
    /// The writer lock is held throughout, so groups never interleave.
    pub fn commit_group(&self, txn: u64, body: &[LogRecord]) -> StoreResult<u64> {
        let mut w = self.writer.lock().expect("WAL mutex poisoned");
        let start = w.offset;
        for record in body {
            write_frame(&mut w, record)?;
        }
        self.flush(&mut w)?;
        write_frame(&mut w, &LogRecord::Commit { txn })?;
        self.flush(&mut w)?;
        debug!(txn, records = body.len(), offset = start, "WAL group committed");
        Ok(start)
    }

    /// Read back every committed group and cut the file to the end of the
    /// last one.
    ///
    /// Scanning stops at the first frame that is short, fails its CRC, or
    /// does not decode; nothing after it is trusted. Records after the last
    /// commit record belong to a group that never committed and are dropped
    /// with it.
    pub fn recover(&self) -> StoreResult<LogRecovery> {
        let mut w = self.writer.lock().expect("WAL mutex poisoned");
        w.writer.flush()?;

        let mut reader = BufReader::new(File::open(&self.path)?);
        let file_len = reader.get_ref().metadata()?.len();

        let mut recovery = LogRecovery::default();
        let mut open_group: Option<CommittedGroup> = None;
        let mut offset = 0u64;
        let mut durable_len = 0u64;

        while let Some((record, frame_len)) = read_frame(&mut reader, offset, file_len)? {
            offset += frame_len;
            let txn = record.txn();
            recovery.max_txn = recovery.max_txn.max(txn);

            if let LogRecord::Commit { txn } = record {
                let group = match open_group.take() {
                    Some(group) if group.txn == txn => group,
                    other => {
                        if let Some(orphan) = other {
                            warn!(txn = orphan.txn, records = orphan.records.len(), "group superseded before commit; discarding");
                            recovery.discarded += 1;
                        }
                        CommittedGroup { txn, records: Vec::new() }
                    }
                };
                recovery.groups.push(group);
                durable_len = offset;
                continue;
            }

            match open_group.as_mut() {
                Some(group) if group.txn == txn => group.records.push(record),
                _ => {
                    if let Some(orphan) = open_group.take() {
                        warn!(txn = orphan.txn, records = orphan.records.len(), "group superseded before commit; discarding");
                        recovery.discarded += 1;
                    }
                    open_group = Some(CommittedGroup {
                        txn,
                        records: vec![record],
                    });
                }
            }
        }

        if let Some(orphan) = open_group {
            warn!(txn = orphan.txn, records = orphan.records.len(), "discarding uncommitted WAL group");
            recovery.discarded += 1;
        }

        if durable_len < file_len {
            recovery.truncated_bytes = file_len - durable_len;
            let file = OpenOptions::new().write(true).open(&self.path)?;
            file.set_len(durable_len)?;
            file.sync_all()?;
            w.writer = BufWriter::new(OpenOptions::new().append(true).open(&self.path)?);
            w.offset = durable_len;
            warn!(
                kept = durable_len,
                dropped = recovery.truncated_bytes,
                "WAL cut back to last commit record"
            );
        }

        debug!(groups = recovery.groups.len(), discarded = recovery.discarded, "WAL recovery complete");
        Ok(recovery)
    }

    /// Drop every frame.
    pub fn truncate(&self) -> StoreResult<()> {
        let mut w = self.writer.lock().expect("WAL mutex poisoned");
        w.writer.flush()?;
        let file = OpenOptions::new().write(true).open(&self.path)?;
        file.set_len(0)?;
        if matches!(self.config.sync_mode, SyncMode::EveryWrite) {
            file.sync_all()?;
        }
        w.writer = BufWriter::new(OpenOptions::new().append(true).open(&self.path)?);
        w.offset = 0;
        debug!("WAL truncated");
        Ok(())
    }

    /// Current end of the log.
    pub fn offset(&self) -> u64 {
        self.writer.lock().expect("WAL mutex poisoned").offset
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, w: &mut WalWriter) -> StoreResult<()> {
        w.writer.flush()?;
        if matches!(self.config.sync_mode, SyncMode::EveryWrite) {
            w.writer.get_ref().sync_all()?;
        }
        Ok(())
    }
}

fn write_frame(w: &mut WalWriter, record: &LogRecord) -> StoreResult<u64> {
    let payload =
        bincode::serialize(record).map_err(|e| StoreError::Serialization(e.to_string()))?;
    let start = w.offset;
    w.writer.write_all(&(payload.len() as u32).to_le_bytes())?;
    w.writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    w.writer.write_all(&payload)?;
    w.offset += FRAME_HEADER + payload.len() as u64;
    Ok(start)
}

/// Read the frame at `offset`. Returns `None` at the end of the readable
/// prefix, logging why when it ends early.
fn read_frame(
    reader: &mut BufReader<File>,
    offset: u64,
    file_len: u64,
) -> StoreResult<Option<(LogRecord, u64)>> {
    if offset == file_len {
        return Ok(None);
    }
    if offset + FRAME_HEADER > file_len {
        warn!(offset, file_len, "torn WAL frame header");
        return Ok(None);
    }
    let mut header = [0u8; FRAME_HEADER as usize];
    reader.read_exact(&mut header)?;
    let [l0, l1, l2, l3, c0, c1, c2, c3] = header;
    let length = u32::from_le_bytes([l0, l1, l2, l3]) as u64;
    let crc = u32::from_le_bytes([c0, c1, c2, c3]);

    if length == 0 || offset + FRAME_HEADER + length > file_len {
        warn!(offset, length, file_len, "torn WAL frame");
        return Ok(None);
    }
    let mut payload = vec![0u8; length as usize];
    reader.read_exact(&mut payload)?;
    if crc32fast::hash(&payload) != crc {
        warn!(offset, "WAL frame fails CRC check");
        return Ok(None);
    }
    match bincode::deserialize::<LogRecord>(&payload) {
        Ok(record) => Ok(Some((record, FRAME_HEADER + length))),
        Err(e) => {
            warn!(offset, error = %e, "undecodable WAL frame");
            Ok(None)
        }
    }
}
