use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use pheap_types::{Handle, HeapId, Slot};

use crate::config::HeapConfig;
use crate::error::{StoreError, StoreResult};
use crate::layout::RegionLayout;
use crate::region::{RegionImage, RegionTable};
use crate::traits::{Heap, HeapStats, WriteBatch};
use crate::wal::{LogRecord, LogRecovery, WriteAheadLog};

/// On-disk snapshot: the region image plus the next transaction id.
#[derive(Serialize, Deserialize)]
struct Snapshot {
    next_txn: u64,
    image: RegionImage,
}

/// What [`DurableHeap::open`] found in the log.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Regions restored from the snapshot file.
    pub snapshot_regions: usize,
    /// Commit groups replayed from the log.
    pub groups_applied: usize,
    /// Groups without a commit record, dropped.
    pub groups_discarded: usize,
    /// Bytes cut from the end of the log: torn frames and uncommitted groups.
    pub truncated_bytes: u64,
}

/// File-backed heap that survives process crashes.
///
/// The live image is kept in memory; durability comes from a redo
/// [`WriteAheadLog`] in the heap directory. Every mutation is logged as a
/// group (`Allocate`/`Free`/`Write`/`SetRoot` records followed by a
/// `Commit` record) before it is applied to the image. Opening the heap loads
/// the last snapshot, replays committed groups, and cuts the log back to the
/// last commit record; a crash mid-commit leaves no partial effect.
pub struct DurableHeap {
    id: HeapId,
    dir: PathBuf,
    config: HeapConfig,
    table: RwLock<RegionTable>,
    wal: WriteAheadLog,
    next_txn: AtomicU64,
    recovery: RecoveryReport,
}

impl DurableHeap {
    /// Open (or create) the heap stored in `dir`.
    pub fn open(dir: &Path, config: HeapConfig) -> StoreResult<Self> {
        fs::create_dir_all(dir)?;

        let snapshot_path = dir.join(&config.snapshot_file);
        let (mut table, mut next_txn) = if snapshot_path.exists() {
            let snapshot: Snapshot = bincode::deserialize_from(BufReader::new(File::open(
                &snapshot_path,
            )?))
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
            (
                RegionTable::from_image(config.capacity, snapshot.image)?,
                snapshot.next_txn,
            )
        } else {
            (RegionTable::new(config.capacity), 1)
        };
        let snapshot_regions = table.stats().regions;

        let wal = WriteAheadLog::open(&dir.join(&config.wal_file), config.wal.clone())?;
        let log = wal.recover()?;
        next_txn = next_txn.max(log.max_txn + 1);
        let recovery = replay(&mut table, log, snapshot_regions)?;
        let id = HeapId::next();
        info!(
            heap = %id,
            dir = %dir.display(),
            regions = table.stats().regions,
            applied = recovery.groups_applied,
            discarded = recovery.groups_discarded,
            truncated = recovery.truncated_bytes,
            "durable heap opened"
        );

        Ok(Self {
            id,
            dir: dir.to_path_buf(),
            config,
            table: RwLock::new(table),
            wal,
            next_txn: AtomicU64::new(next_txn),
            recovery,
        })
    }

    /// Summary of the recovery performed by [`open`](Self::open).
    pub fn recovery(&self) -> RecoveryReport {
        self.recovery
    }

    /// Directory holding the log and snapshot files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The underlying log. Exposed for inspection and fault-injection tests.
    pub fn wal(&self) -> &WriteAheadLog {
        &self.wal
    }

    /// Write the live image to the snapshot file and truncate the log.
    ///
    /// The snapshot is written to a temporary file and renamed into place,
    /// so a crash during checkpoint leaves either the old snapshot plus the
    /// full log, or the new snapshot.
    pub fn checkpoint(&self) -> StoreResult<()> {
        let table = self.table.write().expect("lock poisoned");
        let snapshot = Snapshot {
            next_txn: self.next_txn.load(Ordering::SeqCst),
            image: table.image(),
        };

        let final_path = self.dir.join(&self.config.snapshot_file);
        let tmp_path = self.dir.join(format!("{}.tmp", self.config.snapshot_file));
        {
            let mut out = BufWriter::new(File::create(&tmp_path)?);
            bincode::serialize_into(&mut out, &snapshot)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            out.flush()?;
            out.get_ref().sync_all()?;
        }
        fs::rename(&tmp_path, &final_path)?;
        self.wal.truncate()?;

        info!(heap = %self.id, regions = table.stats().regions, "checkpoint written");
        Ok(())
    }

    fn begin(&self) -> u64 {
        self.next_txn.fetch_add(1, Ordering::SeqCst)
    }
}

/// Apply committed groups to `table` in commit order.
fn replay(
    table: &mut RegionTable,
    log: LogRecovery,
    snapshot_regions: usize,
) -> StoreResult<RecoveryReport> {
    let groups_applied = log.groups.len();
    for group in log.groups {
        debug!(txn = group.txn, records = group.records.len(), "replaying group");
        for record in group.records {
            apply_record(table, record)?;
        }
    }
    Ok(RecoveryReport {
        snapshot_regions,
        groups_applied,
        groups_discarded: log.discarded,
        truncated_bytes: log.truncated_bytes,
    })
}

fn apply_record(table: &mut RegionTable, record: LogRecord) -> StoreResult<()> {
    match record {
        LogRecord::Allocate {
            handle,
            layout,
            payload,
            ..
        } => table.insert_at(handle, &layout, &payload),
        LogRecord::Free { handle, .. } => {
            table.free(handle);
            Ok(())
        }
        LogRecord::Write { write, .. } => match table.apply_write(&write) {
            Ok(()) => Ok(()),
            Err(StoreError::DanglingHandle(handle)) => {
                warn!(%handle, "logged write names a released region; skipping");
                Ok(())
            }
            Err(e) => Err(e),
        },
        LogRecord::SetRoot { root, .. } => {
            if table.set_root(root).is_err() {
                warn!(root = ?root, "logged root names a released region; clearing");
                table.set_root(None)?;
            }
            Ok(())
        }
        LogRecord::Commit { .. } => Ok(()),
    }
}

impl Heap for DurableHeap {
    fn id(&self) -> HeapId {
        self.id
    }

    fn allocate(&self, layout: &RegionLayout, payload: &[u8]) -> StoreResult<Handle> {
        let mut table = self.table.write().expect("lock poisoned");
        let handle = table.reserve(layout, payload)?;
        let txn = self.begin();
        let record = LogRecord::Allocate {
            txn,
            handle,
            layout: *layout,
            payload: payload.to_vec(),
        };
        if let Err(e) = self.wal.commit_group(txn, &[record]) {
            table.free(handle);
            return Err(e);
        }
        debug!(heap = %self.id, %handle, txn, size = layout.size(), "region allocated");
        Ok(handle)
    }

    fn resolve(&self, handle: Handle) -> StoreResult<RegionLayout> {
        self.table.read().expect("lock poisoned").layout(handle)
    }

    fn deallocate(&self, handle: Handle) -> StoreResult<bool> {
        let mut table = self.table.write().expect("lock poisoned");
        if table.region(handle).is_err() {
            return Ok(false);
        }
        let txn = self.begin();
        self.wal.commit_group(txn, &[LogRecord::Free { txn, handle }])?;
        let freed = table.free(handle);
        debug!(heap = %self.id, %handle, txn, "region released");
        Ok(freed)
    }

    fn read_slot(&self, handle: Handle, slot: u32) -> StoreResult<Slot> {
        self.table.read().expect("lock poisoned").read_slot(handle, slot)
    }

    fn read_slots(&self, handle: Handle) -> StoreResult<Vec<Slot>> {
        self.table.read().expect("lock poisoned").read_slots(handle)
    }

    fn read_payload(&self, handle: Handle) -> StoreResult<Vec<u8>> {
        self.table.read().expect("lock poisoned").read_payload(handle)
    }

    fn commit(&self, batch: &WriteBatch) -> StoreResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut table = self.table.write().expect("lock poisoned");
        table.validate(batch)?;
        let txn = self.begin();
        let body: Vec<LogRecord> = batch
            .iter()
            .map(|write| LogRecord::Write { txn, write: *write })
            .collect();
        self.wal.commit_group(txn, &body)?;
        table.apply(batch)?;
        debug!(heap = %self.id, txn, writes = batch.len(), "batch committed");
        Ok(())
    }

    fn root(&self) -> StoreResult<Option<Handle>> {
        Ok(self.table.read().expect("lock poisoned").root())
    }

    fn set_root(&self, root: Option<Handle>) -> StoreResult<()> {
        let mut table = self.table.write().expect("lock poisoned");
        table.check_root(root)?;
        let txn = self.begin();
        self.wal.commit_group(txn, &[LogRecord::SetRoot { txn, root }])?;
        table.set_root(root)?;
        debug!(heap = %self.id, txn, root = ?root, "root set");
        Ok(())
    }

    fn stats(&self) -> HeapStats {
        self.table.read().expect("lock poisoned").stats()
    }
}

impl std::fmt::Debug for DurableHeap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("DurableHeap")
            .field("id", &self.id)
            .field("dir", &self.dir)
            .field("regions", &stats.regions)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::SlotWrite;
    use pheap_types::TypeTag;

    fn layout(slots: u32) -> RegionLayout {
        RegionLayout::new(TypeTag::derive("DurableTest"), slots, 0)
    }

    fn open(dir: &Path) -> DurableHeap {
        DurableHeap::open(dir, HeapConfig::default()).unwrap()
    }

    #[test]
    fn committed_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let h = {
            let heap = open(dir.path());
            let h = heap.allocate(&layout(2), &[]).unwrap();
            let mut batch = WriteBatch::new();
            batch.push(h, 0, Slot::Scalar(10));
            batch.push(h, 1, Slot::Scalar(20));
            heap.commit(&batch).unwrap();
            h
        };

        let heap = open(dir.path());
        assert_eq!(
            heap.read_slots(h).unwrap(),
            vec![Slot::Scalar(10), Slot::Scalar(20)]
        );
        assert_eq!(heap.recovery().groups_applied, 2);
        assert_eq!(heap.recovery().groups_discarded, 0);
    }

    #[test]
    fn group_without_commit_record_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let h = {
            let heap = open(dir.path());
            let h = heap.allocate(&layout(2), &[]).unwrap();
            // Crash after the body of txn 99 reached the log but before its
            // commit record did.
            for (slot, value) in [(0, 1), (1, 2)] {
                heap.wal()
                    .append(&LogRecord::Write {
                        txn: 99,
                        write: SlotWrite {
                            handle: h,
                            slot,
                            value: Slot::Scalar(value),
                        },
                    })
                    .unwrap();
            }
            h
        };

        let heap = open(dir.path());
        assert_eq!(heap.read_slots(h).unwrap(), vec![Slot::Absent, Slot::Absent]);
        assert_eq!(heap.recovery().groups_discarded, 1);
    }

    #[test]
    fn commits_after_torn_tail_survive_reopen() {
        use std::fs::OpenOptions;

        let dir = tempfile::tempdir().unwrap();
        let h = {
            let heap = open(dir.path());
            let h = heap.allocate(&layout(1), &[]).unwrap();
            heap.commit(&WriteBatch::single(h, 0, Slot::Scalar(1))).unwrap();
            h
        };
        // Crash while writing a frame: a header with half its payload.
        {
            let mut file = OpenOptions::new()
                .append(true)
                .open(dir.path().join("heap.wal"))
                .unwrap();
            file.write_all(&64u32.to_le_bytes()).unwrap();
            file.write_all(&0u32.to_le_bytes()).unwrap();
            file.write_all(&[0xAB; 32]).unwrap();
        }

        {
            let heap = open(dir.path());
            assert_eq!(heap.recovery().truncated_bytes, 40);
            assert_eq!(heap.read_slot(h, 0).unwrap(), Slot::Scalar(1));
            heap.commit(&WriteBatch::single(h, 0, Slot::Scalar(2))).unwrap();
        }

        let heap = open(dir.path());
        assert_eq!(heap.read_slot(h, 0).unwrap(), Slot::Scalar(2));
        assert_eq!(heap.recovery().truncated_bytes, 0);
        assert_eq!(heap.recovery().groups_applied, 3);
    }

    #[test]
    fn uncommitted_tail_is_cut_before_new_groups() {
        let dir = tempfile::tempdir().unwrap();
        let h = {
            let heap = open(dir.path());
            let h = heap.allocate(&layout(1), &[]).unwrap();
            heap.wal()
                .append(&LogRecord::Write {
                    txn: 500,
                    write: SlotWrite {
                        handle: h,
                        slot: 0,
                        value: Slot::Scalar(-1),
                    },
                })
                .unwrap();
            h
        };
        {
            let heap = open(dir.path());
            assert_eq!(heap.recovery().groups_discarded, 1);
            heap.commit(&WriteBatch::single(h, 0, Slot::Scalar(3))).unwrap();
        }
        let heap = open(dir.path());
        assert_eq!(heap.recovery().groups_discarded, 0);
        assert_eq!(heap.read_slot(h, 0).unwrap(), Slot::Scalar(3));
    }

    #[test]
    fn root_survives_reopen_and_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let h = {
            let heap = open(dir.path());
            let h = heap.allocate(&layout(1), &[]).unwrap();
            heap.set_root(Some(h)).unwrap();
            h
        };
        {
            let heap = open(dir.path());
            assert_eq!(heap.root().unwrap(), Some(h));
            heap.checkpoint().unwrap();
        }
        let heap = open(dir.path());
        assert_eq!(heap.root().unwrap(), Some(h));
        heap.deallocate(h).unwrap();
        drop(heap);
        assert_eq!(open(dir.path()).root().unwrap(), None);
    }

    #[test]
    fn txn_ids_continue_after_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let heap = open(dir.path());
            heap.allocate(&layout(1), &[]).unwrap();
        }
        let heap = open(dir.path());
        assert!(heap.begin() >= 2);
    }

    #[test]
    fn handles_are_not_reissued_after_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let first = {
            let heap = open(dir.path());
            let h = heap.allocate(&layout(1), &[]).unwrap();
            heap.deallocate(h).unwrap();
            h
        };
        let heap = open(dir.path());
        assert!(!heap.exists(first).unwrap());
        let second = heap.allocate(&layout(1), &[]).unwrap();
        assert!(second > first);
    }

    #[test]
    fn checkpoint_truncates_log_and_keeps_state() {
        let dir = tempfile::tempdir().unwrap();
        let h = {
            let heap = open(dir.path());
            let h = heap.allocate(&layout(1), b"").unwrap();
            heap.commit(&WriteBatch::single(h, 0, Slot::Scalar(7)))
                .unwrap();
            heap.checkpoint().unwrap();
            assert_eq!(heap.wal().offset(), 0);
            heap.commit(&WriteBatch::single(h, 0, Slot::Scalar(8)))
                .unwrap();
            h
        };

        let heap = open(dir.path());
        assert_eq!(heap.recovery().snapshot_regions, 1);
        assert_eq!(heap.recovery().groups_applied, 1);
        assert_eq!(heap.read_slot(h, 0).unwrap(), Slot::Scalar(8));
    }

    #[test]
    fn payload_is_durable() {
        let dir = tempfile::tempdir().unwrap();
        let string_layout = RegionLayout::new(TypeTag::derive("Str"), 0, 5);
        let h = {
            let heap = open(dir.path());
            heap.allocate(&string_layout, b"hello").unwrap()
        };
        let heap = open(dir.path());
        assert_eq!(heap.read_payload(h).unwrap(), b"hello");
    }

    #[test]
    fn invalid_batch_is_not_logged() {
        let dir = tempfile::tempdir().unwrap();
        let heap = open(dir.path());
        let h = heap.allocate(&layout(1), &[]).unwrap();
        let before = heap.wal().offset();
        let batch = WriteBatch::single(h, 5, Slot::Scalar(1));
        assert!(matches!(
            heap.commit(&batch),
            Err(StoreError::SlotOutOfRange { .. })
        ));
        assert_eq!(heap.wal().offset(), before);
    }

    #[test]
    fn out_of_space_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let config = HeapConfig {
            capacity: 32,
            ..HeapConfig::default()
        };
        let heap = DurableHeap::open(dir.path(), config).unwrap();
        heap.allocate(&layout(1), &[]).unwrap();
        assert!(matches!(
            heap.allocate(&layout(1), &[]),
            Err(StoreError::OutOfSpace { .. })
        ));
    }
}
