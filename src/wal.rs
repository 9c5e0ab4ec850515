use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::limits::MAX_JOURNAL_RECORD_LEN;

fn encode_record(record: &impl Serialize) -> io::Result<Vec<u8>> {
    let payload =
        bincode::serialize(record).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if payload.len() > MAX_JOURNAL_RECORD_LEN {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "journal record too large"));
    }
    let mut frame = Vec::with_capacity(payload.len() + 8);
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&payload);
    frame.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    Ok(frame)
}

/// Append-only journal.
///
/// Frame: `[u32 len][bincode record][u32 crc32]`, little-endian. A frame is
/// only trusted when it is complete and its checksum matches, so a crash in
/// the middle of an append loses that record and nothing before it.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    /// File length covered by the last successful `flush_sync`.
    synced_len: u64,
    /// Bytes and records buffered since then.
    pending_len: u64,
    pending_records: u64,
    appends_since_compact: u64,
}

/// Result of reading a journal back.
#[derive(Debug)]
pub struct Replay<E> {
    pub records: Vec<E>,
    /// Length of the intact prefix of the file.
    pub valid_len: u64,
    /// Bytes after `valid_len` were unreadable and ignored.
    pub torn_tail: bool,
}

impl Wal {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let synced_len = file.metadata()?.len();
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            synced_len,
            pending_len: 0,
            pending_records: 0,
            appends_since_compact: 0,
        })
    }

    #[cfg(test)]
    pub fn append(&mut self, record: &impl Serialize) -> io::Result<()> {
        self.append_buffered(record)?;
        self.flush_sync()
    }

    /// Buffer a record; durable only after `flush_sync`.
    pub fn append_buffered(&mut self, record: &impl Serialize) -> io::Result<()> {
        let frame = encode_record(record)?;
        self.pending_len += frame.len() as u64;
        self.pending_records += 1;
        self.writer.write_all(&frame)
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.synced_len += self.pending_len;
        self.appends_since_compact += self.pending_records;
        self.pending_len = 0;
        self.pending_records = 0;
        Ok(())
    }

    /// Drop everything appended since the last successful `flush_sync`,
    /// whether still buffered or already written, and cut the file back.
    pub fn rollback(&mut self) -> io::Result<()> {
        let file = OpenOptions::new().append(true).open(&self.path)?;
        let stale = std::mem::replace(&mut self.writer, BufWriter::new(file));
        // `into_parts` hands back the buffer instead of writing it out.
        let _ = stale.into_parts();
        let file = self.writer.get_ref();
        file.set_len(self.synced_len)?;
        file.sync_all()?;
        self.pending_len = 0;
        self.pending_records = 0;
        Ok(())
    }

    /// Length of the durable prefix of the file.
    pub fn synced_len(&self) -> u64 {
        self.synced_len
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn snapshot_path(path: &Path) -> PathBuf {
        path.with_extension("wal.tmp")
    }

    /// Write `records` to a sibling temp file and fsync it.
    pub fn write_snapshot<E: Serialize>(path: &Path, records: &[E]) -> io::Result<()> {
        let file = File::create(Self::snapshot_path(path))?;
        let mut writer = BufWriter::new(file);
        for record in records {
            writer.write_all(&encode_record(record)?)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the snapshot over the journal and reopen it for appending.
    pub fn swap_snapshot(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        fs::rename(Self::snapshot_path(&self.path), &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.synced_len = file.metadata()?.len();
        self.writer = BufWriter::new(file);
        self.pending_len = 0;
        self.pending_records = 0;
        self.appends_since_compact = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact<E: Serialize>(&mut self, records: &[E]) -> io::Result<()> {
        Self::write_snapshot(&self.path, records)?;
        self.swap_snapshot()
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Read every intact record. A missing file is an empty journal.
    pub fn replay<E: DeserializeOwned>(path: &Path) -> io::Result<Replay<E>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(Replay { records: Vec::new(), valid_len: 0, torn_tail: false });
            }
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut records = Vec::new();
        let mut valid_len = 0u64;

        loop {
            if reader.fill_buf()?.is_empty() {
                return Ok(Replay { records, valid_len, torn_tail: false });
            }
            let Some(payload) = read_frame(&mut reader)? else { break };
            let Ok(record) = bincode::deserialize::<E>(&payload) else { break };
            records.push(record);
            valid_len += (payload.len() + 8) as u64;
        }

        Ok(Replay { records, valid_len, torn_tail: true })
    }

    /// Cut the file back to its intact prefix so later appends are readable.
    pub fn discard_tail(path: &Path, valid_len: u64) -> io::Result<()> {
        let file = OpenOptions::new().write(true).open(path)?;
        file.set_len(valid_len)?;
        file.sync_all()
    }
}

/// One checked frame, or `None` if it is short, oversized or fails its CRC.
fn read_frame(reader: &mut impl Read) -> io::Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    if !read_full(reader, &mut len_buf)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_JOURNAL_RECORD_LEN {
        return Ok(None);
    }

    let mut payload = vec![0u8; len];
    if !read_full(reader, &mut payload)? {
        return Ok(None);
    }

    let mut crc_buf = [0u8; 4];
    if !read_full(reader, &mut crc_buf)? {
        return Ok(None);
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    Ok(Some(payload))
}

fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}
