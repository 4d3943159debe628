use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::model::StoredVersion;
use crate::store::StoreError;

/// Append-only log of archived record versions.
///
/// On-disk framing: `[Length (4b LE)][rkyv bytes (N)]` repeated.
#[derive(Debug)]
pub struct Segment {
    pub file_path: PathBuf,
    file: File,
    current_offset: u64,
    strict: bool,
}

impl Segment {
    pub fn new(path: &Path, strict: bool) -> io::Result<Self> {
        let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(path)?;

        let current_offset = file.metadata()?.len();

        Ok(Self {
            file_path: path.to_path_buf(),
           file,
           current_offset,
           strict,
        })
    }

    /// Whether every append is followed by `sync_data`.
    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Flushes everything appended so far, regardless of the durability mode.
    pub fn sync(&self) -> io::Result<()> {
        self.file.sync_all()
    }

    pub fn append(&mut self, version: &StoredVersion) -> io::Result<u64> {
        let bytes = rkyv::to_bytes::<_, 4096>(version)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;

        let start = self.current_offset;

        self.file.seek(SeekFrom::Start(start))?;
        let len = bytes.len() as u32;
        self.file.write_all(&len.to_le_bytes())?;
        self.file.write_all(&bytes)?;

        if self.strict {
            self.file.sync_data()?;
        }

        self.current_offset += 4 + bytes.len() as u64;
        Ok(start)
    }

    pub fn read(&self, offset: u64) -> Result<StoredVersion, StoreError> {
        // Clone the handle so readers never move the writer's cursor
        let mut file = self.file.try_clone()?;
        file.seek(SeekFrom::Start(offset))?;
        read_frame(&mut file, offset)
    }

    /// Every frame in append order, paired with its offset.
    pub fn scan(&self) -> Result<Vec<(u64, StoredVersion)>, StoreError> {
        let mut file = self.file.try_clone()?;
        file.seek(SeekFrom::Start(0))?;

        let mut frames = Vec::new();
        let mut offset = 0;
        while offset < self.current_offset {
            let version = read_frame(&mut file, offset)?;
            let next = file.stream_position()?;
            frames.push((offset, version));
            offset = next;
        }
        Ok(frames)
    }
}

fn read_frame(file: &mut File, offset: u64) -> Result<StoredVersion, StoreError> {
    let mut len_buf = [0u8; 4];
    file.read_exact(&mut len_buf)?;
    let len = u32::from_le_bytes(len_buf) as usize;

    let mut bytes = vec![0u8; len];
    file.read_exact(&mut bytes)?;

    // rkyv needs the archive aligned before validation
    let mut aligned = rkyv::AlignedVec::with_capacity(len);
    aligned.extend_from_slice(&bytes);

    rkyv::from_bytes::<StoredVersion>(&aligned)
        .map_err(|e| StoreError::Corrupt { offset, reason: e.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Field;

    fn version(key: u128, title: &str) -> StoredVersion {
        StoredVersion {
            key,
            template: None,
            fields: vec![Field::new("title", title)],
            modified: 10,
            accessed: 10,
            deleted: false,
        }
    }

    #[test]
    fn appended_frames_read_back_by_offset_and_scan() {
        let dir = tempfile::tempdir().unwrap();
        let mut segment = Segment::new(&dir.path().join("log.dat"), false).unwrap();

        let a = segment.append(&version(1, "first")).unwrap();
        let b = segment.append(&version(2, "second")).unwrap();

        assert_eq!(a, 0);
        assert_eq!(segment.read(b).unwrap(), version(2, "second"));

        let offsets: Vec<u64> = segment.scan().unwrap().into_iter().map(|(o, _)| o).collect();
        assert_eq!(offsets, vec![a, b]);
    }

    #[test]
    fn reopened_segment_appends_after_existing_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.dat");
        {
            let mut segment = Segment::new(&path, true).unwrap();
            segment.append(&version(1, "first")).unwrap();
        }

        let mut segment = Segment::new(&path, true).unwrap();
        let offset = segment.append(&version(1, "again")).unwrap();

        assert!(offset > 0);
        assert_eq!(segment.scan().unwrap().len(), 2);
    }
}
