//! Splitting a byte stream into bounded block files.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

struct OpenBlock {
    file: BufWriter<File>,
    written: u64,
}

/// Writes a byte stream into a sequence of files, none larger than the
/// configured block size.
///
/// Files are created in the caller's destination directory and are owned by
/// the caller once [`finish`](Self::finish) returns them.
pub struct BoundedBlockWriter {
    dest_dir: PathBuf,
    max_block_size: u64,
    prefix: String,
    files: Vec<PathBuf>,
    current: Option<OpenBlock>,
    finished: bool,
}

impl BoundedBlockWriter {
    /// Create a writer rotating files at `max_block_size` bytes.
    pub fn new(dest_dir: impl Into<PathBuf>, max_block_size: u64) -> crate::Result<Self> {
        if max_block_size == 0 || max_block_size > crate::MAX_BLOCK_SIZE {
            return Err(crate::Error::InvalidBlockSize {
                size: max_block_size,
                max: crate::MAX_BLOCK_SIZE,
            });
        }
        Ok(Self {
            dest_dir: dest_dir.into(),
            max_block_size,
            prefix: Uuid::new_v4().simple().to_string(),
            files: Vec::new(),
            current: None,
            finished: false,
        })
    }

    /// Destination directory.
    pub fn dest_dir(&self) -> &Path {
        &self.dest_dir
    }

    /// Number of files created so far.
    pub fn block_count(&self) -> usize {
        self.files.len()
    }

    /// Append bytes, rotating to a new file whenever the current one is full.
    pub fn write(&mut self, mut buf: &[u8]) -> crate::Result<()> {
        if self.finished {
            return Err(crate::Error::IllegalState(
                "write after finish on block writer".to_string(),
            ));
        }

        while !buf.is_empty() {
            if self.current.is_none() {
                let next = self.open_next()?;
                self.current = Some(next);
            }
            let current = self
                .current
                .as_mut()
                .ok_or_else(|| crate::Error::IllegalState("no open block file".to_string()))?;

            let room = self.max_block_size - current.written;
            let n = usize::try_from(room).map_or(buf.len(), |room| room.min(buf.len()));
            current.file.write_all(&buf[..n])?;
            current.written += n as u64;
            buf = &buf[n..];

            if current.written == self.max_block_size {
                self.close_current()?;
            }
        }
        Ok(())
    }

    /// Close the last file and return every produced file in order.
    ///
    /// Empty input still produces one empty file.
    pub fn finish(&mut self) -> crate::Result<Vec<PathBuf>> {
        if self.finished {
            return Err(crate::Error::IllegalState(
                "block writer already finished".to_string(),
            ));
        }
        self.close_current()?;
        if self.files.is_empty() {
            let empty = self.open_next()?;
            self.current = Some(empty);
            self.close_current()?;
        }
        self.finished = true;
        tracing::debug!(
            blocks = self.files.len(),
            dir = %self.dest_dir.display(),
            "Finished splitting into blocks"
        );
        Ok(std::mem::take(&mut self.files))
    }

    fn open_next(&mut self) -> crate::Result<OpenBlock> {
        let path = self
            .dest_dir
            .join(format!("{}-{:06}.block", self.prefix, self.files.len() + 1));
        let file = OpenOptions::new().write(true).create_new(true).open(&path)?;
        self.files.push(path);
        Ok(OpenBlock {
            file: BufWriter::new(file),
            written: 0,
        })
    }

    fn close_current(&mut self) -> crate::Result<()> {
        if let Some(mut block) = self.current.take() {
            block.file.flush()?;
        }
        Ok(())
    }
}

impl Write for BoundedBlockWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        BoundedBlockWriter::write(self, buf).map_err(|e| match e {
            crate::Error::Io(io) => io,
            other => io::Error::other(other),
        })?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.current.as_mut() {
            Some(block) => block.file.flush(),
            None => Ok(()),
        }
    }
}

/// Split everything `reader` yields into block files of at most `max_block_size` bytes.
pub fn split_into_blocks<R: Read>(
    mut reader: R,
    dest_dir: impl Into<PathBuf>,
    max_block_size: u64,
) -> crate::Result<Vec<PathBuf>> {
    let mut writer = BoundedBlockWriter::new(dest_dir, max_block_size)?;
    io::copy(&mut reader, &mut writer)?;
    writer.finish()
}
