use anyhow::{Context, Result};
use memmap2::Mmap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

const MMAP_THRESHOLD: u64 = 1024 * 1024; // 1 MiB

/// File contents as raw bytes. Result records carry execution logs that can
/// grow past the mmap threshold; byte length doubles as a policy input.
pub enum FileBytes {
    Mapped(Mmap),
    Buffered(Vec<u8>),
}

impl FileBytes {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            FileBytes::Mapped(mmap) => mmap,
            FileBytes::Buffered(buf) => buf.as_slice(),
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }
}

pub fn read_file_bytes<P: AsRef<Path>>(path: P) -> Result<FileBytes> {
    let path = path.as_ref();
    let metadata = std::fs::metadata(path)
        .with_context(|| format!("Failed to read metadata for {}", path.display()))?;

    if metadata.len() > MMAP_THRESHOLD {
        // Use memory mapping for large files
        let file =
            File::open(path).with_context(|| format!("Failed to open file {}", path.display()))?;

        // Safety: read-only map of an existing regular file
        let mmap = unsafe { Mmap::map(&file) }
            .with_context(|| format!("Failed to memory-map {}", path.display()))?;

        Ok(FileBytes::Mapped(mmap))
    } else {
        // Read small files into memory
        let mut buf = Vec::with_capacity(metadata.len() as usize);
        File::open(path)
            .and_then(|mut f| f.read_to_end(&mut buf))
            .with_context(|| format!("Failed to read file {}", path.display()))?;

        Ok(FileBytes::Buffered(buf))
    }
}
