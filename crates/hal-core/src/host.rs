use std::fmt;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use memmap2::Mmap;

use crate::error::Result;

/// Host memory that a buffer can wrap without copying.
pub trait HostMemory: Send + Sync {
    fn bytes(&self) -> &[u8];
}

impl HostMemory for Vec<u8> {
    fn bytes(&self) -> &[u8] {
        self
    }
}

impl HostMemory for Box<[u8]> {
    fn bytes(&self) -> &[u8] {
        self
    }
}

impl HostMemory for Mmap {
    fn bytes(&self) -> &[u8] {
        self
    }
}

/// Externally owned host memory, e.g. a memory-mapped model file.
///
/// Buffers built from a region hold a handle to it; releasing such a buffer
/// drops that handle and never the memory the owner still refers to.
#[derive(Clone)]
pub struct HostRegion(Arc<dyn HostMemory>);

impl HostRegion {
    pub fn new(memory: impl HostMemory + 'static) -> Self {
        HostRegion(Arc::new(memory))
    }

    /// Map a whole file read-only.
    pub fn map_file(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        // The mapping stays valid for as long as the region lives; callers
        // must not truncate the file underneath it.
        let mmap = unsafe { Mmap::map(&file)? };
        tracing::debug!("mapped {} ({} bytes)", path.display(), mmap.len());
        Ok(HostRegion::new(mmap))
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.bytes()
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Start address of the region.
    pub fn addr(&self) -> usize {
        self.as_bytes().as_ptr() as usize
    }

    /// Number of live handles to the region, the owner's included.
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }
}

impl fmt::Debug for HostRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostRegion")
            .field("addr", &format_args!("{:#x}", self.addr()))
            .field("len", &self.len())
            .finish()
    }
}
