//! In-memory executables.
//!
//! [`ImageTable`] is a [`Loader`] over programs held in kernel memory, such as those
//! linked into the kernel image or unpacked from a boot module.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use pmm::{AddressSpace, MAX_SEGMENTS, VirtualAddress};
use spin::Mutex;

use crate::{Errno, Loader, ProgramImage};

/// One loadable segment of a [`MemoryImage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSegment {
    /// First virtual address of the segment.
    pub vaddr: VirtualAddress,
    /// Size of the segment in memory. Bytes past `data` are zero.
    pub mem_size: usize,
    /// Initialized contents.
    pub data: Vec<u8>,
    /// Whether the segment stays writable after loading.
    pub writable: bool,
}

/// A program image held in kernel memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryImage {
    entry: VirtualAddress,
    segments: Vec<ImageSegment>,
}

impl MemoryImage {
    pub fn new(entry: VirtualAddress) -> Self {
        Self {
            entry,
            segments: Vec::new(),
        }
    }

    pub fn with_segment(
        mut self,
        vaddr: VirtualAddress,
        data: &[u8],
        mem_size: usize,
        writable: bool,
    ) -> Self {
        self.segments.push(ImageSegment {
            vaddr,
            mem_size,
            data: data.to_vec(),
            writable,
        });
        self
    }

    pub fn entry(&self) -> VirtualAddress {
        self.entry
    }

    pub fn segments(&self) -> &[ImageSegment] {
        &self.segments
    }
}

impl ProgramImage for MemoryImage {
    fn load(&self, space: &mut AddressSpace) -> Result<VirtualAddress, Errno> {
        if self.segments.len() > MAX_SEGMENTS {
            log::warn!("image has {} segments", self.segments.len());
            return Err(Errno::NotExecutable);
        }
        if self.segments.iter().any(|s| s.data.len() > s.mem_size) {
            return Err(Errno::NotExecutable);
        }

        for segment in &self.segments {
            space.define_region(segment.vaddr, segment.mem_size, segment.writable)?;
        }
        space.prepare_load()?;
        for segment in &self.segments {
            space.load(segment.vaddr, &segment.data)?;
        }
        space.complete_load();
        Ok(self.entry)
    }
}

/// A path-indexed table of program images.
#[derive(Default)]
pub struct ImageTable {
    images: Mutex<BTreeMap<String, Arc<dyn ProgramImage>>>,
}

impl ImageTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `image` under `path`, replacing any previous image.
    pub fn insert(&self, path: &str, image: Arc<dyn ProgramImage>) {
        self.images.lock().insert(String::from(path), image);
    }

    pub fn remove(&self, path: &str) -> bool {
        self.images.lock().remove(path).is_some()
    }
}

impl Loader for ImageTable {
    fn open(&self, path: &str) -> Result<Arc<dyn ProgramImage>, Errno> {
        self.images.lock().get(path).cloned().ok_or(Errno::NotFound)
    }
}
