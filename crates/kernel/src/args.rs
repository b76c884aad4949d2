//! Argument vectors for new program images.
//!
//! Arguments are staged in kernel memory before the old image is touched, then
//! pushed onto the new image's stack:
//!
//! ```text
//!   USER_STACK_TOP -> +----------------------+
//!                     | argv[0] string, NUL  |
//!                     | argv[1] string, NUL  |
//!                     | ...                  |
//!                     | padding              |
//!                     | NULL                 |
//!                     | argv[argc - 1]       |
//!                     | ...                  |
//!   sp = argv      -> | argv[0]              |  (8-byte aligned)
//!                     +----------------------+
//! ```

use alloc::string::String;
use alloc::vec::Vec;

use pmm::arch::{STACK_SIZE, USER_POINTER_SIZE};
use pmm::{AccessError, AddressSpace, VirtualAddress};

use crate::Errno;

/// Alignment of the argv array.
const ARGV_ALIGN: usize = 8;

/// A staged argument vector.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ArgumentVector {
    args: Vec<Vec<u8>>,
}

/// Bytes the vector occupies on the stack: strings with terminators, pointer slots
/// including the NULL terminator, rounded up to the argv alignment.
fn footprint(string_bytes: usize, argc: usize) -> usize {
    (string_bytes + (argc + 1) * USER_POINTER_SIZE).next_multiple_of(ARGV_ALIGN)
}

/// The effective ceiling: the configured limit, bounded by the stack itself.
pub fn ceiling(arg_max: usize) -> usize {
    arg_max.min(STACK_SIZE)
}

impl ArgumentVector {
    /// Stages arguments supplied by the kernel.
    pub fn from_kernel(args: &[&str], limit: usize) -> Result<Self, Errno> {
        let vector = Self {
            args: args.iter().map(|arg| arg.as_bytes().to_vec()).collect(),
        };
        if vector.footprint() > limit {
            return Err(Errno::ArgumentListTooLong);
        }
        Ok(vector)
    }

    /// Copies a NULL-terminated array of string pointers at `argv` out of `space`.
    ///
    /// A null `argv` yields an empty vector.
    pub fn copy_in(space: &AddressSpace, argv: usize, limit: usize) -> Result<Self, Errno> {
        let mut args = Vec::new();
        if argv == 0 {
            return Ok(Self { args });
        }

        let mut string_bytes = 0;
        loop {
            if footprint(string_bytes, args.len()) > limit {
                return Err(Errno::ArgumentListTooLong);
            }

            let slot = args
                .len()
                .checked_mul(USER_POINTER_SIZE)
                .and_then(|offset| argv.checked_add(offset))
                .ok_or(Errno::BadAddress)?;
            let pointer = read_pointer(space, slot)?;
            if pointer == 0 {
                break;
            }

            let remaining = limit - footprint(string_bytes, args.len());
            let arg = space.copy_in_str(pointer, remaining).map_err(|err| match err {
                AccessError::TooLong(_) => Errno::ArgumentListTooLong,
                other => Errno::from(other),
            })?;
            string_bytes += arg.len() + 1;
            args.push(arg);
        }

        if footprint(string_bytes, args.len()) > limit {
            return Err(Errno::ArgumentListTooLong);
        }
        Ok(Self { args })
    }

    /// Returns the number of arguments.
    pub fn argc(&self) -> usize {
        self.args.len()
    }

    /// Returns the staged arguments.
    pub fn args(&self) -> impl Iterator<Item = &[u8]> {
        self.args.iter().map(Vec::as_slice)
    }

    /// Returns the first argument as a string, for naming the process.
    pub fn program_name(&self) -> Option<String> {
        self.args
            .first()
            .map(|arg| String::from_utf8_lossy(arg).into_owned())
    }

    /// Returns the number of stack bytes the vector occupies once pushed.
    pub fn footprint(&self) -> usize {
        let string_bytes = self.args.iter().map(|arg| arg.len() + 1).sum();
        footprint(string_bytes, self.args.len())
    }

    /// Pushes the vector below `stack_top`. Returns `(argv, sp)`; both are the address
    /// of the pointer array.
    pub fn push(
        &self,
        space: &mut AddressSpace,
        stack_top: VirtualAddress,
    ) -> Result<(usize, usize), Errno> {
        let top = stack_top.as_usize();
        let mut cursor = top;
        let mut pointers = Vec::with_capacity(self.args.len() + 1);

        for arg in &self.args {
            cursor -= arg.len() + 1;
            space.copy_out(cursor, arg)?;
            space.copy_out(cursor + arg.len(), &[0])?;
            pointers.push(cursor);
        }
        pointers.push(0);

        let sp = top - self.footprint();
        debug_assert!(sp % ARGV_ALIGN == 0);
        for (index, pointer) in pointers.iter().enumerate() {
            write_pointer(space, sp + index * USER_POINTER_SIZE, *pointer)?;
        }

        log::trace!("pushed {} arguments, sp {:#x}", self.args.len(), sp);
        Ok((sp, sp))
    }
}

/// Reads a user pointer stored little-endian at `addr`.
pub fn read_pointer(space: &AddressSpace, addr: usize) -> Result<usize, Errno> {
    let mut bytes = [0u8; core::mem::size_of::<usize>()];
    space.copy_in(addr, &mut bytes[..USER_POINTER_SIZE])?;
    Ok(usize::from_le_bytes(bytes))
}

/// Writes a user pointer little-endian at `addr`.
pub fn write_pointer(space: &mut AddressSpace, addr: usize, value: usize) -> Result<(), Errno> {
    let bytes = value.to_le_bytes();
    space.copy_out(addr, &bytes[..USER_POINTER_SIZE])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use alloc::sync::Arc;

    use super::*;
    use pmm::arch::{PAGE_SIZE, USER_STACK_TOP};
    use pmm::{BootMemoryRegion, FrameAllocator, PhysicalAddress, PhysicalMemory};

    struct Ram(usize);

    impl BootMemoryRegion for Ram {
        fn base(&self) -> PhysicalAddress {
            PhysicalAddress::new(0)
        }

        fn size(&self) -> usize {
            self.0
        }

        fn is_usable(&self) -> bool {
            true
        }
    }

    const DATA: usize = 0x1000;

    fn space() -> AddressSpace {
        let size = 128 * PAGE_SIZE;
        let mut space = AddressSpace::new(Arc::new(FrameAllocator::bootstrap(
            &[Ram(size)],
            PhysicalMemory::emulated(size),
        )));
        space
            .define_region(VirtualAddress::new(DATA), 8 * PAGE_SIZE, true)
            .unwrap();
        space.prepare_load().unwrap();
        space.complete_load();
        space
    }

    /// Lays out `args` in the data segment the way a user program would.
    fn stage(space: &mut AddressSpace, args: &[&str]) -> usize {
        let mut cursor = DATA + (args.len() + 1) * USER_POINTER_SIZE;
        for (index, arg) in args.iter().enumerate() {
            write_pointer(space, DATA + index * USER_POINTER_SIZE, cursor).unwrap();
            space.copy_out(cursor, arg.as_bytes()).unwrap();
            space.copy_out(cursor + arg.len(), &[0]).unwrap();
            cursor += arg.len() + 1;
        }
        write_pointer(space, DATA + args.len() * USER_POINTER_SIZE, 0).unwrap();
        DATA
    }

    #[test]
    fn footprint_includes_terminators_and_padding() {
        let args = ArgumentVector::from_kernel(&["ls", "-l"], 1024).unwrap();
        // "ls\0-l\0" = 6 bytes, 3 pointer slots.
        assert_eq!(args.footprint(), (6 + 3 * USER_POINTER_SIZE).next_multiple_of(8));
        assert_eq!(ArgumentVector::default().footprint(), USER_POINTER_SIZE.next_multiple_of(8));
    }

    #[test]
    fn from_kernel_enforces_limit() {
        let args = ["x"; 4];
        let needed = ArgumentVector::from_kernel(&args, usize::MAX).unwrap().footprint();
        assert!(ArgumentVector::from_kernel(&args, needed).is_ok());
        assert_eq!(
            ArgumentVector::from_kernel(&args, needed - 1),
            Err(Errno::ArgumentListTooLong)
        );
    }

    #[test]
    fn copy_in_reads_user_vector() {
        let mut space = space();
        let argv = stage(&mut space, &["prog", "arg"]);
        let args = ArgumentVector::copy_in(&space, argv, 1024).unwrap();
        assert_eq!(args.argc(), 2);
        assert_eq!(args.args().collect::<Vec<_>>(), [&b"prog"[..], &b"arg"[..]]);
        assert_eq!(args.program_name().as_deref(), Some("prog"));
    }

    #[test]
    fn copy_in_null_argv_is_empty() {
        let space = space();
        assert_eq!(ArgumentVector::copy_in(&space, 0, 64).unwrap().argc(), 0);
    }

    #[test]
    fn copy_in_rejects_oversized_vector() {
        let mut space = space();
        let argv = stage(&mut space, &["aaaaaaaa", "bbbbbbbb", "cccccccc"]);
        assert_eq!(
            ArgumentVector::copy_in(&space, argv, 32),
            Err(Errno::ArgumentListTooLong)
        );
    }

    #[test]
    fn copy_in_rejects_bad_pointers() {
        let mut space = space();
        write_pointer(&mut space, DATA, 0x3000).unwrap();
        assert_eq!(
            ArgumentVector::copy_in(&space, DATA, 1024),
            Err(Errno::BadAddress)
        );
        assert_eq!(
            ArgumentVector::copy_in(&space, 0x5000, 1024),
            Err(Errno::BadAddress)
        );
    }

    #[test]
    fn push_lays_out_strings_and_aligned_argv() {
        let mut space = space();
        let args = ArgumentVector::from_kernel(&["prog", "hello"], 1024).unwrap();
        let (argv, sp) = args
            .push(&mut space, VirtualAddress::new(USER_STACK_TOP))
            .unwrap();

        assert_eq!(argv, sp);
        assert_eq!(sp % 8, 0);
        assert_eq!(sp, USER_STACK_TOP - args.footprint());

        let first = read_pointer(&space, argv).unwrap();
        let second = read_pointer(&space, argv + USER_POINTER_SIZE).unwrap();
        assert_eq!(read_pointer(&space, argv + 2 * USER_POINTER_SIZE).unwrap(), 0);
        assert_eq!(first, USER_STACK_TOP - 5);
        assert_eq!(second, first - 6);
        assert_eq!(space.copy_in_str(first, 16).unwrap(), b"prog");
        assert_eq!(space.copy_in_str(second, 16).unwrap(), b"hello");
    }

    #[test]
    fn ceiling_is_bounded_by_stack() {
        assert_eq!(ceiling(usize::MAX), STACK_SIZE);
        assert_eq!(ceiling(64), 64);
    }
}
