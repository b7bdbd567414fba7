//! Access to the memory captured in a dump

use crate::errors::ModuleReaderError as Error;
use goblin::mach::{
    header::{Header64, SIZEOF_HEADER_64},
    load_command::{
        DysymtabCommand, LoadCommandHeader, SegmentCommand64, SymtabCommand, UuidCommand,
        SIZEOF_DYSYMTAB_COMMAND, SIZEOF_LOAD_COMMAND, SIZEOF_SEGMENT_COMMAND_64,
        SIZEOF_SYMTAB_COMMAND, SIZEOF_UUID_COMMAND,
    },
    symbols::{Nlist64, SIZEOF_NLIST_64},
};
use scroll::{ctx::TryFromCtx, Endian, Pread};

pub trait DumpMemory {
    /// Copy as many bytes as are available at `address` into `buffer`, returning how many were
    /// copied. A short count is not an error.
    fn read_memory(&self, address: u64, buffer: &mut [u8]) -> usize;

    /// Fill all of `buffer` from `address`, failing if the dump doesn't cover the whole range.
    fn read_exact(&self, address: u64, buffer: &mut [u8]) -> Result<(), Error> {
        let read = self.read_memory(address, buffer);
        if read < buffer.len() {
            return Err(Error::ReadDumpMemory {
                address,
                length: buffer.len() as u64,
            });
        }
        Ok(())
    }

    /// Read a NUL-terminated ASCII string of at most `max_len` bytes.
    ///
    /// Reading stops at the first NUL, at the bound, or at the end of the readable range,
    /// whichever comes first. Non-ASCII bytes come back as `?`.
    fn read_string(&self, address: u64, max_len: usize) -> String {
        let mut buffer = vec![0u8; max_len];
        let read = self.read_memory(address, &mut buffer);
        buffer.truncate(read);
        buffer
            .iter()
            .take_while(|&&b| b != 0)
            .map(|&b| if b.is_ascii() { char::from(b) } else { '?' })
            .collect()
    }
}

impl<T: DumpMemory + ?Sized> DumpMemory for &T {
    fn read_memory(&self, address: u64, buffer: &mut [u8]) -> usize {
        (**self).read_memory(address, buffer)
    }
}

impl DumpMemory for [u8] {
    fn read_memory(&self, address: u64, buffer: &mut [u8]) -> usize {
        let Ok(start) = usize::try_from(address) else {
            return 0;
        };
        let Some(available) = self.get(start..) else {
            return 0;
        };
        let len = std::cmp::min(available.len(), buffer.len());
        buffer[..len].copy_from_slice(&available[..len]);
        len
    }
}

impl DumpMemory for Vec<u8> {
    fn read_memory(&self, address: u64, buffer: &mut [u8]) -> usize {
        self.as_slice().read_memory(address, buffer)
    }
}

/// Indicate that a DumpMemory implementation holds memory captured starting at the given
/// address, so that its offset 0 corresponds to that address.
pub struct MemoryAtAddress<T>(pub T, pub u64);

impl<T: DumpMemory> DumpMemory for MemoryAtAddress<T> {
    fn read_memory(&self, address: u64, buffer: &mut [u8]) -> usize {
        match address.checked_sub(self.1) {
            Some(offset) => self.0.read_memory(offset, buffer),
            None => 0,
        }
    }
}

/// Fixed-layout Mach-O structures that can be decoded straight out of dump memory.
pub trait MachStruct: Sized + for<'a> TryFromCtx<'a, Endian, Error = scroll::Error> {
    /// Size of the on-disk representation.
    const SIZE: usize;
}

impl MachStruct for Header64 {
    const SIZE: usize = SIZEOF_HEADER_64;
}

impl MachStruct for LoadCommandHeader {
    const SIZE: usize = SIZEOF_LOAD_COMMAND;
}

impl MachStruct for SegmentCommand64 {
    const SIZE: usize = SIZEOF_SEGMENT_COMMAND_64;
}

impl MachStruct for SymtabCommand {
    const SIZE: usize = SIZEOF_SYMTAB_COMMAND;
}

impl MachStruct for DysymtabCommand {
    const SIZE: usize = SIZEOF_DYSYMTAB_COMMAND;
}

impl MachStruct for UuidCommand {
    const SIZE: usize = SIZEOF_UUID_COMMAND;
}

impl MachStruct for Nlist64 {
    const SIZE: usize = SIZEOF_NLIST_64;
}

/// Read and decode a little-endian Mach-O structure at `address`.
pub fn read_struct<T: MachStruct, M: DumpMemory + ?Sized>(
    memory: &M,
    address: u64,
) -> Result<T, Error> {
    let mut bytes = vec![0u8; T::SIZE];
    memory.read_exact(address, &mut bytes)?;
    let value: T = bytes.pread_with(0, scroll::LE)?;
    Ok(value)
}
