//! Symbol table materialization and lookups

use crate::dump_memory::DumpMemory;
use crate::errors::ModuleReaderError as Error;
use crate::module_reader::MachModule;
use goblin::mach::{
    load_command::{LC_DYSYMTAB, LC_SYMTAB},
    symbols::{Nlist64, N_SECT, N_STAB, N_TYPE, SIZEOF_NLIST_64},
};
use scroll::Pread;
use std::ops::Range;

/// How many symbol table entries are read from the dump at a time.
const SYMBOL_READ_CHUNK: usize = 0x1000;

/// The fields of an `nlist_64` entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SymbolEntry {
    /// Offset of the name in the string table.
    pub name_offset: u32,
    pub kind: u8,
    pub section: u8,
    pub value: u64,
}

impl SymbolEntry {
    fn is_section_definition(&self) -> bool {
        self.kind & N_STAB == 0 && self.kind & N_TYPE == N_SECT
    }
}

impl From<Nlist64> for SymbolEntry {
    fn from(nlist: Nlist64) -> Self {
        SymbolEntry {
            name_offset: nlist.n_strx,
            kind: nlist.n_type,
            section: nlist.n_sect,
            value: nlist.n_value,
        }
    }
}

/// The symbol entries read from a module, along with the range of externally defined ones.
#[derive(Debug)]
pub struct SymbolTable {
    entries: Vec<SymbolEntry>,
    external: Range<usize>,
}

impl SymbolTable {
    pub fn entries(&self) -> &[SymbolEntry] {
        &self.entries
    }

    /// Entries listed as externally defined by the dynamic symbol table.
    pub fn external_entries(&self) -> &[SymbolEntry] {
        &self.entries[self.external.clone()]
    }
}

/// A symbol found by address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub address: u64,
    /// Distance from `address` to the address that was looked up.
    pub offset: u64,
}

impl<T: DumpMemory> MachModule<T> {
    /// Resolve `name` to its address in the dump.
    ///
    /// Externally defined symbols are searched first, then the whole table. Names in the image
    /// are compared after dropping one leading underscore (see
    /// [`ModuleReaderConfig::strip_leading_underscore`](crate::ModuleReaderConfig)), so `main`
    /// finds `_main`.
    pub fn lookup_symbol(&self, name: &str) -> Result<Option<u64>, Error> {
        if name.is_empty() {
            return Err(Error::EmptySymbolName);
        }
        if self.string_table_address == 0 {
            return Ok(None);
        }
        let Some(table) = self.symbol_table() else {
            return Ok(None);
        };

        let found = table
            .external_entries()
            .iter()
            .find(|entry| self.name_matches(entry, name))
            .or_else(|| table.entries.iter().find(|entry| self.name_matches(entry, name)));
        Ok(found.map(|entry| self.base_address().wrapping_add(entry.value)))
    }

    /// The closest symbol defined in a section at or below `address`.
    pub fn nearest_symbol(&self, address: u64) -> Option<Symbol> {
        if self.string_table_address == 0 {
            return None;
        }
        let (entry, symbol_address) = self
            .symbol_table()?
            .entries
            .iter()
            .filter(|entry| entry.is_section_definition())
            .filter_map(|entry| {
                let symbol_address = self.base_address().checked_add(entry.value)?;
                (symbol_address <= address).then_some((entry, symbol_address))
            })
            .max_by_key(|&(_, symbol_address)| symbol_address)?;

        Some(Symbol {
            name: self.read_symbol_name(entry),
            address: symbol_address,
            offset: address - symbol_address,
        })
    }

    /// The normalized name of the symbol table entry at `index`.
    pub fn symbol_name(&self, index: usize) -> Option<String> {
        if self.string_table_address == 0 {
            return None;
        }
        let entry = self.symbol_table()?.entries.get(index)?;
        Some(self.read_symbol_name(entry))
    }

    /// Number of symbol table entries available, reading the table if needed.
    pub fn symbol_count(&self) -> usize {
        self.symbol_table().map_or(0, |table| table.entries.len())
    }

    /// The symbol table, read from the dump on first use.
    pub fn symbol_table(&self) -> Option<&SymbolTable> {
        self.symbols
            .get_or_init(|| self.read_symbol_table())
            .as_ref()
    }

    fn read_symbol_table(&self) -> Option<SymbolTable> {
        let (symtab, dysymtab) = match (&self.symtab, &self.dysymtab) {
            (Some(symtab), Some(dysymtab))
                if symtab.cmd == LC_SYMTAB && dysymtab.cmd == LC_DYSYMTAB =>
            {
                (symtab, dysymtab)
            }
            _ => {
                log::debug!("{}: no symbol table", self.file_label());
                return None;
            }
        };

        let address = self.address_from_file_offset(u64::from(symtab.symoff));
        let count = std::cmp::min(symtab.nsyms, self.config.max_symbols) as usize;
        if count < symtab.nsyms as usize {
            log::warn!(
                "{}: only reading {count} of {} symbols",
                self.file_label(),
                symtab.nsyms
            );
        }

        // A corrupt nsyms can claim far more than the dump holds, so only grow the buffer as
        // long as reads keep coming back full.
        let wanted = count * SIZEOF_NLIST_64;
        let mut data = Vec::new();
        while data.len() < wanted {
            let start = data.len();
            let chunk = std::cmp::min(wanted - start, SYMBOL_READ_CHUNK * SIZEOF_NLIST_64);
            data.resize(start + chunk, 0);
            let read = self
                .memory
                .read_memory(address.wrapping_add(start as u64), &mut data[start..]);
            data.truncate(start + read);
            if read < chunk {
                break;
            }
        }
        let available = data.len() / SIZEOF_NLIST_64;
        if available < count {
            log::warn!(
                "{}: symbol table at {address:#x} truncated to {available} of {count} entries",
                self.file_label()
            );
        }

        let mut entries = Vec::with_capacity(available);
        let mut offset = 0;
        while entries.len() < available {
            let nlist: Result<Nlist64, scroll::Error> = data.gread_with(&mut offset, scroll::LE);
            match nlist {
                Ok(nlist) => entries.push(SymbolEntry::from(nlist)),
                Err(e) => {
                    log::warn!("{}: bad symbol table entry: {e}", self.file_label());
                    break;
                }
            }
        }

        let start = std::cmp::min(dysymtab.iextdefsym as usize, entries.len());
        let end = std::cmp::min(
            start.saturating_add(dysymtab.nextdefsym as usize),
            entries.len(),
        );
        Some(SymbolTable {
            entries,
            external: start..end,
        })
    }

    fn name_matches(&self, entry: &SymbolEntry, name: &str) -> bool {
        let address = self
            .string_table_address
            .wrapping_add(u64::from(entry.name_offset));
        // One byte past the name is enough to tell it apart from a longer name.
        let mut raw = vec![0u8; name.len() + 1];
        let read = self.memory.read_memory(address, &mut raw);
        raw.truncate(read);
        let terminator = raw.iter().position(|&b| b == 0);
        let stored = &raw[..terminator.unwrap_or(read)];
        if self.config.normalize_bytes(stored) != name.as_bytes() {
            return false;
        }
        if terminator.is_some() || read < name.len() + 1 {
            return true;
        }
        // A stripped underscore means the whole bound went to the name itself, so make sure it
        // actually ends here.
        let mut next = [0u8; 1];
        let next_address = address.wrapping_add(read as u64);
        self.memory.read_memory(next_address, &mut next) == 0 || next[0] == 0
    }

    fn read_symbol_name(&self, entry: &SymbolEntry) -> String {
        let address = self
            .string_table_address
            .wrapping_add(u64::from(entry.name_offset));
        let name = self
            .memory
            .read_string(address, self.config.max_symbol_name_len);
        self.config.normalize(&name).to_owned()
    }
}
