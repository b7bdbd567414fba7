use goblin::mach::{
    header::{Header64, MH_MAGIC_64, SIZEOF_HEADER_64},
    load_command::{
        DysymtabCommand, SegmentCommand64, SymtabCommand, UuidCommand, LC_SEGMENT_64, LC_UUID,
        SIZEOF_DYSYMTAB_COMMAND, SIZEOF_SEGMENT_COMMAND_64, SIZEOF_SYMTAB_COMMAND,
        SIZEOF_UUID_COMMAND,
    },
    symbols::{Nlist64, N_EXT, N_SECT, SIZEOF_NLIST_64},
};
use macho_module_reader::DumpMemory;
use scroll::Pwrite;
use std::sync::Mutex;

#[allow(unused)]
pub const BASE: u64 = 0x9000;

/// Lays out a synthetic image: header, load commands, string table, then symbol table.
///
/// With the default `__TEXT` segment (vmaddr 0x1000, file offset 0, 0x2000 bytes) mapped at
/// [`BASE`], every file offset `n` of the image sits at address `BASE + n`.
#[allow(unused)]
pub struct ImageBuilder {
    magic: u32,
    segments: Vec<SegmentCommand64>,
    symbols: Vec<(String, u8, u64)>,
    externals: (u32, u32),
    symtab: bool,
    claimed_symbols: Option<u32>,
    dysymtab: bool,
    uuid: Option<[u8; 16]>,
    unknown: Vec<(u32, u32)>,
}

/// An image produced by [`ImageBuilder`].
#[allow(unused)]
pub struct Image {
    pub bytes: Vec<u8>,
    pub sizeofcmds: u32,
    pub symoff: u64,
    pub stroff: u64,
}

#[allow(unused)]
pub fn segment(name: &str, vmaddr: u64, fileoff: u64, filesize: u64) -> SegmentCommand64 {
    let mut segname = [0u8; 16];
    segname[..name.len()].copy_from_slice(name.as_bytes());
    SegmentCommand64 {
        cmd: LC_SEGMENT_64,
        cmdsize: SIZEOF_SEGMENT_COMMAND_64 as u32,
        segname,
        vmaddr,
        vmsize: filesize,
        fileoff,
        filesize,
        maxprot: 7,
        initprot: 5,
        nsects: 0,
        flags: 0,
    }
}

#[allow(unused)]
impl ImageBuilder {
    pub fn new() -> Self {
        ImageBuilder {
            magic: MH_MAGIC_64,
            segments: Vec::new(),
            symbols: Vec::new(),
            externals: (0, 0),
            symtab: true,
            claimed_symbols: None,
            dysymtab: true,
            uuid: None,
            unknown: Vec::new(),
        }
    }

    /// A builder with only the default `__TEXT` segment.
    pub fn with_text() -> Self {
        Self::new().segment(segment("__TEXT", 0x1000, 0, 0x2000))
    }

    pub fn magic(mut self, magic: u32) -> Self {
        self.magic = magic;
        self
    }

    pub fn segment(mut self, segment: SegmentCommand64) -> Self {
        self.segments.push(segment);
        self
    }

    /// Add a symbol defined in section 1.
    pub fn symbol(self, name: &str, value: u64) -> Self {
        self.symbol_with_kind(name, N_SECT | N_EXT, value)
    }

    pub fn symbol_with_kind(mut self, name: &str, kind: u8, value: u64) -> Self {
        self.symbols.push((name.to_owned(), kind, value));
        self
    }

    pub fn externals(mut self, first: u32, count: u32) -> Self {
        self.externals = (first, count);
        self
    }

    pub fn without_symtab(mut self) -> Self {
        self.symtab = false;
        self
    }

    /// Make `LC_SYMTAB` claim `nsyms` entries no matter how many symbols were added.
    pub fn claimed_symbols(mut self, nsyms: u32) -> Self {
        self.claimed_symbols = Some(nsyms);
        self
    }

    pub fn without_dysymtab(mut self) -> Self {
        self.dysymtab = false;
        self
    }

    pub fn uuid(mut self, uuid: [u8; 16]) -> Self {
        self.uuid = Some(uuid);
        self
    }

    /// Add a load command of a kind the reader doesn't care about.
    pub fn unknown_command(mut self, cmd: u32, cmdsize: u32) -> Self {
        self.unknown.push((cmd, cmdsize));
        self
    }

    pub fn build(&self) -> Image {
        let mut sizeofcmds = self.segments.len() * SIZEOF_SEGMENT_COMMAND_64
            + self.unknown.iter().map(|&(_, size)| size as usize).sum::<usize>();
        if self.symtab {
            sizeofcmds += SIZEOF_SYMTAB_COMMAND;
        }
        if self.dysymtab {
            sizeofcmds += SIZEOF_DYSYMTAB_COMMAND;
        }
        if self.uuid.is_some() {
            sizeofcmds += SIZEOF_UUID_COMMAND;
        }
        let ncmds = self.segments.len()
            + self.unknown.len()
            + self.symtab as usize
            + self.dysymtab as usize
            + self.uuid.is_some() as usize;

        let mut strings = vec![0u8];
        let mut name_offsets = Vec::new();
        for (name, _, _) in &self.symbols {
            name_offsets.push(strings.len() as u32);
            strings.extend_from_slice(name.as_bytes());
            strings.push(0);
        }
        let stroff = SIZEOF_HEADER_64 + sizeofcmds;
        let symoff = (stroff + strings.len() + 7) & !7;
        let total = symoff + self.symbols.len() * SIZEOF_NLIST_64;

        let mut bytes = vec![0u8; total];
        let header = Header64 {
            magic: self.magic,
            cputype: 0x0100_000c,
            cpusubtype: 0,
            filetype: 6,
            ncmds: ncmds as u32,
            sizeofcmds: sizeofcmds as u32,
            flags: 0,
            reserved: 0,
        };
        bytes.pwrite_with(header, 0, scroll::LE).unwrap();

        let mut offset = SIZEOF_HEADER_64;
        for segment in &self.segments {
            offset += bytes.pwrite_with(*segment, offset, scroll::LE).unwrap();
        }
        for &(cmd, cmdsize) in &self.unknown {
            bytes.pwrite_with(cmd, offset, scroll::LE).unwrap();
            bytes.pwrite_with(cmdsize, offset + 4, scroll::LE).unwrap();
            offset += cmdsize as usize;
        }
        if self.symtab {
            let symtab = SymtabCommand {
                symoff: symoff as u32,
                nsyms: self
                    .claimed_symbols
                    .unwrap_or(self.symbols.len() as u32),
                stroff: stroff as u32,
                strsize: strings.len() as u32,
                ..SymtabCommand::default()
            };
            offset += bytes.pwrite_with(symtab, offset, scroll::LE).unwrap();
        }
        if self.dysymtab {
            let dysymtab = DysymtabCommand {
                iextdefsym: self.externals.0,
                nextdefsym: self.externals.1,
                ..DysymtabCommand::default()
            };
            offset += bytes.pwrite_with(dysymtab, offset, scroll::LE).unwrap();
        }
        if let Some(uuid) = self.uuid {
            let command = UuidCommand {
                cmd: LC_UUID,
                cmdsize: SIZEOF_UUID_COMMAND as u32,
                uuid,
            };
            offset += bytes.pwrite_with(command, offset, scroll::LE).unwrap();
        }
        assert_eq!(offset, stroff);

        bytes[stroff..stroff + strings.len()].copy_from_slice(&strings);
        let mut offset = symoff;
        for ((_, kind, value), name_offset) in self.symbols.iter().zip(name_offsets) {
            let nlist = Nlist64 {
                n_strx: name_offset,
                n_type: *kind,
                n_sect: 1,
                n_desc: 0,
                n_value: *value,
            };
            offset += bytes.pwrite_with(nlist, offset, scroll::LE).unwrap();
        }

        Image {
            bytes,
            sizeofcmds: sizeofcmds as u32,
            symoff: symoff as u64,
            stroff: stroff as u64,
        }
    }
}

/// Wraps another [`DumpMemory`] and records every read made through it.
#[allow(unused)]
pub struct RecordingMemory<T> {
    inner: T,
    reads: Mutex<Vec<(u64, usize)>>,
}

#[allow(unused)]
impl<T> RecordingMemory<T> {
    pub fn new(inner: T) -> Self {
        RecordingMemory {
            inner,
            reads: Mutex::new(Vec::new()),
        }
    }

    /// How many reads started at `address`.
    pub fn reads_at(&self, address: u64) -> usize {
        self.reads
            .lock()
            .unwrap()
            .iter()
            .filter(|&&(a, _)| a == address)
            .count()
    }

    /// The largest buffer any single read asked for.
    pub fn largest_read(&self) -> usize {
        self.reads
            .lock()
            .unwrap()
            .iter()
            .map(|&(_, len)| len)
            .max()
            .unwrap_or(0)
    }
}

impl<T: DumpMemory> DumpMemory for RecordingMemory<T> {
    fn read_memory(&self, address: u64, buffer: &mut [u8]) -> usize {
        self.reads.lock().unwrap().push((address, buffer.len()));
        self.inner.read_memory(address, buffer)
    }
}
