//! Header and load command parsing for a Mach-O image in dump memory

use crate::config::ModuleReaderConfig;
use crate::dump_memory::{read_struct, DumpMemory};
use crate::errors::ModuleReaderError as Error;
use crate::symbols::SymbolTable;
use goblin::mach::{
    header::{Header64, MH_MAGIC_64, SIZEOF_HEADER_64},
    load_command::{
        DysymtabCommand, LoadCommandHeader, SegmentCommand64, SymtabCommand, UuidCommand,
        LC_DYSYMTAB, LC_SEGMENT_64, LC_SYMTAB, LC_UUID, SIZEOF_LOAD_COMMAND,
    },
};
use once_cell::sync::OnceCell;

/// The part of a segment load command needed to map file offsets to addresses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Segment {
    pub vmaddr: u64,
    pub fileoff: u64,
    pub filesize: u64,
}

impl Segment {
    fn contains_file_offset(&self, file_offset: u64) -> bool {
        file_offset >= self.fileoff && file_offset - self.fileoff < self.filesize
    }
}

impl From<&SegmentCommand64> for Segment {
    fn from(command: &SegmentCommand64) -> Self {
        Segment {
            vmaddr: command.vmaddr,
            fileoff: command.fileoff,
            filesize: command.filesize,
        }
    }
}

/// The module build id, taken from the `LC_UUID` load command.
#[derive(Default, Clone, Debug, PartialEq, Eq)]
pub struct BuildId(pub Vec<u8>);

impl std::fmt::Display for BuildId {
    /// A 16 byte id is rendered as an upper-case hyphenated UUID, anything else as plain hex.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if self.0.len() == 16 && matches!(i, 4 | 6 | 8 | 10) {
                f.write_str("-")?;
            }
            write!(f, "{byte:02X}")?;
        }
        Ok(())
    }
}

/// A load command header along with the address it was read from.
#[derive(Clone, Copy, Debug)]
pub struct LoadCommand {
    pub address: u64,
    pub header: LoadCommandHeader,
}

/// Walks the load commands following a Mach-O header.
///
/// Each command is assumed to start `cmdsize` bytes after the previous one. A bogus size is
/// not detected and makes the walk produce garbage for the remaining commands.
pub struct LoadCommands<'a, T: ?Sized> {
    memory: &'a T,
    address: u64,
    remaining: u32,
}

impl<'a, T: DumpMemory + ?Sized> LoadCommands<'a, T> {
    fn new(memory: &'a T, base_address: u64, ncmds: u32) -> Self {
        LoadCommands {
            memory,
            address: base_address.wrapping_add(SIZEOF_HEADER_64 as u64),
            remaining: ncmds,
        }
    }
}

impl<'a, T: DumpMemory + ?Sized> Iterator for LoadCommands<'a, T> {
    type Item = Result<LoadCommand, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        let header: LoadCommandHeader = match read_struct(self.memory, self.address) {
            Ok(v) => v,
            Err(e) => {
                self.remaining = 0;
                return Some(Err(e));
            }
        };
        if (header.cmdsize as usize) < SIZEOF_LOAD_COMMAND {
            log::warn!(
                "load command {:#x} at {:#x} has an invalid size of {}",
                header.cmd,
                self.address,
                header.cmdsize
            );
        }

        let command = LoadCommand {
            address: self.address,
            header,
        };
        self.address = self.address.wrapping_add(u64::from(header.cmdsize));
        Some(Ok(command))
    }
}

/// The `LC_SEGMENT_64` commands of a module, in the order they appear in the image.
pub struct SegmentCommands<'a, T: ?Sized> {
    commands: LoadCommands<'a, T>,
}

impl<'a, T: DumpMemory + ?Sized> Iterator for SegmentCommands<'a, T> {
    type Item = Result<SegmentCommand64, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let command = match self.commands.next()? {
                Ok(c) => c,
                Err(e) => return Some(Err(e)),
            };
            if command.header.cmd != LC_SEGMENT_64 {
                continue;
            }
            let segment = read_struct(self.commands.memory, command.address);
            if segment.is_err() {
                self.commands.remaining = 0;
            }
            return Some(segment);
        }
    }
}

fn address_from_file_offset(segments: &[Segment], load_bias: u64, file_offset: u64) -> u64 {
    match segments
        .iter()
        .find(|segment| segment.contains_file_offset(file_offset))
    {
        Some(segment) => load_bias
            .wrapping_add(file_offset)
            .wrapping_add(segment.vmaddr)
            .wrapping_sub(segment.fileoff),
        None => load_bias.wrapping_add(file_offset),
    }
}

/// A 64-bit Mach-O image mapped somewhere in a dump.
///
/// Everything except the symbol table is read when the module is created. The symbol table is
/// read the first time a symbol is looked up and kept for the lifetime of the module.
pub struct MachModule<T> {
    pub(crate) memory: T,
    pub(crate) config: ModuleReaderConfig,
    base_address: u64,
    image_size: u64,
    file_label: String,
    load_bias: u64,
    build_id: Option<BuildId>,
    ncmds: u32,
    segments: Vec<Segment>,
    pub(crate) symtab: Option<SymtabCommand>,
    pub(crate) dysymtab: Option<DysymtabCommand>,
    pub(crate) string_table_address: u64,
    pub(crate) symbols: OnceCell<Option<SymbolTable>>,
}

impl<T: DumpMemory> MachModule<T> {
    /// Parse the image whose header is mapped at `base_address`.
    pub fn new(
        memory: T,
        base_address: u64,
        file_label: impl Into<String>,
    ) -> Result<Self, Error> {
        Self::with_config(
            memory,
            base_address,
            file_label,
            ModuleReaderConfig::default(),
        )
    }

    pub fn with_config(
        memory: T,
        base_address: u64,
        file_label: impl Into<String>,
        config: ModuleReaderConfig,
    ) -> Result<Self, Error> {
        let file_label = file_label.into();
        let header: Header64 = read_struct(&memory, base_address)?;
        if header.magic != MH_MAGIC_64 {
            return Err(Error::InvalidMagic {
                address: base_address,
                magic: header.magic,
            });
        }
        let image_size = SIZEOF_HEADER_64 as u64 + u64::from(header.sizeofcmds);

        let mut load_bias = None;
        let mut segments = Vec::new();
        let mut symtab = None;
        let mut dysymtab = None;
        let mut build_id = None;
        for command in LoadCommands::new(&memory, base_address, header.ncmds) {
            let command = command?;
            log::trace!(
                "{file_label}: load command {:#x} ({} bytes) at {:#x}",
                command.header.cmd,
                command.header.cmdsize,
                command.address
            );
            match command.header.cmd {
                LC_SEGMENT_64 => {
                    let segment: SegmentCommand64 = read_struct(&memory, command.address)?;
                    // Only the first file-backed segment in load command order sets the bias.
                    if load_bias.is_none() && segment.fileoff == 0 && segment.filesize > 0 {
                        load_bias = Some(base_address.wrapping_sub(segment.vmaddr));
                    }
                    segments.push(Segment::from(&segment));
                }
                LC_SYMTAB => {
                    symtab = Some(read_struct::<SymtabCommand, _>(&memory, command.address)?)
                }
                LC_DYSYMTAB => {
                    dysymtab = Some(read_struct::<DysymtabCommand, _>(&memory, command.address)?)
                }
                LC_UUID => {
                    let uuid: UuidCommand = read_struct(&memory, command.address)?;
                    if uuid.cmd == LC_UUID {
                        build_id = Some(BuildId(uuid.uuid.to_vec()));
                    }
                }
                _ => (),
            }
        }
        segments.sort_by_key(|segment| segment.vmaddr);
        let load_bias = load_bias.unwrap_or(0);

        let string_table_address = match &symtab {
            Some(symtab) if symtab.stroff != 0 => {
                address_from_file_offset(&segments, load_bias, u64::from(symtab.stroff))
            }
            _ => 0,
        };

        log::debug!(
            "{file_label}: Mach-O image at {base_address:#x}, load bias {load_bias:#x}, {} segments, build id {}",
            segments.len(),
            build_id
                .as_ref()
                .map(BuildId::to_string)
                .unwrap_or_else(|| "<none>".to_owned())
        );

        Ok(MachModule {
            memory,
            config,
            base_address,
            image_size,
            file_label,
            load_bias,
            build_id,
            ncmds: header.ncmds,
            segments,
            symtab,
            dysymtab,
            string_table_address,
            symbols: OnceCell::new(),
        })
    }

    /// Map a file offset within the image to the address it occupies in the dump.
    ///
    /// The first segment (by virtual address) whose file range contains the offset is used.
    /// Offsets outside every segment are treated as relative to the load bias.
    pub fn address_from_file_offset(&self, file_offset: u64) -> u64 {
        address_from_file_offset(&self.segments, self.load_bias, file_offset)
    }

    /// Walk the load commands again, starting from the header.
    pub fn load_commands(&self) -> LoadCommands<'_, T> {
        LoadCommands::new(&self.memory, self.base_address, self.ncmds)
    }

    /// The segment load commands as they appear in the image, re-read on every call.
    ///
    /// Unlike [`Self::segments`], this reflects the on-disk command order and carries every
    /// field of the command.
    pub fn segment_commands(&self) -> SegmentCommands<'_, T> {
        SegmentCommands {
            commands: self.load_commands(),
        }
    }

    pub fn base_address(&self) -> u64 {
        self.base_address
    }

    /// Size of the header and load commands. Segments are not contiguous in memory, so this is
    /// not the size of the whole image.
    pub fn image_size(&self) -> u64 {
        self.image_size
    }

    pub fn file_label(&self) -> &str {
        &self.file_label
    }

    pub fn load_bias(&self) -> u64 {
        self.load_bias
    }

    pub fn build_id(&self) -> Option<&BuildId> {
        self.build_id.as_ref()
    }

    /// Segments sorted by virtual address.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Address of the symbol string table, or 0 if the image has none.
    pub fn string_table_address(&self) -> u64 {
        self.string_table_address
    }

    pub fn config(&self) -> &ModuleReaderConfig {
        &self.config
    }
}
