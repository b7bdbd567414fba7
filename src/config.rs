/// Tunables for parsing modules and resolving their symbols.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModuleReaderConfig {
    /// Strip a single leading `_` from names in the string table before comparing them with
    /// a requested symbol name, so that `main` matches the Mach-O spelling `_main`.
    pub strip_leading_underscore: bool,
    /// Upper bound on the number of symbol table entries materialized for one module. A corrupt
    /// `nsyms` is otherwise taken at face value.
    pub max_symbols: u32,
    /// Bound used when reading a complete symbol name (reverse lookups, `symbol_name`).
    pub max_symbol_name_len: usize,
}

impl Default for ModuleReaderConfig {
    fn default() -> Self {
        Self {
            strip_leading_underscore: true,
            max_symbols: 0x0100_0000,
            max_symbol_name_len: 1024,
        }
    }
}

impl ModuleReaderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_strip_leading_underscore(&mut self, strip: bool) -> &mut Self {
        self.strip_leading_underscore = strip;
        self
    }

    pub fn set_max_symbols(&mut self, max_symbols: u32) -> &mut Self {
        self.max_symbols = max_symbols;
        self
    }

    pub fn set_max_symbol_name_len(&mut self, len: usize) -> &mut Self {
        self.max_symbol_name_len = len;
        self
    }

    /// Apply the platform naming convention to a name read from the string table.
    pub(crate) fn normalize<'a>(&self, name: &'a str) -> &'a str {
        if self.strip_leading_underscore {
            name.strip_prefix('_').unwrap_or(name)
        } else {
            name
        }
    }

    /// [`normalize`](Self::normalize) for raw string table bytes.
    pub(crate) fn normalize_bytes<'a>(&self, name: &'a [u8]) -> &'a [u8] {
        if self.strip_leading_underscore {
            name.strip_prefix(b"_").unwrap_or(name)
        } else {
            name
        }
    }
}
