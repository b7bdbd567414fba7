use {crate::serializers::*, thiserror::Error};

#[derive(Debug, Error, serde::Serialize)]
pub enum ModuleReaderError {
    #[error("failed to read dump memory: {length} bytes at {address:#x}")]
    ReadDumpMemory { address: u64, length: u64 },
    #[error("failed to parse Mach-O structure: {0}")]
    Parsing(
        #[from]
        #[serde(serialize_with = "serialize_scroll_error")]
        scroll::Error,
    ),
    #[error("not a 64-bit Mach-O image at {address:#x} (magic {magic:#010x})")]
    InvalidMagic { address: u64, magic: u32 },
    #[error("symbol name must not be empty")]
    EmptySymbolName,
}
