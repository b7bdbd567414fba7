//! Reads 64-bit Mach-O modules out of process memory snapshots.
//!
//! A [`MachModule`] is created from the address a module's header is mapped at in a dump. It
//! records where the module's segments ended up, its build id, and where its symbol table
//! lives, so that symbols can be resolved to addresses in the dump without a live loader.
//!
//! All memory access goes through the [`DumpMemory`] trait, which the dump reader implements.

pub mod config;
pub mod dump_memory;
pub mod errors;
pub mod module_reader;
mod serializers;
pub mod symbols;

pub use config::ModuleReaderConfig;
pub use dump_memory::{DumpMemory, MemoryAtAddress};
pub use errors::ModuleReaderError;
pub use module_reader::{BuildId, MachModule, Segment};
pub use symbols::Symbol;
