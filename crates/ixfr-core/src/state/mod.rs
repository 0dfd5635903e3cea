// # State Store Implementations
//
// Implementations of the ZoneStateStore trait for different persistence
// strategies.

pub mod file;
pub mod memory;

pub use file::FileStateStore;
pub use memory::MemoryStateStore;
