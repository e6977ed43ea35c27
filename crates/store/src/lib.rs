//! Message store implementations for chatweave.

pub mod file_backend;
pub mod in_memory;

pub use file_backend::FileMessageStore;
pub use in_memory::InMemoryMessageStore;
