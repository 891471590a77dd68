//! Storage for pipeline state and the file moves the pipeline performs.
//!
//! Persisted state fields are individual keys in a [`StateStore`] so an
//! out-of-process assistant can rewrite one of them without touching the
//! others. [`DirStore`] maps keys to files in the `.ayup` directory and
//! [`MemoryStore`] keeps them in memory for tests.

mod dir;
mod memory;
mod ops;
mod store;

pub use dir::DirStore;
pub use memory::MemoryStore;
pub use ops::{merge_files, remove_dir_if_exists, replace_dir};
pub use store::{read_default, read_string, StateStore};
