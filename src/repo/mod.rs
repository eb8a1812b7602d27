//! Repo module: storage of project files.
//!
//! The parser reads projects exclusively through the [`RepoStore`] trait so
//! the same code serves projects on disk and in memory.

mod store;
mod local;
mod memory;

pub use store::{GlobMatcher, RepoStore, normalize_path};
pub use local::LocalRepoStore;
pub use memory::MemoryRepoStore;
