//! Git-backed repository abstraction (§5/C5, §4.6/C6), grounded on
//! `original_source/app/plugin/repo/git_direct.py`, `app/lib/specs.py` and
//! `app/lib/repo.py`: a per-worker git worktree gated by a reader/writer
//! lock, the spec-file loader built on top of it, and the glue that turns
//! an `OperationRequest` into the `Entity` pair an operation acts on.

pub mod diff;
pub mod entities;
pub mod gate;
pub mod git;
pub mod specs;

pub use entities::{gen_name, get_entities};
pub use gate::{FileOps, GitRepo, ReaderGuard, WriterGuard};
