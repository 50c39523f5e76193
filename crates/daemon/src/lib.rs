// gitserve-daemon library: the file server behind the `gitserve` binary.

pub mod config;
pub mod repo;
pub mod runtime;
pub mod serve;
pub mod sync;
pub mod vfs;
