pub mod adapter;
pub mod http;

pub use adapter::{AdapterError, FsAdapter, ServedFile, INDEX_DOCUMENT};
pub use http::{router, ServeState, DEFAULT_MAX_LISTING_ENTRIES};
