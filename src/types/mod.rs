//! Chain-level value types shared by the fetcher, decoder and stores.

pub mod block_tag;
pub mod conversions;
pub mod raw_log;

pub use block_tag::BlockTag;
pub use raw_log::RawLog;
