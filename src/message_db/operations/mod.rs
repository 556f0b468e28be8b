pub mod query;
pub mod read;
pub mod write;

pub use query::{get_last_stream_message, stream_version};
pub use read::{get_category_messages, get_stream_messages};
pub use write::{write_message, write_messages};
