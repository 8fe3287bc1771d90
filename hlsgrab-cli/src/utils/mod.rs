pub mod files;
pub mod headers;
pub mod progress;

pub use files::default_output;
pub use headers::parse_header;
