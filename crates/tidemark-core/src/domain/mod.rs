mod timestamp;
mod watermark;

pub use timestamp::UtcDateTime;
pub use watermark::Watermark;
