pub mod feed;
pub mod http;

pub use feed::{FeedEntry, Observation, SourceLabel};
pub use http::HttpConfig;
