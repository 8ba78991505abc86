pub mod client;
pub mod poller;

pub use client::{StatsClient, VideoSnapshot, YoutubeStatsClient};
pub use poller::StatsPoller;
