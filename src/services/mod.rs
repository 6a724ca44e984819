pub mod channel_cache;
pub mod epg;
pub mod guard;
pub mod metrics;
pub mod normalize;
pub mod resolver;
pub mod scheduler;
pub mod stream_cache;
pub mod transformer;
