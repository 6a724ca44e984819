mod addon_config;
mod channel;
mod epg;

pub use addon_config::*;
pub use channel::*;
pub use epg::*;
