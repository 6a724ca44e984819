use async_trait::async_trait;

use crate::models::{Channel, ResolvedStream};

/// Turns a channel's stream descriptors into playable streams.
/// Results are memoised by the caller in `ResolvedStreamCache`.
#[async_trait]
pub trait StreamResolver: Send + Sync {
    async fn resolve(&self, channel: &Channel) -> anyhow::Result<Vec<ResolvedStream>>;
}

/// Hands the playlist URLs through, filling in a default `User-Agent`
pub struct PassthroughResolver {
    default_user_agent: String,
}

impl PassthroughResolver {
    pub fn new(default_user_agent: impl Into<String>) -> Self {
        Self {
            default_user_agent: default_user_agent.into(),
        }
    }
}

#[async_trait]
impl StreamResolver for PassthroughResolver {
    async fn resolve(&self, channel: &Channel) -> anyhow::Result<Vec<ResolvedStream>> {
        let total = channel.streams.len();

        let streams = channel
            .streams
            .iter()
            .enumerate()
            .map(|(i, descriptor)| {
                let mut headers = descriptor.headers.clone();
                headers
                    .entry("User-Agent".to_string())
                    .or_insert_with(|| self.default_user_agent.clone());

                let title = match (&descriptor.name, total) {
                    (_, 1) => channel.name.clone(),
                    (Some(name), _) if name != &channel.name => name.clone(),
                    _ => format!("{} ({})", channel.name, i + 1),
                };

                ResolvedStream {
                    name: channel.name.clone(),
                    title,
                    url: descriptor.url.clone(),
                    headers,
                }
            })
            .collect();

        Ok(streams)
    }
}
