use serenity::{http::Http, model::id::ChannelId};
use std::sync::Arc;
use tracing::warn;

use super::MessageChannel;

/// A guild text channel, posted to over serenity's HTTP client.
#[derive(Clone)]
pub struct DiscordTextChannel {
    http: Arc<Http>,
    id: ChannelId,
}

impl DiscordTextChannel {
    pub fn new(http: Arc<Http>, id: ChannelId) -> Self {
        Self { http, id }
    }
}

impl MessageChannel for DiscordTextChannel {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn send_message(&self, content: String) {
        let http = self.http.clone();
        let id = self.id;
        tokio::spawn(async move {
            if let Err(e) = id.say(&http, content).await {
                warn!("Error sending message to {}: {:?}", id, e);
            }
        });
    }
}
