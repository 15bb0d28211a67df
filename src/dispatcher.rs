use anyhow::Context;
use serde::Serialize;
use tokio::{sync::oneshot, task::JoinHandle};

use crate::{
    adapter::{GenericAdapter, SiteAdapter, SocialFeedAdapter, TwitchAdapter, YouTubeAdapter},
    config::ConfigStore,
    discovery::DiscoveryLoop,
    page::Page,
    utils::{host_matches, host_of},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SiteKind {
    YouTube,
    Twitch,
    SocialFeed,
    Generic,
}

impl SiteKind {
    pub fn from_host(host: &str) -> Self {
        if host_matches(host, "youtube.com") {
            Self::YouTube
        } else if host_matches(host, "twitch.tv") {
            Self::Twitch
        } else if host_matches(host, "reddit.com") {
            Self::SocialFeed
        } else {
            Self::Generic
        }
    }

    pub fn from_url(url: &str) -> Self {
        Self::from_host(host_of(url))
    }
}

pub fn adapter_for(kind: SiteKind) -> Box<dyn SiteAdapter> {
    match kind {
        SiteKind::YouTube => Box::new(YouTubeAdapter::new()),
        SiteKind::Twitch => Box::new(TwitchAdapter::new()),
        SiteKind::SocialFeed => Box::new(SocialFeedAdapter::new()),
        SiteKind::Generic => Box::new(GenericAdapter::new()),
    }
}

/// Owns a running engine. Dropping the handle also stops it, though only
/// [`EngineHandle::shutdown`] waits for teardown to finish.
#[derive(Debug)]
pub struct EngineHandle {
    pub kind: SiteKind,
    shutdown: Option<oneshot::Sender<()>>,
    join: JoinHandle<()>,
}

impl EngineHandle {
    pub async fn shutdown(mut self) -> anyhow::Result<()> {
        if let Some(shutdown) = self.shutdown.take() {
            // the loop may already be gone
            let _ = shutdown.send(());
        }
        self.join
            .await
            .context("Discovery loop terminated abnormally")
    }
}

/// Picks the adapter for the page's host and spawns its discovery loop.
pub fn start(page: Page, config: &ConfigStore) -> EngineHandle {
    let kind = SiteKind::from_url(page.lock().url());
    let engine = DiscoveryLoop::new(page, adapter_for(kind), config);
    log::info!("Using {} adapter", engine.adapter_name());

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let join = tokio::spawn(engine.run(shutdown_rx));
    EngineHandle {
        kind,
        shutdown: Some(shutdown_tx),
        join,
    }
}
