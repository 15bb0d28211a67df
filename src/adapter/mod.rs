use std::time::Duration;

use crate::{
    page::{Document, NodeId},
    selector::Selector,
};

pub mod generic;
pub mod social;
pub mod twitch;
pub mod youtube;

pub use generic::GenericAdapter;
pub use social::SocialFeedAdapter;
pub use twitch::TwitchAdapter;
pub use youtube::YouTubeAdapter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoverPolicy {
    /// Scroll acts whenever the wheel listener fires.
    Anywhere,
    /// Scroll acts only while the pointer is inside the container.
    Container,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Burst {
    pub every: Duration,
    pub lasting: Duration,
}

/// When a discovery loop scans, besides its periodic interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryPlan {
    pub initial_delay: Duration,
    pub debounce: Duration,
    pub burst: Option<Burst>,
    pub url_change_delay: Option<Duration>,
}

impl Default for DiscoveryPlan {
    fn default() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            debounce: Duration::from_millis(500),
            burst: None,
            url_change_delay: None,
        }
    }
}

/// Site-specific discovery, level access and host-UI mirroring.
pub trait SiteAdapter: Send {
    fn name(&self) -> &'static str;

    fn plan(&self) -> DiscoveryPlan {
        DiscoveryPlan::default()
    }

    fn find_media(&self, doc: &Document) -> Vec<NodeId>;

    fn find_container(&self, doc: &Document, media: NodeId) -> Option<NodeId>;

    fn read_level(&self, doc: &Document, media: NodeId) -> Option<f64>;

    fn apply_level(&mut self, doc: &mut Document, media: NodeId, level: f64);

    /// Cosmetic host-UI sync. Errors are logged by the caller and never undo
    /// the level change.
    fn after_apply(&mut self, _doc: &mut Document, _media: NodeId, _level: f64) -> anyhow::Result<()> {
        Ok(())
    }

    fn hover_policy(&self) -> HoverPolicy {
        HoverPolicy::Container
    }

    fn scroll_target(&self, _media: NodeId, container: NodeId) -> NodeId {
        container
    }

    fn accepts_target(&self, _doc: &Document, _target: NodeId) -> bool {
        true
    }

    /// Whether scrolls are ignored while the media has no data (`readyState == 0`).
    fn requires_ready_media(&self) -> bool {
        true
    }

    fn on_attached(&mut self, _doc: &mut Document, _media: NodeId) {}

    fn on_pointer_enter(&mut self, _doc: &mut Document, _container: NodeId) {}

    fn tracks_host_volume(&self) -> bool {
        false
    }

    /// Mirrors a volume change made by the host page itself.
    fn on_host_volume_change(&mut self, _doc: &mut Document, _media: NodeId) -> anyhow::Result<()> {
        Ok(())
    }

    fn watches_mute_key(&self) -> bool {
        false
    }
}

/// A muted element reads as silent regardless of its stored volume.
pub(crate) fn media_level(doc: &Document, media: NodeId) -> Option<f64> {
    let state = doc.media(media)?;
    Some(if state.muted { 0.0 } else { state.volume })
}

/// Writes `level` to the element, unmuting it for any audible level.
pub(crate) fn set_media_level(doc: &mut Document, media: NodeId, level: f64) {
    let Some(state) = doc.media(media) else {
        return;
    };
    let muted = state.muted && level <= 0.0;
    doc.set_media_volume(media, level, muted);
}

pub(crate) fn visible_videos(doc: &Document) -> impl Iterator<Item = NodeId> + '_ {
    doc.query_all(&Selector::tag("video"))
        .into_iter()
        .filter(|video| doc.is_visible(*video))
}

/// Nearest strict ancestor of `node` matching `selector`, stopping below `<body>`.
pub(crate) fn ancestor_matching(doc: &Document, node: NodeId, selector: &Selector) -> Option<NodeId> {
    doc.path(node)
        .into_iter()
        .skip(1)
        .take_while(|ancestor| *ancestor != doc.body() && *ancestor != doc.html())
        .find(|ancestor| doc.matches(*ancestor, selector))
}

/// Immediate parent, unless that is `<body>` or the root.
pub(crate) fn parent_container(doc: &Document, node: NodeId) -> Option<NodeId> {
    doc.parent(node)
        .filter(|parent| *parent != doc.body() && *parent != doc.html())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_read_muted_media_as_silent() {
        let mut doc = Document::new("https://example.org/");
        let body = doc.body();
        let video = doc.append_element(body, "video", &[]);
        doc.set_media_volume(video, 0.7, true);

        assert_eq!(media_level(&doc, video), Some(0.0));
        assert_eq!(media_level(&doc, body), None);
    }

    #[test]
    fn should_unmute_only_for_audible_levels() {
        let mut doc = Document::new("https://example.org/");
        let body = doc.body();
        let video = doc.append_element(body, "video", &[]);
        doc.set_media_volume(video, 0.0, true);

        set_media_level(&mut doc, video, 0.0);
        assert!(doc.media(video).unwrap().muted);

        set_media_level(&mut doc, video, 0.05);
        let state = doc.media(video).unwrap();
        assert!(!state.muted);
        assert_eq!(state.volume, 0.05);
    }

    #[test]
    fn should_never_climb_past_body() {
        let mut doc = Document::new("https://example.org/");
        let body = doc.body();
        let video = doc.append_element(body, "video", &[]);
        doc.set_attr(body, "class", "video-page");

        assert_eq!(
            ancestor_matching(&doc, video, &Selector::class_contains("video")),
            None
        );
        assert_eq!(parent_container(&doc, video), None);
    }
}
