use std::time::Duration;

use crate::{
    adapter::{
        ancestor_matching, media_level, parent_container, set_media_level, visible_videos,
        DiscoveryPlan, SiteAdapter,
    },
    page::{Document, NodeId},
    selector::Selector,
};

/// Wrapper patterns, tried in order; the first pattern with a matching ancestor wins.
fn player_wrappers() -> [Selector; 9] {
    [
        Selector::class_contains("player"),
        Selector::class_contains("video"),
        Selector::class_contains("Player"),
        Selector::class_contains("Video"),
        Selector::id_contains("player"),
        Selector::id_contains("video"),
        Selector::all([Selector::tag("div"), Selector::attr("role", "region")]),
        Selector::tag("section"),
        Selector::tag("article"),
    ]
}

fn site_players() -> Selector {
    Selector::any([
        Selector::class("html5-video-player"),
        Selector::attr("data-a-target", "video-player"),
    ])
}

fn controls() -> Selector {
    Selector::any([
        Selector::class_contains("control"),
        Selector::class_contains("Control"),
        Selector::id_contains("control"),
        Selector::id_contains("Control"),
        Selector::tag("button"),
    ])
}

pub(crate) fn generic_container(doc: &Document, media: NodeId) -> Option<NodeId> {
    if let Some(wrapper) = player_wrappers()
        .iter()
        .find_map(|selector| ancestor_matching(doc, media, selector))
    {
        return Some(wrapper);
    }

    let positioned = doc
        .path(media)
        .into_iter()
        .skip(1)
        .take_while(|ancestor| *ancestor != doc.body() && *ancestor != doc.html())
        .find(|ancestor| matches!(doc.position(*ancestor), "relative" | "absolute"));
    positioned.or_else(|| parent_container(doc, media))
}

/// Fallback for every site without a dedicated adapter.
#[derive(Debug, Default)]
pub struct GenericAdapter;

impl GenericAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl SiteAdapter for GenericAdapter {
    fn name(&self) -> &'static str {
        "generic"
    }

    fn plan(&self) -> DiscoveryPlan {
        DiscoveryPlan {
            initial_delay: Duration::from_millis(500),
            ..DiscoveryPlan::default()
        }
    }

    fn find_media(&self, doc: &Document) -> Vec<NodeId> {
        let site_players = site_players();
        visible_videos(doc)
            .filter(|video| doc.closest(*video, &site_players).is_none())
            .collect()
    }

    fn find_container(&self, doc: &Document, media: NodeId) -> Option<NodeId> {
        generic_container(doc, media)
    }

    fn read_level(&self, doc: &Document, media: NodeId) -> Option<f64> {
        media_level(doc, media)
    }

    fn apply_level(&mut self, doc: &mut Document, media: NodeId, level: f64) {
        set_media_level(doc, media, level);
    }

    fn accepts_target(&self, doc: &Document, target: NodeId) -> bool {
        doc.closest(target, &controls()).is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_prefer_explicit_player_wrapper() {
        // given
        let mut doc = Document::new("https://example.org/");
        let body = doc.body();
        let article = doc.append_element(body, "article", &[]);
        let player = doc.append_element(article, "div", &[("class", "jw-player")]);
        let inner = doc.append_element(player, "div", &[]);
        doc.set_style(inner, "position", "relative");
        let video = doc.append_element(inner, "video", &[("class", "video-el")]);

        // when
        let container = GenericAdapter.find_container(&doc, video);

        // then
        assert_eq!(container, Some(player));
    }

    #[test]
    fn should_fall_back_to_positioned_ancestor_then_parent() {
        let mut doc = Document::new("https://example.org/");
        let body = doc.body();
        let outer = doc.append_element(body, "div", &[]);
        doc.set_style(outer, "position", "absolute");
        let inner = doc.append_element(outer, "div", &[]);
        let video = doc.append_element(inner, "video", &[]);

        assert_eq!(GenericAdapter.find_container(&doc, video), Some(outer));

        doc.set_style(outer, "position", "static");
        assert_eq!(GenericAdapter.find_container(&doc, video), Some(inner));
    }

    #[test]
    fn should_reject_body_as_container() {
        let mut doc = Document::new("https://example.org/");
        let body = doc.body();
        doc.set_attr(body, "class", "player-page");
        doc.set_style(body, "position", "relative");
        let video = doc.append_element(body, "video", &[]);

        assert_eq!(GenericAdapter.find_container(&doc, video), None);
    }

    #[test]
    fn should_skip_hidden_and_site_player_videos() {
        // given
        let mut doc = Document::new("https://example.org/");
        let body = doc.body();
        let embed = doc.append_element(body, "div", &[("class", "html5-video-player")]);
        doc.append_element(embed, "video", &[]);
        let hidden = doc.append_element(body, "div", &[]);
        doc.set_style(hidden, "display", "none");
        doc.append_element(hidden, "video", &[]);
        let wrapper = doc.append_element(body, "div", &[]);
        let visible = doc.append_element(wrapper, "video", &[]);

        // when
        let media = GenericAdapter.find_media(&doc);

        // then
        assert_eq!(media, vec![visible]);
    }

    #[test]
    fn should_reject_targets_below_controls() {
        let mut doc = Document::new("https://example.org/");
        let body = doc.body();
        let player = doc.append_element(body, "div", &[("class", "player")]);
        let bar = doc.append_element(player, "div", &[("class", "vjs-ControlBar")]);
        let icon = doc.append_element(bar, "span", &[]);
        let toggle = doc.append_element(player, "button", &[]);
        let video = doc.append_element(player, "video", &[]);

        assert!(!GenericAdapter.accepts_target(&doc, icon));
        assert!(!GenericAdapter.accepts_target(&doc, toggle));
        assert!(GenericAdapter.accepts_target(&doc, video));
    }
}
