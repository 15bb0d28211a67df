use crate::{
    adapter::{ancestor_matching, generic::generic_container, DiscoveryPlan, GenericAdapter, SiteAdapter},
    page::{Document, NodeId},
    selector::Selector,
};

/// Reddit-style feeds: media lives in custom player elements inside feed posts.
#[derive(Debug, Default)]
pub struct SocialFeedAdapter {
    inner: GenericAdapter,
}

impl SocialFeedAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    fn feed_container(doc: &Document, media: NodeId) -> Option<NodeId> {
        let explicit = [
            Selector::tag("shreddit-player"),
            Selector::attr("slot", "video-container"),
        ];
        if let Some(player) = explicit
            .iter()
            .find_map(|selector| ancestor_matching(doc, media, selector))
        {
            return Some(player);
        }
        doc.path(media)
            .into_iter()
            .skip(1)
            .take_while(|ancestor| *ancestor != doc.body() && *ancestor != doc.html())
            .find(|ancestor| {
                doc.matches(*ancestor, &Selector::tag("div"))
                    && doc.style(*ancestor, "position").is_some()
            })
    }
}

impl SiteAdapter for SocialFeedAdapter {
    fn name(&self) -> &'static str {
        "social-feed"
    }

    fn plan(&self) -> DiscoveryPlan {
        self.inner.plan()
    }

    fn find_media(&self, doc: &Document) -> Vec<NodeId> {
        self.inner.find_media(doc)
    }

    fn find_container(&self, doc: &Document, media: NodeId) -> Option<NodeId> {
        Self::feed_container(doc, media).or_else(|| generic_container(doc, media))
    }

    fn read_level(&self, doc: &Document, media: NodeId) -> Option<f64> {
        self.inner.read_level(doc, media)
    }

    fn apply_level(&mut self, doc: &mut Document, media: NodeId, level: f64) {
        self.inner.apply_level(doc, media, level);
    }

    fn accepts_target(&self, doc: &Document, target: NodeId) -> bool {
        self.inner.accepts_target(doc, target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_prefer_feed_player_element() {
        // given
        let mut doc = Document::new("https://www.reddit.com/r/videos");
        let body = doc.body();
        let post = doc.append_element(body, "article", &[("class", "post-video")]);
        let player = doc.append_element(post, "shreddit-player", &[]);
        let slot = doc.append_element(player, "div", &[("slot", "video-container")]);
        let video = doc.append_element(slot, "video", &[]);

        // when
        let container = SocialFeedAdapter::new().find_container(&doc, video);

        // then
        assert_eq!(container, Some(player));
    }

    #[test]
    fn should_use_inline_positioned_div_before_generic_rules() {
        let mut doc = Document::new("https://www.reddit.com/");
        let body = doc.body();
        let article = doc.append_element(body, "article", &[]);
        let frame = doc.append_element(article, "div", &[]);
        doc.set_style(frame, "position", "static");
        let video = doc.append_element(frame, "video", &[]);

        assert_eq!(SocialFeedAdapter::new().find_container(&doc, video), Some(frame));

        let bare = doc.append_element(article, "div", &[]);
        let other = doc.append_element(bare, "video", &[]);
        assert_eq!(SocialFeedAdapter::new().find_container(&doc, other), Some(article));
    }
}
