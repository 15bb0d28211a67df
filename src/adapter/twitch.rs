use std::time::Duration;

use crate::{
    adapter::{ancestor_matching, parent_container, visible_videos, Burst, DiscoveryPlan, SiteAdapter},
    page::{Document, EventKind, NodeId},
    selector::Selector,
    volume,
};

const TARGET: &str = "data-a-target";

fn volume_slider() -> Selector {
    Selector::attr(TARGET, "player-volume-slider")
}

/// Twitch keeps the level in its own range input; the video element follows
/// whatever the player scripts do with that input's events.
#[derive(Debug, Default)]
pub struct TwitchAdapter;

impl TwitchAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl SiteAdapter for TwitchAdapter {
    fn name(&self) -> &'static str {
        "twitch"
    }

    fn plan(&self) -> DiscoveryPlan {
        DiscoveryPlan {
            burst: Some(Burst {
                every: Duration::from_millis(500),
                lasting: Duration::from_secs(10),
            }),
            ..DiscoveryPlan::default()
        }
    }

    fn find_media(&self, doc: &Document) -> Vec<NodeId> {
        visible_videos(doc).take(1).collect()
    }

    fn find_container(&self, doc: &Document, media: NodeId) -> Option<NodeId> {
        ancestor_matching(doc, media, &Selector::class("video-player__container"))
            .or_else(|| ancestor_matching(doc, media, &Selector::attr(TARGET, "video-player")))
            .or_else(|| parent_container(doc, media))
    }

    fn read_level(&self, doc: &Document, _media: NodeId) -> Option<f64> {
        let slider = doc.query(&volume_slider())?;
        let level = doc
            .value(slider)
            .and_then(|value| value.trim().parse::<f64>().ok())
            .unwrap_or(0.0);
        Some(volume::clamp(level))
    }

    fn apply_level(&mut self, doc: &mut Document, _media: NodeId, level: f64) {
        let Some(slider) = doc.query(&volume_slider()) else {
            return;
        };
        let percent = volume::percent(level);
        doc.set_value(slider, &level.to_string());
        doc.set_attr(slider, "aria-valuenow", &percent.to_string());
        doc.set_attr(slider, "aria-valuetext", &format!("{percent}%"));
        doc.dispatch_synthetic(slider, EventKind::Input);
        doc.dispatch_synthetic(slider, EventKind::Change);

        let progress = doc
            .closest(slider, &Selector::attr(TARGET, "player-volume-slider-wrapper"))
            .and_then(|wrapper| doc.query_within(wrapper, &Selector::attr("role", "progressbar")));
        if let Some(progress) = progress {
            doc.set_style(progress, "width", &format!("{percent}%"));
            doc.set_attr(progress, "aria-valuenow", &percent.to_string());
        }
    }

    fn accepts_target(&self, doc: &Document, target: NodeId) -> bool {
        let controls = Selector::any([
            Selector::class("player-controls"),
            Selector::attr(TARGET, "player-controls"),
        ]);
        doc.closest(target, &controls).is_none()
    }

    fn requires_ready_media(&self) -> bool {
        false
    }

    fn on_pointer_enter(&mut self, doc: &mut Document, container: NodeId) {
        // extension panels sit above the video and swallow the wheel
        let panels = Selector::class("extensions-video-overlay-size-container");
        if let Some(panel) = doc.query_within(container, &panels) {
            doc.set_style(panel, "display", "none");
        }
    }
}
