use std::{collections::HashMap, time::Duration};

use tokio::sync::mpsc::UnboundedSender;

use crate::{
    config::Settings,
    discovery::TimerEvent,
    page::{Document, NodeId},
    selector::Selector,
    timer::Timer,
    volume::{self, Tier},
};

pub const OVERLAY_CLASS: &str = "scroll-volume-overlay";
const GLASS_CLASS: &str = "volume-glass-container";
const ICON_CLASS: &str = "volume-icon";
const NUMBER_CLASS: &str = "volume-number";

const FADE: Duration = Duration::from_millis(450);

const HIDDEN_TRANSFORM: &str = "translateX(-60px) scale(0.9)";
const VISIBLE_TRANSFORM: &str = "translateX(0) scale(1)";
const LEAVING_TRANSFORM: &str = "translateX(-100%) scale(0.9)";

const OVERLAY_STYLE: &[(&str, &str)] = &[
    ("position", "absolute"),
    ("left", "0%"),
    ("top", "15%"),
    ("border-radius", "0 6px 6px 0"),
    ("backdrop-filter", "blur(20px) saturate(180%)"),
    ("border", "1px solid rgba(255, 255, 255, 0.18)"),
    ("box-shadow", "0 8px 32px rgba(0, 0, 0, 0.37)"),
    ("z-index", "99999"),
    ("pointer-events", "none"),
    (
        "transition",
        "transform .45s cubic-bezier(0.33,1,0.68,1), opacity .45s ease",
    ),
    ("user-select", "none"),
    ("transform", HIDDEN_TRANSFORM),
    ("opacity", "0"),
];

const GLASS_STYLE: &[(&str, &str)] = &[
    ("display", "flex"),
    ("align-items", "center"),
    ("gap", "10px"),
    ("padding", "8px 14px 8px 20px"),
    ("line-height", "1"),
];

const ICON_STYLE: &[(&str, &str)] = &[
    ("width", "24px"),
    ("height", "24px"),
    ("filter", "drop-shadow(0 2px 4px rgba(0,0,0,0.4))"),
    ("flex-shrink", "0"),
    ("display", "flex"),
    ("align-items", "center"),
    ("justify-content", "center"),
];

const NUMBER_STYLE: &[(&str, &str)] = &[
    ("font-size", "24px"),
    ("font-weight", "700"),
    (
        "font-family",
        "-apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif",
    ),
    ("letter-spacing", "-0.5px"),
    ("min-width", "55px"),
    ("text-align", "right"),
    ("display", "flex"),
    ("align-items", "center"),
    ("justify-content", "flex-end"),
    ("line-height", "1"),
];

const SPEAKER: &str = "M15 3.04883C14.2234 3.04883 13.4657 3.12827 12.7305 3.26953L6 10H4.15234C3.4499 11.5223 3.04883 13.2126 3.04883 15C3.04883 16.7874 3.4499 18.4777 4.15234 20H6L12.7305 26.7305C13.4657 26.8717 14.2234 26.9512 15 26.9512Z";
const CROSS: &str = "M24.8284 10.7574L22 13.586L19.1716 10.7574L17.7574 12.1716L20.5858 15L17.7574 17.8284L19.1716 19.2426L22 16.4142L24.8284 19.2426L26.2426 17.8284L23.4142 15L26.2426 12.1716L24.8284 10.7574Z";
const WAVE_INNER: &str = "M19.2383 10.7617L17.832 12.1679C18.5544 12.8903 19 13.8895 19 15C19 16.1105 18.5544 17.1097 17.832 17.832L19.2383 19.2383C20.3255 18.151 21 16.6509 21 15C21 13.3491 20.3255 11.849 19.2383 10.7617Z";
const WAVE_MIDDLE: &str = "M21.3594 8.64062L19.9551 10.0449C21.2203 11.3102 22 13.0611 22 15C22 16.9389 21.2203 18.6898 19.9551 19.9551L21.3594 21.3594C22.9895 19.7292 24 17.4794 24 15C24 12.5206 22.9895 10.2708 21.3594 8.64062Z";
const WAVE_OUTER: &str = "M24.1875 5.8125L22.7832 7.2168C24.7723 9.2059 26 11.9565 26 15C26 18.0435 24.7723 20.7941 22.7832 22.7832L24.1875 24.1875C26.5415 21.8335 28 18.5839 28 15C28 11.4161 26.5415 8.16652 24.1875 5.8125Z";

fn icon_paths(tier: Tier) -> &'static [&'static str] {
    match tier {
        Tier::Mute => &[SPEAKER, CROSS],
        Tier::Low => &[SPEAKER],
        Tier::Medium => &[SPEAKER, WAVE_INNER],
        Tier::High => &[SPEAKER, WAVE_INNER, WAVE_MIDDLE],
        Tier::Max => &[SPEAKER, WAVE_INNER, WAVE_MIDDLE, WAVE_OUTER],
    }
}

/// Redraws the speaker glyph, only when the tier actually changed.
fn render_icon(doc: &mut Document, icon: NodeId, tier: Tier) {
    if doc.attr(icon, "data-tier") == Some(tier.name()) {
        return;
    }
    for child in doc.children(icon).to_vec() {
        doc.remove(child);
    }
    let svg = doc.append_element(
        icon,
        "svg",
        &[
            ("width", "30"),
            ("height", "30"),
            ("viewBox", "0 0 30 30"),
            ("xmlns", "http://www.w3.org/2000/svg"),
        ],
    );
    for path in icon_paths(tier) {
        doc.append_element(svg, "path", &[("fill", "currentColor"), ("d", path)]);
    }
    doc.set_attr(icon, "data-tier", tier.name());
}

/// Parses `#rrggbb`; anything else renders black.
fn hex_to_rgb(hex: &str) -> (u8, u8, u8) {
    let digits = hex.strip_prefix('#').unwrap_or(hex);
    let channel = |range: std::ops::Range<usize>| {
        digits
            .get(range)
            .and_then(|pair| u8::from_str_radix(pair, 16).ok())
    };
    match (digits.len(), channel(0..2), channel(2..4), channel(4..6)) {
        (6, Some(r), Some(g), Some(b)) => (r, g, b),
        _ => (0, 0, 0),
    }
}

fn background(settings: &Settings) -> String {
    let (r, g, b) = hex_to_rgb(&settings.overlay_color);
    format!("rgba({r}, {g}, {b}, {})", settings.overlay_opacity)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayStage {
    Dwell,
    Fade,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlayTimer {
    pub container: NodeId,
    pub token: u64,
    pub stage: OverlayStage,
}

#[derive(Debug)]
struct Overlay {
    node: NodeId,
    token: u64,
    // dropping the handle cancels whatever stage is pending
    _timer: Timer,
}

/// Owns every live readout, at most one per container.
#[derive(Debug)]
pub struct OverlayRenderer {
    overlays: HashMap<NodeId, Overlay>,
    next_token: u64,
    timers: UnboundedSender<TimerEvent>,
}

impl OverlayRenderer {
    pub fn new(timers: UnboundedSender<TimerEvent>) -> Self {
        Self {
            overlays: HashMap::new(),
            next_token: 0,
            timers,
        }
    }

    fn schedule(&mut self, container: NodeId, stage: OverlayStage, delay: Duration) -> (u64, Timer) {
        self.next_token += 1;
        let token = self.next_token;
        let timer = Timer::after(
            delay,
            self.timers.clone(),
            TimerEvent::Overlay(OverlayTimer {
                container,
                token,
                stage,
            }),
        );
        (token, timer)
    }

    pub fn show(
        &mut self,
        doc: &mut Document,
        container: Option<NodeId>,
        level: f64,
        settings: &Settings,
    ) {
        let Some(container) = container.filter(|c| doc.contains(*c)) else {
            return;
        };
        if !settings.enabled {
            return;
        }

        let background = background(settings);
        let existing = self
            .overlays
            .get(&container)
            .map(|overlay| overlay.node)
            .filter(|node| doc.contains(*node));
        let node = match existing {
            Some(node) => {
                doc.set_style(node, "background", &background);
                node
            }
            None => Self::create(doc, container, settings, &background),
        };

        let tier = volume::tier(level);
        if let Some(icon) = doc.query_within(node, &Selector::class(ICON_CLASS)) {
            render_icon(doc, icon, tier);
        }
        if let Some(number) = doc.query_within(node, &Selector::class(NUMBER_CLASS)) {
            doc.set_text(number, &format!("{}%", volume::percent(level)));
        }
        doc.set_style(node, "opacity", "1");
        doc.set_style(node, "transform", VISIBLE_TRANSFORM);
        doc.set_style(node, "transition-duration", "0.45s");

        let (token, timer) =
            self.schedule(container, OverlayStage::Dwell, settings.overlay_duration());
        // replacing the entry drops, and so cancels, any pending dwell or fade
        self.overlays.insert(
            container,
            Overlay {
                node,
                token,
                _timer: timer,
            },
        );
    }

    fn create(doc: &mut Document, container: NodeId, settings: &Settings, background: &str) -> NodeId {
        let overlay = doc.create_element("div");
        doc.set_attr(overlay, "class", OVERLAY_CLASS);
        for (property, value) in OVERLAY_STYLE {
            doc.set_style(overlay, property, value);
        }
        doc.set_style(overlay, "background", background);

        let glass = doc.append_element(overlay, "div", &[("class", GLASS_CLASS)]);
        for (property, value) in GLASS_STYLE {
            doc.set_style(glass, property, value);
        }
        let icon = doc.append_element(glass, "div", &[("class", ICON_CLASS)]);
        for (property, value) in ICON_STYLE {
            doc.set_style(icon, property, value);
        }
        let number = doc.append_element(glass, "div", &[("class", NUMBER_CLASS)]);
        for (property, value) in NUMBER_STYLE {
            doc.set_style(number, property, value);
        }
        doc.set_style(icon, "color", &settings.text_color);
        doc.set_style(number, "color", &settings.text_color);

        if doc.position(container) == "static" {
            doc.set_style(container, "position", "relative");
        }
        doc.append_child(container, overlay);
        overlay
    }

    pub fn on_timer(&mut self, doc: &mut Document, timer: OverlayTimer) {
        let Some(overlay) = self.overlays.get(&timer.container) else {
            return;
        };
        if overlay.token != timer.token {
            return;
        }
        match timer.stage {
            OverlayStage::Dwell => {
                let node = overlay.node;
                doc.set_style(node, "transform", LEAVING_TRANSFORM);
                doc.set_style(node, "transition-duration", "0.45s");
                let (token, fade) = self.schedule(timer.container, OverlayStage::Fade, FADE);
                self.overlays.insert(
                    timer.container,
                    Overlay {
                        node,
                        token,
                        _timer: fade,
                    },
                );
            }
            OverlayStage::Fade => {
                if let Some(overlay) = self.overlays.remove(&timer.container) {
                    doc.remove(overlay.node);
                }
            }
        }
    }

    /// Cancels pending timers for `container` and removes its overlay.
    pub fn forget(&mut self, doc: &mut Document, container: NodeId) {
        if let Some(overlay) = self.overlays.remove(&container) {
            doc.remove(overlay.node);
        }
    }

    pub fn clear(&mut self, doc: &mut Document) {
        for (_, overlay) in self.overlays.drain() {
            doc.remove(overlay.node);
        }
    }

    #[cfg(test)]
    pub fn live_overlay(&self, doc: &Document, container: NodeId) -> Option<NodeId> {
        self.overlays
            .get(&container)
            .map(|overlay| overlay.node)
            .filter(|node| doc.contains(*node))
    }

    #[cfg(test)]
    pub fn readout(&self, doc: &Document, container: NodeId) -> Option<String> {
        let overlay = self.live_overlay(doc, container)?;
        let number = doc.query_within(overlay, &Selector::class(NUMBER_CLASS))?;
        doc.text(number).map(str::to_string)
    }
}

/// Readout text of the overlay nearest to `node`, looking at the direct
/// children of `node` and each of its ancestors.
pub fn readout_near(doc: &Document, node: NodeId) -> Option<String> {
    let overlay = Selector::class(OVERLAY_CLASS);
    let found = doc.path(node).into_iter().find_map(|ancestor| {
        doc.children(ancestor)
            .iter()
            .copied()
            .find(|child| doc.matches(*child, &overlay))
    })?;
    let number = doc.query_within(found, &Selector::class(NUMBER_CLASS))?;
    doc.text(number).map(str::to_string)
}
