use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::{
    adapter::{
        ancestor_matching, media_level, parent_container, set_media_level, visible_videos,
        DiscoveryPlan, HoverPolicy, SiteAdapter,
    },
    page::{Document, NodeId},
    selector::Selector,
    storage::StorageScope,
    utils::timestamp,
    volume,
};

const VOLUME_KEY: &str = "yt-player-volume";
const PAYLOAD_LIFETIME_MS: u64 = 1000 * 60 * 60 * 24 * 30;
const SLIDER_TRACK_PX: f64 = 40.0;
const MUTE_SLASH_ID: &str = "ytp-id-16";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct StoredVolume {
    volume: u8,
    muted: bool,
}

/// The player's own volume memory; `data` holds JSON-encoded [`StoredVolume`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct VolumePayload {
    data: String,
    expiration: u64,
    creation: u64,
}

impl VolumePayload {
    fn new(level: f64, now: u64) -> anyhow::Result<Self> {
        let percent = volume::percent(level);
        let data = serde_json::to_string(&StoredVolume {
            volume: percent,
            muted: percent == 0,
        })?;
        Ok(Self {
            data,
            expiration: now + PAYLOAD_LIFETIME_MS,
            creation: now,
        })
    }

    fn parse(raw: &str, now: u64) -> anyhow::Result<f64> {
        let payload: VolumePayload = serde_json::from_str(raw).context("Malformed volume payload")?;
        if payload.expiration < now {
            return Err(anyhow::anyhow!("Volume payload expired"));
        }
        let stored: StoredVolume =
            serde_json::from_str(&payload.data).context("Malformed volume payload data")?;
        Ok(volume::clamp(f64::from(stored.volume) / 100.0))
    }
}

fn player() -> Selector {
    Selector::class("html5-video-player")
}

#[derive(Debug, Default)]
pub struct YouTubeAdapter;

impl YouTubeAdapter {
    pub fn new() -> Self {
        Self
    }

    /// Session scope first, then local; unreadable or malformed entries count as absent.
    fn read_persisted(doc: &mut Document) -> Option<f64> {
        let now = timestamp();
        for scope in [StorageScope::Session, StorageScope::Local] {
            let raw = match doc.storage_mut(scope).get(VOLUME_KEY) {
                Ok(Some(raw)) => raw,
                Ok(None) => continue,
                Err(err) => {
                    log::debug!("Could not read persisted volume: {err:?}");
                    continue;
                }
            };
            match VolumePayload::parse(&raw, now) {
                Ok(level) => return Some(level),
                Err(err) => log::debug!("Ignoring persisted volume in {scope:?} storage: {err:?}"),
            }
        }
        None
    }

    fn persist(doc: &mut Document, level: f64) -> anyhow::Result<()> {
        let payload = VolumePayload::new(level, timestamp())?;
        let value = serde_json::to_string(&payload)?;
        let local = doc
            .local_storage
            .set(VOLUME_KEY, value.clone())
            .context("Failed to persist volume to local storage");
        let session = doc
            .session_storage
            .set(VOLUME_KEY, value)
            .context("Failed to persist volume to session storage");
        local.and(session)
    }

    fn sync_controls(doc: &mut Document, level: f64) {
        let percent = volume::percent(level);
        let muted = percent == 0;

        let panel = doc.query(&Selector::class("ytp-volume-panel"));
        if let Some(panel) = panel {
            doc.set_attr(panel, "aria-valuenow", &percent.to_string());
            doc.set_attr(panel, "aria-valuetext", &format!("{percent}% volume"));
        }

        let slider =
            panel.and_then(|panel| doc.query_within(panel, &Selector::class("ytp-volume-slider")));
        if let Some(slider) = slider {
            doc.set_style(slider, "--volume-slider-value", &format!("{percent}%"));
            doc.set_attr(slider, "aria-valuenow", &percent.to_string());
            doc.set_attr(slider, "aria-valuetext", &format!("{percent}%"));
            let handle = doc.query_within(slider, &Selector::class("ytp-volume-slider-handle"));
            if let Some(handle) = handle {
                let left = f64::from(percent) / 100.0 * SLIDER_TRACK_PX;
                doc.set_style(handle, "left", &format!("{left}px"));
            }
        }

        if let Some(slash) = doc.query(&Selector::id(MUTE_SLASH_ID)) {
            doc.set_style(slash, "display", if muted { "block" } else { "none" });
        }

        if let Some(button) = doc.query(&Selector::class("ytp-mute-button")) {
            let (title, label) = if muted {
                ("Unmute", "Unmute (m)")
            } else {
                ("Mute", "Mute (m)")
            };
            doc.set_attr(button, "data-title-no-tooltip", title);
            doc.set_attr(button, "aria-label", label);
        }

        let overflow = doc.query(&Selector::class("ytp-overflow-panel"));
        if let Some(overflow) = overflow.filter(|o| doc.style(*o, "display") == Some("block")) {
            doc.set_style(overflow, "display", "none");
        }
    }
}

impl SiteAdapter for YouTubeAdapter {
    fn name(&self) -> &'static str {
        "youtube"
    }

    fn plan(&self) -> DiscoveryPlan {
        DiscoveryPlan {
            url_change_delay: Some(Duration::from_millis(800)),
            ..DiscoveryPlan::default()
        }
    }

    fn find_media(&self, doc: &Document) -> Vec<NodeId> {
        visible_videos(doc)
            .find(|video| doc.closest(*video, &player()).is_some())
            .into_iter()
            .collect()
    }

    fn find_container(&self, doc: &Document, media: NodeId) -> Option<NodeId> {
        ancestor_matching(doc, media, &player())
            .or_else(|| doc.query(&Selector::class("ytd-watch-flexy")))
            .or_else(|| parent_container(doc, media))
    }

    fn read_level(&self, doc: &Document, media: NodeId) -> Option<f64> {
        media_level(doc, media)
    }

    fn apply_level(&mut self, doc: &mut Document, media: NodeId, level: f64) {
        set_media_level(doc, media, level);
    }

    fn after_apply(&mut self, doc: &mut Document, _media: NodeId, level: f64) -> anyhow::Result<()> {
        Self::sync_controls(doc, level);
        Self::persist(doc, level)
    }

    fn hover_policy(&self) -> HoverPolicy {
        HoverPolicy::Anywhere
    }

    fn scroll_target(&self, media: NodeId, _container: NodeId) -> NodeId {
        media
    }

    /// Players swapped in by in-place navigation start from the remembered level.
    fn on_attached(&mut self, doc: &mut Document, media: NodeId) {
        let Some(level) = Self::read_persisted(doc) else {
            return;
        };
        log::debug!("Restoring persisted volume {level} on {media}");
        set_media_level(doc, media, level);
        Self::sync_controls(doc, level);
    }

    fn tracks_host_volume(&self) -> bool {
        true
    }

    fn on_host_volume_change(&mut self, doc: &mut Document, media: NodeId) -> anyhow::Result<()> {
        let Some(level) = media_level(doc, media) else {
            return Ok(());
        };
        Self::sync_controls(doc, level);
        Self::persist(doc, level)
    }

    fn watches_mute_key(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Watch {
        doc: Document,
        player: NodeId,
        video: NodeId,
        panel: NodeId,
        handle: NodeId,
        mute_button: NodeId,
    }

    fn watch_page() -> Watch {
        let mut doc = Document::new("https://www.youtube.com/watch?v=abc");
        let body = doc.body();
        let flexy = doc.append_element(body, "div", &[("class", "ytd-watch-flexy")]);
        let player = doc.append_element(flexy, "div", &[("class", "html5-video-player")]);
        let video = doc.append_element(player, "video", &[("class", "video-stream")]);
        let panel = doc.append_element(player, "div", &[("class", "ytp-volume-panel")]);
        let slider = doc.append_element(panel, "div", &[("class", "ytp-volume-slider")]);
        let handle = doc.append_element(slider, "div", &[("class", "ytp-volume-slider-handle")]);
        let mute_button = doc.append_element(player, "button", &[("class", "ytp-mute-button")]);
        Watch {
            doc,
            player,
            video,
            panel,
            handle,
            mute_button,
        }
    }

    #[test]
    fn should_find_video_inside_player_only() {
        // given
        let Watch {
            mut doc, player, video, ..
        } = watch_page();
        let body = doc.body();
        doc.append_element(body, "video", &[]);

        // when
        let media = YouTubeAdapter.find_media(&doc);

        // then
        assert_eq!(media, vec![video]);
        assert_eq!(YouTubeAdapter.find_container(&doc, video), Some(player));
    }

    #[test]
    fn should_sync_controls_and_persist_after_apply() {
        // given
        let Watch {
            mut doc,
            video,
            panel,
            handle,
            mute_button,
            ..
        } = watch_page();
        let mut adapter = YouTubeAdapter::new();

        // when
        adapter.apply_level(&mut doc, video, 0.5);
        adapter.after_apply(&mut doc, video, 0.5).unwrap();

        // then
        assert_eq!(doc.media(video).unwrap().volume, 0.5);
        assert_eq!(doc.attr(panel, "aria-valuenow"), Some("50"));
        assert_eq!(doc.attr(panel, "aria-valuetext"), Some("50% volume"));
        assert_eq!(doc.style(handle, "left"), Some("20px"));
        assert_eq!(doc.attr(mute_button, "aria-label"), Some("Mute (m)"));

        let raw = doc.local_storage.get(VOLUME_KEY).unwrap().unwrap();
        let payload: VolumePayload = serde_json::from_str(&raw).unwrap();
        assert_eq!(payload.data, r#"{"volume":50,"muted":false}"#);
        assert_eq!(payload.expiration - payload.creation, PAYLOAD_LIFETIME_MS);
        assert_eq!(doc.session_storage.get(VOLUME_KEY).unwrap(), Some(raw));
    }

    #[test]
    fn should_mark_muted_at_zero() {
        let Watch {
            mut doc, video, mute_button, ..
        } = watch_page();
        let body = doc.body();
        let slash = doc.append_element(body, "div", &[("id", MUTE_SLASH_ID)]);

        YouTubeAdapter.after_apply(&mut doc, video, 0.0).unwrap();

        assert_eq!(doc.style(slash, "display"), Some("block"));
        assert_eq!(doc.attr(mute_button, "data-title-no-tooltip"), Some("Unmute"));
        let raw = doc.session_storage.get(VOLUME_KEY).unwrap().unwrap();
        assert!(raw.contains(r#"\"muted\":true"#));
    }

    #[test]
    fn should_report_storage_failure_without_blocking_ui_sync() {
        // given
        let Watch {
            mut doc, video, panel, ..
        } = watch_page();
        doc.local_storage.set_available(false);

        // when
        let result = YouTubeAdapter.after_apply(&mut doc, video, 0.3);

        // then
        assert!(result.is_err());
        assert_eq!(doc.attr(panel, "aria-valuenow"), Some("30"));
        assert!(doc.session_storage.get(VOLUME_KEY).unwrap().is_some());
    }

    #[test]
    fn should_restore_persisted_level_on_attach() {
        // given
        let Watch { mut doc, video, panel, .. } = watch_page();
        YouTubeAdapter::persist(&mut doc, 0.35).unwrap();

        // when
        YouTubeAdapter.on_attached(&mut doc, video);

        // then
        assert_eq!(doc.media(video).unwrap().volume, 0.35);
        assert_eq!(doc.attr(panel, "aria-valuenow"), Some("35"));
    }

    #[test]
    fn should_treat_malformed_or_unreadable_payload_as_absent() {
        let Watch { mut doc, video, .. } = watch_page();
        doc.session_storage
            .set(VOLUME_KEY, "{not json".to_string())
            .unwrap();
        doc.local_storage
            .set(VOLUME_KEY, r#"{"data":"[]","expiration":0,"creation":0}"#.to_string())
            .unwrap();

        assert_eq!(YouTubeAdapter::read_persisted(&mut doc), None);

        doc.session_storage.set_available(false);
        YouTubeAdapter.on_attached(&mut doc, video);
        assert_eq!(doc.media(video).unwrap().volume, 1.0);
    }

    #[test]
    fn should_prefer_session_scope_when_restoring() {
        let Watch { mut doc, .. } = watch_page();
        let now = timestamp();
        let session = serde_json::to_string(&VolumePayload::new(0.2, now).unwrap()).unwrap();
        let local = serde_json::to_string(&VolumePayload::new(0.9, now).unwrap()).unwrap();
        doc.session_storage.set(VOLUME_KEY, session).unwrap();
        doc.local_storage.set(VOLUME_KEY, local).unwrap();

        assert_eq!(YouTubeAdapter::read_persisted(&mut doc), Some(0.2));
    }
}
