use std::{collections::BTreeMap, fs::File, io::Read, path::Path, time::Duration};

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};

use crate::{
    config::ConfigStore,
    dispatcher::{self, SiteKind},
    overlay::readout_near,
    page::{Document, EventKind, NodeId, Page},
    selector::Selector,
};

const SETTLE: Duration = Duration::from_millis(5);

/// One element of a fixture page tree.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NodeFixture {
    pub tag: String,
    pub id: Option<String>,
    pub class: Option<String>,
    pub attrs: BTreeMap<String, String>,
    pub style: BTreeMap<String, String>,
    pub volume: Option<f64>,
    pub muted: Option<bool>,
    pub ready_state: Option<u8>,
    pub value: Option<String>,
    pub children: Vec<NodeFixture>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WheelStep {
    pub target: String,
    pub delta_y: f64,
    #[serde(default = "default_ticks")]
    pub ticks: usize,
}

fn default_ticks() -> usize {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppendStep {
    pub parent: String,
    pub node: NodeFixture,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VolumeStep {
    pub target: String,
    pub volume: f64,
    #[serde(default)]
    pub muted: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Step {
    /// Milliseconds to let pass.
    Wait(u64),
    /// Moves the pointer onto an element, or off the page with `null`.
    Hover(Option<String>),
    Wheel(WheelStep),
    Key(String),
    Remove(String),
    Append(AppendStep),
    Navigate(String),
    SetVolume(VolumeStep),
    /// A live settings change set, e.g. `{"volumeStep": 0.1}`.
    Settings(serde_json::Value),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    pub url: String,
    #[serde(default)]
    pub page: Vec<NodeFixture>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaReport {
    pub id: Option<String>,
    pub volume: f64,
    pub muted: bool,
    /// Wheel handlers a scroll over this element reaches.
    pub listeners: usize,
    pub overlay: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub site: SiteKind,
    pub url: String,
    pub media: Vec<MediaReport>,
}

fn find(doc: &Document, id: &str) -> anyhow::Result<NodeId> {
    doc.query(&Selector::id(id))
        .with_context(|| format!("No element with id '{id}'"))
}

/// Builds `fixture` as a detached subtree and returns its root.
fn build(doc: &mut Document, fixture: &NodeFixture) -> NodeId {
    let node = doc.create_element(&fixture.tag);
    if let Some(id) = &fixture.id {
        doc.set_attr(node, "id", id);
    }
    if let Some(class) = &fixture.class {
        doc.set_attr(node, "class", class);
    }
    for (name, value) in &fixture.attrs {
        doc.set_attr(node, name, value);
    }
    for (property, value) in &fixture.style {
        doc.set_style(node, property, value);
    }
    if let Some(value) = &fixture.value {
        doc.set_value(node, value);
    }
    if let Some(state) = doc.media(node) {
        doc.set_media_volume(
            node,
            fixture.volume.unwrap_or(state.volume),
            fixture.muted.unwrap_or(state.muted),
        );
        doc.set_ready_state(node, fixture.ready_state.unwrap_or(state.ready_state));
    }
    for child in &fixture.children {
        let child = build(doc, child);
        doc.append_child(node, child);
    }
    node
}

impl Scenario {
    pub fn read(file: &mut impl Read) -> anyhow::Result<Self> {
        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .context("Failed to read scenario file")?;
        serde_json::from_str(&contents).context("Failed to parse scenario file")
    }

    pub fn read_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let mut file = File::open(path).context("Failed to open scenario file")?;
        Self::read(&mut file)
    }

    pub fn build_page(&self) -> Page {
        let page = Page::new(&self.url);
        {
            let mut doc = page.lock();
            let body = doc.body();
            for fixture in &self.page {
                let node = build(&mut doc, fixture);
                doc.append_child(body, node);
            }
        }
        page
    }

    async fn apply(&self, page: &Page, config: &ConfigStore, step: &Step) -> anyhow::Result<()> {
        log::debug!("Replaying {step:?}");
        match step {
            Step::Wait(millis) => tokio::time::sleep(Duration::from_millis(*millis)).await,
            Step::Hover(target) => {
                let mut doc = page.lock();
                let target = target.as_deref().map(|id| find(&doc, id)).transpose()?;
                doc.move_pointer(target);
            }
            Step::Wheel(wheel) => {
                for _ in 0..wheel.ticks {
                    {
                        let mut doc = page.lock();
                        let target = find(&doc, &wheel.target)?;
                        doc.dispatch_wheel(target, wheel.delta_y);
                    }
                    tokio::time::sleep(SETTLE).await;
                }
            }
            Step::Key(key) => {
                page.lock().dispatch_key(key);
            }
            Step::Remove(id) => {
                let mut doc = page.lock();
                let target = find(&doc, id)?;
                doc.remove(target);
            }
            Step::Append(append) => {
                let mut doc = page.lock();
                let parent = find(&doc, &append.parent)?;
                let node = build(&mut doc, &append.node);
                doc.append_child(parent, node);
            }
            Step::Navigate(url) => page.lock().set_url(url),
            Step::SetVolume(change) => {
                let mut doc = page.lock();
                let target = find(&doc, &change.target)?;
                if doc.media(target).is_none() {
                    return Err(anyhow!("Element '{}' is not a media element", change.target));
                }
                doc.set_media_volume(target, change.volume, change.muted);
            }
            Step::Settings(changes) => config.apply_changes(changes)?,
        }
        tokio::time::sleep(SETTLE).await;
        Ok(())
    }

    /// Starts the engine on a fresh page, replays every step and reports the
    /// media state before shutting the engine down.
    pub async fn run(&self, config: &ConfigStore) -> anyhow::Result<Report> {
        let page = self.build_page();
        let engine = dispatcher::start(page.clone(), config);
        let site = engine.kind;
        tokio::time::sleep(SETTLE).await;

        for (index, step) in self.steps.iter().enumerate() {
            if let Err(err) = self.apply(&page, config, step).await {
                engine.shutdown().await?;
                return Err(err.context(format!("Step {} failed", index + 1)));
            }
        }

        let report = report(&page.lock(), site);
        engine.shutdown().await?;
        Ok(report)
    }
}

fn report(doc: &Document, site: SiteKind) -> Report {
    let media = doc
        .query_all(&Selector::any([Selector::tag("video"), Selector::tag("audio")]))
        .into_iter()
        .filter_map(|node| {
            let state = doc.media(node)?;
            let listeners = doc
                .path(node)
                .into_iter()
                .map(|ancestor| doc.listener_count(ancestor, EventKind::Wheel))
                .sum();
            Some(MediaReport {
                id: doc.attr(node, "id").map(str::to_string),
                volume: state.volume,
                muted: state.muted,
                listeners,
                overlay: readout_near(doc, node),
            })
        })
        .collect();
    Report {
        site,
        url: doc.url().to_string(),
        media,
    }
}
