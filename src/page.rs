use std::{
    collections::{BTreeMap, HashSet},
    fmt::Display,
    sync::Arc,
};

use parking_lot::{Mutex, MutexGuard};
use tokio::sync::mpsc::UnboundedSender;

use crate::{
    id_type,
    selector::Selector,
    storage::{Storage, StorageScope},
};

id_type!(ListenerId);
id_type!(ObserverId);

/// Generational handle into the document arena. A handle outlives its node
/// harmlessly: once the slot is freed the generation no longer matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node#{}v{}", self.index, self.generation)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MediaState {
    pub volume: f64,
    pub muted: bool,
    pub ready_state: u8,
}

impl Default for MediaState {
    fn default() -> Self {
        Self {
            volume: 1.0,
            muted: false,
            ready_state: 4,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    tag: String,
    attributes: BTreeMap<String, String>,
    style: BTreeMap<String, String>,
    text: String,
    laid_out: bool,
    media: Option<MediaState>,
    value: Option<String>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl Node {
    pub fn new(tag: &str) -> Self {
        let tag = tag.to_ascii_lowercase();
        let media = matches!(tag.as_str(), "video" | "audio").then(MediaState::default);
        Self {
            tag,
            attributes: BTreeMap::new(),
            style: BTreeMap::new(),
            text: String::new(),
            laid_out: true,
            media,
            value: None,
            parent: None,
            children: vec![],
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn set_attr(&mut self, name: &str, value: &str) {
        self.attributes.insert(name.to_string(), value.to_string());
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.attr("class")
            .is_some_and(|classes| classes.split_whitespace().any(|c| c == class))
    }

    pub fn style(&self, property: &str) -> Option<&str> {
        self.style.get(property).map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Wheel,
    PointerEnter,
    PointerLeave,
    KeyDown,
    VolumeChange,
    Input,
    Change,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    Wheel { delta_y: f64 },
    PointerEnter,
    PointerLeave,
    KeyDown { key: String },
    VolumeChange,
    Input,
    Change,
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Wheel { .. } => EventKind::Wheel,
            Self::PointerEnter => EventKind::PointerEnter,
            Self::PointerLeave => EventKind::PointerLeave,
            Self::KeyDown { .. } => EventKind::KeyDown,
            Self::VolumeChange => EventKind::VolumeChange,
            Self::Input => EventKind::Input,
            Self::Change => EventKind::Change,
        }
    }
}

/// One dispatched DOM event. Every listener reached by the same dispatch sees
/// the same `id`.
#[derive(Debug, Clone, PartialEq)]
pub struct DomEvent {
    pub id: u64,
    pub target: NodeId,
    pub payload: EventPayload,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MutationRecord {
    pub added: Vec<NodeId>,
    pub removed: Vec<NodeId>,
}

#[derive(Debug, Clone)]
pub enum PageEvent {
    Dispatch {
        listener: ListenerId,
        event: DomEvent,
    },
    Mutation {
        observer: ObserverId,
        record: MutationRecord,
    },
}

#[derive(Debug)]
struct Listener {
    id: ListenerId,
    node: NodeId,
    kind: EventKind,
    sender: UnboundedSender<PageEvent>,
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    node: Option<Node>,
}

#[derive(Debug)]
pub struct Document {
    slots: Vec<Slot>,
    free: Vec<u32>,
    html: NodeId,
    body: NodeId,
    url: String,
    listeners: Vec<Listener>,
    observers: Vec<(ObserverId, UnboundedSender<PageEvent>)>,
    hovered: Option<NodeId>,
    next_event_id: u64,
    pub local_storage: Storage,
    pub session_storage: Storage,
}

impl Document {
    pub fn new(url: &str) -> Self {
        let mut document = Self {
            slots: vec![],
            free: vec![],
            html: NodeId {
                index: 0,
                generation: 0,
            },
            body: NodeId {
                index: 0,
                generation: 0,
            },
            url: url.to_string(),
            listeners: vec![],
            observers: vec![],
            hovered: None,
            next_event_id: 0,
            local_storage: Storage::new(StorageScope::Local),
            session_storage: Storage::new(StorageScope::Session),
        };
        document.html = document.alloc(Node::new("html"));
        document.body = document.alloc(Node::new("body"));
        document.link(document.html, document.body);
        document
    }

    pub fn html(&self) -> NodeId {
        self.html
    }

    pub fn body(&self) -> NodeId {
        self.body
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// In-place navigation (history API); does not touch the tree.
    pub fn set_url(&mut self, url: &str) {
        self.url = url.to_string();
    }

    pub fn storage_mut(&mut self, scope: StorageScope) -> &mut Storage {
        match scope {
            StorageScope::Local => &mut self.local_storage,
            StorageScope::Session => &mut self.session_storage,
        }
    }

    fn alloc(&mut self, node: Node) -> NodeId {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.node = Some(node);
            return NodeId {
                index,
                generation: slot.generation,
            };
        }
        self.slots.push(Slot {
            generation: 0,
            node: Some(node),
        });
        NodeId {
            index: (self.slots.len() - 1) as u32,
            generation: 0,
        }
    }

    fn release(&mut self, id: NodeId) {
        let Some(slot) = self.slots.get_mut(id.index as usize) else {
            return;
        };
        if slot.generation != id.generation || slot.node.is_none() {
            return;
        }
        let children = slot.node.take().map(|n| n.children).unwrap_or_default();
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        for child in children {
            self.release(child);
        }
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.node.as_ref()
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.node.as_mut()
    }

    pub fn is_alive(&self, id: NodeId) -> bool {
        self.node(id).is_some()
    }

    /// True when `id` is alive and attached under the document root.
    pub fn contains(&self, id: NodeId) -> bool {
        self.path(id).last() == Some(&self.html)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id)?.parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        match self.node(id) {
            Some(node) => &node.children,
            None => &[],
        }
    }

    /// `id` followed by its ancestors, innermost first.
    pub fn path(&self, id: NodeId) -> Vec<NodeId> {
        let mut path = vec![];
        let mut current = self.node(id).map(|_| id);
        while let Some(node) = current {
            path.push(node);
            current = self.parent(node);
        }
        path
    }

    fn is_ancestor_or_self(&self, ancestor: NodeId, id: NodeId) -> bool {
        self.path(id).contains(&ancestor)
    }

    fn link(&mut self, parent: NodeId, child: NodeId) {
        if let Some(node) = self.node_mut(child) {
            node.parent = Some(parent);
        }
        if let Some(node) = self.node_mut(parent) {
            node.children.push(child);
        }
    }

    fn unlink(&mut self, child: NodeId) {
        let Some(parent) = self.parent(child) else {
            return;
        };
        if let Some(node) = self.node_mut(parent) {
            node.children.retain(|c| *c != child);
        }
        if let Some(node) = self.node_mut(child) {
            node.parent = None;
        }
    }

    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.alloc(Node::new(tag))
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> bool {
        if !self.is_alive(parent) || !self.is_alive(child) {
            return false;
        }
        if self.is_ancestor_or_self(child, parent) {
            return false;
        }
        self.unlink(child);
        self.link(parent, child);
        if self.contains(child) {
            self.notify_observers(MutationRecord {
                added: vec![child],
                removed: vec![],
            });
        }
        true
    }

    /// Creates an element with the given attributes and appends it to `parent`.
    pub fn append_element(
        &mut self,
        parent: NodeId,
        tag: &str,
        attrs: &[(&str, &str)],
    ) -> NodeId {
        let id = self.create_element(tag);
        for (name, value) in attrs {
            self.set_attr(id, name, value);
        }
        self.append_child(parent, id);
        id
    }

    /// Detaches `id` and frees its whole subtree. Outstanding handles to any
    /// node of the subtree stop resolving.
    pub fn remove(&mut self, id: NodeId) -> bool {
        if id == self.html || id == self.body || !self.is_alive(id) {
            return false;
        }
        let was_attached = self.contains(id);
        if self.hovered.is_some_and(|h| self.is_ancestor_or_self(id, h)) {
            self.hovered = None;
        }
        self.unlink(id);
        self.release(id);
        if was_attached {
            self.notify_observers(MutationRecord {
                added: vec![],
                removed: vec![id],
            });
        }
        true
    }

    pub fn matches(&self, id: NodeId, selector: &Selector) -> bool {
        self.node(id).is_some_and(|node| selector.matches(node))
    }

    /// Nearest inclusive ancestor matching `selector`.
    pub fn closest(&self, id: NodeId, selector: &Selector) -> Option<NodeId> {
        self.path(id)
            .into_iter()
            .find(|node| self.matches(*node, selector))
    }

    fn descendants(&self, root: NodeId) -> Vec<NodeId> {
        let mut found = vec![];
        let mut stack: Vec<NodeId> = self.children(root).iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            found.push(id);
            stack.extend(self.children(id).iter().rev());
        }
        found
    }

    pub fn query(&self, selector: &Selector) -> Option<NodeId> {
        self.query_within(self.html, selector)
    }

    pub fn query_all(&self, selector: &Selector) -> Vec<NodeId> {
        self.descendants(self.html)
            .into_iter()
            .filter(|id| self.matches(*id, selector))
            .collect()
    }

    pub fn query_within(&self, root: NodeId, selector: &Selector) -> Option<NodeId> {
        self.descendants(root)
            .into_iter()
            .find(|id| self.matches(*id, selector))
    }

    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        self.node(id)?.attr(name)
    }

    pub fn set_attr(&mut self, id: NodeId, name: &str, value: &str) {
        if let Some(node) = self.node_mut(id) {
            node.set_attr(name, value);
        }
    }

    pub fn style(&self, id: NodeId, property: &str) -> Option<&str> {
        self.node(id)?.style(property)
    }

    pub fn set_style(&mut self, id: NodeId, property: &str, value: &str) {
        if let Some(node) = self.node_mut(id) {
            node.style.insert(property.to_string(), value.to_string());
        }
    }

    pub fn position(&self, id: NodeId) -> &str {
        self.style(id, "position").unwrap_or("static")
    }

    #[cfg(test)]
    pub fn set_laid_out(&mut self, id: NodeId, laid_out: bool) {
        if let Some(node) = self.node_mut(id) {
            node.laid_out = laid_out;
        }
    }

    /// Attached, laid out, and neither the node nor an ancestor is `display:none`.
    pub fn is_visible(&self, id: NodeId) -> bool {
        let laid_out = self.node(id).is_some_and(|node| node.laid_out);
        laid_out
            && self.contains(id)
            && self
                .path(id)
                .iter()
                .all(|node| self.style(*node, "display") != Some("none"))
    }

    pub fn text(&self, id: NodeId) -> Option<&str> {
        self.node(id).map(|node| node.text.as_str())
    }

    pub fn set_text(&mut self, id: NodeId, text: &str) {
        if let Some(node) = self.node_mut(id) {
            node.text = text.to_string();
        }
    }

    pub fn value(&self, id: NodeId) -> Option<&str> {
        self.node(id)?.value.as_deref()
    }

    pub fn set_value(&mut self, id: NodeId, value: &str) {
        if let Some(node) = self.node_mut(id) {
            node.value = Some(value.to_string());
        }
    }

    pub fn media(&self, id: NodeId) -> Option<MediaState> {
        self.node(id)?.media
    }

    /// Writes volume and mute state, firing `volumechange` when either changes.
    pub fn set_media_volume(&mut self, id: NodeId, volume: f64, muted: bool) {
        let Some(media) = self.node_mut(id).and_then(|node| node.media.as_mut()) else {
            return;
        };
        let changed = media.volume != volume || media.muted != muted;
        media.volume = volume;
        media.muted = muted;
        if changed {
            self.dispatch(id, EventPayload::VolumeChange, false);
        }
    }

    pub fn set_ready_state(&mut self, id: NodeId, ready_state: u8) {
        if let Some(media) = self.node_mut(id).and_then(|node| node.media.as_mut()) {
            media.ready_state = ready_state;
        }
    }

    pub fn add_listener(
        &mut self,
        node: NodeId,
        kind: EventKind,
        sender: UnboundedSender<PageEvent>,
    ) -> ListenerId {
        let id = ListenerId::new();
        self.listeners.push(Listener {
            id,
            node,
            kind,
            sender,
        });
        id
    }

    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|listener| listener.id != id);
        self.listeners.len() != before
    }

    pub fn listener_count(&self, node: NodeId, kind: EventKind) -> usize {
        self.listeners
            .iter()
            .filter(|listener| listener.node == node && listener.kind == kind)
            .count()
    }

    #[cfg(test)]
    pub fn listener_total(&self) -> usize {
        self.listeners.len()
    }

    /// Subscribes to every subtree child-list mutation under the root.
    pub fn observe(&mut self, sender: UnboundedSender<PageEvent>) -> ObserverId {
        let id = ObserverId::new();
        self.observers.push((id, sender));
        id
    }

    pub fn disconnect(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(observer, _)| *observer != id);
        self.observers.len() != before
    }

    #[cfg(test)]
    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    fn notify_observers(&self, record: MutationRecord) {
        for (observer, sender) in &self.observers {
            let _ = sender.send(PageEvent::Mutation {
                observer: *observer,
                record: record.clone(),
            });
        }
    }

    fn dispatch(&mut self, target: NodeId, payload: EventPayload, bubbles: bool) -> u64 {
        self.next_event_id += 1;
        let event = DomEvent {
            id: self.next_event_id,
            target,
            payload,
        };
        let kind = event.payload.kind();
        let path = if bubbles {
            self.path(target)
        } else {
            vec![target]
        };
        for node in path {
            for listener in &self.listeners {
                if listener.node != node || listener.kind != kind {
                    continue;
                }
                // a closed receiver means the owning engine is gone
                let _ = listener.sender.send(PageEvent::Dispatch {
                    listener: listener.id,
                    event: event.clone(),
                });
            }
        }
        event.id
    }

    pub fn dispatch_wheel(&mut self, target: NodeId, delta_y: f64) -> u64 {
        self.dispatch(target, EventPayload::Wheel { delta_y }, true)
    }

    /// Moves the pointer onto `target` with `mouseenter`/`mouseleave` semantics.
    pub fn move_pointer(&mut self, target: Option<NodeId>) {
        let old_path = self.hovered.map(|h| self.path(h)).unwrap_or_default();
        let new_path = target.map(|t| self.path(t)).unwrap_or_default();
        let old_set: HashSet<NodeId> = old_path.iter().copied().collect();
        let new_set: HashSet<NodeId> = new_path.iter().copied().collect();

        for node in old_path.iter().filter(|n| !new_set.contains(n)) {
            self.dispatch(*node, EventPayload::PointerLeave, false);
        }
        for node in new_path.iter().rev().filter(|n| !old_set.contains(n)) {
            self.dispatch(*node, EventPayload::PointerEnter, false);
        }
        self.hovered = target.filter(|t| self.is_alive(*t));
    }

    pub fn hovered(&self) -> Option<NodeId> {
        self.hovered
    }

    pub fn dispatch_key(&mut self, key: &str) -> u64 {
        let body = self.body;
        self.dispatch(
            body,
            EventPayload::KeyDown {
                key: key.to_string(),
            },
            true,
        )
    }

    /// Fires a bubbling synthetic `input`/`change` notification so host scripts observe it.
    pub fn dispatch_synthetic(&mut self, target: NodeId, kind: EventKind) {
        let payload = match kind {
            EventKind::Input => EventPayload::Input,
            EventKind::Change => EventPayload::Change,
            _ => return,
        };
        self.dispatch(target, payload, true);
    }
}

/// Shared handle to the page document, held by the host and the engine.
#[derive(Debug, Clone)]
pub struct Page {
    document: Arc<Mutex<Document>>,
}

impl Page {
    pub fn new(url: &str) -> Self {
        Self {
            document: Arc::new(Mutex::new(Document::new(url))),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, Document> {
        self.document.lock()
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc::{self, error::TryRecvError};

    use super::*;

    #[test]
    fn should_invalidate_handles_of_removed_subtree() {
        // given
        let mut doc = Document::new("https://example.org/");
        let body = doc.body();
        let wrapper = doc.append_element(body, "div", &[("class", "player")]);
        let video = doc.append_element(wrapper, "video", &[]);

        // when
        let removed = doc.remove(wrapper);
        let replacement = doc.append_element(body, "video", &[]);

        // then
        assert!(removed);
        assert!(!doc.is_alive(wrapper));
        assert!(!doc.is_alive(video));
        assert!(!doc.contains(video));
        assert_ne!(replacement, video);
        assert_ne!(replacement, wrapper);
        assert!(doc.contains(replacement));
    }

    #[test]
    fn should_find_closest_and_query_in_document_order() {
        let mut doc = Document::new("https://example.org/");
        let body = doc.body();
        let first = doc.append_element(body, "section", &[("id", "a")]);
        let second = doc.append_element(body, "section", &[("id", "b")]);
        let video = doc.append_element(first, "video", &[]);

        assert_eq!(doc.query(&Selector::tag("section")), Some(first));
        assert_eq!(doc.query_all(&Selector::tag("section")), vec![first, second]);
        assert_eq!(doc.closest(video, &Selector::tag("section")), Some(first));
        assert_eq!(doc.closest(video, &Selector::tag("video")), Some(video));
        assert_eq!(doc.query_within(second, &Selector::tag("video")), None);
    }

    #[test]
    fn should_hide_nodes_under_display_none() {
        let mut doc = Document::new("https://example.org/");
        let body = doc.body();
        let wrapper = doc.append_element(body, "div", &[]);
        let video = doc.append_element(wrapper, "video", &[]);
        let detached = doc.create_element("video");

        assert!(doc.is_visible(video));
        assert!(!doc.is_visible(detached));

        doc.set_style(wrapper, "display", "none");
        assert!(!doc.is_visible(video));

        doc.set_style(wrapper, "display", "block");
        doc.set_laid_out(video, false);
        assert!(!doc.is_visible(video));
    }

    #[test]
    fn should_bubble_wheel_events_with_shared_id() {
        // given
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut doc = Document::new("https://example.org/");
        let body = doc.body();
        let wrapper = doc.append_element(body, "div", &[]);
        let video = doc.append_element(wrapper, "video", &[]);
        let inner = doc.add_listener(video, EventKind::Wheel, tx.clone());
        let outer = doc.add_listener(wrapper, EventKind::Wheel, tx);

        // when
        let id = doc.dispatch_wheel(video, 100.0);

        // then
        let mut seen = vec![];
        while let Ok(PageEvent::Dispatch { listener, event }) = rx.try_recv() {
            assert_eq!(event.id, id);
            seen.push(listener);
        }
        assert_eq!(seen, vec![inner, outer]);
    }

    #[test]
    fn should_fire_enter_and_leave_only_for_changed_ancestors() {
        // given
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut doc = Document::new("https://example.org/");
        let body = doc.body();
        let container = doc.append_element(body, "div", &[]);
        let video = doc.append_element(container, "video", &[]);
        let enter = doc.add_listener(container, EventKind::PointerEnter, tx.clone());
        let leave = doc.add_listener(container, EventKind::PointerLeave, tx);

        // when
        doc.move_pointer(Some(container));
        doc.move_pointer(Some(video));
        doc.move_pointer(Some(body));

        // then
        let listeners: Vec<_> = std::iter::from_fn(|| match rx.try_recv() {
            Ok(PageEvent::Dispatch { listener, .. }) => Some(listener),
            _ => None,
        })
        .collect();
        assert_eq!(listeners, vec![enter, leave]);
    }

    #[test]
    fn should_notify_observers_until_disconnected() {
        // given
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut doc = Document::new("https://example.org/");
        let body = doc.body();
        let observer = doc.observe(tx);

        // when
        let video = doc.append_element(body, "video", &[]);
        doc.disconnect(observer);
        doc.remove(video);

        // then
        match rx.try_recv() {
            Ok(PageEvent::Mutation { record, .. }) => assert_eq!(record.added, vec![video]),
            other => panic!("expected mutation, got {other:?}"),
        }
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn should_fire_volumechange_only_on_change() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut doc = Document::new("https://example.org/");
        let body = doc.body();
        let video = doc.append_element(body, "video", &[]);
        doc.add_listener(video, EventKind::VolumeChange, tx);

        doc.set_media_volume(video, 1.0, false);
        assert!(rx.try_recv().is_err());

        doc.set_media_volume(video, 0.4, false);
        assert!(rx.try_recv().is_ok());
        assert_eq!(doc.media(video).map(|m| m.volume), Some(0.4));
    }
}
