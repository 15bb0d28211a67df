use std::collections::HashMap;

use tokio::sync::mpsc::UnboundedSender;

use crate::{
    adapter::{HoverPolicy, SiteAdapter},
    page::{Document, EventKind, ListenerId, NodeId, ObserverId, PageEvent},
};

/// One attached media element and everything installed on its behalf.
#[derive(Debug)]
pub struct AttachmentRecord {
    pub media: NodeId,
    pub container: NodeId,
    pub hovering: bool,
    listeners: Vec<ListenerId>,
    watcher: ObserverId,
}

impl AttachmentRecord {
    #[cfg(test)]
    pub fn listeners(&self) -> &[ListenerId] {
        &self.listeners
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attach {
    Attached(NodeId),
    AlreadyAttached,
    NoContainer,
}

/// Membership table keyed by media handle. Handles are generational, so a
/// removed-and-reinserted element is a different key and attaches afresh.
#[derive(Debug, Default)]
pub struct AttachmentRegistry {
    records: HashMap<NodeId, AttachmentRecord>,
    owners: HashMap<ListenerId, NodeId>,
    watchers: HashMap<ObserverId, NodeId>,
}

impl AttachmentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_attach(
        &mut self,
        doc: &mut Document,
        adapter: &dyn SiteAdapter,
        media: NodeId,
        tx: &UnboundedSender<PageEvent>,
    ) -> Attach {
        if self.records.contains_key(&media) {
            return Attach::AlreadyAttached;
        }
        let Some(container) = adapter.find_container(doc, media) else {
            log::debug!("No container found for {media}; skipping");
            return Attach::NoContainer;
        };

        let mut listeners = vec![doc.add_listener(
            adapter.scroll_target(media, container),
            EventKind::Wheel,
            tx.clone(),
        )];
        if adapter.hover_policy() == HoverPolicy::Container {
            listeners.push(doc.add_listener(container, EventKind::PointerEnter, tx.clone()));
            listeners.push(doc.add_listener(container, EventKind::PointerLeave, tx.clone()));
        }
        if adapter.tracks_host_volume() {
            listeners.push(doc.add_listener(media, EventKind::VolumeChange, tx.clone()));
        }
        let watcher = doc.observe(tx.clone());

        // the pointer may already be inside when the element appears
        let hovering = doc
            .hovered()
            .is_some_and(|hovered| doc.path(hovered).contains(&container));

        for listener in &listeners {
            self.owners.insert(*listener, media);
        }
        self.watchers.insert(watcher, media);
        self.records.insert(
            media,
            AttachmentRecord {
                media,
                container,
                hovering,
                listeners,
                watcher,
            },
        );
        log::debug!("Attached {} handler to {media} in {container}", adapter.name());
        Attach::Attached(container)
    }

    /// Unregisters `media`, removing its listeners and its removal watcher.
    pub fn on_removed(&mut self, doc: &mut Document, media: NodeId) -> Option<AttachmentRecord> {
        let record = self.records.remove(&media)?;
        for listener in &record.listeners {
            doc.remove_listener(*listener);
            self.owners.remove(listener);
        }
        doc.disconnect(record.watcher);
        self.watchers.remove(&record.watcher);
        log::debug!("Detached handler from {media}");
        Some(record)
    }

    /// Handles a mutation notice for `watcher`. Returns the removed record
    /// when its media or container has left the page.
    pub fn check_watcher(&mut self, doc: &mut Document, watcher: ObserverId) -> Option<AttachmentRecord> {
        let media = *self.watchers.get(&watcher)?;
        let record = self.records.get(&media)?;
        if doc.contains(record.media) && doc.contains(record.container) {
            return None;
        }
        self.on_removed(doc, media)
    }

    #[cfg(test)]
    pub fn is_watcher(&self, observer: ObserverId) -> bool {
        self.watchers.contains_key(&observer)
    }

    pub fn owner(&self, listener: ListenerId) -> Option<&AttachmentRecord> {
        self.records.get(self.owners.get(&listener)?)
    }

    pub fn owner_mut(&mut self, listener: ListenerId) -> Option<&mut AttachmentRecord> {
        self.records.get_mut(self.owners.get(&listener)?)
    }

    #[cfg(test)]
    pub fn get(&self, media: NodeId) -> Option<&AttachmentRecord> {
        self.records.get(&media)
    }

    /// The attached media element that is `node` or encloses it.
    pub fn media_at(&self, doc: &Document, node: NodeId) -> Option<NodeId> {
        doc.path(node)
            .into_iter()
            .find(|ancestor| self.records.contains_key(ancestor))
    }

    pub fn media(&self) -> Vec<NodeId> {
        self.records.keys().copied().collect()
    }

    pub fn uses_container(&self, container: NodeId) -> bool {
        self.records
            .values()
            .any(|record| record.container == container)
    }

    #[cfg(test)]
    pub fn is_attached(&self, media: NodeId) -> bool {
        self.records.contains_key(&media)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn detach_all(&mut self, doc: &mut Document) {
        for media in self.media() {
            self.on_removed(doc, media);
        }
    }
}
