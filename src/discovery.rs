use std::time::Duration;

use tokio::{
    sync::{
        mpsc::{self, UnboundedReceiver, UnboundedSender},
        oneshot, watch,
    },
    time::{self, Instant, Interval, MissedTickBehavior},
};

use crate::{
    adapter::{DiscoveryPlan, HoverPolicy, SiteAdapter},
    config::{ConfigStore, Settings},
    overlay::{OverlayRenderer, OverlayTimer},
    page::{
        Document, DomEvent, EventKind, EventPayload, ListenerId, MutationRecord, NodeId, ObserverId,
        Page, PageEvent,
    },
    registry::{Attach, AttachmentRegistry},
    timer::Timer,
    volume::{self, Direction},
};

const MUTE_KEY_FOLLOWUP: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanReason {
    Initial,
    Periodic,
    Burst,
    Mutation,
    Navigation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    Rescan(ScanReason),
    Overlay(OverlayTimer),
    MuteKeyFollowup,
}

#[derive(Debug)]
struct BurstScan {
    interval: Interval,
    deadline: Instant,
}

/// Per-page engine: finds media, attaches handlers and reacts to page events.
pub struct DiscoveryLoop {
    page: Page,
    adapter: Box<dyn SiteAdapter>,
    plan: DiscoveryPlan,
    registry: AttachmentRegistry,
    overlay: OverlayRenderer,
    settings: Settings,
    settings_rx: watch::Receiver<Settings>,
    settings_live: bool,
    page_tx: UnboundedSender<PageEvent>,
    page_rx: UnboundedReceiver<PageEvent>,
    timer_tx: UnboundedSender<TimerEvent>,
    timer_rx: UnboundedReceiver<TimerEvent>,
    tree_observer: ObserverId,
    key_listener: Option<ListenerId>,
    periodic: Interval,
    burst: Option<BurstScan>,
    initial: Option<Timer>,
    debounce: Option<Timer>,
    navigation: Option<Timer>,
    mute_followup: Option<Timer>,
    last_url: String,
    last_wheel: Option<u64>,
    // the level this engine last wrote, so its own `volumechange` is not mirrored twice
    applied: Option<(NodeId, f64)>,
}

fn periodic_interval(period: Duration) -> Interval {
    let mut interval = time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

impl DiscoveryLoop {
    pub fn new(page: Page, adapter: Box<dyn SiteAdapter>, config: &ConfigStore) -> Self {
        let (page_tx, page_rx) = mpsc::unbounded_channel();
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let mut settings_rx = config.subscribe();
        let settings = settings_rx.borrow_and_update().clone();
        let plan = adapter.plan();

        let (tree_observer, key_listener, last_url) = {
            let mut doc = page.lock();
            let tree_observer = doc.observe(page_tx.clone());
            let body = doc.body();
            let key_listener = adapter
                .watches_mute_key()
                .then(|| doc.add_listener(body, EventKind::KeyDown, page_tx.clone()));
            (tree_observer, key_listener, doc.url().to_string())
        };

        Self {
            page,
            adapter,
            plan,
            registry: AttachmentRegistry::new(),
            overlay: OverlayRenderer::new(timer_tx.clone()),
            periodic: periodic_interval(settings.scan_interval()),
            settings,
            settings_rx,
            settings_live: true,
            page_tx,
            page_rx,
            timer_tx,
            timer_rx,
            tree_observer,
            key_listener,
            burst: None,
            initial: None,
            debounce: None,
            navigation: None,
            mute_followup: None,
            last_url,
            last_wheel: None,
            applied: None,
        }
    }

    pub fn adapter_name(&self) -> &'static str {
        self.adapter.name()
    }

    fn start_scans(&mut self) {
        if self.plan.initial_delay.is_zero() {
            self.rescan(ScanReason::Initial);
        } else {
            self.initial = Some(Timer::after(
                self.plan.initial_delay,
                self.timer_tx.clone(),
                TimerEvent::Rescan(ScanReason::Initial),
            ));
        }
        if let Some(burst) = self.plan.burst {
            let mut interval = time::interval_at(Instant::now() + burst.every, burst.every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            self.burst = Some(BurstScan {
                interval,
                deadline: Instant::now() + burst.lasting,
            });
        }
    }

    fn rescan(&mut self, reason: ScanReason) {
        let page = self.page.clone();
        let mut doc = page.lock();
        self.scan(&mut doc, reason);
    }

    fn scan(&mut self, doc: &mut Document, reason: ScanReason) {
        if !self.settings.enabled {
            log::trace!("Skipping {reason:?} scan while disabled");
            return;
        }
        let candidates = self.adapter.find_media(doc);
        log::trace!(
            "{reason:?} scan found {} candidate(s) for {}",
            candidates.len(),
            self.adapter.name()
        );
        for media in candidates {
            let attached =
                self.registry
                    .try_attach(doc, self.adapter.as_ref(), media, &self.page_tx);
            // hooks run only after the record is in place
            if let Attach::Attached(_) = attached {
                self.adapter.on_attached(doc, media);
            }
        }
    }

    fn handle_page_event(&mut self, event: PageEvent) {
        let page = self.page.clone();
        let mut doc = page.lock();
        match event {
            PageEvent::Dispatch { listener, event } => {
                self.handle_dom_event(&mut doc, listener, event)
            }
            PageEvent::Mutation { observer, record } => {
                self.handle_mutation(&mut doc, observer, &record)
            }
        }
    }

    fn handle_dom_event(&mut self, doc: &mut Document, listener: ListenerId, event: DomEvent) {
        if Some(listener) == self.key_listener {
            if let EventPayload::KeyDown { key } = &event.payload {
                if key == "m" || key == "M" {
                    self.mute_followup = Some(Timer::after(
                        MUTE_KEY_FOLLOWUP,
                        self.timer_tx.clone(),
                        TimerEvent::MuteKeyFollowup,
                    ));
                }
            }
            return;
        }

        match event.payload {
            EventPayload::Wheel { delta_y } => self.on_wheel(doc, listener, &event, delta_y),
            EventPayload::PointerEnter => {
                let Some(record) = self.registry.owner_mut(listener) else {
                    return;
                };
                record.hovering = true;
                let container = record.container;
                self.adapter.on_pointer_enter(doc, container);
            }
            EventPayload::PointerLeave => {
                if let Some(record) = self.registry.owner_mut(listener) {
                    record.hovering = false;
                }
            }
            EventPayload::VolumeChange => {
                let Some(media) = self.registry.owner(listener).map(|record| record.media) else {
                    return;
                };
                let echo = self.applied.take();
                let level = self.adapter.read_level(doc, media);
                if echo.is_some_and(|(applied, expected)| applied == media && Some(expected) == level) {
                    return;
                }
                if let Err(err) = self.adapter.on_host_volume_change(doc, media) {
                    log::debug!("Failed to mirror host volume change: {err:?}");
                }
            }
            _ => {}
        }
    }

    fn on_wheel(
        &mut self,
        doc: &mut Document,
        listener: ListenerId,
        event: &DomEvent,
        delta_y: f64,
    ) {
        let (id, target) = (event.id, event.target);
        // an inner listener already handled this dispatch
        if self.last_wheel == Some(id) {
            return;
        }
        let Some(record) = self.registry.owner(listener) else {
            return;
        };
        let (media, container, hovering) = (record.media, record.container, record.hovering);
        // a scroll over another attached element belongs to that element's handler
        if self
            .registry
            .media_at(doc, target)
            .is_some_and(|hit| hit != media)
        {
            return;
        }

        if !self.settings.enabled {
            return;
        }
        if self.adapter.hover_policy() == HoverPolicy::Container && !hovering {
            return;
        }
        if !self.adapter.accepts_target(doc, target) {
            return;
        }
        if self.adapter.requires_ready_media()
            && doc.media(media).is_some_and(|state| state.ready_state == 0)
        {
            return;
        }
        let Some(current) = self.adapter.read_level(doc, media) else {
            return;
        };

        let direction = Direction::from_wheel(delta_y);
        let level = volume::step(current, direction, self.settings.volume_step);
        self.adapter.apply_level(doc, media, level);
        if level != current {
            self.applied = Some((media, level));
        }
        if let Err(err) = self.adapter.after_apply(doc, media, level) {
            log::debug!("Host UI sync failed after volume change: {err:?}");
        }
        self.overlay.show(doc, Some(container), level, &self.settings);
        self.last_wheel = Some(id);
        log::debug!("Volume of {media} set to {}%", volume::percent(level));
    }

    fn handle_mutation(&mut self, doc: &mut Document, observer: ObserverId, record: &MutationRecord) {
        if observer == self.tree_observer {
            if doc.url() != self.last_url {
                self.last_url = doc.url().to_string();
                if let Some(delay) = self.plan.url_change_delay {
                    log::debug!("Address changed to {}; rescanning", self.last_url);
                    self.navigation = Some(Timer::after(
                        delay,
                        self.timer_tx.clone(),
                        TimerEvent::Rescan(ScanReason::Navigation),
                    ));
                }
            }
            if record.added.is_empty() {
                return;
            }
            // restarting drops the pending debounce
            self.debounce = Some(Timer::after(
                self.plan.debounce,
                self.timer_tx.clone(),
                TimerEvent::Rescan(ScanReason::Mutation),
            ));
            return;
        }

        if record.removed.is_empty() {
            return;
        }
        let Some(detached) = self.registry.check_watcher(doc, observer) else {
            return;
        };
        if !self.registry.uses_container(detached.container) {
            self.overlay.forget(doc, detached.container);
        }
    }

    fn handle_timer(&mut self, event: TimerEvent) {
        match event {
            TimerEvent::Rescan(reason) => self.rescan(reason),
            TimerEvent::Overlay(timer) => {
                let page = self.page.clone();
                let mut doc = page.lock();
                self.overlay.on_timer(&mut doc, timer);
            }
            TimerEvent::MuteKeyFollowup => {
                let page = self.page.clone();
                let mut doc = page.lock();
                for media in self.registry.media() {
                    if let Err(err) = self.adapter.on_host_volume_change(&mut doc, media) {
                        log::debug!("Failed to mirror mute toggle: {err:?}");
                    }
                }
            }
        }
    }

    fn on_burst_tick(&mut self) {
        let expired = self
            .burst
            .as_ref()
            .is_some_and(|burst| Instant::now() >= burst.deadline);
        if expired {
            log::debug!("Fast discovery window closed");
            self.burst = None;
            return;
        }
        self.rescan(ScanReason::Burst);
    }

    fn reload_settings(&mut self) {
        let settings = self.settings_rx.borrow_and_update().clone();
        if settings.scan_interval != self.settings.scan_interval {
            self.periodic = periodic_interval(settings.scan_interval());
        }
        log::debug!("Settings reloaded: {settings:?}");
        self.settings = settings;
    }

    async fn next_burst_tick(burst: &mut Option<BurstScan>) {
        match burst {
            Some(burst) => {
                burst.interval.tick().await;
            }
            None => std::future::pending().await,
        }
    }

    fn teardown(&mut self) {
        self.initial = None;
        self.debounce = None;
        self.navigation = None;
        self.mute_followup = None;
        self.burst = None;

        let page = self.page.clone();
        let mut doc = page.lock();
        self.registry.detach_all(&mut doc);
        self.overlay.clear(&mut doc);
        doc.disconnect(self.tree_observer);
        if let Some(listener) = self.key_listener.take() {
            doc.remove_listener(listener);
        }
    }

    pub async fn run(mut self, mut shutdown: oneshot::Receiver<()>) {
        log::info!(
            "Starting {} discovery on {}",
            self.adapter.name(),
            self.last_url
        );
        self.start_scans();
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                event = self.page_rx.recv() => {
                    // the loop holds a sender, so this never yields `None`
                    if let Some(event) = event {
                        self.handle_page_event(event)
                    }
                }
                event = self.timer_rx.recv() => {
                    if let Some(event) = event {
                        self.handle_timer(event)
                    }
                }
                _ = self.periodic.tick() => self.rescan(ScanReason::Periodic),
                _ = Self::next_burst_tick(&mut self.burst) => self.on_burst_tick(),
                changed = self.settings_rx.changed(), if self.settings_live => {
                    match changed {
                        Ok(()) => self.reload_settings(),
                        Err(_) => {
                            log::debug!("Settings store closed; keeping current settings");
                            self.settings_live = false
                        }
                    }
                }
            }
        }
        self.teardown();
        log::info!("Stopped {} discovery", self.adapter.name());
    }
}
