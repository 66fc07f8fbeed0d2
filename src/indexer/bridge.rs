//! Change watcher bridge
//!
//! Turns raw change notifications into index mutations. Notifications are
//! at-least-once and may arrive out of order or duplicated, so the bridge
//! debounces bursts per entity, drops stale generations and resolves each
//! surviving event through an [`EntityResolver`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

use crate::config::WatcherConfig;
use crate::source::{adapt, Candidate, EntityRef, EntityResolver};

/// Upper bound on remembered generations before idle entries are forgotten
const GENERATION_MEMORY: usize = 65_536;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

/// One notification from the environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub entity: EntityRef,
    /// Monotonic per source; higher is newer
    pub generation: u64,
}

impl ChangeEvent {
    pub fn new(kind: ChangeKind, entity: EntityRef, generation: u64) -> Self {
        Self {
            kind,
            entity,
            generation,
        }
    }
}

/// A change to apply to the index store
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Upsert(Candidate),
    Remove(String),
    /// Remove a path candidate and everything indexed below it
    RemoveTree(String),
}

impl Mutation {
    pub fn id(&self) -> &str {
        match self {
            Mutation::Upsert(candidate) => &candidate.id,
            Mutation::Remove(id) | Mutation::RemoveTree(id) => id,
        }
    }
}

#[derive(Debug)]
struct Pending {
    event: ChangeEvent,
    first_seen: Instant,
    last_seen: Instant,
}

impl Pending {
    fn due(&self, window: Duration, max_wait: Duration) -> Instant {
        (self.last_seen + window).min(self.first_seen + max_wait)
    }
}

/// Trailing-edge debounce with a hard cap, keyed by entity
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    max_wait: Duration,
    pending: HashMap<EntityRef, Pending>,
    /// Newest accepted (generation, kind) per entity, including emitted ones
    latest: HashMap<EntityRef, (u64, ChangeKind)>,
}

impl Debouncer {
    pub fn new(window: Duration, max_wait: Duration) -> Self {
        Self {
            window,
            max_wait: max_wait.max(window),
            pending: HashMap::new(),
            latest: HashMap::new(),
        }
    }

    pub fn from_config(config: &WatcherConfig) -> Self {
        Self::new(config.debounce(), config.max_wait())
    }

    /// Record an event. Returns false when it was dropped as stale.
    pub fn observe(&mut self, event: ChangeEvent, now: Instant) -> bool {
        if let Some(&(generation, kind)) = self.latest.get(&event.entity) {
            if event.generation < generation {
                debug!("Dropping stale {:?} for {}", event.kind, event.entity);
                return false;
            }
            if event.generation == generation
                && kind == ChangeKind::Removed
                && event.kind != ChangeKind::Removed
            {
                return false;
            }
        }

        self.latest
            .insert(event.entity.clone(), (event.generation, event.kind));

        match self.pending.get_mut(&event.entity) {
            Some(pending) => {
                pending.event = event;
                pending.last_seen = now;
            }
            None => {
                self.pending.insert(
                    event.entity.clone(),
                    Pending {
                        event,
                        first_seen: now,
                        last_seen: now,
                    },
                );
            }
        }

        self.forget_idle();
        true
    }

    /// Take every event whose window has closed, oldest generation first
    pub fn drain_ready(&mut self, now: Instant) -> Vec<ChangeEvent> {
        let (window, max_wait) = (self.window, self.max_wait);
        let ready: Vec<EntityRef> = self
            .pending
            .iter()
            .filter(|(_, pending)| pending.due(window, max_wait) <= now)
            .map(|(entity, _)| entity.clone())
            .collect();

        let mut events: Vec<ChangeEvent> = ready
            .iter()
            .filter_map(|entity| self.pending.remove(entity))
            .map(|pending| pending.event)
            .collect();
        events.sort_by_key(|event| event.generation);
        events
    }

    /// Take everything regardless of timing (shutdown)
    pub fn drain_all(&mut self) -> Vec<ChangeEvent> {
        let mut events: Vec<ChangeEvent> = self
            .pending
            .drain()
            .map(|(_, pending)| pending.event)
            .collect();
        events.sort_by_key(|event| event.generation);
        events
    }

    /// Put drained events back, unless something newer arrived meanwhile
    pub fn requeue(&mut self, events: Vec<ChangeEvent>, now: Instant) {
        for event in events {
            if self.pending.contains_key(&event.entity) {
                continue;
            }
            self.pending.insert(
                event.entity.clone(),
                Pending {
                    event,
                    first_seen: now,
                    last_seen: now,
                },
            );
        }
    }

    /// When the earliest pending event becomes ready
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending
            .values()
            .map(|pending| pending.due(self.window, self.max_wait))
            .min()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn forget_idle(&mut self) {
        if self.latest.len() <= GENERATION_MEMORY {
            return;
        }
        let pending = &self.pending;
        self.latest.retain(|entity, _| pending.contains_key(entity));
    }
}

/// Map one debounced event to the mutation it implies
pub fn resolve(
    event: &ChangeEvent,
    resolver: &dyn EntityResolver,
    observed_at: DateTime<Utc>,
) -> Mutation {
    let id = event.entity.candidate_id();
    let removal = || match event.entity {
        EntityRef::Path(_) => Mutation::RemoveTree(id.clone()),
        _ => Mutation::Remove(id.clone()),
    };

    // A removed desktop file may uncover a lower-precedence copy, so
    // desktop entries are always re-resolved.
    if event.kind == ChangeKind::Removed && !matches!(event.entity, EntityRef::DesktopEntry(_)) {
        return removal();
    }

    match resolver
        .resolve(&event.entity)
        .and_then(|raw| adapt(&raw, observed_at))
    {
        Ok(candidate) => Mutation::Upsert(candidate),
        Err(e) => {
            match e.into_malformed() {
                Ok(malformed) => warn!("{}; skipping", malformed),
                Err(absent) => debug!("{}", absent),
            }
            removal()
        }
    }
}

/// Async loop between a change source and the coordinator
pub struct ChangeBridge {
    debouncer: Debouncer,
    resolver: Arc<dyn EntityResolver>,
    sink: mpsc::Sender<Vec<Mutation>>,
}

impl ChangeBridge {
    pub fn new(
        config: &WatcherConfig,
        resolver: Arc<dyn EntityResolver>,
        sink: mpsc::Sender<Vec<Mutation>>,
    ) -> Self {
        Self {
            debouncer: Debouncer::from_config(config),
            resolver,
            sink,
        }
    }

    /// Run until the event source closes, then flush what is left
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<ChangeEvent>) {
        info!("Change bridge started");

        loop {
            let deadline = self.debouncer.next_deadline();

            tokio::select! {
                received = events.recv() => match received {
                    Some(event) => {
                        self.debouncer.observe(event, Instant::now());
                    }
                    None => break,
                },
                _ = sleep_until(deadline), if deadline.is_some() => {
                    let ready = self.debouncer.drain_ready(Instant::now());
                    if !self.forward(ready).await {
                        info!("Mutation sink closed, change bridge stopping");
                        return;
                    }
                }
            }
        }

        let rest = self.debouncer.drain_all();
        if !rest.is_empty() {
            let mutations = self.resolve_all(rest).await;
            if self.sink.send(mutations).await.is_err() {
                warn!("Mutation sink closed before final flush");
            }
        }
        info!("Change bridge stopped");
    }

    /// Resolve and hand over a batch. Returns false once the sink is gone.
    async fn forward(&mut self, ready: Vec<ChangeEvent>) -> bool {
        if ready.is_empty() {
            return true;
        }

        let mutations = self.resolve_all(ready.clone()).await;
        match self.sink.try_send(mutations) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!(
                    "Mutation queue full, holding {} events for coalescing",
                    ready.len()
                );
                self.debouncer.requeue(ready, Instant::now());
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    async fn resolve_all(&self, events: Vec<ChangeEvent>) -> Vec<Mutation> {
        let resolver = Arc::clone(&self.resolver);
        let count = events.len();
        let resolved = tokio::task::spawn_blocking(move || {
            let now = Utc::now();
            events
                .iter()
                .map(|event| resolve(event, resolver.as_ref(), now))
                .collect::<Vec<_>>()
        })
        .await;

        match resolved {
            Ok(mutations) => mutations,
            Err(e) => {
                warn!("Resolving {} change events failed: {}", count, e);
                Vec::new()
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    if let Some(deadline) = deadline {
        tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await;
    }
}
