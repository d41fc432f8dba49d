//! Channel adapters: per-platform frame transforms.
//!
//! An adapter owns a platform tag and may rewrite inbound and outbound
//! frames (payload normalization, media references) and classify
//! inbound frames (including forcing escalation for channel-specific
//! signals). The registry keeps one adapter per tag and per-platform
//! traffic counters.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;

use convoy_core::{Platform, RawFrame};

/// What an adapter says about an inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    /// The platform the frame belongs to.
    pub platform: Platform,
    /// Channel-level escalation demand (e.g. a Telegram `/agent`
    /// command).
    pub force_escalate: bool,
}

/// A per-platform frame transform.
pub trait ChannelAdapter: Send + Sync {
    /// The platform tag this adapter registers under.
    fn platform(&self) -> Platform;

    /// Rewrite an inbound frame before the pipeline sees it.
    fn transform_in(&self, frame: RawFrame) -> RawFrame {
        frame
    }

    /// Rewrite an outbound frame before it goes to the wire.
    fn transform_out(&self, frame: RawFrame) -> RawFrame {
        frame
    }

    /// Classify an inbound frame.
    fn classify(&self, frame: &RawFrame) -> Classification {
        let _ = frame;
        Classification {
            platform: self.platform(),
            force_escalate: false,
        }
    }
}

/// Per-platform traffic counters.
#[derive(Debug, Default)]
pub struct AdapterStats {
    /// Inbound frames transformed.
    pub inbound: AtomicU64,
    /// Outbound frames transformed.
    pub outbound: AtomicU64,
    /// Frames the adapter could not handle.
    pub errors: AtomicU64,
}

/// Registry error: duplicate platform tag.
#[derive(Debug, Error)]
#[error("adapter already registered for platform {0}")]
pub struct DuplicateAdapter(pub Platform);

/// Adapter registry, keyed by platform tag.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: HashMap<Platform, Arc<dyn ChannelAdapter>>,
    stats: HashMap<Platform, Arc<AdapterStats>>,
}

impl AdapterRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter. Platform tags are unique.
    ///
    /// # Errors
    ///
    /// [`DuplicateAdapter`] when the tag is taken.
    pub fn register(&mut self, adapter: Arc<dyn ChannelAdapter>) -> Result<(), DuplicateAdapter> {
        let platform = adapter.platform();
        if self.adapters.contains_key(&platform) {
            return Err(DuplicateAdapter(platform));
        }
        self.stats
            .insert(platform.clone(), Arc::new(AdapterStats::default()));
        self.adapters.insert(platform, adapter);
        Ok(())
    }

    /// Look up the adapter for a platform.
    #[must_use]
    pub fn get(&self, platform: &Platform) -> Option<&Arc<dyn ChannelAdapter>> {
        self.adapters.get(platform)
    }

    /// Run the inbound transform, counting.
    #[must_use]
    pub fn transform_in(&self, platform: &Platform, frame: RawFrame) -> RawFrame {
        match self.adapters.get(platform) {
            Some(adapter) => {
                self.bump(platform, |s| &s.inbound);
                adapter.transform_in(frame)
            }
            None => frame,
        }
    }

    /// Run the outbound transform, counting.
    #[must_use]
    pub fn transform_out(&self, platform: &Platform, frame: RawFrame) -> RawFrame {
        match self.adapters.get(platform) {
            Some(adapter) => {
                self.bump(platform, |s| &s.outbound);
                adapter.transform_out(frame)
            }
            None => frame,
        }
    }

    /// Classify through the adapter, if one is registered.
    #[must_use]
    pub fn classify(&self, platform: &Platform, frame: &RawFrame) -> Option<Classification> {
        self.adapters
            .get(platform)
            .map(|adapter| adapter.classify(frame))
    }

    /// Count an adapter-level error.
    pub fn count_error(&self, platform: &Platform) {
        self.bump(platform, |s| &s.errors);
    }

    /// Counters for one platform.
    #[must_use]
    pub fn stats(&self, platform: &Platform) -> Option<&Arc<AdapterStats>> {
        self.stats.get(platform)
    }

    /// Registered platform tags.
    #[must_use]
    pub fn platforms(&self) -> Vec<Platform> {
        let mut tags: Vec<_> = self.adapters.keys().cloned().collect();
        tags.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        tags
    }

    fn bump<F>(&self, platform: &Platform, pick: F)
    where
        F: Fn(&AdapterStats) -> &AtomicU64,
    {
        if let Some(stats) = self.stats.get(platform) {
            pick(stats).fetch_add(1, Ordering::Relaxed);
        }
    }
}
