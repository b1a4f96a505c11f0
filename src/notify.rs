use crate::plugin::RestartFlags;
use std::ops::{BitOr, BitOrAssign};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::mpsc::Sender;

/// What changed about a processor, merged across a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouteProcessorChange(pub u32);

impl RouteProcessorChange {
    pub const CONFIGURATION: Self = Self(1);
    pub const LATENCY: Self = Self(1 << 1);
    pub const PARAMETER_VALUES: Self = Self(1 << 2);
    pub const PARAMETER_TITLES: Self = Self(1 << 3);
    pub const MIDI_MAPPING: Self = Self(1 << 4);
    pub const RELOAD: Self = Self(1 << 5);

    pub fn contains(self, other: Self) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn from_restart(flags: RestartFlags) -> Self {
        let mut change = Self::default();
        if flags.contains(RestartFlags::RELOAD_COMPONENT) {
            change |= Self::RELOAD;
        }
        if flags.contains(RestartFlags::IO_CHANGED) || flags.contains(RestartFlags::IO_TITLES_CHANGED) {
            change |= Self::CONFIGURATION;
        }
        if flags.contains(RestartFlags::LATENCY_CHANGED) {
            change |= Self::LATENCY;
        }
        if flags.contains(RestartFlags::PARAM_VALUES_CHANGED) {
            change |= Self::PARAMETER_VALUES;
        }
        if flags.contains(RestartFlags::PARAM_TITLES_CHANGED) {
            change |= Self::PARAMETER_TITLES;
        }
        if flags.contains(RestartFlags::MIDI_CC_ASSIGNMENT_CHANGED) {
            change |= Self::MIDI_MAPPING;
        }
        change
    }
}

impl BitOr for RouteProcessorChange {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for RouteProcessorChange {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum HostNotification {
    ProcessorChange(RouteProcessorChange),
    ViewResized { width: u32, height: u32 },
    PresetsChanged,
    LatencyChanged { samples: u32 },
    RestartServiced(RestartFlags),
    /// The plugin wrote a context value.
    ContextChanged { key: String },
    /// The plugin opened or closed an edit of a context value.
    ContextEdit { key: String, editing: bool },
}

/// Coalesces processor-change notifications raised while blocked into a
/// single notification sent when the outermost block is released.
#[derive(Debug)]
pub struct NotificationBatcher {
    depth: AtomicU32,
    pending: Mutex<RouteProcessorChange>,
    tx: Sender<HostNotification>,
    flushes: AtomicUsize,
}

impl NotificationBatcher {
    pub fn new(tx: Sender<HostNotification>) -> Self {
        Self {
            depth: AtomicU32::new(0),
            pending: Mutex::new(RouteProcessorChange::default()),
            tx,
            flushes: AtomicUsize::new(0),
        }
    }

    pub fn block(&self) {
        self.depth.fetch_add(1, Ordering::AcqRel);
    }

    pub fn resume(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(|p| p.into_inner());
        let previous = self
            .depth
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |d| d.checked_sub(1));
        match previous {
            Ok(1) => {
                let change = std::mem::take(&mut *pending);
                drop(pending);
                if !change.is_empty() {
                    self.flushes.fetch_add(1, Ordering::Relaxed);
                    self.post(HostNotification::ProcessorChange(change));
                }
            }
            Ok(_) => {}
            Err(_) => tracing::warn!("resume_notifications called without a matching block"),
        }
    }

    /// Blocks until the returned guard is dropped.
    pub fn blocked(&self) -> BlockGuard<'_> {
        self.block();
        BlockGuard { batcher: self }
    }

    pub fn is_blocked(&self) -> bool {
        self.depth.load(Ordering::Acquire) > 0
    }

    /// Merges `change` into the batch, or sends it now if nothing is blocking.
    pub fn notify(&self, change: RouteProcessorChange) {
        if change.is_empty() {
            return;
        }
        let mut pending = self.pending.lock().unwrap_or_else(|p| p.into_inner());
        if self.is_blocked() {
            *pending |= change;
            return;
        }
        drop(pending);
        self.post(HostNotification::ProcessorChange(change));
    }

    pub fn post(&self, notification: HostNotification) {
        if self.tx.send(notification).is_err() {
            tracing::trace!("Notification receiver dropped");
        }
    }

    /// Number of batched flushes sent so far.
    pub fn flush_count(&self) -> usize {
        self.flushes.load(Ordering::Relaxed)
    }
}

pub struct BlockGuard<'a> {
    batcher: &'a NotificationBatcher,
}

impl Drop for BlockGuard<'_> {
    fn drop(&mut self) {
        self.batcher.resume();
    }
}
