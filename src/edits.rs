//! Host-to-plugin parameter edits and the per-cycle parameter change lists.

use crate::params::ParamId;
use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EditOrigin {
    /// Host automation or UI; announced once the plugin receives it.
    Host,
    /// Forwarded from the plugin's own controller; already announced.
    Plugin,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PendingEdit {
    pub index: usize,
    pub value: f64,
    pub sample_offset: u32,
    /// Whether the change should be recorded on automation lists.
    pub to_list: bool,
    pub origin: EditOrigin,
}

/// Lock-free handoff of edits from the control thread to `process`, plus a
/// per-index count of edits still in flight.
#[derive(Debug)]
pub struct PendingEdits {
    queue: ArrayQueue<PendingEdit>,
    in_flight: Box<[AtomicU32]>,
    dropped: AtomicUsize,
}

impl PendingEdits {
    pub fn new(capacity: usize, parameter_count: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            in_flight: (0..parameter_count).map(|_| AtomicU32::new(0)).collect(),
            dropped: AtomicUsize::new(0),
        }
    }

    /// Returns false if the index is unknown or the queue is full.
    pub fn push(&self, edit: PendingEdit) -> bool {
        let Some(counter) = self.in_flight.get(edit.index) else {
            return false;
        };
        counter.fetch_add(1, Ordering::AcqRel);
        if self.queue.push(edit).is_err() {
            counter.fetch_sub(1, Ordering::AcqRel);
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        true
    }

    pub fn is_dirty(&self, index: usize) -> bool {
        self.in_flight
            .get(index)
            .is_some_and(|c| c.load(Ordering::Acquire) > 0)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Moves every edit that lands inside a cycle of `num_samples` into
    /// `changes`. Later edits are requeued with their offset moved one cycle
    /// closer. `delivered` sees each edit exactly once.
    pub fn drain_into(
        &self,
        num_samples: usize,
        changes: &mut ParameterChanges,
        id_of: impl Fn(usize) -> Option<ParamId>,
        mut delivered: impl FnMut(&PendingEdit),
    ) {
        let n = num_samples as u32;
        for _ in 0..self.queue.len() {
            let Some(mut edit) = self.queue.pop() else {
                break;
            };
            if edit.sample_offset >= n {
                edit.sample_offset -= n;
                self.requeue(edit);
                continue;
            }
            let Some(id) = id_of(edit.index) else {
                self.settle(edit.index);
                continue;
            };
            if changes.add_point(id, edit.sample_offset as i32, edit.value) {
                self.settle(edit.index);
                delivered(&edit);
            } else {
                edit.sample_offset = 0;
                self.requeue(edit);
            }
        }
    }

    fn requeue(&self, edit: PendingEdit) {
        if let Err(edit) = self.queue.push(edit) {
            self.settle(edit.index);
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn settle(&self, index: usize) {
        if let Some(counter) = self.in_flight.get(index) {
            counter.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

/// Time-ordered value points for one parameter within a cycle.
#[derive(Debug, Clone)]
pub struct ParamValueQueue {
    id: ParamId,
    points: Vec<(i32, f64)>,
}

impl ParamValueQueue {
    fn with_capacity(points: usize) -> Self {
        Self {
            id: 0,
            points: Vec::with_capacity(points),
        }
    }

    pub fn id(&self) -> ParamId {
        self.id
    }

    pub fn point_count(&self) -> usize {
        self.points.len()
    }

    pub fn point(&self, index: usize) -> Option<(i32, f64)> {
        self.points.get(index).copied()
    }

    pub fn last_value(&self) -> Option<f64> {
        self.points.last().map(|&(_, value)| value)
    }

    fn insert(&mut self, offset: i32, value: f64) -> bool {
        let pos = self.points.partition_point(|&(o, _)| o <= offset);
        if pos > 0 && self.points[pos - 1].0 == offset {
            self.points[pos - 1].1 = value;
            return true;
        }
        if self.points.len() == self.points.capacity() {
            return false;
        }
        self.points.insert(pos, (offset, value));
        true
    }
}

/// Preallocated set of per-parameter queues. Nothing here allocates once
/// constructed.
#[derive(Debug, Clone)]
pub struct ParameterChanges {
    queues: Vec<ParamValueQueue>,
    used: usize,
}

impl ParameterChanges {
    pub fn with_capacity(parameters: usize, points_per_parameter: usize) -> Self {
        Self {
            queues: (0..parameters)
                .map(|_| ParamValueQueue::with_capacity(points_per_parameter.max(1)))
                .collect(),
            used: 0,
        }
    }

    pub fn clear(&mut self) {
        for queue in &mut self.queues[..self.used] {
            queue.points.clear();
        }
        self.used = 0;
    }

    /// Points at the same offset replace each other. Returns false once the
    /// queue or point storage is exhausted.
    pub fn add_point(&mut self, id: ParamId, offset: i32, value: f64) -> bool {
        match self.claim(id) {
            Some(queue) => self.add_point_to(queue, offset, value),
            None => false,
        }
    }

    /// Index of the queue for `id`, taking a fresh one if needed.
    pub fn claim(&mut self, id: ParamId) -> Option<usize> {
        if let Some(pos) = self.queues[..self.used].iter().position(|q| q.id == id) {
            return Some(pos);
        }
        let queue = self.queues.get_mut(self.used)?;
        queue.id = id;
        queue.points.clear();
        self.used += 1;
        Some(self.used - 1)
    }

    pub fn add_point_to(&mut self, queue: usize, offset: i32, value: f64) -> bool {
        match self.queues[..self.used].get_mut(queue) {
            Some(queue) => queue.insert(offset, value.clamp(0.0, 1.0)),
            None => false,
        }
    }

    pub fn capacity(&self) -> usize {
        self.queues.len()
    }

    pub fn queue_count(&self) -> usize {
        self.used
    }

    pub fn queue(&self, index: usize) -> Option<&ParamValueQueue> {
        self.queues[..self.used].get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ParamValueQueue> {
        self.queues[..self.used].iter()
    }
}
