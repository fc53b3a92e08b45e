//! # Batch Queue
//!
//! Collects every batch of one render pass, orders them and submits them.
//!
//! ## Frame phases
//!
//! 1. **Collect**: [`BatchQueue::add_batch`] either keeps a batch loose or
//!    merges it into the group sharing its light, pass, material and geometry.
//! 2. **Sort**: [`BatchQueue::sort`] rebuilds the draw order from scratch,
//!    front-to-back for opaque passes and back-to-front for blended ones.
//! 3. **Allocate**: [`BatchQueue::num_instances`] sizes the shared instancing
//!    buffer, then [`BatchQueue::set_transforms`] writes group transforms.
//! 4. **Draw**: [`BatchQueue::draw`] submits priority batches and groups
//!    first, then the rest.
//!
//! Batches are never modified after insertion apart from the sort key computed
//! on the way in. Priority and regular groups live in separate maps so a
//! priority batch can never end up behind a regular one.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::config::InstancingConfig;
use crate::render::batch::Batch;
use crate::render::context::DrawContext;
use crate::render::device::BlendMode;
use crate::render::group::{BatchGroup, BatchGroupKey};
use crate::render::instancing::InstanceAllocator;
use crate::render::registry::{Geometry, ResourceRegistry, TransformStore};

/// Draw order policy of a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortOrder {
    /// State-sorted, nearest first; for opaque passes and early depth rejection
    FrontToBack,
    /// Farthest first; for blended passes
    BackToFront,
}

impl SortOrder {
    /// Order required by a pass with the given blend mode
    pub const fn from_blend_mode(mode: BlendMode) -> Self {
        if mode.is_blending() {
            Self::BackToFront
        } else {
            Self::FrontToBack
        }
    }
}

/// Where a queue is within its frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueuePhase {
    /// Accepting batches
    Collect,
    /// Draw order built
    Sorted,
    /// Group transforms written to the instancing buffer
    InstancesAllocated,
}

/// Front-to-back: descending sort key, then nearest first
fn compare_front_to_back(lhs: &Batch, rhs: &Batch) -> Ordering {
    rhs.sort_key()
        .cmp(&lhs.sort_key())
        .then_with(|| lhs.distance.total_cmp(&rhs.distance))
}

/// Back-to-front: farthest first, then descending sort key
fn compare_back_to_front(lhs: &Batch, rhs: &Batch) -> Ordering {
    rhs.distance
        .total_cmp(&lhs.distance)
        .then_with(|| rhs.sort_key().cmp(&lhs.sort_key()))
}

/// Batches and groups of one render pass
#[derive(Debug)]
pub struct BatchQueue {
    config: InstancingConfig,
    batches: Vec<Batch>,
    groups: Vec<BatchGroup>,
    priority_group_index: BTreeMap<BatchGroupKey, usize>,
    group_index: BTreeMap<BatchGroupKey, usize>,
    sorted_priority_batches: Vec<usize>,
    sorted_batches: Vec<usize>,
    sorted_priority_groups: Vec<usize>,
    sorted_groups: Vec<usize>,
    phase: QueuePhase,
}

impl BatchQueue {
    /// Create an empty queue using `config` to decide instancing
    pub fn new(config: InstancingConfig) -> Self {
        Self {
            config,
            batches: Vec::new(),
            groups: Vec::new(),
            priority_group_index: BTreeMap::new(),
            group_index: BTreeMap::new(),
            sorted_priority_batches: Vec::new(),
            sorted_batches: Vec::new(),
            sorted_priority_groups: Vec::new(),
            sorted_groups: Vec::new(),
            phase: QueuePhase::Collect,
        }
    }

    /// Instancing policy of the queue
    pub const fn config(&self) -> &InstancingConfig {
        &self.config
    }

    /// Current phase
    pub const fn phase(&self) -> QueuePhase {
        self.phase
    }

    /// Drop every batch and group and return to the collect phase
    pub fn clear(&mut self) {
        self.batches.clear();
        self.groups.clear();
        self.priority_group_index.clear();
        self.group_index.clear();
        self.sorted_priority_batches.clear();
        self.sorted_batches.clear();
        self.sorted_priority_groups.clear();
        self.sorted_groups.clear();
        self.phase = QueuePhase::Collect;
    }

    /// Add a batch
    ///
    /// The batch stays loose if it cannot be instanced, if `no_instancing` is
    /// set, or if its geometry has more indices than instancing allows.
    /// Otherwise it joins the priority or regular group with its state key;
    /// the first batch of a key creates the group.
    pub fn add_batch(
        &mut self,
        mut batch: Batch,
        resources: &ResourceRegistry,
        no_instancing: bool,
    ) {
        if self.phase != QueuePhase::Collect {
            log::warn!("Batch added to a queue in {:?} phase; draw order discarded", self.phase);
            self.discard_order();
        }

        batch.calculate_sort_key();

        let index_count = resources.geometry(batch.geometry).map(Geometry::index_count);
        let groupable = !no_instancing
            && batch.is_instancing_eligible()
            && index_count.is_some_and(|count| count <= self.config.max_instance_index_count());
        let Some(index_count) = index_count.filter(|_| groupable) else {
            self.batches.push(batch);
            return;
        };

        let key = BatchGroupKey::from(&batch);
        let index = if batch.has_priority {
            &mut self.priority_group_index
        } else {
            &mut self.group_index
        };
        match index.get(&key) {
            Some(&i) => self.groups[i].push(batch.transform, batch.distance),
            None => {
                index.insert(key, self.groups.len());
                self.groups.push(BatchGroup::new(&batch, index_count));
            }
        }
    }

    /// Build the draw order for `order`
    pub fn sort(&mut self, order: SortOrder) {
        match order {
            SortOrder::FrontToBack => self.sort_front_to_back(),
            SortOrder::BackToFront => self.sort_back_to_front(),
        }
    }

    /// Order loose batches farthest first and list groups without reordering
    ///
    /// Instances inside a group keep their insertion order; merged instances
    /// are assumed not to overlap each other on screen.
    pub fn sort_back_to_front(&mut self) {
        self.begin_sort();
        self.partition_loose_batches();

        let batches = &self.batches;
        self.sorted_priority_batches
            .sort_by(|&a, &b| compare_back_to_front(&batches[a], &batches[b]));
        self.sorted_batches
            .sort_by(|&a, &b| compare_back_to_front(&batches[a], &batches[b]));

        self.list_groups();
    }

    /// Order loose batches by state then distance, and groups nearest first
    ///
    /// Every group's instances are sorted nearest first, then groups are
    /// ordered by the distance of their nearest instance.
    pub fn sort_front_to_back(&mut self) {
        self.begin_sort();
        self.partition_loose_batches();

        let batches = &self.batches;
        self.sorted_priority_batches
            .sort_by(|&a, &b| compare_front_to_back(&batches[a], &batches[b]));
        self.sorted_batches
            .sort_by(|&a, &b| compare_front_to_back(&batches[a], &batches[b]));

        for group in &mut self.groups {
            group.sort_front_to_back();
        }

        self.list_groups();
        let groups = &self.groups;
        let nearest_first = |&a: &usize, &b: &usize| {
            groups[a].first_distance().total_cmp(&groups[b].first_distance())
        };
        self.sorted_priority_groups.sort_by(nearest_first);
        self.sorted_groups.sort_by(nearest_first);
    }

    fn begin_sort(&mut self) {
        if self.phase == QueuePhase::InstancesAllocated {
            log::warn!(
                "Queue re-sorted after instance allocation; \
                 group transforms will be re-uploaded at draw time"
            );
            for group in &mut self.groups {
                group.start_index = None;
            }
        }
        self.phase = QueuePhase::Sorted;
    }

    fn partition_loose_batches(&mut self) {
        self.sorted_priority_batches.clear();
        self.sorted_batches.clear();
        for (i, batch) in self.batches.iter().enumerate() {
            if batch.has_priority {
                self.sorted_priority_batches.push(i);
            } else {
                self.sorted_batches.push(i);
            }
        }
    }

    fn list_groups(&mut self) {
        self.sorted_priority_groups.clear();
        self.sorted_priority_groups.extend(self.priority_group_index.values().copied());
        self.sorted_groups.clear();
        self.sorted_groups.extend(self.group_index.values().copied());
    }

    fn discard_order(&mut self) {
        self.sorted_priority_batches.clear();
        self.sorted_batches.clear();
        self.sorted_priority_groups.clear();
        self.sorted_groups.clear();
        for group in &mut self.groups {
            group.start_index = None;
        }
        self.phase = QueuePhase::Collect;
    }

    /// Instances that [`set_transforms`](Self::set_transforms) will write
    ///
    /// Counts only groups that will be drawn instanced. The caller sums this
    /// over every queue sharing the instancing buffer before locking it.
    pub fn num_instances(&self) -> usize {
        self.group_indices_in_map_order()
            .map(|i| &self.groups[i])
            .filter(|group| group.is_instanced(&self.config))
            .map(BatchGroup::len)
            .sum()
    }

    /// Write the transforms of instanced groups at the allocator's cursor
    ///
    /// Priority groups go first, then regular groups, each in map order.
    pub fn set_transforms(
        &mut self,
        transforms: &TransformStore,
        allocator: &mut InstanceAllocator<'_>,
    ) {
        if self.phase == QueuePhase::Collect && !self.groups.is_empty() {
            log::warn!("Instance transforms written before the queue was sorted");
        }
        for &i in self.priority_group_index.values().chain(self.group_index.values()) {
            self.groups[i].assign_instance_slots(&self.config, transforms, allocator);
        }
        self.phase = QueuePhase::InstancesAllocated;
    }

    /// Submit priority batches, priority groups, batches, then groups
    pub fn draw(&self, ctx: &mut DrawContext<'_>) {
        if self.phase == QueuePhase::Collect && !self.is_empty() {
            log::warn!("Drawing an unsorted queue; nothing will be submitted");
        }

        let before = ctx.stats;
        for &i in &self.sorted_priority_batches {
            self.batches[i].draw(ctx);
        }
        for &i in &self.sorted_priority_groups {
            self.groups[i].draw(ctx, &self.config);
        }
        for &i in &self.sorted_batches {
            self.batches[i].draw(ctx);
        }
        for &i in &self.sorted_groups {
            self.groups[i].draw(ctx, &self.config);
        }

        log::debug!(
            "Queue drew {} batches and {} groups with {} draw calls ({} instanced)",
            self.batches.len(),
            self.groups.len(),
            ctx.stats.total_draw_calls() - before.total_draw_calls(),
            ctx.stats.instanced_draw_calls - before.instanced_draw_calls
        );
    }

    fn group_indices_in_map_order(&self) -> impl Iterator<Item = usize> + '_ {
        self.priority_group_index
            .values()
            .chain(self.group_index.values())
            .copied()
    }

    /// Number of collected batches, grouped or not
    pub fn len(&self) -> usize {
        self.batches.len() + self.groups.iter().map(BatchGroup::len).sum::<usize>()
    }

    /// Whether nothing was collected
    pub fn is_empty(&self) -> bool {
        self.batches.is_empty() && self.groups.is_empty()
    }

    /// Loose batches in insertion order
    pub fn loose_batches(&self) -> &[Batch] {
        &self.batches
    }

    /// Group with the given key and priority, if it exists
    pub fn group(&self, key: &BatchGroupKey, priority: bool) -> Option<&BatchGroup> {
        let index = if priority {
            &self.priority_group_index
        } else {
            &self.group_index
        };
        index.get(key).map(|&i| &self.groups[i])
    }

    /// Every group, priority groups first, in map order
    pub fn groups(&self) -> impl Iterator<Item = &BatchGroup> + '_ {
        self.group_indices_in_map_order().map(|i| &self.groups[i])
    }

    /// Sorted priority loose batches
    pub fn sorted_priority_batches(&self) -> impl Iterator<Item = &Batch> + '_ {
        self.sorted_priority_batches.iter().map(|&i| &self.batches[i])
    }

    /// Sorted regular loose batches
    pub fn sorted_batches(&self) -> impl Iterator<Item = &Batch> + '_ {
        self.sorted_batches.iter().map(|&i| &self.batches[i])
    }

    /// Sorted priority groups
    pub fn sorted_priority_groups(&self) -> impl Iterator<Item = &BatchGroup> + '_ {
        self.sorted_priority_groups.iter().map(|&i| &self.groups[i])
    }

    /// Sorted regular groups
    pub fn sorted_groups(&self) -> impl Iterator<Item = &BatchGroup> + '_ {
        self.sorted_groups.iter().map(|&i| &self.groups[i])
    }
}

impl Default for BatchQueue {
    fn default() -> Self {
        Self::new(InstancingConfig::default())
    }
}
