//! The fixed pass graph of one frame.
//!
//! Passes are chained purely through semaphores:
//!
//! ```text
//! image acquired ─► { point shadow 0..n, geometry, directional depth }
//!                         │
//!                         ▼
//!                    composition ─► bloom H ─► bloom V ─► post ─► present
//! ```
//!
//! The first group is one queue submission: its passes write disjoint
//! images and may overlap on the device. Every later pass is its own
//! submission waiting on the signal of the pass before it. Only the final
//! pass signals the frame slot's fence.
//!
//! Nothing here touches the GPU; the plan is data that the orchestrator
//! hands to a [`FrameBackend`](crate::orchestrator::FrameBackend).

use ash::vk;

/// One pass of the frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PassId {
    /// Cube depth pass of the point light at this index.
    PointShadow(usize),
    Geometry,
    DirectionalDepth,
    Composition,
    BloomHorizontal,
    BloomVertical,
    PostProcess,
}

impl PassId {
    /// Passes whose output this pass reads, given `active_lights` lights.
    pub fn predecessors(self, active_lights: usize) -> Vec<PassId> {
        match self {
            PassId::PointShadow(_) | PassId::Geometry | PassId::DirectionalDepth => Vec::new(),
            PassId::Composition => (0..active_lights)
                .map(PassId::PointShadow)
                .chain([PassId::Geometry, PassId::DirectionalDepth])
                .collect(),
            PassId::BloomHorizontal => vec![PassId::Composition],
            PassId::BloomVertical => vec![PassId::BloomHorizontal],
            PassId::PostProcess => vec![PassId::BloomVertical],
        }
    }

    /// Whether this pass must wait for the swapchain image.
    ///
    /// Only the geometry pass waits directly; every pass that touches the
    /// swapchain image is ordered after it through the chain.
    pub fn waits_for_image(self) -> bool {
        self == PassId::Geometry
    }

    pub fn name(self) -> &'static str {
        match self {
            PassId::PointShadow(_) => "point_shadow",
            PassId::Geometry => "geometry",
            PassId::DirectionalDepth => "directional_depth",
            PassId::Composition => "composition",
            PassId::BloomHorizontal => "bloom_horizontal",
            PassId::BloomVertical => "bloom_vertical",
            PassId::PostProcess => "post_process",
        }
    }
}

/// A semaphore of the current frame slot, by role.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SemaphoreRef {
    /// Signaled by image acquisition.
    ImageAcquired,
    /// Signaled when the pass's submission completes.
    PassComplete(PassId),
}

/// One `VkSubmitInfo` worth of work.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PassSubmission {
    pub pass: PassId,
    /// Semaphores to wait on and the stage each wait blocks.
    pub waits: Vec<(SemaphoreRef, vk::PipelineStageFlags)>,
    pub signal: SemaphoreRef,
    /// The submission carrying the frame slot's fence.
    pub signals_fence: bool,
}

/// Submissions handed to the queue in a single call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubmissionBatch {
    pub submissions: Vec<PassSubmission>,
}

impl SubmissionBatch {
    pub fn passes(&self) -> impl Iterator<Item = PassId> + '_ {
        self.submissions.iter().map(|s| s.pass)
    }

    pub fn signals_fence(&self) -> bool {
        self.submissions.iter().any(|s| s.signals_fence)
    }
}

/// Ordered submission batches for one frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FramePlan {
    batches: Vec<SubmissionBatch>,
    present_wait: SemaphoreRef,
}

impl FramePlan {
    /// Plans a frame with `active_lights` shadow-casting point lights.
    pub fn build(active_lights: usize) -> Self {
        let first: Vec<PassId> = (0..active_lights)
            .map(PassId::PointShadow)
            .chain([PassId::Geometry, PassId::DirectionalDepth])
            .collect();
        let chain = [
            PassId::Composition,
            PassId::BloomHorizontal,
            PassId::BloomVertical,
            PassId::PostProcess,
        ];

        let mut batches = vec![SubmissionBatch {
            submissions: first
                .into_iter()
                .map(|pass| submission(pass, active_lights))
                .collect(),
        }];
        batches.extend(chain.into_iter().map(|pass| SubmissionBatch {
            submissions: vec![submission(pass, active_lights)],
        }));

        if let Some(last) = batches
            .last_mut()
            .and_then(|batch| batch.submissions.last_mut())
        {
            last.signals_fence = true;
        }

        Self {
            batches,
            present_wait: SemaphoreRef::PassComplete(PassId::PostProcess),
        }
    }

    pub fn batches(&self) -> &[SubmissionBatch] {
        &self.batches
    }

    /// Every pass in submission order.
    pub fn passes(&self) -> impl Iterator<Item = PassId> + '_ {
        self.batches.iter().flat_map(SubmissionBatch::passes)
    }

    /// The semaphore presentation waits on.
    pub fn present_wait(&self) -> SemaphoreRef {
        self.present_wait
    }
}

fn submission(pass: PassId, active_lights: usize) -> PassSubmission {
    let mut waits: Vec<(SemaphoreRef, vk::PipelineStageFlags)> = Vec::new();
    if pass.waits_for_image() {
        waits.push((
            SemaphoreRef::ImageAcquired,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        ));
    }
    waits.extend(pass.predecessors(active_lights).into_iter().map(|p| {
        (
            SemaphoreRef::PassComplete(p),
            vk::PipelineStageFlags::FRAGMENT_SHADER,
        )
    }));

    PassSubmission {
        pass,
        waits,
        signal: SemaphoreRef::PassComplete(pass),
        signals_fence: false,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_first_batch_groups_independent_passes() {
        let plan = FramePlan::build(3);
        let first: Vec<PassId> = plan.batches()[0].passes().collect();
        assert_eq!(
            first,
            vec![
                PassId::PointShadow(0),
                PassId::PointShadow(1),
                PassId::PointShadow(2),
                PassId::Geometry,
                PassId::DirectionalDepth,
            ]
        );
        assert_eq!(plan.batches().len(), 5);
    }

    #[test]
    fn test_only_geometry_waits_for_image() {
        let plan = FramePlan::build(2);
        for batch in plan.batches() {
            for sub in &batch.submissions {
                let waits_image = sub
                    .waits
                    .iter()
                    .any(|(s, _)| *s == SemaphoreRef::ImageAcquired);
                assert_eq!(waits_image, sub.pass == PassId::Geometry, "{:?}", sub.pass);
            }
        }
    }

    #[test]
    fn test_composition_waits_for_whole_first_batch() {
        let plan = FramePlan::build(4);
        let composition = &plan.batches()[1].submissions[0];
        assert_eq!(composition.pass, PassId::Composition);
        let waited: HashSet<SemaphoreRef> = composition.waits.iter().map(|(s, _)| *s).collect();
        for pass in plan.batches()[0].passes() {
            assert!(waited.contains(&SemaphoreRef::PassComplete(pass)));
        }
    }

    #[test]
    fn test_only_final_pass_signals_fence() {
        for lights in [0, 1, 32] {
            let plan = FramePlan::build(lights);
            let fenced: Vec<PassId> = plan
                .batches()
                .iter()
                .flat_map(|b| &b.submissions)
                .filter(|s| s.signals_fence)
                .map(|s| s.pass)
                .collect();
            assert_eq!(fenced, vec![PassId::PostProcess]);
            assert_eq!(
                plan.present_wait(),
                SemaphoreRef::PassComplete(PassId::PostProcess)
            );
        }
    }

    #[test]
    fn test_plan_order_is_topological() {
        let plan = FramePlan::build(5);
        let mut done: HashSet<PassId> = HashSet::new();
        for pass in plan.passes() {
            for pred in pass.predecessors(5) {
                assert!(done.contains(&pred), "{:?} before {:?}", pass, pred);
            }
            done.insert(pass);
        }
        assert_eq!(done.len(), 5 + 6);
    }

    #[test]
    fn test_every_signal_is_consumed_once() {
        let plan = FramePlan::build(3);
        let mut waited: Vec<SemaphoreRef> = plan
            .batches()
            .iter()
            .flat_map(|b| &b.submissions)
            .flat_map(|s| s.waits.iter().map(|(sem, _)| *sem))
            .collect();
        waited.push(plan.present_wait());
        let unique: HashSet<SemaphoreRef> = waited.iter().copied().collect();
        assert_eq!(unique.len(), waited.len());

        for pass in plan.passes() {
            assert!(unique.contains(&SemaphoreRef::PassComplete(pass)), "{:?}", pass);
        }
    }
}
