//! Frame sequencing against a recording backend: no device required.

use std::collections::{HashSet, VecDeque};

use ash::vk;
use glam::{Mat4, Vec3};

use penumbra_core::config::{FRAMES_IN_FLIGHT, MAX_MATERIALS};
use penumbra_renderer::{
    AcquireOutcome, CapacityCounter, FrameBackend, FrameContext, FrameOrchestrator, FrameStatus,
    PassId, PresentOutcome, RenderError, RenderResult, SemaphoreRef, SubmissionBatch,
    SurfaceRebuild, surface_signature, verify_signature,
};
use penumbra_scene::{LightList, MeshHandle, PointLight, SceneUniforms};

#[derive(Clone, Debug, PartialEq)]
enum Call {
    Wait(usize),
    Acquire(usize),
    Reset(usize),
    Uniforms { slot: usize, lights: usize },
    Record { slot: usize, pass: PassId, draws: usize },
    Submit { slot: usize, batch: SubmissionBatch },
    Present { slot: usize, image: u32, wait: SemaphoreRef },
    Rebuild(Option<(u32, u32)>),
}

/// Records every call; acquire and present outcomes are scripted.
#[derive(Default)]
struct MockBackend {
    calls: Vec<Call>,
    acquires: VecDeque<AcquireOutcome>,
    presents: VecDeque<PresentOutcome>,
    meshes: u32,
    next_image: u32,
    /// A slot whose fenced submission has not been waited on yet.
    in_flight: [bool; FRAMES_IN_FLIGHT],
    /// Fenced submissions per slot.
    generations: [u64; FRAMES_IN_FLIGHT],
    /// The surface reports a 0x0 extent, as a minimized window does.
    zero_surface: bool,
    /// Submission of this pass fails.
    failing_pass: Option<PassId>,
}

impl MockBackend {
    fn with_meshes(meshes: u32) -> Self {
        Self {
            meshes,
            ..Self::default()
        }
    }

    fn submitted(&self) -> Vec<(usize, SubmissionBatch)> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                Call::Submit { slot, batch } => Some((*slot, batch.clone())),
                _ => None,
            })
            .collect()
    }

    fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.iter().filter(|c| pred(c)).count()
    }

    fn assert_slot_free(&self, slot: usize, what: &str) {
        assert!(
            !self.in_flight[slot],
            "{} on slot {} while generation {} may still be on the device",
            what,
            slot,
            self.generations[slot]
        );
    }
}

impl FrameBackend for MockBackend {
    fn wait_for_slot(&mut self, slot: usize) -> RenderResult<()> {
        self.calls.push(Call::Wait(slot));
        self.in_flight[slot] = false;
        Ok(())
    }

    fn acquire_image(&mut self, slot: usize) -> RenderResult<AcquireOutcome> {
        self.calls.push(Call::Acquire(slot));
        Ok(self.acquires.pop_front().unwrap_or_else(|| {
            let image = self.next_image;
            self.next_image = (self.next_image + 1) % 3;
            AcquireOutcome::Acquired(image)
        }))
    }

    fn reset_slot(&mut self, slot: usize) -> RenderResult<()> {
        self.assert_slot_free(slot, "reset");
        self.calls.push(Call::Reset(slot));
        Ok(())
    }

    fn write_frame_uniforms(
        &mut self,
        slot: usize,
        _scene: &SceneUniforms,
        lights: &LightList,
    ) -> RenderResult<()> {
        self.assert_slot_free(slot, "uniform write");
        self.calls.push(Call::Uniforms {
            slot,
            lights: lights.len(),
        });
        Ok(())
    }

    fn record_pass(&mut self, frame: &FrameContext<'_>, pass: PassId) -> RenderResult<()> {
        self.assert_slot_free(frame.slot, "record");
        self.calls.push(Call::Record {
            slot: frame.slot,
            pass,
            draws: frame.draws.len(),
        });
        Ok(())
    }

    fn submit_batch(&mut self, slot: usize, batch: &SubmissionBatch) -> RenderResult<()> {
        self.assert_slot_free(slot, "submit");
        if self
            .failing_pass
            .is_some_and(|pass| batch.passes().any(|p| p == pass))
        {
            return Err(RenderError::Surface("device lost".to_string()));
        }
        self.calls.push(Call::Submit {
            slot,
            batch: batch.clone(),
        });
        if batch.signals_fence() {
            self.in_flight[slot] = true;
            self.generations[slot] += 1;
        }
        Ok(())
    }

    fn present(
        &mut self,
        slot: usize,
        image_index: u32,
        wait: SemaphoreRef,
    ) -> RenderResult<PresentOutcome> {
        self.calls.push(Call::Present {
            slot,
            image: image_index,
            wait,
        });
        Ok(self.presents.pop_front().unwrap_or(PresentOutcome::Presented))
    }

    fn rebuild_surface(&mut self, extent: Option<(u32, u32)>) -> RenderResult<SurfaceRebuild> {
        self.calls.push(Call::Rebuild(extent));
        if self.zero_surface {
            Ok(SurfaceRebuild::ZeroSized)
        } else {
            Ok(SurfaceRebuild::Rebuilt)
        }
    }

    fn contains_mesh(&self, mesh: MeshHandle) -> bool {
        (mesh.index() as u32) < self.meshes
    }
}

fn lights(count: usize) -> LightList {
    let mut list = LightList::new();
    for i in 0..count {
        list.push(PointLight::new(
            Vec3::new(i as f32, 2.0, 0.0),
            Vec3::new(10.0, 8.0, 6.0),
        ))
        .unwrap();
    }
    list
}

fn run_frame(frames: &mut FrameOrchestrator<MockBackend>, lights: &LightList) {
    assert_eq!(frames.begin_frame().unwrap(), FrameStatus::Ready);
    frames.draw_model(MeshHandle::new(0), Mat4::IDENTITY).unwrap();
    frames.end_frame(&SceneUniforms::default(), lights).unwrap();
}

#[test]
fn test_slot_fences_waited_round_robin() {
    let mut frames = FrameOrchestrator::new(MockBackend::with_meshes(1));
    let none = lights(0);
    for _ in 0..5 {
        run_frame(&mut frames, &none);
    }
    let waits: Vec<usize> = frames
        .backend()
        .calls
        .iter()
        .filter_map(|c| match c {
            Call::Wait(slot) => Some(*slot),
            _ => None,
        })
        .collect();
    let expected: Vec<usize> = (0..5).map(|i| i % FRAMES_IN_FLIGHT).collect();
    assert_eq!(waits, expected);
}

#[test]
fn test_slot_reused_only_after_its_fence() {
    // The mock panics if a busy slot is touched before its wait.
    let mut frames = FrameOrchestrator::new(MockBackend::with_meshes(1));
    for count in [0, 3, 1, 32, 2, 0] {
        run_frame(&mut frames, &lights(count));
    }
    assert_eq!(frames.backend().generations, [3, 3]);
}

#[test]
fn test_simulated_semaphore_trace_respects_predecessors() {
    let mut frames = FrameOrchestrator::new(MockBackend::with_meshes(1));
    for count in [2, 0, 5, 1] {
        run_frame(&mut frames, &lights(count));
    }

    // Replay: a submission runs once every semaphore it waits on was
    // signaled earlier in the same slot's frame.
    let mut signaled: HashSet<(usize, SemaphoreRef)> = HashSet::new();
    let mut executed = 0;
    for call in &frames.backend().calls {
        match call {
            Call::Acquire(slot) => {
                signaled.retain(|(s, _)| s != slot);
                signaled.insert((*slot, SemaphoreRef::ImageAcquired));
            }
            Call::Submit { slot, batch } => {
                for submission in &batch.submissions {
                    for (wait, _) in &submission.waits {
                        assert!(
                            signaled.contains(&(*slot, *wait)),
                            "{:?} ran before {:?} signaled",
                            submission.pass,
                            wait
                        );
                    }
                }
                for submission in &batch.submissions {
                    signaled.insert((*slot, submission.signal));
                    executed += 1;
                }
            }
            Call::Present { slot, wait, .. } => {
                assert!(signaled.contains(&(*slot, *wait)));
            }
            _ => {}
        }
    }
    assert_eq!(executed, (2 + 6) + 6 + (5 + 6) + (1 + 6));
}

#[test]
fn test_fence_reset_only_after_acquire() {
    let mut frames = FrameOrchestrator::new(MockBackend::with_meshes(1));
    run_frame(&mut frames, &lights(0));
    let calls = &frames.backend().calls;
    assert_eq!(calls[0], Call::Wait(0));
    assert_eq!(calls[1], Call::Acquire(0));
    assert_eq!(calls[2], Call::Reset(0));
}

#[test]
fn test_semaphore_chain_follows_pass_graph() {
    let active = 3;
    let mut frames = FrameOrchestrator::new(MockBackend::with_meshes(1));
    run_frame(&mut frames, &lights(active));

    let batches = frames.backend().submitted();
    assert_eq!(batches.len(), 5);

    // First batch: every independent pass, in one queue call.
    let first: Vec<PassId> = batches[0].1.passes().collect();
    let mut expected: Vec<PassId> = (0..active).map(PassId::PointShadow).collect();
    expected.extend([PassId::Geometry, PassId::DirectionalDepth]);
    assert_eq!(first, expected);

    for (_, batch) in &batches {
        for submission in &batch.submissions {
            assert_eq!(submission.signal, SemaphoreRef::PassComplete(submission.pass));
            let waits_image = submission
                .waits
                .iter()
                .any(|(s, _)| *s == SemaphoreRef::ImageAcquired);
            assert_eq!(waits_image, submission.pass == PassId::Geometry);

            let pass_waits: Vec<PassId> = submission
                .waits
                .iter()
                .filter_map(|(s, _)| match s {
                    SemaphoreRef::PassComplete(p) => Some(*p),
                    SemaphoreRef::ImageAcquired => None,
                })
                .collect();
            assert_eq!(pass_waits, submission.pass.predecessors(active));
        }
    }

    let chain: Vec<PassId> = batches[1..]
        .iter()
        .map(|(_, b)| {
            assert_eq!(b.submissions.len(), 1);
            b.submissions[0].pass
        })
        .collect();
    assert_eq!(
        chain,
        [
            PassId::Composition,
            PassId::BloomHorizontal,
            PassId::BloomVertical,
            PassId::PostProcess
        ]
    );

    let fenced: Vec<PassId> = batches
        .iter()
        .flat_map(|(_, b)| b.submissions.iter())
        .filter(|s| s.signals_fence)
        .map(|s| s.pass)
        .collect();
    assert_eq!(fenced, [PassId::PostProcess]);

    let present = frames
        .backend()
        .calls
        .iter()
        .find_map(|c| match c {
            Call::Present { wait, .. } => Some(*wait),
            _ => None,
        })
        .unwrap();
    assert_eq!(present, SemaphoreRef::PassComplete(PassId::PostProcess));
}

#[test]
fn test_composition_waits_on_fragment_reads() {
    let mut frames = FrameOrchestrator::new(MockBackend::with_meshes(1));
    run_frame(&mut frames, &lights(1));
    let batches = frames.backend().submitted();
    let composition = &batches[1].1.submissions[0];
    assert!(
        composition
            .waits
            .iter()
            .all(|(_, stage)| *stage == vk::PipelineStageFlags::FRAGMENT_SHADER)
    );
}

#[test]
fn test_passes_recorded_before_their_batch_is_submitted() {
    let mut frames = FrameOrchestrator::new(MockBackend::with_meshes(1));
    run_frame(&mut frames, &lights(2));

    let mut recorded: Vec<PassId> = Vec::new();
    let mut uniforms_written = false;
    for call in &frames.backend().calls {
        match call {
            Call::Uniforms { lights, .. } => {
                assert_eq!(*lights, 2);
                uniforms_written = true;
            }
            Call::Record { pass, draws, .. } => {
                assert!(uniforms_written, "{:?} recorded before uniforms", pass);
                assert_eq!(*draws, 1);
                recorded.push(*pass);
            }
            Call::Submit { batch, .. } => {
                for pass in batch.passes() {
                    assert!(recorded.contains(&pass), "{:?} submitted unrecorded", pass);
                }
            }
            _ => {}
        }
    }
}

#[test]
fn test_draw_queue_cleared_at_begin() {
    let mut frames = FrameOrchestrator::new(MockBackend::with_meshes(2));
    frames.begin_frame().unwrap();
    frames.draw_model(MeshHandle::new(0), Mat4::IDENTITY).unwrap();
    frames.draw_model(MeshHandle::new(1), Mat4::IDENTITY).unwrap();
    assert_eq!(frames.queued_draws().len(), 2);
    frames.end_frame(&SceneUniforms::default(), &lights(0)).unwrap();

    frames.begin_frame().unwrap();
    assert!(frames.queued_draws().is_empty());
}

#[test]
fn test_end_without_begin_submits_nothing() {
    let mut frames = FrameOrchestrator::new(MockBackend::with_meshes(1));
    let result = frames.end_frame(&SceneUniforms::default(), &lights(0));
    assert!(matches!(
        result,
        Err(RenderError::OutOfSequence {
            called: "end_frame",
            ..
        })
    ));
    assert!(frames.backend().calls.is_empty());
}

#[test]
fn test_double_begin_rejected() {
    let mut frames = FrameOrchestrator::new(MockBackend::with_meshes(1));
    frames.begin_frame().unwrap();
    assert!(matches!(
        frames.begin_frame(),
        Err(RenderError::OutOfSequence {
            called: "begin_frame",
            state: "recording"
        })
    ));
}

#[test]
fn test_stale_acquire_skips_and_rebuilds() {
    let mut backend = MockBackend::with_meshes(1);
    backend.acquires.push_back(AcquireOutcome::Stale);
    let mut frames = FrameOrchestrator::new(backend);

    assert_eq!(frames.begin_frame().unwrap(), FrameStatus::Skipped);
    assert_eq!(frames.rebuilds(), 1);
    // The fence is untouched, so the next wait cannot deadlock.
    assert_eq!(frames.backend().count(|c| matches!(c, Call::Reset(_))), 0);
    assert_eq!(frames.slot(), 0);

    run_frame(&mut frames, &lights(0));
    assert_eq!(frames.frames_submitted(), 1);
}

#[test]
fn test_suboptimal_acquire_still_renders() {
    let mut backend = MockBackend::with_meshes(1);
    backend.acquires.push_back(AcquireOutcome::Suboptimal(1));
    let mut frames = FrameOrchestrator::new(backend);

    run_frame(&mut frames, &lights(0));
    assert!(frames.rebuild_pending());
    assert_eq!(frames.rebuilds(), 0);
    assert!(frames.backend().calls.contains(&Call::Present {
        slot: 0,
        image: 1,
        wait: SemaphoreRef::PassComplete(PassId::PostProcess),
    }));
}

#[test]
fn test_suboptimal_present_defers_rebuild_to_next_begin() {
    let mut backend = MockBackend::with_meshes(1);
    backend.presents.push_back(PresentOutcome::Suboptimal);
    let mut frames = FrameOrchestrator::new(backend);

    run_frame(&mut frames, &lights(0));
    assert!(frames.rebuild_pending());
    assert_eq!(frames.rebuilds(), 0);

    frames.backend_mut().calls.clear();
    frames.begin_frame().unwrap();
    let calls = &frames.backend().calls;
    assert_eq!(calls[0], Call::Wait(1));
    assert_eq!(calls[1], Call::Rebuild(None));
    assert_eq!(calls[2], Call::Acquire(1));
    assert!(!frames.rebuild_pending());
}

#[test]
fn test_stale_present_rebuilds_immediately() {
    let mut backend = MockBackend::with_meshes(1);
    backend.presents.push_back(PresentOutcome::Stale);
    let mut frames = FrameOrchestrator::new(backend);

    run_frame(&mut frames, &lights(0));
    assert_eq!(frames.rebuilds(), 1);
    assert!(matches!(frames.backend().calls.last(), Some(Call::Rebuild(None))));
    assert_eq!(frames.slot(), 1);
}

#[test]
fn test_resize_passes_requested_extent() {
    let mut frames = FrameOrchestrator::new(MockBackend::with_meshes(1));
    frames.request_resize(1024, 768);
    frames.request_resize(1280, 800);
    frames.begin_frame().unwrap();
    assert_eq!(
        frames
            .backend()
            .count(|c| matches!(c, Call::Rebuild(Some((1280, 800))))),
        1
    );
    assert_eq!(frames.backend().count(|c| matches!(c, Call::Rebuild(_))), 1);
}

#[test]
fn test_resize_to_same_extent_rebuilds_each_time() {
    let mut frames = FrameOrchestrator::new(MockBackend::with_meshes(1));
    frames.request_resize(640, 480);
    run_frame(&mut frames, &lights(0));
    frames.request_resize(640, 480);
    run_frame(&mut frames, &lights(0));
    assert_eq!(frames.rebuilds(), 2);
    assert_eq!(
        frames
            .backend()
            .count(|c| matches!(c, Call::Rebuild(Some((640, 480))))),
        2
    );
}

#[test]
fn test_arena_layout_check_rejects_drift() {
    let format = vk::Format::B8G8R8A8_SRGB;
    verify_signature(&surface_signature(format), format).unwrap();

    // G-buffer normals rebuilt at a different precision.
    let mut built = surface_signature(format);
    built[0].2[1] = vk::Format::R8G8B8A8_UNORM;
    assert!(matches!(
        verify_signature(&built, format),
        Err(RenderError::Surface(ref m)) if m.contains("gbuffer")
    ));
}

#[test]
fn test_stale_acquire_on_zero_surface_skips_without_rebuilding() {
    // The resize event has not arrived yet; only the surface knows.
    let mut backend = MockBackend::with_meshes(1);
    backend.acquires.push_back(AcquireOutcome::Stale);
    backend.zero_surface = true;
    let mut frames = FrameOrchestrator::new(backend);

    assert_eq!(frames.begin_frame().unwrap(), FrameStatus::Skipped);
    assert_eq!(frames.rebuilds(), 0);
    assert!(frames.rebuild_pending());
    assert_eq!(frames.backend().count(|c| matches!(c, Call::Reset(_))), 0);

    // Still zero: skipped again, before any acquire.
    frames.backend_mut().calls.clear();
    assert_eq!(frames.begin_frame().unwrap(), FrameStatus::Skipped);
    assert_eq!(frames.backend().count(|c| matches!(c, Call::Acquire(_))), 0);

    frames.backend_mut().zero_surface = false;
    run_frame(&mut frames, &lights(0));
    assert_eq!(frames.rebuilds(), 1);
    assert!(!frames.rebuild_pending());
}

#[test]
fn test_stale_present_while_minimized_defers_rebuild() {
    let mut backend = MockBackend::with_meshes(1);
    backend.presents.push_back(PresentOutcome::Stale);
    let mut frames = FrameOrchestrator::new(backend);

    assert_eq!(frames.begin_frame().unwrap(), FrameStatus::Ready);
    frames.request_resize(0, 0);
    frames.end_frame(&SceneUniforms::default(), &lights(0)).unwrap();
    assert_eq!(frames.backend().count(|c| matches!(c, Call::Rebuild(_))), 0);
    assert!(frames.rebuild_pending());
    assert_eq!(frames.begin_frame().unwrap(), FrameStatus::Skipped);

    frames.request_resize(800, 600);
    run_frame(&mut frames, &lights(0));
    assert_eq!(
        frames.backend().count(|c| matches!(c, Call::Rebuild(_))),
        1
    );
    assert!(frames.backend().calls.contains(&Call::Rebuild(Some((800, 600)))));
}

#[test]
fn test_zero_surface_keeps_requested_extent_pending() {
    let mut backend = MockBackend::with_meshes(1);
    backend.zero_surface = true;
    let mut frames = FrameOrchestrator::new(backend);

    frames.request_resize(640, 480);
    assert_eq!(frames.begin_frame().unwrap(), FrameStatus::Skipped);
    frames.backend_mut().zero_surface = false;
    run_frame(&mut frames, &lights(0));
    assert_eq!(
        frames
            .backend()
            .count(|c| matches!(c, Call::Rebuild(Some((640, 480))))),
        2
    );
}

#[test]
fn test_failed_end_frame_abandons_slot() {
    let mut backend = MockBackend::with_meshes(1);
    backend.failing_pass = Some(PassId::Composition);
    let mut frames = FrameOrchestrator::new(backend);

    frames.begin_frame().unwrap();
    assert!(frames.end_frame(&SceneUniforms::default(), &lights(1)).is_err());
    // Post never ran, so slot 0's fence can never signal.
    assert_eq!(frames.backend().count(|c| matches!(c, Call::Present { .. })), 0);

    frames.backend_mut().calls.clear();
    assert!(matches!(
        frames.begin_frame(),
        Err(RenderError::SlotAbandoned { slot: 0 })
    ));
    assert!(frames.backend().calls.is_empty());
}

#[test]
fn test_minimized_window_skips_until_restored() {
    let mut frames = FrameOrchestrator::new(MockBackend::with_meshes(1));
    frames.request_resize(0, 0);
    for _ in 0..3 {
        assert_eq!(frames.begin_frame().unwrap(), FrameStatus::Skipped);
    }
    assert!(frames.backend().calls.is_empty());

    frames.request_resize(800, 600);
    run_frame(&mut frames, &lights(0));
    assert_eq!(frames.backend().calls[1], Call::Rebuild(Some((800, 600))));
}

#[test]
fn test_unknown_mesh_is_not_queued() {
    let mut frames = FrameOrchestrator::new(MockBackend::with_meshes(1));
    frames.begin_frame().unwrap();
    assert!(matches!(
        frames.draw_model(MeshHandle::new(1), Mat4::IDENTITY),
        Err(RenderError::UnknownMesh(_))
    ));
    frames.end_frame(&SceneUniforms::default(), &lights(0)).unwrap();
    assert!(
        frames
            .backend()
            .calls
            .iter()
            .all(|c| !matches!(c, Call::Record { draws, .. } if *draws != 0))
    );
}

// Descriptor pools run the same counter before any Vulkan allocation.
#[test]
fn test_material_capacity_rejects_one_past_max() {
    let mut counter = CapacityCounter::new("materials", MAX_MATERIALS);
    for _ in 0..MAX_MATERIALS {
        counter.reserve(1).unwrap();
    }
    assert_eq!(counter.remaining(), 0);
    assert!(matches!(
        counter.reserve(1),
        Err(RenderError::CapacityExceeded {
            resource: "materials",
            max: 128
        })
    ));
    assert_eq!(counter.used(), MAX_MATERIALS);
}
