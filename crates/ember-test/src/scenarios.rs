//! End-to-end frame loop scenarios against the mocks.

#[cfg(test)]
mod tests {
    use crate::mock::{BackendEvent, RecordedCommand, MOCK_INDEX_COUNT, OVERLAY_INDEX_COUNT};
    use crate::{Harness, MockBackend};
    use approx::assert_relative_eq;
    use ash::vk;
    use ember_app::{FrameBackend, FrameOutcome, FrameScheduler, SkipReason, SlotState};
    use ember_gpu::{AcquireResult, PresentResult};
    use ember_render::{CommandRecorder, FrameTarget};
    use std::time::Duration;

    const fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    fn standard() -> Harness {
        Harness::new(MockBackend::standard().unwrap()).unwrap()
    }

    fn presented(slot: usize, image_index: u32) -> FrameOutcome {
        FrameOutcome::Presented {
            slot,
            image_index,
            present: PresentResult::Presented,
        }
    }

    fn is_rebuild(event: &BackendEvent) -> bool {
        matches!(event, BackendEvent::Rebuild(_))
    }

    fn is_submit(event: &BackendEvent) -> bool {
        matches!(event, BackendEvent::Submit(_))
    }

    /// No slot is recorded while its previous submission may still run.
    fn assert_fence_discipline(events: &[BackendEvent], slots: usize) {
        let mut in_flight = vec![false; slots];
        for event in events {
            match *event {
                BackendEvent::Submit(slot) => in_flight[slot] = true,
                BackendEvent::WaitSlot {
                    slot,
                    status: ember_gpu::FenceStatus::Signaled,
                } => in_flight[slot] = false,
                BackendEvent::WaitIdle => in_flight.iter_mut().for_each(|f| *f = false),
                BackendEvent::Record { slot, .. } | BackendEvent::ResetSlot(slot) => {
                    assert!(!in_flight[slot], "slot {slot} reused while in flight: {events:?}");
                }
                _ => {}
            }
        }
    }

    #[test]
    fn ten_frames_alternate_two_slots() {
        let mut h = standard();
        let outcomes = h.frames(10).unwrap();

        let expected: Vec<_> = (0..10)
            .map(|i| presented(i % 2, u32::try_from(i % 3).unwrap()))
            .collect();
        assert_eq!(outcomes, expected);

        assert_eq!(h.backend.count(is_submit), 10);
        assert_eq!(
            h.backend.count(|e| matches!(e, BackendEvent::Present { .. })),
            10
        );
        assert_eq!(h.scene.prepared(), &[0, 1, 0, 1, 0, 1, 0, 1, 0, 1]);
        assert_eq!(h.overlay.tuned, 10);
        assert_eq!(h.overlay.recorded, 10);
        assert_eq!(h.scheduler.stats().frames_presented, 10);
        assert!(h.backend.violations().is_empty(), "{:?}", h.backend.violations());

        h.shutdown().unwrap();
        assert_eq!(h.backend.double_frees(), 0);
        assert!(h.backend.violations().is_empty(), "{:?}", h.backend.violations());
    }

    #[test]
    fn second_teardown_is_a_double_free() {
        let mut h = standard();
        h.frames(4).unwrap();
        h.shutdown().unwrap();
        assert_eq!(h.backend.double_frees(), 0);

        h.backend.destroy();
        // the swapchain plus both slots
        assert_eq!(h.backend.double_frees(), 3);
        assert!(h
            .backend
            .violations()
            .iter()
            .any(|v| v.contains("freed twice")));
    }

    #[test]
    fn rebuilt_swapchain_is_freed_once() {
        let mut h = standard();
        h.frame().unwrap();
        h.window.resize(640, 480);
        h.frames(2).unwrap();
        h.shutdown().unwrap();
        assert_eq!(h.scheduler.stats().swapchain_rebuilds, 1);
        assert_eq!(h.backend.double_frees(), 0);
    }

    #[test]
    fn every_frame_starts_with_its_fence_wait() {
        let mut h = standard();
        h.frames(3).unwrap();

        let waits: Vec<_> = h
            .backend
            .events()
            .iter()
            .filter_map(|e| match *e {
                BackendEvent::WaitSlot { slot, status } => Some((slot, status)),
                _ => None,
            })
            .collect();
        let signaled = ember_gpu::FenceStatus::Signaled;
        assert_eq!(waits, vec![(0, signaled), (1, signaled), (0, signaled)]);

        // wait, acquire, reset, record, submit, present
        for frame in h.backend.events().chunks(6) {
            assert!(matches!(frame[0], BackendEvent::WaitSlot { .. }), "{frame:?}");
            assert!(matches!(frame[2], BackendEvent::ResetSlot(_)), "{frame:?}");
        }
    }

    #[test]
    fn unused_slot_fence_is_already_signaled() {
        let mut h = standard();
        h.backend.script_fence_timeouts(1);

        assert_eq!(h.frames(2).unwrap(), vec![presented(0, 0), presented(1, 1)]);
        assert_eq!(
            h.frame().unwrap(),
            FrameOutcome::Skipped {
                slot: 0,
                reason: SkipReason::FenceTimeout
            }
        );
        assert!(h.backend.violations().is_empty(), "{:?}", h.backend.violations());
    }

    #[test]
    fn frame_records_scene_then_overlay() {
        let mut h = standard();
        h.frame().unwrap();

        let frame = h.backend.recorder().last_frame().unwrap();
        let size = extent(800, 600);
        assert_eq!(
            frame,
            &[
                RecordedCommand::BeginRenderPass {
                    extent: size,
                    framebuffer: 1
                },
                RecordedCommand::Viewport(size),
                RecordedCommand::Scissor(size),
                RecordedCommand::BindPipeline,
                RecordedCommand::BindDescriptorSet { index: 0, set: 100 },
                RecordedCommand::BindVertexBuffer(1000),
                RecordedCommand::BindIndexBuffer(2000),
                RecordedCommand::BindDescriptorSet { index: 1, set: 3000 },
                RecordedCommand::DrawIndexed(MOCK_INDEX_COUNT),
                RecordedCommand::BindVertexBuffer(1001),
                RecordedCommand::BindIndexBuffer(2001),
                RecordedCommand::BindDescriptorSet { index: 1, set: 3008 },
                RecordedCommand::DrawIndexed(MOCK_INDEX_COUNT),
                RecordedCommand::DrawIndexed(OVERLAY_INDEX_COUNT),
                RecordedCommand::EndRenderPass,
            ]
        );
    }

    #[test]
    fn overlay_tunes_before_uniforms_are_written() {
        let mut h = standard();
        h.frames(3).unwrap();
        assert_relative_eq!(h.scene.params().light_position.x, 5.0);
    }

    #[test]
    fn resize_before_fourth_frame() {
        let mut h = standard();
        assert_eq!(h.frames(3).unwrap(), vec![presented(0, 0), presented(1, 1), presented(0, 2)]);

        h.window.resize(400, 300);
        h.backend.clear_events();
        assert_eq!(h.frame().unwrap(), FrameOutcome::Resized(extent(400, 300)));
        assert_eq!(
            h.backend.events(),
            &[BackendEvent::WaitIdle, BackendEvent::Rebuild(extent(400, 300))]
        );
        assert_eq!(h.scene.resizes(), &[extent(400, 300)]);
        assert_relative_eq!(h.scene.camera.aspect, 400.0 / 300.0);

        assert_eq!(h.frame().unwrap(), presented(1, 0));
        let frame = h.backend.recorder().last_frame().unwrap();
        assert!(frame.contains(&RecordedCommand::Viewport(extent(400, 300))));
        assert!(frame.contains(&RecordedCommand::Scissor(extent(400, 300))));
        assert!(!frame.contains(&RecordedCommand::Viewport(extent(800, 600))));
        assert!(h.backend.violations().is_empty(), "{:?}", h.backend.violations());
    }

    #[test]
    fn minimized_window_defers_rebuild() {
        let mut h = standard();
        h.frames(2).unwrap();

        h.window.minimize();
        h.backend.clear_events();
        assert_eq!(h.frame().unwrap(), FrameOutcome::ResizeDeferred);
        assert_eq!(h.frame().unwrap(), FrameOutcome::ResizeDeferred);
        assert!(h.backend.events().is_empty());
        assert!(h.scheduler.resize_pending());
        assert_eq!(h.scheduler.stats().resizes_deferred, 2);

        h.window.resize(1024, 768);
        assert_eq!(h.frame().unwrap(), FrameOutcome::Resized(extent(1024, 768)));
        assert!(matches!(h.frame().unwrap(), FrameOutcome::Presented { .. }));
        assert_eq!(h.backend.count(is_rebuild), 1);
        assert!(h.backend.violations().is_empty(), "{:?}", h.backend.violations());
    }

    #[test]
    fn fifo_fallback() {
        let fifo_only =
            MockBackend::new(2, 800, 600, &[vk::PresentModeKHR::FIFO], false).unwrap();
        assert_eq!(
            fifo_only.swapchain_info().present_mode,
            vk::PresentModeKHR::FIFO
        );

        let vsync = MockBackend::new(
            2,
            800,
            600,
            &[vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
            true,
        )
        .unwrap();
        assert_eq!(vsync.swapchain_info().present_mode, vk::PresentModeKHR::FIFO);

        let standard = MockBackend::standard().unwrap();
        assert_eq!(
            standard.swapchain_info().present_mode,
            vk::PresentModeKHR::MAILBOX
        );
    }

    #[test]
    fn vsync_survives_rebuild() {
        let backend = MockBackend::new(
            2,
            800,
            600,
            &[vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
            true,
        )
        .unwrap();
        let mut h = Harness::new(backend).unwrap();
        h.window.resize(640, 480);
        h.frame().unwrap();
        assert_eq!(
            h.backend.swapchain_info().present_mode,
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn swapchain_bounds_hold_across_sizes() {
        let mut h = standard();
        for (width, height) in [(1, 1), (7, 5000), (5000, 7), (1920, 1080), (4096, 4096)] {
            h.window.resize(width, height);
            let FrameOutcome::Resized(size) = h.frame().unwrap() else {
                panic!("expected a rebuild for {width}x{height}");
            };
            assert_eq!(size, extent(width.min(4096), height.min(4096)));
            let info = h.backend.swapchain_info();
            assert!((2..=3).contains(&info.image_count));
            h.frame().unwrap();
        }
        assert!(h.backend.violations().is_empty(), "{:?}", h.backend.violations());
    }

    #[test]
    fn repeated_resize_rebuilds_once() {
        let mut h = standard();
        h.frame().unwrap();

        h.window.resize(640, 480);
        h.window.resize(640, 480);
        assert_eq!(h.frame().unwrap(), FrameOutcome::Resized(extent(640, 480)));
        assert!(matches!(h.frame().unwrap(), FrameOutcome::Presented { .. }));
        assert_eq!(h.backend.count(is_rebuild), 1);
        assert_eq!(h.scheduler.stats().swapchain_rebuilds, 1);

        let before = h.backend.swapchain_info();
        h.scheduler.request_resize();
        assert_eq!(h.frame().unwrap(), FrameOutcome::Resized(extent(640, 480)));
        assert_eq!(h.backend.swapchain_info(), before);
    }

    #[test]
    fn fence_timeout_skips_without_advancing() {
        let mut h = standard();
        h.frames(2).unwrap();

        h.backend.script_fence_timeouts(1);
        h.backend.clear_events();
        assert_eq!(
            h.frame().unwrap(),
            FrameOutcome::Skipped {
                slot: 0,
                reason: SkipReason::FenceTimeout
            }
        );
        assert_eq!(
            h.backend.events(),
            &[BackendEvent::WaitSlot {
                slot: 0,
                status: ember_gpu::FenceStatus::TimedOut
            }]
        );
        assert_eq!(h.scheduler.current_slot(), 0);
        assert_eq!(h.scheduler.slot_state(0), Some(SlotState::Submitted));
        assert!(h.scheduler.resize_pending());

        assert_eq!(h.frame().unwrap(), FrameOutcome::Resized(extent(800, 600)));
        assert_eq!(h.frame().unwrap(), presented(0, 0));
        assert_eq!(h.scheduler.stats().frames_skipped, 1);
        assert!(h.backend.violations().is_empty(), "{:?}", h.backend.violations());
    }

    #[test]
    fn out_of_date_acquire_keeps_fence_signaled() {
        let mut h = standard();
        h.frames(2).unwrap();

        h.backend.script_acquire(AcquireResult::OutOfDate);
        h.backend.clear_events();
        assert_eq!(
            h.frame().unwrap(),
            FrameOutcome::Skipped {
                slot: 0,
                reason: SkipReason::AcquireOutOfDate
            }
        );
        assert_eq!(
            h.backend.events(),
            &[
                BackendEvent::WaitSlot {
                    slot: 0,
                    status: ember_gpu::FenceStatus::Signaled
                },
                BackendEvent::Acquire {
                    slot: 0,
                    result: AcquireResult::OutOfDate
                },
            ]
        );
        assert_eq!(h.backend.fence_signaled(0), Some(true));
        assert_eq!(h.scheduler.current_slot(), 0);
        assert_eq!(h.scheduler.slot_state(0), Some(SlotState::Idle));

        assert_eq!(h.frame().unwrap(), FrameOutcome::Resized(extent(800, 600)));
        assert_eq!(h.frame().unwrap(), presented(0, 0));
        assert!(h.backend.violations().is_empty(), "{:?}", h.backend.violations());
    }

    #[test]
    fn acquire_timeout_skips_and_rebuilds() {
        let mut h = standard();
        h.backend.script_acquire(AcquireResult::TimedOut);
        assert_eq!(
            h.frame().unwrap(),
            FrameOutcome::Skipped {
                slot: 0,
                reason: SkipReason::AcquireTimeout
            }
        );
        assert_eq!(h.backend.count(is_submit), 0);
        assert!(matches!(h.frame().unwrap(), FrameOutcome::Resized(_)));
        assert_eq!(h.frame().unwrap(), presented(0, 0));
    }

    #[test]
    fn suboptimal_acquire_still_renders() {
        let mut h = standard();
        h.backend.script_acquire(AcquireResult::Acquired {
            image_index: 0,
            suboptimal: true,
        });
        assert_eq!(h.frame().unwrap(), presented(0, 0));
        assert!(!h.scheduler.resize_pending());
    }

    #[test]
    fn out_of_date_present_advances_then_rebuilds() {
        let mut h = standard();
        h.backend.script_present(PresentResult::OutOfDate);
        assert_eq!(
            h.frame().unwrap(),
            FrameOutcome::Presented {
                slot: 0,
                image_index: 0,
                present: PresentResult::OutOfDate
            }
        );
        assert_eq!(h.scheduler.current_slot(), 1);
        assert!(h.scheduler.resize_pending());
        assert_eq!(h.frame().unwrap(), FrameOutcome::Resized(extent(800, 600)));
        assert_eq!(h.frame().unwrap(), presented(1, 0));
    }

    #[test]
    fn fence_discipline_with_three_slots() {
        let backend = MockBackend::new(
            3,
            800,
            600,
            &[vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
            false,
        )
        .unwrap();
        let mut h = Harness::new(backend).unwrap();

        for frame in 0..30 {
            match frame {
                7 => h.window.resize(1280, 720),
                12 => h.backend.script_present(PresentResult::Suboptimal),
                19 => h.window.minimize(),
                21 => h.window.resize(300, 200),
                25 => h.backend.script_fence_timeouts(1),
                _ => {}
            }
            h.frame().unwrap();
        }

        assert_fence_discipline(h.backend.events(), 3);
        assert!(h.backend.violations().is_empty(), "{:?}", h.backend.violations());
        h.shutdown().unwrap();
        assert_eq!(h.backend.double_frees(), 0);
    }

    #[test]
    fn mock_flags_rerecord_before_wait() {
        let mut backend = MockBackend::standard().unwrap();
        let mut nothing = |_: &mut dyn CommandRecorder, _: &FrameTarget| {};

        backend.acquire_image(0, u64::MAX).unwrap();
        backend.reset_slot(0).unwrap();
        backend.record(0, 0, &mut nothing).unwrap();
        backend.submit(0).unwrap();
        backend.record(0, 0, &mut nothing).unwrap();

        assert!(backend
            .violations()
            .iter()
            .any(|v| v.contains("before its fence was waited on")));
    }

    #[test]
    fn missing_frame_set_fails_before_touching_the_slot() {
        let mut h = standard();
        h.scene.frame_sets = 1;
        assert_eq!(h.frame().unwrap(), presented(0, 0));

        h.backend.clear_events();
        let err = h.frame().unwrap_err();
        assert!(err.to_string().contains("slot 1"), "{err}");
        assert!(h.backend.events().is_empty(), "{:?}", h.backend.events());
        assert_eq!(h.backend.recorder().frames().len(), 1);
        assert_eq!(h.scheduler.slot_state(1), Some(SlotState::Idle));
    }

    #[test]
    fn mismatched_slot_count_is_an_error() {
        let mut h = standard();
        h.scheduler = FrameScheduler::new(3, Duration::from_secs(1)).unwrap();
        assert!(h.frame().is_err());
    }
}
