// Frame protocol against a simulated GPU timeline
//
// The simulated GPU only finishes work when the CPU blocks on a fence, the
// worst case for resource reuse. It panics on any protocol violation.

use std::collections::VecDeque;
use vk_frame_engine::backend::frame::FrameCursor;
use vk_frame_engine::backend::{AcquiredImage, FrameScheduler, FrameTimeline, PresentStatus};
use vk_frame_engine::{EngineError, EngineResult};

#[derive(Debug, Clone, Copy)]
struct Submission {
    frame: usize,
    present_slot: usize,
}

struct SimulatedGpu {
    frames_in_flight: usize,
    image_count: u32,
    /// Fences start signaled, like the real ones
    fence_signaled: Vec<bool>,
    /// Acquire semaphore signaled or still awaited by unfinished work
    acquire_busy: Vec<bool>,
    /// Command buffer recorded/submitted and not yet reset
    buffer_in_use: Vec<bool>,
    pending: VecDeque<Submission>,
    max_pending: usize,
    next_image: u32,
    /// Finish each submission right away instead of waiting for a fence wait
    eager: bool,
}

impl SimulatedGpu {
    fn new(frames_in_flight: usize, image_count: usize) -> Self {
        Self {
            frames_in_flight,
            image_count: image_count as u32,
            fence_signaled: vec![true; frames_in_flight],
            acquire_busy: vec![false; image_count],
            buffer_in_use: vec![false; frames_in_flight],
            pending: VecDeque::new(),
            max_pending: 0,
            next_image: 0,
            eager: false,
        }
    }

    fn complete_oldest(&mut self) {
        let done = self
            .pending
            .pop_front()
            .expect("waited on a fence with no work pending");
        self.fence_signaled[done.frame] = true;
        self.acquire_busy[done.present_slot] = false;
    }
}

impl FrameTimeline for SimulatedGpu {
    fn wait_for_frame(&mut self, frame: usize) -> EngineResult<()> {
        while !self.fence_signaled[frame] {
            self.complete_oldest();
        }
        Ok(())
    }

    fn acquire_image(&mut self, present_slot: usize) -> EngineResult<AcquiredImage> {
        assert!(
            !self.acquire_busy[present_slot],
            "acquire semaphore {present_slot} reused while still in use"
        );
        self.acquire_busy[present_slot] = true;
        let index = self.next_image;
        self.next_image = (self.next_image + 1) % self.image_count;
        Ok(AcquiredImage {
            index,
            suboptimal: false,
        })
    }

    fn reset_frame(&mut self, frame: usize) -> EngineResult<()> {
        assert!(
            self.fence_signaled[frame],
            "command buffer {frame} reset before its fence signaled"
        );
        self.fence_signaled[frame] = false;
        self.buffer_in_use[frame] = false;
        Ok(())
    }

    fn submit(&mut self, frame: usize, present_slot: usize, _image_index: u32) -> EngineResult<()> {
        assert!(!self.buffer_in_use[frame], "command buffer {frame} submitted twice");
        self.buffer_in_use[frame] = true;
        self.pending.push_back(Submission {
            frame,
            present_slot,
        });
        self.max_pending = self.max_pending.max(self.pending.len());
        assert!(self.pending.len() <= self.frames_in_flight);

        if self.eager {
            self.complete_oldest();
        }
        Ok(())
    }

    fn present(&mut self, _image_index: u32) -> EngineResult<PresentStatus> {
        Ok(PresentStatus::Presented)
    }
}

fn run(scheduler: &mut FrameScheduler, gpu: &mut SimulatedGpu, frames: usize) -> Vec<(usize, usize)> {
    (0..frames)
        .map(|_| {
            let report = scheduler.run_frame(gpu, |_| Ok(())).unwrap();
            (report.context.frame, report.context.present_slot)
        })
        .collect()
}

#[test]
fn two_frames_three_images_five_cycles() {
    let mut scheduler = FrameScheduler::new(2, 3).unwrap();
    let mut gpu = SimulatedGpu::new(2, 3);

    let sequence = run(&mut scheduler, &mut gpu, 5);

    let frames: Vec<usize> = sequence.iter().map(|(f, _)| *f).collect();
    let slots: Vec<usize> = sequence.iter().map(|(_, s)| *s).collect();
    assert_eq!(frames, vec![0, 1, 0, 1, 0]);
    assert_eq!(slots, vec![0, 1, 2, 0, 1]);
    assert_eq!(scheduler.frames_run(), 5);
}

#[test]
fn never_more_than_n_frames_pending() {
    for frames_in_flight in 1..=3 {
        for image_count in frames_in_flight..=4 {
            let mut scheduler = FrameScheduler::new(frames_in_flight, image_count).unwrap();
            let mut gpu = SimulatedGpu::new(frames_in_flight, image_count);

            run(&mut scheduler, &mut gpu, 25);

            // A lazy GPU lets the CPU run exactly N frames ahead
            assert_eq!(
                gpu.max_pending, frames_in_flight,
                "N={frames_in_flight} M={image_count}"
            );
        }
    }
}

#[test]
fn eager_gpu_keeps_one_frame_pending() {
    let mut scheduler = FrameScheduler::new(2, 3).unwrap();
    let mut gpu = SimulatedGpu::new(2, 3);
    gpu.eager = true;

    run(&mut scheduler, &mut gpu, 10);
    assert_eq!(gpu.max_pending, 1);
    assert!(gpu.pending.is_empty());
}

#[test]
fn fewer_images_than_frames_is_rejected() {
    assert!(matches!(
        FrameScheduler::new(3, 2),
        Err(EngineError::FrameConfig(_))
    ));
    assert!(FrameCursor::new(0, 3).is_err());
}

#[test]
fn failed_record_leaves_cursor_in_place() {
    let mut scheduler = FrameScheduler::new(2, 2).unwrap();
    let mut gpu = SimulatedGpu::new(2, 2);

    let result = scheduler.run_frame(&mut gpu, |_| Err(EngineError::NoPipelines));
    assert!(matches!(result, Err(EngineError::NoPipelines)));
    assert!(gpu.pending.is_empty());

    let cursor = scheduler.cursor();
    assert_eq!((cursor.frame(), cursor.present_slot()), (0, 0));
    assert_eq!(scheduler.frames_run(), 0);
}
