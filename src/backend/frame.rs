// Frame protocol - acquire, record, submit, present
//
// Two counters advance independently every frame:
// - `frame` (mod N frames in flight) picks the fence and command buffer
// - `present_slot` (mod M swapchain images) picks the acquire semaphore
//
// Reusing acquire semaphore `s` is only safe once the submit that waited on
// it has been fenced. The fence wait caps pending frames at N, and slot `s`
// comes around again after M frames, so M >= N is required.

use crate::error::{EngineError, EngineResult};

/// Result of acquiring a swapchain image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquiredImage {
    pub index: u32,
    pub suboptimal: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentStatus {
    Presented,
    /// Presented, but the swapchain no longer matches the surface exactly
    Suboptimal,
}

/// The GPU side of the frame protocol.
///
/// One implementation drives Vulkan; tests drive a simulated timeline.
pub trait FrameTimeline {
    /// Block until the fence of `frame` is signaled.
    fn wait_for_frame(&mut self, frame: usize) -> EngineResult<()>;

    /// Acquire the next presentable image, signalling the acquire semaphore of `present_slot`.
    fn acquire_image(&mut self, present_slot: usize) -> EngineResult<AcquiredImage>;

    /// Unsignal the fence of `frame` and reset its command buffer.
    fn reset_frame(&mut self, frame: usize) -> EngineResult<()>;

    /// Submit the command buffer of `frame`: wait on the acquire semaphore of
    /// `present_slot`, signal the render-finished semaphore of `image_index`
    /// and the fence of `frame`.
    fn submit(&mut self, frame: usize, present_slot: usize, image_index: u32) -> EngineResult<()>;

    /// Present `image_index` after its render-finished semaphore.
    fn present(&mut self, image_index: u32) -> EngineResult<PresentStatus>;
}

/// Which per-frame resources the current frame uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameContext {
    pub frame: usize,
    pub present_slot: usize,
    pub image_index: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameReport {
    pub context: FrameContext,
    pub acquire_suboptimal: bool,
    pub present: PresentStatus,
}

/// Reject frame/semaphore counts the protocol cannot run safely with.
pub fn validate_frame_counts(frames_in_flight: usize, present_slots: usize) -> EngineResult<()> {
    if frames_in_flight == 0 {
        return Err(EngineError::FrameConfig(
            "frames in flight must be at least 1".into(),
        ));
    }
    if present_slots < frames_in_flight {
        return Err(EngineError::FrameConfig(format!(
            "{present_slots} swapchain image(s) cannot back {frames_in_flight} frames in flight"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCursor {
    frame: usize,
    present_slot: usize,
    frames_in_flight: usize,
    present_slots: usize,
}

impl FrameCursor {
    pub fn new(frames_in_flight: usize, present_slots: usize) -> EngineResult<Self> {
        validate_frame_counts(frames_in_flight, present_slots)?;
        Ok(Self {
            frame: 0,
            present_slot: 0,
            frames_in_flight,
            present_slots,
        })
    }

    pub fn frame(&self) -> usize {
        self.frame
    }

    pub fn present_slot(&self) -> usize {
        self.present_slot
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    pub fn advance(&mut self) {
        self.frame = (self.frame + 1) % self.frames_in_flight;
        self.present_slot = (self.present_slot + 1) % self.present_slots;
    }
}

/// Runs one frame of the protocol per call.
pub struct FrameScheduler {
    cursor: FrameCursor,
    frames_run: u64,
}

impl FrameScheduler {
    pub fn new(frames_in_flight: usize, present_slots: usize) -> EngineResult<Self> {
        Ok(Self {
            cursor: FrameCursor::new(frames_in_flight, present_slots)?,
            frames_run: 0,
        })
    }

    pub fn cursor(&self) -> FrameCursor {
        self.cursor
    }

    pub fn frames_run(&self) -> u64 {
        self.frames_run
    }

    /// Drive one acquire/record/submit/present cycle.
    ///
    /// `record` fills the command buffer of `context.frame` for the acquired
    /// image. Any error aborts the frame without advancing the cursor.
    pub fn run_frame<T, F>(&mut self, timeline: &mut T, record: F) -> EngineResult<FrameReport>
    where
        T: FrameTimeline + ?Sized,
        F: FnOnce(&FrameContext) -> EngineResult<()>,
    {
        let frame = self.cursor.frame();
        let present_slot = self.cursor.present_slot();

        // 1. Backpressure: at most N frames pending on the GPU
        timeline.wait_for_frame(frame)?;

        // 2. Acquire
        let acquired = timeline.acquire_image(present_slot)?;
        if acquired.suboptimal {
            log::warn!("Swapchain image {} acquired suboptimal", acquired.index);
        }

        // 3. Fence is known signaled, safe to reuse frame resources
        timeline.reset_frame(frame)?;

        // 4. Record
        let context = FrameContext {
            frame,
            present_slot,
            image_index: acquired.index,
        };
        record(&context)?;

        // 5. Submit, 6. Present
        timeline.submit(frame, present_slot, acquired.index)?;
        let present = timeline.present(acquired.index)?;
        if present == PresentStatus::Suboptimal {
            log::warn!("Swapchain image {} presented suboptimal", acquired.index);
        }

        // 7. Advance
        self.cursor.advance();
        self.frames_run += 1;

        Ok(FrameReport {
            context,
            acquire_suboptimal: acquired.suboptimal,
            present,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Calls(Vec<String>);

    impl FrameTimeline for Calls {
        fn wait_for_frame(&mut self, frame: usize) -> EngineResult<()> {
            self.0.push(format!("wait {frame}"));
            Ok(())
        }
        fn acquire_image(&mut self, present_slot: usize) -> EngineResult<AcquiredImage> {
            self.0.push(format!("acquire {present_slot}"));
            Ok(AcquiredImage {
                index: 7,
                suboptimal: true,
            })
        }
        fn reset_frame(&mut self, frame: usize) -> EngineResult<()> {
            self.0.push(format!("reset {frame}"));
            Ok(())
        }
        fn submit(&mut self, frame: usize, present_slot: usize, image: u32) -> EngineResult<()> {
            self.0.push(format!("submit {frame} {present_slot} {image}"));
            Ok(())
        }
        fn present(&mut self, image: u32) -> EngineResult<PresentStatus> {
            self.0.push(format!("present {image}"));
            Ok(PresentStatus::Suboptimal)
        }
    }

    #[test]
    fn cursor_indices_advance_independently() {
        let mut cursor = FrameCursor::new(2, 3).unwrap();
        let mut seen = Vec::new();
        for _ in 0..5 {
            seen.push((cursor.frame(), cursor.present_slot()));
            cursor.advance();
        }
        assert_eq!(seen, vec![(0, 0), (1, 1), (0, 2), (1, 0), (0, 1)]);
    }

    #[test]
    fn rejects_unsafe_counts() {
        assert!(matches!(
            FrameCursor::new(0, 3),
            Err(EngineError::FrameConfig(_))
        ));
        assert!(matches!(
            FrameCursor::new(3, 2),
            Err(EngineError::FrameConfig(_))
        ));
        assert!(FrameCursor::new(3, 3).is_ok());
    }

    #[test]
    fn steps_run_in_protocol_order() {
        let mut scheduler = FrameScheduler::new(2, 3).unwrap();
        let mut timeline = Calls::default();

        let report = scheduler.run_frame(&mut timeline, |_| Ok(())).unwrap();

        assert_eq!(
            timeline.0,
            vec!["wait 0", "acquire 0", "reset 0", "submit 0 0 7", "present 7"]
        );
        assert!(report.acquire_suboptimal);
        assert_eq!(report.present, PresentStatus::Suboptimal);
        assert_eq!(scheduler.cursor().frame(), 1);
    }

    #[test]
    fn record_failure_stops_before_submit() {
        let mut scheduler = FrameScheduler::new(2, 2).unwrap();
        let mut timeline = Calls::default();

        let result = scheduler.run_frame(&mut timeline, |_| Err(EngineError::NoPipelines));

        assert!(matches!(result, Err(EngineError::NoPipelines)));
        assert_eq!(timeline.0, vec!["wait 0", "acquire 0", "reset 0"]);
        assert_eq!(scheduler.frames_run(), 0);
        assert_eq!(scheduler.cursor().frame(), 0);
    }
}
