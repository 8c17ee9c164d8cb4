// =============================================================================
// FRAME LOOP
// =============================================================================
//
// Per iteration, strictly in this order:
//   wait (fence) -> acquire -> record -> submit -> present
//
// One frame in flight: the fence wait at the top of a frame only returns once
// the previous frame's submission finished on the GPU. Any failure ends the
// loop; nothing is skipped or retried. Whatever ends the loop, the device is
// drained exactly once before the caller tears anything down.

use anyhow::{Context, Result};

use crate::error::Stage;

/// The window as seen by the loop
pub trait EventSource {
    fn is_closed(&self) -> bool;
    /// Pump pending window events
    fn update(&mut self);
}

/// The GPU side of one frame
pub trait FrameBackend {
    /// Number of presentable images; acquired indices are always below it
    fn image_count(&self) -> u32;

    /// Block until the previous frame's fence signals, then reset it
    fn wait_for_previous_frame(&mut self) -> Result<()>;

    /// Next presentable image; signals the image-acquired semaphore on the GPU
    fn acquire_next_image(&mut self) -> Result<u32>;

    /// Reset and record the command buffer against the framebuffer for `image_index`
    fn record(&mut self, image_index: u32) -> Result<()>;

    /// Submit waiting on image-acquired, signaling render-complete and the fence
    fn submit(&mut self) -> Result<()>;

    /// Present `image_index` waiting on render-complete
    fn present(&mut self, image_index: u32) -> Result<()>;

    fn wait_idle(&mut self) -> Result<()>;
}

/// Draw one frame and return the image index it presented.
pub fn draw_frame<B: FrameBackend>(backend: &mut B) -> Result<u32> {
    backend.wait_for_previous_frame()?;

    let image_index = backend.acquire_next_image()?;
    let image_count = backend.image_count();
    if image_index >= image_count {
        return Err(anyhow::Error::new(Stage::AcquireImage)).with_context(|| {
            format!("Acquired image {} but only {} images exist", image_index, image_count)
        });
    }

    backend.record(image_index)?;
    backend.submit()?;
    backend.present(image_index)?;

    Ok(image_index)
}

/// Run until the window closes or a frame fails. Returns the number of
/// frames drawn.
pub fn run<W, B>(window: &mut W, backend: &mut B) -> Result<u64>
where
    W: EventSource,
    B: FrameBackend,
{
    let mut frames = 0;
    let looped = drive(window, backend, &mut frames);

    // Drain the GPU before any teardown, even after a failed frame
    let idle = backend.wait_idle();

    looped?;
    idle?;
    Ok(frames)
}

fn drive<W, B>(window: &mut W, backend: &mut B, frames: &mut u64) -> Result<()>
where
    W: EventSource,
    B: FrameBackend,
{
    while !window.is_closed() {
        window.update();

        let image_index = draw_frame(backend)?;
        log::trace!("Frame {} presented image {}", frames, image_index);
        *frames += 1;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::exit_code_of;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Call {
        Wait,
        Acquire(u32),
        Record(u32),
        Submit,
        Present(u32),
        WaitIdle,
    }

    /// Simulates one GPU queue: a submission leaves the fence unsignaled until
    /// the next wait retires it.
    struct FakeGpu {
        image_count: u32,
        next_image: u32,
        fence_signaled: bool,
        fence_reset: bool,
        in_flight: bool,
        blocking_waits: u32,
        calls: Vec<Call>,
        fail_at: Option<Call>,
        bad_index: Option<u32>,
        idle_fails: bool,
    }

    impl FakeGpu {
        fn new(image_count: u32) -> Self {
            Self {
                image_count,
                next_image: 0,
                fence_signaled: true,
                fence_reset: false,
                in_flight: false,
                blocking_waits: 0,
                calls: Vec::new(),
                fail_at: None,
                bad_index: None,
                idle_fails: false,
            }
        }

        fn check(&self, call: Call, stage: Stage) -> Result<()> {
            if self.fail_at == Some(call) {
                return Err(anyhow::Error::new(stage));
            }
            Ok(())
        }

        fn acquired(&self) -> Vec<u32> {
            self.calls
                .iter()
                .filter_map(|c| match c {
                    Call::Acquire(i) => Some(*i),
                    _ => None,
                })
                .collect()
        }
    }

    impl FrameBackend for FakeGpu {
        fn image_count(&self) -> u32 {
            self.image_count
        }

        fn wait_for_previous_frame(&mut self) -> Result<()> {
            self.calls.push(Call::Wait);
            self.check(Call::Wait, Stage::WaitForFence)?;
            if !self.fence_signaled {
                // The GPU finishes the in-flight frame while we block
                self.blocking_waits += 1;
                self.in_flight = false;
                self.fence_signaled = true;
            }
            self.fence_signaled = false;
            self.fence_reset = true;
            Ok(())
        }

        fn acquire_next_image(&mut self) -> Result<u32> {
            let index = self.bad_index.unwrap_or(self.next_image);
            self.calls.push(Call::Acquire(index));
            self.check(Call::Acquire(index), Stage::AcquireImage)?;
            self.next_image = (self.next_image + 1) % self.image_count;
            Ok(index)
        }

        fn record(&mut self, image_index: u32) -> Result<()> {
            self.calls.push(Call::Record(image_index));
            self.check(Call::Record(image_index), Stage::RecordCommands)
        }

        fn submit(&mut self) -> Result<()> {
            self.calls.push(Call::Submit);
            self.check(Call::Submit, Stage::SubmitCommands)?;
            assert!(self.fence_reset, "submitted without waiting on the fence");
            assert!(!self.in_flight, "two frames in flight");
            self.fence_reset = false;
            self.in_flight = true;
            Ok(())
        }

        fn present(&mut self, image_index: u32) -> Result<()> {
            self.calls.push(Call::Present(image_index));
            self.check(Call::Present(image_index), Stage::PresentImage)
        }

        fn wait_idle(&mut self) -> Result<()> {
            self.calls.push(Call::WaitIdle);
            self.in_flight = false;
            if self.idle_fails {
                return Err(anyhow::Error::new(Stage::DeviceIdle));
            }
            Ok(())
        }
    }

    /// Closes after a fixed number of updates
    struct FakeWindow {
        updates: u32,
        close_after: u32,
    }

    impl FakeWindow {
        fn closing_after(close_after: u32) -> Self {
            Self { updates: 0, close_after }
        }
    }

    impl EventSource for FakeWindow {
        fn is_closed(&self) -> bool {
            self.updates >= self.close_after
        }

        fn update(&mut self) {
            self.updates += 1;
        }
    }

    #[test]
    fn window_closed_before_first_frame() {
        let mut window = FakeWindow::closing_after(0);
        let mut gpu = FakeGpu::new(3);

        let frames = run(&mut window, &mut gpu).unwrap();

        assert_eq!(frames, 0);
        assert_eq!(window.updates, 0);
        assert_eq!(gpu.calls, vec![Call::WaitIdle]);
    }

    #[test]
    fn each_frame_follows_the_fixed_order() {
        let mut window = FakeWindow::closing_after(3);
        let mut gpu = FakeGpu::new(3);

        assert_eq!(run(&mut window, &mut gpu).unwrap(), 3);

        let mut expected = Vec::new();
        for i in 0..3 {
            expected.extend([Call::Wait, Call::Acquire(i), Call::Record(i), Call::Submit, Call::Present(i)]);
        }
        expected.push(Call::WaitIdle);
        assert_eq!(gpu.calls, expected);
    }

    #[test]
    fn two_images_cycle_between_zero_and_one() {
        let mut window = FakeWindow::closing_after(7);
        let mut gpu = FakeGpu::new(2);

        run(&mut window, &mut gpu).unwrap();

        assert_eq!(gpu.acquired(), vec![0, 1, 0, 1, 0, 1, 0]);
        assert!(gpu.acquired().iter().all(|&i| i < 2));
    }

    #[test]
    fn present_is_issued_before_the_next_acquire() {
        let mut window = FakeWindow::closing_after(4);
        let mut gpu = FakeGpu::new(2);

        run(&mut window, &mut gpu).unwrap();

        let mut pending_present: Option<u32> = None;
        for call in &gpu.calls {
            match *call {
                Call::Acquire(i) => {
                    assert_eq!(pending_present, None, "acquired before presenting");
                    pending_present = Some(i);
                }
                Call::Present(i) => {
                    assert_eq!(pending_present, Some(i));
                    pending_present = None;
                }
                _ => {}
            }
        }
        assert_eq!(pending_present, None);
    }

    #[test]
    fn first_frame_does_not_block_on_signaled_fence() {
        let mut gpu = FakeGpu::new(2);

        draw_frame(&mut gpu).unwrap();
        assert_eq!(gpu.blocking_waits, 0);

        // The second frame has to retire the first one
        draw_frame(&mut gpu).unwrap();
        assert_eq!(gpu.blocking_waits, 1);
    }

    #[test]
    fn failure_stops_the_loop_and_still_drains() {
        let mut window = FakeWindow::closing_after(10);
        let mut gpu = FakeGpu::new(2);
        gpu.fail_at = Some(Call::Acquire(1));

        let err = run(&mut window, &mut gpu).unwrap_err();

        assert_eq!(exit_code_of(&err), Stage::AcquireImage.exit_code());
        assert_eq!(window.updates, 2);
        assert_eq!(
            &gpu.calls[5..],
            &[Call::Wait, Call::Acquire(1), Call::WaitIdle]
        );
    }

    #[test]
    fn every_stage_keeps_its_code() {
        let cases = [
            (Call::Wait, Stage::WaitForFence),
            (Call::Record(0), Stage::RecordCommands),
            (Call::Submit, Stage::SubmitCommands),
            (Call::Present(0), Stage::PresentImage),
        ];

        for (call, stage) in cases {
            let mut gpu = FakeGpu::new(2);
            gpu.fail_at = Some(call);
            let err = draw_frame(&mut gpu).unwrap_err();
            assert_eq!(exit_code_of(&err), stage.exit_code(), "{:?}", call);
        }
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let mut gpu = FakeGpu::new(2);
        gpu.bad_index = Some(2);

        let err = draw_frame(&mut gpu).unwrap_err();

        assert_eq!(exit_code_of(&err), Stage::AcquireImage.exit_code());
        assert!(!gpu.calls.iter().any(|c| matches!(c, Call::Record(_))));
    }

    #[test]
    fn frame_error_wins_over_idle_error() {
        let mut window = FakeWindow::closing_after(5);
        let mut gpu = FakeGpu::new(2);
        gpu.fail_at = Some(Call::Submit);
        gpu.idle_fails = true;

        let err = run(&mut window, &mut gpu).unwrap_err();
        assert_eq!(exit_code_of(&err), Stage::SubmitCommands.exit_code());
    }

    #[test]
    fn idle_error_surfaces_after_clean_close() {
        let mut window = FakeWindow::closing_after(1);
        let mut gpu = FakeGpu::new(2);
        gpu.idle_fails = true;

        let err = run(&mut window, &mut gpu).unwrap_err();
        assert_eq!(exit_code_of(&err), Stage::DeviceIdle.exit_code());
    }
}
