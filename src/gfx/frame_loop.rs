//! The acquire, submit, present cycle as an explicit state machine.
//!
//! The loop does not know about Vulkan: it drives a [`FrameBackend`], one iteration per
//! call to [`FrameLoop::iterate`], and only tracks where the cycle stands.

/// Outcome of asking the presentation engine for an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    Image(u32),
    /// The surface changed and the swapchain no longer matches it.
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Present {
    Presented,
    Stale,
}

pub trait FrameBackend {
    type Error;

    /// Blocks until the previous use of the frame slot retired and an image is available.
    fn acquire(&mut self) -> Result<Acquire, Self::Error>;

    fn submit(&mut self, image_index: u32) -> Result<(), Self::Error>;

    fn present(&mut self, image_index: u32) -> Result<Present, Self::Error>;

    /// Rebuilds everything bound to the surface. `false` when the surface currently has
    /// no area and nothing could be built.
    fn rebuild(&mut self) -> Result<bool, Self::Error>;

    /// Device-wide wait for all submitted work.
    fn wait_idle(&mut self) -> Result<(), Self::Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    Acquiring,
    Submitting,
    Presenting,
    Stale,
    Draining,
    Terminated,
}

#[derive(Debug)]
pub struct FrameLoop {
    state: FrameState,
    quit_requested: bool,
    // the last rebuild found no surface area, so nothing is in flight
    surface_unavailable: bool,
    frames_presented: u64,
}

impl Default for FrameLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameLoop {
    pub fn new() -> Self {
        Self {
            state: FrameState::Idle,
            quit_requested: false,
            surface_unavailable: false,
            frames_presented: 0,
        }
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    pub fn quit_requested(&self) -> bool {
        self.quit_requested
    }

    /// Stale with a surface that had no area on the last rebuild attempt. Nothing changes
    /// until the window does, so there is no point in iterating eagerly.
    pub fn waiting_for_surface(&self) -> bool {
        self.state == FrameState::Stale && self.surface_unavailable
    }

    /// The frame in progress still completes; the loop drains at the end of the
    /// iteration.
    pub fn request_quit(&mut self) {
        if !self.quit_requested {
            log::info!("quit requested");
        }
        self.quit_requested = true;
    }

    /// Runs one iteration: a rebuild attempt when stale, otherwise one full frame. On
    /// error the loop stays in the state that failed and the caller is expected to
    /// [`drain`](Self::drain).
    pub fn iterate<B: FrameBackend>(&mut self, backend: &mut B) -> Result<FrameState, B::Error> {
        match self.state {
            FrameState::Terminated => return Ok(self.state),
            FrameState::Draining => return self.drain(backend),
            FrameState::Stale if self.quit_requested => return self.drain(backend),
            FrameState::Stale => {
                if !self.surface_unavailable {
                    backend.wait_idle()?;
                }
                if !backend.rebuild()? {
                    log::trace!("surface has no area, staying stale");
                    self.surface_unavailable = true;
                    return Ok(self.state);
                }
                log::debug!("surface resources rebuilt");
                self.surface_unavailable = false;
                self.state = FrameState::Idle;
            }
            FrameState::Idle
            | FrameState::Acquiring
            | FrameState::Submitting
            | FrameState::Presenting => (),
        }

        self.run_frame(backend)?;

        if self.quit_requested {
            return self.drain(backend);
        }

        Ok(self.state)
    }

    fn run_frame<B: FrameBackend>(&mut self, backend: &mut B) -> Result<(), B::Error> {
        self.state = FrameState::Acquiring;
        let image_index = match backend.acquire()? {
            Acquire::Image(index) => index,
            Acquire::Stale => {
                log::warn!("swapchain out of date on acquire");
                self.state = FrameState::Stale;
                return Ok(());
            }
        };

        self.state = FrameState::Submitting;
        backend.submit(image_index)?;

        self.state = FrameState::Presenting;
        match backend.present(image_index)? {
            Present::Presented => {
                self.frames_presented += 1;
                self.state = FrameState::Idle;
            }
            Present::Stale => {
                log::warn!("swapchain out of date on present");
                self.state = FrameState::Stale;
            }
        }

        Ok(())
    }

    /// Waits for the device to go idle and terminates. Safe to call from any state.
    pub fn drain<B: FrameBackend>(&mut self, backend: &mut B) -> Result<FrameState, B::Error> {
        if self.state == FrameState::Terminated {
            return Ok(self.state);
        }

        self.state = FrameState::Draining;
        backend.wait_idle()?;
        self.state = FrameState::Terminated;
        log::info!("frame loop terminated after {} frame(s)", self.frames_presented);

        Ok(self.state)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Call {
        Acquire,
        Submit(u32),
        Present(u32),
        Rebuild,
        WaitIdle,
    }

    #[derive(Debug, PartialEq, Eq)]
    struct DeviceLost;

    #[derive(Default)]
    struct MockBackend {
        calls: Vec<Call>,
        acquires: VecDeque<Result<Acquire, DeviceLost>>,
        presents: VecDeque<Present>,
        rebuilds: VecDeque<bool>,
        next_image: u32,
    }

    impl FrameBackend for MockBackend {
        type Error = DeviceLost;

        fn acquire(&mut self) -> Result<Acquire, DeviceLost> {
            self.calls.push(Call::Acquire);
            match self.acquires.pop_front() {
                Some(result) => result,
                None => {
                    let index = self.next_image;
                    self.next_image = (self.next_image + 1) % 3;
                    Ok(Acquire::Image(index))
                }
            }
        }

        fn submit(&mut self, image_index: u32) -> Result<(), DeviceLost> {
            self.calls.push(Call::Submit(image_index));
            Ok(())
        }

        fn present(&mut self, image_index: u32) -> Result<Present, DeviceLost> {
            self.calls.push(Call::Present(image_index));
            Ok(self.presents.pop_front().unwrap_or(Present::Presented))
        }

        fn rebuild(&mut self) -> Result<bool, DeviceLost> {
            self.calls.push(Call::Rebuild);
            Ok(self.rebuilds.pop_front().unwrap_or(true))
        }

        fn wait_idle(&mut self) -> Result<(), DeviceLost> {
            self.calls.push(Call::WaitIdle);
            Ok(())
        }
    }

    #[test]
    fn frame_runs_acquire_submit_present() {
        let mut backend = MockBackend::default();
        let mut frame_loop = FrameLoop::new();

        assert_eq!(frame_loop.iterate(&mut backend), Ok(FrameState::Idle));
        assert_eq!(frame_loop.iterate(&mut backend), Ok(FrameState::Idle));
        assert_eq!(
            backend.calls,
            vec![
                Call::Acquire,
                Call::Submit(0),
                Call::Present(0),
                Call::Acquire,
                Call::Submit(1),
                Call::Present(1),
            ]
        );
        assert_eq!(frame_loop.frames_presented(), 2);
    }

    #[test]
    fn quit_finishes_frame_then_drains() {
        let mut backend = MockBackend::default();
        let mut frame_loop = FrameLoop::new();

        frame_loop.request_quit();
        assert!(frame_loop.quit_requested());
        assert_eq!(frame_loop.iterate(&mut backend), Ok(FrameState::Terminated));
        assert_eq!(
            backend.calls,
            vec![
                Call::Acquire,
                Call::Submit(0),
                Call::Present(0),
                Call::WaitIdle
            ]
        );
    }

    #[test]
    fn wait_idle_is_the_last_call() {
        let mut backend = MockBackend::default();
        let mut frame_loop = FrameLoop::new();

        for _ in 0..4 {
            frame_loop.iterate(&mut backend).unwrap();
        }
        frame_loop.request_quit();
        frame_loop.iterate(&mut backend).unwrap();

        assert_eq!(backend.calls.last(), Some(&Call::WaitIdle));
        assert_eq!(
            backend
                .calls
                .iter()
                .filter(|call| **call == Call::WaitIdle)
                .count(),
            1
        );
        assert_eq!(frame_loop.frames_presented(), 5);
    }

    #[test]
    fn stale_acquire_skips_submission_and_rebuilds() {
        let mut backend = MockBackend {
            acquires: VecDeque::from([Ok(Acquire::Stale)]),
            ..Default::default()
        };
        let mut frame_loop = FrameLoop::new();

        assert_eq!(frame_loop.iterate(&mut backend), Ok(FrameState::Stale));
        assert_eq!(backend.calls, vec![Call::Acquire]);

        assert_eq!(frame_loop.iterate(&mut backend), Ok(FrameState::Idle));
        assert_eq!(
            backend.calls[1..],
            [
                Call::WaitIdle,
                Call::Rebuild,
                Call::Acquire,
                Call::Submit(0),
                Call::Present(0),
            ]
        );
    }

    #[test]
    fn stale_present_rebuilds_next_iteration() {
        let mut backend = MockBackend {
            presents: VecDeque::from([Present::Stale]),
            ..Default::default()
        };
        let mut frame_loop = FrameLoop::new();

        assert_eq!(frame_loop.iterate(&mut backend), Ok(FrameState::Stale));
        assert_eq!(frame_loop.frames_presented(), 0);

        assert_eq!(frame_loop.iterate(&mut backend), Ok(FrameState::Idle));
        assert!(backend.calls.contains(&Call::Rebuild));
        assert_eq!(frame_loop.frames_presented(), 1);
    }

    #[test]
    fn zero_area_surface_stays_stale() {
        let mut backend = MockBackend {
            acquires: VecDeque::from([Ok(Acquire::Stale)]),
            rebuilds: VecDeque::from([false, false]),
            ..Default::default()
        };
        let mut frame_loop = FrameLoop::new();

        frame_loop.iterate(&mut backend).unwrap();
        assert!(!frame_loop.waiting_for_surface());
        assert_eq!(frame_loop.iterate(&mut backend), Ok(FrameState::Stale));
        assert!(frame_loop.waiting_for_surface());
        assert_eq!(frame_loop.iterate(&mut backend), Ok(FrameState::Stale));
        assert!(!backend.calls.iter().any(|call| matches!(call, Call::Submit(_))));

        assert_eq!(frame_loop.iterate(&mut backend), Ok(FrameState::Idle));
        assert!(!frame_loop.waiting_for_surface());
    }

    #[test]
    fn zero_area_surface_does_not_wait_idle_again() {
        let mut backend = MockBackend {
            acquires: VecDeque::from([Ok(Acquire::Stale)]),
            rebuilds: VecDeque::from([false, false, false]),
            ..Default::default()
        };
        let mut frame_loop = FrameLoop::new();

        for _ in 0..4 {
            frame_loop.iterate(&mut backend).unwrap();
        }

        assert_eq!(
            backend.calls,
            vec![
                Call::Acquire,
                Call::WaitIdle,
                Call::Rebuild,
                Call::Rebuild,
                Call::Rebuild,
            ]
        );
    }

    #[test]
    fn quit_while_waiting_for_surface_still_waits_idle() {
        let mut backend = MockBackend {
            acquires: VecDeque::from([Ok(Acquire::Stale)]),
            rebuilds: VecDeque::from([false]),
            ..Default::default()
        };
        let mut frame_loop = FrameLoop::new();

        frame_loop.iterate(&mut backend).unwrap();
        frame_loop.iterate(&mut backend).unwrap();
        frame_loop.request_quit();

        assert_eq!(frame_loop.iterate(&mut backend), Ok(FrameState::Terminated));
        assert_eq!(backend.calls.last(), Some(&Call::WaitIdle));
    }

    #[test]
    fn quit_while_stale_drains_without_rebuild() {
        let mut backend = MockBackend {
            acquires: VecDeque::from([Ok(Acquire::Stale)]),
            ..Default::default()
        };
        let mut frame_loop = FrameLoop::new();

        frame_loop.iterate(&mut backend).unwrap();
        frame_loop.request_quit();

        assert_eq!(frame_loop.iterate(&mut backend), Ok(FrameState::Terminated));
        assert_eq!(backend.calls, vec![Call::Acquire, Call::WaitIdle]);
    }

    #[test]
    fn terminated_loop_does_nothing() {
        let mut backend = MockBackend::default();
        let mut frame_loop = FrameLoop::new();

        frame_loop.request_quit();
        frame_loop.iterate(&mut backend).unwrap();
        let calls = backend.calls.len();

        assert_eq!(frame_loop.iterate(&mut backend), Ok(FrameState::Terminated));
        assert_eq!(frame_loop.drain(&mut backend), Ok(FrameState::Terminated));
        assert_eq!(backend.calls.len(), calls);
    }

    #[test]
    fn errors_propagate_and_drain_still_works() {
        let mut backend = MockBackend {
            acquires: VecDeque::from([Err(DeviceLost)]),
            ..Default::default()
        };
        let mut frame_loop = FrameLoop::new();

        assert_eq!(frame_loop.iterate(&mut backend), Err(DeviceLost));
        assert_eq!(frame_loop.state(), FrameState::Acquiring);

        assert_eq!(frame_loop.drain(&mut backend), Ok(FrameState::Terminated));
        assert_eq!(backend.calls, vec![Call::Acquire, Call::WaitIdle]);
    }
}
