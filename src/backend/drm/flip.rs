use std::io;

use drm::control::crtc;
use rustix::event::{poll, PollFd, PollFlags};
use rustix::io::Errno;
use tracing::{instrument, trace};

use super::{Error, KmsDevice, KmsEvent};

/// Blocks until the page flip queued on `crtc` completed
///
/// Unrelated events read in the meantime are dropped.
#[instrument(level = "trace", skip(device))]
#[profiling::function]
pub fn wait_for_flip<D: KmsDevice>(device: &D, crtc: crtc::Handle) -> Result<(), Error> {
    loop {
        let mut fds = [PollFd::new(device, PollFlags::IN)];
        match poll(&mut fds, -1) {
            Ok(_) => {}
            Err(Errno::INTR) => continue,
            Err(errno) => {
                return Err(Error::FlipWait {
                    crtc,
                    source: io::Error::from(errno),
                })
            }
        }

        let revents = fds[0].revents();
        if revents.intersects(PollFlags::HUP | PollFlags::ERR | PollFlags::NVAL) {
            return Err(Error::FlipWait {
                crtc,
                source: io::Error::new(io::ErrorKind::BrokenPipe, "device hung up"),
            });
        }
        if !revents.contains(PollFlags::IN) {
            continue;
        }

        for event in device.receive_events()? {
            match event {
                KmsEvent::PageFlip { crtc: flipped, .. } if flipped == crtc => {
                    trace!("Page flip completed");
                    return Ok(());
                }
                event => trace!(?event, "Ignoring event while waiting for page flip"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::wait_for_flip;
    use crate::backend::drm::test_utils::{handle, MockDevice, MockState, Op};
    use crate::backend::drm::{Error, KmsDevice, KmsEvent};
    use drm::control::{crtc, PageFlipFlags};

    #[test]
    fn waits_for_matching_completion() {
        let state = MockState::shared();
        let device = MockDevice::new(&state);
        let crtc: crtc::Handle = handle(MockState::CRTC);
        state.lock().unwrap().noise_events = vec![
            KmsEvent::Vblank { crtc, frame: 1 },
            KmsEvent::PageFlip {
                crtc: handle(MockState::OTHER_CRTC),
                frame: 1,
                duration: Duration::ZERO,
            },
            KmsEvent::Unknown,
        ];

        device
            .page_flip(crtc, handle(MockState::ORIGINAL_FB), PageFlipFlags::EVENT)
            .unwrap();
        wait_for_flip(&device, crtc).unwrap();

        let state = state.lock().unwrap();
        assert!(state.pending_flips.is_empty());
        assert!(state.ops.contains(&Op::FlipCompleted(crtc)));
        assert!(state.events.is_empty());
    }

    #[test]
    fn second_flip_after_wait_is_accepted() {
        let state = MockState::shared();
        let device = MockDevice::new(&state);
        let crtc: crtc::Handle = handle(MockState::CRTC);

        for _ in 0..3 {
            device
                .page_flip(crtc, handle(MockState::ORIGINAL_FB), PageFlipFlags::EVENT)
                .unwrap();
            wait_for_flip(&device, crtc).unwrap();
        }
        assert_eq!(
            state
                .lock()
                .unwrap()
                .count(|op| matches!(op, Op::FlipRejected(_))),
            0
        );
    }

    #[test]
    fn hangup_fails_the_wait() {
        let state = MockState::shared();
        let device = MockDevice::new(&state);
        device.hang_up();

        let err = wait_for_flip(&device, handle(MockState::CRTC)).unwrap_err();
        assert!(matches!(err, Error::FlipWait { .. }));
    }
}
