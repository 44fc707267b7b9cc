// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use crate::control::ClockControl;
use crate::timers::TimerKey;

/// Asynchronously delays for the specified duration.
///
/// # Precision
///
/// The delay is scheduled on the current task's executor; its precision is affected by
/// load. There are no guarantees other than that it eventually completes, no earlier
/// than the requested duration.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use metronome::Clock;
///
/// # async fn delay_example(clock: &Clock) {
/// let stopwatch = clock.stopwatch();
///
/// clock.delay(Duration::from_millis(10)).await;
///
/// assert!(stopwatch.elapsed() >= Duration::from_millis(10));
/// # }
/// ```
#[derive(Debug)]
pub struct Delay {
    inner: DelayInner,
}

#[derive(Debug)]
enum DelayInner {
    // Boxed so that `Delay` stays `Unpin` and droppable without pin projection.
    System(Pin<Box<tokio::time::Sleep>>),
    Controlled {
        control: ClockControl,
        duration: Duration,
        // Deadline and timer are not initialized until the first poll.
        deadline: Option<Instant>,
        timer: Option<TimerKey>,
    },
}

impl Delay {
    pub(crate) fn system(duration: Duration) -> Self {
        Self {
            inner: DelayInner::System(Box::pin(tokio::time::sleep(duration))),
        }
    }

    pub(crate) fn controlled(control: ClockControl, duration: Duration) -> Self {
        Self {
            inner: DelayInner::Controlled {
                control,
                duration,
                deadline: None,
                timer: None,
            },
        }
    }
}

impl Future for Delay {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().inner {
            DelayInner::System(sleep) => sleep.as_mut().poll(cx),
            DelayInner::Controlled {
                control,
                duration,
                deadline,
                timer,
            } => match (*deadline, *timer) {
                _ if *duration == Duration::ZERO => Poll::Ready(()),
                (None, _) => {
                    let Some(when) = control.instant().checked_add(*duration) else {
                        // Past the maximum instant; this delay never completes.
                        *duration = Duration::MAX;
                        return Poll::Pending;
                    };

                    *deadline = Some(when);
                    *timer = Some(control.register_timer(when, cx.waker().clone()));
                    Poll::Pending
                }
                (Some(when), Some(key)) if control.instant() >= when => {
                    *timer = None;

                    // Unregister in case this poll was not triggered by the timer firing.
                    control.unregister_timer(key);

                    Poll::Ready(())
                }
                (Some(_), Some(key)) => {
                    // The delay may have moved between tasks since registration.
                    control.refresh_timer(key, cx.waker());
                    Poll::Pending
                }
                (Some(_), None) => Poll::Ready(()),
            },
        }
    }
}

impl Drop for Delay {
    fn drop(&mut self) {
        if let DelayInner::Controlled {
            control, timer: Some(key), ..
        } = &self.inner
        {
            control.unregister_timer(*key);
        }
    }
}
