// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use pin_project_lite::pin_project;

use crate::{Delay, Elapsed};

pin_project! {
    /// A future that races between an inner future and a deadline.
    ///
    /// - If the inner future completes before the deadline, its output is returned.
    /// - If the deadline is reached first, [`Elapsed`] is returned and the inner future
    ///   is dropped, aborting whatever work it had in flight.
    ///
    /// Created by [`Clock::timeout`][crate::Clock::timeout].
    #[derive(Debug)]
    pub struct Timeout<F> {
        #[pin]
        future: F,
        delay: Delay,
        duration: Duration,
    }
}

impl<F> Timeout<F> {
    pub(crate) fn new(future: F, delay: Delay, duration: Duration) -> Self {
        Self { future, delay, duration }
    }
}

impl<F: Future> Future for Timeout<F> {
    type Output = Result<F::Output, Elapsed>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        match this.future.poll(cx) {
            Poll::Ready(output) => Poll::Ready(Ok(output)),
            Poll::Pending => match Pin::new(this.delay).poll(cx) {
                Poll::Ready(()) => Poll::Ready(Err(Elapsed::new(*this.duration))),
                Poll::Pending => Poll::Pending,
            },
        }
    }
}
