use std::{
    future::Future,
    pin::pin,
    sync::Arc,
    task::{Context, Poll, Wake, Waker},
};

/// Waker that does nothing: every future driven by the host is polled
/// in a busy loop because all progress comes from the event loop itself.
struct Spin;

impl Wake for Spin {
    fn wake(self: Arc<Self>) {}
}

/// Drives `fut` to completion on the current thread.
pub fn block_on<F: Future>(fut: F) -> F::Output {
    let mut fut = pin!(fut);
    let waker = Waker::from(Arc::new(Spin));
    let mut cx = Context::from_waker(&waker);

    loop {
        if let Poll::Ready(output) = fut.as_mut().poll(&mut cx) {
            return output;
        }
    }
}
