//! Blocking request/response correlation on top of asynchronous messaging.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::util;

type Hook<T> = Box<dyn FnOnce(T) + Send>;

/// Wakes a [`ResponseHandler`] loop.
struct Signal {
    raised: Mutex<bool>,
    cvar: Condvar,
}

impl Signal {
    fn new() -> Self {
        Self {
            raised: Mutex::new(false),
            cvar: Condvar::new(),
        }
    }

    fn raise(&self) {
        *util::lock(&self.raised) = true;
        self.cvar.notify_all();
    }

    /// Blocks until the signal is raised, then lowers it.
    fn wait(&self) {
        let mut raised = util::lock(&self.raised);
        while !*raised {
            raised = util::wait(&self.cvar, raised);
        }
        *raised = false;
    }
}

/// Pending response, fulfilled exactly once by an asynchronous reply.
///
/// Threads waiting for the response are released on the first call to
/// [`handle_response`](ResponseEvent::handle_response). Later calls replace
/// the stored value, which is still observable through
/// [`response`](ResponseEvent::response).
///
/// An optional hook receives the final value, exactly once, either on the
/// thread that waited for it or on a [`ResponseHandler`] loop.
pub struct ResponseEvent<T> {
    value: Mutex<Option<T>>,
    fulfilled: Condvar,
    hook: Mutex<Option<Hook<T>>>,
    handler: Mutex<Option<Arc<Signal>>>,
}

impl<T: Clone + Send + 'static> ResponseEvent<T> {
    pub fn new() -> Self {
        Self {
            value: Mutex::new(None),
            fulfilled: Condvar::new(),
            hook: Mutex::new(None),
            handler: Mutex::new(None),
        }
    }

    pub fn with_hook<F: FnOnce(T) + Send + 'static>(hook: F) -> Self {
        let event = Self::new();
        *util::lock(&event.hook) = Some(Box::new(hook));
        event
    }

    /// Stores the response, waking up everyone waiting for it.
    pub fn handle_response(&self, value: T) {
        let first = {
            let mut slot = util::lock(&self.value);
            let first = slot.is_none();
            *slot = Some(value);
            first
        };
        if first {
            self.fulfilled.notify_all();
            if let Some(signal) = util::lock(&self.handler).as_ref() {
                signal.raise();
            }
        }
    }

    pub fn is_fulfilled(&self) -> bool {
        util::lock(&self.value).is_some()
    }

    /// Latest stored response, without blocking.
    pub fn response(&self) -> Option<T> {
        util::lock(&self.value).clone()
    }

    /// Blocks until the response arrives.
    pub fn wait_for_response(&self) -> T {
        let mut slot = util::lock(&self.value);
        let value = loop {
            match slot.as_ref() {
                Some(value) => break value.clone(),
                None => slot = util::wait(&self.fulfilled, slot),
            }
        };
        drop(slot);
        self.response_event(value.clone());
        value
    }

    /// Blocks until the response arrives or the timeout passes, whichever
    /// comes first.
    pub fn wait_for_response_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut slot = util::lock(&self.value);
        let value = loop {
            if let Some(value) = slot.as_ref() {
                break value.clone();
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            slot = util::wait_timeout(&self.fulfilled, slot, deadline - now);
        };
        drop(slot);
        self.response_event(value.clone());
        Some(value)
    }

    /// Runs the hook if it hasn't run yet.
    fn response_event(&self, value: T) {
        let hook = util::lock(&self.hook).take();
        if let Some(hook) = hook {
            hook(value);
        }
    }

    fn attach(&self, signal: Arc<Signal>) {
        *util::lock(&self.handler) = Some(signal);
    }

    fn process(&self) {
        if let Some(value) = self.response() {
            self.response_event(value);
        }
    }
}

impl<T: Clone + Send + 'static> Default for ResponseEvent<T> {
    fn default() -> Self {
        Self::new()
    }
}

struct HandlerQueue<T> {
    events: VecDeque<Arc<ResponseEvent<T>>>,
    stopped: bool,
}

/// Processes the hooks of queued response events in order.
///
/// The loop only ever looks at the head of the queue: an unfulfilled head
/// holds back the events queued after it, even the fulfilled ones.
pub struct ResponseHandler<T> {
    queue: Mutex<HandlerQueue<T>>,
    signal: Arc<Signal>,
}

impl<T: Clone + Send + 'static> ResponseHandler<T> {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(HandlerQueue {
                events: VecDeque::new(),
                stopped: false,
            }),
            signal: Arc::new(Signal::new()),
        }
    }

    pub fn add(&self, event: Arc<ResponseEvent<T>>) {
        event.attach(self.signal.clone());
        let fulfilled = event.is_fulfilled();
        util::lock(&self.queue).events.push_back(event);
        if fulfilled {
            self.signal.raise();
        }
    }

    pub fn pending(&self) -> usize {
        util::lock(&self.queue).events.len()
    }

    /// Runs hooks for fulfilled events at the head of the queue. Returns the
    /// number of events processed.
    pub fn drain(&self) -> usize {
        let mut processed = 0;
        loop {
            let head = {
                let mut queue = util::lock(&self.queue);
                match queue.events.front() {
                    Some(event) if event.is_fulfilled() => queue.events.pop_front(),
                    _ => None,
                }
            };
            match head {
                Some(event) => {
                    event.process();
                    processed += 1;
                }
                None => return processed,
            }
        }
    }

    /// Processing loop, sleeps until one of the queued events gets
    /// fulfilled. Returns once [`stop`](ResponseHandler::stop) is called.
    pub fn run(&self) {
        loop {
            self.signal.wait();
            if util::lock(&self.queue).stopped {
                break;
            }
            self.drain();
        }
    }

    pub fn stop(&self) {
        util::lock(&self.queue).stopped = true;
        self.signal.raise();
    }
}

impl<T: Clone + Send + 'static> Default for ResponseHandler<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn waiter_released_with_value() {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let event = Arc::new(ResponseEvent::with_hook(move |v: u32| {
            sender.send(v).unwrap();
        }));
        let _event = event.clone();
        let waiter = thread::spawn(move || _event.wait_for_response());

        thread::sleep(Duration::from_millis(20));
        event.handle_response(7);
        assert_eq!(waiter.join().unwrap(), 7);
        assert_eq!(receiver.recv_timeout(Duration::from_secs(1)).unwrap(), 7);
    }

    #[test]
    fn hook_fires_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let _count = count.clone();
        let event = ResponseEvent::with_hook(move |_: String| {
            _count.fetch_add(1, Ordering::SeqCst);
        });
        event.handle_response("first".to_string());
        event.handle_response("second".to_string());
        assert_eq!(event.wait_for_response(), "second");
        assert_eq!(event.wait_for_response(), "second");
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn wait_times_out() {
        let event: ResponseEvent<u8> = ResponseEvent::new();
        assert_eq!(event.wait_for_response_timeout(Duration::from_millis(10)), None);
        event.handle_response(1);
        assert_eq!(event.wait_for_response_timeout(Duration::from_millis(10)), Some(1));
    }

    #[test]
    fn handler_respects_queue_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let handler = ResponseHandler::new();
        let events = (0..3)
            .map(|n| {
                let _order = order.clone();
                Arc::new(ResponseEvent::with_hook(move |v: u32| {
                    _order.lock().unwrap().push((n, v));
                }))
            })
            .collect::<Vec<_>>();
        for event in &events {
            handler.add(event.clone());
        }

        // head isn't fulfilled, nothing gets through
        events[1].handle_response(10);
        events[2].handle_response(20);
        assert_eq!(handler.drain(), 0);
        assert_eq!(handler.pending(), 3);

        events[0].handle_response(0);
        assert_eq!(handler.drain(), 3);
        assert_eq!(*order.lock().unwrap(), vec![(0, 0), (1, 10), (2, 20)]);
    }

    #[test]
    fn handler_loop_runs_until_stopped() {
        let handler = Arc::new(ResponseHandler::new());
        let (sender, receiver) = crossbeam_channel::unbounded();
        let event = Arc::new(ResponseEvent::with_hook(move |v: u32| {
            sender.send(v).unwrap();
        }));
        handler.add(event.clone());

        let _handler = handler.clone();
        let runner = thread::spawn(move || _handler.run());
        event.handle_response(5);
        assert_eq!(receiver.recv_timeout(Duration::from_secs(1)).unwrap(), 5);

        handler.stop();
        runner.join().unwrap();
    }
}
