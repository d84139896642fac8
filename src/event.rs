use std::sync::{Arc, Mutex};

use crate::port::{Port, PortInner};
use crate::sink::Sink;

/// Thin front-end to the event queue, bound to a sink.
pub struct Event(Arc<EventInner>);

pub(crate) struct EventInner {
    pub(crate) sink: Mutex<Arc<dyn Sink>>,
    port: Arc<PortInner>,
}

impl Event {
    pub fn init(port: &Port, sink: Arc<dyn Sink>) -> Event {
        Event(Arc::new(EventInner {
            sink: Mutex::new(sink),
            port: port.inner().clone(),
        }))
    }

    pub fn set_sink(&self, sink: Arc<dyn Sink>) {
        *self.0.sink.lock().unwrap() = sink;
    }

    /// Push onto the event queue under `events_sync` and pulse wake.
    /// Callable from any thread, including the worker itself.
    pub fn signal(&self) {
        self.0.port.push_event(self.0.clone());
    }

    /// No worker-side resources to release; provided for symmetry with
    /// `Timer::term` and `Usock::close`.
    pub fn term(&self) {}
}
