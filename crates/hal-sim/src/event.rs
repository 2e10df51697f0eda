use std::any::Any;
use std::sync::Arc;

use hal_core::{BackendError, EventImpl, Result};
use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
struct Marks {
    // generation of the latest record issued
    recorded: u64,
    // highest generation a stream has executed
    reached: u64,
}

/// Generation counter shared between the streams that signal an event and
/// the streams or host threads waiting on it.
///
/// Every record arms a new generation. A waiter captures the latest armed
/// generation when it starts waiting, so re-recording does not move the
/// target of waits already issued.
#[derive(Debug, Default)]
pub struct EventState {
    marks: Mutex<Marks>,
    cond: Condvar,
}

impl EventState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn arm(&self) -> u64 {
        let mut marks = self.marks.lock();
        marks.recorded += 1;
        marks.recorded
    }

    /// Generation a wait issued now has to reach.
    pub fn target(&self) -> Result<u64> {
        match self.marks.lock().recorded {
            0 => Err(BackendError::EventNotRecorded),
            generation => Ok(generation),
        }
    }

    pub fn reach(&self, generation: u64) {
        let mut marks = self.marks.lock();
        marks.reached = marks.reached.max(generation);
        self.cond.notify_all();
    }

    pub fn wait_for(&self, generation: u64) {
        let mut marks = self.marks.lock();
        self.cond.wait_while(&mut marks, |m| m.reached < generation);
    }

    /// Whether the latest record has been reached. `false` if never recorded.
    pub fn is_complete(&self) -> bool {
        let marks = self.marks.lock();
        marks.recorded > 0 && marks.reached >= marks.recorded
    }
}

pub struct SimEvent {
    state: Arc<EventState>,
}

impl SimEvent {
    pub fn new() -> Self {
        SimEvent {
            state: EventState::new(),
        }
    }

    pub fn state(&self) -> &Arc<EventState> {
        &self.state
    }

    pub fn is_complete(&self) -> bool {
        self.state.is_complete()
    }
}

impl Default for SimEvent {
    fn default() -> Self {
        Self::new()
    }
}

impl EventImpl for SimEvent {
    fn as_any(&self) -> &dyn Any {
        self
    }
}
