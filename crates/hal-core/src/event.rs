use std::any::Any;
use std::fmt;

use crate::device::Device;

/// Implementation side of an event. Owned by the device that created it.
pub trait EventImpl: Send + Sync + 'static {
    fn as_any(&self) -> &dyn Any;
}

/// Synchronization point recorded on one backend's stream and awaited by
/// another. Dropping the event frees it.
pub struct Event {
    device: Device,
    inner: Box<dyn EventImpl>,
}

impl Event {
    pub(crate) fn new(device: Device, inner: Box<dyn EventImpl>) -> Self {
        Event { device, inner }
    }

    /// The device that can record and wait on this event.
    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn downcast_ref<T: EventImpl>(&self) -> Option<&T> {
        self.inner.as_any().downcast_ref::<T>()
    }

    /// Block the host until the most recent record is reached.
    pub fn synchronize(&self) -> crate::error::Result<()> {
        self.device.event_synchronize(self)
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("device", &self.device.name())
            .finish()
    }
}
