//! Backends: execution and transfer contexts bound to one device.
//!
//! Operations issued on one backend complete in issue order as seen by later
//! operations on the same backend. Nothing orders two backends against each
//! other except [`Backend::synchronize`] or an [`Event`].

use std::any::Any;
use std::fmt;
use std::sync::mpsc;

use crate::buffer::{check_tensor_range, tensor_copy, tensor_get, tensor_set};
use crate::buffer_type::BufferType;
use crate::device::Device;
use crate::error::{BackendError, GraphError, Result};
use crate::event::Event;
use crate::graph::{Graph, NodeRef};
use crate::guid::Guid;
use crate::tensor::Tensor;

/// Result slot of an asynchronous read. The data is guaranteed to be there
/// once the issuing backend has been synchronized.
pub struct PendingRead {
    rx: mpsc::Receiver<Result<Vec<u8>>>,
    taken: bool,
}

/// Producer half of a [`PendingRead`], handed to whatever performs the read.
pub struct ReadCompleter(mpsc::Sender<Result<Vec<u8>>>);

impl ReadCompleter {
    pub fn complete(self, result: Result<Vec<u8>>) {
        // The reader may have been dropped; nobody is waiting then.
        let _ = self.0.send(result);
    }
}

impl PendingRead {
    pub fn channel() -> (ReadCompleter, PendingRead) {
        let (tx, rx) = mpsc::channel();
        (ReadCompleter(tx), PendingRead { rx, taken: false })
    }

    /// An already completed read.
    pub fn ready(data: Vec<u8>) -> PendingRead {
        let (done, pending) = PendingRead::channel();
        done.complete(Ok(data));
        pending
    }

    /// Take the data if the read has completed.
    pub fn try_take(&mut self) -> Option<Result<Vec<u8>>> {
        if self.taken {
            return None;
        }
        match self.rx.try_recv() {
            Ok(result) => {
                self.taken = true;
                Some(result)
            }
            Err(mpsc::TryRecvError::Empty) => None,
            Err(mpsc::TryRecvError::Disconnected) => {
                self.taken = true;
                Some(Err(dropped_read()))
            }
        }
    }

    /// Block until the read has completed.
    pub fn wait(self) -> Result<Vec<u8>> {
        if self.taken {
            return Err(BackendError::Other("read result already taken".into()));
        }
        self.rx.recv().unwrap_or_else(|_| Err(dropped_read()))
    }
}

fn dropped_read() -> BackendError {
    BackendError::Other("read was dropped before completing".into())
}

impl fmt::Debug for PendingRead {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRead")
            .field("taken", &self.taken)
            .finish()
    }
}

/// Backend-private state of a graph plan.
pub trait PlanImpl: Send + 'static {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Reusable execution schedule for graphs sharing one topology. Only the
/// kind of backend that created it can update or run it. Dropping the plan
/// frees it.
pub struct GraphPlan {
    guid: Guid,
    inner: Box<dyn PlanImpl>,
}

impl GraphPlan {
    pub fn guid(&self) -> Guid {
        self.guid
    }

    pub fn downcast_ref<T: PlanImpl>(&self) -> Option<&T> {
        self.inner.as_any().downcast_ref::<T>()
    }

    pub fn downcast_mut<T: PlanImpl>(&mut self) -> Option<&mut T> {
        self.inner.as_any_mut().downcast_mut::<T>()
    }
}

impl fmt::Debug for GraphPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphPlan").field("guid", &self.guid).finish()
    }
}

/// Implementation side of a backend.
///
/// Optional capabilities have defaults: transfers fall back to synchronous
/// buffer access, async copies report no path, plans and events are
/// unsupported.
pub trait BackendImpl: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn guid(&self) -> Guid;

    fn set_tensor_async(&self, tensor: &Tensor, data: &[u8], offset: usize) -> Result<()> {
        tensor_set(tensor, data, offset)
    }

    fn get_tensor_async(&self, tensor: &Tensor, offset: usize, len: usize) -> Result<PendingRead> {
        let mut out = vec![0u8; len];
        tensor_get(tensor, &mut out, offset)?;
        Ok(PendingRead::ready(out))
    }

    /// Queue a copy of `src` (owned by `src_backend`) into `dst` (owned by
    /// this backend). `Ok(false)` means no asynchronous path exists.
    fn cpy_tensor_async(&self, _src_backend: &Backend, _src: &Tensor, _dst: &Tensor) -> Result<bool> {
        Ok(false)
    }

    fn synchronize(&self) -> Result<()> {
        Ok(())
    }

    fn graph_plan_create(&self, _graph: &Graph) -> Result<Box<dyn PlanImpl>> {
        Err(BackendError::Unsupported(format!("{}: graph plans", self.name())))
    }

    fn graph_plan_update(&self, _plan: &mut GraphPlan, _graph: &Graph) -> Result<()> {
        Err(BackendError::Unsupported(format!("{}: graph plans", self.name())))
    }

    fn graph_plan_compute(&self, _plan: &GraphPlan) -> Result<()> {
        Err(BackendError::Unsupported(format!("{}: graph plans", self.name())))
    }

    /// Execute every node of `graph` in order. Outputs of nodes that ran
    /// before a failing node stay valid.
    fn graph_compute(&self, graph: &Graph) -> Result<()>;

    fn event_record(&self, _event: &Event) -> Result<()> {
        Err(BackendError::Unsupported(format!("{}: events", self.name())))
    }

    fn event_wait(&self, _event: &Event) -> Result<()> {
        Err(BackendError::Unsupported(format!("{}: events", self.name())))
    }

    fn as_any(&self) -> &dyn Any;
}

/// A backend instance. Its device never changes; dropping it frees it.
pub struct Backend {
    guid: Guid,
    device: Device,
    inner: Box<dyn BackendImpl>,
}

impl Backend {
    pub(crate) fn new(device: Device, inner: Box<dyn BackendImpl>) -> Self {
        let guid = inner.guid();
        tracing::debug!("initialized backend '{}' on device '{}'", inner.name(), device.name());
        Backend {
            guid,
            device,
            inner,
        }
    }

    pub fn guid(&self) -> Guid {
        self.guid
    }

    /// Whether this backend is of the kind identified by `guid`.
    pub fn is(&self, guid: Guid) -> bool {
        self.guid == guid
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn downcast_ref<T: BackendImpl>(&self) -> Option<&T> {
        self.inner.as_any().downcast_ref::<T>()
    }

    pub fn buffer_type(&self) -> BufferType {
        self.device.buffer_type()
    }

    pub fn alignment(&self) -> usize {
        self.buffer_type().alignment()
    }

    pub fn max_size(&self) -> usize {
        self.buffer_type().max_size()
    }

    pub fn alloc_buffer(&self, size: usize) -> Result<crate::buffer::Buffer> {
        self.buffer_type().alloc_buffer(size)
    }

    /// Start writing `data` into `tensor`. The write is complete after the
    /// next [`synchronize`](Self::synchronize) or any later work on this
    /// backend that reads the tensor.
    pub fn set_tensor_async(&self, tensor: &Tensor, data: &[u8], offset: usize) -> Result<()> {
        self.check_transfer(tensor, offset, data.len())?;
        self.inner.set_tensor_async(tensor, data, offset)
    }

    /// Start reading `len` bytes of `tensor` from `offset`.
    pub fn get_tensor_async(&self, tensor: &Tensor, offset: usize, len: usize) -> Result<PendingRead> {
        self.check_transfer(tensor, offset, len)?;
        self.inner.get_tensor_async(tensor, offset, len)
    }

    /// Queue a copy of `src` (owned by `src_backend`) into `dst` (owned by
    /// this backend). `Ok(false)` asks the caller to copy through the host.
    pub fn cpy_tensor_async(&self, src_backend: &Backend, src: &Tensor, dst: &Tensor) -> Result<bool> {
        check_same_size(src, dst)?;
        check_tensor_range(src, 0, src.nbytes())?;
        check_tensor_range(dst, 0, dst.nbytes())?;
        self.inner.cpy_tensor_async(src_backend, src, dst)
    }

    /// Block until everything issued on this backend has completed. Reports
    /// the first failure of queued work, if any.
    pub fn synchronize(&self) -> Result<()> {
        self.inner.synchronize()
    }

    pub fn graph_plan_create(&self, graph: &Graph) -> Result<GraphPlan> {
        let inner = self.inner.graph_plan_create(graph)?;
        tracing::debug!("{}: created plan for {} nodes", self.name(), graph.n_nodes());
        Ok(GraphPlan {
            guid: self.guid,
            inner,
        })
    }

    /// Rebind `plan` to `graph`, which must have the plan's topology.
    pub fn graph_plan_update(&self, plan: &mut GraphPlan, graph: &Graph) -> Result<()> {
        self.check_plan(plan)?;
        self.inner.graph_plan_update(plan, graph)
    }

    pub fn graph_plan_compute(&self, plan: &GraphPlan) -> Result<()> {
        self.check_plan(plan)?;
        self.inner.graph_plan_compute(plan)
    }

    pub fn graph_compute(&self, graph: &Graph) -> Result<()> {
        self.inner.graph_compute(graph)
    }

    pub fn supports_op(&self, node: NodeRef<'_>) -> bool {
        self.device.supports_op(node)
    }

    pub fn supports_buft(&self, buft: &BufferType) -> bool {
        self.device.supports_buft(buft)
    }

    pub fn offload_op(&self, node: NodeRef<'_>) -> bool {
        self.device.offload_op(node)
    }

    /// Mark the current point of this backend's stream.
    pub fn event_record(&self, event: &Event) -> Result<()> {
        if !event.device().ptr_eq(&self.device) {
            return Err(BackendError::Foreign(format!(
                "event of device '{}'",
                event.device().name()
            )));
        }
        self.inner.event_record(event)
    }

    /// Hold back work issued on this backend after this call until `event`
    /// is reached. Does not block the host unless the backend's stream is
    /// the host itself.
    pub fn event_wait(&self, event: &Event) -> Result<()> {
        self.inner.event_wait(event)
    }

    pub fn free(self) {
        drop(self)
    }

    fn check_transfer(&self, tensor: &Tensor, offset: usize, len: usize) -> Result<()> {
        check_tensor_range(tensor, offset, len)?;
        if let Some(buffer) = tensor.buffer() {
            if !self.supports_buft(buffer.buffer_type()) {
                return Err(BackendError::Foreign(format!(
                    "tensor '{}' in buffer '{}'",
                    tensor.name(),
                    buffer.name()
                )));
            }
        }
        Ok(())
    }

    fn check_plan(&self, plan: &GraphPlan) -> Result<()> {
        if plan.guid != self.guid {
            return Err(BackendError::Foreign(format!("graph plan {}", plan.guid)));
        }
        Ok(())
    }
}

impl Drop for Backend {
    fn drop(&mut self) {
        tracing::debug!("freeing backend '{}'", self.inner.name());
    }
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backend")
            .field("name", &self.name())
            .field("guid", &self.guid)
            .field("device", &self.device.name())
            .finish()
    }
}

fn check_same_size(src: &Tensor, dst: &Tensor) -> Result<()> {
    if src.nbytes() != dst.nbytes() {
        return Err(GraphError::ShapeMismatch {
            expected: dst.shape().dims().to_vec(),
            got: src.shape().dims().to_vec(),
        }
        .into());
    }
    Ok(())
}

/// Copy `src` into `dst` across backends. Uses the destination backend's
/// asynchronous path when it has one; otherwise waits for both backends and
/// copies through the host.
pub fn tensor_copy_async(
    src_backend: &Backend,
    dst_backend: &Backend,
    src: &Tensor,
    dst: &Tensor,
) -> Result<()> {
    if dst_backend.cpy_tensor_async(src_backend, src, dst)? {
        return Ok(());
    }
    src_backend.synchronize()?;
    dst_backend.synchronize()?;
    tensor_copy(src, dst)
}
