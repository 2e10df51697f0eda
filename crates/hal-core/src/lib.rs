//! `hal-core` - Buffer, backend, device and registry contracts for running
//! tensor graphs on heterogeneous hardware.
//!
//! This crate provides:
//! - Tensor descriptors and a minimal compute `Graph`
//! - `BufferType`/`Buffer` memory contracts, multi-buffers and host regions
//! - A tensor allocator that sizes buffers from a graph
//! - The `Backend` execution contract with graph plans and events
//! - `Device` and `Registry` discovery, and the process-wide `Directory`
//!
//! Concrete devices live in their own crates and plug in by implementing
//! the `*Impl` traits.

pub mod allocator;
pub mod backend;
pub mod buffer;
pub mod buffer_type;
pub mod device;
pub mod directory;
pub mod dtype;
pub mod error;
pub mod event;
pub mod graph;
pub mod guid;
pub mod host;
pub mod log;
mod multi_buffer;
pub mod params;
pub mod registry;
pub mod shape;
pub mod tensor;
#[cfg(test)]
mod testing;

// Re-export primary types at the crate root for convenience.
pub use allocator::{alloc_graph_tensors, TensorAllocator};
pub use backend::{
    tensor_copy_async, Backend, BackendImpl, GraphPlan, PendingRead, PlanImpl, ReadCompleter,
};
pub use buffer::{
    check_tensor_range, tensor_copy, tensor_get, tensor_memset, tensor_read, tensor_set, Buffer,
    BufferImpl, BufferUsage,
};
pub use buffer_type::{align_up, BufferType, BufferTypeImpl};
pub use device::{Device, DeviceCaps, DeviceImpl, DeviceProps, DeviceType};
pub use directory::Directory;
pub use dtype::DType;
pub use error::{BackendError, ErrorClass, GraphError, Result};
pub use event::{Event, EventImpl};
pub use graph::{Graph, NodeRef, Topology};
pub use guid::Guid;
pub use host::{HostMemory, HostRegion};
pub use log::{LogCallback, LogLevel, LogSink};
pub use params::{parse_size, Params};
pub use registry::{ProcAddress, Registry, RegistryImpl};
pub use shape::Shape;
pub use tensor::{Op, Placement, Tensor, TensorId};
