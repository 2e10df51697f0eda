use std::any::Any;
use std::time::Duration;

use hal_core::{
    Backend, BackendError, BackendImpl, Event, Graph, GraphPlan, Guid, Params, PendingRead,
    PlanImpl, Result, Tensor, Topology,
};
use hal_cpu::compute::supports_node;

use crate::buffer::SimBuffer;
use crate::event::{EventState, SimEvent};
use crate::stream::{Command, Stream};

pub const SIM_GUID: Guid = Guid::from_bytes([
    0x5c, 0x1d, 0x0e, 0x7a, 0x42, 0x9b, 0x4f, 0x1c, 0x8d, 0x36, 0xe0, 0x5a, 0x21, 0x7f, 0xc4, 0x93,
]);

pub const DEFAULT_STREAM_THREADS: usize = 2;

/// Asynchronous backend of a simulated device. Transfers and computations
/// are queued on the backend's stream and return immediately.
pub struct SimBackend {
    name: String,
    stream: Stream,
}

impl SimBackend {
    /// Accepted params: `n_threads=<n>` for the stream's compute pool.
    pub(crate) fn new(name: &str, params: &str, latency: Duration) -> Result<Self> {
        let parsed = Params::parse(params)?;
        parsed.expect_keys(&["n_threads"])?;
        let n_threads = parsed
            .get_usize("n_threads")?
            .unwrap_or(DEFAULT_STREAM_THREADS);
        if n_threads == 0 {
            return Err(BackendError::InvalidParams {
                params: params.to_string(),
                reason: "need at least one thread".into(),
            });
        }
        Ok(SimBackend {
            stream: Stream::spawn(name, latency, n_threads)?,
            name: name.to_string(),
        })
    }
}

fn in_sim_memory(tensor: &Tensor) -> bool {
    tensor
        .buffer()
        .is_some_and(|b| b.downcast_ref::<SimBuffer>().is_some())
}

fn sim_event(event: &Event) -> Result<&SimEvent> {
    event
        .downcast_ref::<SimEvent>()
        .ok_or_else(|| BackendError::Foreign(format!("event of device '{}'", event.device().name())))
}

pub struct SimPlan {
    graph: Graph,
    topology: Topology,
}

impl PlanImpl for SimPlan {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl BackendImpl for SimBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn guid(&self) -> Guid {
        SIM_GUID
    }

    fn set_tensor_async(&self, tensor: &Tensor, data: &[u8], offset: usize) -> Result<()> {
        self.stream.submit(Command::Write {
            tensor: tensor.clone(),
            data: data.to_vec(),
            offset,
        })
    }

    fn get_tensor_async(&self, tensor: &Tensor, offset: usize, len: usize) -> Result<PendingRead> {
        let (done, read) = PendingRead::channel();
        self.stream.submit(Command::Read {
            tensor: tensor.clone(),
            offset,
            len,
            done,
        })?;
        Ok(read)
    }

    /// On-stream copy between simulated backends. The copy waits for every
    /// command the source backend had queued when this call was made.
    fn cpy_tensor_async(&self, src_backend: &Backend, src: &Tensor, dst: &Tensor) -> Result<bool> {
        let Some(src_sim) = src_backend.downcast_ref::<SimBackend>() else {
            return Ok(false);
        };
        if !in_sim_memory(src) || !in_sim_memory(dst) {
            return Ok(false);
        }
        if !std::ptr::eq(src_sim, self) {
            let ready = EventState::new();
            let generation = src_sim.stream.signal(&ready)?;
            self.stream.wait(&ready, generation)?;
        }
        self.stream.submit(Command::Copy {
            src: src.clone(),
            dst: dst.clone(),
        })?;
        Ok(true)
    }

    fn synchronize(&self) -> Result<()> {
        self.stream.flush()
    }

    fn graph_plan_create(&self, graph: &Graph) -> Result<Box<dyn PlanImpl>> {
        if let Some(&id) = graph.nodes().iter().find(|&&id| !supports_node(graph.node(id))) {
            return Err(BackendError::Unsupported(format!(
                "{}: {} node '{}'",
                self.name,
                graph.node(id).op(),
                graph.tensor(id).name()
            )));
        }
        Ok(Box::new(SimPlan {
            topology: graph.topology(),
            graph: graph.clone(),
        }))
    }

    fn graph_plan_update(&self, plan: &mut GraphPlan, graph: &Graph) -> Result<()> {
        let plan = plan
            .downcast_mut::<SimPlan>()
            .ok_or_else(|| BackendError::Foreign("graph plan".into()))?;
        if let Some(diff) = plan.topology.diff(&graph.topology()) {
            return Err(BackendError::TopologyMismatch(diff));
        }
        plan.graph = graph.clone();
        Ok(())
    }

    fn graph_plan_compute(&self, plan: &GraphPlan) -> Result<()> {
        let plan = plan
            .downcast_ref::<SimPlan>()
            .ok_or_else(|| BackendError::Foreign("graph plan".into()))?;
        self.stream.submit(Command::Compute {
            graph: plan.graph.clone(),
        })
    }

    /// Queues the graph. Failures surface on the next `synchronize`.
    fn graph_compute(&self, graph: &Graph) -> Result<()> {
        self.stream.submit(Command::Compute {
            graph: graph.clone(),
        })
    }

    fn event_record(&self, event: &Event) -> Result<()> {
        self.stream.signal(sim_event(event)?.state()).map(|_| ())
    }

    /// Waits on simulated events are queued on the stream. Any other kind
    /// of event is awaited on the host before this call returns.
    fn event_wait(&self, event: &Event) -> Result<()> {
        match event.downcast_ref::<SimEvent>() {
            Some(sim) => {
                let generation = sim.state().target()?;
                self.stream.wait(sim.state(), generation)
            }
            None => event.synchronize(),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for SimBackend {
    fn drop(&mut self) {
        tracing::debug!("{}: draining stream", self.name);
    }
}
