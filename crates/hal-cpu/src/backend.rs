use std::any::Any;
use std::sync::Arc;

use hal_core::{
    BackendError, BackendImpl, Device, Event, Graph, GraphPlan, Guid, Params, PlanImpl, Result,
    Topology,
};
use parking_lot::RwLock;
use rayon::ThreadPool;

use crate::compute::{compute_graph, supports_node};

pub const CPU_GUID: Guid = Guid::from_bytes([
    0xaa, 0x67, 0xc7, 0x43, 0x96, 0xe6, 0xa3, 0x8a, 0xe3, 0xaf, 0xea, 0x92, 0x36, 0xbc, 0xfc, 0x89,
]);

struct Workers {
    n_threads: usize,
    pool: Arc<ThreadPool>,
}

fn build_pool(n_threads: usize) -> Result<Arc<ThreadPool>> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(n_threads)
        .thread_name(|i| format!("hal-cpu-{i}"))
        .build()
        .map(Arc::new)
        .map_err(|e| BackendError::InitializationFailure(format!("cpu thread pool: {e}")))
}

/// Synchronous backend running the reference kernels on a private thread
/// pool. The host is its stream: every call has completed when it returns.
pub struct CpuBackend {
    device: Device,
    workers: RwLock<Workers>,
}

impl CpuBackend {
    /// Accepted params: `n_threads=<n>`.
    pub(crate) fn new(device: Device, params: &str, default_threads: usize) -> Result<Self> {
        let params = Params::parse(params)?;
        params.expect_keys(&["n_threads"])?;
        let n_threads = params.get_usize("n_threads")?.unwrap_or(default_threads);
        if n_threads == 0 {
            return Err(BackendError::InvalidParams {
                params: "n_threads=0".into(),
                reason: "need at least one thread".into(),
            });
        }
        Ok(CpuBackend {
            device,
            workers: RwLock::new(Workers {
                n_threads,
                pool: build_pool(n_threads)?,
            }),
        })
    }

    pub fn n_threads(&self) -> usize {
        self.workers.read().n_threads
    }

    /// Resize the worker pool. Takes effect for the next computation.
    pub fn set_n_threads(&self, n_threads: usize) -> Result<()> {
        if n_threads == 0 {
            return Err(BackendError::Other("n_threads must be at least 1".into()));
        }
        let pool = build_pool(n_threads)?;
        *self.workers.write() = Workers { n_threads, pool };
        tracing::debug!("cpu backend now uses {n_threads} threads");
        Ok(())
    }

    fn pool(&self) -> Arc<ThreadPool> {
        self.workers.read().pool.clone()
    }
}

/// A graph validated once and reused for every run with the same topology.
pub struct CpuPlan {
    graph: Graph,
    topology: Topology,
}

impl CpuPlan {
    pub fn graph(&self) -> &Graph {
        &self.graph
    }
}

impl PlanImpl for CpuPlan {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

fn plan_of(plan: &GraphPlan) -> Result<&CpuPlan> {
    plan.downcast_ref::<CpuPlan>()
        .ok_or_else(|| BackendError::Foreign("graph plan".into()))
}

impl BackendImpl for CpuBackend {
    fn name(&self) -> &str {
        "CPU"
    }

    fn guid(&self) -> Guid {
        CPU_GUID
    }

    fn graph_plan_create(&self, graph: &Graph) -> Result<Box<dyn PlanImpl>> {
        if let Some(&id) = graph.nodes().iter().find(|&&id| !supports_node(graph.node(id))) {
            let node = graph.node(id);
            return Err(BackendError::Unsupported(format!(
                "cpu: {} node '{}'",
                node.op(),
                node.tensor().name()
            )));
        }
        Ok(Box::new(CpuPlan {
            topology: graph.topology(),
            graph: graph.clone(),
        }))
    }

    fn graph_plan_update(&self, plan: &mut GraphPlan, graph: &Graph) -> Result<()> {
        let plan = plan
            .downcast_mut::<CpuPlan>()
            .ok_or_else(|| BackendError::Foreign("graph plan".into()))?;
        let topology = graph.topology();
        if let Some(diff) = plan.topology.diff(&topology) {
            return Err(BackendError::TopologyMismatch(diff));
        }
        plan.graph = graph.clone();
        Ok(())
    }

    fn graph_plan_compute(&self, plan: &GraphPlan) -> Result<()> {
        compute_graph(&self.pool(), &plan_of(plan)?.graph)
    }

    fn graph_compute(&self, graph: &Graph) -> Result<()> {
        compute_graph(&self.pool(), graph)
    }

    /// The CPU device has no events of its own. Waiting on another device's
    /// event blocks the host, which is this backend's stream.
    fn event_wait(&self, event: &Event) -> Result<()> {
        if event.device().ptr_eq(&self.device) {
            return Err(BackendError::Unsupported("cpu: events".into()));
        }
        event.synchronize()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
