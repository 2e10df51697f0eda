//! Minimal compute graph used by the backend contracts.
//!
//! The graph owns its tensors; ops refer to their sources by [`TensorId`].
//! Nodes are kept in the order they were created, which is a valid
//! topological order since a node can only reference earlier tensors.

use crate::dtype::DType;
use crate::error::GraphError;
use crate::shape::Shape;
use crate::tensor::{Op, Tensor, TensorId};

#[derive(Debug, Clone, Default)]
pub struct Graph {
    tensors: Vec<Tensor>,
    nodes: Vec<TensorId>,
}

type GraphResult<T> = std::result::Result<T, GraphError>;

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a leaf tensor (input, weight or any data the caller provides).
    pub fn input(&mut self, name: impl Into<String>, dtype: DType, shape: impl Into<Shape>) -> TensorId {
        let id = TensorId(self.tensors.len());
        self.tensors.push(Tensor::new(name, dtype, shape));
        id
    }

    /// Element-wise `a + b`. Both operands must have the same shape.
    pub fn add(&mut self, a: TensorId, b: TensorId) -> GraphResult<TensorId> {
        self.binary(Op::Add, a, b)
    }

    /// Element-wise `a * b`. Both operands must have the same shape.
    pub fn mul(&mut self, a: TensorId, b: TensorId) -> GraphResult<TensorId> {
        self.binary(Op::Mul, a, b)
    }

    pub fn scale(&mut self, a: TensorId, s: f32) -> GraphResult<TensorId> {
        let shape = self.get(a)?.shape().clone();
        Ok(self.push_node(shape, Op::Scale(s), vec![a]))
    }

    /// Matrix product of `a` [m, k] and `b` [k, n], producing [m, n].
    pub fn matmul(&mut self, a: TensorId, b: TensorId) -> GraphResult<TensorId> {
        let (sa, sb) = (self.get(a)?.shape(), self.get(b)?.shape());
        if sa.ndim() != 2 || sb.ndim() != 2 {
            return Err(GraphError::Other("matmul requires 2D tensors".to_string()));
        }
        let (m, k, k2, n) = (sa.dim(0), sa.dim(1), sb.dim(0), sb.dim(1));
        if k != k2 {
            return Err(GraphError::MatmulMismatch { m, k, k2, n });
        }
        Ok(self.push_node(Shape::new(vec![m, n]), Op::MatMul, vec![a, b]))
    }

    /// RMS normalization of every row of `x`, scaled by `weight` (one value
    /// per row element).
    pub fn rms_norm(&mut self, x: TensorId, weight: TensorId, eps: f32) -> GraphResult<TensorId> {
        let shape = self.get(x)?.shape().clone();
        let wshape = self.get(weight)?.shape();
        if wshape.numel() != shape.row_len() {
            return Err(GraphError::ShapeMismatch {
                expected: vec![shape.row_len()],
                got: wshape.dims().to_vec(),
            });
        }
        Ok(self.push_node(shape, Op::RmsNorm { eps }, vec![x, weight]))
    }

    /// Row-wise softmax.
    pub fn softmax(&mut self, x: TensorId) -> GraphResult<TensorId> {
        let shape = self.get(x)?.shape().clone();
        Ok(self.push_node(shape, Op::SoftMax, vec![x]))
    }

    pub fn silu(&mut self, x: TensorId) -> GraphResult<TensorId> {
        let shape = self.get(x)?.shape().clone();
        Ok(self.push_node(shape, Op::Silu, vec![x]))
    }

    fn binary(&mut self, op: Op, a: TensorId, b: TensorId) -> GraphResult<TensorId> {
        let (sa, sb) = (self.get(a)?.shape(), self.get(b)?.shape());
        if sa != sb {
            return Err(GraphError::ShapeMismatch {
                expected: sa.dims().to_vec(),
                got: sb.dims().to_vec(),
            });
        }
        let shape = sa.clone();
        Ok(self.push_node(shape, op, vec![a, b]))
    }

    fn push_node(&mut self, shape: Shape, op: Op, src: Vec<TensorId>) -> TensorId {
        let id = TensorId(self.tensors.len());
        let name = format!("{}_{}", op.name(), id.0);
        self.tensors.push(Tensor::with_op(name, DType::F32, shape, op, src));
        self.nodes.push(id);
        id
    }

    pub fn get(&self, id: TensorId) -> GraphResult<&Tensor> {
        self.tensors
            .get(id.0)
            .ok_or(GraphError::UnknownTensor(id.0))
    }

    /// Returns the tensor for `id`.
    ///
    /// # Panics
    /// Panics if `id` does not come from this graph.
    pub fn tensor(&self, id: TensorId) -> &Tensor {
        &self.tensors[id.0]
    }

    /// # Panics
    /// Panics if `id` does not come from this graph.
    pub fn tensor_mut(&mut self, id: TensorId) -> &mut Tensor {
        &mut self.tensors[id.0]
    }

    /// Every tensor (leafs and nodes) in creation order.
    pub fn tensors(&self) -> impl Iterator<Item = (TensorId, &Tensor)> {
        self.tensors.iter().enumerate().map(|(i, t)| (TensorId(i), t))
    }

    pub fn tensors_mut(&mut self) -> impl Iterator<Item = (TensorId, &mut Tensor)> {
        self.tensors
            .iter_mut()
            .enumerate()
            .map(|(i, t)| (TensorId(i), t))
    }

    /// Op nodes in execution order.
    pub fn nodes(&self) -> &[TensorId] {
        &self.nodes
    }

    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn node(&self, id: TensorId) -> NodeRef<'_> {
        NodeRef { graph: self, id }
    }

    /// Structural fingerprint: op kinds, dtypes, shapes and connectivity.
    /// Op parameters such as a scale factor are not part of it.
    pub fn topology(&self) -> Topology {
        Topology(
            self.tensors
                .iter()
                .map(|t| NodeSignature {
                    op: t.op().name(),
                    dtype: t.dtype(),
                    dims: t.shape().dims().to_vec(),
                    src: t.src().iter().map(|s| s.0).collect(),
                })
                .collect(),
        )
    }
}

/// A node viewed together with the graph it belongs to, so its sources can
/// be inspected. This is what capability probes receive.
#[derive(Clone, Copy)]
pub struct NodeRef<'g> {
    graph: &'g Graph,
    id: TensorId,
}

impl<'g> NodeRef<'g> {
    pub fn id(&self) -> TensorId {
        self.id
    }

    pub fn tensor(&self) -> &'g Tensor {
        self.graph.tensor(self.id)
    }

    pub fn op(&self) -> Op {
        self.tensor().op()
    }

    pub fn src(&self, i: usize) -> Option<&'g Tensor> {
        self.tensor().src().get(i).map(|&s| self.graph.tensor(s))
    }

    pub fn srcs(&self) -> impl Iterator<Item = &'g Tensor> + 'g {
        let graph = self.graph;
        self.tensor().src().iter().map(move |&s| graph.tensor(s))
    }

    pub fn graph(&self) -> &'g Graph {
        self.graph
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct NodeSignature {
    op: &'static str,
    dtype: DType,
    dims: Vec<usize>,
    src: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology(Vec<NodeSignature>);

impl Topology {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Describes the first difference between two topologies, if any.
    pub fn diff(&self, other: &Topology) -> Option<String> {
        if self.0.len() != other.0.len() {
            return Some(format!(
                "tensor count {} != {}",
                self.0.len(),
                other.0.len()
            ));
        }
        self.0
            .iter()
            .zip(other.0.iter())
            .position(|(a, b)| a != b)
            .map(|i| {
                format!(
                    "tensor #{i}: {} {:?} {:?} != {} {:?} {:?}",
                    self.0[i].op,
                    self.0[i].dims,
                    self.0[i].src,
                    other.0[i].op,
                    other.0[i].dims,
                    other.0[i].src
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mlp() -> (Graph, TensorId) {
        let mut g = Graph::new();
        let x = g.input("x", DType::F32, vec![2, 4]);
        let w = g.input("w", DType::F16, vec![4, 3]);
        let y = g.matmul(x, w).unwrap();
        let z = g.silu(y).unwrap();
        (g, z)
    }

    #[test]
    fn test_build_graph() {
        let (g, z) = mlp();
        assert_eq!(g.n_nodes(), 2);
        assert_eq!(g.tensor(z).shape().dims(), &[2, 3]);
        assert_eq!(g.tensor(z).op(), Op::Silu);
        let node = g.node(g.nodes()[0]);
        assert_eq!(node.op(), Op::MatMul);
        assert_eq!(node.src(1).unwrap().dtype(), DType::F16);
        assert_eq!(node.srcs().count(), 2);
    }

    #[test]
    fn test_matmul_dimension_mismatch() {
        let mut g = Graph::new();
        let a = g.input("a", DType::F32, vec![1, 3]);
        let b = g.input("b", DType::F32, vec![2, 2]);
        assert!(matches!(
            g.matmul(a, b),
            Err(GraphError::MatmulMismatch { k: 3, k2: 2, .. })
        ));
    }

    #[test]
    fn test_binary_shape_mismatch() {
        let mut g = Graph::new();
        let a = g.input("a", DType::F32, vec![3]);
        let b = g.input("b", DType::F32, vec![4]);
        assert!(g.add(a, b).is_err());
    }

    #[test]
    fn test_rms_norm_weight_shape() {
        let mut g = Graph::new();
        let x = g.input("x", DType::F32, vec![2, 4]);
        let w = g.input("w", DType::F32, vec![3]);
        assert!(g.rms_norm(x, w, 1e-5).is_err());
    }

    #[test]
    fn test_unknown_tensor() {
        let mut g = Graph::new();
        assert_eq!(g.silu(TensorId(7)), Err(GraphError::UnknownTensor(7)));
    }

    #[test]
    fn test_topology_ignores_params() {
        let mut a = Graph::new();
        let x = a.input("x", DType::F32, vec![4]);
        a.scale(x, 2.0).unwrap();

        let mut b = Graph::new();
        let x = b.input("other", DType::F32, vec![4]);
        b.scale(x, 3.0).unwrap();

        assert_eq!(a.topology(), b.topology());
        assert!(a.topology().diff(&b.topology()).is_none());
    }

    #[test]
    fn test_topology_diff() {
        let (g, _) = mlp();
        let mut h = Graph::new();
        let x = h.input("x", DType::F32, vec![2, 4]);
        let w = h.input("w", DType::F16, vec![4, 3]);
        let y = h.matmul(x, w).unwrap();
        h.softmax(y).unwrap();

        let diff = g.topology().diff(&h.topology()).unwrap();
        assert!(diff.contains("silu"));
        assert!(diff.contains("softmax"));
    }
}
