//! Graph execution with the reference kernels.
//!
//! Operands are read through their buffers, so any buffer the host can
//! read from works, not only CPU memory. Outputs are always F32; inputs may
//! be F32 or F16.

use half::f16;
use hal_core::{tensor_read, tensor_set, BackendError, DType, Graph, NodeRef, Op, Result, Tensor};
use rayon::ThreadPool;

use crate::kernels;

/// Whether the reference kernels can compute `node`.
pub fn supports_node(node: NodeRef<'_>) -> bool {
    !node.op().is_leaf()
        && node.tensor().dtype() == DType::F32
        && node
            .srcs()
            .all(|s| matches!(s.dtype(), DType::F32 | DType::F16))
}

/// Decode a tensor's contents to f32.
pub fn load_f32(tensor: &Tensor) -> Result<Vec<f32>> {
    let bytes = tensor_read(tensor)?;
    match tensor.dtype() {
        DType::F32 => Ok(bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect()),
        DType::F16 => Ok(bytes
            .chunks_exact(2)
            .map(|b| f16::from_le_bytes([b[0], b[1]]).to_f32())
            .collect()),
        other => Err(BackendError::Unsupported(format!(
            "cannot decode {other} tensor '{}'",
            tensor.name()
        ))),
    }
}

/// Encode f32 values into an F32 tensor.
pub fn store_f32(tensor: &Tensor, values: &[f32]) -> Result<()> {
    if tensor.dtype() != DType::F32 {
        return Err(BackendError::Unsupported(format!(
            "cannot store into {} tensor '{}'",
            tensor.dtype(),
            tensor.name()
        )));
    }
    let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
    tensor_set(tensor, &bytes, 0)
}

fn src<'g>(node: NodeRef<'g>, i: usize) -> Result<&'g Tensor> {
    node.src(i).ok_or_else(|| {
        BackendError::Other(format!("{} is missing source {i}", node.tensor().name()))
    })
}

/// Compute one node and write its output.
pub fn compute_node(pool: &ThreadPool, node: NodeRef<'_>) -> Result<()> {
    let out = node.tensor();
    let result = match node.op() {
        Op::None => return Ok(()),
        Op::Add => kernels::add(&load_f32(src(node, 0)?)?, &load_f32(src(node, 1)?)?)?,
        Op::Mul => kernels::mul(&load_f32(src(node, 0)?)?, &load_f32(src(node, 1)?)?)?,
        Op::Scale(s) => kernels::scale(&load_f32(src(node, 0)?)?, s),
        Op::MatMul => {
            let (a, b) = (src(node, 0)?, src(node, 1)?);
            let (m, k, n) = (a.shape().dim(0), a.shape().dim(1), b.shape().dim(1));
            kernels::matmul(pool, &load_f32(a)?, &load_f32(b)?, m, k, n)?
        }
        Op::RmsNorm { eps } => {
            let x = src(node, 0)?;
            let w = load_f32(src(node, 1)?)?;
            kernels::rms_norm(&load_f32(x)?, &w, eps, x.shape().row_len())?
        }
        Op::SoftMax => {
            let x = src(node, 0)?;
            kernels::softmax(&load_f32(x)?, x.shape().row_len())?
        }
        Op::Silu => kernels::silu(&load_f32(src(node, 0)?)?),
    };
    store_f32(out, &result)
}

/// Run every node of `graph` in order, stopping at the first failure.
/// Outputs of the nodes before it are left in place.
pub fn compute_graph(pool: &ThreadPool, graph: &Graph) -> Result<()> {
    for (i, &id) in graph.nodes().iter().enumerate() {
        let node = graph.node(id);
        let fail = |reason: String| BackendError::ExecutionFailure {
            node: i,
            op: node.op().to_string(),
            reason,
        };
        if !supports_node(node) {
            return Err(fail(format!("'{}' is not supported", node.tensor().name())));
        }
        compute_node(pool, node).map_err(|e| fail(e.to_string()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::CpuBufferType;
    use approx::assert_relative_eq;
    use hal_core::{alloc_graph_tensors, BufferType};

    fn pool() -> ThreadPool {
        rayon::ThreadPoolBuilder::new().num_threads(1).build().unwrap()
    }

    fn buft() -> BufferType {
        BufferType::new(CpuBufferType::new(32, usize::MAX))
    }

    fn set_f32(t: &Tensor, values: &[f32]) {
        store_f32(t, values).unwrap();
    }

    #[test]
    fn test_compute_mlp_block() {
        let mut g = Graph::new();
        let x = g.input("x", DType::F32, vec![1, 2]);
        let w = g.input("w", DType::F16, vec![2, 2]);
        let y = g.matmul(x, w).unwrap();
        let z = g.silu(y).unwrap();
        let _buf = alloc_graph_tensors(&mut g, &buft()).unwrap().unwrap();

        set_f32(g.tensor(x), &[1.0, 2.0]);
        let w_bytes: Vec<u8> = [1.0f32, 0.0, 0.0, -1.0]
            .iter()
            .flat_map(|&v| f16::from_f32(v).to_le_bytes())
            .collect();
        tensor_set(g.tensor(w), &w_bytes, 0).unwrap();

        compute_graph(&pool(), &g).unwrap();
        assert_eq!(load_f32(g.tensor(y)).unwrap(), vec![1.0, -2.0]);
        let out = load_f32(g.tensor(z)).unwrap();
        assert_relative_eq!(out[0], 0.731_058_6, epsilon = 1e-5);
        assert_relative_eq!(out[1], -2.0 / (1.0 + 2.0f32.exp()), epsilon = 1e-5);
    }

    #[test]
    fn test_unsupported_node_fails_after_earlier_outputs() {
        let mut g = Graph::new();
        let a = g.input("a", DType::F32, vec![4]);
        let q = g.input("q", DType::Q8_0, vec![32]);
        let s = g.scale(a, 2.0).unwrap();
        let qs = g.silu(q).unwrap();
        let _buf = alloc_graph_tensors(&mut g, &buft()).unwrap().unwrap();
        set_f32(g.tensor(a), &[1.0, 2.0, 3.0, 4.0]);

        assert!(!supports_node(g.node(qs)));
        let err = compute_graph(&pool(), &g).unwrap_err();
        assert!(matches!(err, BackendError::ExecutionFailure { node: 1, .. }));
        // the scale ran before the failure and its output stays valid
        assert_eq!(load_f32(g.tensor(s)).unwrap(), vec![2.0, 4.0, 6.0, 8.0]);
    }

    #[test]
    fn test_unallocated_operand_is_execution_failure() {
        let mut g = Graph::new();
        let a = g.input("a", DType::F32, vec![4]);
        g.silu(a).unwrap();
        assert!(matches!(
            compute_graph(&pool(), &g),
            Err(BackendError::ExecutionFailure { node: 0, .. })
        ));
    }
}
