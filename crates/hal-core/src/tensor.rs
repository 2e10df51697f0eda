use std::fmt;

use crate::buffer::Buffer;
use crate::dtype::DType;
use crate::shape::Shape;

/// Index of a tensor inside the [`Graph`](crate::graph::Graph) that owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TensorId(pub(crate) usize);

impl TensorId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for TensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Operation producing a tensor. `None` marks a leaf (input or weight).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Op {
    None,
    Add,
    Mul,
    Scale(f32),
    MatMul,
    RmsNorm { eps: f32 },
    SoftMax,
    Silu,
}

impl Op {
    pub fn name(&self) -> &'static str {
        match self {
            Op::None => "none",
            Op::Add => "add",
            Op::Mul => "mul",
            Op::Scale(_) => "scale",
            Op::MatMul => "matmul",
            Op::RmsNorm { .. } => "rms_norm",
            Op::SoftMax => "softmax",
            Op::Silu => "silu",
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Op::None)
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Where a tensor's bytes live: a buffer and a byte offset inside it.
#[derive(Debug, Clone)]
pub struct Placement {
    pub buffer: Buffer,
    pub offset: usize,
}

/// Tensor descriptor: element type, shape, producing op and, once
/// allocated, its placement in a [`Buffer`].
///
/// The descriptor never owns data. Cloning it is cheap and the clone refers
/// to the same bytes, which is what lets backends queue work on tensors.
#[derive(Debug, Clone)]
pub struct Tensor {
    name: String,
    dtype: DType,
    shape: Shape,
    op: Op,
    src: Vec<TensorId>,
    placement: Option<Placement>,
}

impl Tensor {
    /// Create an unallocated leaf tensor.
    pub fn new(name: impl Into<String>, dtype: DType, shape: impl Into<Shape>) -> Self {
        Tensor::with_op(name, dtype, shape.into(), Op::None, Vec::new())
    }

    pub(crate) fn with_op(
        name: impl Into<String>,
        dtype: DType,
        shape: Shape,
        op: Op,
        src: Vec<TensorId>,
    ) -> Self {
        Tensor {
            name: name.into(),
            dtype,
            shape,
            op,
            src,
            placement: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn op(&self) -> Op {
        self.op
    }

    /// Sources of this tensor's op, as ids in the owning graph.
    pub fn src(&self) -> &[TensorId] {
        &self.src
    }

    pub fn numel(&self) -> usize {
        self.shape.numel()
    }

    /// Logical byte size of the tensor data, without any buffer padding.
    pub fn nbytes(&self) -> usize {
        self.dtype.row_size(self.shape.row_len()) * self.shape.n_rows()
    }

    pub fn placement(&self) -> Option<&Placement> {
        self.placement.as_ref()
    }

    pub fn buffer(&self) -> Option<&Buffer> {
        self.placement.as_ref().map(|p| &p.buffer)
    }

    /// Byte offset of the tensor inside its buffer.
    pub fn offset(&self) -> Option<usize> {
        self.placement.as_ref().map(|p| p.offset)
    }

    pub fn is_allocated(&self) -> bool {
        self.placement.is_some()
    }

    /// Detach the tensor from its buffer. The bytes stay where they are.
    pub fn unbind(&mut self) {
        self.placement = None;
    }

    pub(crate) fn bind(&mut self, buffer: Buffer, offset: usize) {
        self.placement = Some(Placement { buffer, offset });
    }
}
