use std::fmt;

/// Storage format of tensor elements. Quantized formats pack fixed-size
/// blocks of 32 elements, each with its own F16 scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    F32,
    F16,
    Q4_0,
    Q8_0,
}

impl DType {
    pub const ALL: [DType; 4] = [DType::F32, DType::F16, DType::Q4_0, DType::Q8_0];

    /// `(elements, bytes)` of the smallest addressable unit.
    fn layout(self) -> (usize, usize) {
        match self {
            DType::F32 => (1, 4),
            DType::F16 => (1, 2),
            DType::Q4_0 => (32, 2 + 16),
            DType::Q8_0 => (32, 2 + 32),
        }
    }

    /// Bytes of one element, or of one block for quantized formats.
    pub fn size_in_bytes(&self) -> usize {
        self.layout().1
    }

    /// Elements per block; 1 for plain formats.
    pub fn block_size(&self) -> usize {
        self.layout().0
    }

    pub fn is_quantized(&self) -> bool {
        self.block_size() > 1
    }

    /// Bytes of a row of `n` elements. A trailing partial block costs a
    /// whole one.
    pub fn row_size(&self, n: usize) -> usize {
        let (elems, bytes) = self.layout();
        n.div_ceil(elems) * bytes
    }

    pub fn name(&self) -> &'static str {
        match self {
            DType::F32 => "f32",
            DType::F16 => "f16",
            DType::Q4_0 => "q4_0",
            DType::Q8_0 => "q8_0",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
