//! Seed shapes and the seed codec
//!
//! A shape is a pattern such as `"111101011101111"`: a `1` marks an
//! informative position, a `0` a position that is skipped. The codec maps the
//! reduced letters selected by a shape at one sequence offset to an integer
//! key. Three encodings are supported:
//!
//! - `SpacedFactor`: base-`size` accumulation over the informative letters
//!   (`key = key * size + letter`). Works for any shape and any reduction.
//! - `Contiguous`: letters packed at a fixed bit width. Requires a contiguous
//!   shape.
//! - `Hashed`: letters packed at a fixed bit width, then permuted by a bijective
//!   mixer inside the key width, so key partitions receive evenly spread keys
//!   without any collisions.
//!
//! The packed encodings need a reduction whose letters fit in four bits.

use crate::constants::{ceil_log2, MAX_SEED_WEIGHT, MAX_SHAPES, MAX_SHAPE_LENGTH, MASK_LETTER, REMAINDER_BITS};
use crate::encoding::Reduction;
use crate::error::{Location, Phase, Result, SeedError};
use crate::hasher::mix_bits;

/// Largest letter width supported by the packed encodings
pub const MAX_PACKED_LETTER_BITS: u32 = 4;

/// A seed shape
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shape {
    code: String,
    positions: Vec<u32>,
    length: u32,
}

impl Shape {
    /// Parse a shape from its `0`/`1` code
    ///
    /// # Errors
    /// `SeedError::Config` if the code contains other characters, starts or
    /// ends with `0`, or exceeds the supported length or weight.
    pub fn parse(code: &str) -> Result<Self> {
        let err = |detail: String| SeedError::config(Location::phase(Phase::Validate), detail);
        if code.is_empty() {
            return Err(err("empty shape code".to_string()));
        }
        if code.len() > MAX_SHAPE_LENGTH {
            return Err(err(format!(
                "shape {} is longer than {} positions",
                code, MAX_SHAPE_LENGTH
            )));
        }
        let mut positions = Vec::new();
        for (i, c) in code.bytes().enumerate() {
            match c {
                b'1' => positions.push(i as u32),
                b'0' => {}
                _ => return Err(err(format!("invalid character {:?} in shape {}", c as char, code))),
            }
        }
        if !code.starts_with('1') || !code.ends_with('1') {
            return Err(err(format!("shape {} must start and end with an informative position", code)));
        }
        if positions.len() > MAX_SEED_WEIGHT {
            return Err(err(format!(
                "shape {} has weight {} (maximum {})",
                code,
                positions.len(),
                MAX_SEED_WEIGHT
            )));
        }
        Ok(Self {
            code: code.to_string(),
            length: code.len() as u32,
            positions,
        })
    }

    /// A contiguous shape of the given weight
    pub fn contiguous(weight: usize) -> Result<Self> {
        Self::parse(&"1".repeat(weight))
    }

    /// The shape code
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Span of the shape in residues
    #[inline]
    pub fn length(&self) -> usize {
        self.length as usize
    }

    /// Number of informative positions
    #[inline]
    pub fn weight(&self) -> usize {
        self.positions.len()
    }

    /// Offsets of the informative positions
    #[inline]
    pub fn positions(&self) -> &[u32] {
        &self.positions
    }

    /// Whether every position is informative
    pub fn is_contiguous(&self) -> bool {
        self.weight() == self.length()
    }
}

impl std::fmt::Display for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.code)
    }
}

/// The active shapes, indexed by shape id
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ShapeSet {
    shapes: Vec<Shape>,
}

impl ShapeSet {
    /// Parse a set of shape codes
    pub fn from_codes<S: AsRef<str>>(codes: &[S]) -> Result<Self> {
        let shapes = codes
            .iter()
            .map(|c| Shape::parse(c.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Self::new(shapes)
    }

    /// Wrap parsed shapes
    pub fn new(shapes: Vec<Shape>) -> Result<Self> {
        if shapes.is_empty() {
            return Err(SeedError::config(Location::phase(Phase::Validate), "no shapes configured"));
        }
        if shapes.len() > MAX_SHAPES {
            return Err(SeedError::config(
                Location::phase(Phase::Validate),
                format!("{} shapes configured (maximum {})", shapes.len(), MAX_SHAPES),
            ));
        }
        Ok(Self { shapes })
    }

    /// Number of shapes
    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    /// Whether no shapes are configured
    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }

    /// Shape by id
    pub fn get(&self, shape_id: usize) -> Option<&Shape> {
        self.shapes.get(shape_id)
    }

    /// Iterate shapes in id order
    pub fn iter(&self) -> std::slice::Iter<'_, Shape> {
        self.shapes.iter()
    }

    /// Longest span over all shapes
    pub fn max_length(&self) -> usize {
        self.shapes.iter().map(Shape::length).max().unwrap_or(0)
    }
}

/// How informative letters are turned into a key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SeedEncoding {
    /// Base-`size` accumulation
    #[default]
    SpacedFactor,
    /// Packed letters permuted by a bijective mixer
    Hashed,
    /// Packed letters, contiguous shapes only
    Contiguous,
}

impl std::fmt::Display for SeedEncoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SeedEncoding::SpacedFactor => "spaced_factor",
            SeedEncoding::Hashed => "hashed",
            SeedEncoding::Contiguous => "contiguous",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for SeedEncoding {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "spaced_factor" => Ok(SeedEncoding::SpacedFactor),
            "hashed" => Ok(SeedEncoding::Hashed),
            "contiguous" => Ok(SeedEncoding::Contiguous),
            _ => Err(format!("unknown seed encoding: {}", s)),
        }
    }
}

/// Compiled key encoder for one shape
#[derive(Debug, Clone)]
pub struct SeedCodec {
    positions: Vec<u32>,
    length: usize,
    alphabet_size: u64,
    letter_bits: u32,
    key_bits: u32,
    encoding: SeedEncoding,
}

impl SeedCodec {
    /// Compile the codec for `shape` under `reduction` and `encoding`
    ///
    /// # Errors
    /// `SeedError::Config` for unsupported shape/encoding/alphabet combinations
    /// or keys wider than 64 bits.
    pub fn new(shape_id: usize, shape: &Shape, reduction: &Reduction, encoding: SeedEncoding) -> Result<Self> {
        let location = Location::phase(Phase::Validate).shape(shape_id);
        let alphabet_size = reduction.size() as u64;
        let letter_bits = reduction.bit_size();
        let weight = shape.weight() as u32;
        let key_bits = match encoding {
            SeedEncoding::SpacedFactor => {
                let space = alphabet_size.checked_pow(weight).ok_or_else(|| {
                    SeedError::config(
                        location,
                        format!("key space {}^{} does not fit in 64 bits", alphabet_size, weight),
                    )
                })?;
                ceil_log2(space) as u32
            }
            SeedEncoding::Hashed | SeedEncoding::Contiguous => {
                if letter_bits > MAX_PACKED_LETTER_BITS {
                    return Err(SeedError::config(
                        location,
                        format!(
                            "{} encoding needs letters of at most {} bits, reduction uses {}",
                            encoding, MAX_PACKED_LETTER_BITS, letter_bits
                        ),
                    ));
                }
                if encoding == SeedEncoding::Contiguous && !shape.is_contiguous() {
                    return Err(SeedError::config(
                        location,
                        format!("contiguous encoding is unsupported for spaced shape {}", shape),
                    ));
                }
                if weight * letter_bits > 64 {
                    return Err(SeedError::config(
                        location,
                        format!("packed key of shape {} needs {} bits", shape, weight * letter_bits),
                    ));
                }
                weight * letter_bits
            }
        };
        Ok(Self {
            positions: shape.positions().to_vec(),
            length: shape.length(),
            alphabet_size,
            letter_bits,
            key_bits,
            encoding,
        })
    }

    /// Span of the shape
    #[inline]
    pub fn length(&self) -> usize {
        self.length
    }

    /// Number of informative positions
    #[inline]
    pub fn weight(&self) -> usize {
        self.positions.len()
    }

    /// Bits needed to represent every key
    #[inline]
    pub fn key_bits(&self) -> u32 {
        self.key_bits
    }

    /// The encoding in effect
    pub fn encoding(&self) -> SeedEncoding {
        self.encoding
    }

    /// Check that keys split into `partition_bits` low bits and a 32-bit remainder
    pub fn check_partitioning(&self, shape_id: usize, partition_bits: u32) -> Result<()> {
        if self.key_bits > partition_bits + REMAINDER_BITS {
            return Err(SeedError::config(
                Location::phase(Phase::Validate).shape(shape_id),
                format!(
                    "{}-bit keys leave a remainder wider than {} bits with {} partition bits",
                    self.key_bits, REMAINDER_BITS, partition_bits
                ),
            ));
        }
        Ok(())
    }

    /// Encode the seed starting at `window[0]`.
    ///
    /// Returns `None` if the window is too short or an informative position
    /// holds the mask letter.
    #[inline]
    pub fn encode(&self, window: &[u8]) -> Option<u64> {
        if window.len() < self.length {
            return None;
        }
        match self.encoding {
            SeedEncoding::SpacedFactor => {
                let mut key = 0u64;
                for &p in &self.positions {
                    let letter = window[p as usize];
                    if letter == MASK_LETTER {
                        return None;
                    }
                    key = key * self.alphabet_size + letter as u64;
                }
                Some(key)
            }
            SeedEncoding::Contiguous => self.pack(window),
            SeedEncoding::Hashed => self.pack(window).map(|k| mix_bits(k, self.key_bits)),
        }
    }

    #[inline]
    fn pack(&self, window: &[u8]) -> Option<u64> {
        let mut key = 0u64;
        for &p in &self.positions {
            let letter = window[p as usize];
            if letter == MASK_LETTER {
                return None;
            }
            key = (key << self.letter_bits) | letter as u64;
        }
        Some(key)
    }

    /// Copy the informative letters of the window into `out`
    #[inline]
    pub fn informative_letters(&self, window: &[u8], out: &mut [u8; MAX_SEED_WEIGHT]) -> usize {
        for (slot, &p) in out.iter_mut().zip(&self.positions) {
            *slot = window[p as usize];
        }
        self.positions.len()
    }
}

/// Compile one codec per shape
pub fn compile_codecs(shapes: &ShapeSet, reduction: &Reduction, encoding: SeedEncoding) -> Result<Vec<SeedCodec>> {
    shapes
        .iter()
        .enumerate()
        .map(|(id, shape)| SeedCodec::new(id, shape, reduction, encoding))
        .collect()
}
