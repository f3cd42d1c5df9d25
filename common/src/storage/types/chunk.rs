use std::fmt;

use serde::{Deserialize, Serialize};

/// Position of a text block in page coordinate space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl BoundingBox {
    pub fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    /// Smallest box containing both `self` and `other`.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        Self {
            x0: self.x0.min(other.x0),
            y0: self.y0.min(other.y0),
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
        }
    }

    /// Canonical store encoding, `[x0, y0, x1, y1]`.
    pub fn encode(&self) -> String {
        self.to_string()
    }

    /// Parses the canonical encoding. Parenthesised tuples are accepted too;
    /// anything else decodes to `None`.
    pub fn decode(raw: &str) -> Option<Self> {
        let inner = raw
            .trim()
            .trim_start_matches(['[', '('])
            .trim_end_matches([']', ')']);
        let values: Vec<f32> = inner
            .split(',')
            .map(|part| part.trim().parse::<f32>())
            .collect::<Result<_, _>>()
            .ok()?;

        match values.as_slice() {
            [x0, y0, x1, y1] if values.iter().all(|v| v.is_finite()) => {
                Some(Self::new(*x0, *y0, *x1, *y1))
            }
            _ => None,
        }
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}, {}, {}]", self.x0, self.y0, self.x1, self.y1)
    }
}

/// Encodes an optional box; unknown positions are stored as the empty string.
pub fn encode_bbox(bbox: Option<&BoundingBox>) -> String {
    bbox.map(BoundingBox::encode).unwrap_or_default()
}

/// A unit of extracted text with page provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub page: u32,
    pub bbox: Option<BoundingBox>,
}

impl Chunk {
    /// Minimum trimmed length a block needs to become a chunk.
    pub const MIN_TEXT_CHARS: usize = 2;

    /// Builds a chunk when the text is substantial and the page is valid.
    pub fn new(text: impl Into<String>, page: u32, bbox: Option<BoundingBox>) -> Option<Self> {
        let text = text.into();
        let trimmed = text.trim();
        if page == 0 || trimmed.chars().count() < Self::MIN_TEXT_CHARS {
            return None;
        }
        Some(Self {
            text: trimmed.to_string(),
            page,
            bbox,
        })
    }
}

/// Scalar metadata stored next to every vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub source: String,
    pub page: u32,
    pub bbox: String,
}

impl ChunkMetadata {
    pub fn for_chunk(source: &str, chunk: &Chunk) -> Self {
        Self {
            source: source.to_string(),
            page: chunk.page,
            bbox: encode_bbox(chunk.bbox.as_ref()),
        }
    }

    pub fn decoded_bbox(&self) -> Option<BoundingBox> {
        BoundingBox::decode(&self.bbox)
    }
}
