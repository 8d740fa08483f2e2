use serde::{Deserialize, Serialize};

/// Which viewer variant drives the core.
///
/// `Volume` keeps the whole stack resident in two 3D textures and only
/// changes the clip box at runtime. `Slice` streams one plane pair into two
/// 2D textures every time the depth cut moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
    #[default]
    Volume,
    Slice,
}

impl ViewMode {
    pub fn dimensionality(self) -> Dimensionality {
        match self {
            ViewMode::Volume => Dimensionality::Three,
            ViewMode::Slice => Dimensionality::Two,
        }
    }

    pub fn projection(self) -> ProjectionKind {
        match self {
            ViewMode::Volume => ProjectionKind::Perspective,
            ViewMode::Slice => ProjectionKind::Orthographic,
        }
    }
}

/// One of the two interleaved channels of a plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    R = 0,
    G = 1,
}

impl Channel {
    pub const ALL: [Channel; 2] = [Channel::R, Channel::G];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimensionality {
    Two,
    Three,
}

impl Dimensionality {
    /// Floats per position / texture coordinate attribute.
    pub fn components(self) -> usize {
        match self {
            Dimensionality::Two => 2,
            Dimensionality::Three => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectionKind {
    Perspective,
    Orthographic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DragButton {
    Left,
    Right,
}
