use core::fmt;

/// Validity of one tile instance, after the MOSI cache protocol
/// (the owned state is not used: the origin plays that role).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Mosi {
    /// No valid data.
    #[default]
    Invalid,
    /// Valid and read-only; other locations may also be shared.
    Shared,
    /// Valid and exclusively writable; every other location is invalid.
    Modified,
}

/// Coherency state of a tile instance.
///
/// `on_hold` is orthogonal to the validity: a held instance is pinned for an
/// in-flight kernel and cannot be evicted or invalidated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TileState {
    /// Validity
    pub mosi: Mosi,
    /// Pinned for an in-flight kernel
    pub on_hold: bool,
}

impl TileState {
    /// No instance, or an instance without valid data.
    pub const INVALID: TileState = TileState {
        mosi: Mosi::Invalid,
        on_hold: false,
    };

    /// Whether the instance holds valid data.
    pub fn is_valid(&self) -> bool {
        self.mosi != Mosi::Invalid
    }
}

impl fmt::Display for TileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let letter = match self.mosi {
            Mosi::Invalid => "I",
            Mosi::Shared => "S",
            Mosi::Modified => "M",
        };
        if self.on_hold {
            write!(f, "{letter}+H")
        } else {
            write!(f, "{letter}")
        }
    }
}
