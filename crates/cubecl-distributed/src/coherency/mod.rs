//! Tile coherency directory.
//!
//! Tracks, for every tile coordinate, which locations (host, device k) hold an
//! instance and whether that instance is valid. Copies between locations happen
//! only here, on demand, when a location without valid data is acquired.

mod directory;
mod node;
mod state;

pub use directory::*;
pub use node::TileNode;
pub use state::*;
