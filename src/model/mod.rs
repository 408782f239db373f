//! Documents the control plane reads and moves: aimpoints, selection
//! overlays, and the two bus payloads (fetch orders and outcomes).

mod aimpoint;
mod order;
mod overlay;

pub use aimpoint::{
    Aimpoint, AimpointError, CollectionType, HourRange, TranscodeOptions, WorkingHours,
};
pub use order::{FetchOrder, OrderOverrides, OutcomeMessage};
pub use overlay::{SelectionOverlay, StatusToken};
