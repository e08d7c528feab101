//! Component definitions attached to owner entities.
//!
//! An owner carries a [`CommodityTracker`] plus the collaborators the engine
//! calls into. [`SimInstance`] marks owners that are currently instanced.

mod status;
mod tracker;

pub use status::*;
pub use tracker::CommodityTracker;
pub(crate) use tracker::TrackerOwner;
