//! Data types shared by the link engine and the device drivers.
//!
//! - Link status and counters
//! - Decoded telemetry frames
//! - Ordered frame fields

pub mod fields;
pub mod frame;
pub mod status;

pub use fields::Fields;
pub use frame::RadioFrame;
pub use status::LinkStatus;
