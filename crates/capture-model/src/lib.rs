//! Swingcast Capture Model
//!
//! Defines the data contracts shared by the capture pipeline:
//! - **Crop:** the logical capture rectangle and its 16:9 stepping rules
//! - **Geometry:** live capture dimensions and the pure crop resolver
//! - **Broadcast:** element rectangles announced by the analyzer surface
//! - **Session:** recording states, duration warnings, and recorded segments
//! - **Catalog / Submission:** reference data attached to an upload
//!
//! Nothing in this crate touches media hardware. The resolver and crop
//! stepping are pure and covered by property tests.

pub mod broadcast;
pub mod catalog;
pub mod crop;
pub mod geometry;
pub mod session;
pub mod submission;

pub use broadcast::*;
pub use catalog::*;
pub use crop::*;
pub use geometry::*;
pub use session::*;
pub use submission::*;
