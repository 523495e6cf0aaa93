//! Concrete geometry payloads and the small amount of vector math they need.

mod core;
mod mesh;
mod point_set;

pub use self::core::{BBox, Vec3};
pub use mesh::MeshPayload;
pub use point_set::PointSetPayload;
