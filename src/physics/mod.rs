//! Collision shapes, simulation backends and the physics system

pub mod collider;
pub mod layers;
pub mod backend;
pub mod system;

pub use collider::{ColliderBox, CollisionShape, VoxelColliderBuilder};
pub use layers::{BodyActivationListener, DefaultLayerFilter, LogActivationListener, ObjectLayer, ObjectLayerPairFilter};
pub use backend::{BasicSimulation, BodyDesc, BodyId, Contact, MotionType, SimulationBackend};
pub use system::{BodyHandle, BodyState, PhysicsSystem};
