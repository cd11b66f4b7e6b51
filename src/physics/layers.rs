//! Object layers and the narrow callback contracts a simulation calls into

use serde::{Deserialize, Serialize};

use super::backend::{BodyId, MotionType};

/// Broad collision category of a body
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectLayer {
    /// Static world geometry
    NonMoving,
    /// Kinematic and dynamic bodies
    Moving,
}

impl ObjectLayer {
    pub fn for_motion(motion: MotionType) -> Self {
        match motion {
            MotionType::Static => ObjectLayer::NonMoving,
            MotionType::Kinematic | MotionType::Dynamic => ObjectLayer::Moving,
        }
    }
}

/// Decides whether two layers can collide
pub trait ObjectLayerPairFilter: Send + Sync {
    fn should_collide(&self, a: ObjectLayer, b: ObjectLayer) -> bool;
}

/// Static geometry only collides with moving bodies; moving bodies collide
/// with everything
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultLayerFilter;

impl ObjectLayerPairFilter for DefaultLayerFilter {
    fn should_collide(&self, a: ObjectLayer, b: ObjectLayer) -> bool {
        match a {
            ObjectLayer::NonMoving => b == ObjectLayer::Moving,
            ObjectLayer::Moving => true,
        }
    }
}

/// Notified when a body wakes up or goes to sleep
pub trait BodyActivationListener: Send + Sync {
    fn on_activation_changed(&self, body: BodyId, active: bool);
}

/// Activation listener that only traces
#[derive(Clone, Copy, Debug, Default)]
pub struct LogActivationListener;

impl BodyActivationListener for LogActivationListener {
    fn on_activation_changed(&self, body: BodyId, active: bool) {
        log::trace!(
            "Body {:?} {}",
            body,
            if active { "activated" } else { "deactivated" }
        );
    }
}
