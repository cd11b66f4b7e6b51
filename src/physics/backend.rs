//! Simulation backends.
//!
//! [`SimulationBackend`] is the narrow contract the physics system drives; a
//! full rigid-body engine plugs in behind it. [`BasicSimulation`] is the
//! built-in backend: gravity integration, AABB contacts filtered by object
//! layer, push-out of dynamic bodies from non-dynamic ones, and sleeping.

use std::sync::Arc;

use glam::{Quat, Vec3};

use super::collider::CollisionShape;
use super::layers::{BodyActivationListener, ObjectLayer, ObjectLayerPairFilter};
use crate::core::types::Transform;
use crate::math::Aabb;

/// How a body moves
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum MotionType {
    /// Never moves
    Static,
    /// Moved by the engine, pushes dynamic bodies
    Kinematic,
    /// Moved by the simulation
    Dynamic,
}

/// Backend-side body slot identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BodyId(pub u32);

/// Everything needed to create a body
#[derive(Clone, Debug)]
pub struct BodyDesc {
    pub shape: Arc<CollisionShape>,
    pub transform: Transform,
    pub motion: MotionType,
    pub layer: ObjectLayer,
    pub sensor: bool,
}

/// Overlapping pair found during the last step, `a < b`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Contact {
    pub a: BodyId,
    pub b: BodyId,
}

/// Contract between the physics system and a simulation engine.
///
/// All calls come from one thread. Ids passed in are always live; the
/// physics system checks handles before calling.
pub trait SimulationBackend: Send {
    /// Body slots available in total
    fn capacity(&self) -> usize;
    fn body_count(&self) -> usize;

    /// Create a body; `None` when the slot budget is exhausted
    fn create_body(&mut self, desc: BodyDesc) -> Option<BodyId>;
    fn destroy_body(&mut self, id: BodyId);

    fn shape(&self, id: BodyId) -> &Arc<CollisionShape>;
    fn set_shape(&mut self, id: BodyId, shape: Arc<CollisionShape>);

    fn transform(&self, id: BodyId) -> Transform;
    fn set_transform(&mut self, id: BodyId, transform: Transform);

    fn motion_type(&self, id: BodyId) -> MotionType;
    fn set_motion_type(&mut self, id: BodyId, motion: MotionType, layer: ObjectLayer);

    fn is_sensor(&self, id: BodyId) -> bool;
    fn set_sensor(&mut self, id: BodyId, sensor: bool);

    fn linear_velocity(&self, id: BodyId) -> Vec3;
    fn set_linear_velocity(&mut self, id: BodyId, velocity: Vec3);
    fn angular_velocity(&self, id: BodyId) -> Vec3;
    fn set_angular_velocity(&mut self, id: BodyId, velocity: Vec3);

    fn is_active(&self, id: BodyId) -> bool;

    /// Advance by exactly `dt` seconds
    fn step(&mut self, dt: f32);

    /// Contacts found by the last `step`
    fn contacts(&self) -> &[Contact];
}

/// Linear speed below which a body starts counting towards sleep
const SLEEP_SPEED: f32 = 0.05;
/// Seconds below `SLEEP_SPEED` before a body sleeps
const SLEEP_TIME: f32 = 0.5;

struct SimBody {
    shape: Arc<CollisionShape>,
    local_bounds: Aabb,
    transform: Transform,
    motion: MotionType,
    layer: ObjectLayer,
    sensor: bool,
    linear: Vec3,
    angular: Vec3,
    active: bool,
    still_time: f32,
}

impl SimBody {
    fn world_bounds(&self) -> Aabb {
        if self.local_bounds.is_empty() {
            return Aabb::EMPTY;
        }
        let (min, max) = (self.local_bounds.min, self.local_bounds.max);
        Aabb::from_points((0..8).map(|i| {
            let corner = Vec3::new(
                if i & 1 == 0 { min.x } else { max.x },
                if i & 2 == 0 { min.y } else { max.y },
                if i & 4 == 0 { min.z } else { max.z },
            );
            self.transform.transform_point(corner)
        }))
    }
}

/// Built-in simulation backend
pub struct BasicSimulation {
    capacity: usize,
    gravity: Vec3,
    bodies: Vec<Option<SimBody>>,
    free_slots: Vec<u32>,
    count: usize,
    contacts: Vec<Contact>,
    filter: Box<dyn ObjectLayerPairFilter>,
    listener: Box<dyn BodyActivationListener>,
}

impl BasicSimulation {
    pub fn new(
        capacity: usize,
        gravity: Vec3,
        filter: Box<dyn ObjectLayerPairFilter>,
        listener: Box<dyn BodyActivationListener>,
    ) -> Self {
        Self {
            capacity,
            gravity,
            bodies: Vec::new(),
            free_slots: Vec::new(),
            count: 0,
            contacts: Vec::new(),
            filter,
            listener,
        }
    }

    fn body(&self, id: BodyId) -> &SimBody {
        match self.bodies.get(id.0 as usize) {
            Some(Some(body)) => body,
            _ => panic!("BasicSimulation: body {:?} does not exist", id),
        }
    }

    fn body_mut(&mut self, id: BodyId) -> &mut SimBody {
        match self.bodies.get_mut(id.0 as usize) {
            Some(Some(body)) => body,
            _ => panic!("BasicSimulation: body {:?} does not exist", id),
        }
    }

    fn set_active(&mut self, id: BodyId, active: bool) {
        let body = self.body_mut(id);
        body.still_time = 0.0;
        if body.active != active {
            body.active = active;
            self.listener.on_activation_changed(id, active);
        }
    }

    fn wake(&mut self, id: BodyId) {
        if self.body(id).motion != MotionType::Static {
            self.set_active(id, true);
        }
    }

    fn integrate(&mut self, dt: f32) {
        for body in self.bodies.iter_mut().flatten() {
            if !body.active {
                continue;
            }
            if body.motion == MotionType::Dynamic {
                body.linear += self.gravity * dt;
            }
            if body.motion != MotionType::Static {
                body.transform.translation += body.linear * dt;
                let spin = Quat::from_scaled_axis(body.angular * dt);
                body.transform.rotation = (spin * body.transform.rotation).normalize();
            }
        }
    }

    /// Find overlapping pairs and push dynamic bodies out of solid ones
    fn collide(&mut self) {
        self.contacts.clear();
        let bounds: Vec<Option<Aabb>> = self
            .bodies
            .iter()
            .map(|b| b.as_ref().map(SimBody::world_bounds))
            .collect();

        for i in 0..self.bodies.len() {
            for j in i + 1..self.bodies.len() {
                let (Some(bi), Some(bj)) = (&bounds[i], &bounds[j]) else {
                    continue;
                };
                if bi.is_empty() || bj.is_empty() || !bi.overlaps(bj) {
                    continue;
                }
                let (Some(a), Some(b)) = (&self.bodies[i], &self.bodies[j]) else {
                    continue;
                };
                if !a.active && !b.active {
                    continue;
                }
                if !self.filter.should_collide(a.layer, b.layer) {
                    continue;
                }
                self.contacts.push(Contact {
                    a: BodyId(i as u32),
                    b: BodyId(j as u32),
                });
                if a.sensor || b.sensor {
                    continue;
                }

                // Dynamic pairs only report; the solver is the engine's job
                let (dynamic, dyn_bounds, solid_bounds) = match (a.motion, b.motion) {
                    (MotionType::Dynamic, m) if m != MotionType::Dynamic => (i, *bi, *bj),
                    (m, MotionType::Dynamic) if m != MotionType::Dynamic => (j, *bj, *bi),
                    _ => continue,
                };
                self.push_out(dynamic, &dyn_bounds, &solid_bounds);
            }
        }
    }

    fn push_out(&mut self, index: usize, body_bounds: &Aabb, solid: &Aabb) {
        let overlap = body_bounds.max.min(solid.max) - body_bounds.min.max(solid.min);
        let axis = if overlap.x <= overlap.y && overlap.x <= overlap.z {
            0
        } else if overlap.y <= overlap.z {
            1
        } else {
            2
        };
        let dir = if body_bounds.center()[axis] >= solid.center()[axis] { 1.0 } else { -1.0 };

        if let Some(body) = self.bodies[index].as_mut() {
            body.transform.translation[axis] += overlap[axis] * dir;
            if body.linear[axis] * dir < 0.0 {
                body.linear[axis] = 0.0;
            }
        }
    }

    fn update_sleep(&mut self, dt: f32) {
        let mut sleepers = Vec::new();
        for (i, body) in self.bodies.iter_mut().enumerate() {
            let Some(body) = body else { continue };
            if !body.active || body.motion != MotionType::Dynamic {
                continue;
            }
            if body.linear.length() < SLEEP_SPEED && body.angular.length() < SLEEP_SPEED {
                body.still_time += dt;
                if body.still_time >= SLEEP_TIME {
                    sleepers.push(BodyId(i as u32));
                }
            } else {
                body.still_time = 0.0;
            }
        }
        for id in sleepers {
            let body = self.body_mut(id);
            body.linear = Vec3::ZERO;
            body.angular = Vec3::ZERO;
            self.set_active(id, false);
        }
    }
}

impl SimulationBackend for BasicSimulation {
    fn capacity(&self) -> usize {
        self.capacity
    }

    fn body_count(&self) -> usize {
        self.count
    }

    fn create_body(&mut self, desc: BodyDesc) -> Option<BodyId> {
        if self.count >= self.capacity {
            return None;
        }
        let active = desc.motion != MotionType::Static;
        let body = SimBody {
            local_bounds: desc.shape.bounds(),
            shape: desc.shape,
            transform: desc.transform,
            motion: desc.motion,
            layer: desc.layer,
            sensor: desc.sensor,
            linear: Vec3::ZERO,
            angular: Vec3::ZERO,
            active,
            still_time: 0.0,
        };

        let id = match self.free_slots.pop() {
            Some(slot) => {
                self.bodies[slot as usize] = Some(body);
                BodyId(slot)
            }
            None => {
                self.bodies.push(Some(body));
                BodyId(self.bodies.len() as u32 - 1)
            }
        };
        self.count += 1;
        if active {
            self.listener.on_activation_changed(id, true);
        }
        Some(id)
    }

    fn destroy_body(&mut self, id: BodyId) {
        if let Some(slot) = self.bodies.get_mut(id.0 as usize) {
            if slot.take().is_some() {
                self.free_slots.push(id.0);
                self.count -= 1;
            }
        }
    }

    fn shape(&self, id: BodyId) -> &Arc<CollisionShape> {
        &self.body(id).shape
    }

    fn set_shape(&mut self, id: BodyId, shape: Arc<CollisionShape>) {
        let body = self.body_mut(id);
        body.local_bounds = shape.bounds();
        body.shape = shape;
        self.wake(id);
    }

    fn transform(&self, id: BodyId) -> Transform {
        self.body(id).transform
    }

    fn set_transform(&mut self, id: BodyId, transform: Transform) {
        self.body_mut(id).transform = transform;
    }

    fn motion_type(&self, id: BodyId) -> MotionType {
        self.body(id).motion
    }

    fn set_motion_type(&mut self, id: BodyId, motion: MotionType, layer: ObjectLayer) {
        let body = self.body_mut(id);
        body.motion = motion;
        body.layer = layer;
        if motion != MotionType::Dynamic {
            body.linear = Vec3::ZERO;
            body.angular = Vec3::ZERO;
        }
        if motion == MotionType::Static {
            self.set_active(id, false);
        } else {
            self.set_active(id, true);
        }
    }

    fn is_sensor(&self, id: BodyId) -> bool {
        self.body(id).sensor
    }

    fn set_sensor(&mut self, id: BodyId, sensor: bool) {
        self.body_mut(id).sensor = sensor;
    }

    fn linear_velocity(&self, id: BodyId) -> Vec3 {
        self.body(id).linear
    }

    fn set_linear_velocity(&mut self, id: BodyId, velocity: Vec3) {
        if self.body(id).motion == MotionType::Static {
            return;
        }
        self.body_mut(id).linear = velocity;
        self.wake(id);
    }

    fn angular_velocity(&self, id: BodyId) -> Vec3 {
        self.body(id).angular
    }

    fn set_angular_velocity(&mut self, id: BodyId, velocity: Vec3) {
        if self.body(id).motion == MotionType::Static {
            return;
        }
        self.body_mut(id).angular = velocity;
        self.wake(id);
    }

    fn is_active(&self, id: BodyId) -> bool {
        self.body(id).active
    }

    fn step(&mut self, dt: f32) {
        self.integrate(dt);
        self.collide();
        self.update_sleep(dt);
    }

    fn contacts(&self) -> &[Contact] {
        &self.contacts
    }
}
