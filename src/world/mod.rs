//! Virtual road: route geometry and the physics that moves the rider along it.

pub mod physics;
pub mod route;

pub use physics::{distance_increment, virtual_speed, PhysicsModel};
pub use route::{RouteError, RouteFile, RouteGeometry, RoutePoint, RouteProfile};
