//! # Corpuscular
//!
//! Corpuscular is a real-time, constraint-based particle physics engine for
//! spherical bodies, built on Verlet integration and spatial hashing.
//!
//! ## Goals
//!
//! The main goal of this crate is to provide a small, predictable core for
//! soft-body and granular scenes that can be driven by an external real-time
//! loop. It does not include rendering or input handling and instead only
//! focuses on integration, collision resolution and constraint solving.
//!
//! All corrections are positional: collision response, containment and
//! distance constraints compose without a velocity solver, and a substepped
//! pipeline keeps the approximate resolution visually stable.
//!
//! Corpuscular can resolve collisions in parallel on the CPU thanks to
//! [rayon](https://github.com/rayon-rs/rayon). Enable the `parallel` feature
//! to use it. Collision resolution can also be partitioned across
//! cooperating processes; enable the `distributed` feature to access the
//! `cluster` module.
//!
//! # Using Corpuscular
//!
//! ## Setting up the simulation
//!
//! Create a [`Simulation`](simulation::Simulation), give it bounds and
//! bodies, and advance it once per frame:
//!
//! ```
//! # use corpuscular::prelude::*;
//! # use glam::Vec3;
//! #
//! let mut simulation = Simulation::new();
//! simulation.create_cuboid_container(Vec3::ZERO, Vec3::splat(5.0), true);
//!
//! for x in 0..5 {
//!     let position = Vec3::new(x as f32 * 0.1, 2.0, 0.0);
//!     simulation.create_sphere(position, 0.15, Vec3::ZERO, Vec3::ZERO, false);
//! }
//!
//! for _ in 0..120 {
//!     simulation.advance(1.0 / 60.0);
//! }
//!
//! // Everything settled inside the container.
//! for position in simulation.positions() {
//!     assert!(position.y > -5.0 && position.y < 5.0);
//! }
//! ```
//!
//! ## Soft bodies
//!
//! Soft bodies are [`Molecule`](molecule::Molecule)s: groups of bodies held
//! at a target distance by repeated pairwise correction, optionally
//! inflated away from their centroid:
//!
//! ```
//! # use corpuscular::prelude::*;
//! # use glam::Vec3;
//! #
//! # let mut simulation = Simulation::new();
//! let mut molecule = Molecule::new(1.0, 0.5, false);
//! for corner in [Vec3::ZERO, Vec3::X, Vec3::Y, Vec3::Z] {
//!     let id = simulation.create_sphere(corner, 0.15, Vec3::ZERO, Vec3::ZERO, false);
//!     molecule.add_member(id);
//! }
//! simulation.add_molecule(molecule);
//!
//! simulation.maintain_molecules();
//! ```
//!
//! ## Loading worlds
//!
//! Whole scenes load from JSON documents through
//! [`load_world`](simulation::Simulation::load_world): containers plus
//! molecules, written inline or referenced by path relative to the world
//! file.

#![warn(missing_docs)]

/// Spherical bodies advanced by Verlet integration.
pub mod body;

/// Bounding volumes that clamp bodies inside themselves.
pub mod container;

/// Errors reported by world loading and by the distributed exchange.
pub mod error;

/// Spatial hashing of bodies into fixed-size cubic cells.
pub mod grid;

/// Distance-constraint groups with optional internal pressure.
pub mod molecule;

/// The orchestrator owning every entity and driving the frame pipeline.
pub mod simulation;

/// Description documents and world loading.
pub mod world;

/// Distributed collision resolution across cooperating processes.
#[cfg(feature = "distributed")]
pub mod cluster;

/// Everything needed to drive a simulation.
pub mod prelude {
    pub use crate::body::Body;
    pub use crate::container::Container;
    pub use crate::error::WorldError;
    pub use crate::grid::SpatialHashGrid;
    pub use crate::molecule::Molecule;
    pub use crate::simulation::{Settings, Simulation};
    pub use crate::world::{
        ContainerDescription, MoleculeDescription, MoleculeEntry, SphereDescription,
        WorldDescription,
    };

    #[cfg(feature = "distributed")]
    pub use crate::cluster::{run_worker, ClusterContext, VolumeDescriptor};
    #[cfg(feature = "distributed")]
    pub use crate::error::ClusterError;
}
