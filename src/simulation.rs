use glam::Vec3;

#[cfg(feature = "parallel")]
use glam::IVec3;
#[cfg(feature = "parallel")]
use rayon::prelude::*;

#[cfg(not(feature = "parallel"))]
use crate::body::pair_mut;
use crate::body::Body;
use crate::container::Container;
use crate::grid::SpatialHashGrid;
use crate::molecule::Molecule;

/// Tunables of the frame pipeline.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Settings {
    /// Edge length of the spatial hash cells.
    ///
    /// Must be at least the largest body diameter so that a body's collision
    /// partners are confined to the cell block around it.
    pub cell_size: f32,
    /// Number of substeps [`advance`](Simulation::advance) divides a frame
    /// into.
    pub substeps: u32,
    /// Force broadcast to every body once per substep by
    /// [`advance`](Simulation::advance).
    pub gravity: Vec3,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cell_size: 0.3,
            substeps: 8,
            gravity: Vec3::new(0.0, -10.0, 0.0),
        }
    }
}

/// Owner of every simulated entity and driver of the frame pipeline.
///
/// Bodies live in one arena and are addressed by the id
/// [`create_sphere`](Simulation::create_sphere) returns; containers and
/// molecules refer to them by id only. [`advance`](Simulation::advance)
/// runs the whole substepped pipeline, while the individual phases are
/// public for callers that drive their own loop.
///
/// ```
/// use corpuscular::prelude::*;
/// use glam::Vec3;
///
/// let mut simulation = Simulation::new();
/// simulation.create_cuboid_container(Vec3::ZERO, Vec3::splat(5.0), true);
/// simulation.create_sphere(Vec3::new(0.0, 3.0, 0.0), 0.15, Vec3::ZERO, Vec3::ZERO, false);
///
/// for _ in 0..60 {
///     simulation.advance(1.0 / 60.0);
/// }
///
/// assert!(simulation.positions()[0].y < 3.0);
/// ```
#[derive(Debug)]
pub struct Simulation {
    settings: Settings,
    grid: SpatialHashGrid,
    bodies: Vec<Body>,
    containers: Vec<Container>,
    molecules: Vec<Molecule>,
}

impl Default for Simulation {
    fn default() -> Self {
        Self::new()
    }
}

impl Simulation {
    /// Creates an empty simulation with default [`Settings`].
    pub fn new() -> Self {
        Self::with_settings(Settings::default())
    }

    /// Creates an empty simulation with the given settings.
    pub fn with_settings(settings: Settings) -> Self {
        Self {
            grid: SpatialHashGrid::new(settings.cell_size),
            settings,
            bodies: Vec::new(),
            containers: Vec::new(),
            molecules: Vec::new(),
        }
    }

    /// The settings the simulation was created with.
    #[inline]
    pub fn settings(&self) -> Settings {
        self.settings
    }

    /// Creates a body and returns its id.
    ///
    /// Ids are assigned in creation order and stay valid for the
    /// simulation's lifetime since bodies are never removed. `velocity` is
    /// stored for consumers reading it back and does not seed the Verlet
    /// history; `acceleration` seeds the force accumulator consumed by the
    /// first integration step.
    pub fn create_sphere(
        &mut self,
        position: Vec3,
        radius: f32,
        velocity: Vec3,
        acceleration: Vec3,
        fixed: bool,
    ) -> usize {
        let mut body = Body::new(position, radius);
        body.velocity = velocity;
        body.add_force(acceleration);
        body.fixed = fixed;
        self.bodies.push(body);
        self.bodies.len() - 1
    }

    /// Registers a container.
    pub fn add_container(&mut self, container: Container) {
        self.containers.push(container);
    }

    /// Registers an axis-aligned cuboid container.
    pub fn create_cuboid_container(
        &mut self,
        center: Vec3,
        half_extent: Vec3,
        forced_inside: bool,
    ) {
        self.add_container(Container::cuboid(center, half_extent, forced_inside));
    }

    /// Registers a spherical container.
    pub fn create_spherical_container(&mut self, center: Vec3, radius: f32, forced_inside: bool) {
        self.add_container(Container::sphere(center, radius, forced_inside));
    }

    /// Registers a molecule and returns its id.
    ///
    /// # Panics
    ///
    /// Panics if a member id does not reference a created body.
    pub fn add_molecule(&mut self, molecule: Molecule) -> usize {
        for &member in molecule.members() {
            assert!(
                member < self.bodies.len(),
                "member {member} references a body beyond the {} created",
                self.bodies.len()
            );
        }
        self.molecules.push(molecule);
        self.molecules.len() - 1
    }

    /// Total number of bodies created so far.
    #[inline]
    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    /// All bodies, indexed by id.
    #[inline]
    pub fn bodies(&self) -> &[Body] {
        &self.bodies
    }

    /// The body with the given id.
    #[inline]
    pub fn body(&self, id: usize) -> Option<&Body> {
        self.bodies.get(id)
    }

    /// Mutable access to one body, for dragging and other external control.
    #[inline]
    pub fn body_mut(&mut self, id: usize) -> Option<&mut Body> {
        self.bodies.get_mut(id)
    }

    /// Registered containers.
    #[inline]
    pub fn containers(&self) -> &[Container] {
        &self.containers
    }

    /// Registered molecules.
    #[inline]
    pub fn molecules(&self) -> &[Molecule] {
        &self.molecules
    }

    /// Positions of all bodies, parallel to [`radii`](Simulation::radii).
    pub fn positions(&self) -> Vec<Vec3> {
        self.bodies.iter().map(|body| body.position).collect()
    }

    /// Radii of all bodies, parallel to [`positions`](Simulation::positions).
    pub fn radii(&self) -> Vec<f32> {
        self.bodies.iter().map(|body| body.radius).collect()
    }

    /// Broadcasts a force to every body.
    ///
    /// Fixed bodies accumulate it too and discard it on integration.
    pub fn add_force(&mut self, force: Vec3) {
        for body in &mut self.bodies {
            body.add_force(force);
        }
    }

    /// Integrates every body by `dt`.
    pub fn step(&mut self, dt: f32) {
        for body in &mut self.bodies {
            body.integrate(dt);
        }
    }

    /// Runs one distance-correction and internal-pressure pass per molecule.
    pub fn maintain_molecules(&mut self) {
        for molecule in &self.molecules {
            molecule.maintain_distances(&mut self.bodies);
            molecule.apply_internal_pressure(&mut self.bodies);
        }
    }

    /// Rebuilds the spatial hash and resolves collisions cell by cell.
    ///
    /// Every body is tested against the occupants of the cell block around
    /// it and then clamped by every container. With the `parallel` feature
    /// the cells are processed on the rayon thread pool, scheduled so that
    /// no two concurrent cells can reach the same body.
    pub fn check_grid_collisions(&mut self) {
        self.rebuild_grid();
        self.resolve_cells();
    }

    /// Advances the simulation by one frame of `dt` seconds.
    ///
    /// Runs collision resolution, molecule maintenance, gravity and
    /// integration, `settings.substeps` times with `dt / substeps` each.
    pub fn advance(&mut self, dt: f32) {
        let dt_sub = dt / self.settings.substeps as f32;
        for _ in 0..self.settings.substeps {
            self.check_grid_collisions();
            self.maintain_molecules();
            self.add_force(self.settings.gravity);
            self.step(dt_sub);
        }
    }

    #[cfg(feature = "distributed")]
    pub(crate) fn grid(&self) -> &SpatialHashGrid {
        &self.grid
    }

    pub(crate) fn rebuild_grid(&mut self) {
        self.grid.clear();
        for (index, body) in self.bodies.iter().enumerate() {
            self.grid.insert(index, body.position);
        }
    }

    #[cfg(not(feature = "parallel"))]
    fn resolve_cells(&mut self) {
        let Self {
            grid,
            bodies,
            containers,
            ..
        } = self;
        for (cell, bucket) in grid.cells() {
            let neighbors = grid.neighbors_of_cell(cell);
            for &index in bucket {
                for &neighbor in &neighbors {
                    if neighbor != index {
                        let (body, other) = pair_mut(bodies, index, neighbor);
                        body.collide_with(other);
                    }
                }
                for container in containers.iter() {
                    container.resolve(&mut bodies[index]);
                }
            }
        }
    }

    #[cfg(feature = "parallel")]
    fn resolve_cells(&mut self) {
        let Self {
            grid,
            bodies,
            containers,
            ..
        } = self;

        // Cells of the same color class are at least three cells apart on
        // every axis they differ on, so their 27-cell blocks are disjoint
        // and the classes can each be resolved in parallel without two
        // tasks reaching the same body.
        let mut classes: [Vec<IVec3>; 27] = Default::default();
        for (cell, _) in grid.cells() {
            classes[color_class(cell)].push(cell);
        }

        let shared = SharedBodies(bodies.as_mut_ptr());
        let grid = &*grid;
        let containers = &**containers;
        for class in &classes {
            class.par_iter().for_each(|&cell| {
                // Capture the whole wrapper, not the raw pointer field, so
                // its Send/Sync impls carry it across the task boundary.
                let shared = shared;
                let bucket = grid.bucket(cell);
                let neighbors = grid.neighbors_of_cell(cell);
                for &index in bucket {
                    for &neighbor in &neighbors {
                        if neighbor != index {
                            let (body, other) = unsafe {
                                (&mut *shared.0.add(index), &mut *shared.0.add(neighbor))
                            };
                            body.collide_with(other);
                        }
                    }
                    let body = unsafe { &mut *shared.0.add(index) };
                    for container in containers {
                        container.resolve(body);
                    }
                }
            });
        }
    }
}

#[cfg(feature = "parallel")]
#[inline]
fn color_class(cell: IVec3) -> usize {
    (cell.x.rem_euclid(3) * 9 + cell.y.rem_euclid(3) * 3 + cell.z.rem_euclid(3)) as usize
}

/// Base pointer of the body arena, shared by the parallel collision tasks.
///
/// Tasks derive disjoint `&mut Body` from it; the color-class schedule in
/// [`Simulation::check_grid_collisions`] keeps any index out of reach of two
/// tasks running at once.
#[cfg(feature = "parallel")]
#[derive(Clone, Copy)]
struct SharedBodies(*mut Body);

#[cfg(feature = "parallel")]
unsafe impl Send for SharedBodies {}
#[cfg(feature = "parallel")]
unsafe impl Sync for SharedBodies {}
