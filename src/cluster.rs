//! Distributed collision resolution across cooperating processes.
//!
//! One coordinator (rank 0) owns the authoritative simulation. Each substep
//! it flattens the occupied grid cells into a contiguous float buffer, ships
//! the buffer to every worker together with the bounding volumes, and every
//! process resolves the collisions of an evenly partitioned range of cells
//! directly on its copy of the buffer. The coordinator then merges the
//! returned buffers: wherever its own pass moved a body its result stands,
//! everywhere else the last answering peer wins. This is a last-writer-wins
//! heuristic rather than a consistency protocol; the substep loop smooths
//! the disagreement the same way it smooths ordinary overlapping
//! corrections.

use std::collections::{HashMap, HashSet};
use std::hash::BuildHasherDefault;
use std::net::{TcpListener, TcpStream, ToSocketAddrs};
use std::ops::Range;

use glam::{IVec3, Vec3};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::body::Body;
use crate::container::Container;
use crate::error::ClusterError;
use crate::grid::{CellHasher, SpatialHashGrid};
use crate::simulation::Simulation;

/// Number of floats one body occupies in a frame buffer: id, cell
/// coordinate, position, radius.
pub const RECORD_STRIDE: usize = 8;

/// Serializable mirror of [`Container`] for the frame exchange.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum VolumeDescriptor {
    /// An axis-aligned box.
    Cuboid {
        /// Center of the box.
        center: [f32; 3],
        /// Half the box extent along each axis.
        half_extent: [f32; 3],
        /// Clamp bodies that are outside as well.
        forced_inside: bool,
    },
    /// A sphere.
    Sphere {
        /// Center of the sphere.
        center: [f32; 3],
        /// Radius of the sphere.
        radius: f32,
        /// Clamp bodies that are outside as well.
        forced_inside: bool,
    },
}

impl From<&Container> for VolumeDescriptor {
    fn from(container: &Container) -> Self {
        match *container {
            Container::Cuboid {
                center,
                half_extent,
                forced_inside,
            } => Self::Cuboid {
                center: center.to_array(),
                half_extent: half_extent.to_array(),
                forced_inside,
            },
            Container::Sphere {
                center,
                radius,
                forced_inside,
            } => Self::Sphere {
                center: center.to_array(),
                radius,
                forced_inside,
            },
        }
    }
}

impl From<&VolumeDescriptor> for Container {
    fn from(descriptor: &VolumeDescriptor) -> Self {
        match *descriptor {
            VolumeDescriptor::Cuboid {
                center,
                half_extent,
                forced_inside,
            } => Container::cuboid(Vec3::from(center), Vec3::from(half_extent), forced_inside),
            VolumeDescriptor::Sphere {
                center,
                radius,
                forced_inside,
            } => Container::sphere(Vec3::from(center), radius, forced_inside),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
enum Message {
    Hello { rank: u32, world_size: u32 },
    Frame {
        records: Vec<f32>,
        volumes: Vec<VolumeDescriptor>,
    },
    Resolved { records: Vec<f32> },
    Shutdown,
}

fn send(stream: &mut TcpStream, message: &Message) -> Result<(), ClusterError> {
    bincode::serialize_into(&mut *stream, message)?;
    Ok(())
}

fn receive(stream: &mut TcpStream) -> Result<Message, ClusterError> {
    Ok(bincode::deserialize_from(&mut *stream)?)
}

#[inline]
fn record_count(records: &[f32]) -> usize {
    records.len() / RECORD_STRIDE
}

#[inline]
fn record_id(records: &[f32], record: usize) -> usize {
    records[record * RECORD_STRIDE] as usize
}

#[inline]
fn record_cell(records: &[f32], record: usize) -> IVec3 {
    let base = record * RECORD_STRIDE + 1;
    IVec3::new(
        records[base] as i32,
        records[base + 1] as i32,
        records[base + 2] as i32,
    )
}

#[inline]
fn record_position(records: &[f32], record: usize) -> Vec3 {
    let base = record * RECORD_STRIDE + 4;
    Vec3::new(records[base], records[base + 1], records[base + 2])
}

#[inline]
fn set_record_position(records: &mut [f32], record: usize, position: Vec3) {
    let base = record * RECORD_STRIDE + 4;
    records[base] = position.x;
    records[base + 1] = position.y;
    records[base + 2] = position.z;
}

#[inline]
fn record_radius(records: &[f32], record: usize) -> f32 {
    records[record * RECORD_STRIDE + 7]
}

fn encode_records(grid: &SpatialHashGrid, bodies: &[Body]) -> Vec<f32> {
    let mut records = Vec::with_capacity(bodies.len() * RECORD_STRIDE);
    for (cell, bucket) in grid.cells() {
        for &index in bucket {
            let body = &bodies[index];
            records.extend_from_slice(&[
                index as f32,
                cell.x as f32,
                cell.y as f32,
                cell.z as f32,
                body.position.x,
                body.position.y,
                body.position.z,
                body.radius,
            ]);
        }
    }
    records
}

/// Distinct cell coordinates of a record buffer, in first-appearance order.
///
/// Buffer order is the one piece of shared state every process can derive
/// independently, so the partition over this list is identical on all
/// ranks.
fn collect_cells(records: &[f32]) -> Vec<IVec3> {
    let mut seen: HashSet<IVec3, BuildHasherDefault<CellHasher>> = HashSet::default();
    let mut cells = Vec::new();
    for record in 0..record_count(records) {
        let cell = record_cell(records, record);
        if seen.insert(cell) {
            cells.push(cell);
        }
    }
    cells
}

/// Contiguous range of cell indices owned by `rank`.
///
/// The ranges of all ranks tile `0..cell_count`, with sizes differing by at
/// most one.
///
/// # Panics
///
/// Panics if `rank` is not a rank of a cluster of `world_size` processes.
pub fn partition_range(cell_count: usize, rank: usize, world_size: usize) -> Range<usize> {
    assert!(
        rank < world_size,
        "rank {rank} is not a rank of a cluster of {world_size}"
    );
    let base = cell_count / world_size;
    let remainder = cell_count % world_size;
    let start = rank * base + rank.min(remainder);
    let length = base + usize::from(rank < remainder);
    start..start + length
}

/// Resolves the collisions of the cells owned by `rank`, directly on
/// `records`.
///
/// The same narrow phase as the in-memory pass: every body of an owned cell
/// against the occupants of the surrounding cell block, equal-and-opposite
/// half-overlap splits, then container clamping. Works purely on the buffer
/// plus a coordinate map rebuilt from the records' own cell fields. Records
/// carry no fixed flag; the coordinator re-imposes fixedness at write-back.
pub fn resolve_partition(
    records: &mut [f32],
    volumes: &[VolumeDescriptor],
    rank: usize,
    world_size: usize,
) {
    let cells = collect_cells(records);
    let mut buckets: HashMap<IVec3, Vec<usize>, BuildHasherDefault<CellHasher>> =
        HashMap::default();
    for record in 0..record_count(records) {
        buckets
            .entry(record_cell(records, record))
            .or_default()
            .push(record);
    }
    let containers: Vec<Container> = volumes.iter().map(Container::from).collect();

    for cell in &cells[partition_range(cells.len(), rank, world_size)] {
        let mut neighbors = Vec::new();
        for x in -1..=1 {
            for y in -1..=1 {
                for z in -1..=1 {
                    if let Some(bucket) = buckets.get(&(*cell + IVec3::new(x, y, z))) {
                        neighbors.extend_from_slice(bucket);
                    }
                }
            }
        }
        let Some(bucket) = buckets.get(cell) else {
            continue;
        };
        for &record in bucket {
            for &neighbor in &neighbors {
                if neighbor != record {
                    resolve_record_pair(records, record, neighbor);
                }
            }
            for container in &containers {
                let clamped = container.resolved_position(
                    record_position(records, record),
                    record_radius(records, record),
                );
                set_record_position(records, record, clamped);
            }
        }
    }
}

fn resolve_record_pair(records: &mut [f32], a: usize, b: usize) {
    let position_a = record_position(records, a);
    let position_b = record_position(records, b);
    let axis = position_a - position_b;
    let distance = axis.length();
    let overlap = record_radius(records, a) + record_radius(records, b) - distance;
    if overlap > 0.0 && distance > 0.0 {
        let half = axis / distance * (overlap * 0.5);
        set_record_position(records, a, position_a + half);
        set_record_position(records, b, position_b - half);
    }
}

/// Merges one peer buffer into the coordinator's result.
///
/// For each record: if the coordinator's own pass moved it relative to
/// `original`, the coordinator's position stands; otherwise the peer's
/// position is taken, later peers overwriting earlier ones.
fn reconcile(original: &[f32], mine: &[f32], merged: &mut [f32], peer: &[f32]) {
    for record in 0..record_count(original) {
        if record_position(mine, record) == record_position(original, record) {
            set_record_position(merged, record, record_position(peer, record));
        }
    }
}

/// Execution context of one process in the cluster.
///
/// Carries the process rank, the world size and the open peer connections;
/// there is no process-global cluster state, so multiple contexts can
/// coexist in one process under test.
pub struct ClusterContext {
    rank: usize,
    world_size: usize,
    peers: Vec<TcpStream>,
}

impl ClusterContext {
    /// Binds `addr` and waits for `world_size - 1` workers to connect.
    ///
    /// The calling process becomes rank 0, the coordinator; workers are
    /// assigned ranks in connection order. `world_size` counts the
    /// coordinator itself, so a value of zero is rejected with
    /// [`ClusterError::InvalidWorldSize`].
    pub fn coordinator<A: ToSocketAddrs>(addr: A, world_size: usize) -> Result<Self, ClusterError> {
        let listener = TcpListener::bind(addr)?;
        Self::coordinator_on(listener, world_size)
    }

    /// Like [`coordinator`](ClusterContext::coordinator), on an already
    /// bound listener.
    pub fn coordinator_on(listener: TcpListener, world_size: usize) -> Result<Self, ClusterError> {
        if world_size == 0 {
            return Err(ClusterError::InvalidWorldSize { world_size });
        }
        let mut peers = Vec::new();
        while peers.len() + 1 < world_size {
            let (mut stream, peer_addr) = listener.accept()?;
            let rank = peers.len() + 1;
            send(
                &mut stream,
                &Message::Hello {
                    rank: rank as u32,
                    world_size: world_size as u32,
                },
            )?;
            info!(rank, peer = %peer_addr, "worker connected");
            peers.push(stream);
        }
        Ok(Self {
            rank: 0,
            world_size,
            peers,
        })
    }

    /// Connects to the coordinator at `addr` and receives a rank assignment.
    pub fn worker<A: ToSocketAddrs>(addr: A) -> Result<Self, ClusterError> {
        let mut stream = TcpStream::connect(addr)?;
        match receive(&mut stream)? {
            Message::Hello { rank, world_size } => {
                if world_size == 0 {
                    return Err(ClusterError::InvalidWorldSize { world_size: 0 });
                }
                info!(rank, world_size, "joined cluster");
                Ok(Self {
                    rank: rank as usize,
                    world_size: world_size as usize,
                    peers: vec![stream],
                })
            }
            _ => Err(ClusterError::UnexpectedMessage { phase: "handshake" }),
        }
    }

    /// Rank of this process; the coordinator is rank 0.
    #[inline]
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Number of cooperating processes, this one included.
    #[inline]
    pub fn world_size(&self) -> usize {
        self.world_size
    }

    /// Whether this process is the coordinator.
    #[inline]
    pub fn is_coordinator(&self) -> bool {
        self.rank == 0
    }

    /// Tells every worker to stop, then drops the connections.
    ///
    /// On a worker this only drops the connection to the coordinator.
    pub fn shutdown(&mut self) -> Result<(), ClusterError> {
        if self.is_coordinator() {
            for peer in &mut self.peers {
                send(peer, &Message::Shutdown)?;
            }
            info!("cluster shut down");
        }
        self.peers.clear();
        Ok(())
    }
}

/// Serves frames until the coordinator shuts the cluster down.
///
/// Receives a frame, resolves the cell range owned by this process's rank
/// and returns the mutated buffer. Returns once the coordinator sends the
/// shutdown message or the connection is gone.
pub fn run_worker(context: &mut ClusterContext) -> Result<(), ClusterError> {
    loop {
        let message = {
            let Some(stream) = context.peers.first_mut() else {
                return Ok(());
            };
            receive(stream)?
        };
        match message {
            Message::Frame {
                mut records,
                volumes,
            } => {
                resolve_partition(&mut records, &volumes, context.rank, context.world_size);
                let Some(stream) = context.peers.first_mut() else {
                    return Ok(());
                };
                send(stream, &Message::Resolved { records })?;
            }
            Message::Shutdown => {
                info!("worker shutting down");
                return Ok(());
            }
            Message::Hello { .. } | Message::Resolved { .. } => {
                return Err(ClusterError::UnexpectedMessage {
                    phase: "frame serving",
                });
            }
        }
    }
}

impl Simulation {
    /// Rebuilds the grid and resolves collisions across the cluster.
    ///
    /// The distributed counterpart of
    /// [`check_grid_collisions`](Simulation::check_grid_collisions), to be
    /// called on the coordinator: the frame buffer goes out to every worker,
    /// every process resolves its own cell range, and the reconciled
    /// positions are written back into the bodies. Fixed bodies are never
    /// written back. With no workers connected this degenerates to a local
    /// pass over the buffer.
    pub fn check_grid_collisions_distributed(
        &mut self,
        context: &mut ClusterContext,
    ) -> Result<(), ClusterError> {
        self.rebuild_grid();
        let original = encode_records(self.grid(), self.bodies());
        let volumes: Vec<VolumeDescriptor> =
            self.containers().iter().map(VolumeDescriptor::from).collect();

        for peer in &mut context.peers {
            send(
                peer,
                &Message::Frame {
                    records: original.clone(),
                    volumes: volumes.clone(),
                },
            )?;
        }
        debug!(
            records = record_count(&original),
            peers = context.peers.len(),
            "frame dispatched"
        );

        let mut mine = original.clone();
        resolve_partition(&mut mine, &volumes, context.rank, context.world_size);

        let mut merged = mine.clone();
        for (index, peer) in context.peers.iter_mut().enumerate() {
            match receive(peer)? {
                Message::Resolved { records } => {
                    if records.len() != original.len() {
                        return Err(ClusterError::BufferMismatch {
                            rank: index + 1,
                            expected: original.len(),
                            got: records.len(),
                        });
                    }
                    reconcile(&original, &mine, &mut merged, &records);
                }
                _ => {
                    return Err(ClusterError::UnexpectedMessage {
                        phase: "frame exchange",
                    })
                }
            }
        }

        self.apply_records(&merged);
        Ok(())
    }

    /// Advances one frame like [`advance`](Simulation::advance), with the
    /// collision phase distributed across the cluster.
    pub fn advance_distributed(
        &mut self,
        context: &mut ClusterContext,
        dt: f32,
    ) -> Result<(), ClusterError> {
        let settings = self.settings();
        let dt_sub = dt / settings.substeps as f32;
        for _ in 0..settings.substeps {
            self.check_grid_collisions_distributed(context)?;
            self.maintain_molecules();
            self.add_force(settings.gravity);
            self.step(dt_sub);
        }
        Ok(())
    }

    fn apply_records(&mut self, records: &[f32]) {
        for record in 0..record_count(records) {
            let id = record_id(records, record);
            let position = record_position(records, record);
            if let Some(body) = self.body_mut(id) {
                if !body.fixed {
                    body.position = position;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    const EPSILON: f32 = 1E-6;

    fn overlapping_pairs() -> Simulation {
        let mut simulation = Simulation::new();
        simulation.create_cuboid_container(Vec3::ZERO, Vec3::splat(5.0), true);
        simulation.create_sphere(Vec3::ZERO, 0.15, Vec3::ZERO, Vec3::ZERO, false);
        simulation.create_sphere(Vec3::new(0.1, 0.0, 0.0), 0.15, Vec3::ZERO, Vec3::ZERO, false);
        simulation.create_sphere(Vec3::new(3.0, 1.0, -2.0), 0.15, Vec3::ZERO, Vec3::ZERO, false);
        simulation.create_sphere(
            Vec3::new(3.0, 1.0, -2.08),
            0.15,
            Vec3::ZERO,
            Vec3::ZERO,
            false,
        );
        simulation.create_sphere(Vec3::new(5.2, 0.0, 0.0), 0.15, Vec3::ZERO, Vec3::ZERO, false);
        simulation
    }

    fn positions_close(a: &[Vec3], b: &[Vec3]) -> bool {
        a.len() == b.len()
            && a.iter()
                .zip(b)
                .all(|(left, right)| left.distance(*right) < EPSILON)
    }

    #[test]
    fn partitions_tile_the_cell_list() {
        let world_size = 3;
        let ranges: Vec<_> = (0..world_size)
            .map(|rank| partition_range(10, rank, world_size))
            .collect();

        assert_eq!(ranges[0], 0..4);
        assert_eq!(ranges[1], 4..7);
        assert_eq!(ranges[2], 7..10);
    }

    #[test]
    fn partition_of_one_rank_covers_everything() {
        assert_eq!(partition_range(7, 0, 1), 0..7);
        assert_eq!(partition_range(0, 0, 1), 0..0);
    }

    #[test]
    fn more_ranks_than_cells_leaves_trailing_ranks_idle() {
        assert_eq!(partition_range(2, 0, 4), 0..1);
        assert_eq!(partition_range(2, 1, 4), 1..2);
        assert_eq!(partition_range(2, 2, 4), 2..2);
        assert_eq!(partition_range(2, 3, 4), 2..2);
    }

    #[test]
    #[should_panic]
    fn partitioning_for_no_ranks_panics() {
        partition_range(5, 0, 0);
    }

    #[test]
    fn records_mirror_the_grid_walk() {
        let mut simulation = overlapping_pairs();
        simulation.rebuild_grid();
        let records = encode_records(simulation.grid(), simulation.bodies());

        assert_eq!(record_count(&records), simulation.body_count());
        let mut ids: Vec<_> = (0..record_count(&records))
            .map(|record| record_id(&records, record))
            .collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);

        for record in 0..record_count(&records) {
            let body = &simulation.bodies()[record_id(&records, record)];
            assert_eq!(record_position(&records, record), body.position);
            assert_eq!(record_radius(&records, record), body.radius);
            assert_eq!(
                record_cell(&records, record),
                simulation.grid().cell_of(body.position)
            );
        }
    }

    #[test]
    fn buffer_resolution_matches_the_in_memory_pass() {
        let mut twin = overlapping_pairs();
        twin.check_grid_collisions();

        let mut simulation = overlapping_pairs();
        simulation.rebuild_grid();
        let volumes: Vec<VolumeDescriptor> = simulation
            .containers()
            .iter()
            .map(VolumeDescriptor::from)
            .collect();
        let mut records = encode_records(simulation.grid(), simulation.bodies());
        resolve_partition(&mut records, &volumes, 0, 1);
        simulation.apply_records(&records);

        assert!(positions_close(
            &simulation.positions(),
            &twin.positions()
        ));
    }

    #[test]
    fn coordinator_result_wins_where_it_moved() {
        let original = vec![0.0, 0.0, 0.0, 0.0, 1.0, 2.0, 3.0, 0.5];
        let mut mine = original.clone();
        set_record_position(&mut mine, 0, Vec3::new(9.0, 9.0, 9.0));
        let mut peer = original.clone();
        set_record_position(&mut peer, 0, Vec3::new(-1.0, -1.0, -1.0));

        let mut merged = mine.clone();
        reconcile(&original, &mine, &mut merged, &peer);

        assert_eq!(record_position(&merged, 0), Vec3::new(9.0, 9.0, 9.0));
    }

    #[test]
    fn last_peer_wins_where_the_coordinator_was_idle() {
        let original = vec![0.0, 0.0, 0.0, 0.0, 1.0, 2.0, 3.0, 0.5];
        let mine = original.clone();
        let mut first = original.clone();
        set_record_position(&mut first, 0, Vec3::new(4.0, 4.0, 4.0));
        let mut second = original.clone();
        set_record_position(&mut second, 0, Vec3::new(5.0, 5.0, 5.0));

        let mut merged = mine.clone();
        reconcile(&original, &mine, &mut merged, &first);
        reconcile(&original, &mine, &mut merged, &second);

        assert_eq!(record_position(&merged, 0), Vec3::new(5.0, 5.0, 5.0));
    }

    #[test]
    fn volume_descriptors_round_trip_containers() {
        let cuboid = Container::cuboid(Vec3::ONE, Vec3::splat(2.0), true);
        let sphere = Container::sphere(Vec3::new(0.0, 5.0, 0.0), 3.0, false);

        assert_eq!(Container::from(&VolumeDescriptor::from(&cuboid)), cuboid);
        assert_eq!(Container::from(&VolumeDescriptor::from(&sphere)), sphere);
    }

    #[test]
    fn empty_clusters_are_rejected() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();

        let result = ClusterContext::coordinator_on(listener, 0);

        assert!(matches!(
            result,
            Err(ClusterError::InvalidWorldSize { world_size: 0 })
        ));
    }

    #[test]
    fn fixed_bodies_never_take_written_back_positions() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let mut context = ClusterContext::coordinator_on(listener, 1).unwrap();
        assert!(context.is_coordinator());
        assert_eq!(context.world_size(), 1);

        let mut simulation = overlapping_pairs();
        let anchor = simulation.create_sphere(Vec3::ZERO, 0.15, Vec3::ZERO, Vec3::ZERO, true);

        simulation
            .check_grid_collisions_distributed(&mut context)
            .unwrap();

        // The anchor's record gets pushed around in the buffer like any
        // other, but the write-back drops it.
        assert_eq!(simulation.positions()[anchor], Vec3::ZERO);
        assert_ne!(simulation.positions()[0], Vec3::ZERO);
        context.shutdown().unwrap();
    }

    #[test]
    fn loopback_exchange_matches_the_local_pass() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let worker = thread::spawn(move || -> Result<(), ClusterError> {
            let mut context = ClusterContext::worker(addr)?;
            run_worker(&mut context)
        });

        let mut context = ClusterContext::coordinator_on(listener, 2).unwrap();
        assert_eq!(context.world_size(), 2);

        let mut twin = overlapping_pairs();
        let mut simulation = overlapping_pairs();
        for _ in 0..3 {
            twin.check_grid_collisions();
            simulation
                .check_grid_collisions_distributed(&mut context)
                .unwrap();
        }

        context.shutdown().unwrap();
        worker.join().unwrap().unwrap();

        assert!(positions_close(
            &simulation.positions(),
            &twin.positions()
        ));
    }

    #[test]
    fn distributed_advance_runs_the_full_pipeline() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let mut context = ClusterContext::coordinator_on(listener, 1).unwrap();

        let mut simulation = Simulation::new();
        simulation.create_cuboid_container(Vec3::ZERO, Vec3::splat(5.0), true);
        simulation.create_sphere(Vec3::new(0.0, 3.0, 0.0), 0.15, Vec3::ZERO, Vec3::ZERO, false);

        simulation.advance_distributed(&mut context, 1.0 / 60.0).unwrap();

        assert!(simulation.positions()[0].y < 3.0);
        context.shutdown().unwrap();
    }
}
