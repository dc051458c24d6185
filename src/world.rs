use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use glam::Vec3;
use serde::Deserialize;
use tracing::{error, info, warn};

use crate::container::Container;
use crate::error::WorldError;
use crate::molecule::Molecule;
use crate::simulation::Simulation;

/// One member sphere of a molecule document.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SphereDescription {
    /// Center of the sphere.
    pub position: [f32; 3],
    /// Radius of the sphere.
    pub radius: f32,
    /// Initial velocity estimate, stored as-is.
    #[serde(default)]
    pub velocity: [f32; 3],
    /// Initial force, consumed by the first integration step.
    #[serde(default)]
    pub acceleration: [f32; 3],
    /// Whether the sphere is pinned in place.
    #[serde(default)]
    pub fixed: bool,
}

/// A molecule document: solver parameters plus member spheres and links.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoleculeDescription {
    /// Target distance between governed members.
    pub distance: f32,
    /// Correct only the listed links instead of every member pair.
    pub links_enabled: bool,
    /// Correction strength in `(0, 1]`.
    pub strength: f32,
    /// Internal-pressure coefficient; presence enables the pass.
    #[serde(default)]
    pub internal_pressure: Option<f32>,
    /// Translation applied to every member position.
    #[serde(default)]
    pub offset: Option<[f32; 3]>,
    /// Member spheres.
    #[serde(default)]
    pub spheres: Vec<SphereDescription>,
    /// Links as index pairs into `spheres`.
    #[serde(default)]
    pub links: Vec<[usize; 2]>,
}

/// A bounding-volume document.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerDescription {
    /// Shape name, `"cube"` or `"sphere"`. Unknown names are skipped with a
    /// warning when loading a world.
    #[serde(rename = "type")]
    pub kind: String,
    /// Center of the volume.
    pub position: [f32; 3],
    /// Clamp bodies that are outside as well.
    #[serde(default)]
    pub forced_inside: bool,
    /// Full extent of a cube along each axis.
    #[serde(default)]
    pub size: Option<[f32; 3]>,
    /// Radius of a sphere.
    #[serde(default)]
    pub radius: Option<f32>,
}

/// One entry of a world's `molecules` list: either a reference to a molecule
/// file or a molecule written out inline.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum MoleculeEntry {
    /// Reference to a molecule file.
    Reference {
        /// Path of the molecule document, relative to the world file.
        path: PathBuf,
        /// Translation applied to every member of the referenced molecule.
        #[serde(default)]
        offset: Option<[f32; 3]>,
    },
    /// A molecule document written inline.
    Inline(MoleculeDescription),
}

/// A world document: molecules and containers to populate a simulation with.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldDescription {
    /// Molecules, inline or referenced by path.
    #[serde(default)]
    pub molecules: Vec<MoleculeEntry>,
    /// Bounding volumes.
    #[serde(default)]
    pub containers: Vec<ContainerDescription>,
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, WorldError> {
    let file = File::open(path).map_err(|source| {
        error!(path = %path.display(), "could not open description file");
        WorldError::Io {
            path: path.to_path_buf(),
            source,
        }
    })?;
    serde_json::from_reader(BufReader::new(file)).map_err(|source| {
        error!(path = %path.display(), "could not parse description file");
        WorldError::Parse {
            path: path.to_path_buf(),
            source,
        }
    })
}

fn build_container(description: &ContainerDescription) -> Result<Option<Container>, WorldError> {
    let center = Vec3::from(description.position);
    match description.kind.as_str() {
        "cube" => {
            let size = description.size.ok_or_else(|| WorldError::MissingField {
                kind: description.kind.clone(),
                field: "size",
            })?;
            Ok(Some(Container::cuboid(
                center,
                Vec3::from(size) * 0.5,
                description.forced_inside,
            )))
        }
        "sphere" => {
            let radius = description.radius.ok_or_else(|| WorldError::MissingField {
                kind: description.kind.clone(),
                field: "radius",
            })?;
            Ok(Some(Container::sphere(
                center,
                radius,
                description.forced_inside,
            )))
        }
        other => {
            warn!(kind = other, "skipping container with unknown type");
            Ok(None)
        }
    }
}

impl Simulation {
    /// Loads a world document: containers plus molecules, inline or by path.
    ///
    /// Referenced molecule files are resolved relative to the world file's
    /// directory. Containers of unknown type are skipped with a warning;
    /// every other malformed entry aborts the load with an error.
    pub fn load_world<P: AsRef<Path>>(&mut self, path: P) -> Result<(), WorldError> {
        let path = path.as_ref();
        let description: WorldDescription = read_json(path)?;
        let base = path.parent().unwrap_or_else(|| Path::new(""));

        for container in &description.containers {
            if let Some(container) = build_container(container)? {
                self.add_container(container);
            }
        }

        for entry in &description.molecules {
            match entry {
                MoleculeEntry::Reference {
                    path: molecule_path,
                    offset,
                } => {
                    let offset = offset.map(Vec3::from).unwrap_or(Vec3::ZERO);
                    self.load_molecule(base.join(molecule_path), offset)?;
                }
                MoleculeEntry::Inline(molecule) => {
                    let offset = molecule.offset.map(Vec3::from).unwrap_or(Vec3::ZERO);
                    self.add_molecule_description(molecule, offset)?;
                }
            }
        }

        info!(
            path = %path.display(),
            bodies = self.body_count(),
            molecules = description.molecules.len(),
            containers = description.containers.len(),
            "world loaded"
        );
        Ok(())
    }

    /// Loads a molecule document from `path`, shifted by `offset`.
    ///
    /// An `offset` carried by the document itself is added on top. Returns
    /// the id of the new molecule.
    pub fn load_molecule<P: AsRef<Path>>(
        &mut self,
        path: P,
        offset: Vec3,
    ) -> Result<usize, WorldError> {
        let description: MoleculeDescription = read_json(path.as_ref())?;
        let offset = offset + description.offset.map(Vec3::from).unwrap_or(Vec3::ZERO);
        self.add_molecule_description(&description, offset)
    }

    /// Instantiates a parsed molecule description, every member shifted by
    /// `offset`.
    ///
    /// Members are created through
    /// [`create_sphere`](Simulation::create_sphere) and join the global body
    /// collection like any other body. The `offset` field of the description
    /// itself is not consulted here; callers resolve it.
    pub fn add_molecule_description(
        &mut self,
        description: &MoleculeDescription,
        offset: Vec3,
    ) -> Result<usize, WorldError> {
        for &[a, b] in &description.links {
            if a >= description.spheres.len() || b >= description.spheres.len() {
                return Err(WorldError::LinkOutOfRange {
                    a,
                    b,
                    count: description.spheres.len(),
                });
            }
        }

        let mut molecule = Molecule::new(
            description.distance,
            description.strength,
            description.links_enabled,
        );
        if let Some(coefficient) = description.internal_pressure {
            molecule = molecule.with_internal_pressure(coefficient);
        }

        for sphere in &description.spheres {
            let body = self.create_sphere(
                Vec3::from(sphere.position) + offset,
                sphere.radius,
                Vec3::from(sphere.velocity),
                Vec3::from(sphere.acceleration),
                sphere.fixed,
            );
            molecule.add_member(body);
        }

        for &[a, b] in &description.links {
            molecule.add_link(a, b);
        }

        Ok(self.add_molecule(molecule))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::{tempdir, TempDir};

    fn write_fixture(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn fixtures_vanish_with_their_directory() {
        let path = {
            let dir = tempdir().unwrap();
            write_fixture(&dir, "world.json", "{}")
        };

        assert!(!path.exists());
    }

    #[test]
    fn molecule_document_defaults_are_filled_in() {
        let description: MoleculeDescription = serde_json::from_str(
            r#"{
                "distance": 0.5,
                "linksEnabled": false,
                "strength": 0.01,
                "spheres": [{"position": [1.0, 2.0, 3.0], "radius": 0.15}]
            }"#,
        )
        .unwrap();

        assert_eq!(description.internal_pressure, None);
        assert_eq!(description.offset, None);
        assert!(description.links.is_empty());
        let sphere = &description.spheres[0];
        assert_eq!(sphere.velocity, [0.0; 3]);
        assert_eq!(sphere.acceleration, [0.0; 3]);
        assert!(!sphere.fixed);
    }

    #[test]
    fn molecule_entries_parse_inline_and_by_reference() {
        let entries: Vec<MoleculeEntry> = serde_json::from_str(
            r#"[
                {"path": "cube.json", "offset": [1.0, 0.0, 0.0]},
                {"distance": 1.0, "linksEnabled": false, "strength": 0.5, "spheres": []}
            ]"#,
        )
        .unwrap();

        assert!(matches!(&entries[0], MoleculeEntry::Reference { path, .. }
            if path == Path::new("cube.json")));
        assert!(matches!(&entries[1], MoleculeEntry::Inline(molecule)
            if molecule.strength == 0.5));
    }

    #[test]
    fn inline_molecule_populates_the_simulation() {
        let dir = tempdir().unwrap();
        let path = write_fixture(
            &dir,
            "inline-world.json",
            r#"{
                "molecules": [{
                    "distance": 1.0,
                    "linksEnabled": true,
                    "strength": 0.5,
                    "internalPressure": 0.001,
                    "spheres": [
                        {"position": [0.0, 0.0, 0.0], "radius": 0.15, "fixed": true},
                        {"position": [1.0, 0.0, 0.0], "radius": 0.15}
                    ],
                    "links": [[0, 1]]
                }],
                "containers": [
                    {"type": "cube", "position": [0.0, 0.0, 0.0], "size": [10.0, 10.0, 10.0], "forcedInside": true},
                    {"type": "sphere", "position": [0.0, 5.0, 0.0], "radius": 3.0}
                ]
            }"#,
        );

        let mut simulation = Simulation::new();
        simulation.load_world(&path).unwrap();

        assert_eq!(simulation.body_count(), 2);
        assert!(simulation.bodies()[0].fixed);
        assert_eq!(simulation.containers().len(), 2);
        assert_eq!(
            simulation.containers()[0],
            Container::cuboid(Vec3::ZERO, Vec3::splat(5.0), true)
        );
        let molecule = &simulation.molecules()[0];
        assert_eq!(molecule.members(), &[0, 1]);
        assert_eq!(molecule.links(), &[(0, 1)]);
        assert_eq!(molecule.internal_pressure(), Some(0.001));
    }

    #[test]
    fn referenced_molecule_resolves_relative_to_the_world() {
        let dir = tempdir().unwrap();
        write_fixture(
            &dir,
            "referenced-molecule.json",
            r#"{
                "distance": 0.5,
                "linksEnabled": false,
                "strength": 0.01,
                "spheres": [{"position": [0.0, 1.0, 0.0], "radius": 0.15}]
            }"#,
        );
        let world_path = write_fixture(
            &dir,
            "referencing-world.json",
            r#"{"molecules": [{"path": "referenced-molecule.json", "offset": [2.0, 0.0, 3.0]}]}"#,
        );

        let mut simulation = Simulation::new();
        simulation.load_world(&world_path).unwrap();

        let body = &simulation.bodies()[0];
        assert_eq!(body.position, Vec3::new(2.0, 1.0, 3.0));
        // Offsets shift the history too; no velocity is imparted.
        assert_eq!(body.previous_position, body.position);
    }

    #[test]
    fn document_offset_combines_with_the_callers() {
        let dir = tempdir().unwrap();
        let path = write_fixture(
            &dir,
            "offset-molecule.json",
            r#"{
                "distance": 0.5,
                "linksEnabled": false,
                "strength": 0.01,
                "offset": [0.0, 10.0, 0.0],
                "spheres": [{"position": [1.0, 0.0, 0.0], "radius": 0.15}]
            }"#,
        );

        let mut simulation = Simulation::new();
        simulation
            .load_molecule(&path, Vec3::new(0.5, 0.0, 0.0))
            .unwrap();

        assert_eq!(
            simulation.bodies()[0].position,
            Vec3::new(1.5, 10.0, 0.0)
        );
    }

    #[test]
    fn unknown_container_type_is_skipped() {
        let dir = tempdir().unwrap();
        let path = write_fixture(
            &dir,
            "unknown-container.json",
            r#"{
                "containers": [
                    {"type": "torus", "position": [0.0, 0.0, 0.0]},
                    {"type": "sphere", "position": [0.0, 0.0, 0.0], "radius": 1.0}
                ]
            }"#,
        );

        let mut simulation = Simulation::new();
        simulation.load_world(&path).unwrap();

        assert_eq!(simulation.containers().len(), 1);
    }

    #[test]
    fn cube_without_size_is_an_error() {
        let dir = tempdir().unwrap();
        let path = write_fixture(
            &dir,
            "sizeless-cube.json",
            r#"{"containers": [{"type": "cube", "position": [0.0, 0.0, 0.0]}]}"#,
        );

        let mut simulation = Simulation::new();
        let result = simulation.load_world(&path);

        assert!(matches!(
            result,
            Err(WorldError::MissingField { field: "size", .. })
        ));
    }

    #[test]
    fn out_of_range_link_aborts_before_creating_bodies() {
        let description: MoleculeDescription = serde_json::from_str(
            r#"{
                "distance": 1.0,
                "linksEnabled": true,
                "strength": 0.5,
                "spheres": [{"position": [0.0, 0.0, 0.0], "radius": 0.15}],
                "links": [[0, 3]]
            }"#,
        )
        .unwrap();

        let mut simulation = Simulation::new();
        let result = simulation.add_molecule_description(&description, Vec3::ZERO);

        assert!(matches!(
            result,
            Err(WorldError::LinkOutOfRange { a: 0, b: 3, count: 1 })
        ));
        assert_eq!(simulation.body_count(), 0);
    }

    #[test]
    fn missing_file_reports_an_io_error() {
        let dir = tempdir().unwrap();

        let mut simulation = Simulation::new();
        let result = simulation.load_world(dir.path().join("missing.json"));

        assert!(matches!(result, Err(WorldError::Io { .. })));
    }

    #[test]
    fn malformed_json_reports_a_parse_error() {
        let dir = tempdir().unwrap();
        let path = write_fixture(&dir, "malformed.json", "{ not json");

        let mut simulation = Simulation::new();
        let result = simulation.load_world(&path);

        assert!(matches!(result, Err(WorldError::Parse { .. })));
    }
}
