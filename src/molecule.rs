use glam::Vec3;

use crate::body::{pair_mut, Body};

/// A constraint group holding its member bodies at a target distance.
///
/// Members are ids into the simulation's body collection; the group owns no
/// bodies itself. Every call to
/// [`maintain_distances`](Molecule::maintain_distances) applies a single
/// relaxation step to each governed pair, so convergence comes from the
/// substep loop calling it over and over rather than from any inner
/// iteration.
#[derive(Clone, Debug)]
pub struct Molecule {
    members: Vec<usize>,
    links: Vec<(usize, usize)>,
    target_distance: f32,
    strength: f32,
    links_enabled: bool,
    internal_pressure: Option<f32>,
}

impl Default for Molecule {
    /// Half-unit spacing with a gentle pull, all member pairs governed, no
    /// internal pressure.
    fn default() -> Self {
        Self::new(0.5, 0.01, false)
    }
}

impl Molecule {
    /// Creates an empty group.
    ///
    /// With `links_enabled` the distance pass only corrects pairs registered
    /// through [`add_link`](Molecule::add_link); otherwise every unordered
    /// member pair is corrected. `strength` scales each correction and is
    /// meaningful in `(0, 1]`, where `1.0` closes the full error of an
    /// isolated pair in one call.
    pub fn new(target_distance: f32, strength: f32, links_enabled: bool) -> Self {
        Self {
            members: Vec::new(),
            links: Vec::new(),
            target_distance,
            strength,
            links_enabled,
            internal_pressure: None,
        }
    }

    /// Enables the internal-pressure pass with the given coefficient.
    pub fn with_internal_pressure(mut self, coefficient: f32) -> Self {
        self.internal_pressure = Some(coefficient);
        self
    }

    /// Adds a body to the group.
    ///
    /// The id is checked against the body arena when the group is registered
    /// with a simulation.
    pub fn add_member(&mut self, body: usize) {
        self.members.push(body);
    }

    /// Links two members by their index in the member list.
    ///
    /// # Panics
    ///
    /// Panics if either index does not reference an added member.
    pub fn add_link(&mut self, a: usize, b: usize) {
        assert!(
            a < self.members.len() && b < self.members.len(),
            "link [{a}, {b}] references members beyond the {} added",
            self.members.len()
        );
        self.links.push((a, b));
    }

    /// Body ids of the group's members, in insertion order.
    pub fn members(&self) -> &[usize] {
        &self.members
    }

    /// Registered links, as pairs of member-list indices.
    pub fn links(&self) -> &[(usize, usize)] {
        &self.links
    }

    /// Target distance between governed members.
    #[inline]
    pub fn target_distance(&self) -> f32 {
        self.target_distance
    }

    /// Internal-pressure coefficient, if the pass is enabled.
    #[inline]
    pub fn internal_pressure(&self) -> Option<f32> {
        self.internal_pressure
    }

    /// Applies one distance correction to every governed pair.
    ///
    /// Pairs are relaxed in order, each correction seeing the positions the
    /// previous one produced. Corrections route through
    /// [`Body::move_by`], so a fixed member anchors its end and the free
    /// partner closes only its own half.
    pub fn maintain_distances(&self, bodies: &mut [Body]) {
        if self.links_enabled {
            for &(a, b) in &self.links {
                self.correct_pair(bodies, self.members[a], self.members[b]);
            }
        } else {
            for i in 0..self.members.len() {
                for j in i + 1..self.members.len() {
                    self.correct_pair(bodies, self.members[i], self.members[j]);
                }
            }
        }
    }

    fn correct_pair(&self, bodies: &mut [Body], first: usize, second: usize) {
        if first == second {
            return;
        }
        let (a, b) = pair_mut(bodies, first, second);
        let axis = a.position - b.position;
        let current = axis.length();
        // Coincident members have no axis to correct along.
        if current == 0.0 {
            return;
        }
        let ratio = (current - self.target_distance) / current * self.strength;
        let correction = axis * (ratio * 0.5);
        a.move_by(-correction);
        b.move_by(correction);
    }

    /// Pushes every member away from the group's centroid, if enabled.
    ///
    /// The push grows linearly with the member's distance from the centroid,
    /// inflating hollow shapes against their distance constraints. Members
    /// sitting exactly on the centroid are skipped.
    pub fn apply_internal_pressure(&self, bodies: &mut [Body]) {
        let Some(coefficient) = self.internal_pressure else {
            return;
        };
        if self.members.is_empty() {
            return;
        }

        let mut centroid = Vec3::ZERO;
        for &member in &self.members {
            centroid += bodies[member].position;
        }
        centroid /= self.members.len() as f32;

        for &member in &self.members {
            let axis = bodies[member].position - centroid;
            let distance = axis.length();
            if distance > 0.0 {
                let push = axis / distance * (coefficient * distance);
                bodies[member].move_by(push);
            }
        }
    }
}
