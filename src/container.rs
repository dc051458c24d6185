use glam::Vec3;

use crate::body::Body;

/// A bounding volume that keeps bodies inside itself.
///
/// Containers clamp a body's position during the collision phase and never
/// touch its history, so a clamp translates into momentum like any other
/// positional correction. A loose container (`forced_inside` unset) only
/// acts on bodies whose center is judged inside; a forced one clamps
/// unconditionally and doubles as a way to teleport strays back in.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Container {
    /// An axis-aligned box.
    Cuboid {
        /// Center of the box.
        center: Vec3,
        /// Half the box extent along each axis.
        half_extent: Vec3,
        /// Clamp bodies that are outside as well.
        forced_inside: bool,
    },
    /// A sphere.
    Sphere {
        /// Center of the sphere.
        center: Vec3,
        /// Radius of the sphere.
        radius: f32,
        /// Clamp bodies that are outside as well.
        forced_inside: bool,
    },
}

impl Container {
    /// Creates an axis-aligned cuboid container.
    #[inline]
    pub fn cuboid(center: Vec3, half_extent: Vec3, forced_inside: bool) -> Self {
        Self::Cuboid {
            center,
            half_extent,
            forced_inside,
        }
    }

    /// Creates a spherical container.
    #[inline]
    pub fn sphere(center: Vec3, radius: f32, forced_inside: bool) -> Self {
        Self::Sphere {
            center,
            radius,
            forced_inside,
        }
    }

    /// Whether `point` is judged inside the container.
    ///
    /// The judgment looks at the point alone; a body's radius only matters
    /// once clamping is under way.
    pub fn contains(&self, point: Vec3) -> bool {
        match *self {
            Self::Cuboid {
                center,
                half_extent,
                ..
            } => {
                let min = center - half_extent;
                let max = center + half_extent;
                point.x > min.x
                    && point.x < max.x
                    && point.y > min.y
                    && point.y < max.y
                    && point.z > min.z
                    && point.z < max.z
            }
            Self::Sphere { center, radius, .. } => point.distance(center) <= radius,
        }
    }

    /// Where a body of `radius` centered at `position` ends up after clamping.
    ///
    /// The pure form of [`resolve`](Container::resolve), shared with the
    /// record-based pass of the distributed exchange.
    pub fn resolved_position(&self, position: Vec3, radius: f32) -> Vec3 {
        match *self {
            Self::Cuboid {
                center,
                half_extent,
                forced_inside,
            } => {
                if !forced_inside && !self.contains(position) {
                    return position;
                }
                let min = center - half_extent;
                let max = center + half_extent;
                let mut target = position;
                // Axis by axis, min face first. A body wider than the box
                // settles on the max face.
                if target.x - radius < min.x {
                    target.x = min.x + radius;
                }
                if target.x + radius > max.x {
                    target.x = max.x - radius;
                }
                if target.y - radius < min.y {
                    target.y = min.y + radius;
                }
                if target.y + radius > max.y {
                    target.y = max.y - radius;
                }
                if target.z - radius < min.z {
                    target.z = min.z + radius;
                }
                if target.z + radius > max.z {
                    target.z = max.z - radius;
                }
                target
            }
            Self::Sphere {
                center,
                radius: container_radius,
                forced_inside,
            } => {
                let axis = position - center;
                let distance = axis.length();
                if !forced_inside && distance > container_radius {
                    return position;
                }
                let penetration = distance + radius - container_radius;
                if penetration > 0.0 && distance > 0.0 {
                    position - axis / distance * penetration
                } else {
                    position
                }
            }
        }
    }

    /// Clamps `body` into the container, honoring `forced_inside`.
    ///
    /// Routed through [`Body::move_by`], so fixed bodies stay where they are.
    #[inline]
    pub fn resolve(&self, body: &mut Body) {
        let target = self.resolved_position(body.position, body.radius);
        body.move_by(target - body.position);
    }
}
