use glam::Vec3;

/// A spherical body advanced by Verlet integration.
///
/// A body stores its current and previous positions instead of an
/// integrated velocity; [`integrate`](Body::integrate) advances it by its
/// own inertia plus the forces accumulated since the last call. The
/// [`velocity`](Body::velocity) field is derived for consumers such as
/// renderers and is never fed back into integration, so positional
/// corrections applied between steps translate directly into momentum.
#[derive(Clone, Debug, PartialEq)]
pub struct Body {
    /// Current position of the center.
    pub position: Vec3,
    /// Position of the center before the last integration step.
    pub previous_position: Vec3,
    /// Velocity estimate derived by the last integration step.
    pub velocity: Vec3,
    /// Radius of the body. Must be greater than zero.
    pub radius: f32,
    /// A fixed body never moves, neither by integration nor by displacement.
    pub fixed: bool,
    /// Suppresses integration while leaving the body collidable and movable.
    ///
    /// Used for interactive dragging: suppress the body, displace it with
    /// [`move_by`](Body::move_by), then release it. While suppressed the
    /// position history is pinned to the current position so the body does
    /// not fling itself on release.
    pub updating_suppressed: bool,
    accumulated_force: Vec3,
}

impl Body {
    /// Creates a free body at rest at `position`.
    #[inline]
    pub fn new(position: Vec3, radius: f32) -> Self {
        Self {
            position,
            previous_position: position,
            velocity: Vec3::ZERO,
            radius,
            fixed: false,
            updating_suppressed: false,
            accumulated_force: Vec3::ZERO,
        }
    }

    /// Accumulates a force consumed by the next [`integrate`](Body::integrate) call.
    #[inline]
    pub fn add_force(&mut self, force: Vec3) {
        self.accumulated_force += force;
    }

    /// Force accumulated since the last integration step.
    #[inline]
    pub fn accumulated_force(&self) -> Vec3 {
        self.accumulated_force
    }

    /// Advances the body by one Verlet step of `dt` seconds.
    ///
    /// Fixed and suppressed bodies keep their position, a suppressed body
    /// additionally resetting its history so its velocity reads zero. The
    /// force accumulator is cleared on every call, whatever the body's
    /// state, so no force outlives the step it was accumulated for.
    pub fn integrate(&mut self, dt: f32) {
        if !self.fixed {
            let before = self.position;
            if !self.updating_suppressed {
                self.position +=
                    self.position - self.previous_position + self.accumulated_force * dt * dt;
            }
            self.previous_position = before;
            self.velocity = (self.position - self.previous_position) / dt;
        }
        self.accumulated_force = Vec3::ZERO;
    }

    /// Displaces the body without touching its position history.
    ///
    /// A no-op when the body is fixed. Every positional correction of the
    /// engine routes through this method, so fixedness is enforced in one
    /// place.
    #[inline]
    pub fn move_by(&mut self, delta: Vec3) {
        if !self.fixed {
            self.position += delta;
        }
    }

    /// Resolves the overlap between two bodies, moving each by half of it.
    ///
    /// Both bodies are treated as equal mass; a fixed partner simply absorbs
    /// its half. Coincident centers are left untouched since the separation
    /// axis is undefined.
    pub fn collide_with(&mut self, other: &mut Body) {
        let axis = self.position - other.position;
        let distance = axis.length();
        let overlap = self.radius + other.radius - distance;
        if overlap > 0.0 && distance > 0.0 {
            let half = axis / distance * (overlap * 0.5);
            self.move_by(half);
            other.move_by(-half);
        }
    }
}

/// Mutable references to two distinct bodies of the same slice.
pub(crate) fn pair_mut(bodies: &mut [Body], a: usize, b: usize) -> (&mut Body, &mut Body) {
    debug_assert_ne!(a, b);
    if a < b {
        let (left, right) = bodies.split_at_mut(b);
        (&mut left[a], &mut right[0])
    } else {
        let (left, right) = bodies.split_at_mut(a);
        (&mut right[0], &mut left[b])
    }
}
