// Two-link arm kinematics
// Converts worktable coordinates (cm) to joint angles (degrees) and back.
//
// The arm is a planar two-link chain with a fixed lateral offset at the end
// effector: link 1 of length L1, then link 2 of length L2 mounted at right
// angles to an offset arm. Angles are measured relative to the +y axis so
// that (0, 0) points the arm straight ahead.

use crate::config::{END_OFFSET, J1_LIMIT, J2_LIMIT, LINK_1, LINK_2};

/// Joint-space solution for a worktable target
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArmAngles {
    /// Joint 1 angle in degrees, clamped to its mechanical limit
    pub theta1: f64,
    /// Joint 2 angle in degrees, clamped to its mechanical limit
    pub theta2: f64,
    /// False when the target was out of reach or a joint limit clamped the
    /// solution. The angles then point at the nearest attainable pose.
    pub reachable: bool,
}

/// Planar two-link inverse/forward kinematics solver
#[derive(Debug, Clone)]
pub struct ArmSolver {
    l1: f64,
    l1_sq: f64,
    // Effective second link: L2 plus the end-effector offset folded in
    d2: f64,
    d2_sq: f64,
    beta2: f64,
    max_reach: f64,
}

impl ArmSolver {
    pub fn new(l1: f64, l2: f64, offset: f64) -> Self {
        let d2_sq = l2 * l2 + offset * offset;
        let d2 = d2_sq.sqrt();
        let gamma2 = (l2 / offset).atan();
        Self {
            l1,
            l1_sq: l1 * l1,
            d2,
            d2_sq,
            beta2: std::f64::consts::FRAC_PI_2 - gamma2,
            max_reach: l1 + d2,
        }
    }

    /// Solver for the deployed arm geometry
    pub fn deployed() -> Self {
        Self::new(LINK_1, LINK_2, END_OFFSET)
    }

    /// Inverse kinematics in radians. Returns false when the target lies
    /// beyond the arm's reach; the output then points the fully extended
    /// arm toward the target.
    pub fn inverse(&self, x: f64, y: f64, theta1: &mut f64, theta2: &mut f64) -> bool {
        let d1_sq = x * x + y * y;
        let d1 = d1_sq.sqrt();

        if self.max_reach < d1 {
            // x and y swapped so the angle is measured from the +y axis
            *theta1 = x.atan2(y);
            *theta2 = -self.beta2;
            return false;
        }

        let cos_alpha = (d1_sq + self.l1_sq - self.d2_sq) / (2.0 * d1 * self.l1);
        let cos_beta1 = (self.d2_sq + self.l1_sq - d1_sq) / (2.0 * self.d2 * self.l1);
        // Targets inside the folded-arm dead zone push the cosines out of
        // [-1, 1]; clamp to the nearest attainable fold and report failure
        let attainable = cos_alpha.abs() <= 1.0 && cos_beta1.abs() <= 1.0;
        let alpha = cos_alpha.clamp(-1.0, 1.0).acos();
        let beta1 = cos_beta1.clamp(-1.0, 1.0).acos();

        *theta1 = x.atan2(y) - alpha;
        *theta2 = std::f64::consts::PI - beta1 - self.beta2;
        attainable
    }

    /// Forward kinematics in radians: where the end effector actually is for
    /// the given joint angles. Used to fix up a clamped target.
    pub fn forward(&self, theta1: f64, theta2: f64) -> (f64, f64) {
        let x = self.l1 * theta1.sin() + self.d2 * (theta1 + theta2 + self.beta2).sin();
        let y = self.l1 * theta1.cos() + self.d2 * (theta1 + theta2 + self.beta2).cos();
        (x, y)
    }

    /// Full pipeline for a motion command: solve IK, convert to degrees and
    /// clamp to the joint limits. `reachable` is false if either the target
    /// was out of reach or a limit clamped the solution.
    pub fn solve(&self, x: f64, y: f64) -> ArmAngles {
        let mut t1 = 0.0;
        let mut t2 = 0.0;
        let mut reachable = self.inverse(x, y, &mut t1, &mut t2);

        let mut theta1 = t1.to_degrees();
        let mut theta2 = t2.to_degrees();

        theta1 = clamp_angle(theta1, J1_LIMIT, &mut reachable);
        theta2 = clamp_angle(theta2, J2_LIMIT, &mut reachable);

        ArmAngles {
            theta1,
            theta2,
            reachable,
        }
    }
}

fn clamp_angle(angle: f64, limit: f64, reachable: &mut bool) -> f64 {
    if angle < -limit {
        *reachable = false;
        -limit
    } else if angle > limit {
        *reachable = false;
        limit
    } else {
        angle
    }
}
