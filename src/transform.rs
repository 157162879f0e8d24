// src/transform.rs
//
// Rigid-transform algebra over poses and 4x4 homogeneous matrices.
//
// All operations are pure functions and apply independently over the
// environment batch dimension. Matrices are built from translation + unit
// quaternion; rotation matrices right-multiply column vectors. Callers
// normalize quaternions before conversion, so inputs are assumed
// well-formed and there are no error conditions here.

use glam::{DMat4, DQuat, DVec3};

/// Position + orientation of a rigid body.
///
/// The orientation is re-normalized on construction and before every
/// conversion into matrix form, so a pose read back from a simulator with
/// accumulated drift stays safe to compose.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RigidPose {
    pub pos: DVec3,
    pub rot: DQuat,
}

impl RigidPose {
    pub const IDENTITY: RigidPose = RigidPose {
        pos: DVec3::ZERO,
        rot: DQuat::IDENTITY,
    };

    pub fn new(pos: DVec3, rot: DQuat) -> Self {
        Self {
            pos,
            rot: rot.normalize(),
        }
    }

    /// Homogeneous matrix form of this pose.
    pub fn to_mat(&self) -> DMat4 {
        DMat4::from_rotation_translation(self.rot.normalize(), self.pos)
    }

    /// Recover a pose from a rigid homogeneous matrix.
    pub fn from_mat(m: &DMat4) -> Self {
        let (_, rot, pos) = m.to_scale_rotation_translation();
        Self {
            pos,
            rot: rot.normalize(),
        }
    }
}

impl Default for RigidPose {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Rigid transform composition, `C = A ∘ B`.
#[inline]
pub fn compose(a: &DMat4, b: &DMat4) -> DMat4 {
    *a * *b
}

/// Inverse of a rigid transform.
#[inline]
pub fn invert(a: &DMat4) -> DMat4 {
    a.inverse()
}

/// Apply a rigid transform to a point.
#[inline]
pub fn apply_point(a: &DMat4, p: DVec3) -> DVec3 {
    a.transform_point3(p)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_pose() -> RigidPose {
        RigidPose::new(
            DVec3::new(0.3, -0.7, 0.5),
            DQuat::from_euler(glam::EulerRot::XYZ, 0.4, -0.2, 1.1),
        )
    }

    #[test]
    fn compose_with_inverse_is_identity() {
        let a = sample_pose().to_mat();
        let ident = compose(&a, &invert(&a));
        let expect = DMat4::IDENTITY;
        for col in 0..4 {
            for row in 0..4 {
                assert!(
                    (ident.col(col)[row] - expect.col(col)[row]).abs() < 1e-12,
                    "compose(A, invert(A)) deviates at ({row},{col})"
                );
            }
        }
    }

    #[test]
    fn pose_matrix_roundtrip() {
        let pose = sample_pose();
        let back = RigidPose::from_mat(&pose.to_mat());
        assert!((pose.pos - back.pos).length() < 1e-12);
        // q and -q encode the same rotation
        let dot = pose.rot.dot(back.rot).abs();
        assert!((dot - 1.0).abs() < 1e-12);
    }

    #[test]
    fn apply_point_matches_manual_composition() {
        let pose = sample_pose();
        let p = DVec3::new(0.1, 0.2, 0.3);
        let via_mat = apply_point(&pose.to_mat(), p);
        let manual = pose.rot * p + pose.pos;
        assert!((via_mat - manual).length() < 1e-12);
    }

    #[test]
    fn composition_is_associative_on_points() {
        let a = sample_pose().to_mat();
        let b = RigidPose::new(DVec3::new(-0.2, 0.0, 0.9), DQuat::from_rotation_z(0.7)).to_mat();
        let p = DVec3::new(1.0, -1.0, 0.5);
        let left = apply_point(&compose(&a, &b), p);
        let right = apply_point(&a, apply_point(&b, p));
        assert!((left - right).length() < 1e-12);
    }

    #[test]
    fn non_unit_quaternion_is_normalized_before_use() {
        let raw = DQuat::from_xyzw(0.0, 0.0, 2.0, 0.0);
        let pose = RigidPose::new(DVec3::ZERO, raw);
        let p = apply_point(&pose.to_mat(), DVec3::X);
        // z-quat of any magnitude is a 180-degree turn about z
        assert!((p - DVec3::new(-1.0, 0.0, 0.0)).length() < 1e-12);
    }
}
