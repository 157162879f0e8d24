// src/attach.rs
//
// Attachable-point registry + per-arm attachment latches.
//
// Grasp sites are authored in a per-leaf camera frame (a look-at frame
// anchored on the observation cameras), projected to world space at
// setup, filtered by a world-height band, and cached together with the
// setup pose of their door leaf. At runtime each arm latches onto the
// first registered point that comes within the proximity threshold of
// its sphere proxy; from then on the arm's effective gripper pose is
// the authored site carried rigidly along with the moving leaf.
//
// A latch is permanent for the episode. Ties between multiple in-range
// points are broken by a uniform draw over the full batch; the draw is
// made every refresh for every (env, point) pair so the RNG stream does
// not depend on which envs are already latched.

use glam::{DMat3, DMat4, DVec3};
use rand::Rng;

use crate::config::AttachConfig;
use crate::error::TaskError;
use crate::sim::{BodyHandle, SimulatorBackend};
use crate::state::NUM_ARMS;
use crate::transform::RigidPose;

/// Which door leaf a grasp site belongs to. Arm 0 starts on the left
/// side, arm 1 on the right; either arm may latch either leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoorLeaf {
    Left,
    Right,
}

impl DoorLeaf {
    /// Asset body name carrying this leaf.
    pub fn body_name(&self) -> &'static str {
        match self {
            DoorLeaf::Left => "link_1",
            DoorLeaf::Right => "link_2",
        }
    }

    pub fn arm(&self) -> usize {
        match self {
            DoorLeaf::Left => 0,
            DoorLeaf::Right => 1,
        }
    }
}

/// One authored grasp site, expressed in its leaf's camera frame.
#[derive(Debug, Clone)]
pub struct AttachPointSpec {
    pub translation: DVec3,
    pub rotation: DMat3,
    pub leaf: DoorLeaf,
}

// Authored site constants. The lateral/depth pair places each site on
// the free edge of its (open) leaf; the height list spans the leaf so
// the height-band filter has something to discard at both ends.
const AUTHOR_HEIGHTS: [f64; 5] = [0.2, 0.35, 0.5, 0.62, 0.8];
const AUTHOR_LATERAL: f64 = 0.4975;
const AUTHOR_DEPTH: f64 = 3.0647;

/// The stock grasp-site set: five sites per leaf at staggered heights.
pub fn default_door_points() -> Vec<AttachPointSpec> {
    let mut specs = Vec::with_capacity(AUTHOR_HEIGHTS.len() * 2);
    for (leaf, lateral) in [
        (DoorLeaf::Left, AUTHOR_LATERAL),
        (DoorLeaf::Right, -AUTHOR_LATERAL),
    ] {
        for &h in &AUTHOR_HEIGHTS {
            specs.push(AttachPointSpec {
                translation: DVec3::new(h, lateral, AUTHOR_DEPTH),
                rotation: DMat3::IDENTITY,
                leaf,
            });
        }
    }
    specs
}

/// Camera placement for one leaf: a look-at frame from the side camera
/// toward the scene origin, with the translation negated and an extra
/// quarter-turn about z (the convention the sites were authored in).
pub fn leaf_camera(leaf: DoorLeaf) -> DMat4 {
    let side = match leaf {
        DoorLeaf::Left => 1.0,
        DoorLeaf::Right => -1.0,
    };
    let eye = DVec3::new(0.2, side * 2.0, 0.0);
    let forward = (-eye).normalize();
    let right = forward.cross(DVec3::Z).normalize();
    let up = right.cross(forward);
    let rot = DMat3::from_cols(right, up, -forward)
        * DMat3::from_rotation_z(std::f64::consts::FRAC_PI_2);
    mat4_from_rot_translation(&rot, -eye)
}

fn mat4_from_rot_translation(rot: &DMat3, t: DVec3) -> DMat4 {
    DMat4::from_cols(
        rot.x_axis.extend(0.0),
        rot.y_axis.extend(0.0),
        rot.z_axis.extend(0.0),
        t.extend(1.0),
    )
}

/// A grasp site after world projection, with its setup caches.
#[derive(Debug, Clone)]
pub struct AttachablePoint {
    pub id: usize,
    pub leaf: DoorLeaf,
    pub body: BodyHandle,
    /// World position of the site at setup.
    pub world_point: DVec3,
    /// Pose of the carrying leaf at setup.
    body_setup: DMat4,
    /// Site transform re-expressed against the setup leaf pose.
    related: DMat4,
}

impl AttachablePoint {
    /// Pose of the site carried rigidly with its leaf's current pose.
    pub fn carried_pose(&self, body_now: &DMat4) -> RigidPose {
        let delta = *body_now * self.body_setup.inverse();
        RigidPose::from_mat(&(delta * self.related * self.body_setup))
    }
}

/// All surviving grasp sites, indexed per leaf.
#[derive(Debug, Clone)]
pub struct AttachmentRegistry {
    points: Vec<AttachablePoint>,
    per_leaf: [Vec<usize>; 2],
}

impl AttachmentRegistry {
    /// Project the authored sites to world space and cache setup poses.
    ///
    /// Must be called after the scene is in its setup state (doors
    /// open): the cached leaf poses anchor the carried-pose math. The
    /// scene is identical across envs, so env 0 stands in for all.
    pub fn build(
        specs: &[AttachPointSpec],
        cfg: &AttachConfig,
        backend: &dyn SimulatorBackend,
    ) -> Result<Self, TaskError> {
        let mut points = Vec::new();
        let mut per_leaf: [Vec<usize>; 2] = [Vec::new(), Vec::new()];
        for spec in specs {
            let body = backend.find_body(spec.leaf.body_name()).ok_or_else(|| {
                TaskError::AssetContract(format!(
                    "scene asset has no body named '{}'",
                    spec.leaf.body_name()
                ))
            })?;
            let world =
                leaf_camera(spec.leaf) * mat4_from_rot_translation(&spec.rotation, spec.translation);
            let world_point = world.w_axis.truncate();
            if world_point.z <= cfg.height_band.0 || world_point.z >= cfg.height_band.1 {
                continue;
            }
            let body_setup = backend.body_pose(0, body).to_mat();
            let id = points.len();
            per_leaf[spec.leaf.arm()].push(id);
            points.push(AttachablePoint {
                id,
                leaf: spec.leaf,
                body,
                world_point,
                body_setup,
                related: world * body_setup.inverse(),
            });
        }
        for (arm, ids) in per_leaf.iter().enumerate() {
            if ids.is_empty() {
                return Err(TaskError::Config(format!(
                    "no attachable points survive height filtering for arm {arm}"
                )));
            }
        }
        Ok(Self { points, per_leaf })
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn point(&self, id: usize) -> &AttachablePoint {
        &self.points[id]
    }

    /// Site ids on the leaf arm `arm` starts nearest to. Grouping
    /// only; latching considers every registered site.
    pub fn arm_points(&self, arm: usize) -> &[usize] {
        &self.per_leaf[arm]
    }
}

#[derive(Debug, Clone)]
struct ArmAttachment {
    attached: Vec<bool>,
    point: Vec<Option<usize>>,
}

impl ArmAttachment {
    fn new(num_envs: usize) -> Self {
        Self {
            attached: vec![false; num_envs],
            point: vec![None; num_envs],
        }
    }
}

/// Per-arm, per-env attachment latches over a registry.
pub struct AttachmentTracker {
    registry: AttachmentRegistry,
    arms: [ArmAttachment; NUM_ARMS],
    threshold: f64,
}

impl AttachmentTracker {
    pub fn new(registry: AttachmentRegistry, num_envs: usize, threshold: f64) -> Self {
        Self {
            registry,
            arms: [ArmAttachment::new(num_envs), ArmAttachment::new(num_envs)],
            threshold,
        }
    }

    pub fn registry(&self) -> &AttachmentRegistry {
        &self.registry
    }

    pub fn attached(&self, arm: usize) -> &[bool] {
        &self.arms[arm].attached
    }

    pub fn point_of(&self, arm: usize, env: usize) -> Option<usize> {
        self.arms[arm].point[env]
    }

    /// Latch any unattached env whose proxy is within the threshold of
    /// a registered site. Every site is a candidate for either arm.
    /// `proxy_pos[env]` is the arm's sphere position. Draws are made
    /// for every (env, site) pair regardless of latch state, so the
    /// rng stream is latch-independent.
    pub fn refresh<R: Rng>(&mut self, arm: usize, proxy_pos: &[DVec3], rng: &mut R) {
        let num_sites = self.registry.len();
        let num_envs = proxy_pos.len();
        let mut draws = vec![0.0f64; num_envs * num_sites];
        for d in draws.iter_mut() {
            *d = rng.gen::<f64>();
        }
        let state = &mut self.arms[arm];
        for (env, &pos) in proxy_pos.iter().enumerate() {
            if state.attached[env] {
                continue;
            }
            let mut best: Option<(f64, usize)> = None;
            for (id, p) in self.registry.points.iter().enumerate() {
                if pos.distance(p.world_point) >= self.threshold {
                    continue;
                }
                let draw = draws[env * num_sites + id];
                if best.map_or(true, |(b, _)| draw > b) {
                    best = Some((draw, id));
                }
            }
            if let Some((_, id)) = best {
                state.attached[env] = true;
                state.point[env] = Some(id);
            }
        }
    }

    /// Effective gripper pose: the carried site pose when latched, the
    /// raw proxy pose otherwise.
    pub fn effective_pose(
        &self,
        arm: usize,
        env: usize,
        raw: RigidPose,
        backend: &dyn SimulatorBackend,
    ) -> RigidPose {
        match self.arms[arm].point[env] {
            Some(id) => {
                let p = &self.registry.points[id];
                let body_now = backend.body_pose(env, p.body).to_mat();
                p.carried_pose(&body_now)
            }
            None => raw,
        }
    }

    /// Release both arms' latches for the listed envs.
    pub fn reset(&mut self, env_ids: &[usize]) {
        for arm in &mut self.arms {
            for &env in env_ids {
                arm.attached[env] = false;
                arm.point[env] = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::KinematicBackend;
    use rand_chacha::rand_core::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn open_backend(envs: usize) -> KinematicBackend {
        let mut b = KinematicBackend::new(envs, 1.0 / 60.0);
        let e: Vec<usize> = (0..envs).collect();
        let row = [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.57, 1.57];
        let mut all = Vec::new();
        for _ in 0..envs {
            all.extend_from_slice(&row);
        }
        b.reset_envs(&e, &all);
        b
    }

    fn registry(backend: &KinematicBackend) -> AttachmentRegistry {
        AttachmentRegistry::build(&default_door_points(), &AttachConfig::default(), backend)
            .unwrap()
    }

    #[test]
    fn height_band_discards_end_sites() {
        let b = open_backend(1);
        let reg = registry(&b);
        // 5 authored per leaf; heights 0.2 and 0.8 fall outside (0.25, 0.7).
        assert_eq!(reg.len(), 6);
        assert_eq!(reg.arm_points(0).len(), 3);
        assert_eq!(reg.arm_points(1).len(), 3);
        for id in 0..reg.len() {
            let z = reg.point(id).world_point.z;
            assert!(z > 0.25 && z < 0.7, "z = {z}");
        }
    }

    #[test]
    fn sites_project_onto_open_leaf_edges() {
        let b = open_backend(1);
        let reg = registry(&b);
        for &id in reg.arm_points(0) {
            let p = reg.point(id).world_point;
            assert!((p.x - 0.6).abs() < 1e-3, "x = {}", p.x);
            assert!((p.y - 1.0).abs() < 1e-3, "y = {}", p.y);
        }
        for &id in reg.arm_points(1) {
            let p = reg.point(id).world_point;
            assert!((p.x - 0.6).abs() < 1e-3);
            assert!((p.y + 1.0).abs() < 1e-3);
        }
    }

    #[test]
    fn missing_body_is_a_contract_error() {
        // A backend with no door bodies at all.
        struct Empty;
        impl SimulatorBackend for Empty {
            fn num_envs(&self) -> usize {
                1
            }
            fn num_joints_per_env(&self) -> usize {
                0
            }
            fn num_bodies_per_env(&self) -> usize {
                0
            }
            fn find_body(&self, _name: &str) -> Option<BodyHandle> {
                None
            }
            fn find_joint(&self, _name: &str) -> Option<usize> {
                None
            }
            fn joint_limits(&self, _joint: usize) -> Option<(f64, f64)> {
                None
            }
            fn body_pose(&self, _env: usize, _body: BodyHandle) -> RigidPose {
                RigidPose::IDENTITY
            }
            fn joint_position(&self, _env: usize, _joint: usize) -> f64 {
                0.0
            }
            fn joint_velocity(&self, _env: usize, _joint: usize) -> f64 {
                0.0
            }
            fn set_joint_position_targets(&mut self, _e: &[usize], _j: &[usize], _t: &[f64]) {}
            fn override_joint_states(&mut self, _e: &[usize], _j: &[usize], _p: &[f64]) {}
            fn apply_body_force(&mut self, _e: usize, _b: BodyHandle, _f: glam::DVec3) {}
            fn step(&mut self) {}
            fn reset_envs(&mut self, _e: &[usize], _p: &[f64]) {}
        }
        let err = AttachmentRegistry::build(
            &default_door_points(),
            &AttachConfig::default(),
            &Empty,
        )
        .unwrap_err();
        assert!(matches!(err, TaskError::AssetContract(_)));
    }

    #[test]
    fn latch_is_sticky_until_reset() {
        let b = open_backend(2);
        let reg = registry(&b);
        let site = reg.point(reg.arm_points(0)[0]).world_point;
        let mut tracker = AttachmentTracker::new(reg, 2, 0.1);
        let mut rng = ChaCha8Rng::seed_from_u64(1);

        // Env 0 in range, env 1 far away.
        let near = vec![site + DVec3::new(0.05, 0.0, 0.0), DVec3::new(5.0, 5.0, 5.0)];
        tracker.refresh(0, &near, &mut rng);
        assert!(tracker.attached(0)[0]);
        assert!(!tracker.attached(0)[1]);
        let chosen = tracker.point_of(0, 0);

        // Moving out of range does not release the latch or change the
        // chosen site.
        let far = vec![DVec3::new(5.0, 5.0, 5.0); 2];
        tracker.refresh(0, &far, &mut rng);
        assert!(tracker.attached(0)[0]);
        assert_eq!(tracker.point_of(0, 0), chosen);

        // Arms latch independently.
        assert!(!tracker.attached(1)[0]);

        tracker.reset(&[0]);
        assert!(!tracker.attached(0)[0]);
        assert_eq!(tracker.point_of(0, 0), None);
    }

    #[test]
    fn either_arm_can_latch_either_leaf() {
        let b = open_backend(1);
        let reg = registry(&b);
        let right_site = reg.point(reg.arm_points(1)[0]).world_point;
        let mut tracker = AttachmentTracker::new(reg, 1, 0.1);
        let mut rng = ChaCha8Rng::seed_from_u64(2);

        // Arm 0 standing on a right-leaf site latches it.
        tracker.refresh(0, &[right_site], &mut rng);
        assert!(tracker.attached(0)[0]);
        let id = tracker.point_of(0, 0).unwrap();
        assert_eq!(tracker.registry().point(id).leaf, DoorLeaf::Right);
    }

    #[test]
    fn selection_respects_the_threshold() {
        let b = open_backend(1);
        let reg = registry(&b);
        // The three surviving left-leaf sites sit roughly 0.12-0.15 apart
        // in z. Standing 0.05 off the middle one leaves exactly one
        // candidate in range, so the choice is deterministic across seeds.
        let mid = *reg
            .arm_points(0)
            .iter()
            .find(|&&id| (reg.point(id).world_point.z - 0.5).abs() < 0.05)
            .unwrap();
        let proxy = reg.point(mid).world_point + DVec3::new(0.05, 0.0, 0.0);
        for id in 0..reg.len() {
            let d = (reg.point(id).world_point - proxy).length();
            if id != mid {
                assert!(d > 0.1, "site {id} unexpectedly in range: {d}");
            }
        }

        for seed in 0..50 {
            let mut tracker = AttachmentTracker::new(reg.clone(), 1, 0.1);
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            tracker.refresh(0, &[proxy], &mut rng);
            assert_eq!(tracker.point_of(0, 0), Some(mid));
        }
    }

    #[test]
    fn tiebreak_draws_do_not_depend_on_latch_state() {
        let b = open_backend(1);
        let reg = registry(&b);
        let site = reg.point(reg.arm_points(0)[0]).world_point;

        // Tracker A latches on the first refresh, tracker B never does.
        let mut a = AttachmentTracker::new(reg.clone(), 1, 0.1);
        let mut b2 = AttachmentTracker::new(reg, 1, 0.1);
        let mut rng_a = ChaCha8Rng::seed_from_u64(9);
        let mut rng_b = ChaCha8Rng::seed_from_u64(9);

        let near = vec![site];
        let far = vec![DVec3::new(9.0, 9.0, 9.0)];
        a.refresh(0, &near, &mut rng_a);
        b2.refresh(0, &far, &mut rng_b);
        for _ in 0..5 {
            a.refresh(0, &far, &mut rng_a);
            b2.refresh(0, &far, &mut rng_b);
        }
        // Same number of draws consumed on both streams.
        assert_eq!(rng_a.gen::<u64>(), rng_b.gen::<u64>());
    }

    #[test]
    fn carried_pose_tracks_the_moving_leaf() {
        let mut b = open_backend(1);
        let reg = registry(&b);
        let id = reg.arm_points(0)[1];
        let site = reg.point(id).world_point;
        let mut tracker = AttachmentTracker::new(reg, 1, 0.1);
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        tracker.refresh(0, &[site], &mut rng);
        assert!(tracker.attached(0)[0]);

        let raw = RigidPose::IDENTITY;
        // At the setup angle the carried pose reproduces the site.
        let eff = tracker.effective_pose(0, 0, raw, &b);
        assert!((eff.pos - site).length() < 1e-9);

        let leaf_body = b.find_body("link_1").unwrap();
        let hinge = DVec3::new(0.0, 1.0, 0.0);
        let r0 = (site - hinge).length();
        let center0 = b.body_pose(0, leaf_body).pos;
        let offset0 = (site - center0).length();

        // Swing the leaf toward closed; the carried site keeps its
        // distance to the hinge and to the leaf center.
        for angle in [1.2, 0.7, 0.2, 0.0] {
            b.override_joint_states(&[0], &[6], &[angle]);
            let eff = tracker.effective_pose(0, 0, raw, &b);
            assert!(((eff.pos - hinge).length() - r0).abs() < 1e-9);
            let center = b.body_pose(0, leaf_body).pos;
            assert!(((eff.pos - center).length() - offset0).abs() < 1e-9);
            assert!((eff.pos.z - site.z).abs() < 1e-9);
        }

        // Unattached arms pass the raw pose through.
        let passthrough = tracker.effective_pose(1, 0, raw, &b);
        assert!((passthrough.pos - raw.pos).length() < 1e-12);
    }
}
