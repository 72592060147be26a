//! [`TaskExecutor`] – the reflex state machine.
//!
//! One call to [`TaskExecutor::tick`] is one control cycle:
//!
//! 1. **Poll** – take at most one [`Command`] from the task channel.  While
//!    holding an object (`IdleHolding`) only `Place` is accepted; anything
//!    else is discarded.  Otherwise the command replaces the current task and
//!    the search sweep restarts from the home base angle, moving upward.
//! 2. **Step** – run the current [`Task`]:
//!
//! | Task | Cycle | Next |
//! |---|---|---|
//! | `Idle` | nothing | `Idle` |
//! | `Search` | advance the base sweep, hold the search pose, look for the target | `Pickup` when seen |
//! | `Pickup` | range + detection → arm point → IK → move; lost target → `Search` | `Grab` within grab distance |
//! | `Grab` | close gripper, dwell | `Lift` |
//! | `Lift` | shoulder/elbow/wrist home, dwell | `IdleHolding` |
//! | `IdleHolding` | nothing | `Place` on command |
//! | `Place` | move to the place point, release | `Stop` |
//! | `Stop` | every joint home, one at a time | `Idle` |
//!
//! Any hard error escaping a cycle is logged and answered by switching to
//! `Stop`.  Soft link failures are logged and the cycle carries on; a broken
//! perception source or a missing range reading only costs the cycle.
//!
//! # Example
//!
//! ```rust
//! use armos_hal::sim::{SimLink, SimPerception, SimRange};
//! use armos_runtime::executor::{ExecutorTimings, TaskExecutor};
//! use armos_runtime::task_channel;
//! use armos_types::{ArmGeometry, Task};
//!
//! let (_tx, rx) = task_channel::channel();
//! let link = SimLink::new();
//! let mut executor = TaskExecutor::new(
//!     ArmGeometry::default(),
//!     Box::new(link.clone()),
//!     Box::new(SimPerception::new()),
//!     Box::new(SimRange::new()),
//!     rx,
//! )
//! .unwrap()
//! .with_timings(ExecutorTimings::immediate());
//!
//! // The arm starts by homing itself.
//! assert_eq!(executor.tick(), &Task::Idle);
//! assert_eq!(link.sent().len(), 6);
//! ```

use std::time::Duration;

use armos_hal::link::ActuatorLink;
use armos_hal::perception::PerceptionSource;
use armos_hal::range::RangeSensor;
use armos_perception::{CameraModel, IkSolver, JointSolution, select_target};
use armos_types::{
    ArmError, ArmGeometry, Command, Detection, JointAngles, JointId, SweepRange, Task,
};
use tracing::{debug, error, info, warn};

use crate::task_channel::TaskReceiver;

// ─────────────────────────────────────────────────────────────────────────────
// Timings
// ─────────────────────────────────────────────────────────────────────────────

/// Dwell times that let the servos physically reach a pose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorTimings {
    pub grab: Duration,
    pub lift: Duration,
    pub place_settle: Duration,
    pub place_release: Duration,
    pub stop_per_joint: Duration,
}

impl Default for ExecutorTimings {
    fn default() -> Self {
        Self {
            grab: Duration::from_millis(500),
            lift: Duration::from_millis(1000),
            place_settle: Duration::from_millis(1000),
            place_release: Duration::from_millis(500),
            stop_per_joint: Duration::from_millis(50),
        }
    }
}

impl ExecutorTimings {
    /// No dwell at all.
    pub fn immediate() -> Self {
        Self {
            grab: Duration::ZERO,
            lift: Duration::ZERO,
            place_settle: Duration::ZERO,
            place_release: Duration::ZERO,
            stop_per_joint: Duration::ZERO,
        }
    }
}

fn dwell(duration: Duration) {
    if !duration.is_zero() {
        std::thread::sleep(duration);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sweep
// ─────────────────────────────────────────────────────────────────────────────

/// Ping-pong base angle used while searching.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sweep {
    angle: f64,
    direction: f64,
}

impl Sweep {
    pub fn new(start: f64, step: f64) -> Self {
        Self {
            angle: start,
            direction: step.abs(),
        }
    }

    pub fn angle(&self) -> f64 {
        self.angle
    }

    pub fn direction(&self) -> f64 {
        self.direction
    }

    /// Move one step, bouncing off the range limits.
    pub fn advance(&mut self, range: &SweepRange) -> f64 {
        self.angle += self.direction;
        if self.angle >= range.max_deg {
            self.angle = range.max_deg;
            self.direction = -range.step_deg;
        } else if self.angle <= range.min_deg {
            self.angle = range.min_deg;
            self.direction = range.step_deg;
        }
        self.angle
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// TaskExecutor
// ─────────────────────────────────────────────────────────────────────────────

/// Owns the current task and every collaborator the control loop touches.
pub struct TaskExecutor {
    link: Box<dyn ActuatorLink>,
    perception: Box<dyn PerceptionSource>,
    range: Box<dyn RangeSensor>,
    tasks: TaskReceiver,
    geometry: ArmGeometry,
    solver: IkSolver,
    camera: CameraModel,
    timings: ExecutorTimings,
    task: Task,
    sweep: Sweep,
}

impl TaskExecutor {
    /// Build an executor in the initial `Stop` state.
    ///
    /// # Errors
    ///
    /// Returns [`ArmError::InvalidConfig`] if `geometry` fails validation.
    pub fn new(
        geometry: ArmGeometry,
        link: Box<dyn ActuatorLink>,
        perception: Box<dyn PerceptionSource>,
        range: Box<dyn RangeSensor>,
        tasks: TaskReceiver,
    ) -> Result<Self, ArmError> {
        geometry.validate()?;
        info!(
            link = link.id(),
            perception = perception.id(),
            range = range.id(),
            "task executor ready"
        );
        Ok(Self {
            solver: IkSolver::from_geometry(&geometry),
            camera: CameraModel::from_geometry(&geometry),
            sweep: Sweep::new(geometry.home_base_angle(), geometry.sweep.step_deg),
            link,
            perception,
            range,
            tasks,
            geometry,
            timings: ExecutorTimings::default(),
            task: Task::Stop,
        })
    }

    pub fn with_timings(mut self, timings: ExecutorTimings) -> Self {
        self.timings = timings;
        self
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn sweep(&self) -> Sweep {
        self.sweep
    }

    /// Run one control cycle and return the task that is current afterwards.
    pub fn tick(&mut self) -> &Task {
        self.poll_tasks();
        if let Err(e) = self.step() {
            error!(task = self.task.label(), error = %e, "cycle failed; stopping");
            self.task = Task::Stop;
        }
        &self.task
    }

    /// Home the arm and release the link.  Called once on the way out.
    pub fn shutdown(&mut self) {
        info!("executor shutting down; homing arm");
        if let Err(e) = self.run_stop() {
            warn!(error = %e, "homing during shutdown failed");
        }
        self.link.close();
    }

    // ── Task intake ─────────────────────────────────────────────────────────

    fn poll_tasks(&mut self) {
        let Some(command) = self.tasks.poll() else {
            return;
        };

        if self.task == Task::IdleHolding {
            if let Command::Place { location } = command {
                info!(?location, "place accepted while holding");
                self.task = Task::Place;
            } else {
                info!(?command, "ignored while holding; only PLACE is accepted");
            }
            return;
        }

        info!(from = self.task.label(), ?command, "new task");
        self.sweep = Sweep::new(self.geometry.home_base_angle(), self.geometry.sweep.step_deg);
        self.task = command.into();
    }

    fn step(&mut self) -> Result<(), ArmError> {
        match self.task.clone() {
            Task::Idle | Task::IdleHolding => Ok(()),
            Task::Search { target } => self.run_search(target),
            Task::Pickup { target } => self.run_pickup(target),
            Task::Grab { target } => self.run_grab(&target),
            Task::Lift => self.run_lift(),
            Task::Place => self.run_place(),
            Task::Stop => self.run_stop(),
        }
    }

    fn transition(&mut self, next: Task) {
        info!(from = self.task.label(), to = next.label(), "transition");
        self.task = next;
    }

    // ── Actuation helpers ───────────────────────────────────────────────────

    fn soften(result: Result<(), ArmError>) -> Result<(), ArmError> {
        match result {
            Err(e) if e.is_soft() => {
                warn!(error = %e, "soft link failure");
                Ok(())
            }
            other => other,
        }
    }

    fn emit(&mut self, joint: JointId, angle: u8) -> Result<(), ArmError> {
        let index = self.geometry.index_of(joint);
        Self::soften(self.link.send(index, angle))
    }

    fn emit_arm(&mut self, joints: JointSolution) -> Result<(), ArmError> {
        self.emit(JointId::Base, joints.base)?;
        self.emit(JointId::Shoulder, joints.shoulder)?;
        self.emit(JointId::Elbow, joints.elbow)
    }

    fn detections_or_skip(&mut self) -> Option<Vec<Detection>> {
        match self.perception.detections() {
            Ok(d) => Some(d),
            Err(e) => {
                warn!(source = self.perception.id(), error = %e, "perception failed; skipping cycle");
                None
            }
        }
    }

    // ── States ──────────────────────────────────────────────────────────────

    fn run_search(&mut self, target: String) -> Result<(), ArmError> {
        let base = self.sweep.advance(&self.geometry.sweep);
        let mut pose: JointAngles = self.geometry.search_pose;
        pose.set(self.geometry.index_of(JointId::Base) as usize, base as u8)?;
        Self::soften(self.link.send_all(&pose))?;
        debug!(base, "search sweep");

        let Some(detections) = self.detections_or_skip() else {
            return Ok(());
        };
        if select_target(&detections, &target).is_some() {
            info!(object = %target, base, "target found");
            self.transition(Task::Pickup { target });
        }
        Ok(())
    }

    fn run_pickup(&mut self, target: String) -> Result<(), ArmError> {
        let Some(detections) = self.detections_or_skip() else {
            return Ok(());
        };
        let distance = match self.range.read() {
            Ok(reading) => reading.cm(),
            Err(e) => {
                warn!(sensor = self.range.id(), error = %e, "range read failed");
                None
            }
        };
        let Some(distance) = distance else {
            debug!("no valid range reading; skipping cycle");
            return Ok(());
        };

        let Some(detection) = select_target(&detections, &target) else {
            info!(object = %target, "target lost");
            self.transition(Task::Search { target });
            return Ok(());
        };

        let point =
            self.camera
                .pixel_to_arm(detection.center_x, detection.center_y, f64::from(distance));
        let joints = match self.solver.solve(point) {
            Ok(j) => j,
            Err(e) => {
                debug!(error = %e, "approach point out of reach; skipping cycle");
                return Ok(());
            }
        };

        self.emit_arm(joints)?;
        self.emit(JointId::Wrist, self.geometry.search_angle(JointId::Wrist))?;
        self.emit(JointId::WristRotate, self.geometry.home_angle(JointId::WristRotate))?;
        self.emit(JointId::Gripper, self.geometry.gripper_open)?;
        debug!(x = point.x, y = point.y, z = point.z, distance, "approaching");

        if distance <= self.geometry.grab_distance_cm {
            info!(object = %target, distance, "within grab distance");
            self.transition(Task::Grab { target });
        }
        Ok(())
    }

    fn run_grab(&mut self, target: &str) -> Result<(), ArmError> {
        info!(object = target, "closing gripper");
        self.emit(JointId::Gripper, self.geometry.gripper_closed)?;
        dwell(self.timings.grab);
        self.transition(Task::Lift);
        Ok(())
    }

    fn run_lift(&mut self) -> Result<(), ArmError> {
        for joint in [JointId::Shoulder, JointId::Elbow, JointId::Wrist] {
            self.emit(joint, self.geometry.home_angle(joint))?;
        }
        dwell(self.timings.lift);
        self.transition(Task::IdleHolding);
        Ok(())
    }

    fn run_place(&mut self) -> Result<(), ArmError> {
        let joints = self.solver.solve(self.geometry.place_target_cm)?;
        self.emit_arm(joints)?;
        self.emit(JointId::Wrist, self.geometry.home_angle(JointId::Wrist))?;
        self.emit(JointId::Gripper, self.geometry.gripper_closed)?;
        dwell(self.timings.place_settle);

        self.emit(JointId::Gripper, self.geometry.gripper_open)?;
        info!("object released");
        dwell(self.timings.place_release);
        self.transition(Task::Stop);
        Ok(())
    }

    fn run_stop(&mut self) -> Result<(), ArmError> {
        for (index, angle) in self.geometry.home_pose.iter() {
            Self::soften(self.link.send(index, angle))?;
            dwell(self.timings.stop_per_joint);
        }
        self.transition(Task::Idle);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task_channel::{self, TaskSender};
    use armos_hal::sim::{SimLink, SimPerception, SimRange};
    use armos_types::ArmPoint;

    struct Rig {
        exec: TaskExecutor,
        tx: TaskSender,
        link: SimLink,
        vision: SimPerception,
        range: SimRange,
    }

    /// Camera sits 15 cm behind the base, so the principal point seen at
    /// 5 cm maps to (15, 0, 5).
    fn geometry() -> ArmGeometry {
        ArmGeometry {
            camera_mount_offset_cm: ArmPoint::new(-15.0, 0.0, 0.0),
            ..ArmGeometry::default()
        }
    }

    fn rig_with(geometry: ArmGeometry) -> Rig {
        let (tx, rx) = task_channel::channel();
        let link = SimLink::new();
        let vision = SimPerception::new();
        let range = SimRange::new();
        let exec = TaskExecutor::new(
            geometry,
            Box::new(link.clone()),
            Box::new(vision.clone()),
            Box::new(range.clone()),
            rx,
        )
        .unwrap()
        .with_timings(ExecutorTimings::immediate());
        Rig {
            exec,
            tx,
            link,
            vision,
            range,
        }
    }

    /// A rig that has already homed and sits in `Idle`.
    fn rig() -> Rig {
        let mut r = rig_with(geometry());
        assert_eq!(r.exec.tick(), &Task::Idle);
        r.link.clear();
        r
    }

    fn home() -> Vec<(u8, u8)> {
        vec![(0, 90), (1, 90), (2, 90), (3, 30), (4, 150), (5, 90)]
    }

    fn pickup(target: &str) -> Command {
        Command::Pickup {
            target: target.to_string(),
        }
    }

    #[test]
    fn starts_in_stop_and_homes_to_idle() {
        let mut r = rig_with(geometry());
        assert_eq!(r.exec.task(), &Task::Stop);
        assert_eq!(r.exec.tick(), &Task::Idle);
        assert_eq!(r.link.sent(), home());
    }

    #[test]
    fn invalid_geometry_is_rejected() {
        let (_tx, rx) = task_channel::channel();
        let mut g = ArmGeometry::default();
        g.servo_count = 5;
        let result = TaskExecutor::new(
            g,
            Box::new(SimLink::new()),
            Box::new(SimPerception::new()),
            Box::new(SimRange::new()),
            rx,
        );
        assert!(matches!(result, Err(ArmError::InvalidConfig(_))));
    }

    #[test]
    fn stop_from_any_state_except_holding_homes_and_idles() {
        let states = [
            Task::Idle,
            Task::Search { target: "apple".into() },
            Task::Pickup { target: "apple".into() },
            Task::Grab { target: "apple".into() },
            Task::Lift,
            Task::Place,
            Task::Stop,
        ];
        for state in states {
            let mut r = rig();
            r.exec.task = state.clone();
            r.tx.post(Command::Stop).unwrap();
            assert_eq!(r.exec.tick(), &Task::Idle, "from {state:?}");
            assert_eq!(r.link.sent(), home(), "from {state:?}");
        }
    }

    #[test]
    fn holding_accepts_only_place() {
        let mut r = rig();
        r.exec.task = Task::IdleHolding;

        r.tx.post(pickup("cup")).unwrap();
        assert_eq!(r.exec.tick(), &Task::IdleHolding);
        r.tx.post(Command::Stop).unwrap();
        assert_eq!(r.exec.tick(), &Task::IdleHolding);
        assert!(r.link.sent().is_empty());

        r.tx.post(Command::Place { location: Some("table".into()) }).unwrap();
        // Place runs in the same cycle it is accepted and hands over to Stop.
        assert_eq!(r.exec.tick(), &Task::Stop);
        assert!(!r.link.sent().is_empty());
    }

    #[test]
    fn sweep_ping_pongs_upward_from_home() {
        let mut g = geometry();
        g.sweep = SweepRange {
            min_deg: 88.0,
            max_deg: 92.0,
            step_deg: 1.0,
        };
        let mut r = rig_with(g);
        r.exec.tick();
        r.exec.task = Task::Search { target: "apple".into() };

        let mut bases = Vec::new();
        for _ in 0..8 {
            r.link.clear();
            r.exec.tick();
            assert_eq!(r.link.sent().len(), 6);
            bases.push(r.link.last_angle(5).unwrap());
        }
        assert_eq!(bases, vec![91, 92, 91, 90, 89, 88, 89, 90]);
        assert_eq!(r.exec.task(), &Task::Search { target: "apple".into() });
    }

    #[test]
    fn search_holds_search_pose_on_other_joints() {
        let mut r = rig();
        r.exec.task = Task::Search { target: "apple".into() };
        r.exec.tick();
        let sent = r.link.sent();
        assert_eq!(&sent[..5], &[(0, 90), (1, 90), (2, 90), (3, 90), (4, 90)]);
        // 90 + 0.5 truncates to 90.
        assert_eq!(sent[5], (5, 90));
        assert_eq!(r.exec.sweep().angle(), 90.5);
    }

    #[test]
    fn search_finds_target_and_switches_to_pickup() {
        let mut r = rig();
        r.exec.task = Task::Search { target: "apple".into() };
        r.vision.push_object("Apple", 320.0, 240.0, 0.9);
        assert_eq!(r.exec.tick(), &Task::Pickup { target: "apple".into() });
    }

    #[test]
    fn new_command_resets_sweep() {
        let mut r = rig();
        r.exec.task = Task::Search { target: "apple".into() };
        for _ in 0..5 {
            r.exec.tick();
        }
        assert_eq!(r.exec.sweep().angle(), 92.5);

        r.tx.post(pickup("cup")).unwrap();
        r.exec.tick();
        assert_eq!(r.exec.sweep(), Sweep::new(90.0, 0.5));
    }

    #[test]
    fn only_one_message_per_cycle() {
        let mut r = rig();
        r.range.push(20.0);
        r.tx.post(pickup("apple")).unwrap();
        r.tx.post(pickup("cup")).unwrap();
        // No detection: the first command moves to Search for "apple".
        assert_eq!(r.exec.tick(), &Task::Search { target: "apple".into() });
        r.link.clear();
        assert_eq!(r.exec.tick(), &Task::Search { target: "cup".into() });
    }

    #[test]
    fn faulted_range_during_pickup_sends_nothing() {
        let mut r = rig();
        r.exec.task = Task::Pickup { target: "apple".into() };
        r.vision.push_object("apple", 320.0, 240.0, 0.9);
        r.range.push(-1.0);
        assert_eq!(r.exec.tick(), &Task::Pickup { target: "apple".into() });
        assert!(r.link.sent().is_empty());
    }

    #[test]
    fn perception_error_skips_pickup_cycle() {
        let mut r = rig();
        r.exec.task = Task::Pickup { target: "apple".into() };
        r.vision.push_error(ArmError::SensorFault("camera unplugged".into()));
        r.range.push(10.0);
        assert_eq!(r.exec.tick(), &Task::Pickup { target: "apple".into() });
        assert!(r.link.sent().is_empty());
    }

    #[test]
    fn lost_target_goes_back_to_search() {
        let mut r = rig();
        r.exec.task = Task::Pickup { target: "apple".into() };
        r.vision.push_object("cup", 320.0, 240.0, 0.9);
        r.range.push(10.0);
        assert_eq!(r.exec.tick(), &Task::Search { target: "apple".into() });
        assert!(r.link.sent().is_empty());
    }

    #[test]
    fn unreachable_approach_is_skipped() {
        let mut r = rig();
        r.exec.task = Task::Pickup { target: "apple".into() };
        r.vision.push_object("apple", 320.0, 240.0, 0.9);
        r.range.push(40.0);
        assert_eq!(r.exec.tick(), &Task::Pickup { target: "apple".into() });
        assert!(r.link.sent().is_empty());
    }

    #[test]
    fn approach_moves_arm_without_grabbing_when_far() {
        let mut r = rig();
        r.exec.task = Task::Pickup { target: "apple".into() };
        r.vision.push_object("apple", 320.0, 240.0, 0.9);
        r.range.push(12.0);
        assert_eq!(r.exec.tick(), &Task::Pickup { target: "apple".into() });
        let sent = r.link.sent();
        assert_eq!(sent.len(), 6);
        assert_eq!(sent[0], (5, 0));
        assert_eq!(r.link.last_angle(0), Some(90));
    }

    #[test]
    fn full_pick_and_place_cycle() {
        let mut r = rig();
        r.range.push(5.0);
        r.vision.push_object("apple", 320.0, 240.0, 0.9);
        r.tx.post(pickup("apple")).unwrap();

        // Approach (15, 0, 5) and grab: base 0, shoulder 19, elbow 104.
        assert_eq!(r.exec.tick(), &Task::Grab { target: "apple".into() });
        assert_eq!(
            r.link.sent(),
            vec![(5, 0), (4, 19), (3, 104), (2, 90), (1, 90), (0, 90)]
        );

        r.link.clear();
        assert_eq!(r.exec.tick(), &Task::Lift);
        assert_eq!(r.link.sent(), vec![(0, 30)]);

        r.link.clear();
        assert_eq!(r.exec.tick(), &Task::IdleHolding);
        assert_eq!(r.link.sent(), vec![(4, 150), (3, 30), (2, 90)]);

        r.link.clear();
        r.tx.post(Command::Place { location: None }).unwrap();
        assert_eq!(r.exec.tick(), &Task::Stop);
        assert_eq!(
            r.link.sent(),
            vec![(5, 0), (4, 19), (3, 104), (2, 90), (0, 30), (0, 90)]
        );

        r.link.clear();
        assert_eq!(r.exec.tick(), &Task::Idle);
        assert_eq!(r.link.sent(), home());
    }

    #[test]
    fn hard_link_failure_forces_stop() {
        let mut r = rig();
        r.exec.task = Task::Grab { target: "apple".into() };
        r.link.fail_with(Some(ArmError::Io("cable".into())));
        assert_eq!(r.exec.tick(), &Task::Stop);
        // Homing keeps failing, so the executor stays in Stop and retries.
        assert_eq!(r.exec.tick(), &Task::Stop);
        r.link.fail_with(None);
        assert_eq!(r.exec.tick(), &Task::Idle);
    }

    #[test]
    fn soft_link_failure_does_not_abort_the_cycle() {
        let mut r = rig();
        r.exec.task = Task::Grab { target: "apple".into() };
        r.link.fail_with(Some(ArmError::ProtocolMismatch {
            expected: "Executing: Servo 0".into(),
            received: "<timeout>".into(),
        }));
        assert_eq!(r.exec.tick(), &Task::Lift);
    }

    #[test]
    fn unreachable_place_point_forces_stop() {
        let mut g = geometry();
        g.place_target_cm = ArmPoint::new(100.0, 0.0, 0.0);
        let mut r = rig_with(g);
        r.exec.tick();
        r.link.clear();
        r.exec.task = Task::Place;
        assert_eq!(r.exec.tick(), &Task::Stop);
        assert!(r.link.sent().is_empty());
        assert_eq!(r.exec.tick(), &Task::Idle);
    }

    #[test]
    fn shutdown_homes_then_closes_link() {
        let mut r = rig();
        r.exec.task = Task::Search { target: "apple".into() };
        r.exec.shutdown();
        assert_eq!(r.link.sent(), home());
        assert!(r.link.is_closed());
        assert_eq!(r.exec.task(), &Task::Idle);
    }

    #[test]
    fn sweep_bounces_at_both_limits() {
        let range = SweepRange {
            min_deg: 0.0,
            max_deg: 1.0,
            step_deg: 0.5,
        };
        let mut sweep = Sweep::new(0.5, 0.5);
        let seq: Vec<f64> = (0..6).map(|_| sweep.advance(&range)).collect();
        assert_eq!(seq, vec![1.0, 0.5, 0.0, 0.5, 1.0, 0.5]);
    }
}
