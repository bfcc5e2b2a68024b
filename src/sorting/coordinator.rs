// Sorting state machine
//
// Drives one cycle at a time: IDLE -> MOVING -> GRABBING -> MOVING_TO_RELEASE
// -> RELEASING -> IDLE. Advancement out of every non-idle state is strictly
// signal-driven: the coordinator consumes exactly one signal per motion or
// grip command it issues, in issuance order. A vanished object or an
// unreachable target aborts the cycle through the reset procedure (park the
// arm, open the grabber, two signals consumed).

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::{HOME_POSITION, IDLE_POLL};
use crate::link::LinkError;
use crate::messages::Signal;
use crate::vision::tracker::{ObjectKey, VisionShared};

/// Where the arm is in the current sorting cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RobotState {
    Idle,
    Moving,
    Grabbing,
    MovingToRelease,
    Releasing,
}

impl RobotState {
    fn next(self) -> Self {
        match self {
            RobotState::Idle => RobotState::Moving,
            RobotState::Moving => RobotState::Grabbing,
            RobotState::Grabbing => RobotState::MovingToRelease,
            RobotState::MovingToRelease => RobotState::Releasing,
            RobotState::Releasing => RobotState::Idle,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            RobotState::Idle => "IDLE",
            RobotState::Moving => "MOVING",
            RobotState::Grabbing => "GRABBING",
            RobotState::MovingToRelease => "MOVING_TO_RELEASE",
            RobotState::Releasing => "RELEASING",
        }
    }
}

/// Outbound command seam toward the controller link. Sending must not
/// block; an unavailable transport surfaces as a `LinkError` value.
pub trait CommandPort: Send {
    fn send_coords(&mut self, x: f64, y: f64) -> Result<(), LinkError>;
    fn send_grip(&mut self, engaged: bool) -> Result<(), LinkError>;
}

pub struct SortingCoordinator<P: CommandPort> {
    state: RobotState,
    /// True while the arm is parked at the home position with the grabber
    /// open; reset is a no-op then.
    at_home: bool,
    object_to_sort: Option<ObjectKey>,
    /// Slot chosen during MOVING_TO_RELEASE; None when dropping in place
    chosen_slot: Option<usize>,
    shared: Arc<Mutex<VisionShared>>,
    port: P,
    signals: UnboundedReceiver<Signal>,
    /// Mirrors `state` for observers outside the sorting task
    state_tx: watch::Sender<RobotState>,
}

impl<P: CommandPort> SortingCoordinator<P> {
    pub fn new(
        shared: Arc<Mutex<VisionShared>>,
        port: P,
        signals: UnboundedReceiver<Signal>,
    ) -> Self {
        let (state_tx, _) = watch::channel(RobotState::Idle);
        Self {
            state: RobotState::Idle,
            at_home: true,
            object_to_sort: None,
            chosen_slot: None,
            shared,
            port,
            signals,
            state_tx,
        }
    }

    pub fn state(&self) -> RobotState {
        self.state
    }

    /// Watch channel following the state machine, for health reporting.
    pub fn state_watch(&self) -> watch::Receiver<RobotState> {
        self.state_tx.subscribe()
    }

    fn set_state(&mut self, state: RobotState) {
        self.state = state;
        self.state_tx.send_replace(state);
    }

    pub async fn run(&mut self) {
        info!("sorting loop started");
        while self.step().await {}
        info!("signal channel closed, sorting loop stopping");
    }

    /// One iteration of the control loop: act in IDLE, otherwise block for
    /// the next signal. Returns false once the signal channel closes.
    pub async fn step(&mut self) -> bool {
        if self.state == RobotState::Idle {
            if self.enter_idle().await {
                self.advance().await;
            } else {
                sleep(IDLE_POLL).await;
            }
            return true;
        }

        let Some(signal) = self.signals.recv().await else {
            return false;
        };
        debug!("{} received in {}", signal.as_token(), self.state.name());

        match signal {
            Signal::Complete => self.advance().await,
            Signal::Unreachable => {
                if let Some(key) = self.object_to_sort {
                    self.shared.lock().unwrap().mark_unreachable(&key);
                }
                self.reset().await;
            }
        }
        true
    }

    /// Move to the next state and run its entry action.
    async fn advance(&mut self) {
        let from = self.state;
        self.set_state(from.next());

        if from == RobotState::Idle {
            self.at_home = false;
        }
        if self.state == RobotState::Idle {
            // Cycle complete: record the outcome and release the object
            if let Some(key) = self.object_to_sort.take() {
                self.shared.lock().unwrap().mark_sorted(&key, self.chosen_slot);
                info!("sorted {:?} object into slot {:?}", key.color, self.chosen_slot);
            }
            self.chosen_slot = None;
            return;
        }

        self.enter_state().await;
    }

    /// IDLE entry action: select the next object. Returns false when there
    /// is nothing to do.
    async fn enter_idle(&mut self) -> bool {
        self.object_to_sort = self.shared.lock().unwrap().select_unsorted();
        match self.object_to_sort {
            Some(key) => {
                info!(
                    "object to sort: {:?} at ({:.2}, {:.2})",
                    key.color, key.world_x, key.world_y
                );
                true
            }
            None => {
                self.reset().await;
                false
            }
        }
    }

    /// Entry action of the current non-idle state. Every entry first checks
    /// the object is still tracked; a vanished object aborts the cycle.
    async fn enter_state(&mut self) {
        let Some(key) = self.object_to_sort else {
            self.reset().await;
            return;
        };
        if self.shared.lock().unwrap().find(&key).is_none() {
            warn!("object vanished mid-cycle, resetting");
            self.object_to_sort = None;
            self.reset().await;
            return;
        }

        let result = match self.state {
            RobotState::Moving => self.port.send_coords(key.world_x, key.world_y),
            RobotState::Grabbing => self.port.send_grip(true),
            RobotState::MovingToRelease => {
                let free = self.shared.lock().unwrap().first_free_slot(key.color);
                match free {
                    Some((idx, (x, y))) => {
                        self.chosen_slot = Some(idx);
                        self.port.send_coords(x, y)
                    }
                    None => {
                        // No slot left for this color: drop in place rather
                        // than stall the whole system
                        warn!("no free slot for {:?}, dropping in place", key.color);
                        self.chosen_slot = None;
                        self.set_state(RobotState::Releasing);
                        self.port.send_grip(false)
                    }
                }
            }
            RobotState::Releasing => self.port.send_grip(false),
            RobotState::Idle => unreachable!("idle has its own entry path"),
        };

        if let Err(e) = result {
            // Nothing is in flight, so no signal will arrive; drop the cycle
            // on the floor instead of blocking forever.
            warn!("command send failed in {}: {}", self.state.name(), e);
            self.object_to_sort = None;
            self.chosen_slot = None;
            self.set_state(RobotState::Idle);
        }
    }

    /// Abort the current cycle: park the arm, open the grabber, and return
    /// to IDLE. Consumes exactly one signal per command issued. No-op when
    /// the arm is already parked.
    async fn reset(&mut self) {
        if self.at_home {
            return;
        }
        info!("resetting arm to home position");

        if self.port.send_coords(HOME_POSITION.0, HOME_POSITION.1).is_ok() {
            self.signals.recv().await;
        }
        if self.port.send_grip(false).is_ok() {
            self.signals.recv().await;
        }

        self.set_state(RobotState::Idle);
        self.object_to_sort = None;
        self.chosen_slot = None;
        self.at_home = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BLACK_SLOTS, GREY_SLOTS};
    use crate::sorting::SlotMap;
    use crate::vision::detect::BlobColor;
    use crate::vision::tracker::{reconcile, ObjectCandidate, ObjectState, TrackedObject};
    use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};

    #[derive(Debug, Clone, PartialEq)]
    enum Sent {
        Coords(f64, f64),
        Grip(bool),
    }

    #[derive(Clone)]
    struct MockPort {
        sent: Arc<Mutex<Vec<Sent>>>,
        connected: bool,
    }

    impl MockPort {
        fn new() -> (Self, Arc<Mutex<Vec<Sent>>>) {
            let sent = Arc::new(Mutex::new(Vec::new()));
            (
                Self {
                    sent: sent.clone(),
                    connected: true,
                },
                sent,
            )
        }
    }

    impl CommandPort for MockPort {
        fn send_coords(&mut self, x: f64, y: f64) -> Result<(), LinkError> {
            if !self.connected {
                return Err(LinkError::NotConnected);
            }
            self.sent.lock().unwrap().push(Sent::Coords(x, y));
            Ok(())
        }

        fn send_grip(&mut self, engaged: bool) -> Result<(), LinkError> {
            if !self.connected {
                return Err(LinkError::NotConnected);
            }
            self.sent.lock().unwrap().push(Sent::Grip(engaged));
            Ok(())
        }
    }

    fn shared_with_object(color: BlobColor, x: f64, y: f64) -> Arc<Mutex<VisionShared>> {
        let shared = Arc::new(Mutex::new(VisionShared::new(SlotMap::deployed())));
        {
            let mut s = shared.lock().unwrap();
            let cand = ObjectCandidate {
                color,
                world_x: x,
                world_y: y,
                bbox: (0, 0, 10, 10),
                state: ObjectState::Unsorted,
                assigned_slot: None,
            };
            for _ in 0..3 {
                reconcile(&mut s.objects, &[cand.clone()]);
            }
        }
        shared
    }

    fn fill_slots(shared: &Arc<Mutex<VisionShared>>, color: BlobColor) {
        let mut s = shared.lock().unwrap();
        let coords: Vec<(f64, f64)> = s.slots.slots_for(color).to_vec();
        for (i, (x, y)) in coords.into_iter().enumerate() {
            s.objects.push(TrackedObject {
                color,
                world_x: x,
                world_y: y,
                bbox: (0, 0, 10, 10),
                state: ObjectState::Sorted,
                assigned_slot: Some(i),
                visible: true,
                seen_streak: 3,
                missed_streak: 0,
            });
        }
    }

    fn coordinator(
        shared: Arc<Mutex<VisionShared>>,
    ) -> (
        SortingCoordinator<MockPort>,
        Arc<Mutex<Vec<Sent>>>,
        UnboundedSender<Signal>,
    ) {
        let (port, sent) = MockPort::new();
        let (tx, rx) = unbounded_channel();
        (SortingCoordinator::new(shared, port, rx), sent, tx)
    }

    #[tokio::test]
    async fn full_cycle_in_command_order() {
        let shared = shared_with_object(BlobColor::Black, 15.0, 15.0);
        let (mut coord, sent, tx) = coordinator(shared.clone());

        // move, grab, slot move, release: one CMP per command
        for _ in 0..4 {
            tx.send(Signal::Complete).unwrap();
        }

        for _ in 0..5 {
            coord.step().await;
        }

        assert_eq!(
            *sent.lock().unwrap(),
            vec![
                Sent::Coords(15.0, 15.0),
                Sent::Grip(true),
                Sent::Coords(BLACK_SLOTS[0].0, BLACK_SLOTS[0].1),
                Sent::Grip(false),
            ]
        );
        assert_eq!(coord.state(), RobotState::Idle);

        let s = shared.lock().unwrap();
        let obj = s
            .objects
            .iter()
            .find(|o| o.matches(BlobColor::Black, 15.0, 15.0))
            .unwrap();
        assert_eq!(obj.state, ObjectState::Sorted);
        assert_eq!(obj.assigned_slot, Some(0));
    }

    #[tokio::test]
    async fn no_free_slot_drops_in_place() {
        let shared = shared_with_object(BlobColor::Grey, -15.0, 13.0);
        fill_slots(&shared, BlobColor::Grey);
        let (mut coord, sent, tx) = coordinator(shared.clone());

        // move, grab, release only: no slot-move command
        for _ in 0..3 {
            tx.send(Signal::Complete).unwrap();
        }
        for _ in 0..4 {
            coord.step().await;
        }

        assert_eq!(
            *sent.lock().unwrap(),
            vec![
                Sent::Coords(-15.0, 13.0),
                Sent::Grip(true),
                Sent::Grip(false),
            ]
        );
        assert_eq!(coord.state(), RobotState::Idle);
        for &(x, y) in GREY_SLOTS.iter() {
            assert!(!sent.lock().unwrap().contains(&Sent::Coords(x, y)));
        }
    }

    #[tokio::test]
    async fn unreachable_marks_object_and_resets_with_two_signals() {
        let shared = shared_with_object(BlobColor::Black, 25.0, 3.0);
        let (mut coord, sent, tx) = coordinator(shared.clone());

        coord.step().await; // IDLE -> MOVING, coords sent
        tx.send(Signal::Unreachable).unwrap();
        tx.send(Signal::Complete).unwrap(); // home move
        tx.send(Signal::Complete).unwrap(); // release
        coord.step().await; // consumes UNR, runs reset

        assert_eq!(
            *sent.lock().unwrap(),
            vec![
                Sent::Coords(25.0, 3.0),
                Sent::Coords(HOME_POSITION.0, HOME_POSITION.1),
                Sent::Grip(false),
            ]
        );
        assert_eq!(coord.state(), RobotState::Idle);

        let s = shared.lock().unwrap();
        let obj = s
            .objects
            .iter()
            .find(|o| o.matches(BlobColor::Black, 25.0, 3.0))
            .unwrap();
        assert_eq!(obj.state, ObjectState::Unreachable);
        // Excluded from future selection
        assert!(s.select_unsorted().is_none());
    }

    #[tokio::test]
    async fn vanished_object_aborts_cycle_via_reset() {
        let shared = shared_with_object(BlobColor::Grey, -14.0, 14.0);
        let (mut coord, sent, tx) = coordinator(shared.clone());

        coord.step().await; // IDLE -> MOVING
        shared.lock().unwrap().objects.clear(); // tracker evicted it

        tx.send(Signal::Complete).unwrap(); // completes the move
        tx.send(Signal::Complete).unwrap(); // reset: home move
        tx.send(Signal::Complete).unwrap(); // reset: release
        coord.step().await; // advance to GRABBING finds the object gone

        assert_eq!(coord.state(), RobotState::Idle);
        assert_eq!(
            *sent.lock().unwrap(),
            vec![
                Sent::Coords(-14.0, 14.0),
                Sent::Coords(HOME_POSITION.0, HOME_POSITION.1),
                Sent::Grip(false),
            ]
        );
    }

    #[tokio::test]
    async fn reset_is_noop_when_parked() {
        let shared = Arc::new(Mutex::new(VisionShared::new(SlotMap::deployed())));
        let (mut coord, sent, _tx) = coordinator(shared);
        coord.reset().await;
        assert!(sent.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_with_no_objects_sends_nothing() {
        let shared = Arc::new(Mutex::new(VisionShared::new(SlotMap::deployed())));
        let (mut coord, sent, _tx) = coordinator(shared);
        for _ in 0..3 {
            coord.step().await;
        }
        assert!(sent.lock().unwrap().is_empty());
        assert_eq!(coord.state(), RobotState::Idle);
    }

    #[tokio::test]
    async fn state_watch_follows_transitions() {
        let shared = shared_with_object(BlobColor::Black, 15.0, 15.0);
        let (mut coord, _sent, tx) = coordinator(shared);
        let state_rx = coord.state_watch();
        assert_eq!(*state_rx.borrow(), RobotState::Idle);

        coord.step().await;
        assert_eq!(*state_rx.borrow(), RobotState::Moving);

        tx.send(Signal::Complete).unwrap();
        coord.step().await;
        assert_eq!(*state_rx.borrow(), RobotState::Grabbing);

        // The health summary carries the live state name
        let health = crate::messages::RuntimeHealth {
            robot_state: state_rx.borrow().name().to_string(),
            tracked_objects: 1,
            calibrated: false,
        };
        let json = serde_json::to_string(&health).unwrap();
        assert!(json.contains(r#""robot_state":"GRABBING""#), "got {json}");
    }

    #[tokio::test]
    async fn send_failure_returns_to_idle_without_blocking() {
        let shared = shared_with_object(BlobColor::Black, 20.0, 12.0);
        let (port, sent) = MockPort::new();
        let disconnected = MockPort {
            sent: port.sent.clone(),
            connected: false,
        };
        let (_tx, rx) = unbounded_channel();
        let mut coord = SortingCoordinator::new(shared, disconnected, rx);

        coord.step().await; // MOVING entry fails to send
        assert_eq!(coord.state(), RobotState::Idle);
        assert!(sent.lock().unwrap().is_empty());
    }
}
