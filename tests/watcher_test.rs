//! Integration tests for watchers, listeners and the controller-wide stream.

use futures::StreamExt;
use linegate::{
    ControllerOptions, Edge, LineConfig, LineController, LineError, LineEvent, LineKey, Pull,
    State, TryRecvError,
};
use linegate::{ChipHandle, DriverResult, EdgeCallback, EdgeEvent, LineDriver, LineHandle};
use linegate_driver_mock::MockDriver;
use parking_lot::Mutex;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

const CHIP: &str = "gpiochip0";
const WAIT: Duration = Duration::from_secs(5);

fn setup() -> (MockDriver, LineController) {
    let driver = MockDriver::default();
    let controller = LineController::new(Arc::new(driver.clone()), ControllerOptions::default());
    (driver, controller)
}

#[test]
fn test_watcher_isolation() {
    let (_driver, controller) = setup();
    let line = controller
        .request_line(CHIP, 17, LineConfig::output(State::Inactive))
        .unwrap();
    line.set_state(State::Active).unwrap();
    line.set_state(State::Inactive).unwrap();
    line.set_state(State::Active).unwrap();

    let mut watcher = controller.watch(CHIP, 17).unwrap();
    assert!(matches!(watcher.try_recv(), Err(TryRecvError::Empty)));

    line.set_state(State::Inactive).unwrap();
    let event = watcher.try_recv().unwrap();
    assert_eq!(event.state, State::Inactive);
    assert!(!event.is_hardware_edge);
    assert_eq!((event.chip.as_str(), event.offset), (CHIP, 17));
    assert!(matches!(watcher.try_recv(), Err(TryRecvError::Empty)));
}

#[test]
fn test_watch_requires_live_line() {
    let (_driver, controller) = setup();
    assert!(matches!(
        controller.watch(CHIP, 2),
        Err(LineError::LineNotFound { .. })
    ));
}

#[tokio::test]
async fn test_input_edges_reach_watchers_in_order() {
    let (driver, controller) = setup();
    let line = controller
        .request_line(CHIP, 4, LineConfig::input(Pull::Up))
        .unwrap();
    let mut first = line.watch().unwrap();
    let mut second = controller.watch(CHIP, 4).unwrap();

    let edges = vec![Edge::Rising, Edge::Falling, Edge::Rising, Edge::Falling];
    let delivered = driver.spawn_edges(CHIP, 4, edges).join().unwrap();
    assert_eq!(delivered, 4);

    for watcher in [&mut first, &mut second] {
        let mut states = Vec::new();
        for _ in 0..4 {
            let event = timeout(WAIT, watcher.recv()).await.unwrap().unwrap();
            assert!(event.is_hardware_edge);
            states.push(event.state);
        }
        assert_eq!(
            states,
            vec![State::Active, State::Inactive, State::Active, State::Inactive]
        );
    }
    assert_eq!(line.state(), State::Inactive);
}

#[test]
fn test_repeated_edge_direction_is_not_a_transition() {
    let (driver, controller) = setup();
    let line = controller.request_line(CHIP, 4, LineConfig::default()).unwrap();
    let mut watcher = line.watch().unwrap();
    driver.inject_edge(CHIP, 4, Edge::Rising);
    driver.inject_edge(CHIP, 4, Edge::Rising);
    assert_eq!(watcher.try_recv().unwrap().state, State::Active);
    assert!(matches!(watcher.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn test_teardown_forces_inactive_then_closes_watchers() {
    let (_driver, controller) = setup();
    let line = controller
        .request_line(CHIP, 17, LineConfig::output(State::Active))
        .unwrap();
    let mut watcher = controller.watch(CHIP, 17).unwrap();
    line.close().unwrap();

    let last = timeout(WAIT, watcher.recv()).await.unwrap().unwrap();
    assert_eq!(last.state, State::Inactive);
    assert_eq!(timeout(WAIT, watcher.recv()).await.unwrap(), None);
}

#[tokio::test]
async fn test_owning_watcher_releases_on_close() {
    let (driver, controller) = setup();
    let watcher = controller
        .request_watcher(CHIP, 22, LineConfig::input(Pull::Disabled))
        .unwrap();
    assert!(watcher.is_owning());
    assert!(driver.is_claimed(CHIP, 22));

    let second = controller
        .request_line(CHIP, 22, LineConfig::input(Pull::Disabled))
        .unwrap();
    assert_eq!(second.owners(), 2);
    watcher.close().unwrap();
    assert_eq!(second.owners(), 1);
    second.close().unwrap();
    assert!(!driver.is_claimed(CHIP, 22));
}

#[tokio::test]
async fn test_owning_watcher_as_stream() {
    let (driver, controller) = setup();
    let mut stream = controller
        .request_watcher(CHIP, 23, LineConfig::default())
        .unwrap()
        .into_stream();
    driver.inject_edge(CHIP, 23, Edge::Rising);
    driver.inject_edge(CHIP, 23, Edge::Falling);

    let states = timeout(
        WAIT,
        (&mut stream).take(2).map(|e| e.state).collect::<Vec<_>>(),
    )
    .await
    .unwrap();
    assert_eq!(states, vec![State::Active, State::Inactive]);
    assert!(driver.is_claimed(CHIP, 23));
    drop(stream);
    assert!(!driver.is_claimed(CHIP, 23));
}

#[test]
fn test_non_owning_watcher_close_keeps_line() {
    let (driver, controller) = setup();
    let line = controller
        .request_line(CHIP, 9, LineConfig::output(State::Inactive))
        .unwrap();
    let watcher = line.watch().unwrap();
    watcher.close().unwrap();
    assert!(driver.is_claimed(CHIP, 9));
    assert_eq!(line.owners(), 1);
}

#[test]
fn test_listener_callback() {
    let (driver, controller) = setup();
    let line = controller.request_line(CHIP, 5, LineConfig::default()).unwrap();
    let (tx, rx) = mpsc::channel::<LineEvent>();
    let listener = line
        .on_event(move |event| {
            let _ = tx.send(event);
        })
        .unwrap();

    driver.inject_edge(CHIP, 5, Edge::Rising);
    driver.inject_edge(CHIP, 5, Edge::Falling);
    let a = rx.recv_timeout(WAIT).unwrap();
    let b = rx.recv_timeout(WAIT).unwrap();
    assert_eq!((a.state, b.state), (State::Active, State::Inactive));

    listener.close();
    driver.inject_edge(CHIP, 5, Edge::Rising);
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
}

#[test]
fn test_listener_ends_with_line() {
    let (_driver, controller) = setup();
    let line = controller
        .request_line(CHIP, 6, LineConfig::output(State::Inactive))
        .unwrap();
    let (tx, rx) = mpsc::channel::<State>();
    let listener = line
        .on_event(move |event| {
            let _ = tx.send(event.state);
        })
        .unwrap();
    line.set_state(State::Active).unwrap();
    line.close().unwrap();
    // Set, forced inactive, then the callback thread exits and drops tx.
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), State::Active);
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), State::Inactive);
    assert!(rx.recv_timeout(WAIT).is_err());
    listener.close();
}

#[tokio::test]
async fn test_watch_all_sees_every_line() {
    let (driver, controller) = setup();
    let mut all = controller.watch_all();
    assert!(all.key().is_none());

    let out = controller
        .request_line(CHIP, 17, LineConfig::output(State::Inactive))
        .unwrap();
    let _input = controller.request_line("gpiochip1", 2, LineConfig::default()).unwrap();
    out.set_state(State::Active).unwrap();
    driver.inject_edge("gpiochip1", 2, Edge::Rising);

    let first = timeout(WAIT, all.recv()).await.unwrap().unwrap();
    let second = timeout(WAIT, all.recv()).await.unwrap().unwrap();
    assert_eq!(first.key(), LineKey::new(CHIP, 17));
    assert!(!first.is_hardware_edge);
    assert_eq!(second.key(), LineKey::new("gpiochip1", 2));
    assert!(second.is_hardware_edge);
}

#[test]
fn test_slow_watcher_drops_without_blocking() {
    let driver = MockDriver::default();
    let options = ControllerOptions {
        watcher_capacity: 2,
        ..ControllerOptions::default()
    };
    let controller = LineController::new(Arc::new(driver), options);
    let line = controller
        .request_line(CHIP, 1, LineConfig::output(State::Inactive))
        .unwrap();
    let mut slow = line.watch().unwrap();
    for state in [State::Active, State::Inactive, State::Active, State::Inactive] {
        line.set_state(state).unwrap();
    }
    assert_eq!(line.state(), State::Inactive);
    assert_eq!(slow.try_recv().unwrap().state, State::Active);
    assert_eq!(slow.try_recv().unwrap().state, State::Inactive);
    assert!(matches!(slow.try_recv(), Err(TryRecvError::Empty)));
}

/// Mock driver that keeps the last edge callback handed to it, so a test can
/// fire it after the line was released.
struct CapturingDriver {
    inner: MockDriver,
    callback: Arc<Mutex<Option<EdgeCallback>>>,
}

struct CapturingChip {
    inner: Box<dyn ChipHandle>,
    callback: Arc<Mutex<Option<EdgeCallback>>>,
}

impl LineDriver for CapturingDriver {
    fn driver_type(&self) -> &'static str {
        "capturing"
    }

    fn chip_names(&self) -> Vec<String> {
        self.inner.chip_names()
    }

    fn open_chip(&self, name: &str, consumer: &str) -> DriverResult<Box<dyn ChipHandle>> {
        Ok(Box::new(CapturingChip {
            inner: self.inner.open_chip(name, consumer)?,
            callback: self.callback.clone(),
        }))
    }
}

impl ChipHandle for CapturingChip {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn line_count(&self) -> u32 {
        self.inner.line_count()
    }

    fn request_line(
        &mut self,
        offset: u32,
        config: LineConfig,
        on_edge: Option<EdgeCallback>,
    ) -> DriverResult<Box<dyn LineHandle>> {
        *self.callback.lock() = on_edge.clone();
        self.inner.request_line(offset, config, on_edge)
    }

    fn close(self: Box<Self>) -> DriverResult<()> {
        self.inner.close()
    }
}

#[test]
fn test_edge_arriving_after_close_is_ignored() {
    let callback = Arc::new(Mutex::new(None));
    let driver = CapturingDriver {
        inner: MockDriver::default(),
        callback: callback.clone(),
    };
    let controller = LineController::new(Arc::new(driver), ControllerOptions::default());

    let line = controller.request_line(CHIP, 4, LineConfig::default()).unwrap();
    let mut old_watcher = line.watch().unwrap();
    let stale = callback.lock().take().unwrap();
    let mut all = controller.watch_all();
    line.close().unwrap();

    stale(EdgeEvent::now(4, Edge::Rising));
    assert!(old_watcher.blocking_recv().is_none());
    assert!(matches!(all.try_recv(), Err(TryRecvError::Empty)));

    // A fresh line on the same offset is not reachable from the old callback.
    let line = controller.request_line(CHIP, 4, LineConfig::default()).unwrap();
    let mut watcher = line.watch().unwrap();
    stale(EdgeEvent::now(4, Edge::Rising));
    assert_eq!(line.state(), State::Inactive);
    assert!(matches!(watcher.try_recv(), Err(TryRecvError::Empty)));
}
