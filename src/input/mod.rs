use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Button {
    Left,
    Right,
}

/// One discrete operator action. Scroll deltas carry direction only; the
/// step size applied per event is a controller setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    Scroll { dx: i32, dy: i32 },
    Click { button: Button, pressed: bool },
}

pub type InputSender = SyncSender<InputEvent>;
pub type InputReceiver = Receiver<InputEvent>;

/// Bounded event mailbox between the input thread and the control loop.
pub fn channel(bound: usize) -> (InputSender, InputReceiver) {
    sync_channel(bound)
}

/// Source of raw operator events, polled from the listener thread.
///
/// `poll` should block briefly while idle so the stop flag is observed
/// promptly. Actual device capture lives outside the crate.
pub trait InputDevice: Send {
    fn poll(&mut self) -> Option<InputEvent>;
}

/// Thread bridging an [`InputDevice`] into the event channel.
///
/// `stop` is deterministic (flag, then join) and idempotent; dropping the
/// listener stops it as well, so every controller exit path tears the
/// thread down.
pub struct InputListener {
    handle: Option<JoinHandle<()>>,
    stop: Arc<AtomicBool>,
}

impl InputListener {
    pub fn start(mut device: Box<dyn InputDevice>, sender: InputSender) -> InputListener {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let handle = std::thread::spawn(move || {
            while !stop_flag.load(Ordering::Acquire) {
                let Some(event) = device.poll() else { continue };
                match sender.try_send(event) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => debug!("input queue full, dropping event"),
                    Err(TrySendError::Disconnected(_)) => break,
                }
            }
        });
        InputListener {
            handle: Some(handle),
            stop,
        }
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for InputListener {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Replays a fixed event sequence with per-event delays, then idles.
/// Used by tests and the headless demo.
pub struct ScriptedDevice {
    events: std::collections::VecDeque<(Duration, InputEvent)>,
    idle: Duration,
}

impl ScriptedDevice {
    pub fn new(events: Vec<(Duration, InputEvent)>) -> ScriptedDevice {
        ScriptedDevice {
            events: events.into(),
            idle: Duration::from_millis(5),
        }
    }
}

impl InputDevice for ScriptedDevice {
    fn poll(&mut self) -> Option<InputEvent> {
        match self.events.pop_front() {
            Some((delay, event)) => {
                std::thread::sleep(delay);
                Some(event)
            }
            None => {
                std::thread::sleep(self.idle);
                None
            }
        }
    }
}
