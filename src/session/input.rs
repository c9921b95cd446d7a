use std::future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::ProtocolKind;
use crate::events::ListenerHandle;
use crate::host::{DisplayContainer, InputSink, KeyEvent, TouchAdapterEvent};
use crate::protocol::{MouseState, ProtocolClient, mouse_button};

/// Finger travel (px) after which a touch no longer counts as a tap.
const TAP_MOVE_THRESHOLD: i32 = 10;

/// Single-finger touch turned into mouse states. A quick touch is a left
/// click; holding past the long-press threshold presses the left button
/// until the finger lifts, which allows dragging.
#[derive(Debug)]
pub struct TouchEmulator {
    long_press: Duration,
    origin: (i32, i32),
    position: (i32, i32),
    touching: bool,
    held: bool,
    moved: bool,
    deadline: Option<Instant>,
}

impl TouchEmulator {
    pub fn new(long_press: Duration) -> Self {
        Self {
            long_press,
            origin: (0, 0),
            position: (0, 0),
            touching: false,
            held: false,
            moved: false,
            deadline: None,
        }
    }

    /// When the pending long press fires, if one is armed.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_held(&self) -> bool {
        self.held
    }

    pub fn handle(&mut self, event: TouchAdapterEvent, now: Instant) -> Vec<MouseState> {
        match event {
            TouchAdapterEvent::Start { x, y } => {
                self.touching = true;
                self.held = false;
                self.moved = false;
                self.origin = (x, y);
                self.position = (x, y);
                self.deadline = Some(now + self.long_press);
                vec![self.state(0)]
            }
            TouchAdapterEvent::Move { x, y } => {
                if !self.touching {
                    return Vec::new();
                }
                self.position = (x, y);
                let (dx, dy) = (x - self.origin.0, y - self.origin.1);
                if !self.held && (dx.abs() > TAP_MOVE_THRESHOLD || dy.abs() > TAP_MOVE_THRESHOLD) {
                    self.moved = true;
                    self.deadline = None;
                }
                vec![self.state(self.buttons())]
            }
            TouchAdapterEvent::End => {
                if !self.touching {
                    return Vec::new();
                }
                self.touching = false;
                self.deadline = None;
                if self.held {
                    self.held = false;
                    vec![self.state(0)]
                } else if !self.moved {
                    vec![self.state(mouse_button::LEFT), self.state(0)]
                } else {
                    Vec::new()
                }
            }
        }
    }

    /// The long-press deadline passed.
    pub fn long_press_elapsed(&mut self) -> Vec<MouseState> {
        self.deadline = None;
        if self.touching && !self.held && !self.moved {
            self.held = true;
            vec![self.state(mouse_button::LEFT)]
        } else {
            Vec::new()
        }
    }

    fn buttons(&self) -> u8 {
        if self.held { mouse_button::LEFT } else { 0 }
    }

    fn state(&self, buttons: u8) -> MouseState {
        MouseState::new(self.position.0, self.position.1, buttons)
    }
}

fn forward_mouse(client: &Weak<dyn ProtocolClient>, state: MouseState) -> bool {
    let Some(client) = client.upgrade() else {
        return false;
    };
    // the remote session draws the cursor
    client.display().show_cursor(false);
    client.send_mouse_state(state);
    true
}

/// Mouse, touch and keyboard adapters of a connected session.
pub(crate) struct InputAdapters {
    mouse: Option<ListenerHandle>,
    touch: Option<ListenerHandle>,
    keyboard: Option<ListenerHandle>,
    input_sink: Option<Arc<dyn InputSink>>,
    sink_focus: Option<ListenerHandle>,
}

impl InputAdapters {
    pub(crate) fn activate(
        client: &Arc<dyn ProtocolClient>,
        container: &dyn DisplayContainer,
        protocol: ProtocolKind,
        long_press: Duration,
    ) -> Self {
        client.display().show_cursor(false);

        let mouse = spawn_mouse(Arc::downgrade(client), container);
        let touch = spawn_touch(Arc::downgrade(client), container, long_press);

        container.set_focusable(true);
        let keyboard = spawn_keyboard(Arc::downgrade(client), container);

        let (input_sink, sink_focus) = if protocol.uses_text_input() {
            let sink: Arc<dyn InputSink> = Arc::from(container.attach_input_sink());
            let focus = spawn_sink_focus(Arc::downgrade(&sink), container);
            (Some(sink), Some(focus))
        } else {
            (None, None)
        };

        debug!("Input adapters active (text input sink: {})", input_sink.is_some());
        Self {
            mouse: Some(mouse),
            touch: Some(touch),
            keyboard: Some(keyboard),
            input_sink,
            sink_focus,
        }
    }

    /// Stop mouse, touch and keyboard forwarding, then remove the input sink
    /// and its focus listener.
    pub(crate) fn teardown(&mut self) {
        self.mouse = None;
        self.touch = None;
        self.keyboard = None;
        self.input_sink = None;
        self.sink_focus = None;
    }
}

impl Drop for InputAdapters {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn spawn_mouse(
    client: Weak<dyn ProtocolClient>,
    container: &dyn DisplayContainer,
) -> ListenerHandle {
    let cancel = CancellationToken::new();
    let (mut events, guard) = container.mouse_events().into_parts();
    let listener = cancel.clone();
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = listener.cancelled() => break,
                event = events.recv() => event,
            };
            let Some(event) = event else { break };
            if listener.is_cancelled() || !forward_mouse(&client, event.state) {
                break;
            }
        }
    });
    ListenerHandle::new(cancel).with(guard)
}

fn spawn_touch(
    client: Weak<dyn ProtocolClient>,
    container: &dyn DisplayContainer,
    long_press: Duration,
) -> ListenerHandle {
    let cancel = CancellationToken::new();
    let (mut events, guard) = container.touch_events().into_parts();
    let listener = cancel.clone();
    tokio::spawn(async move {
        let mut emulator = TouchEmulator::new(long_press);
        loop {
            let deadline = emulator.deadline();
            let long_press_timer = async move {
                match deadline {
                    Some(deadline) => sleep_until(deadline).await,
                    None => future::pending::<()>().await,
                }
            };

            let states = tokio::select! {
                _ = listener.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => emulator.handle(event, Instant::now()),
                    None => break,
                },
                _ = long_press_timer => emulator.long_press_elapsed(),
            };

            if listener.is_cancelled() {
                break;
            }
            for state in states {
                if !forward_mouse(&client, state) {
                    return;
                }
            }
        }
    });
    ListenerHandle::new(cancel).with(guard)
}

fn spawn_keyboard(
    client: Weak<dyn ProtocolClient>,
    container: &dyn DisplayContainer,
) -> ListenerHandle {
    let cancel = CancellationToken::new();
    let (mut events, guard) = container.key_events().into_parts();
    let listener = cancel.clone();
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = listener.cancelled() => break,
                event = events.recv() => event,
            };
            let Some(event) = event else { break };
            if listener.is_cancelled() {
                break;
            }
            let Some(client) = client.upgrade() else { break };
            match event {
                KeyEvent::Down(keysym) => client.send_key_event(true, keysym),
                KeyEvent::Up(keysym) => client.send_key_event(false, keysym),
            }
        }
    });
    ListenerHandle::new(cancel).with(guard)
}

/// Keep the text input sink focused whenever the container gains focus.
fn spawn_sink_focus(
    sink: Weak<dyn InputSink>,
    container: &dyn DisplayContainer,
) -> ListenerHandle {
    let cancel = CancellationToken::new();
    let (mut events, guard) = container.focus_events().into_parts();
    let listener = cancel.clone();
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = listener.cancelled() => break,
                event = events.recv() => event,
            };
            if event.is_none() || listener.is_cancelled() {
                break;
            }
            match sink.upgrade() {
                Some(sink) => sink.focus(),
                None => break,
            }
        }
    });
    ListenerHandle::new(cancel).with(guard)
}
