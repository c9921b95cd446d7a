//! Events and capabilities the surrounding shell provides.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::events::{EventHub, EventSource, Subscription};
use crate::protocol::MouseState;

/// The host window regained input focus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowFocus;

/// The display container regained focus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerFocus;

/// Content size of the observed container.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContainerSize {
    pub width: f64,
    pub height: f64,
}

impl ContainerSize {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

/// One resize-observer notification; may carry several entries.
pub type ResizeBatch = Vec<ContainerSize>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerKind {
    Mouse,
    Touch,
}

/// Pointer movement or touch start, positioned relative to the container's top edge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerEvent {
    pub kind: PointerKind,
    pub offset_top: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseEventKind {
    Down,
    Move,
    Up,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MouseAdapterEvent {
    pub kind: MouseEventKind,
    pub state: MouseState,
}

/// Single-finger touch events on the rendered surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TouchAdapterEvent {
    Start { x: i32, y: i32 },
    Move { x: i32, y: i32 },
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEvent {
    Down(u32),
    Up(u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DragEvent {
    Over,
    Leave,
    Drop(Vec<PathBuf>),
}

/// Invisible focusable element that receives composed text. Dropping it removes it.
pub trait InputSink: Send + Sync {
    fn focus(&self);
}

/// The element hosting the rendered surface and receiving input.
pub trait DisplayContainer: Send + Sync {
    fn mouse_events(&self) -> Subscription<MouseAdapterEvent>;
    fn touch_events(&self) -> Subscription<TouchAdapterEvent>;
    fn key_events(&self) -> Subscription<KeyEvent>;
    fn focus_events(&self) -> Subscription<ContainerFocus>;
    fn set_focusable(&self, focusable: bool);
    fn attach_input_sink(&self) -> Box<dyn InputSink>;
}

/// A [`DisplayContainer`] backed by event hubs, for headless hosts and tests.
#[derive(Clone, Default)]
pub struct VirtualContainer {
    pub mouse: EventHub<MouseAdapterEvent>,
    pub touch: EventHub<TouchAdapterEvent>,
    pub keys: EventHub<KeyEvent>,
    pub focus: EventHub<ContainerFocus>,
    focusable: Arc<AtomicBool>,
    sinks_attached: Arc<AtomicUsize>,
    sink_focus_count: Arc<AtomicUsize>,
}

impl VirtualContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_focusable(&self) -> bool {
        self.focusable.load(Ordering::SeqCst)
    }

    pub fn sinks_attached(&self) -> usize {
        self.sinks_attached.load(Ordering::SeqCst)
    }

    pub fn sink_focus_count(&self) -> usize {
        self.sink_focus_count.load(Ordering::SeqCst)
    }
}

struct VirtualInputSink {
    attached: Arc<AtomicUsize>,
    focused: Arc<AtomicUsize>,
}

impl InputSink for VirtualInputSink {
    fn focus(&self) {
        self.focused.fetch_add(1, Ordering::SeqCst);
    }
}

impl Drop for VirtualInputSink {
    fn drop(&mut self) {
        self.attached.fetch_sub(1, Ordering::SeqCst);
    }
}

impl DisplayContainer for VirtualContainer {
    fn mouse_events(&self) -> Subscription<MouseAdapterEvent> {
        self.mouse.subscribe()
    }

    fn touch_events(&self) -> Subscription<TouchAdapterEvent> {
        self.touch.subscribe()
    }

    fn key_events(&self) -> Subscription<KeyEvent> {
        self.keys.subscribe()
    }

    fn focus_events(&self) -> Subscription<ContainerFocus> {
        self.focus.subscribe()
    }

    fn set_focusable(&self, focusable: bool) {
        self.focusable.store(focusable, Ordering::SeqCst);
    }

    fn attach_input_sink(&self) -> Box<dyn InputSink> {
        self.sinks_attached.fetch_add(1, Ordering::SeqCst);
        Box::new(VirtualInputSink {
            attached: Arc::clone(&self.sinks_attached),
            focused: Arc::clone(&self.sink_focus_count),
        })
    }
}
