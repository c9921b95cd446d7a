//! Scale-to-fit for the rendered surface and the auto-hiding control overlay.

use std::future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::config::BridgeSettings;
use crate::events::{EventSource, ListenerHandle};
use crate::host::{ContainerSize, PointerEvent, PointerKind, ResizeBatch};
use crate::session::{SessionFailure, SessionObserver};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DisplaySize {
    pub width: u32,
    pub height: u32,
}

impl DisplaySize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// What the viewport needs from the session to rescale the surface.
pub trait DisplayGeometry: Send + Sync {
    fn display_size(&self) -> DisplaySize;
    fn set_scale(&self, scale: f64);
}

/// Placement of the rendered surface and the overlay within the container.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportGeometry {
    pub scale: f64,
    pub offset_top: f64,
    pub offset_left: f64,
    pub drawer_visible: bool,
    pub drawer_top: f64,
    pub drawer_left: f64,
}

impl Default for ViewportGeometry {
    fn default() -> Self {
        Self {
            scale: 1.0,
            offset_top: 0.0,
            offset_left: 0.0,
            drawer_visible: false,
            drawer_top: 0.0,
            drawer_left: 0.0,
        }
    }
}

/// Uniform scale that fits `display` into `container`, and the offsets that
/// centre the scaled surface. `None` while the display has no size yet.
pub fn fit_to_container(container: ContainerSize, display: DisplaySize) -> Option<(f64, f64, f64)> {
    if display.is_empty() {
        return None;
    }
    let width = f64::from(display.width);
    let height = f64::from(display.height);
    let scale = (container.width / width).min(container.height / height);
    let offset_top = (container.height - height * scale) / 2.0;
    let offset_left = (container.width - width * scale) / 2.0;
    Some((scale, offset_top, offset_left))
}

struct ViewportState {
    display: Arc<dyn DisplayGeometry>,
    geometry: watch::Sender<ViewportGeometry>,
    container: Mutex<Option<ContainerSize>>,
    overlay_width: f64,
    reveal_px: f64,
    pointer_hide_delay: Duration,
    touch_hide_delay: Duration,
}

impl ViewportState {
    fn apply_resize(&self, batch: &[ContainerSize]) {
        let display = self.display.display_size();
        if display.is_empty() {
            // the surface must carry a scale before it can render anything
            self.display.set_scale(1.0);
            self.geometry.send_modify(|g| g.scale = 1.0);
            if let Some(last) = batch.last() {
                self.remember(*last);
            }
            return;
        }

        self.show_drawer(false);
        for container in batch {
            let Some((scale, offset_top, offset_left)) = fit_to_container(*container, display)
            else {
                continue;
            };
            self.display.set_scale(scale);
            self.remember(*container);
            self.geometry.send_modify(|g| {
                g.scale = scale;
                g.offset_top = offset_top;
                g.offset_left = offset_left;
            });
            trace!(
                "Viewport {}x{} -> scale {:.3}",
                container.width, container.height, scale
            );
        }
    }

    fn refresh(&self) {
        if let Some(container) = self.last_container() {
            self.apply_resize(&[container]);
        } else if self.display.display_size().is_empty() {
            self.display.set_scale(1.0);
        }
    }

    fn remember(&self, container: ContainerSize) {
        *self
            .container
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(container);
    }

    fn last_container(&self) -> Option<ContainerSize> {
        *self
            .container
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn show_drawer(&self, visible: bool) {
        let container_width = self.last_container().map_or(0.0, |c| c.width);
        let drawer_left = ((container_width - self.overlay_width) / 2.0).floor();
        self.geometry.send_modify(|g| {
            g.drawer_visible = visible;
            g.drawer_top = g.offset_top;
            g.drawer_left = drawer_left;
        });
    }

    /// Returns the auto-hide delay to (re)arm when the event qualifies.
    fn on_pointer(&self, event: PointerEvent) -> Option<Duration> {
        if event.offset_top > self.reveal_px {
            return None;
        }
        if !self.geometry.borrow().drawer_visible {
            self.show_drawer(true);
        }
        Some(match event.kind {
            PointerKind::Mouse => self.pointer_hide_delay,
            PointerKind::Touch => self.touch_hide_delay,
        })
    }
}

/// Keeps the rendered surface fitted to its container.
pub struct ViewportController {
    state: Arc<ViewportState>,
    listener: Option<ListenerHandle>,
}

impl ViewportController {
    pub fn new(display: Arc<dyn DisplayGeometry>, settings: &BridgeSettings) -> Self {
        let (geometry, _) = watch::channel(ViewportGeometry::default());
        Self {
            state: Arc::new(ViewportState {
                display,
                geometry,
                container: Mutex::new(None),
                overlay_width: 0.0,
                reveal_px: settings.overlay_reveal_px,
                pointer_hide_delay: settings.pointer_hide_delay(),
                touch_hide_delay: settings.touch_hide_delay(),
            }),
            listener: None,
        }
    }

    /// Width of the overlay, used to centre it horizontally. Set it before `install`.
    pub fn with_overlay_width(mut self, overlay_width: f64) -> Self {
        if let Some(state) = Arc::get_mut(&mut self.state) {
            state.overlay_width = overlay_width;
        }
        self
    }

    pub fn geometry(&self) -> ViewportGeometry {
        *self.state.geometry.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ViewportGeometry> {
        self.state.geometry.subscribe()
    }

    pub fn is_installed(&self) -> bool {
        self.listener.is_some()
    }

    pub fn install(
        &mut self,
        resizes: &dyn EventSource<ResizeBatch>,
        pointer: &dyn EventSource<PointerEvent>,
    ) {
        if self.listener.is_some() {
            return;
        }

        let token = CancellationToken::new();
        let cancel = token.clone();
        let (mut resizes, resize_guard) = resizes.subscribe().into_parts();
        let (mut pointer, pointer_guard) = pointer.subscribe().into_parts();
        let state = Arc::clone(&self.state);

        tokio::spawn(async move {
            let mut hide_at: Option<Instant> = None;
            loop {
                let deadline = hide_at;
                let hide_timer = async move {
                    match deadline {
                        Some(deadline) => sleep_until(deadline).await,
                        None => future::pending::<()>().await,
                    }
                };

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    batch = resizes.recv() => match batch {
                        Some(batch) => state.apply_resize(&batch),
                        None => break,
                    },
                    event = pointer.recv() => match event {
                        Some(event) => {
                            if let Some(delay) = state.on_pointer(event) {
                                hide_at = Some(Instant::now() + delay);
                            }
                        }
                        None => break,
                    },
                    _ = hide_timer => {
                        hide_at = None;
                        state.show_drawer(false);
                    }
                }
            }
            debug!("Viewport listener stopped");
        });

        self.listener = Some(
            ListenerHandle::new(token)
                .with(resize_guard)
                .with(pointer_guard),
        );
    }

    /// Detach listeners and hide the overlay immediately.
    pub fn uninstall(&mut self) {
        self.listener = None;
        self.state.show_drawer(false);
    }

    /// Refit to the last observed container.
    pub fn refresh(&self) {
        self.state.refresh();
    }

    /// Wrap `inner` so the viewport refits every time a session is
    /// established. Pass the result as the session host's observer.
    pub fn refresh_on_connect(&self, inner: Arc<dyn SessionObserver>) -> Arc<RefreshOnConnect> {
        Arc::new(RefreshOnConnect {
            state: Arc::clone(&self.state),
            inner,
        })
    }

    /// Apply one resize batch synchronously.
    pub fn apply_resize(&self, batch: &[ContainerSize]) {
        self.state.apply_resize(batch);
    }
}

/// Session observer that refits the viewport on connect and forwards every
/// notification to the wrapped observer.
pub struct RefreshOnConnect {
    state: Arc<ViewportState>,
    inner: Arc<dyn SessionObserver>,
}

impl SessionObserver for RefreshOnConnect {
    fn connection_attempted(&self) {
        self.inner.connection_attempted();
    }

    fn connection_established(&self) {
        // display size is known by now
        self.state.refresh();
        self.inner.connection_established();
    }

    fn connection_cancelled(&self) {
        self.inner.connection_cancelled();
    }

    fn decision_required(&self, failure: &SessionFailure) {
        self.inner.decision_required(failure);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventHub;
    use crate::testing::{Notice, RecordingObserver};

    #[derive(Default)]
    struct FakeDisplay {
        size: Mutex<DisplaySize>,
        scales: Mutex<Vec<f64>>,
    }

    impl FakeDisplay {
        fn sized(width: u32, height: u32) -> Arc<Self> {
            let display = Self::default();
            *display.size.lock().unwrap() = DisplaySize::new(width, height);
            Arc::new(display)
        }

        fn scales(&self) -> Vec<f64> {
            self.scales.lock().unwrap().clone()
        }
    }

    impl DisplayGeometry for FakeDisplay {
        fn display_size(&self) -> DisplaySize {
            *self.size.lock().unwrap()
        }

        fn set_scale(&self, scale: f64) {
            self.scales.lock().unwrap().push(scale);
        }
    }

    fn controller(display: &Arc<FakeDisplay>) -> ViewportController {
        ViewportController::new(display.clone(), &BridgeSettings::default())
    }

    fn pointer(kind: PointerKind, offset_top: f64) -> PointerEvent {
        PointerEvent { kind, offset_top }
    }

    /// Let the listener task drain what was emitted so far.
    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn test_fit_doubles_small_display() {
        let fit = fit_to_container(ContainerSize::new(800.0, 600.0), DisplaySize::new(400, 300));
        assert_eq!(fit, Some((2.0, 0.0, 0.0)));
    }

    #[test]
    fn test_fit_uses_smaller_ratio_and_centres() {
        let (scale, top, left) =
            fit_to_container(ContainerSize::new(1000.0, 500.0), DisplaySize::new(800, 600)).unwrap();
        assert!((scale - 500.0 / 600.0).abs() < 1e-9);
        assert!(top.abs() < 1e-9);
        assert!((left - (1000.0 - 800.0 * scale) / 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_display_forces_unit_scale() {
        let display = FakeDisplay::sized(0, 768);
        let viewport = controller(&display);
        viewport.apply_resize(&[ContainerSize::new(800.0, 600.0)]);

        assert_eq!(display.scales(), vec![1.0]);
        assert_eq!(viewport.geometry(), ViewportGeometry::default());
    }

    #[test]
    fn test_resize_hides_overlay_and_applies_each_entry() {
        let display = FakeDisplay::sized(400, 300);
        let viewport = controller(&display).with_overlay_width(200.0);
        viewport.state.show_drawer(true);

        viewport.apply_resize(&[
            ContainerSize::new(400.0, 300.0),
            ContainerSize::new(1000.0, 300.0),
        ]);

        assert_eq!(display.scales(), vec![1.0, 1.0]);
        let geometry = viewport.geometry();
        assert!(!geometry.drawer_visible);
        assert_eq!(geometry.offset_left, 300.0);
    }

    #[test]
    fn test_refresh_reuses_last_container() {
        let display = FakeDisplay::sized(0, 0);
        let viewport = controller(&display);
        viewport.apply_resize(&[ContainerSize::new(800.0, 600.0)]);

        *display.size.lock().unwrap() = DisplaySize::new(400, 300);
        viewport.refresh();

        assert_eq!(display.scales(), vec![1.0, 2.0]);
        assert_eq!(viewport.geometry().scale, 2.0);
    }

    #[test]
    fn test_connect_refits_and_forwards() {
        let display = FakeDisplay::sized(0, 0);
        let viewport = controller(&display);
        viewport.apply_resize(&[ContainerSize::new(800.0, 600.0)]);
        let recorder = RecordingObserver::new();
        let observer = viewport.refresh_on_connect(recorder.clone());

        observer.connection_attempted();
        assert_eq!(display.scales(), vec![1.0]);

        *display.size.lock().unwrap() = DisplaySize::new(400, 300);
        observer.connection_established();

        assert_eq!(display.scales(), vec![1.0, 2.0]);
        assert_eq!(viewport.geometry().scale, 2.0);
        assert_eq!(recorder.notices(), vec![Notice::Attempted, Notice::Established]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mouse_reveal_hides_after_delay() {
        let display = FakeDisplay::sized(400, 300);
        let resizes: EventHub<ResizeBatch> = EventHub::new();
        let pointers: EventHub<PointerEvent> = EventHub::new();
        let mut viewport = controller(&display).with_overlay_width(100.0);
        viewport.install(&resizes, &pointers);

        resizes.emit(vec![ContainerSize::new(800.0, 600.0)]);
        settle().await;
        pointers.emit(pointer(PointerKind::Mouse, 20.0));
        settle().await;
        assert!(!viewport.geometry().drawer_visible);

        pointers.emit(pointer(PointerKind::Mouse, 3.0));
        settle().await;
        let geometry = viewport.geometry();
        assert!(geometry.drawer_visible);
        assert_eq!(geometry.drawer_left, 350.0);

        tokio::time::sleep(Duration::from_millis(1999)).await;
        settle().await;
        assert!(viewport.geometry().drawer_visible);

        tokio::time::sleep(Duration::from_millis(2)).await;
        settle().await;
        assert!(!viewport.geometry().drawer_visible);
    }

    #[tokio::test(start_paused = true)]
    async fn test_touch_delay_and_timer_restart() {
        let display = FakeDisplay::sized(400, 300);
        let resizes: EventHub<ResizeBatch> = EventHub::new();
        let pointers: EventHub<PointerEvent> = EventHub::new();
        let mut viewport = controller(&display);
        viewport.install(&resizes, &pointers);
        let mut changes = viewport.subscribe();

        pointers.emit(pointer(PointerKind::Touch, 0.0));
        settle().await;
        assert!(viewport.geometry().drawer_visible);
        let _ = changes.borrow_and_update();

        tokio::time::sleep(Duration::from_millis(5000)).await;
        pointers.emit(pointer(PointerKind::Touch, 2.0));
        settle().await;
        // still visible, so no second reveal
        assert!(!changes.has_changed().unwrap());

        tokio::time::sleep(Duration::from_millis(5000)).await;
        settle().await;
        assert!(viewport.geometry().drawer_visible);

        tokio::time::sleep(Duration::from_millis(1001)).await;
        settle().await;
        assert!(!viewport.geometry().drawer_visible);
    }

    #[tokio::test(start_paused = true)]
    async fn test_uninstall_hides_and_cancels_timer() {
        let display = FakeDisplay::sized(400, 300);
        let resizes: EventHub<ResizeBatch> = EventHub::new();
        let pointers: EventHub<PointerEvent> = EventHub::new();
        let mut viewport = controller(&display);
        viewport.install(&resizes, &pointers);
        viewport.install(&resizes, &pointers);
        assert_eq!(pointers.subscriber_count(), 1);

        pointers.emit(pointer(PointerKind::Mouse, 0.0));
        settle().await;
        assert!(viewport.geometry().drawer_visible);

        viewport.uninstall();
        assert!(!viewport.geometry().drawer_visible);
        settle().await;
        assert_eq!(pointers.subscriber_count(), 0);
        assert_eq!(resizes.subscriber_count(), 0);

        resizes.emit(vec![ContainerSize::new(800.0, 600.0)]);
        settle().await;
        assert!(display.scales().is_empty());
    }
}
