//! Overlay service
//!
//! The single consumer of the event queue. It owns the lifecycle manager and
//! the trigger detector; everything else (platform callbacks, timers, the
//! tray, the content provider) reaches them by posting events, either directly
//! or through an `OverlayClient`.

use std::sync::Arc;

use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::overlay::OverlayManager;
use super::permission::PermissionGate;
use super::trigger::{Trigger, TriggerDetector};
use crate::shared::error::{OverlayError, OverlayResult};
use crate::shared::events::{self, EventReceiver, EventSender, OverlayCommand, OverlayEvent};
use crate::shared::settings::{OverlaySettings, SettingsStore, TriggerSettings};
use crate::shared::types::{OverlayContent, OverlayHandle, Point, Size};
use crate::system::platform::Platform;

/// Supplies what goes inside the panel each time the trigger opens it.
pub trait ContentProvider: Send + Sync {
    fn preferred_size(&self) -> Size;

    fn make_content(&self) -> OverlayContent;

    /// Called once when the service starts, with the client the content uses
    /// to request focus or paste its result back.
    fn attach(&self, _client: OverlayClient) {}
}

pub struct OverlayService {
    platform: Platform,
    gate: Arc<PermissionGate>,
    manager: OverlayManager,
    detector: TriggerDetector,
    provider: Arc<dyn ContentProvider>,
    events: EventSender,
    receiver: EventReceiver,
    hotkeys: Option<watch::Receiver<TriggerSettings>>,
    store: Option<Arc<SettingsStore>>,
}

impl OverlayService {
    pub fn new(
        platform: Platform,
        settings: &OverlaySettings,
        hotkeys: watch::Receiver<TriggerSettings>,
        provider: Arc<dyn ContentProvider>,
    ) -> OverlayResult<Self> {
        settings.validate()?;
        let (events, receiver) = events::channel();

        let gate = Arc::new(PermissionGate::new(
            platform.permission.clone(),
            settings.accessibility_prompted,
        ));
        let manager = OverlayManager::new(platform.clone(), settings, events.clone())?;
        let detector = TriggerDetector::new(&settings.trigger, events.clone())?;

        Ok(Self {
            platform,
            gate,
            manager,
            detector,
            provider,
            events,
            receiver,
            hotkeys: Some(hotkeys),
            store: None,
        })
    }

    /// Build from the store's current settings, follow its hotkey changes and
    /// record the onboarding prompt in it.
    pub fn from_store(
        platform: Platform,
        store: Arc<SettingsStore>,
        provider: Arc<dyn ContentProvider>,
    ) -> OverlayResult<Self> {
        let mut service = Self::new(platform, &store.current(), store.subscribe(), provider)?;
        service.store = Some(store);
        Ok(service)
    }

    pub fn client(&self) -> OverlayClient {
        OverlayClient {
            events: self.events.clone(),
        }
    }

    pub fn permission_gate(&self) -> Arc<PermissionGate> {
        self.gate.clone()
    }

    /// Process events until `Shutdown`. Hides the overlay and removes every
    /// monitor on the way out.
    pub async fn run(mut self) -> OverlayResult<()> {
        // Onboarding prompt; a no-op once granted or asked in any earlier run
        let prompted_before = self.gate.was_prompted();
        self.gate.request_permission();
        if !prompted_before && self.gate.was_prompted() {
            Self::remember_prompt(self.store.clone()).await;
        }
        self.provider.attach(self.client());

        self.detector.start(self.platform.events.as_ref(), &self.gate)?;
        self.manager.set_trigger_gesture(self.detector.binding().gesture);

        let forwarder = self.hotkeys.take().map(|rx| forward_hotkey_changes(rx, self.events.clone()));

        tracing::info!("Overlay service running");
        while let Some(event) = self.receiver.recv().await {
            if matches!(event, OverlayEvent::Shutdown) {
                break;
            }
            self.handle(event);
        }

        if let Some(forwarder) = forwarder {
            forwarder.abort();
        }
        self.detector.stop();
        self.manager.hide();
        tracing::info!("Overlay service stopped");
        Ok(())
    }

    async fn remember_prompt(store: Option<Arc<SettingsStore>>) {
        if let Some(store) = &store {
            match store.mark_accessibility_prompted().await {
                Ok(()) => tracing::debug!("Accessibility prompt recorded in {}", store.path().display()),
                Err(e) => tracing::warn!("Failed to record the accessibility prompt: {}", e),
            }
        }
    }

    fn handle(&mut self, event: OverlayEvent) {
        match event {
            OverlayEvent::Command(command) => self.handle_command(command),
            OverlayEvent::TriggerInput(input) => {
                if let Some(trigger) = self.detector.process(&input, Instant::now()) {
                    self.toggle(trigger);
                }
            }
            OverlayEvent::TriggerRearm { token } => self.detector.rearm(token),
            OverlayEvent::HotkeyChanged(settings) => {
                self.detector.rebind(&settings, self.platform.events.as_ref(), &self.gate);
                self.manager.set_trigger_gesture(self.detector.binding().gesture);
            }
            OverlayEvent::FocusRequested => self.manager.request_focus(),
            other => self.manager.handle_event(other),
        }
    }

    fn handle_command(&mut self, command: OverlayCommand) {
        match command {
            OverlayCommand::Show { point, size, content, reply } => {
                let _ = reply.send(self.manager.show(point, size, content));
            }
            OverlayCommand::Hide => self.manager.hide(),
            OverlayCommand::PasteAndReturn => self.manager.paste_and_return(),
            OverlayCommand::IsVisible { reply } => {
                let _ = reply.send(self.manager.is_visible());
            }
        }
    }

    /// The trigger opens a hidden overlay and closes a visible one.
    fn toggle(&mut self, trigger: Trigger) {
        if self.manager.is_visible() {
            self.manager.hide();
            return;
        }

        let point = match trigger {
            Trigger::Pointer(location) => location,
            Trigger::Chord => self.platform.displays.pointer_location().unwrap_or_else(|| {
                tracing::warn!("Pointer location unavailable, opening at the origin");
                Point::default()
            }),
        };

        let size = self.provider.preferred_size();
        let content = self.provider.make_content();
        if let Err(e) = self.manager.show(point, size, content) {
            tracing::error!("Failed to show overlay: {}", e);
        }
    }
}

fn forward_hotkey_changes(mut rx: watch::Receiver<TriggerSettings>, events: EventSender) -> JoinHandle<()> {
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let settings = rx.borrow_and_update().clone();
            events.publish(OverlayEvent::HotkeyChanged(settings));
        }
        tracing::debug!("Settings store dropped; trigger binding is now fixed");
    })
}

/// Cloneable handle for collaborators outside the queue consumer.
#[derive(Clone, Debug)]
pub struct OverlayClient {
    events: EventSender,
}

impl OverlayClient {
    pub async fn show(&self, point: Point, size: Size, content: OverlayContent) -> OverlayResult<OverlayHandle> {
        let (reply, rx) = oneshot::channel();
        self.send(OverlayCommand::Show { point, size, content, reply })?;
        rx.await.map_err(|_| OverlayError::ServiceStopped)?
    }

    pub fn hide(&self) -> OverlayResult<()> {
        self.send(OverlayCommand::Hide)
    }

    pub fn paste_and_return(&self) -> OverlayResult<()> {
        self.send(OverlayCommand::PasteAndReturn)
    }

    pub async fn is_visible(&self) -> OverlayResult<bool> {
        let (reply, rx) = oneshot::channel();
        self.send(OverlayCommand::IsVisible { reply })?;
        rx.await.map_err(|_| OverlayError::ServiceStopped)
    }

    /// The content's "focus requested" signal.
    pub fn request_focus(&self) -> OverlayResult<()> {
        self.publish(OverlayEvent::FocusRequested)
    }

    pub fn shutdown(&self) -> OverlayResult<()> {
        self.publish(OverlayEvent::Shutdown)
    }

    fn send(&self, command: OverlayCommand) -> OverlayResult<()> {
        self.publish(OverlayEvent::Command(command))
    }

    fn publish(&self, event: OverlayEvent) -> OverlayResult<()> {
        if self.events.is_closed() {
            return Err(OverlayError::ServiceStopped);
        }
        self.events.publish(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::types::{ContentHandle, Modifiers};
    use crate::system::platform::MonitorScope;
    use crate::testing::{key, FakeDesktop, Injection};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct TestProvider {
        made: AtomicUsize,
        closed: Arc<AtomicUsize>,
        attached: std::sync::Mutex<Option<OverlayClient>>,
    }

    impl TestProvider {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                made: AtomicUsize::new(0),
                closed: Arc::new(AtomicUsize::new(0)),
                attached: std::sync::Mutex::new(None),
            })
        }
    }

    impl ContentProvider for TestProvider {
        fn preferred_size(&self) -> Size {
            Size::new(320.0, 200.0)
        }

        fn make_content(&self) -> OverlayContent {
            self.made.fetch_add(1, Ordering::SeqCst);
            let closed = self.closed.clone();
            OverlayContent::new(ContentHandle::new("tool view")).on_close(move || {
                closed.fetch_add(1, Ordering::SeqCst);
            })
        }

        fn attach(&self, client: OverlayClient) {
            *self.attached.lock().unwrap() = Some(client);
        }
    }

    fn hotkey() -> crate::shared::types::InputEvent {
        key(0x31, Modifiers { control: true, shift: true, ..Modifiers::NONE })
    }

    /// Let every runnable task finish before continuing.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    fn start(
        desktop: &Arc<FakeDesktop>,
        provider: Arc<TestProvider>,
    ) -> (OverlayClient, watch::Sender<TriggerSettings>, JoinHandle<OverlayResult<()>>) {
        let settings = OverlaySettings::default();
        let (hotkey_tx, hotkey_rx) = watch::channel(settings.trigger.clone());
        let service = OverlayService::new(desktop.platform(), &settings, hotkey_rx, provider).unwrap();
        let client = service.client();
        let task = tokio::spawn(service.run());
        (client, hotkey_tx, task)
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_toggles_overlay() {
        let desktop = FakeDesktop::new();
        let provider = TestProvider::new();
        let (client, _hotkeys, _task) = start(&desktop, provider.clone());
        settle().await;

        desktop.deliver(MonitorScope::Global, hotkey());
        assert!(client.is_visible().await.unwrap());
        assert_eq!(provider.made.load(Ordering::SeqCst), 1);

        // Opens at the pointer (400, 400)
        let windows = desktop.open_windows();
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].frame.origin.x, 412.0);

        // Same chord again once the debounce window has passed closes it
        tokio::time::sleep(Duration::from_millis(400)).await;
        desktop.deliver(MonitorScope::Global, hotkey());
        assert!(!client.is_visible().await.unwrap());
        assert_eq!(provider.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_key_repeat_burst_opens_once() {
        let desktop = FakeDesktop::new();
        let provider = TestProvider::new();
        let (client, _hotkeys, _task) = start(&desktop, provider.clone());
        settle().await;

        desktop.deliver(MonitorScope::Global, hotkey());
        tokio::time::sleep(Duration::from_millis(50)).await;
        desktop.deliver(MonitorScope::Local, hotkey());

        assert!(client.is_visible().await.unwrap());
        assert_eq!(provider.made.load(Ordering::SeqCst), 1);
        assert_eq!(provider.closed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hotkey_change_rebinds_without_restart() {
        let desktop = FakeDesktop::new();
        let provider = TestProvider::new();
        let (client, hotkeys, _task) = start(&desktop, provider.clone());
        settle().await;

        hotkeys
            .send(TriggerSettings {
                hotkey: "Command+Alt+K".to_string(),
                ..TriggerSettings::default()
            })
            .unwrap();
        settle().await;

        desktop.deliver(MonitorScope::Global, hotkey());
        assert!(!client.is_visible().await.unwrap());

        desktop.deliver(
            MonitorScope::Global,
            key(0x28, Modifiers { command: true, alt: true, ..Modifiers::NONE }),
        );
        assert!(client.is_visible().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_paste_and_return_reaches_source() {
        let desktop = FakeDesktop::new();
        desktop.set_activation_brings_front(true);
        let provider = TestProvider::new();
        let (client, _hotkeys, _task) = start(&desktop, provider.clone());
        settle().await;

        let content = provider.make_content();
        let handle = client
            .show(Point::new(700.0, 300.0), Size::new(320.0, 200.0), content)
            .await
            .unwrap();
        assert_eq!(desktop.open_windows()[0].frame, handle.frame);

        client.paste_and_return().unwrap();
        assert!(!client.is_visible().await.unwrap());

        // Injection runs on the blocking pool
        for _ in 0..100 {
            if !desktop.injections().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(desktop.injections(), vec![Injection::PasteShortcut]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_content_closes_itself_through_attached_client() {
        let desktop = FakeDesktop::new();
        let provider = TestProvider::new();
        let (client, _hotkeys, _task) = start(&desktop, provider.clone());
        settle().await;

        desktop.deliver(MonitorScope::Global, hotkey());
        assert!(client.is_visible().await.unwrap());

        let attached = provider.attached.lock().unwrap().clone().expect("provider attached");
        attached.hide().unwrap();
        assert!(!client.is_visible().await.unwrap());
        assert_eq!(provider.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_hides_and_removes_monitors() {
        let desktop = FakeDesktop::new();
        let provider = TestProvider::new();
        let (client, _hotkeys, task) = start(&desktop, provider.clone());
        settle().await;

        desktop.deliver(MonitorScope::Global, hotkey());
        assert!(client.is_visible().await.unwrap());

        client.shutdown().unwrap();
        task.await.unwrap().unwrap();

        assert!(desktop.open_windows().is_empty());
        assert_eq!(desktop.total_monitors(), 0);
        assert_eq!(provider.closed.load(Ordering::SeqCst), 1);
        assert!(matches!(client.hide(), Err(OverlayError::ServiceStopped)));
    }

    #[tokio::test]
    async fn test_from_store_uses_saved_binding() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SettingsStore::at(dir.path().join("settings.json")));
        let mut settings = OverlaySettings::default();
        settings.trigger.hotkey = "Control+Alt+P".to_string();
        store.save(settings).await.unwrap();

        let desktop = FakeDesktop::new();
        let service = OverlayService::from_store(desktop.platform(), store, TestProvider::new()).unwrap();
        assert_eq!(service.detector.binding().chord.to_string(), "Control+Alt+P");
    }

    /// Start a service over the settings file at `path` and stop it again.
    async fn launch_and_quit(desktop: &Arc<FakeDesktop>, path: &std::path::Path) -> Arc<SettingsStore> {
        let store = Arc::new(SettingsStore::at(path));
        store.load().await.unwrap();
        let service = OverlayService::from_store(desktop.platform(), store.clone(), TestProvider::new()).unwrap();
        let client = service.client();
        let task = tokio::spawn(service.run());
        client.shutdown().unwrap();
        task.await.unwrap().unwrap();
        store
    }

    #[tokio::test]
    async fn test_denied_permission_prompts_on_first_launch_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let desktop = FakeDesktop::new();
        desktop.set_trusted(false);

        let store = launch_and_quit(&desktop, &path).await;
        assert_eq!(desktop.prompt_count(), 1);
        assert!(store.current().accessibility_prompted);

        launch_and_quit(&desktop, &path).await;
        launch_and_quit(&desktop, &path).await;
        assert_eq!(desktop.prompt_count(), 1);
    }

    #[tokio::test]
    async fn test_granted_permission_leaves_onboarding_flag_unset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let desktop = FakeDesktop::new();

        let store = launch_and_quit(&desktop, &path).await;
        assert_eq!(desktop.prompt_count(), 0);
        assert!(!store.current().accessibility_prompted);
        assert!(!path.exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_chord_opens_at_current_pointer() {
        let desktop = FakeDesktop::new();
        desktop.set_pointer(Some(Point::new(900.0, 600.0)));
        let provider = TestProvider::new();
        let (client, _hotkeys, _task) = start(&desktop, provider.clone());
        settle().await;

        desktop.deliver(MonitorScope::Global, hotkey());
        assert!(client.is_visible().await.unwrap());

        let frame = desktop.open_windows()[0].frame;
        assert_eq!(frame.origin, Point::new(912.0, 388.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_chord_without_pointer_location_still_opens() {
        let desktop = FakeDesktop::new();
        desktop.set_pointer(None);
        let provider = TestProvider::new();
        let (client, _hotkeys, _task) = start(&desktop, provider.clone());
        settle().await;

        desktop.deliver(MonitorScope::Global, hotkey());
        assert!(client.is_visible().await.unwrap());

        // Placed from the origin: no room above, so it opens below
        let frame = desktop.open_windows()[0].frame;
        assert_eq!(frame.origin, Point::new(12.0, 12.0));
        assert_eq!(provider.made.load(Ordering::SeqCst), 1);
    }
}
