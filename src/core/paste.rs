//! Paste-and-return
//!
//! Hide the overlay, bring the source application back, and only once the
//! system confirms that exact process is frontmost, inject the clipboard into
//! it. A paste that is never confirmed is dropped; the text stays on the
//! clipboard for a manual paste. A newer cycle stops typing that is still
//! going out.

use std::fmt;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::overlay::{OverlayManager, OverlayState};
use crate::shared::error::{OverlayError, OverlayResult};
use crate::shared::events::OverlayEvent;
use crate::shared::settings::PasteSettings;
use crate::shared::types::ProcessRef;
use crate::system::platform::{CancelFlag, Platform, Subscription};

/// How the clipboard reaches the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectionStrategy {
    /// One Cmd+V. Keeps rich content and is instant.
    PasteShortcut,
    /// Type the clipboard text key by key. Terminals get this so bracketed
    /// paste and auto-indent never rewrite the text.
    TypeCharacters,
}

impl InjectionStrategy {
    pub fn for_target(target: &ProcessRef, settings: &PasteSettings) -> Self {
        let is_terminal = target
            .bundle_id
            .as_deref()
            .map_or(false, |bundle| settings.terminal_apps.iter().any(|t| t == bundle));
        if is_terminal {
            InjectionStrategy::TypeCharacters
        } else {
            InjectionStrategy::PasteShortcut
        }
    }
}

impl fmt::Display for InjectionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InjectionStrategy::PasteShortcut => f.write_str("paste shortcut"),
            InjectionStrategy::TypeCharacters => f.write_str("typed characters"),
        }
    }
}

/// The one activation wait allowed at a time. Dropping it removes the
/// activation observer and stops the timeout.
pub struct PendingActivation {
    wait_id: u64,
    target: ProcessRef,
    strategy: InjectionStrategy,
    started: Instant,
    _observer: Subscription,
    timeout: JoinHandle<()>,
}

impl Drop for PendingActivation {
    fn drop(&mut self) {
        self.timeout.abort();
    }
}

/// The injection started for `wait_id`. Outlives the paste cycle until its
/// result comes back; a newer cycle trips `cancel`.
pub struct ActiveInjection {
    wait_id: u64,
    cancel: CancelFlag,
}

/// Blocking injection, run on the blocking pool once `injection_lock` is held.
fn inject(platform: &Platform, strategy: InjectionStrategy, cancel: &CancelFlag) -> OverlayResult<()> {
    // Cancelled while queued behind an earlier injection
    if cancel.is_cancelled() {
        return Err(OverlayError::PasteCancelled);
    }
    match strategy {
        InjectionStrategy::PasteShortcut => platform.input.paste_shortcut(),
        InjectionStrategy::TypeCharacters => match platform.clipboard.read_text()? {
            Some(text) if !text.is_empty() => platform.input.type_text(&text, cancel),
            _ => {
                tracing::debug!("Clipboard has no text, nothing to type");
                Ok(())
            }
        },
    }
}

impl OverlayManager {
    pub fn paste_and_return(&mut self) {
        self.cancel_pending_paste();

        let target = match (self.state(), self.source.clone()) {
            (OverlayState::Visible, Some(target)) => target,
            _ => {
                tracing::debug!("Paste requested without a visible overlay and source app; hiding");
                self.hide();
                return;
            }
        };

        // The panel must be gone before the target comes back
        self.teardown();

        let strategy = InjectionStrategy::for_target(&target, &self.paste_settings);
        self.wait_seq += 1;
        let wait_id = self.wait_seq;

        let events = self.events.clone();
        let target_pid = target.pid;
        let observer = match self.platform.workspace.observe_activations(
            "paste-activation",
            Box::new(move |process| {
                if process.pid == target_pid {
                    events.publish(OverlayEvent::ActivationObserved { wait_id, process });
                }
            }),
        ) {
            Ok(observer) => observer,
            Err(e) => {
                tracing::warn!("Cannot observe activation of {}, paste abandoned: {}", target, e);
                return;
            }
        };

        if let Err(e) = self.platform.workspace.activate(target.pid) {
            tracing::warn!("Failed to reactivate {}, paste abandoned: {}", target, e);
            return;
        }

        // Already in front (the panel never took activation): nothing to wait for
        let frontmost = self.platform.workspace.frontmost_process();
        if frontmost.map_or(false, |p| p.same_identity(&target)) {
            drop(observer);
            tracing::debug!("{} already frontmost", target);
            self.spawn_injection(wait_id, target, strategy);
            return;
        }

        let timeout_ms = self.paste_settings.activation_timeout_ms;
        let events = self.events.clone();
        let timeout = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(timeout_ms)).await;
            events.publish(OverlayEvent::ActivationTimedOut { wait_id });
        });

        tracing::debug!("Waiting up to {}ms for {} to become active", timeout_ms, target);
        self.pending = Some(PendingActivation {
            wait_id,
            target,
            strategy,
            started: Instant::now(),
            _observer: observer,
            timeout,
        });
    }

    pub fn has_pending_paste(&self) -> bool {
        self.pending.is_some()
    }

    /// Whether keystrokes for a confirmed paste may still be going out.
    pub fn is_injecting(&self) -> bool {
        self.injection.is_some()
    }

    /// Drop the activation wait and stop an injection that is still typing.
    pub(super) fn cancel_pending_paste(&mut self) {
        if let Some(pending) = self.pending.take() {
            tracing::debug!("Cancelled pending paste into {}", pending.target);
        }
        if let Some(active) = self.injection.take() {
            active.cancel.cancel();
            tracing::debug!("Cancelled paste {} in flight", active.wait_id);
        }
    }

    pub(super) fn on_activation_observed(&mut self, wait_id: u64, process: ProcessRef) {
        let confirmed = self
            .pending
            .as_ref()
            .map_or(false, |p| p.wait_id == wait_id && p.target.same_identity(&process));
        if !confirmed {
            return;
        }

        if let Some(pending) = self.pending.take() {
            tracing::debug!(
                "{} active after {}ms",
                pending.target,
                pending.started.elapsed().as_millis()
            );
            let (target, strategy) = (pending.target.clone(), pending.strategy);
            drop(pending);
            self.spawn_injection(wait_id, target, strategy);
        }
    }

    pub(super) fn on_activation_timeout(&mut self, wait_id: u64) {
        if !self.pending.as_ref().map_or(false, |p| p.wait_id == wait_id) {
            return;
        }
        if let Some(pending) = self.pending.take() {
            let err = OverlayError::ActivationTimeout {
                pid: pending.target.pid,
                waited_ms: pending.started.elapsed().as_millis() as u64,
            };
            tracing::warn!("{}; clipboard left for manual paste", err);
        }
    }

    pub(super) fn on_injection_finished(&mut self, wait_id: u64, result: OverlayResult<()>) {
        if self.injection.as_ref().map_or(false, |active| active.wait_id == wait_id) {
            self.injection = None;
        }
        match result {
            Ok(()) => tracing::info!("Paste {} delivered", wait_id),
            Err(OverlayError::PasteCancelled) => tracing::info!("Paste {} cancelled by a newer cycle", wait_id),
            Err(e) => tracing::warn!("Paste {} failed: {}", wait_id, e),
        }
    }

    /// Injections are serialized on `injection_lock` so two never interleave keystrokes.
    fn spawn_injection(&mut self, wait_id: u64, target: ProcessRef, strategy: InjectionStrategy) {
        tracing::info!("Pasting into {} via {}", target, strategy);
        let platform = self.platform.clone();
        let events = self.events.clone();
        let lock = self.injection_lock.clone();
        let cancel = CancelFlag::new();
        self.injection = Some(ActiveInjection {
            wait_id,
            cancel: cancel.clone(),
        });

        tokio::spawn(async move {
            let _guard = lock.lock().await;
            let result = tokio::task::spawn_blocking(move || inject(&platform, strategy, &cancel))
                .await
                .unwrap_or_else(|e| Err(OverlayError::System(format!("Injection task failed: {}", e))));
            events.publish(OverlayEvent::InjectionFinished { wait_id, result });
        });
    }
}
