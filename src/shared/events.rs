//! Internal event queue.
//!
//! Every platform callback (event monitors, workspace notifications) and every
//! timer runs somewhere else; all of them only publish an `OverlayEvent` here.
//! The single consumer task owns the overlay state and is the only place that
//! mutates it.

use tokio::sync::{mpsc, oneshot};

use super::error::OverlayResult;
use super::settings::TriggerSettings;
use super::types::{InputEvent, OverlayContent, OverlayHandle, Point, ProcessRef, Size};

/// Requests from collaborators living off the queue thread.
#[derive(Debug)]
pub enum OverlayCommand {
    Show {
        point: Point,
        size: Size,
        content: OverlayContent,
        reply: oneshot::Sender<OverlayResult<OverlayHandle>>,
    },
    Hide,
    PasteAndReturn,
    IsVisible {
        reply: oneshot::Sender<bool>,
    },
}

#[derive(Debug)]
pub enum OverlayEvent {
    Command(OverlayCommand),

    /// Input that matched the trigger binding on the delivery side.
    TriggerInput(InputEvent),
    TriggerRearm { token: u64 },
    HotkeyChanged(TriggerSettings),

    // Dismissal observers, tagged with the show cycle that installed them
    CloseKey { cycle: u64 },
    PointerDown { cycle: u64, location: Point },
    AppActivated { cycle: u64, process: ProcessRef },

    FocusAttempt { cycle: u64, attempt: u32 },
    FocusRequested,

    // Paste-and-return, tagged with the activation wait that started them
    ActivationObserved { wait_id: u64, process: ProcessRef },
    ActivationTimedOut { wait_id: u64 },
    InjectionFinished { wait_id: u64, result: OverlayResult<()> },

    Shutdown,
}

/// Cloneable, thread-safe publishing side of the queue.
#[derive(Clone, Debug)]
pub struct EventSender {
    sender: mpsc::UnboundedSender<OverlayEvent>,
}

impl EventSender {
    pub fn publish(&self, event: OverlayEvent) {
        // Receiver gone means the service is shutting down
        let _ = self.sender.send(event);
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

pub type EventReceiver = mpsc::UnboundedReceiver<OverlayEvent>;

pub fn channel() -> (EventSender, EventReceiver) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (EventSender { sender }, receiver)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_arrive_in_order() {
        let (tx, mut rx) = channel();
        let other = tx.clone();

        tx.publish(OverlayEvent::CloseKey { cycle: 1 });
        other.publish(OverlayEvent::FocusRequested);
        tx.publish(OverlayEvent::Shutdown);

        assert!(matches!(rx.try_recv(), Ok(OverlayEvent::CloseKey { cycle: 1 })));
        assert!(matches!(rx.try_recv(), Ok(OverlayEvent::FocusRequested)));
        assert!(matches!(rx.try_recv(), Ok(OverlayEvent::Shutdown)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_publish_after_receiver_dropped_is_silent() {
        let (tx, rx) = channel();
        drop(rx);

        assert!(tx.is_closed());
        tx.publish(OverlayEvent::Shutdown);
    }
}
