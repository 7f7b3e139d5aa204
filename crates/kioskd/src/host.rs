use kiosk_core::lockdown::{Guard, HostError, NavigationHost};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Something the front end must act on; forwarded as D-Bus signals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    Redirect(String),
    Warning(String),
    Fullscreen(bool),
}

/// Navigation host for a kiosk shell attached over D-Bus.
///
/// The shell asks the daemon about each navigation, key chord and unload;
/// this host records which guards are active and pushes redirects and
/// warnings back out through an event channel.
pub struct ShellHost {
    guards: Mutex<HashSet<Guard>>,
    fullscreen: AtomicBool,
    events: mpsc::UnboundedSender<HostEvent>,
}

impl ShellHost {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<HostEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let host = Self {
            guards: Mutex::new(HashSet::new()),
            fullscreen: AtomicBool::new(false),
            events,
        };
        (host, rx)
    }

    fn emit(&self, event: HostEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("no listener for host events");
        }
    }
}

impl NavigationHost for ShellHost {
    fn register_guard(&self, guard: Guard) -> Result<(), HostError> {
        let mut guards = self.guards.lock().unwrap_or_else(|e| e.into_inner());
        if guards.insert(guard) {
            tracing::debug!(?guard, "guard registered");
        }
        Ok(())
    }

    fn unregister_guard(&self, guard: Guard) {
        let mut guards = self.guards.lock().unwrap_or_else(|e| e.into_inner());
        if guards.remove(&guard) {
            tracing::debug!(?guard, "guard removed");
        }
    }

    fn set_fullscreen(&self, on: bool) -> Result<(), HostError> {
        if self.fullscreen.swap(on, Ordering::Relaxed) != on {
            self.emit(HostEvent::Fullscreen(on));
        }
        Ok(())
    }

    fn redirect(&self, path: &str) {
        self.emit(HostEvent::Redirect(path.to_string()));
    }

    fn show_warning(&self, message: &str) {
        self.emit(HostEvent::Warning(message.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_forwarded() {
        let (host, mut rx) = ShellHost::new();
        host.set_fullscreen(true).unwrap();
        host.set_fullscreen(true).unwrap();
        host.redirect("/kiosk/class/5");
        host.show_warning("locked");

        assert_eq!(rx.try_recv().unwrap(), HostEvent::Fullscreen(true));
        assert_eq!(rx.try_recv().unwrap(), HostEvent::Redirect("/kiosk/class/5".into()));
        assert_eq!(rx.try_recv().unwrap(), HostEvent::Warning("locked".into()));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_send_without_listener_is_quiet() {
        let (host, rx) = ShellHost::new();
        drop(rx);
        host.redirect("/kiosk");
        host.register_guard(Guard::ContextMenu).unwrap();
        host.unregister_guard(Guard::ContextMenu);
    }
}
