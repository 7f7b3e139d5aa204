//! Kiosk lockdown: keeps an unattended station on the kiosk screen.
//!
//! The host platform (browser shell, compositor, ...) exposes a
//! [`NavigationHost`]. The controller installs the whole guard set or none
//! of it, and only an accepted exit credential tears it down.

use crate::flags::{FlagStore, StoreError, KIOSK_MODE_KEY};
use crate::routes::{is_kiosk_path, KIOSK_ROOT};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use thiserror::Error;

pub const LOCKDOWN_WARNING: &str = "Navigation is disabled while the kiosk is locked.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Guard {
    ContextMenu,
    KeyboardShortcuts,
    HistoryNavigation,
    BeforeUnload,
}

pub const ALL_GUARDS: [Guard; 4] = [
    Guard::ContextMenu,
    Guard::KeyboardShortcuts,
    Guard::HistoryNavigation,
    Guard::BeforeUnload,
];

#[derive(Error, Debug)]
pub enum HostError {
    #[error("unsupported by host: {0}")]
    Unsupported(String),
    #[error("host rejected request: {0}")]
    Rejected(String),
}

#[derive(Error, Debug)]
pub enum LockdownError {
    #[error("failed to install {guard:?} guard: {source}")]
    Guard {
        guard: Guard,
        #[source]
        source: HostError,
    },
    #[error("flag store: {0}")]
    Store(#[from] StoreError),
}

/// Navigation interception capability provided by the host platform.
pub trait NavigationHost: Send + Sync {
    fn register_guard(&self, guard: Guard) -> Result<(), HostError>;
    fn unregister_guard(&self, guard: Guard);
    fn set_fullscreen(&self, on: bool) -> Result<(), HostError>;
    fn redirect(&self, path: &str);
    fn show_warning(&self, message: &str);
}

/// Decides whether a supplied exit credential unlocks the kiosk.
pub trait ExitCredential: Send + Sync {
    fn accepts(&self, supplied: &str) -> bool;
}

/// Accepts a secret whose SHA-256 matches the configured digest.
pub struct DigestCredential {
    digest: [u8; 32],
}

impl DigestCredential {
    pub fn from_secret(secret: &str) -> Self {
        Self {
            digest: Sha256::digest(secret.as_bytes()).into(),
        }
    }

    /// Parse a 64-character hex digest.
    pub fn from_hex(hex: &str) -> Option<Self> {
        let hex = hex.trim();
        if hex.len() != 64 || !hex.is_ascii() {
            return None;
        }
        let mut digest = [0u8; 32];
        for (i, byte) in digest.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).ok()?;
        }
        Some(Self { digest })
    }
}

impl ExitCredential for DigestCredential {
    fn accepts(&self, supplied: &str) -> bool {
        let candidate: [u8; 32] = Sha256::digest(supplied.as_bytes()).into();
        // Constant-time: always compare every byte.
        candidate
            .iter()
            .zip(self.digest.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

/// Used when no exit credential is configured; the kiosk can only be
/// unlocked by restarting the daemon with one.
pub struct DenyAll;

impl ExitCredential for DenyAll {
    fn accepts(&self, _supplied: &str) -> bool {
        false
    }
}

/// A navigation the host is about to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationAttempt {
    /// Direct navigation to a path.
    Path(String),
    /// Back/forward through history.
    History,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", content = "path", rename_all = "snake_case")]
pub enum NavigationDecision {
    Allow,
    Redirect(String),
}

/// A keyboard chord, e.g. `ctrl+shift+i` or `alt+left`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyCombo {
    pub ctrl: bool,
    pub alt: bool,
    pub shift: bool,
    pub meta: bool,
    pub key: String,
}

impl FromStr for KeyCombo {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut combo = KeyCombo::default();
        for part in s.split('+').map(|p| p.trim().to_lowercase()) {
            match part.as_str() {
                "ctrl" | "control" => combo.ctrl = true,
                "alt" | "option" => combo.alt = true,
                "shift" => combo.shift = true,
                "meta" | "cmd" | "super" => combo.meta = true,
                "" => return Err(format!("empty key in {s:?}")),
                key => {
                    if !combo.key.is_empty() {
                        return Err(format!("more than one key in {s:?}"));
                    }
                    combo.key = key.to_string();
                }
            }
        }
        if combo.key.is_empty() {
            return Err(format!("no key in {s:?}"));
        }
        Ok(combo)
    }
}

impl KeyCombo {
    /// Browser shortcuts that reload, close, open or leave the page.
    pub fn is_navigation_shortcut(&self) -> bool {
        let key = self.key.as_str();
        let command = self.ctrl || self.meta;
        match key {
            "f5" | "f11" | "f12" | "escape" | "esc" | "browserback" | "browserforward" => true,
            "backspace" => !command,
            "left" | "right" | "arrowleft" | "arrowright" => self.alt,
            "r" | "w" | "t" | "n" | "l" | "q" | "h" | "j" => command,
            "i" | "c" if command && self.shift => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LockdownState {
    pub locked: bool,
    pub guards: Vec<Guard>,
    pub fullscreen: bool,
    pub home: String,
}

struct Installed {
    guards: Vec<Guard>,
    fullscreen: bool,
    home: String,
}

pub struct LockdownController {
    host: Arc<dyn NavigationHost>,
    flags: Arc<dyn FlagStore>,
    credential: Arc<dyn ExitCredential>,
    installed: Mutex<Installed>,
}

impl LockdownController {
    pub fn new(
        host: Arc<dyn NavigationHost>,
        flags: Arc<dyn FlagStore>,
        credential: Arc<dyn ExitCredential>,
    ) -> Self {
        Self {
            host,
            flags,
            credential,
            installed: Mutex::new(Installed {
                guards: Vec::new(),
                fullscreen: false,
                home: KIOSK_ROOT.to_string(),
            }),
        }
    }

    /// Persisted kiosk-mode flag.
    pub fn is_locked(&self) -> bool {
        self.flags.get(KIOSK_MODE_KEY).as_deref() == Some("true")
    }

    /// Enter kiosk mode: flag, fullscreen, and every guard.
    ///
    /// If any guard fails to install, everything done so far is undone.
    pub fn enable(&self) -> Result<(), LockdownError> {
        let mut st = self.lock();
        if self.is_locked() && st.guards.len() == ALL_GUARDS.len() {
            return Ok(());
        }

        self.flags.set(KIOSK_MODE_KEY, "true")?;

        match self.host.set_fullscreen(true) {
            Ok(()) => st.fullscreen = true,
            // Hosts may refuse fullscreen without a user gesture; the guards still hold.
            Err(e) => tracing::warn!(error = %e, "fullscreen request refused"),
        }

        for guard in ALL_GUARDS {
            if st.guards.contains(&guard) {
                continue;
            }
            if let Err(source) = self.host.register_guard(guard) {
                tracing::error!(?guard, error = %source, "guard install failed, rolling back lockdown");
                self.teardown(&mut st);
                if let Err(e) = self.flags.remove(KIOSK_MODE_KEY) {
                    tracing::error!(error = %e, "failed to clear kiosk flag during rollback");
                }
                return Err(LockdownError::Guard { guard, source });
            }
            st.guards.push(guard);
        }

        tracing::info!(home = %st.home, "kiosk lockdown enabled");
        Ok(())
    }

    /// Leave kiosk mode if the credential is accepted.
    ///
    /// Returns false for a wrong credential, leaving lockdown untouched.
    pub fn disable(&self, credential: &str) -> bool {
        if !self.credential.accepts(credential) {
            tracing::warn!("kiosk exit refused: invalid credential");
            return false;
        }

        let mut st = self.lock();
        // Clear the flag first so a store failure leaves the full lockdown in place.
        if let Err(e) = self.flags.remove(KIOSK_MODE_KEY) {
            tracing::error!(error = %e, "failed to clear kiosk flag; lockdown kept");
            return false;
        }
        self.teardown(&mut st);
        tracing::info!("kiosk lockdown disabled");
        true
    }

    /// Re-apply lockdown after a restart when the flag survived.
    pub fn restore(&self) -> Result<bool, LockdownError> {
        if !self.is_locked() {
            return Ok(false);
        }
        self.enable()?;
        Ok(true)
    }

    /// Kiosk path to send blocked navigations back to.
    pub fn set_home(&self, path: &str) {
        self.lock().home = path.to_string();
    }

    pub fn state(&self) -> LockdownState {
        let st = self.lock();
        LockdownState {
            locked: self.is_locked(),
            guards: st.guards.clone(),
            fullscreen: st.fullscreen,
            home: st.home.clone(),
        }
    }

    pub fn on_navigation_attempt(&self, attempt: &NavigationAttempt) -> NavigationDecision {
        if !self.guarding(Guard::HistoryNavigation) {
            return NavigationDecision::Allow;
        }
        if let NavigationAttempt::Path(path) = attempt {
            if is_kiosk_path(path) {
                return NavigationDecision::Allow;
            }
        }

        let home = self.lock().home.clone();
        tracing::info!(?attempt, %home, "navigation blocked");
        self.host.redirect(&home);
        self.host.show_warning(LOCKDOWN_WARNING);
        NavigationDecision::Redirect(home)
    }

    /// Returns true when the key event must be swallowed.
    pub fn on_key_combo(&self, combo: &KeyCombo) -> bool {
        let blocked = self.guarding(Guard::KeyboardShortcuts) && combo.is_navigation_shortcut();
        if blocked {
            tracing::debug!(key = %combo.key, "shortcut blocked");
        }
        blocked
    }

    pub fn on_context_menu(&self) -> bool {
        self.guarding(Guard::ContextMenu)
    }

    /// Returns true when a close/reload must be blocked.
    pub fn on_before_unload(&self) -> bool {
        self.guarding(Guard::BeforeUnload)
    }

    fn guarding(&self, guard: Guard) -> bool {
        self.is_locked() && self.lock().guards.contains(&guard)
    }

    fn teardown(&self, st: &mut Installed) {
        for guard in st.guards.drain(..).rev() {
            self.host.unregister_guard(guard);
        }
        if st.fullscreen {
            if let Err(e) = self.host.set_fullscreen(false) {
                tracing::warn!(error = %e, "failed to exit fullscreen");
            }
            st.fullscreen = false;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Installed> {
        self.installed.lock().unwrap_or_else(|e| e.into_inner())
    }
}
