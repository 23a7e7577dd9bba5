// Shutdown delay inhibitor - holds the logind lock that gives this process a
// window to report the shutdown over MQTT before the host goes down.

use tracing::{debug, warn};
use zbus::zvariant::OwnedFd;

use super::login::LoginManagerProxy;

const INHIBIT_WHAT: &str = "shutdown";
const INHIBIT_MODE: &str = "delay";
const INHIBIT_WHY: &str = "Report shutdown via MQTT";
const APP_NAME: &str = env!("CARGO_PKG_NAME");

/// Owns the inhibitor file descriptor. Closing the fd releases the lock, so
/// the lock lives exactly as long as the wrapped fd.
struct InhibitorLock {
    fd: Option<OwnedFd>,
}

impl InhibitorLock {
    fn new(fd: OwnedFd) -> Self {
        Self { fd: Some(fd) }
    }

    fn is_held(&self) -> bool {
        self.fd.is_some()
    }

    /// Drops the fd. Safe to call more than once; only the first call closes.
    fn release(&mut self) -> bool {
        match self.fd.take() {
            Some(fd) => {
                drop(fd);
                true
            }
            None => false,
        }
    }
}

/// Lifecycle of the delay inhibitor across a shutdown sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Unacquired,
    Held,
    Released,
}

/// Acquires and holds the logind "delay" inhibitor. Held at most once; the
/// supervisor releases it either when `PrepareForShutdown(true)` arrives or
/// at orderly teardown, and may re-acquire only after a cancelled shutdown
/// ends the sequence.
pub struct ShutdownInhibitor {
    proxy: LoginManagerProxy<'static>,
    lock: Option<InhibitorLock>,
    state: State,
}

impl ShutdownInhibitor {
    pub fn new(proxy: LoginManagerProxy<'static>) -> Self {
        Self {
            proxy,
            lock: None,
            state: State::Unacquired,
        }
    }

    pub fn is_held(&self) -> bool {
        matches!(self.state, State::Held) && self.lock.as_ref().is_some_and(InhibitorLock::is_held)
    }

    /// Takes the delay lock. A no-op while already held, so a cancelled
    /// shutdown followed by re-acquire cannot stack fds.
    pub async fn acquire(&mut self) -> zbus::Result<()> {
        if self.is_held() {
            return Ok(());
        }
        let fd = self
            .proxy
            .inhibit(INHIBIT_WHAT, APP_NAME, INHIBIT_WHY, INHIBIT_MODE)
            .await?;
        self.lock = Some(InhibitorLock::new(fd));
        self.state = State::Held;
        debug!("acquired {INHIBIT_WHAT} inhibitor lock ({INHIBIT_MODE})");
        Ok(())
    }

    /// Closes the fd, letting the shutdown proceed. Idempotent.
    pub fn release(&mut self) {
        let closed = self.lock.as_mut().is_some_and(InhibitorLock::release);
        match self.state {
            State::Held => {
                self.state = State::Released;
                if closed {
                    debug!("released {INHIBIT_WHAT} inhibitor lock");
                } else {
                    warn!("inhibitor lock was already gone at release");
                }
            }
            State::Unacquired | State::Released => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::InhibitorLock;
    use std::fs::File;

    fn lock() -> InhibitorLock {
        let file = File::open("/dev/null").unwrap();
        let fd: std::os::fd::OwnedFd = file.into();
        InhibitorLock::new(fd.into())
    }

    #[test]
    fn release_closes_exactly_once() {
        let mut lock = lock();
        assert!(lock.is_held());
        assert!(lock.release());
        assert!(!lock.is_held());
        assert!(!lock.release());
    }
}
