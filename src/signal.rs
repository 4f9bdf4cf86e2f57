//! Process signals that stop the backend.
//!
//! Ctrl-C stops it everywhere; on Unix, SIGTERM and SIGHUP do as well.
//! In-flight requests complete before the process exits.

use std::{fmt, io};

#[cfg(unix)]
use tokio::signal::unix::{signal, Signal, SignalKind};

use crate::error::{Error, Result};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum StopSignal {
    CtrlC,
    Term,
    Hup,
}

impl fmt::Display for StopSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::CtrlC => "Ctrl+C",
            Self::Term => "SIGTERM",
            Self::Hup => "SIGHUP",
        })
    }
}

/// Registered signal streams. Register early: a signal that arrives before
/// registration terminates the process the default way.
pub struct Signals {
    #[cfg(unix)]
    term: Signal,
    #[cfg(unix)]
    hup: Signal,
}

impl Signals {
    /// # Errors
    ///
    /// Returns `Internal` if the operating system refuses the registration.
    #[cfg(unix)]
    pub fn register() -> Result<Self> {
        let term = signal(SignalKind::terminate()).map_err(refused)?;
        let hup = signal(SignalKind::hangup()).map_err(refused)?;
        Ok(Self { term, hup })
    }

    /// # Errors
    ///
    /// Never fails on this platform.
    #[cfg(not(unix))]
    pub fn register() -> Result<Self> {
        Ok(Self {})
    }

    #[cfg(unix)]
    pub async fn next(&mut self) -> StopSignal {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => StopSignal::CtrlC,
            _ = self.term.recv() => StopSignal::Term,
            _ = self.hup.recv() => StopSignal::Hup,
        }
    }

    #[cfg(not(unix))]
    pub async fn next(&mut self) -> StopSignal {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("cannot listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
        StopSignal::CtrlC
    }

    /// Resolves at the first signal. Pass it to
    /// [`server::serve`](crate::server::serve) as the shutdown future.
    pub async fn stopped(mut self) {
        let signal = self.next().await;
        info!("received {signal}, shutting down gracefully");
    }
}

#[cfg_attr(not(unix), allow(dead_code))]
fn refused(e: io::Error) -> Error {
    Error::internal(format!("cannot register signal handler: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn refused_registration_is_internal() {
        let e = refused(io::Error::other("no signal driver"));
        assert_eq!(e.kind, ErrorKind::Internal);
        assert!(e.to_string().contains("no signal driver"));
    }

    #[tokio::test]
    async fn registers_inside_runtime() {
        assert!(Signals::register().is_ok());
    }
}
