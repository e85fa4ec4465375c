//! Orderly shutdown: drain the broker, then close transport endpoints.
//!
//! The coordinator moves `Running -> Draining -> Stopped`. Draining stops new
//! subscriptions before anything else happens, so no session created after
//! shutdown begins is ever Active. Endpoints close only after the broker has
//! drained, giving sessions that were Active a final flush.

use crate::broker::{Broker, DrainReport};
use crate::error::{CatalogError, Result};
use parking_lot::Mutex;
use std::net::{SocketAddr, TcpListener, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Coordinator lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Running,
    Draining,
    Stopped,
}

/// A transport listener closed at shutdown.
pub trait Endpoint: Send {
    fn name(&self) -> &str;
    fn close(&mut self) -> Result<()>;
}

/// A bound TCP listener. Closing drops the socket.
pub struct TcpEndpoint {
    name: String,
    listener: Option<TcpListener>,
}

impl TcpEndpoint {
    pub fn bind(name: impl Into<String>, addr: impl ToSocketAddrs) -> Result<Self> {
        let listener = TcpListener::bind(addr)?;
        Ok(Self {
            name: name.into(),
            listener: Some(listener),
        })
    }

    /// Bound address, or `None` once closed.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    pub fn listener(&self) -> Option<&TcpListener> {
        self.listener.as_ref()
    }
}

impl Endpoint for TcpEndpoint {
    fn name(&self) -> &str {
        &self.name
    }

    fn close(&mut self) -> Result<()> {
        self.listener.take();
        Ok(())
    }
}

/// What a shutdown did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub drain: DrainReport,
    /// Endpoints closed cleanly, in close order.
    pub closed_endpoints: Vec<String>,
    /// Endpoints whose close failed, with the error text.
    pub failed_endpoints: Vec<(String, String)>,
}

/// Drives the broker and endpoints through shutdown.
pub struct ShutdownCoordinator {
    broker: Broker,
    phase: Mutex<Phase>,
    endpoints: Mutex<Vec<Box<dyn Endpoint>>>,
    /// Held for the whole shutdown; holds the report once stopped.
    outcome: Mutex<Option<ShutdownReport>>,
}

impl ShutdownCoordinator {
    pub fn new(broker: Broker) -> Self {
        Self {
            broker,
            phase: Mutex::new(Phase::Running),
            endpoints: Mutex::new(Vec::new()),
            outcome: Mutex::new(None),
        }
    }

    pub fn phase(&self) -> Phase {
        *self.phase.lock()
    }

    /// Register an endpoint to close after the broker drains. Endpoints close
    /// in the order they were added.
    pub fn add_endpoint<E: Endpoint + 'static>(&self, endpoint: E) -> Result<()> {
        let phase = self.phase.lock();
        if *phase != Phase::Running {
            return Err(CatalogError::ShuttingDown);
        }
        self.endpoints.lock().push(Box::new(endpoint));
        Ok(())
    }

    /// Drain the broker, then close every endpoint.
    ///
    /// Endpoint failures are logged and reported but do not stop the rest
    /// from closing. Calling again after shutdown returns the first report.
    pub fn shutdown(&self) -> ShutdownReport {
        let mut outcome = self.outcome.lock();
        if let Some(report) = outcome.as_ref() {
            return report.clone();
        }

        *self.phase.lock() = Phase::Draining;
        tracing::info!("shutdown started");

        let mut report = ShutdownReport {
            drain: self.broker.drain(),
            ..Default::default()
        };

        let endpoints: Vec<Box<dyn Endpoint>> = self.endpoints.lock().drain(..).collect();
        for mut endpoint in endpoints {
            let name = endpoint.name().to_string();
            match endpoint.close() {
                Ok(()) => {
                    tracing::debug!(endpoint = %name, "endpoint closed");
                    report.closed_endpoints.push(name);
                }
                Err(e) => {
                    tracing::warn!(endpoint = %name, error = %e, "endpoint failed to close");
                    report.failed_endpoints.push((name, e.to_string()));
                }
            }
        }

        *self.phase.lock() = Phase::Stopped;
        tracing::info!(
            forced_sessions = report.drain.forced,
            endpoints = report.closed_endpoints.len(),
            "shutdown complete"
        );
        *outcome = Some(report.clone());
        report
    }

    /// Block until `signal` fires, then shut down.
    pub fn wait_for(&self, signal: &ShutdownSignal, poll: Duration) -> ShutdownReport {
        while !signal.is_triggered() {
            thread::sleep(poll);
        }
        tracing::info!("shutdown signal received");
        self.shutdown()
    }
}

/// Shutdown trigger shared between signal handlers and the main loop.
#[derive(Clone, Debug, Default)]
pub struct ShutdownSignal {
    flag: Arc<AtomicBool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire on SIGINT or SIGTERM.
    pub fn register_process_signals(&self) -> Result<()> {
        signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&self.flag))?;
        signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&self.flag))?;
        Ok(())
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
