//! Fault channel for integrity violations and unexpected build failures.
//!
//! Faults are reported, never silently fixed. Whether a fault is then
//! swallowed or escalated is decided by the caller based on severity.

use std::sync::Mutex;

use crate::error::Error;

/// How bad a fault is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FaultSeverity {
    /// Recoverable; editing continues.
    Diagnostic,
    /// Unexpected but contained to one operation.
    General,
    /// Terminates the current build attempt.
    Critical,
}

/// A reported fault.
#[derive(Debug, Clone)]
pub struct Fault {
    pub severity: FaultSeverity,
    /// Where the fault happened (operation and subject).
    pub context: String,
    pub error: Error,
}

impl Fault {
    pub fn new(severity: FaultSeverity, context: impl Into<String>, error: Error) -> Self {
        Self {
            severity,
            context: context.into(),
            error,
        }
    }
}

/// Sink for faults.
pub trait FaultReporter: Send + Sync {
    fn report(&self, fault: &Fault);
}

/// Default reporter: logs through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingFaultReporter;

impl FaultReporter for TracingFaultReporter {
    fn report(&self, fault: &Fault) {
        match fault.severity {
            FaultSeverity::Diagnostic => {
                tracing::warn!(context = %fault.context, error = %fault.error, "fault reported")
            }
            FaultSeverity::General | FaultSeverity::Critical => tracing::error!(
                severity = ?fault.severity,
                context = %fault.context,
                error = %fault.error,
                "fault reported"
            ),
        }
    }
}

/// Reporter that keeps every fault in memory. Useful in tests and tools.
#[derive(Debug, Default)]
pub struct RecordingFaultReporter {
    faults: Mutex<Vec<Fault>>,
}

impl RecordingFaultReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the faults reported so far.
    pub fn faults(&self) -> Vec<Fault> {
        self.faults
            .lock()
            .map(|faults| faults.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.faults.lock().map(|faults| faults.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FaultReporter for RecordingFaultReporter {
    fn report(&self, fault: &Fault) {
        TracingFaultReporter.report(fault);
        if let Ok(mut faults) = self.faults.lock() {
            faults.push(fault.clone());
        }
    }
}
