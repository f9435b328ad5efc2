use tracing::error;

/// Lifecycle collaborator told when the core subsystem is unrecoverable.
///
/// Typically this triggers a crash/restart of the remote processor, which in
/// turn tears the device down.
pub trait FaultReporter: Send + Sync {
    fn report_fatal_fault(&self, reason: &str);
}

/// Fault reporter that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogFaultReporter;

impl FaultReporter for LogFaultReporter {
    fn report_fatal_fault(&self, reason: &str) {
        error!(reason, "core subsystem reported as faulted");
    }
}
