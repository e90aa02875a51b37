//! Reporting sink for errors and trace messages.
//!
//! Handler failures never propagate to the mutation that triggered them; they
//! are handed to a `Reporter` instead. The default reporter forwards to
//! `tracing`, so the host application decides where the output goes.

use std::fmt;

use crate::error::StateNetError;

/// Receives isolated errors and trace messages.
pub trait Reporter: Send + Sync {
    /// Reports an error that was caught and isolated.
    fn error(&self, err: &StateNetError);

    /// Reports a trace message.
    fn trace(&self, message: &str);
}

/// Default reporter backed by `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn error(&self, err: &StateNetError) {
        tracing::error!(error = %err, "statenet error");
    }

    fn trace(&self, message: &str) {
        tracing::trace!(target: "statenet", "{message}");
    }
}

impl fmt::Debug for dyn Reporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Reporter")
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::Reporter;
    use crate::error::StateNetError;

    /// Collects reported errors for assertions.
    #[derive(Debug, Default)]
    pub struct CollectingReporter {
        pub errors: Mutex<Vec<String>>,
        pub traces: Mutex<Vec<String>>,
    }

    impl Reporter for CollectingReporter {
        fn error(&self, err: &StateNetError) {
            self.errors.lock().unwrap().push(err.to_string());
        }

        fn trace(&self, message: &str) {
            self.traces.lock().unwrap().push(message.to_string());
        }
    }
}
