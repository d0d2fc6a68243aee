//! Error reporting for worker loops.
//!
//! Workers hand every error they cannot recover from locally to an
//! [`ExceptionReporter`] together with a context map (workflow or activity
//! type, execution ids, input). The default reporter logs through `tracing`;
//! [`FnExceptionReporter`] forwards to a closure, e.g. an error tracker client.

use std::backtrace::Backtrace;
use std::collections::BTreeMap;
use std::error::Error;

use tracing::error;

pub type ReportContext = BTreeMap<String, String>;

pub trait ExceptionReporter: Send + Sync {
    fn report(&self, error: &(dyn Error + 'static), context: &ReportContext);
}

pub const DEFAULT_TAG: &str = "taskchain";

/// Logs reported errors at `error` level under a fixed tag.
#[derive(Debug, Clone)]
pub struct DefaultExceptionReporter {
    tag: String,
}

impl DefaultExceptionReporter {
    pub fn with_tag(tag: impl Into<String>) -> Self {
        Self { tag: tag.into() }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }
}

impl Default for DefaultExceptionReporter {
    fn default() -> Self {
        Self::with_tag(DEFAULT_TAG)
    }
}

fn source_chain(error: &(dyn Error + 'static)) -> Vec<String> {
    let mut chain = Vec::new();
    let mut current = error.source();
    while let Some(cause) = current {
        chain.push(cause.to_string());
        current = cause.source();
    }
    chain
}

impl ExceptionReporter for DefaultExceptionReporter {
    fn report(&self, error: &(dyn Error + 'static), context: &ReportContext) {
        error!(
            target: "taskchain::runtime::reporter",
            tag = %self.tag,
            error = %error,
            kind = ?error,
            causes = ?source_chain(error),
            context = ?context,
            backtrace = %Backtrace::capture(),
            "[{}] worker error: {}",
            self.tag,
            error
        );
    }
}

/// Reporter backed by a closure.
pub struct FnExceptionReporter<F>(pub F)
where
    F: Fn(&(dyn Error + 'static), &ReportContext) + Send + Sync;

impl<F> ExceptionReporter for FnExceptionReporter<F>
where
    F: Fn(&(dyn Error + 'static), &ReportContext) + Send + Sync,
{
    fn report(&self, error: &(dyn Error + 'static), context: &ReportContext) {
        (self.0)(error, context)
    }
}
