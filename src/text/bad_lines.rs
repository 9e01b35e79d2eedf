use std::io::Write;

use tracing::warn;

use crate::config::BadLinePolicy;
use crate::error::{EngineError, EngineResult};

/// Tally of rejected input lines.
pub struct BadLines {
    policy: BadLinePolicy,
    count: u64,
    echo: Option<Box<dyn Write>>,
    source: String,
}

impl BadLines {
    pub fn new(policy: BadLinePolicy) -> Self {
        Self {
            policy,
            count: 0,
            echo: None,
            source: "-".to_string(),
        }
    }

    /// Copy every rejected line to `sink`.
    pub fn with_echo(mut self, sink: Box<dyn Write>) -> Self {
        self.echo = Some(sink);
        self
    }

    /// Name of the input used in warnings.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn policy(&self) -> BadLinePolicy {
        self.policy
    }

    /// Count a rejected line. Under [`BadLinePolicy::Abort`] the error is
    /// handed back to stop processing.
    pub fn reject(&mut self, line: usize, text: &str, error: EngineError) -> EngineResult<()> {
        self.count += 1;
        warn!(source = %self.source, line, %error, "rejected input line");
        if let Some(sink) = self.echo.as_mut() {
            writeln!(sink, "{text}")?;
        }
        match self.policy {
            BadLinePolicy::Abort => Err(error),
            BadLinePolicy::Skip => Ok(()),
        }
    }
}
