//! Bounded polling.
//!
//! [`poll`] evaluates a condition immediately and then once per interval
//! until it reports done, fails fatally, or the deadline passes. Transient
//! failures are logged and retried. Under dry-run exactly one evaluation
//! happens and the poll always succeeds.

use std::future::Future;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use crate::context::RunContext;
use crate::error::{Error, Result};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(15);
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(10 * 60);

/// Interval and overall deadline of a poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    pub deadline: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            deadline: DEFAULT_DEADLINE,
        }
    }
}

impl PollConfig {
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }
}

/// Why a condition is not satisfied.
#[derive(Debug)]
pub enum ConditionError {
    /// Not done yet; log and try again.
    Transient(Error),
    /// Give up immediately.
    Fatal(Error),
}

impl ConditionError {
    pub fn transient(e: impl Into<Error>) -> Self {
        Self::Transient(e.into())
    }

    pub fn fatal(e: impl Into<Error>) -> Self {
        Self::Fatal(e.into())
    }

    /// A transient "not yet" carrying a plain message.
    pub fn not_yet(msg: impl Into<String>) -> Self {
        Self::Transient(Error::Provider(msg.into()))
    }
}

impl From<Error> for ConditionError {
    fn from(e: Error) -> Self {
        Self::Transient(e)
    }
}

/// Outcome of one condition evaluation.
pub type ConditionResult = std::result::Result<bool, ConditionError>;

/// Poll `condition` until it returns `Ok(true)`.
///
/// # Errors
///
/// Returns [`Error::PollAborted`] when the condition fails fatally and
/// [`Error::PollTimeout`] when the deadline passes first.
pub async fn poll<F, Fut>(ctx: &RunContext, config: PollConfig, mut condition: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ConditionResult>,
{
    let dry_run = ctx.is_dry_run();
    let run = async {
        let mut ticker = tokio::time::interval(config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut attempt: u32 = 0;

        loop {
            ticker.tick().await;
            attempt += 1;

            let outcome = condition().await;
            trace!(attempt, ?outcome, "Poll round finished");

            if dry_run {
                if let Err(ConditionError::Fatal(e) | ConditionError::Transient(e)) = &outcome {
                    debug!(error = %e, "Ignoring condition error during dry-run");
                }
                info!("Dry-run: one poll round is enough, normally this would loop until the condition is met");
                return Ok(());
            }

            match outcome {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                Err(ConditionError::Transient(e)) => {
                    if attempt % 3 == 0 {
                        info!(attempt, reason = %e, "Polling continues");
                    } else {
                        debug!(attempt, reason = %e, "Polling continues");
                    }
                }
                Err(ConditionError::Fatal(e)) => {
                    warn!(attempt, error = %e, "Polling aborted");
                    return Err(Error::PollAborted(Box::new(e)));
                }
            }
        }
    };

    tokio::time::timeout(config.deadline, run)
        .await
        .unwrap_or(Err(Error::PollTimeout(config.deadline)))
}
