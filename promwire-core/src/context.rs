//! Per-call deadline and cancellation
//!
//! Codecs are synchronous, so cancellation is cooperative: long running decode and
//! encode loops call [`CallContext::check`] at a fixed interval and stop with
//! `Cancelled` or `DeadlineExceeded` once the caller gives up.

use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::error::{CodecError, CodecResult};

/// Deadline and cancellation signal for one codec call
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    deadline: Option<Instant>,
    token: Option<CancellationToken>,
}

impl CallContext {
    /// A context that never expires
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = Some(token);
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn token(&self) -> Option<&CancellationToken> {
        self.token.as_ref()
    }

    /// Time left before the deadline, `None` without a deadline
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Fail if the call was cancelled or ran past its deadline.
    ///
    /// Cancellation wins when both apply.
    pub fn check(&self) -> CodecResult<()> {
        if self.token.as_ref().is_some_and(|t| t.is_cancelled()) {
            return Err(CodecError::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(CodecError::DeadlineExceeded);
        }
        Ok(())
    }

    pub fn is_done(&self) -> bool {
        self.check().is_err()
    }
}

/// Calls [`CallContext::check`] once every `interval` ticks
pub(crate) struct Checkpoint<'a> {
    ctx: &'a CallContext,
    interval: usize,
    count: usize,
}

impl<'a> Checkpoint<'a> {
    pub(crate) fn new(ctx: &'a CallContext, interval: usize) -> Self {
        Self {
            ctx,
            interval: interval.max(1),
            count: 0,
        }
    }

    #[inline]
    pub(crate) fn tick(&mut self) -> CodecResult<()> {
        self.count += 1;
        if self.count >= self.interval {
            self.count = 0;
            self.ctx.check()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_background_never_expires() {
        let ctx = CallContext::background();
        assert!(ctx.check().is_ok());
        assert!(ctx.remaining().is_none());
    }

    #[test]
    fn test_cancelled_token() {
        let token = CancellationToken::new();
        let ctx = CallContext::background().with_cancellation(token.clone());
        assert!(ctx.check().is_ok());

        token.cancel();
        assert!(matches!(ctx.check(), Err(CodecError::Cancelled)));
    }

    #[test]
    fn test_expired_deadline() {
        let ctx = CallContext::background().with_deadline(Instant::now() - Duration::from_millis(1));
        assert!(matches!(ctx.check(), Err(CodecError::DeadlineExceeded)));
        assert_eq!(ctx.remaining(), Some(Duration::ZERO));
    }

    #[test]
    fn test_cancellation_reported_before_deadline() {
        let token = CancellationToken::new();
        token.cancel();
        let ctx = CallContext::background()
            .with_deadline(Instant::now() - Duration::from_millis(1))
            .with_cancellation(token);
        assert!(matches!(ctx.check(), Err(CodecError::Cancelled)));
    }

    #[test]
    fn test_checkpoint_interval() {
        let token = CancellationToken::new();
        token.cancel();
        let ctx = CallContext::background().with_cancellation(token);

        let mut checkpoint = Checkpoint::new(&ctx, 3);
        assert!(checkpoint.tick().is_ok());
        assert!(checkpoint.tick().is_ok());
        assert!(checkpoint.tick().is_err());
    }
}
