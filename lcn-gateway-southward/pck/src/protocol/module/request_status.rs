use crate::protocol::error::{Error, Result};
use std::time::Duration;
use tokio::time::Instant;

/// Timeout, retry and refresh bookkeeping for one requested quantity.
///
/// A tracker is `pending` from [`on_request_sent`](Self::on_request_sent)
/// until [`on_response_received`](Self::on_response_received) or until its
/// retries are exhausted. Trackers with a `max_age` re-arm themselves to poll
/// the value periodically; the others are one-shot.
#[derive(Debug, Clone)]
pub struct RequestStatus {
    label: String,
    max_age: Option<Duration>,
    total_tries: u32,
    active: bool,
    pending_since: Option<Instant>,
    next_request_at: Option<Instant>,
    retries_left: u32,
}

impl RequestStatus {
    pub fn new(max_age: Option<Duration>, total_tries: u32, label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            max_age,
            total_tries: total_tries.max(1),
            active: false,
            pending_since: None,
            next_request_at: None,
            retries_left: 0,
        }
    }

    #[inline]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active
    }

    #[inline]
    pub fn is_pending(&self) -> bool {
        self.pending_since.is_some()
    }

    pub fn set_active(&mut self, active: bool) {
        if !active {
            self.reset();
        }
        self.active = active;
    }

    /// The outstanding request got no answer within `timeout`.
    pub fn is_timeout(&self, timeout: Duration, now: Instant) -> bool {
        self.pending_since
            .is_some_and(|since| now >= since + timeout)
    }

    /// Timed out with no retries left.
    pub fn is_failed(&self, timeout: Duration, now: Instant) -> bool {
        self.is_timeout(timeout, now) && self.retries_left == 0
    }

    pub fn reset(&mut self) {
        self.active = false;
        self.pending_since = None;
        self.next_request_at = None;
        self.retries_left = 0;
    }

    /// Arms the tracker to send right away with a fresh retry budget.
    pub fn refresh(&mut self, now: Instant) {
        self.active = true;
        self.pending_since = None;
        self.retries_left = 0;
        self.next_request_in(Duration::ZERO, now);
    }

    pub fn next_request_in(&mut self, delay: Duration, now: Instant) {
        self.active = true;
        self.next_request_at = Some(now + delay);
    }

    /// Decides whether the request has to be (re)sent now.
    ///
    /// Fails once the last try timed out. The tracker is then re-armed with a
    /// fresh retry budget, so the next call starts over.
    pub fn should_send_next_request(&mut self, timeout: Duration, now: Instant) -> Result<bool> {
        if !self.active {
            return Ok(false);
        }
        if self.pending_since.is_some() {
            if !self.is_timeout(timeout, now) {
                return Ok(false);
            }
            if self.retries_left > 0 {
                return Ok(true);
            }
            self.pending_since = None;
            self.retries_left = 0;
            self.next_request_at = Some(now);
            return Err(Error::ErrRequestFailed {
                label: self.label.clone(),
                tries: self.total_tries,
            });
        }
        Ok(self.next_request_at.is_some_and(|at| now >= at))
    }

    pub fn on_request_sent(&mut self, now: Instant) {
        self.active = true;
        if self.pending_since.is_none() {
            self.retries_left = self.total_tries - 1;
        } else if self.retries_left > 0 {
            self.retries_left -= 1;
        }
        self.pending_since = Some(now);
        self.next_request_at = self.max_age.map(|max_age| now + max_age);
    }

    pub fn on_response_received(&mut self, now: Instant) {
        if !self.active {
            return;
        }
        self.pending_since = None;
        self.retries_left = 0;
        self.next_request_at = self.max_age.map(|max_age| now + max_age);
    }
}
