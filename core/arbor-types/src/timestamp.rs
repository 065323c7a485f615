//! Wall clocks and `now`-relative time expressions.
//!
//! Filters may compare a timestamp field against `now`, optionally shifted
//! (`now-5m`, `now+1h`). Expressions are resolved against a [`Clock`] at
//! evaluation time, never frozen at parse time.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

/// Source of wall-clock time in milliseconds since the Unix epoch.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current time in epoch milliseconds.
    fn now_millis(&self) -> i64;
}

/// The real system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// A clock that only moves when told to. Used by tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    /// Creates a clock frozen at `millis`.
    #[must_use]
    pub fn new(millis: i64) -> Self {
        Self {
            millis: AtomicI64::new(millis),
        }
    }

    /// Creates a clock frozen at the current system time.
    #[must_use]
    pub fn starting_now() -> Self {
        Self::new(SystemClock.now_millis())
    }

    /// Moves the clock forward by `delta` milliseconds.
    pub fn advance(&self, delta: i64) {
        self.millis.fetch_add(delta, Ordering::SeqCst);
    }

    /// Sets the clock to an absolute time.
    pub fn set(&self, millis: i64) {
        self.millis.store(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.millis.load(Ordering::SeqCst)
    }
}

/// A parsed `now[+-]<n><unit>` expression.
///
/// Supported units: `ms`, `s`, `m`, `h`, `d`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NowExpr {
    /// Signed offset from `now`, in milliseconds.
    offset_millis: i64,
}

impl NowExpr {
    /// Plain `now`.
    #[must_use]
    pub const fn now() -> Self {
        Self { offset_millis: 0 }
    }

    /// Returns whether `value` looks like a now-expression.
    #[must_use]
    pub fn is_now_expr(value: &str) -> bool {
        value.trim_start().starts_with("now")
    }

    /// Parses a now-expression.
    pub fn parse(value: &str) -> crate::Result<Self> {
        let invalid = || crate::Error::InvalidTimeExpr(value.to_string());
        let rest = value.trim().strip_prefix("now").ok_or_else(invalid)?;
        if rest.is_empty() {
            return Ok(Self::now());
        }

        let (sign, rest) = match rest.as_bytes()[0] {
            b'+' => (1, &rest[1..]),
            b'-' => (-1, &rest[1..]),
            _ => return Err(invalid()),
        };

        let digits_end = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        if digits_end == 0 {
            return Err(invalid());
        }
        let amount: i64 = rest[..digits_end].parse().map_err(|_| invalid())?;
        let unit = match &rest[digits_end..] {
            "ms" => 1,
            "s" => 1_000,
            "m" => 60_000,
            "h" => 3_600_000,
            "d" => 86_400_000,
            _ => return Err(invalid()),
        };

        Ok(Self {
            offset_millis: sign * amount * unit,
        })
    }

    /// Returns the offset from `now` in milliseconds.
    #[must_use]
    pub const fn offset_millis(&self) -> i64 {
        self.offset_millis
    }

    /// Resolves the expression against a clock.
    #[must_use]
    pub fn resolve(&self, clock: &dyn Clock) -> i64 {
        clock.now_millis() + self.offset_millis
    }
}

impl fmt::Display for NowExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.offset_millis {
            0 => f.write_str("now"),
            o if o > 0 => write!(f, "now+{o}ms"),
            o => write!(f, "now-{}ms", -o),
        }
    }
}
