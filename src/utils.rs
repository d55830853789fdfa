use std::time::{Duration, Instant};

/// Error type for polling operations
#[derive(Debug)]
pub enum PollError<E> {
    /// Condition never held before the deadline
    Timeout,
    /// Error occurred in the condition function
    ConditionError(E),
}

impl<E> std::fmt::Display for PollError<E>
where
    E: std::fmt::Display,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PollError::Timeout => write!(f, "Operation timed out"),
            PollError::ConditionError(e) => write!(f, "Condition error: {}", e),
        }
    }
}

impl<E> std::error::Error for PollError<E>
where
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PollError::Timeout => None,
            PollError::ConditionError(e) => Some(e),
        }
    }
}

/// Poll a condition until it holds or `timeout` elapses.
///
/// The condition is always evaluated at least once, so a zero timeout still
/// performs one check. Sleeps never overshoot the deadline.
///
/// # Returns
/// * `Ok(())` when condition returns `Ok(true)`
/// * `Err(PollError::Timeout)` when the deadline passes first
/// * `Err(PollError::ConditionError(e))` as soon as the condition fails
///
/// # Example
/// ```
/// use std::time::Duration;
/// use rusty_scope::utils::{poll_until, PollError};
///
/// let mut attempts = 0;
/// poll_until(
///     || {
///         attempts += 1;
///         Ok::<bool, &str>(attempts >= 3)
///     },
///     Duration::from_secs(1),
///     Duration::from_millis(1),
/// )?;
/// assert_eq!(attempts, 3);
/// # Ok::<(), PollError<&str>>(())
/// ```
pub fn poll_until<F, E>(
    mut condition: F,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<(), PollError<E>>
where
    F: FnMut() -> Result<bool, E>,
{
    let start = Instant::now();

    loop {
        match condition() {
            Ok(true) => return Ok(()),
            Ok(false) => {}
            Err(e) => return Err(PollError::ConditionError(e)),
        }

        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return Err(PollError::Timeout);
        }
        std::thread::sleep(poll_interval.min(timeout - elapsed));
    }
}

/// Format a value with an SI prefix, e.g. `0.0005` with unit `s` becomes `500.000 µs`.
pub fn format_si(value: f64, unit: &str) -> String {
    if !value.is_finite() {
        return format!("{value} {unit}");
    }

    const PREFIXES: [(f64, &str); 7] = [
        (1e9, "G"),
        (1e6, "M"),
        (1e3, "k"),
        (1.0, ""),
        (1e-3, "m"),
        (1e-6, "µ"),
        (1e-9, "n"),
    ];

    let magnitude = value.abs();
    let (scale, prefix) = PREFIXES
        .iter()
        .copied()
        .find(|(scale, _)| magnitude >= *scale)
        .unwrap_or((1e-12, "p"));

    if magnitude == 0.0 {
        return format!("0.000 {unit}");
    }
    format!("{:.3} {prefix}{unit}", value / scale)
}
