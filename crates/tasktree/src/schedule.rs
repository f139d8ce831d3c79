//! Readiness sources for scheduled tasks
//!
//! The task core only needs to know when a task should next run. Anything
//! answering [`Schedule::next_run`] can be attached to a task, including
//! plain closures.

use chrono::{DateTime, Duration, Utc};

/// Answers "when should this next run"
pub trait Schedule: Send + Sync {
    /// Absolute time of the next run
    fn next_run(&self) -> DateTime<Utc>;

    /// Whether the next run is due at `now`
    fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_run() <= now
    }
}

impl<F> Schedule for F
where
    F: Fn() -> DateTime<Utc> + Send + Sync,
{
    fn next_run(&self) -> DateTime<Utc> {
        self()
    }
}

/// Run once at a fixed instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct At(pub DateTime<Utc>);

impl At {
    /// Due `delay` from now
    pub fn after(delay: std::time::Duration) -> Self {
        At(Utc::now() + to_chrono(delay))
    }
}

impl Schedule for At {
    fn next_run(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Recurring interval counted from an anchor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Every {
    interval: Duration,
    anchor: DateTime<Utc>,
}

impl Every {
    /// Every `interval`, anchored at creation time
    pub fn new(interval: Duration) -> Self {
        Self::starting(interval, Utc::now())
    }

    /// Every `interval`, anchored at `anchor`
    pub fn starting(interval: Duration, anchor: DateTime<Utc>) -> Self {
        Self { interval, anchor }
    }

    /// Every `n` seconds
    pub fn seconds(n: i64) -> Self {
        Self::new(Duration::seconds(n))
    }

    /// Every `n` minutes
    pub fn minutes(n: i64) -> Self {
        Self::new(Duration::minutes(n))
    }

    /// Every `n` hours
    pub fn hours(n: i64) -> Self {
        Self::new(Duration::hours(n))
    }

    /// Every `n` days
    pub fn days(n: i64) -> Self {
        Self::new(Duration::days(n))
    }

    /// Every `n` weeks
    pub fn weeks(n: i64) -> Self {
        Self::new(Duration::weeks(n))
    }

    /// Re-anchor the recurrence
    pub fn anchored_at(mut self, anchor: DateTime<Utc>) -> Self {
        self.anchor = anchor;
        self
    }

    /// The recurrence interval
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// First occurrence strictly after `t`
    pub fn occurrence_after(&self, t: DateTime<Utc>) -> DateTime<Utc> {
        if self.interval <= Duration::zero() {
            return self.anchor;
        }
        if t < self.anchor {
            return self.anchor + self.interval;
        }
        let step = self.interval.num_milliseconds().max(1);
        let elapsed = (t - self.anchor).num_milliseconds();
        let periods = elapsed / step + 1;
        self.anchor + Duration::milliseconds(periods * step)
    }
}

impl Schedule for Every {
    /// The first occurrence after the anchor
    fn next_run(&self) -> DateTime<Utc> {
        self.anchor + self.interval
    }
}

fn to_chrono(duration: std::time::Duration) -> Duration {
    Duration::from_std(duration).unwrap_or_else(|_| Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_at_is_due() {
        let now = Utc::now();
        let schedule = At(now - Duration::seconds(1));
        assert!(schedule.is_due(now));

        let schedule = At(now + Duration::seconds(10));
        assert!(!schedule.is_due(now));
        assert_eq!(schedule.next_run(), now + Duration::seconds(10));
    }

    #[test]
    fn test_at_after() {
        let schedule = At::after(std::time::Duration::from_secs(60));
        assert!(!schedule.is_due(Utc::now()));
        assert!(schedule.is_due(Utc::now() + Duration::seconds(61)));
    }

    #[test]
    fn test_closure_schedule() {
        let fixed = Utc::now() - Duration::minutes(5);
        let schedule = move || fixed;
        assert_eq!(schedule.next_run(), fixed);
        assert!(schedule.is_due(Utc::now()));
    }

    #[test]
    fn test_every_next_run() {
        let anchor = Utc::now();
        let every = Every::seconds(10).anchored_at(anchor);
        assert_eq!(every.next_run(), anchor + Duration::seconds(10));
        assert_eq!(every.interval(), Duration::seconds(10));
        assert!(!every.is_due(anchor));
        assert!(every.is_due(anchor + Duration::seconds(10)));
    }

    #[test]
    fn test_every_occurrence_after() {
        let anchor = Utc::now();
        let every = Every::starting(Duration::minutes(1), anchor);

        assert_eq!(
            every.occurrence_after(anchor - Duration::hours(1)),
            anchor + Duration::minutes(1)
        );
        assert_eq!(every.occurrence_after(anchor), anchor + Duration::minutes(1));
        assert_eq!(
            every.occurrence_after(anchor + Duration::seconds(90)),
            anchor + Duration::minutes(2)
        );
        assert_eq!(
            every.occurrence_after(anchor + Duration::minutes(2)),
            anchor + Duration::minutes(3)
        );
    }

    #[test]
    fn test_every_units() {
        assert_eq!(Every::minutes(2).interval(), Duration::seconds(120));
        assert_eq!(Every::hours(1).interval(), Duration::minutes(60));
        assert_eq!(Every::days(1).interval(), Duration::hours(24));
        assert_eq!(Every::weeks(1).interval(), Duration::days(7));
    }
}
