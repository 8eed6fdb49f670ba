//! Time-of-day greeting policy.

use crate::config::{ClockBasis, GreetingConfig};
use chrono::{DateTime, FixedOffset, Local, TimeZone, Timelike, Utc};
use tracing::warn;

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The machine's real clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock stopped at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl FixedClock {
    /// Today in UTC at `hour:00:00`; midnight if the hour is out of range.
    pub fn at_utc_hour(hour: u32) -> Self {
        let date = Utc::now().date_naive();
        let at = date
            .and_hms_opt(hour, 0, 0)
            .or_else(|| date.and_hms_opt(0, 0, 0))
            .map(|naive| Utc.from_utc_datetime(&naive))
            .unwrap_or_default();
        Self(at)
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Chooses the connect-time directive from the hour of day.
///
/// Hours before the start or after the end hour are off-hours; both
/// boundary hours are business hours.
#[derive(Debug, Clone)]
pub struct GreetingPolicy {
    name: String,
    start_hour: u32,
    end_hour: u32,
    clock: ClockBasis,
    prefer_channel_offset: bool,
    off_hours_directive: String,
    business_hours_directive: String,
    intro_template: String,
}

impl GreetingPolicy {
    pub fn new(config: &GreetingConfig, persona_name: &str) -> Self {
        Self {
            name: persona_name.to_owned(),
            start_hour: config.business_start_hour,
            end_hour: config.business_end_hour,
            clock: config.clock,
            prefer_channel_offset: config.prefer_channel_offset,
            off_hours_directive: config.off_hours_directive.clone(),
            business_hours_directive: config.business_hours_directive.clone(),
            intro_template: config.intro_template.clone(),
        }
    }

    pub fn is_off_hours(&self, hour: u32) -> bool {
        hour < self.start_hour || hour > self.end_hour
    }

    pub fn directive_for_hour(&self, hour: u32) -> &str {
        if self.is_off_hours(hour) {
            &self.off_hours_directive
        } else {
            &self.business_hours_directive
        }
    }

    /// Wall-clock hour at `now` for a channel.
    ///
    /// A channel-reported UTC offset wins when `prefer_channel_offset` is
    /// set; otherwise the configured clock basis applies.
    pub fn local_hour(&self, now: DateTime<Utc>, channel_offset_minutes: Option<i32>) -> u32 {
        let offset_minutes = match (channel_offset_minutes, self.prefer_channel_offset) {
            (Some(minutes), true) => Some(minutes),
            _ => match self.clock {
                ClockBasis::ServerLocal => None,
                ClockBasis::Utc => Some(0),
                ClockBasis::FixedOffset { minutes } => Some(minutes),
            },
        };
        let Some(minutes) = offset_minutes else {
            return now.with_timezone(&Local).hour();
        };
        match FixedOffset::east_opt(minutes.saturating_mul(60)) {
            Some(tz) => now.with_timezone(&tz).hour(),
            None => {
                warn!("UTC offset of {minutes} minutes is out of range, using UTC");
                now.hour()
            }
        }
    }

    /// Directive for a channel connecting at `now`.
    pub fn directive_at(&self, now: DateTime<Utc>, channel_offset_minutes: Option<i32>) -> &str {
        self.directive_for_hour(self.local_hour(now, channel_offset_minutes))
    }

    /// The system message that opens a session.
    pub fn render(&self, directive: &str) -> String {
        self.intro_template
            .replace("{name}", &self.name)
            .replace("{directive}", directive)
    }
}
