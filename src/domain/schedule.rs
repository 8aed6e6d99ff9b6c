//! Recurring backup schedule grammar.
//!
//! `disabled` | `hourly` | `daily@HH:MM` | `weekly@<day>@HH:MM`. Malformed
//! input never fails startup: it degrades to a safe default and the caller
//! logs why.

use std::fmt;

use chrono::{Datelike, Duration, NaiveDateTime, NaiveTime, Timelike, Weekday};

use super::config::ScheduleSetting;

/// Minute past the hour at which hourly backups fire.
pub const HOURLY_MINUTE: u32 = 0;

/// A parsed schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    Disabled,
    Hourly { minute: u32 },
    Daily { time: NaiveTime },
    Weekly { day: Weekday, time: NaiveTime },
}

/// Why parsing fell back to a default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleFallback {
    /// Weekday name not recognized; Monday used instead.
    UnknownWeekday(String),
    /// Whole string not recognized; `daily@03:00` used instead.
    Unparseable(String),
}

impl fmt::Display for ScheduleFallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownWeekday(day) => {
                write!(f, "unknown weekday '{day}', falling back to Monday")
            }
            Self::Unparseable(input) => {
                write!(f, "unrecognized schedule '{input}', falling back to daily@03:00")
            }
        }
    }
}

impl Schedule {
    /// The schedule used when the configured one cannot be understood.
    #[must_use]
    pub fn fallback() -> Self {
        Self::Daily {
            time: NaiveTime::from_hms_opt(3, 0, 0).unwrap_or_default(),
        }
    }

    /// Parse a configured value, logging any fallback.
    #[must_use]
    pub fn from_setting(setting: Option<&ScheduleSetting>) -> Self {
        let (schedule, fallback) = Self::parse_setting(setting);
        if let Some(reason) = fallback {
            tracing::warn!(%reason, "Schedule configuration degraded");
        }
        schedule
    }

    /// Parse a configured value, reporting any fallback to the caller.
    #[must_use]
    pub fn parse_setting(setting: Option<&ScheduleSetting>) -> (Self, Option<ScheduleFallback>) {
        match setting {
            None | Some(ScheduleSetting::Flag(false)) => (Self::Disabled, None),
            Some(ScheduleSetting::Flag(true)) => (
                Self::fallback(),
                Some(ScheduleFallback::Unparseable("true".into())),
            ),
            Some(ScheduleSetting::Text(text)) => Self::parse(text),
        }
    }

    /// Parse a schedule string.
    #[must_use]
    pub fn parse(input: &str) -> (Self, Option<ScheduleFallback>) {
        let trimmed = input.trim();
        let lowered = trimmed.to_ascii_lowercase();
        let parts: Vec<&str> = lowered.split('@').collect();

        let parsed = match parts.as_slice() {
            ["" | "disabled" | "false" | "off"] => Some((Self::Disabled, None)),
            ["hourly"] => Some((
                Self::Hourly {
                    minute: HOURLY_MINUTE,
                },
                None,
            )),
            ["daily", time] => parse_time(time).map(|time| (Self::Daily { time }, None)),
            ["weekly", day, time] if is_day_token(day) => parse_time(time).map(|time| {
                match day.parse::<Weekday>() {
                    Ok(day) => (Self::Weekly { day, time }, None),
                    Err(_) => (
                        Self::Weekly {
                            day: Weekday::Mon,
                            time,
                        },
                        Some(ScheduleFallback::UnknownWeekday((*day).to_string())),
                    ),
                }
            }),
            _ => None,
        };

        parsed.unwrap_or_else(|| {
            (
                Self::fallback(),
                Some(ScheduleFallback::Unparseable(trimmed.to_string())),
            )
        })
    }

    /// Next firing strictly after `now`, or `None` when disabled.
    #[must_use]
    pub fn next_after(&self, now: NaiveDateTime) -> Option<NaiveDateTime> {
        match *self {
            Self::Disabled => None,
            Self::Hourly { minute } => {
                let candidate = now
                    .with_minute(minute)?
                    .with_second(0)?
                    .with_nanosecond(0)?;
                Some(if candidate > now {
                    candidate
                } else {
                    candidate + Duration::hours(1)
                })
            }
            Self::Daily { time } => {
                let candidate = now.date().and_time(time);
                Some(if candidate > now {
                    candidate
                } else {
                    candidate + Duration::days(1)
                })
            }
            Self::Weekly { day, time } => {
                let ahead = (i64::from(day.num_days_from_monday())
                    - i64::from(now.weekday().num_days_from_monday()))
                .rem_euclid(7);
                let candidate = (now.date() + Duration::days(ahead)).and_time(time);
                Some(if candidate > now {
                    candidate
                } else {
                    candidate + Duration::days(7)
                })
            }
        }
    }

    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        !matches!(self, Self::Disabled)
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => write!(f, "disabled"),
            Self::Hourly { minute } => write!(f, "hourly (at :{minute:02})"),
            Self::Daily { time } => write!(f, "daily@{}", time.format("%H:%M")),
            Self::Weekly { day, time } => write!(
                f,
                "weekly@{}@{}",
                day.to_string().to_lowercase(),
                time.format("%H:%M")
            ),
        }
    }
}

fn is_day_token(token: &str) -> bool {
    !token.is_empty() && token.chars().all(|c| c.is_ascii_alphabetic())
}

fn parse_time(text: &str) -> Option<NaiveTime> {
    let (hour, minute) = text.split_once(':')?;
    if hour.len() != 2 || minute.len() != 2 {
        return None;
    }
    NaiveTime::parse_from_str(text, "%H:%M").ok()
}
