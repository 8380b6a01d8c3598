//! Wall-clock alarm that resumes the last played item.

use chrono::{NaiveDateTime, NaiveTime, Timelike};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AlarmError {
    #[error("invalid alarm time {0:?}, expected HH:MM")]
    InvalidTime(String),
}

#[derive(Debug, Default)]
pub struct AlarmClock {
    armed: Option<NaiveTime>,
}

impl AlarmClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(time: &str) -> Result<NaiveTime, AlarmError> {
        NaiveTime::parse_from_str(time.trim(), "%H:%M")
            .map_err(|_| AlarmError::InvalidTime(time.to_string()))
    }

    /// Arm for `time`, replacing any armed time.
    pub fn set(&mut self, time: &str) -> Result<NaiveTime, AlarmError> {
        let at = Self::parse(time)?;
        self.armed = Some(at);
        Ok(at)
    }

    pub fn cancel(&mut self) -> bool {
        self.armed.take().is_some()
    }

    pub fn armed(&self) -> Option<NaiveTime> {
        self.armed
    }

    /// `HH:MM` of the armed time, for display.
    pub fn label(&self) -> Option<String> {
        self.armed.map(|t| t.format("%H:%M").to_string())
    }

    /// True once, in the minute the alarm is set for.  Firing disarms.
    pub fn check(&mut self, now: NaiveDateTime) -> bool {
        let Some(at) = self.armed else {
            return false;
        };
        let t = now.time();
        if t.hour() == at.hour() && t.minute() == at.minute() {
            self.armed = None;
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn test_parse() {
        assert!(AlarmClock::parse("07:30").is_ok());
        assert!(AlarmClock::parse(" 23:59 ").is_ok());
        assert!(matches!(
            AlarmClock::parse("25:00"),
            Err(AlarmError::InvalidTime(_))
        ));
        assert!(AlarmClock::parse("7h30").is_err());
    }

    #[test]
    fn test_fires_once_in_its_minute() {
        let mut alarm = AlarmClock::new();
        alarm.set("07:30").unwrap();
        assert_eq!(alarm.label().as_deref(), Some("07:30"));
        assert!(!alarm.check(at(7, 29, 59)));
        assert!(alarm.check(at(7, 30, 1)));
        assert!(!alarm.check(at(7, 30, 2)));
        assert!(alarm.armed().is_none());
    }

    #[test]
    fn test_rearm_right_after_firing() {
        let mut alarm = AlarmClock::new();
        alarm.set("07:30").unwrap();
        assert!(alarm.check(at(7, 30, 0)));
        alarm.set("08:00").unwrap();
        assert_eq!(alarm.label().as_deref(), Some("08:00"));
        assert!(!alarm.check(at(7, 30, 20)));
        assert!(alarm.check(at(8, 0, 5)));
    }

    #[test]
    fn test_cancel() {
        let mut alarm = AlarmClock::new();
        assert!(!alarm.cancel());
        alarm.set("06:00").unwrap();
        assert!(alarm.cancel());
        assert!(!alarm.check(at(6, 0, 0)));
    }
}
