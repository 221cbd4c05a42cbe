use crate::validation::{ConfigValidator, ValidationUtils};
use chrono::{FixedOffset, NaiveTime};
use serde::{Deserialize, Serialize};

/// 清理周期类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleType {
    Daily,
    TwoDays,
    Weekly,
    TwoWeeks,
    Monthly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    #[serde(rename = "type")]
    pub schedule_type: ScheduleType,
    /// "HH:MM"
    pub time_of_day: String,
    /// "UTC" 或固定偏移 "+08:00" / "-05:30"
    pub timezone: String,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            schedule_type: ScheduleType::Weekly,
            time_of_day: "00:00".to_string(),
            timezone: "UTC".to_string(),
        }
    }
}

impl ScheduleConfig {
    pub fn time(&self) -> crate::ConfigResult<NaiveTime> {
        NaiveTime::parse_from_str(self.time_of_day.trim(), "%H:%M").map_err(|e| {
            crate::ConfigError::Validation(format!(
                "schedule.time_of_day \"{}\" is not HH:MM: {e}",
                self.time_of_day
            ))
        })
    }

    pub fn offset(&self) -> crate::ConfigResult<FixedOffset> {
        let tz = self.timezone.trim();
        if tz.eq_ignore_ascii_case("utc") || tz.eq_ignore_ascii_case("z") {
            return FixedOffset::east_opt(0).ok_or_else(|| {
                crate::ConfigError::Validation("schedule.timezone is out of range".to_string())
            });
        }

        let invalid = || {
            crate::ConfigError::Validation(format!(
                "schedule.timezone \"{tz}\" must be UTC or an offset like +08:00"
            ))
        };

        let (sign, rest) = match tz.chars().next() {
            Some('+') => (1, &tz[1..]),
            Some('-') => (-1, &tz[1..]),
            _ => return Err(invalid()),
        };
        let (hours, minutes) = rest.split_once(':').ok_or_else(invalid)?;
        let hours: i32 = hours.parse().map_err(|_| invalid())?;
        let minutes: i32 = minutes.parse().map_err(|_| invalid())?;
        if hours > 14 || minutes > 59 {
            return Err(invalid());
        }

        FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)
    }
}

impl ConfigValidator for ScheduleConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_not_empty(&self.time_of_day, "schedule.time_of_day")?;
        self.time()?;
        self.offset()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_offsets() {
        let mut config = ScheduleConfig::default();
        assert_eq!(config.offset().unwrap().local_minus_utc(), 0);

        config.timezone = "+08:00".to_string();
        assert_eq!(config.offset().unwrap().local_minus_utc(), 8 * 3600);

        config.timezone = "-05:30".to_string();
        assert_eq!(config.offset().unwrap().local_minus_utc(), -(5 * 3600 + 30 * 60));

        config.timezone = "America/New_York".to_string();
        assert!(config.offset().is_err());
    }

    #[test]
    fn test_schedule_validation() {
        assert!(ScheduleConfig::default().validate().is_ok());

        let config = ScheduleConfig {
            time_of_day: "25:00".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_schedule_type_names() {
        let config: ScheduleConfig =
            toml::from_str("type = \"two_weeks\"\ntime_of_day = \"03:30\"").unwrap();
        assert_eq!(config.schedule_type, ScheduleType::TwoWeeks);
        assert_eq!(config.time().unwrap(), NaiveTime::from_hms_opt(3, 30, 0).unwrap());
        assert_eq!(config.timezone, "UTC");
    }
}
