//! 清理任务的下次执行时间

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc, Weekday};

use crawler_config::{ScheduleConfig, ScheduleType};
use crawler_errors::{CrawlerError, CrawlerResult};

/// 计算 `now` 之后的下一次执行时间
///
/// 所有日期计算在配置的时区内进行：
/// - `daily`: 严格晚于now的最近一次 time_of_day
/// - `two_days`: 上述时刻再加一天
/// - `weekly`: 严格晚于now、落在周日的 time_of_day
/// - `two_weeks`: 最近一次时刻再加十三天
/// - `monthly`: 严格晚于now、落在每月一日的 time_of_day
pub fn next_run(schedule: &ScheduleConfig, now: DateTime<Utc>) -> CrawlerResult<DateTime<Utc>> {
    let time = schedule
        .time()
        .map_err(|e| CrawlerError::InvalidSchedule(e.to_string()))?;
    let offset = schedule
        .offset()
        .map_err(|e| CrawlerError::InvalidSchedule(e.to_string()))?;

    let local_now = now.with_timezone(&offset);
    let at = |date: NaiveDate| -> CrawlerResult<DateTime<Utc>> {
        offset
            .from_local_datetime(&date.and_time(time))
            .single()
            .map(|dt| dt.with_timezone(&Utc))
            .ok_or_else(|| CrawlerError::InvalidSchedule(format!("无法构造时间: {date} {time}")))
    };

    let today = local_now.date_naive();
    let mut next_date = today;
    if at(today)? <= now {
        next_date = today + Duration::days(1);
    }

    let next_date = match schedule.schedule_type {
        ScheduleType::Daily => next_date,
        ScheduleType::TwoDays => next_date + Duration::days(1),
        ScheduleType::Weekly => {
            let mut date = next_date;
            while date.weekday() != Weekday::Sun {
                date += Duration::days(1);
            }
            date
        }
        ScheduleType::TwoWeeks => next_date + Duration::days(13),
        ScheduleType::Monthly => {
            if next_date.day() == 1 {
                next_date
            } else {
                first_of_next_month(next_date)?
            }
        }
    };

    at(next_date)
}

fn first_of_next_month(date: NaiveDate) -> CrawlerResult<NaiveDate> {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| CrawlerError::InvalidSchedule(format!("无效日期: {year}-{month}-01")))
}

/// 清理任务是否已到期，未设置时间视为未到期
pub fn is_due(next_run: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    next_run.map(|at| at <= now).unwrap_or(false)
}
