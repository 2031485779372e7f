//! 定时表达式
//!
//! 简化的 cron 式调度：每个表达式绑定一个命名时区，
//! `next_occurrence` 给出下一次触发的绝对时刻

use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

/// 定时表达式
#[derive(Debug, Clone, Copy)]
pub enum ScheduleExpression {
    /// 每天在当地时间的固定时刻触发
    DailyAt(NaiveTime),
    /// 工作日（周一至周五）在当地时间的固定时刻触发
    WeekdaysAt(NaiveTime),
    /// 在 [from_hour, to_hour] 的小时区间内每隔 step_minutes 分钟触发
    EveryMinutesBetween {
        step_minutes: u32,
        from_hour: u32,
        to_hour: u32,
    },
}

impl ScheduleExpression {
    /// 严格晚于 `after` 的下一次触发时刻
    pub fn next_occurrence(&self, after: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
        let local_after = after.with_timezone(&tz);

        match self {
            ScheduleExpression::DailyAt(time) => {
                let mut date = local_after.date_naive();
                for _ in 0..4 {
                    if let Some(candidate) = localize(date.and_time(*time), tz) {
                        if candidate > after {
                            return Some(candidate);
                        }
                    }
                    date = date.succ_opt()?;
                }
                None
            }
            ScheduleExpression::WeekdaysAt(time) => {
                let mut date = local_after.date_naive();
                // 最多向前看 9 天即可跨过任何周末
                for _ in 0..9 {
                    if date.weekday().number_from_monday() <= 5 {
                        if let Some(candidate) = localize(date.and_time(*time), tz) {
                            if candidate > after {
                                return Some(candidate);
                            }
                        }
                    }
                    date = date.succ_opt()?;
                }
                None
            }
            ScheduleExpression::EveryMinutesBetween {
                step_minutes,
                from_hour,
                to_hour,
            } => {
                if *step_minutes == 0 {
                    return None;
                }
                // 逐个对齐的分钟边界向前扫描，直到落进小时窗口
                let mut candidate = after + Duration::minutes(1);
                candidate = candidate - Duration::seconds(candidate.timestamp() % 60);
                for _ in 0..(48 * 60) {
                    let local = candidate.with_timezone(&tz);
                    let in_window = local.time().hour() >= *from_hour && local.time().hour() <= *to_hour;
                    if in_window && local.time().minute() % step_minutes == 0 {
                        return Some(candidate);
                    }
                    candidate = candidate + Duration::minutes(1);
                }
                None
            }
        }
    }
}

/// 把时区本地时间转换为 UTC 时刻；夏令时跳变导致不存在时返回 None
fn localize(naive: chrono::NaiveDateTime, tz: Tz) -> Option<DateTime<Utc>> {
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use chrono_tz::Europe::Moscow;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn test_daily_at_same_day() {
        // 莫斯科 01:10 = UTC 22:10 前一天
        let expr = ScheduleExpression::DailyAt(NaiveTime::from_hms_opt(1, 10, 0).unwrap());
        // 莫斯科时间 2024-05-10 00:00
        let after = utc(2024, 5, 9, 21, 0);
        let next = expr.next_occurrence(after, Moscow).unwrap();
        assert_eq!(next, utc(2024, 5, 9, 22, 10));
    }

    #[test]
    fn test_daily_at_rolls_to_next_day() {
        let expr = ScheduleExpression::DailyAt(NaiveTime::from_hms_opt(1, 10, 0).unwrap());
        // 莫斯科时间 2024-05-10 02:00，已过当日触发点
        let after = utc(2024, 5, 9, 23, 0);
        let next = expr.next_occurrence(after, Moscow).unwrap();
        assert_eq!(next, utc(2024, 5, 10, 22, 10));
    }

    #[test]
    fn test_weekdays_skips_weekend() {
        let expr = ScheduleExpression::WeekdaysAt(NaiveTime::from_hms_opt(7, 1, 0).unwrap());
        // 2024-05-10 是周五；周五 08:00 莫斯科之后的下一次触发应该是周一
        let after = utc(2024, 5, 10, 5, 0);
        let next = expr.next_occurrence(after, Moscow).unwrap();
        let local_date = next.with_timezone(&Moscow).date_naive();
        assert_eq!(local_date, NaiveDate::from_ymd_opt(2024, 5, 13).unwrap());
    }

    #[test]
    fn test_every_minutes_within_window() {
        let expr = ScheduleExpression::EveryMinutesBetween {
            step_minutes: 30,
            from_hour: 2,
            to_hour: 23,
        };
        // 莫斯科时间 2024-05-10 10:05 → 下一次 10:30
        let after = utc(2024, 5, 10, 7, 5);
        let next = expr.next_occurrence(after, Moscow).unwrap();
        assert_eq!(next, utc(2024, 5, 10, 7, 30));
    }

    #[test]
    fn test_every_minutes_wraps_past_window() {
        let expr = ScheduleExpression::EveryMinutesBetween {
            step_minutes: 30,
            from_hour: 2,
            to_hour: 23,
        };
        // 莫斯科时间 2024-05-11 00:10（窗口之外）→ 下一次 02:00
        let after = utc(2024, 5, 10, 21, 10);
        let next = expr.next_occurrence(after, Moscow).unwrap();
        let local = next.with_timezone(&Moscow);
        assert_eq!(local.time(), NaiveTime::from_hms_opt(2, 0, 0).unwrap());
    }
}
