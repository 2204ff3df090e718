use chrono::{DateTime, Datelike, Days, Duration, NaiveDate, NaiveTime, Timelike, Utc};

use crate::errors::{SecronError, SecronResult};

use super::parser::parse_fields;

/// 向后搜索的上限：超过366天视为表达式无解（如2月30日）
const MAX_SEARCH_DAYS: u64 = 366;

/// 解析后的Cron表达式，每个字段为排序去重的允许值集合
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    second: Vec<i64>,
    minute: Vec<i64>,
    hour: Vec<i64>,
    day: Vec<i64>,
    month: Vec<i64>,
    weekday: Vec<i64>,
    /// 仅7字段表达式存在；6字段表达式年份不受约束
    year: Option<Vec<i64>>,
}

impl CronSchedule {
    /// 解析Cron表达式（6或7个字段）
    pub fn parse(expression: &str) -> SecronResult<Self> {
        let mut fields = parse_fields(expression)?;
        let year = if fields.len() == 7 { fields.pop() } else { None };

        // parse_fields保证此处恰好剩余6个字段
        let weekday = fields.pop().unwrap_or_default();
        let month = fields.pop().unwrap_or_default();
        let day = fields.pop().unwrap_or_default();
        let hour = fields.pop().unwrap_or_default();
        let minute = fields.pop().unwrap_or_default();
        let second = fields.pop().unwrap_or_default();

        Ok(Self {
            expression: expression.trim().to_string(),
            second,
            minute,
            hour,
            day,
            month,
            weekday,
            year,
        })
    }

    /// 原始表达式
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// 检查给定时刻是否命中全部字段约束
    pub fn matches(&self, t: DateTime<Utc>) -> bool {
        self.matches_date(t.date_naive())
            && self.second.binary_search(&(t.second() as i64)).is_ok()
            && self.minute.binary_search(&(t.minute() as i64)).is_ok()
            && self.hour.binary_search(&(t.hour() as i64)).is_ok()
    }

    fn matches_date(&self, date: NaiveDate) -> bool {
        if let Some(years) = &self.year {
            if years.binary_search(&(date.year() as i64)).is_err() {
                return false;
            }
        }
        self.day.binary_search(&(date.day() as i64)).is_ok()
            && self.month.binary_search(&(date.month() as i64)).is_ok()
            && self
                .weekday
                .binary_search(&(date.weekday().num_days_from_sunday() as i64))
                .is_ok()
    }

    /// 计算严格晚于base的第一个匹配时刻
    ///
    /// 按天跳跃搜索，日内在允许的时分秒集合上取最小组合，
    /// 与逐秒扫描等价但避免了对病态表达式的千万次迭代。
    pub fn next_after(&self, base: DateTime<Utc>) -> SecronResult<DateTime<Utc>> {
        let start = base + Duration::seconds(1);
        let start_date = start.date_naive();

        for offset in 0..=MAX_SEARCH_DAYS {
            let date = start_date
                .checked_add_days(Days::new(offset))
                .ok_or_else(|| SecronError::NoMatchFound {
                    expr: self.expression.clone(),
                })?;
            if !self.matches_date(date) {
                continue;
            }

            // 起始日从start的时分秒开始，之后的日期从零点开始
            let bound = if offset == 0 {
                start.time()
            } else {
                NaiveTime::MIN
            };
            if let Some(time) = self.first_time_at_or_after(bound) {
                return Ok(date.and_time(time).and_utc());
            }
        }

        Err(SecronError::NoMatchFound {
            expr: self.expression.clone(),
        })
    }

    /// 在允许的时分秒集合中找到不早于bound的最小时刻
    fn first_time_at_or_after(&self, bound: NaiveTime) -> Option<NaiveTime> {
        let (bh, bm, bs) = (
            bound.hour() as i64,
            bound.minute() as i64,
            bound.second() as i64,
        );

        for &h in self.hour.iter().filter(|&&h| h >= bh) {
            let min_bound = if h == bh { bm } else { 0 };
            for &m in self.minute.iter().filter(|&&m| m >= min_bound) {
                let sec_bound = if h == bh && m == bm { bs } else { 0 };
                if let Some(&s) = self.second.iter().find(|&&s| s >= sec_bound) {
                    return NaiveTime::from_hms_opt(h as u32, m as u32, s as u32);
                }
            }
        }
        None
    }

    /// 获取从base开始的后续count次执行时间
    pub fn upcoming(&self, base: DateTime<Utc>, count: usize) -> SecronResult<Vec<DateTime<Utc>>> {
        let mut times = Vec::with_capacity(count);
        let mut cursor = base;
        for _ in 0..count {
            cursor = self.next_after(cursor)?;
            times.push(cursor);
        }
        Ok(times)
    }
}

/// 便捷函数：计算表达式在base之后的下一次执行时间
pub fn next_run_time(expression: &str, base: DateTime<Utc>) -> SecronResult<DateTime<Utc>> {
    CronSchedule::parse(expression)?.next_after(base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn test_every_five_minutes() {
        let schedule = CronSchedule::parse("0 */5 * * * *").unwrap();
        let next = schedule.next_after(at(2024, 1, 1, 0, 0, 0)).unwrap();
        assert_eq!(next, at(2024, 1, 1, 0, 5, 0));
    }

    #[test]
    fn test_strictly_after_base() {
        // base本身命中时必须返回下一个匹配点
        let schedule = CronSchedule::parse("0 0 * * * *").unwrap();
        let next = schedule.next_after(at(2024, 1, 1, 12, 0, 0)).unwrap();
        assert_eq!(next, at(2024, 1, 1, 13, 0, 0));
    }

    #[test]
    fn test_every_second() {
        let schedule = CronSchedule::parse("* * * * * *").unwrap();
        let next = schedule.next_after(at(2024, 1, 1, 0, 0, 0)).unwrap();
        assert_eq!(next, at(2024, 1, 1, 0, 0, 1));
    }

    #[test]
    fn test_minimality() {
        // 结果之前的任何时刻都不应命中
        let schedule = CronSchedule::parse("30 15 3 * * *").unwrap();
        let base = at(2024, 6, 1, 3, 15, 30);
        let next = schedule.next_after(base).unwrap();
        assert_eq!(next, at(2024, 6, 2, 3, 15, 30));
        assert!(next > base);
        let mut probe = base + Duration::seconds(1);
        let mut count = 0;
        while probe < next {
            assert!(!schedule.matches(probe));
            // 大步长抽样加上边界逐秒校验太慢，按小时抽查即可
            probe += Duration::hours(1);
            count += 1;
        }
        assert!(count > 0);
    }

    #[test]
    fn test_crosses_day_boundary() {
        let schedule = CronSchedule::parse("0 30 8 * * *").unwrap();
        let next = schedule.next_after(at(2024, 1, 1, 9, 0, 0)).unwrap();
        assert_eq!(next, at(2024, 1, 2, 8, 30, 0));
    }

    #[test]
    fn test_weekday_intersection() {
        // 日与周字段是交集语义：1号且周一
        let schedule = CronSchedule::parse("0 0 0 1 * 1 ").unwrap();
        let next = schedule.next_after(at(2024, 1, 2, 0, 0, 0)).unwrap();
        // 2024-01-01是周一，已过；下一个1号周一是2024-04-01
        assert_eq!(next, at(2024, 4, 1, 0, 0, 0));
    }

    #[test]
    fn test_month_names() {
        let schedule = CronSchedule::parse("0 0 12 1 FEB *").unwrap();
        let next = schedule.next_after(at(2024, 1, 1, 0, 0, 0)).unwrap();
        assert_eq!(next, at(2024, 2, 1, 12, 0, 0));
    }

    #[test]
    fn test_seven_field_year() {
        let schedule = CronSchedule::parse("0 0 0 1 1 * 2026").unwrap();
        let next = schedule.next_after(at(2025, 6, 1, 0, 0, 0)).unwrap();
        assert_eq!(next, at(2026, 1, 1, 0, 0, 0));
    }

    #[test]
    fn test_no_match_found() {
        // 2月30日不存在
        let schedule = CronSchedule::parse("0 0 0 30 2 *").unwrap();
        let err = schedule.next_after(at(2024, 1, 1, 0, 0, 0)).unwrap_err();
        assert!(matches!(err, SecronError::NoMatchFound { .. }));
    }

    #[test]
    fn test_past_year_never_matches() {
        let schedule = CronSchedule::parse("0 0 0 * * * 2020").unwrap();
        assert!(schedule.next_after(at(2024, 1, 1, 0, 0, 0)).is_err());
    }

    #[test]
    fn test_upcoming() {
        let schedule = CronSchedule::parse("0 0 * * * *").unwrap();
        let times = schedule.upcoming(at(2024, 1, 1, 12, 30, 0), 3).unwrap();
        assert_eq!(
            times,
            vec![
                at(2024, 1, 1, 13, 0, 0),
                at(2024, 1, 1, 14, 0, 0),
                at(2024, 1, 1, 15, 0, 0),
            ]
        );
    }

    #[test]
    fn test_validate() {
        assert!(crate::cron::validate("0 */5 * * * *"));
        assert!(crate::cron::validate("0 0 9-17 * * 1-5"));
        assert!(crate::cron::validate("0 0 0 * * * 2030"));
        assert!(!crate::cron::validate("invalid"));
        assert!(!crate::cron::validate("* * * * *"));
        assert!(!crate::cron::validate(""));
    }
}
