//! 时钟
//!
//! 免打扰判断依赖"本地时间"，时钟通过 trait 注入，测试中可固定在任意时刻。

use chrono::{DateTime, FixedOffset, Local, NaiveDate, TimeZone, Timelike, Utc};

pub const MINUTES_PER_DAY: u32 = 24 * 60;

#[cfg_attr(test, mockall::automock)]
pub trait Clock: Send + Sync {
    /// 当前本地时间（带偏移）
    fn now(&self) -> DateTime<FixedOffset>;
}

/// 本地时间距午夜的分钟数
pub fn minutes_since_midnight(at: &DateTime<FixedOffset>) -> u32 {
    at.hour() * 60 + at.minute()
}

/// 系统时钟
///
/// 默认取宿主机时区；配置了 UTC 偏移时按该偏移换算，便于部署在 UTC 主机上的实例
/// 按业务所在时区计算免打扰。
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock {
    offset: Option<FixedOffset>,
}

impl SystemClock {
    pub fn local() -> Self {
        Self { offset: None }
    }

    /// 偏移超出 ±24 小时时返回 None
    pub fn with_utc_offset_minutes(minutes: i32) -> Option<Self> {
        let offset = FixedOffset::east_opt(minutes.checked_mul(60)?)?;
        Some(Self {
            offset: Some(offset),
        })
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<FixedOffset> {
        match self.offset {
            Some(offset) => Utc::now().with_timezone(&offset),
            None => Local::now().fixed_offset(),
        }
    }
}

/// 固定时钟，始终返回同一时刻
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(DateTime<FixedOffset>);

impl FixedClock {
    pub fn new(at: DateTime<FixedOffset>) -> Self {
        Self(at)
    }

    /// 固定在某一天（UTC）的 hour:minute
    pub fn at(hour: u32, minute: u32) -> Option<Self> {
        let naive = NaiveDate::from_ymd_opt(2024, 6, 1)?.and_hms_opt(hour, minute, 0)?;
        let offset = FixedOffset::east_opt(0)?;
        let at = offset.from_local_datetime(&naive).single()?;
        Some(Self(at))
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<FixedOffset> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock_minutes() {
        let clock = FixedClock::at(23, 15).unwrap();
        assert_eq!(minutes_since_midnight(&clock.now()), 23 * 60 + 15);

        let midnight = FixedClock::at(0, 0).unwrap();
        assert_eq!(minutes_since_midnight(&midnight.now()), 0);

        assert!(FixedClock::at(24, 0).is_none());
    }

    #[test]
    fn test_system_clock_offset() {
        let clock = SystemClock::with_utc_offset_minutes(60).unwrap();
        assert_eq!(clock.now().offset().local_minus_utc(), 3600);
        assert!(minutes_since_midnight(&clock.now()) < MINUTES_PER_DAY);

        assert!(SystemClock::with_utc_offset_minutes(24 * 60).is_none());
    }

    #[test]
    fn test_mock_clock() {
        let mut clock = MockClock::new();
        let at = FixedClock::at(7, 30).unwrap().now();
        clock.expect_now().return_const(at);
        assert_eq!(minutes_since_midnight(&clock.now()), 450);
    }
}
