//! 申请频率限制 - 基础设施层
//!
//! 全局每小时上限 + 各平台每小时 / 每日上限，在导航前检查。

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

use crate::config::{Config, PlatformCap};
use crate::models::Platform;

/// 被限流的范围
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitScope {
    GlobalHourly,
    PlatformHourly(Platform),
    PlatformDaily(Platform),
}

/// 被限流的原因以及最早可以再次尝试的时间
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimited {
    pub scope: RateLimitScope,
    pub retry_at: DateTime<Utc>,
}

#[derive(Default)]
struct Windows {
    /// 全局最近一小时的申请时间
    global: VecDeque<DateTime<Utc>>,
    /// 各平台最近一天的申请时间
    per_platform: HashMap<Platform, VecDeque<DateTime<Utc>>>,
}

pub struct RateLimiter {
    global_hourly_cap: u32,
    platform_caps: HashMap<Platform, PlatformCap>,
    windows: Mutex<Windows>,
}

impl RateLimiter {
    pub fn new(global_hourly_cap: u32, platform_caps: HashMap<Platform, PlatformCap>) -> Self {
        Self {
            global_hourly_cap,
            platform_caps,
            windows: Mutex::new(Windows::default()),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let caps = config
            .platform_caps
            .iter()
            .map(|(name, cap)| (Platform::from_name(name), *cap))
            .collect();
        Self::new(config.global_hourly_application_cap, caps)
    }

    /// 检查并登记一次申请
    pub fn try_acquire(&self, platform: Platform) -> Result<(), RateLimited> {
        self.try_acquire_at(platform, Utc::now())
    }

    pub fn try_acquire_at(&self, platform: Platform, now: DateTime<Utc>) -> Result<(), RateLimited> {
        let hour_ago = now - Duration::hours(1);
        let day_ago = now - Duration::days(1);

        let mut windows = self
            .windows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        prune(&mut windows.global, hour_ago);
        if windows.global.len() as u32 >= self.global_hourly_cap {
            return Err(RateLimited {
                scope: RateLimitScope::GlobalHourly,
                retry_at: oldest_plus(&windows.global, Duration::hours(1), now),
            });
        }

        if let Some(cap) = self.platform_caps.get(&platform) {
            let history = windows.per_platform.entry(platform).or_default();
            prune(history, day_ago);
            if history.len() as u32 >= cap.per_day {
                return Err(RateLimited {
                    scope: RateLimitScope::PlatformDaily(platform),
                    retry_at: oldest_plus(history, Duration::days(1), now),
                });
            }
            let last_hour = history.iter().filter(|t| **t > hour_ago).count() as u32;
            if last_hour >= cap.per_hour {
                let first_in_hour = history
                    .iter()
                    .find(|t| **t > hour_ago)
                    .copied()
                    .unwrap_or(now);
                return Err(RateLimited {
                    scope: RateLimitScope::PlatformHourly(platform),
                    retry_at: first_in_hour + Duration::hours(1),
                });
            }
            history.push_back(now);
        }

        windows.global.push_back(now);
        Ok(())
    }

    /// 当前已达上限的平台（只查询，不登记）
    pub fn capped_platforms(&self) -> Vec<Platform> {
        self.capped_platforms_at(Utc::now())
    }

    pub fn capped_platforms_at(&self, now: DateTime<Utc>) -> Vec<Platform> {
        let hour_ago = now - Duration::hours(1);
        let day_ago = now - Duration::days(1);

        let mut windows = self
            .windows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut capped = Vec::new();
        for (platform, cap) in &self.platform_caps {
            let history = windows.per_platform.entry(*platform).or_default();
            prune(history, day_ago);
            let last_hour = history.iter().filter(|t| **t > hour_ago).count() as u32;
            if history.len() as u32 >= cap.per_day || last_hour >= cap.per_hour {
                capped.push(*platform);
            }
        }
        capped
    }

    /// 全局上限已满时返回最早可再试的时间
    pub fn global_retry_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut windows = self
            .windows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        prune(&mut windows.global, now - Duration::hours(1));
        (windows.global.len() as u32 >= self.global_hourly_cap)
            .then(|| oldest_plus(&windows.global, Duration::hours(1), now))
    }
}

fn prune(history: &mut VecDeque<DateTime<Utc>>, cutoff: DateTime<Utc>) {
    while history.front().is_some_and(|t| *t <= cutoff) {
        history.pop_front();
    }
}

fn oldest_plus(history: &VecDeque<DateTime<Utc>>, window: Duration, now: DateTime<Utc>) -> DateTime<Utc> {
    history.front().map(|t| *t + window).unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn limiter() -> RateLimiter {
        let mut caps = HashMap::new();
        caps.insert(
            Platform::Linkedin,
            PlatformCap {
                per_hour: 2,
                per_day: 3,
            },
        );
        RateLimiter::new(4, caps)
    }

    #[test]
    fn platform_hourly_cap_blocks_only_that_platform() {
        let limiter = limiter();
        let now = Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap();
        assert!(limiter.try_acquire_at(Platform::Linkedin, now).is_ok());
        assert!(limiter.try_acquire_at(Platform::Linkedin, now).is_ok());
        let limited = limiter.try_acquire_at(Platform::Linkedin, now).unwrap_err();
        assert_eq!(limited.scope, RateLimitScope::PlatformHourly(Platform::Linkedin));
        assert_eq!(limited.retry_at, now + Duration::hours(1));
        assert!(limiter.try_acquire_at(Platform::Lever, now).is_ok());
    }

    #[test]
    fn platform_daily_cap_outlasts_the_hour() {
        let limiter = limiter();
        let start = Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap();
        for offset in 0..3 {
            let t = start + Duration::hours(offset * 2);
            assert!(limiter.try_acquire_at(Platform::Linkedin, t).is_ok());
        }
        let later = start + Duration::hours(8);
        let limited = limiter.try_acquire_at(Platform::Linkedin, later).unwrap_err();
        assert_eq!(limited.scope, RateLimitScope::PlatformDaily(Platform::Linkedin));
        assert!(limiter
            .try_acquire_at(Platform::Linkedin, start + Duration::hours(25))
            .is_ok());
    }

    #[test]
    fn global_cap_applies_across_platforms() {
        let limiter = limiter();
        let now = Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap();
        for _ in 0..4 {
            assert!(limiter.try_acquire_at(Platform::CompanySite, now).is_ok());
        }
        let limited = limiter.try_acquire_at(Platform::Lever, now).unwrap_err();
        assert_eq!(limited.scope, RateLimitScope::GlobalHourly);
        assert!(limiter
            .try_acquire_at(Platform::Lever, now + Duration::minutes(61))
            .is_ok());
    }

    #[test]
    fn capped_platforms_lists_only_full_platforms() {
        let limiter = limiter();
        let now = Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap();
        assert!(limiter.capped_platforms_at(now).is_empty());

        limiter.try_acquire_at(Platform::Linkedin, now).unwrap();
        limiter.try_acquire_at(Platform::Linkedin, now).unwrap();
        assert_eq!(limiter.capped_platforms_at(now), vec![Platform::Linkedin]);
        assert!(limiter.global_retry_at(now).is_none());
        assert!(limiter
            .capped_platforms_at(now + Duration::minutes(61))
            .is_empty());
    }

    #[test]
    fn zero_global_cap_blocks_everything() {
        let limiter = RateLimiter::new(0, HashMap::new());
        let now = Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap();
        assert_eq!(limiter.global_retry_at(now), Some(now));
    }
}
