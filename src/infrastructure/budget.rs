//! 预算追踪 - 基础设施层
//!
//! 只关心"花了多少钱 / 试了多少次"，不认识验证码。
//! 每个窗口用一个 `AtomicU64` 同时保存窗口编号和累计值，
//! 所有更新都是 CAS 循环，多个 worker 同时记账不会丢失更新。

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};

const PERIOD_BITS: u32 = 24;
const VALUE_BITS: u32 = 64 - PERIOD_BITS;
const VALUE_MASK: u64 = (1 << VALUE_BITS) - 1;
const PERIOD_MASK: u64 = (1 << PERIOD_BITS) - 1;

/// 1 美元 = 1_000_000 微美元
const MICROS_PER_USD: f64 = 1_000_000.0;

fn pack(period: u64, value: u64) -> u64 {
    ((period & PERIOD_MASK) << VALUE_BITS) | (value & VALUE_MASK)
}

fn unpack(word: u64) -> (u64, u64) {
    (word >> VALUE_BITS, word & VALUE_MASK)
}

fn usd_to_micros(usd: f64) -> u64 {
    if usd.is_finite() && usd > 0.0 {
        (usd * MICROS_PER_USD).round() as u64
    } else {
        0
    }
}

fn micros_to_usd(micros: u64) -> f64 {
    micros as f64 / MICROS_PER_USD
}

fn day_index(now: DateTime<Utc>) -> u64 {
    (now.timestamp().max(0) / 86_400) as u64
}

fn hour_index(now: DateTime<Utc>) -> u64 {
    (now.timestamp().max(0) / 3_600) as u64
}

/// 按固定时间边界滚动的计数器
struct WindowCounter {
    word: AtomicU64,
}

impl WindowCounter {
    fn new() -> Self {
        Self {
            word: AtomicU64::new(0),
        }
    }

    /// 当前窗口的累计值（窗口已滚动则为 0）
    fn current(&self, period: u64) -> u64 {
        let (stored_period, value) = unpack(self.word.load(Ordering::Acquire));
        if stored_period == period & PERIOD_MASK {
            value
        } else {
            0
        }
    }

    /// 无条件累加
    fn add(&self, period: u64, delta: u64) {
        let _ = self
            .word
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |word| {
                let (stored_period, value) = unpack(word);
                let base = if stored_period == period & PERIOD_MASK {
                    value
                } else {
                    0
                };
                Some(pack(period, base.saturating_add(delta).min(VALUE_MASK)))
            });
    }

    /// 仅在累加后不超过上限时累加
    fn try_add(&self, period: u64, delta: u64, ceiling: u64) -> bool {
        self.word
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |word| {
                let (stored_period, value) = unpack(word);
                let base = if stored_period == period & PERIOD_MASK {
                    value
                } else {
                    0
                };
                let next = base.checked_add(delta)?;
                (next <= ceiling).then(|| pack(period, next))
            })
            .is_ok()
    }

    /// 扣减（同一窗口内才有意义）
    fn sub(&self, period: u64, delta: u64) {
        let _ = self
            .word
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |word| {
                let (stored_period, value) = unpack(word);
                (stored_period == period & PERIOD_MASK)
                    .then(|| pack(period, value.saturating_sub(delta)))
            });
    }
}

/// 一笔预先占用的预算
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "预留的预算需要 settle 或 refund"]
pub struct BudgetReservation {
    day: u64,
    micros: u64,
}

impl BudgetReservation {
    pub fn amount_usd(&self) -> f64 {
        micros_to_usd(self.micros)
    }
}

/// 打码花费与尝试次数追踪器
///
/// 每日花费和每小时尝试次数分别在 UTC 日 / 小时边界清零。
pub struct BudgetTracker {
    daily_ceiling_micros: u64,
    hourly_attempt_ceiling: u64,
    daily_spend: WindowCounter,
    hourly_attempts: WindowCounter,
}

impl BudgetTracker {
    pub fn new(daily_ceiling_usd: f64, hourly_attempt_ceiling: u32) -> Self {
        Self {
            daily_ceiling_micros: usd_to_micros(daily_ceiling_usd),
            hourly_attempt_ceiling: u64::from(hourly_attempt_ceiling),
            daily_spend: WindowCounter::new(),
            hourly_attempts: WindowCounter::new(),
        }
    }

    pub fn daily_ceiling_usd(&self) -> f64 {
        micros_to_usd(self.daily_ceiling_micros)
    }

    /// 今日累计花费 + 预估花费是否仍在上限内
    pub fn can_spend(&self, estimated_cost_usd: f64) -> bool {
        self.can_spend_at(estimated_cost_usd, Utc::now())
    }

    pub fn can_spend_at(&self, estimated_cost_usd: f64, now: DateTime<Utc>) -> bool {
        let spent = self.daily_spend.current(day_index(now));
        spent.saturating_add(usd_to_micros(estimated_cost_usd)) <= self.daily_ceiling_micros
    }

    /// 记录实际花费（只增不减）
    pub fn record_spend(&self, actual_cost_usd: f64) {
        self.record_spend_at(actual_cost_usd, Utc::now());
    }

    pub fn record_spend_at(&self, actual_cost_usd: f64, now: DateTime<Utc>) {
        self.daily_spend
            .add(day_index(now), usd_to_micros(actual_cost_usd));
    }

    /// 本小时尝试次数是否未达上限
    pub fn can_attempt(&self) -> bool {
        self.can_attempt_at(Utc::now())
    }

    pub fn can_attempt_at(&self, now: DateTime<Utc>) -> bool {
        self.hourly_attempts.current(hour_index(now)) < self.hourly_attempt_ceiling
    }

    pub fn record_attempt(&self) {
        self.record_attempt_at(Utc::now());
    }

    pub fn record_attempt_at(&self, now: DateTime<Utc>) {
        self.hourly_attempts.add(hour_index(now), 1);
    }

    /// 检查并记录一次尝试（原子操作）
    pub fn try_record_attempt(&self) -> bool {
        self.try_record_attempt_at(Utc::now())
    }

    pub fn try_record_attempt_at(&self, now: DateTime<Utc>) -> bool {
        self.hourly_attempts
            .try_add(hour_index(now), 1, self.hourly_attempt_ceiling)
    }

    /// 检查并预先占用预估花费（原子操作）
    ///
    /// 两个 worker 同时检查时不会都通过而一起超出上限。
    pub fn try_reserve(&self, estimated_cost_usd: f64) -> Option<BudgetReservation> {
        self.try_reserve_at(estimated_cost_usd, Utc::now())
    }

    pub fn try_reserve_at(
        &self,
        estimated_cost_usd: f64,
        now: DateTime<Utc>,
    ) -> Option<BudgetReservation> {
        let day = day_index(now);
        let micros = usd_to_micros(estimated_cost_usd);
        self.daily_spend
            .try_add(day, micros, self.daily_ceiling_micros)
            .then_some(BudgetReservation { day, micros })
    }

    /// 按实际花费结算预留
    pub fn settle(&self, reservation: BudgetReservation, actual_cost_usd: f64) {
        let actual = usd_to_micros(actual_cost_usd);
        if actual >= reservation.micros {
            self.daily_spend
                .add(reservation.day, actual - reservation.micros);
        } else {
            self.daily_spend
                .sub(reservation.day, reservation.micros - actual);
        }
    }

    /// 未产生花费，退回预留
    pub fn refund(&self, reservation: BudgetReservation) {
        self.settle(reservation, 0.0);
    }

    pub fn spent_today_usd(&self) -> f64 {
        micros_to_usd(self.daily_spend.current(day_index(Utc::now())))
    }

    pub fn attempts_this_hour(&self) -> u64 {
        self.hourly_attempts.current(hour_index(Utc::now()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::TimeZone;

    use super::*;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, h, m, 0).unwrap()
    }

    #[test]
    fn can_spend_respects_ceiling() {
        let tracker = BudgetTracker::new(0.01, 20);
        let now = at(10, 0);
        tracker.record_spend_at(0.003, now);
        tracker.record_spend_at(0.003, now);
        assert!(tracker.can_spend_at(0.003, now));
        tracker.record_spend_at(0.003, now);
        assert!(!tracker.can_spend_at(0.003, now));
        assert!(tracker.can_spend_at(0.001, now));
    }

    #[test]
    fn spend_rolls_over_at_day_boundary() {
        let tracker = BudgetTracker::new(0.005, 20);
        tracker.record_spend_at(0.005, at(23, 59));
        assert!(!tracker.can_spend_at(0.001, at(23, 59)));
        let next_day = Utc.with_ymd_and_hms(2026, 3, 15, 0, 1, 0).unwrap();
        assert!(tracker.can_spend_at(0.005, next_day));
    }

    #[test]
    fn attempts_roll_over_hourly() {
        let tracker = BudgetTracker::new(1.0, 2);
        tracker.record_attempt_at(at(9, 10));
        assert!(tracker.try_record_attempt_at(at(9, 20)));
        assert!(!tracker.can_attempt_at(at(9, 59)));
        assert!(!tracker.try_record_attempt_at(at(9, 59)));
        assert!(tracker.can_attempt_at(at(10, 0)));
    }

    #[test]
    fn reservation_settles_to_actual_cost() {
        let tracker = BudgetTracker::new(0.01, 20);
        let now = at(12, 0);
        let reservation = tracker.try_reserve_at(0.004, now).unwrap();
        assert!((reservation.amount_usd() - 0.004).abs() < 1e-9);
        tracker.settle(reservation, 0.003);
        assert!(tracker.can_spend_at(0.007, now));
        assert!(!tracker.can_spend_at(0.0071, now));

        let refunded = tracker.try_reserve_at(0.007, now).unwrap();
        assert!(tracker.try_reserve_at(0.001, now).is_none());
        tracker.refund(refunded);
        assert!(tracker.can_spend_at(0.007, now));
    }

    #[test]
    fn concurrent_spend_is_not_lost() {
        let tracker = Arc::new(BudgetTracker::new(100.0, 20));
        let now = at(8, 0);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        tracker.record_spend_at(0.001, now);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        // 8 * 1000 * 0.001 = 8.0
        assert!(tracker.can_spend_at(92.0, now));
        assert!(!tracker.can_spend_at(92.000001, now));
    }

    #[test]
    fn concurrent_reservations_never_exceed_ceiling() {
        let tracker = Arc::new(BudgetTracker::new(0.05, 1000));
        let now = at(8, 0);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                std::thread::spawn(move || {
                    (0..10)
                        .filter(|_| tracker.try_reserve_at(0.003, now).is_some())
                        .count()
                })
            })
            .collect();
        let granted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        // floor(0.05 / 0.003) = 16
        assert_eq!(granted, 16);
    }
}
