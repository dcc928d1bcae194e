//! 入口时间戳与节点内序号
//!
//! 时间戳在入口节点赋予一次，是会话内排序的唯一依据。
//! 墙钟微秒经原子比较交换强制节点内严格递增；节点间的时钟偏差
//! 是接受的放宽（最终有序而非严格全序）。

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use time::OffsetDateTime;

/// 入口时钟
#[derive(Debug)]
pub struct IngressClock {
    last_micros: AtomicI64,
    sequence: AtomicU64,
}

impl IngressClock {
    pub fn new() -> Self {
        Self {
            last_micros: AtomicI64::new(0),
            sequence: AtomicU64::new(0),
        }
    }

    /// 生成一个 (微秒时间戳, 节点内序号) 对。
    /// 同一节点上的两次调用绝不会返回相同的时间戳。
    pub fn stamp(&self) -> (i64, u64) {
        let wall = (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000) as i64;
        let mut prev = self.last_micros.load(Ordering::Relaxed);
        let stamped = loop {
            let candidate = wall.max(prev + 1);
            match self.last_micros.compare_exchange_weak(
                prev,
                candidate,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => break candidate,
                Err(actual) => prev = actual,
            }
        };
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        (stamped, seq)
    }
}

impl Default for IngressClock {
    fn default() -> Self {
        Self::new()
    }
}
