use std::sync::Mutex;

use chrono::Utc;

/// 集群唯一ID生成器(snowflake风格)
///
/// 64位布局: 1位符号 | 41位毫秒时间戳 | 10位节点ID | 12位序列号。
/// 节点ID由namespace和instance_name哈希得出，同一毫秒内用序列号区分，
/// 序列号耗尽时自旋等待下一毫秒。
pub struct SnowflakeIdGenerator {
    worker_id: i64,
    state: Mutex<GeneratorState>,
}

struct GeneratorState {
    last_millis: i64,
    sequence: i64,
}

/// 自定义纪元: 2020-01-01T00:00:00Z
const EPOCH_MILLIS: i64 = 1_577_836_800_000;
const WORKER_ID_BITS: i64 = 10;
const SEQUENCE_BITS: i64 = 12;
const MAX_WORKER_ID: i64 = (1 << WORKER_ID_BITS) - 1;
const MAX_SEQUENCE: i64 = (1 << SEQUENCE_BITS) - 1;

impl SnowflakeIdGenerator {
    pub fn new(worker_id: i64) -> Self {
        Self {
            worker_id: worker_id & MAX_WORKER_ID,
            state: Mutex::new(GeneratorState {
                last_millis: 0,
                sequence: 0,
            }),
        }
    }

    /// 从namespace和instance_name派生节点ID
    pub fn from_names(namespace: &str, instance_name: &str) -> Self {
        let key = format!("{namespace}/{instance_name}");
        Self::new((fnv1a_64(key.as_bytes()) & MAX_WORKER_ID as u64) as i64)
    }

    pub fn next_id(&self) -> i64 {
        let mut state = self.state.lock().expect("snowflake状态锁中毒");
        let mut now = current_millis();
        // 时钟回拨时以上一次的时间戳为准，保持单调递增
        if now < state.last_millis {
            now = state.last_millis;
        }
        if now == state.last_millis {
            state.sequence = (state.sequence + 1) & MAX_SEQUENCE;
            if state.sequence == 0 {
                // 序列号耗尽，等待下一毫秒
                while now <= state.last_millis {
                    now = current_millis();
                }
            }
        } else {
            state.sequence = 0;
        }
        state.last_millis = now;
        ((now - EPOCH_MILLIS) << (WORKER_ID_BITS + SEQUENCE_BITS))
            | (self.worker_id << SEQUENCE_BITS)
            | state.sequence
    }
}

fn current_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn fnv1a_64(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_ids_are_unique_and_increasing() {
        let generator = SnowflakeIdGenerator::new(1);
        let mut seen = HashSet::new();
        let mut last = 0;
        for _ in 0..10_000 {
            let id = generator.next_id();
            assert!(id > last, "ID必须单调递增");
            assert!(seen.insert(id), "ID必须唯一");
            last = id;
        }
    }

    #[test]
    fn test_worker_id_derivation_is_stable() {
        let first = SnowflakeIdGenerator::from_names("default", "node-a");
        let second = SnowflakeIdGenerator::from_names("default", "node-a");
        assert_eq!(first.worker_id, second.worker_id);

        let other = SnowflakeIdGenerator::from_names("default", "node-b");
        // 不同实例名大概率落在不同的worker_id上
        assert_ne!(first.worker_id, other.worker_id);
    }
}
