use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use tasker_core::models::{Job, LoadBalance};

/// 负载均衡的选择结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// 没有候选节点，本轮无法执行
    NoCandidate,
    /// 全部候选节点通过存储层原子认领竞争，先到先得
    Preemptive,
    /// 确定性地选出的唯一执行节点
    Owner(String),
}

/// 在候选节点中选出本次触发的执行节点
///
/// 除抢占策略外，选择只依赖任务的持久化状态(run_count/id)和排序后的
/// 候选列表，保证集群内所有节点对同一次触发计算出相同的结果。
pub fn select(job: &Job, candidates: &[String]) -> Selection {
    if candidates.is_empty() {
        return Selection::NoCandidate;
    }
    match job.load_balance {
        LoadBalance::Preemptive => Selection::Preemptive,
        LoadBalance::Random => {
            // 以持久化的run_count为种子，每次触发换一个均匀随机的节点
            let seed = (job.id as u64).wrapping_mul(0x9e3779b97f4a7c15) ^ job.run_count as u64;
            let mut rng = StdRng::seed_from_u64(seed);
            let index = rng.random_range(0..candidates.len());
            debug!(job_id = job.id, index, "随机策略选择节点: {}", candidates[index]);
            Selection::Owner(candidates[index].clone())
        }
        LoadBalance::RoundRobin => {
            let index = (job.run_count.max(0) as usize) % candidates.len();
            debug!(job_id = job.id, index, "轮询策略选择节点: {}", candidates[index]);
            Selection::Owner(candidates[index].clone())
        }
        LoadBalance::ConsistentHash => {
            let ring = ConsistentHashRing::new(candidates);
            match ring.locate(&job.id.to_string()) {
                Some(owner) => {
                    debug!(job_id = job.id, "一致性HASH策略选择节点: {owner}");
                    Selection::Owner(owner.to_string())
                }
                None => Selection::NoCandidate,
            }
        }
    }
}

/// 一致性HASH环
///
/// 每个节点映射为多个虚拟节点放置在环上，任务ID顺时针找到最近的节点。
/// 候选集合发生小幅变化时只有少量任务会重新映射。
pub struct ConsistentHashRing {
    ring: BTreeMap<u64, String>,
}

impl ConsistentHashRing {
    /// 每个物理节点的虚拟节点数量
    const VIRTUAL_NODES: u32 = 100;

    pub fn new(nodes: &[String]) -> Self {
        let mut ring = BTreeMap::new();
        for node in nodes {
            for replica in 0..Self::VIRTUAL_NODES {
                let point = fnv1a_64(format!("{node}#{replica}").as_bytes());
                ring.insert(point, node.clone());
            }
        }
        Self { ring }
    }

    /// 顺时针找到key归属的节点
    pub fn locate(&self, key: &str) -> Option<&str> {
        if self.ring.is_empty() {
            return None;
        }
        let point = fnv1a_64(key.as_bytes());
        self.ring
            .range(point..)
            .next()
            .or_else(|| self.ring.iter().next())
            .map(|(_, node)| node.as_str())
    }
}

/// FNV-1a哈希，跨进程稳定(std的SipHash带随机种子，节点间结果不一致)
fn fnv1a_64(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}
