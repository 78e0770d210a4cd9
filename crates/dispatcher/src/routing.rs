use tracing::debug;

use tasker_core::models::{Job, RouteStrategy, SchedulerRegistration};

/// 路由解析: 按任务的路由策略把在线节点过滤成候选节点集合
///
/// 返回排序后的实例名列表，保证所有节点对同一次触发计算出相同的候选顺序。
/// 白名单策略可能返回空集合，表示本轮没有可执行节点(下次轮询重试，不丢弃)。
pub fn resolve_candidates(job: &Job, live_nodes: &[SchedulerRegistration]) -> Vec<String> {
    let mut live: Vec<String> = live_nodes
        .iter()
        .map(|node| node.instance_name.clone())
        .collect();
    live.sort();
    live.dedup();

    let mut candidates = match &job.route_strategy {
        RouteStrategy::None => live,
        RouteStrategy::FirstPreferred(preferred) => {
            let preferred_online: Vec<String> = live
                .iter()
                .filter(|name| preferred.contains(*name))
                .cloned()
                .collect();
            if preferred_online.is_empty() {
                // 指定节点全部不在线，回退到全部在线节点
                debug!(job_id = job.id, "指定优先节点均不在线，回退到全部在线节点");
                live
            } else {
                preferred_online
            }
        }
        RouteStrategy::Whitelist(whitelist) => live
            .iter()
            .filter(|name| whitelist.contains(*name))
            .cloned()
            .collect(),
        RouteStrategy::Blacklist(blacklist) => live
            .iter()
            .filter(|name| !blacklist.contains(*name))
            .cloned()
            .collect(),
    };
    candidates.sort();
    candidates
}
