use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use serde_json::json;

use tasker_core::models::{
    CommandKind, Job, JobLogStatus, JobType, LoadBalance, MisfireStrategy, RouteStrategy,
    ScheduleKind, SchedulerCommand, SchedulerRegistration, Trigger,
};
use tasker_core::traits::{JobExecutor, TaskStore};
use tasker_core::SchedulerConfig;
use tasker_dispatcher::{FireOutcome, SchedulerCoordinator, SchedulerState};
use tasker_infrastructure::MemoryTaskStore;
use tasker_worker::MockJobExecutor;

fn node_config(instance_name: &str) -> SchedulerConfig {
    SchedulerConfig {
        namespace: "default".to_string(),
        instance_name: instance_name.to_string(),
        ..SchedulerConfig::default()
    }
}

async fn make_node(
    store: &Arc<MemoryTaskStore>,
    instance_name: &str,
) -> Arc<SchedulerCoordinator> {
    let executors: Vec<Arc<dyn JobExecutor>> =
        vec![Arc::new(MockJobExecutor::new(JobType::Http, true))];
    let coordinator = SchedulerCoordinator::new(
        node_config(instance_name),
        store.clone() as Arc<dyn TaskStore>,
        executors,
    );
    let registration = store
        .register_scheduler(SchedulerRegistration::new("default", instance_name))
        .await
        .unwrap();
    coordinator.context().set_current_scheduler(registration).await;
    coordinator.reload_schedulers().await.unwrap();
    coordinator
}

async fn seed_job(store: &Arc<MemoryTaskStore>, configure: impl FnOnce(&mut Job)) -> Job {
    let mut job = Job::new("default", "test_job", JobType::Http);
    configure(&mut job);
    store.save_job(&job).await.unwrap()
}

async fn seed_due_trigger(
    store: &Arc<MemoryTaskStore>,
    job_id: i64,
    configure: impl FnOnce(&mut Trigger),
) -> Trigger {
    let now = store.current_datetime().await.unwrap();
    let mut trigger = Trigger::new(
        "default",
        job_id,
        "test_trigger",
        now - ChronoDuration::hours(1),
        ScheduleKind::FixedInterval { seconds: 60 },
    );
    trigger.next_fire_time = Some(now - ChronoDuration::seconds(10));
    configure(&mut trigger);
    store.save_trigger(&trigger).await.unwrap()
}

/// 等待异步派发的任务执行落库
async fn wait_until<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("等待条件超时");
}

#[tokio::test]
async fn test_two_nodes_exactly_one_job_log() {
    let store = Arc::new(MemoryTaskStore::new());
    let node_a = make_node(&store, "node-a").await;
    let node_b = make_node(&store, "node-b").await;
    node_a.reload_schedulers().await.unwrap();
    node_b.reload_schedulers().await.unwrap();

    // 抢占策略 + 禁止多节点并发执行: 两个节点同时竞争同一次 (job, fire_time)
    let job = seed_job(&store, |job| {
        job.load_balance = LoadBalance::Preemptive;
        job.allow_concurrent = false;
    })
    .await;
    let mut trigger = seed_due_trigger(&store, job.id, |trigger| {
        // 触发器允许并行处理，让两个节点都走到任务级认领
        trigger.allow_concurrent = true;
    })
    .await;

    let (outcome_a, outcome_b) = tokio::join!(
        node_a.process_trigger(trigger.clone()),
        node_b.process_trigger(trigger.clone())
    );
    let outcomes = [outcome_a.unwrap(), outcome_b.unwrap()];
    assert!(outcomes.contains(&FireOutcome::Executed));
    assert!(outcomes.contains(&FireOutcome::SkippedLockLost));

    wait_until(|| async {
        let logs = store.job_logs_for("default", job.id).await;
        logs.len() == 1 && logs[0].status.is_terminal()
    })
    .await;

    // 恰好一个节点产生JobLog，另一个没有任何副作用
    let logs = store.job_logs_for("default", job.id).await;
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, JobLogStatus::Success);

    // 同一触发再处理一次也不会重复执行
    trigger.allow_concurrent = false;
    let outcome = node_a.process_trigger(trigger.clone()).await.unwrap();
    assert_eq!(outcome, FireOutcome::SkippedLockLost);
}

#[tokio::test]
async fn test_trigger_claim_single_processor() {
    let store = Arc::new(MemoryTaskStore::new());
    let node_a = make_node(&store, "node-a").await;
    let node_b = make_node(&store, "node-b").await;
    node_a.reload_schedulers().await.unwrap();
    node_b.reload_schedulers().await.unwrap();

    let job = seed_job(&store, |job| {
        job.load_balance = LoadBalance::Preemptive;
    })
    .await;
    // 默认触发器禁止并行触发: 只有一个节点能处理这次触发
    let trigger = seed_due_trigger(&store, job.id, |_| {}).await;

    let (outcome_a, outcome_b) = tokio::join!(
        node_a.process_trigger(trigger.clone()),
        node_b.process_trigger(trigger.clone())
    );
    let outcomes = [outcome_a.unwrap(), outcome_b.unwrap()];
    assert!(outcomes.contains(&FireOutcome::Executed));
    assert!(outcomes.contains(&FireOutcome::SkippedLockLost));

    // 触发日志也只有一条
    let trigger_logs = store.trigger_logs_for("default", trigger.id).await;
    assert_eq!(trigger_logs.len(), 1);
}

#[tokio::test]
async fn test_round_robin_owner_executes() {
    let store = Arc::new(MemoryTaskStore::new());
    let node_a = make_node(&store, "node-a").await;
    let node_b = make_node(&store, "node-b").await;
    node_a.reload_schedulers().await.unwrap();
    node_b.reload_schedulers().await.unwrap();

    // run_count=0 -> 排序后的候选列表第一个节点(node-a)执行
    let job = seed_job(&store, |job| {
        job.load_balance = LoadBalance::RoundRobin;
    })
    .await;
    let trigger = seed_due_trigger(&store, job.id, |_| {}).await;

    let outcome_b = node_b.process_trigger(trigger.clone()).await.unwrap();
    assert_eq!(outcome_b, FireOutcome::SkippedNotOwner);
    // 非执行节点不推进触发器
    let unchanged = store.get_trigger("default", trigger.id).await.unwrap().unwrap();
    assert_eq!(unchanged.next_fire_time, trigger.next_fire_time);

    let outcome_a = node_a.process_trigger(trigger.clone()).await.unwrap();
    assert_eq!(outcome_a, FireOutcome::Executed);

    wait_until(|| async { !store.job_logs_for("default", job.id).await.is_empty() }).await;
    let logs = store.job_logs_for("default", job.id).await;
    assert_eq!(logs.len(), 1);
}

#[tokio::test]
async fn test_whitelist_without_live_node_retries() {
    let store = Arc::new(MemoryTaskStore::new());
    let node_a = make_node(&store, "node-a").await;
    node_a.reload_schedulers().await.unwrap();

    let job = seed_job(&store, |job| {
        job.route_strategy = RouteStrategy::Whitelist(vec!["node-x".to_string()]);
    })
    .await;
    let trigger = seed_due_trigger(&store, job.id, |_| {}).await;

    let outcome = node_a.process_trigger(trigger.clone()).await.unwrap();
    assert_eq!(outcome, FireOutcome::NoCandidates);

    // 不认领不推进: 下次轮询会重试这次触发
    let unchanged = store.get_trigger("default", trigger.id).await.unwrap().unwrap();
    assert_eq!(unchanged.next_fire_time, trigger.next_fire_time);
    assert!(store.trigger_logs_for("default", trigger.id).await.is_empty());
    assert!(store.job_logs_for("default", job.id).await.is_empty());
}

#[tokio::test]
async fn test_misfire_ignore_skips_and_advances() {
    let store = Arc::new(MemoryTaskStore::new());
    let node_a = make_node(&store, "node-a").await;

    let job = seed_job(&store, |_| {}).await;
    let now = store.current_datetime().await.unwrap();
    let trigger = seed_due_trigger(&store, job.id, |trigger| {
        trigger.misfire_strategy = MisfireStrategy::Ignore;
        // 超过默认300秒的错过判定阈值
        trigger.next_fire_time = Some(now - ChronoDuration::seconds(301));
    })
    .await;

    let outcome = node_a.process_trigger(trigger.clone()).await.unwrap();
    assert_eq!(outcome, FireOutcome::MisfireIgnored);

    // 错过的触发被丢弃: 没有JobLog，触发日志标记mis_fired
    assert!(store.job_logs_for("default", job.id).await.is_empty());
    let trigger_logs = store.trigger_logs_for("default", trigger.id).await;
    assert_eq!(trigger_logs.len(), 1);
    assert!(trigger_logs[0].mis_fired);

    // 重算的下一次触发时间严格大于now
    let advanced = store.get_trigger("default", trigger.id).await.unwrap().unwrap();
    assert!(advanced.next_fire_time.unwrap() > now);
}

#[tokio::test]
async fn test_misfire_compensate_fires_once_immediately() {
    let store = Arc::new(MemoryTaskStore::new());
    let node_a = make_node(&store, "node-a").await;

    let job = seed_job(&store, |_| {}).await;
    let now = store.current_datetime().await.unwrap();
    let trigger = seed_due_trigger(&store, job.id, |trigger| {
        trigger.misfire_strategy = MisfireStrategy::Compensate;
        trigger.next_fire_time = Some(now - ChronoDuration::seconds(301));
    })
    .await;

    let outcome = node_a.process_trigger(trigger.clone()).await.unwrap();
    assert_eq!(outcome, FireOutcome::Executed);

    wait_until(|| async { !store.job_logs_for("default", job.id).await.is_empty() }).await;

    // 补偿触发恰好执行一次，fire_time取当前时间而非错过的时间点
    let logs = store.job_logs_for("default", job.id).await;
    assert_eq!(logs.len(), 1);
    assert!(logs[0].fire_time >= now - ChronoDuration::seconds(1));
    let trigger_logs = store.trigger_logs_for("default", trigger.id).await;
    assert!(trigger_logs[0].mis_fired);

    // 之后恢复正常节奏
    let advanced = store.get_trigger("default", trigger.id).await.unwrap().unwrap();
    assert!(advanced.next_fire_time.unwrap() > now);
}

#[tokio::test]
async fn test_reentry_conflict_recorded_as_cancelled() {
    let store = Arc::new(MemoryTaskStore::new());
    let node_a = make_node(&store, "node-a").await;

    let job = seed_job(&store, |job| {
        // 允许跨节点并发(不走任务级认领)，但重入上限为0
        job.allow_concurrent = true;
        job.max_reentry = 0;
    })
    .await;
    let trigger = seed_due_trigger(&store, job.id, |_| {}).await;

    // 模拟上一次执行尚未结束: 预置一条Running状态的JobLog
    let mut running = tasker_core::models::JobLog::new(
        "default",
        job.id,
        Some(trigger.id),
        1,
        store.current_datetime().await.unwrap(),
    );
    running.status = JobLogStatus::Running;
    store.save_job_log(&running).await.unwrap();

    let outcome = node_a.process_trigger(trigger.clone()).await.unwrap();
    assert_eq!(outcome, FireOutcome::SkippedReentryConflict);

    let logs = store.job_logs_for("default", job.id).await;
    let cancelled: Vec<_> = logs
        .iter()
        .filter(|log| log.status == JobLogStatus::Cancelled)
        .collect();
    assert_eq!(cancelled.len(), 1);
    assert!(cancelled[0]
        .error_info
        .as_ref()
        .unwrap()
        .contains("重入"));
}

#[tokio::test]
async fn test_disabled_job_skipped() {
    let store = Arc::new(MemoryTaskStore::new());
    let node_a = make_node(&store, "node-a").await;

    let job = seed_job(&store, |job| {
        job.disable = true;
    })
    .await;
    let trigger = seed_due_trigger(&store, job.id, |_| {}).await;

    let outcome = node_a.process_trigger(trigger.clone()).await.unwrap();
    assert_eq!(outcome, FireOutcome::SkippedDisabled);
    assert!(store.job_logs_for("default", job.id).await.is_empty());

    // 禁用任务的触发器仍然推进，避免每轮重复处理
    let advanced = store.get_trigger("default", trigger.id).await.unwrap().unwrap();
    assert_ne!(advanced.next_fire_time, trigger.next_fire_time);
}

#[tokio::test]
async fn test_tick_end_to_end() {
    let store = Arc::new(MemoryTaskStore::new());
    let node_a = make_node(&store, "node-a").await;
    node_a.reload_schedulers().await.unwrap();

    let job = seed_job(&store, |job| {
        job.is_update_data = true;
        job.job_data = json!({"greeting": "hi"});
    })
    .await;
    let trigger = seed_due_trigger(&store, job.id, |_| {}).await;

    node_a.tick().await.unwrap();

    wait_until(|| async {
        store
            .job_logs_for("default", job.id)
            .await
            .iter()
            .any(|log| log.status == JobLogStatus::Success)
    })
    .await;

    let logs = store.job_logs_for("default", job.id).await;
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].trigger_id, Some(trigger.id));
    // fire_count在推进时递增
    let advanced = store.get_trigger("default", trigger.id).await.unwrap().unwrap();
    assert_eq!(advanced.fire_count, trigger.fire_count + 1);
    assert_eq!(advanced.last_fire_time, trigger.next_fire_time);
}

#[tokio::test]
async fn test_lifecycle_state_machine() {
    let store = Arc::new(MemoryTaskStore::new());
    let node_a = make_node(&store, "node-a").await;

    // Init状态不能暂停/恢复
    assert!(node_a.pause().is_err());
    assert!(node_a.resume().is_err());
    assert_eq!(node_a.state(), SchedulerState::Init);

    node_a.clone().start().await.unwrap();
    assert_eq!(node_a.state(), SchedulerState::Running);
    // 重复启动是无效操作
    assert!(node_a.clone().start().await.is_err());

    node_a.pause().unwrap();
    assert_eq!(node_a.state(), SchedulerState::Paused);
    node_a.resume().unwrap();
    assert_eq!(node_a.state(), SchedulerState::Running);

    node_a.stop().unwrap();
    assert_eq!(node_a.state(), SchedulerState::Stopped);
    assert!(node_a.resume().is_err());
}

#[tokio::test]
async fn test_exec_job_command() {
    let store = Arc::new(MemoryTaskStore::new());
    let node_a = make_node(&store, "node-a").await;

    let job = seed_job(&store, |_| {}).await;
    let command = SchedulerCommand::new(
        "default",
        Some("node-a".to_string()),
        CommandKind::ExecJob { job_id: job.id },
    );
    store.save_command(&command).await.unwrap();

    node_a.poll_commands().await.unwrap();

    wait_until(|| async { !store.job_logs_for("default", job.id).await.is_empty() }).await;
    let logs = store.job_logs_for("default", job.id).await;
    assert_eq!(logs.len(), 1);
    // 计划外触发没有关联触发器
    assert_eq!(logs[0].trigger_id, None);

    // 指令已完成，不会重复执行
    node_a.poll_commands().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(store.job_logs_for("default", job.id).await.len(), 1);
}

#[tokio::test]
async fn test_pause_resume_commands() {
    let store = Arc::new(MemoryTaskStore::new());
    let node_a = make_node(&store, "node-a").await;
    node_a.clone().start().await.unwrap();

    let pause = SchedulerCommand::new("default", None, CommandKind::PauseScheduler);
    store.save_command(&pause).await.unwrap();
    node_a.poll_commands().await.unwrap();
    assert_eq!(node_a.state(), SchedulerState::Paused);

    let resume = SchedulerCommand::new("default", None, CommandKind::ResumeScheduler);
    store.save_command(&resume).await.unwrap();
    node_a.poll_commands().await.unwrap();
    assert_eq!(node_a.state(), SchedulerState::Running);

    node_a.stop().unwrap();
}

#[tokio::test]
async fn test_repair_initializes_next_fire_time() {
    let store = Arc::new(MemoryTaskStore::new());
    let node_a = make_node(&store, "node-a").await;

    let job = seed_job(&store, |_| {}).await;
    let now = store.current_datetime().await.unwrap();
    let mut trigger = Trigger::new(
        "default",
        job.id,
        "fresh_trigger",
        now,
        ScheduleKind::FixedInterval { seconds: 60 },
    );
    trigger.next_fire_time = None;
    let trigger = store.save_trigger(&trigger).await.unwrap();

    node_a.tick().await.unwrap();

    // 新注册的触发器在轮询中补齐next_fire_time
    let repaired = store.get_trigger("default", trigger.id).await.unwrap().unwrap();
    let next = repaired.next_fire_time.unwrap();
    assert!(next > now);
    assert!(next <= now + ChronoDuration::seconds(61));
}

#[tokio::test]
async fn test_invalid_cron_next_fire_time_cleared() {
    let store = Arc::new(MemoryTaskStore::new());
    let node_a = make_node(&store, "node-a").await;

    let job = seed_job(&store, |_| {}).await;
    let now = store.current_datetime().await.unwrap();
    let mut trigger = Trigger::new(
        "default",
        job.id,
        "broken_trigger",
        now,
        ScheduleKind::Cron {
            expr: "not a cron".to_string(),
        },
    );
    trigger.next_fire_time = Some(now + ChronoDuration::seconds(30));
    let trigger = store.save_trigger(&trigger).await.unwrap();

    node_a.tick().await.unwrap();

    let repaired = store.get_trigger("default", trigger.id).await.unwrap().unwrap();
    assert_eq!(repaired.next_fire_time, None);
}
