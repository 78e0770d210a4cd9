use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, Semaphore};
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use tasker_core::models::{
    CommandKind, Job, JobTriggerLog, ScheduleKind, SchedulerRegistration, Trigger,
};
use tasker_core::traits::{JobExecutor, TaskStore};
use tasker_core::{Result, SchedulerConfig, SchedulerError};
use tasker_worker::JobExecutionEngine;

use crate::concurrency::{Authorization, ConcurrencyGuard};
use crate::context::SchedulerContext;
use crate::load_balancer::{self, Selection};
use crate::routing;
use crate::trigger_calculator::{
    self, apply_misfire_strategy, is_misfired, truncate_to_second, MisfireAction,
};

/// 调度器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Init,
    Running,
    Paused,
    Stopped,
}

impl SchedulerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchedulerState::Init => "init",
            SchedulerState::Running => "running",
            SchedulerState::Paused => "paused",
            SchedulerState::Stopped => "stopped",
        }
    }
}

/// 单次触发的处理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FireOutcome {
    /// 已提交到工作线程池执行
    Executed,
    /// 错过触发，按忽略策略丢弃
    MisfireIgnored,
    /// 没有候选节点，下次轮询重试
    NoCandidates,
    /// 本节点不是负载均衡选出的执行节点
    SkippedNotOwner,
    /// 触发已被其他节点认领
    SkippedLockLost,
    /// 超过重入上限，已记录为重入冲突
    SkippedReentryConflict,
    /// 任务被禁用
    SkippedDisabled,
    /// 触发器对应的任务不存在
    SkippedJobMissing,
}

/// 调度协调器: 单个调度器节点的生命周期与认领循环
///
/// 集群内多个节点各自按自己的定时器轮询共享存储，没有选主。
/// 轻量的认领循环负责认领到期触发，从不阻塞在任务执行上；
/// 实际执行派发到信号量限制的工作线程池。
pub struct SchedulerCoordinator {
    context: Arc<SchedulerContext>,
    store: Arc<dyn TaskStore>,
    engine: Arc<JobExecutionEngine>,
    guard: ConcurrencyGuard,
    state: Mutex<SchedulerState>,
    worker_permits: Arc<Semaphore>,
    shutdown_tx: broadcast::Sender<()>,
}

impl SchedulerCoordinator {
    pub fn new(
        config: SchedulerConfig,
        store: Arc<dyn TaskStore>,
        executors: Vec<Arc<dyn JobExecutor>>,
    ) -> Arc<Self> {
        let context = Arc::new(SchedulerContext::new(config.clone()));
        let engine = Arc::new(JobExecutionEngine::new(Arc::clone(&store), executors));
        let guard = ConcurrencyGuard::new(Arc::clone(&context), Arc::clone(&store));
        let (shutdown_tx, _) = broadcast::channel(4);
        Arc::new(Self {
            context,
            store,
            engine,
            guard,
            state: Mutex::new(SchedulerState::Init),
            worker_permits: Arc::new(Semaphore::new(config.worker_pool_size)),
            shutdown_tx,
        })
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.lock().expect("state锁中毒")
    }

    pub fn context(&self) -> &Arc<SchedulerContext> {
        &self.context
    }

    fn transition(&self, from: &[SchedulerState], to: SchedulerState) -> Result<()> {
        let mut state = self.state.lock().expect("state锁中毒");
        if !from.contains(&*state) {
            return Err(SchedulerError::InvalidState {
                state: state.as_str().to_string(),
            });
        }
        *state = to;
        Ok(())
    }

    /// 启动调度器: 注册节点并启动心跳/节点列表刷新/指令轮询/认领循环
    pub async fn start(self: Arc<Self>) -> Result<()> {
        self.transition(&[SchedulerState::Init], SchedulerState::Running)?;
        let registration = self
            .store
            .register_scheduler(SchedulerRegistration::new(
                self.context.namespace(),
                self.context.instance_name(),
            ))
            .await?;
        info!(
            namespace = registration.namespace,
            instance_name = registration.instance_name,
            "调度器节点注册完成"
        );
        self.context.set_current_scheduler(registration).await;
        self.reload_schedulers().await?;

        Self::spawn_heartbeat_loop(&self);
        Self::spawn_reload_loop(&self);
        Self::spawn_command_loop(&self);
        Self::spawn_claim_loop(&self);
        Ok(())
    }

    /// 暂停认领循环，只有Running状态才能调用
    pub fn pause(&self) -> Result<()> {
        self.transition(&[SchedulerState::Running], SchedulerState::Paused)?;
        info!(instance_name = self.context.instance_name(), "调度器已暂停");
        Ok(())
    }

    /// 恢复认领循环，只有Paused状态才能调用
    pub fn resume(&self) -> Result<()> {
        self.transition(&[SchedulerState::Paused], SchedulerState::Running)?;
        info!(instance_name = self.context.instance_name(), "调度器已恢复");
        Ok(())
    }

    /// 停止调度器
    pub fn stop(&self) -> Result<()> {
        self.transition(
            &[SchedulerState::Running, SchedulerState::Paused],
            SchedulerState::Stopped,
        )?;
        let _ = self.shutdown_tx.send(());
        info!(instance_name = self.context.instance_name(), "调度器已停止");
        Ok(())
    }

    fn spawn_heartbeat_loop(coordinator: &Arc<Self>) {
        let coordinator = Arc::clone(coordinator);
        let mut shutdown_rx = coordinator.shutdown_tx.subscribe();
        let period = Duration::from_secs(coordinator.context.config().heartbeat_interval_s);
        tokio::spawn(async move {
            let mut ticker = interval(period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let namespace = coordinator.context.namespace().to_string();
                        let instance_name = coordinator.context.instance_name().to_string();
                        if let Err(e) = coordinator.store.heartbeat(&namespace, &instance_name).await {
                            error!("心跳更新失败: {e}");
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });
    }

    fn spawn_reload_loop(coordinator: &Arc<Self>) {
        let coordinator = Arc::clone(coordinator);
        let mut shutdown_rx = coordinator.shutdown_tx.subscribe();
        let period = Duration::from_secs(coordinator.context.config().scheduler_reload_interval_s);
        tokio::spawn(async move {
            let mut ticker = interval(period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = coordinator.reload_schedulers().await {
                            error!("刷新可用调度器列表失败: {e}");
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });
    }

    fn spawn_command_loop(coordinator: &Arc<Self>) {
        let coordinator = Arc::clone(coordinator);
        let mut shutdown_rx = coordinator.shutdown_tx.subscribe();
        let period = Duration::from_secs(coordinator.context.config().command_poll_interval_s);
        tokio::spawn(async move {
            let mut ticker = interval(period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = coordinator.poll_commands().await {
                            error!("处理调度器指令失败: {e}");
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });
    }

    fn spawn_claim_loop(coordinator: &Arc<Self>) {
        let coordinator = Arc::clone(coordinator);
        let mut shutdown_rx = coordinator.shutdown_tx.subscribe();
        let period = Duration::from_millis(coordinator.context.config().tick_interval_ms);
        tokio::spawn(async move {
            let mut ticker = interval(period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match coordinator.state() {
                            SchedulerState::Running => {
                                // 单次轮询失败只影响本轮，下个周期继续
                                if let Err(e) = coordinator.tick().await {
                                    error!("认领循环本轮失败: {e}");
                                }
                            }
                            SchedulerState::Paused => {}
                            SchedulerState::Init | SchedulerState::Stopped => break,
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
            info!("认领循环已退出");
        });
    }

    /// 刷新集群可用节点列表
    pub async fn reload_schedulers(&self) -> Result<()> {
        let schedulers = self
            .store
            .available_schedulers(self.context.namespace())
            .await?;
        self.context.set_available_schedulers(schedulers).await;
        Ok(())
    }

    /// 执行一轮认领: 修复触发时间、认领到期触发并派发执行
    pub async fn tick(&self) -> Result<()> {
        let now = self.store.current_datetime().await?;
        self.repair_fire_times().await?;
        let due = self
            .store
            .due_triggers(self.context.namespace(), now)
            .await?;
        if due.is_empty() {
            return Ok(());
        }
        debug!(count = due.len(), "发现到期触发器");
        for trigger in due {
            let trigger_id = trigger.id;
            match self.process_trigger(trigger).await {
                Ok(outcome) => {
                    debug!(trigger_id, ?outcome, "触发处理完成");
                }
                Err(e) => {
                    error!(trigger_id, "触发处理失败: {e}");
                }
            }
        }
        Ok(())
    }

    /// 校验cron表达式并初始化缺失的next_fire_time
    async fn repair_fire_times(&self) -> Result<()> {
        let triggers = self
            .store
            .enabled_triggers(self.context.namespace())
            .await?;
        for trigger in triggers {
            if let ScheduleKind::Cron { expr } = &trigger.schedule {
                if !trigger_calculator::validate_expression(expr) {
                    if trigger.next_fire_time.is_some() {
                        warn!(trigger_id = trigger.id, "cron表达式无效，清空下一次触发时间: {expr}");
                        self.store
                            .update_next_fire_time(&trigger.namespace, trigger.id, None)
                            .await?;
                    }
                    continue;
                }
            }
            if trigger.next_fire_time.is_none() {
                match trigger_calculator::initial_fire_time(&trigger) {
                    Ok(Some(next)) => {
                        self.store
                            .update_next_fire_time(&trigger.namespace, trigger.id, Some(next))
                            .await?;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(trigger_id = trigger.id, "计算首次触发时间失败: {e}");
                    }
                }
            }
        }
        Ok(())
    }

    /// 处理一个到期的触发器
    ///
    /// 认领顺序: 路由过滤 -> 负载均衡 -> 触发器级认领 -> 错过触发判定 ->
    /// 并发授权(任务级认领+重入控制) -> 派发执行 -> 推进触发时间。
    /// 非执行节点静默跳过且不推进触发器，由执行节点推进。
    pub async fn process_trigger(&self, trigger: Trigger) -> Result<FireOutcome> {
        let now = self.store.current_datetime().await?;
        let scheduled = trigger
            .next_fire_time
            .ok_or_else(|| SchedulerError::InvalidTrigger {
                id: trigger.id,
                message: "next_fire_time字段不能为空".to_string(),
            })?;

        let job = self
            .store
            .get_job(&trigger.namespace, trigger.job_id)
            .await?;

        // 路由与负载均衡决定执行节点，所有节点计算结果一致
        if let Some(job) = &job {
            let live = self.live_schedulers(now).await;
            let candidates = routing::resolve_candidates(job, &live);
            if candidates.is_empty() {
                // 本轮没有可执行节点，不认领不推进，下次轮询重试
                return Ok(FireOutcome::NoCandidates);
            }
            if let Selection::Owner(owner) = load_balancer::select(job, &candidates) {
                if owner != self.context.instance_name() {
                    return Ok(FireOutcome::SkippedNotOwner);
                }
            }
        }

        // 触发器级认领: 禁止并行触发的触发器，同一次触发只有一个节点处理
        if !trigger.allow_concurrent
            && !self
                .store
                .try_claim_trigger(&trigger.namespace, trigger.id, scheduled)
                .await?
        {
            return Ok(FireOutcome::SkippedLockLost);
        }

        let mut trigger_log = self.new_trigger_log(&trigger, scheduled, now);

        let Some(job) = job else {
            trigger_log.mis_fired = true;
            trigger_log.trigger_msg = Some(format!(
                "触发器对应的任务不存在, job_id={}",
                trigger.job_id
            ));
            self.store.save_trigger_log(&trigger_log).await?;
            self.advance_trigger(&trigger, scheduled, now).await?;
            return Ok(FireOutcome::SkippedJobMissing);
        };

        if !job.is_enabled() {
            trigger_log.mis_fired = true;
            trigger_log.trigger_msg = Some(format!("任务已被禁用, job_id={}", job.id));
            self.store.save_trigger_log(&trigger_log).await?;
            self.advance_trigger(&trigger, scheduled, now).await?;
            return Ok(FireOutcome::SkippedDisabled);
        }

        // 错过触发判定
        let threshold = chrono::Duration::seconds(self.context.config().misfire_threshold_s);
        let mut exec_fire_time = scheduled;
        if is_misfired(scheduled, now, threshold) {
            trigger_log.mis_fired = true;
            match apply_misfire_strategy(trigger.misfire_strategy) {
                MisfireAction::Skip => {
                    trigger_log.trigger_msg = Some(format!("忽略补偿触发, job_id={}", job.id));
                    self.store.save_trigger_log(&trigger_log).await?;
                    self.advance_trigger(&trigger, scheduled, now).await?;
                    return Ok(FireOutcome::MisfireIgnored);
                }
                MisfireAction::FireNow => {
                    trigger_log.trigger_msg = Some(format!("补偿触发一次, job_id={}", job.id));
                    exec_fire_time = truncate_to_second(now);
                }
            }
        }
        let trigger_log = self.store.save_trigger_log(&trigger_log).await?;

        let outcome = self
            .fire_job(&job, Some(trigger.id), trigger_log.id, exec_fire_time)
            .await?;
        self.advance_trigger(&trigger, exec_fire_time, now).await?;
        Ok(outcome)
    }

    /// 并发授权后把任务派发到工作线程池执行
    async fn fire_job(
        &self,
        job: &Job,
        trigger_id: Option<i64>,
        trigger_log_id: i64,
        fire_time: DateTime<Utc>,
    ) -> Result<FireOutcome> {
        match self.guard.authorize(job, fire_time).await? {
            Authorization::LockLost => Ok(FireOutcome::SkippedLockLost),
            Authorization::ReentryConflict { overlapping } => {
                self.engine
                    .record_reentry_conflict(job, trigger_id, trigger_log_id, fire_time, overlapping)
                    .await?;
                Ok(FireOutcome::SkippedReentryConflict)
            }
            Authorization::Granted(permit) => {
                let scheduler = self
                    .context
                    .current_scheduler()
                    .await
                    .unwrap_or_else(|| {
                        SchedulerRegistration::new(
                            self.context.namespace(),
                            self.context.instance_name(),
                        )
                    });
                let engine = Arc::clone(&self.engine);
                let permits = Arc::clone(&self.worker_permits);
                let job = job.clone();
                // 认领循环不等待执行，信号量在工作任务内限制并发
                tokio::spawn(async move {
                    let _permit = permit;
                    let _worker_slot = permits.acquire_owned().await;
                    let job_id = job.id;
                    if let Err(e) = engine
                        .execute(job, trigger_id, trigger_log_id, fire_time, scheduler)
                        .await
                    {
                        error!(job_id, "任务执行记录失败: {e}");
                    }
                });
                Ok(FireOutcome::Executed)
            }
        }
    }

    /// 推进触发器的last/next触发时间(只有触发的处理节点会调用)
    async fn advance_trigger(
        &self,
        trigger: &Trigger,
        fired_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let next = match trigger_calculator::next_fire_time(trigger, now) {
            Ok(next) => next,
            Err(e) => {
                warn!(trigger_id = trigger.id, "计算下一次触发时间失败: {e}");
                None
            }
        };
        self.store
            .update_fire_times(&trigger.namespace, trigger.id, Some(fired_at), next)
            .await?;
        Ok(())
    }

    /// 处理调度器指令: 立即执行任务/暂停/恢复
    pub async fn poll_commands(&self) -> Result<()> {
        let commands = self
            .store
            .pending_commands(self.context.namespace(), self.context.instance_name())
            .await?;
        for command in commands {
            info!(command_id = command.id, kind = ?command.kind, "执行调度器指令");
            match &command.kind {
                CommandKind::ExecJob { job_id } => {
                    if let Err(e) = self.exec_job_now(*job_id).await {
                        error!(job_id, "立即执行任务指令失败: {e}");
                    }
                }
                CommandKind::PauseScheduler => {
                    if let Err(e) = self.pause() {
                        warn!("暂停指令被忽略: {e}");
                    }
                }
                CommandKind::ResumeScheduler => {
                    if let Err(e) = self.resume() {
                        warn!("恢复指令被忽略: {e}");
                    }
                }
            }
            self.store.finish_command(command.id).await?;
        }
        Ok(())
    }

    /// 立即执行任务: 计划外触发，跳过路由，按当前时间做一次即时认领
    pub async fn exec_job_now(&self, job_id: i64) -> Result<FireOutcome> {
        let namespace = self.context.namespace().to_string();
        let job = self
            .store
            .get_job(&namespace, job_id)
            .await?
            .ok_or_else(|| SchedulerError::JobNotFound {
                namespace: namespace.clone(),
                id: job_id,
            })?;
        let now = self.store.current_datetime().await?;
        let fire_time = truncate_to_second(now);

        let mut trigger_log = JobTriggerLog {
            id: 0, // 由存储层生成
            namespace,
            trigger_id: 0,
            job_id: job.id,
            trigger_name: "exec-job-cmd".to_string(),
            scheduled_time: None,
            fire_time: now,
            mis_fired: false,
            trigger_msg: Some("手动触发".to_string()),
            fire_count: 0,
        };
        trigger_log = self.store.save_trigger_log(&trigger_log).await?;
        self.fire_job(&job, None, trigger_log.id, fire_time).await
    }

    /// 当前存活的调度器节点(按心跳超时过滤)
    async fn live_schedulers(&self, now: DateTime<Utc>) -> Vec<SchedulerRegistration> {
        let timeout = self.context.config().scheduler_timeout_s;
        self.context
            .available_schedulers()
            .await
            .into_iter()
            .filter(|scheduler| scheduler.is_alive(now, timeout))
            .collect()
    }

    fn new_trigger_log(
        &self,
        trigger: &Trigger,
        scheduled: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> JobTriggerLog {
        JobTriggerLog {
            id: 0, // 由存储层生成
            namespace: trigger.namespace.clone(),
            trigger_id: trigger.id,
            job_id: trigger.job_id,
            trigger_name: trigger.name.clone(),
            scheduled_time: Some(scheduled),
            fire_time: now,
            mis_fired: false,
            trigger_msg: None,
            fire_count: trigger.fire_count + 1,
        }
    }
}
