use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use tasker_core::models::{
    CommandState, Job, JobConsoleLog, JobDetail, JobLog, JobLogStatus, JobTriggerLog,
    SchedulerCommand, SchedulerRegistration, Trigger,
};
use tasker_core::traits::TaskStore;
use tasker_core::{Result, SchedulerError};

use crate::snowflake::SnowflakeIdGenerator;

/// 内存版TaskStore实现
///
/// 嵌入式部署和测试使用的存储契约参考实现。认领原语用HashSet的
/// 首次插入语义模拟唯一约束insert，与关系型实现的行为一致。
pub struct MemoryTaskStore {
    id_generator: SnowflakeIdGenerator,
    /// 测试用的时钟偏移(毫秒)，模拟存储权威时间
    clock_offset_millis: AtomicI64,
    state: RwLock<StoreState>,
}

#[derive(Default)]
struct StoreState {
    schedulers: HashMap<(String, String), SchedulerRegistration>,
    jobs: HashMap<(String, i64), Job>,
    job_details: HashMap<(String, i64), JobDetail>,
    triggers: HashMap<(String, i64), Trigger>,
    /// 已认领的触发器触发 (namespace, trigger_id, fire_time_millis)
    claimed_triggers: HashSet<(String, i64, i64)>,
    /// 已认领的任务执行 (namespace, job_id, fire_time_millis)
    claimed_jobs: HashSet<(String, i64, i64)>,
    trigger_logs: Vec<JobTriggerLog>,
    job_logs: HashMap<i64, JobLog>,
    console_logs: Vec<JobConsoleLog>,
    commands: HashMap<i64, SchedulerCommand>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self {
            id_generator: SnowflakeIdGenerator::from_names("memory", "store"),
            clock_offset_millis: AtomicI64::new(0),
            state: RwLock::new(StoreState::default()),
        }
    }

    /// 拨动存储时钟(测试用)
    pub fn advance_clock(&self, delta: Duration) {
        self.clock_offset_millis
            .fetch_add(delta.num_milliseconds(), Ordering::SeqCst);
    }

    /// 查询任务的全部执行日志(测试用)
    pub async fn job_logs_for(&self, namespace: &str, job_id: i64) -> Vec<JobLog> {
        let state = self.state.read().await;
        let mut logs: Vec<JobLog> = state
            .job_logs
            .values()
            .filter(|log| log.namespace == namespace && log.job_id == job_id)
            .cloned()
            .collect();
        logs.sort_by_key(|log| log.id);
        logs
    }

    /// 查询一次执行的控制台日志(测试用)
    pub async fn console_lines(&self, job_log_id: i64) -> Vec<JobConsoleLog> {
        let state = self.state.read().await;
        let mut lines: Vec<JobConsoleLog> = state
            .console_logs
            .iter()
            .filter(|line| line.job_log_id == job_log_id)
            .cloned()
            .collect();
        lines.sort_by_key(|line| line.line_num);
        lines
    }

    /// 查询触发器的触发日志(测试用)
    pub async fn trigger_logs_for(&self, namespace: &str, trigger_id: i64) -> Vec<JobTriggerLog> {
        let state = self.state.read().await;
        let mut logs: Vec<JobTriggerLog> = state
            .trigger_logs
            .iter()
            .filter(|log| log.namespace == namespace && log.trigger_id == trigger_id)
            .cloned()
            .collect();
        logs.sort_by_key(|log| log.id);
        logs
    }
}

impl Default for MemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn next_id(&self) -> Result<i64> {
        Ok(self.id_generator.next_id())
    }

    async fn current_time_millis(&self) -> Result<i64> {
        Ok(Utc::now().timestamp_millis() + self.clock_offset_millis.load(Ordering::SeqCst))
    }

    async fn register_scheduler(
        &self,
        mut registration: SchedulerRegistration,
    ) -> Result<SchedulerRegistration> {
        let now = self.current_datetime().await?;
        let mut state = self.state.write().await;
        let key = (
            registration.namespace.clone(),
            registration.instance_name.clone(),
        );
        if let Some(existing) = state.schedulers.get(&key) {
            registration.id = existing.id;
        } else {
            registration.id = self.id_generator.next_id();
        }
        registration.last_heartbeat = now;
        registration.available = true;
        state.schedulers.insert(key, registration.clone());
        Ok(registration)
    }

    async fn heartbeat(&self, namespace: &str, instance_name: &str) -> Result<()> {
        let now = self.current_datetime().await?;
        let mut state = self.state.write().await;
        let key = (namespace.to_string(), instance_name.to_string());
        let registration = state.schedulers.get_mut(&key).ok_or_else(|| {
            SchedulerError::Store(format!("调度器节点未注册: {namespace}/{instance_name}"))
        })?;
        registration.last_heartbeat = now;
        Ok(())
    }

    async fn available_schedulers(&self, namespace: &str) -> Result<Vec<SchedulerRegistration>> {
        let state = self.state.read().await;
        let mut schedulers: Vec<SchedulerRegistration> = state
            .schedulers
            .values()
            .filter(|registration| registration.namespace == namespace && registration.available)
            .cloned()
            .collect();
        schedulers.sort_by(|a, b| a.instance_name.cmp(&b.instance_name));
        Ok(schedulers)
    }

    async fn save_job(&self, job: &Job) -> Result<Job> {
        let mut state = self.state.write().await;
        let mut job = job.clone();
        if job.id == 0 {
            job.id = self.id_generator.next_id();
        }
        state
            .jobs
            .insert((job.namespace.clone(), job.id), job.clone());
        Ok(job)
    }

    async fn get_job(&self, namespace: &str, job_id: i64) -> Result<Option<Job>> {
        let state = self.state.read().await;
        Ok(state.jobs.get(&(namespace.to_string(), job_id)).cloned())
    }

    async fn update_job_data(
        &self,
        namespace: &str,
        job_id: i64,
        job_data: &serde_json::Value,
    ) -> Result<()> {
        let now = self.current_datetime().await?;
        let mut state = self.state.write().await;
        let job = state
            .jobs
            .get_mut(&(namespace.to_string(), job_id))
            .ok_or_else(|| SchedulerError::JobNotFound {
                namespace: namespace.to_string(),
                id: job_id,
            })?;
        job.job_data = job_data.clone();
        job.updated_at = now;
        Ok(())
    }

    async fn increment_run_count(&self, namespace: &str, job_id: i64) -> Result<i64> {
        let mut state = self.state.write().await;
        let job = state
            .jobs
            .get_mut(&(namespace.to_string(), job_id))
            .ok_or_else(|| SchedulerError::JobNotFound {
                namespace: namespace.to_string(),
                id: job_id,
            })?;
        job.run_count += 1;
        Ok(job.run_count)
    }

    async fn job_detail(&self, namespace: &str, job_id: i64) -> Result<Option<JobDetail>> {
        let state = self.state.read().await;
        Ok(state
            .job_details
            .get(&(namespace.to_string(), job_id))
            .cloned())
    }

    async fn save_job_detail(
        &self,
        namespace: &str,
        job_id: i64,
        detail: &JobDetail,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        state
            .job_details
            .insert((namespace.to_string(), job_id), detail.clone());
        Ok(())
    }

    async fn save_trigger(&self, trigger: &Trigger) -> Result<Trigger> {
        let mut state = self.state.write().await;
        let mut trigger = trigger.clone();
        if trigger.id == 0 {
            trigger.id = self.id_generator.next_id();
        }
        state
            .triggers
            .insert((trigger.namespace.clone(), trigger.id), trigger.clone());
        Ok(trigger)
    }

    async fn get_trigger(&self, namespace: &str, trigger_id: i64) -> Result<Option<Trigger>> {
        let state = self.state.read().await;
        Ok(state
            .triggers
            .get(&(namespace.to_string(), trigger_id))
            .cloned())
    }

    async fn enabled_triggers(&self, namespace: &str) -> Result<Vec<Trigger>> {
        let state = self.state.read().await;
        let mut triggers: Vec<Trigger> = state
            .triggers
            .values()
            .filter(|trigger| trigger.namespace == namespace && !trigger.disable)
            .cloned()
            .collect();
        triggers.sort_by_key(|trigger| trigger.id);
        Ok(triggers)
    }

    async fn due_triggers(&self, namespace: &str, now: DateTime<Utc>) -> Result<Vec<Trigger>> {
        let state = self.state.read().await;
        let mut triggers: Vec<Trigger> = state
            .triggers
            .values()
            .filter(|trigger| {
                trigger.namespace == namespace
                    && !trigger.disable
                    && trigger
                        .next_fire_time
                        .map(|next| next <= now)
                        .unwrap_or(false)
            })
            .cloned()
            .collect();
        triggers.sort_by_key(|trigger| trigger.id);
        Ok(triggers)
    }

    async fn update_next_fire_time(
        &self,
        namespace: &str,
        trigger_id: i64,
        next_fire_time: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let now = self.current_datetime().await?;
        let mut state = self.state.write().await;
        if let Some(trigger) = state.triggers.get_mut(&(namespace.to_string(), trigger_id)) {
            trigger.next_fire_time = next_fire_time;
            trigger.updated_at = now;
        }
        Ok(())
    }

    async fn update_fire_times(
        &self,
        namespace: &str,
        trigger_id: i64,
        last_fire_time: Option<DateTime<Utc>>,
        next_fire_time: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let now = self.current_datetime().await?;
        let mut state = self.state.write().await;
        match state.triggers.get_mut(&(namespace.to_string(), trigger_id)) {
            Some(trigger) => {
                trigger.last_fire_time = last_fire_time;
                trigger.next_fire_time = next_fire_time;
                trigger.fire_count += 1;
                trigger.updated_at = now;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn try_claim_trigger(
        &self,
        namespace: &str,
        trigger_id: i64,
        fire_time: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        let claimed = state.claimed_triggers.insert((
            namespace.to_string(),
            trigger_id,
            fire_time.timestamp_millis(),
        ));
        if !claimed {
            debug!(trigger_id, %fire_time, "触发器触发已被认领");
        }
        Ok(claimed)
    }

    async fn try_claim_job(
        &self,
        namespace: &str,
        job_id: i64,
        fire_time: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        let claimed = state.claimed_jobs.insert((
            namespace.to_string(),
            job_id,
            fire_time.timestamp_millis(),
        ));
        if !claimed {
            debug!(job_id, %fire_time, "任务执行已被认领");
        }
        Ok(claimed)
    }

    async fn save_trigger_log(&self, log: &JobTriggerLog) -> Result<JobTriggerLog> {
        let mut state = self.state.write().await;
        let mut log = log.clone();
        if log.id == 0 {
            log.id = self.id_generator.next_id();
        }
        state.trigger_logs.push(log.clone());
        Ok(log)
    }

    async fn save_job_log(&self, log: &JobLog) -> Result<JobLog> {
        let mut state = self.state.write().await;
        let mut log = log.clone();
        if log.id == 0 {
            log.id = self.id_generator.next_id();
        }
        state.job_logs.insert(log.id, log.clone());
        Ok(log)
    }

    async fn update_job_log(&self, log: &JobLog) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.job_logs.contains_key(&log.id) {
            return Err(SchedulerError::Store(format!(
                "JobLog不存在: id={}",
                log.id
            )));
        }
        state.job_logs.insert(log.id, log.clone());
        Ok(())
    }

    async fn running_job_count(&self, namespace: &str, job_id: i64) -> Result<i64> {
        let state = self.state.read().await;
        Ok(state
            .job_logs
            .values()
            .filter(|log| {
                log.namespace == namespace
                    && log.job_id == job_id
                    && log.status == JobLogStatus::Running
            })
            .count() as i64)
    }

    async fn append_console_line(&self, line: &JobConsoleLog) -> Result<()> {
        let mut state = self.state.write().await;
        let mut line = line.clone();
        if line.id == 0 {
            line.id = self.id_generator.next_id();
        }
        state.console_logs.push(line);
        Ok(())
    }

    async fn save_command(&self, command: &SchedulerCommand) -> Result<SchedulerCommand> {
        let mut state = self.state.write().await;
        let mut command = command.clone();
        if command.id == 0 {
            command.id = self.id_generator.next_id();
        }
        state.commands.insert(command.id, command.clone());
        Ok(command)
    }

    async fn pending_commands(
        &self,
        namespace: &str,
        instance_name: &str,
    ) -> Result<Vec<SchedulerCommand>> {
        let mut state = self.state.write().await;
        let mut taken = Vec::new();
        for command in state.commands.values_mut() {
            if command.namespace == namespace
                && command.state == CommandState::Pending
                && command
                    .instance_name
                    .as_deref()
                    .map(|target| target == instance_name)
                    .unwrap_or(true)
            {
                // 返回即占用，避免多个节点重复执行同一条指令
                command.state = CommandState::Running;
                taken.push(command.clone());
            }
        }
        taken.sort_by_key(|command| command.id);
        Ok(taken)
    }

    async fn finish_command(&self, command_id: i64) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(command) = state.commands.get_mut(&command_id) {
            command.state = CommandState::Done;
        }
        Ok(())
    }
}
