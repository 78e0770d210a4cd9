#[cfg(test)]
mod engine_tests {
    use std::sync::Arc;

    use chrono::Utc;
    use serde_json::json;

    use tasker_core::models::{
        Job, JobDetail, JobLogStatus, JobType, SchedulerRegistration,
    };
    use tasker_core::traits::{JobExecutor, TaskStore};
    use tasker_infrastructure::MemoryTaskStore;

    use crate::engine::JobExecutionEngine;
    use crate::executors::{MockJobExecutor, NativeCallableRegistry, NativeJobExecutor};

    fn registration() -> SchedulerRegistration {
        SchedulerRegistration::new("default", "node-a")
    }

    async fn seed_job(store: &MemoryTaskStore, job_type: JobType, max_retry_count: i32) -> Job {
        let mut job = Job::new("default", "test_job", job_type);
        job.max_retry_count = max_retry_count;
        store.save_job(&job).await.unwrap()
    }

    #[tokio::test]
    async fn test_retry_exhaustion_marks_job_log_failed() {
        let store = Arc::new(MemoryTaskStore::new());
        let executor = Arc::new(MockJobExecutor::new(JobType::Http, false));
        let engine = JobExecutionEngine::new(store.clone(), vec![executor.clone()]);

        // max_retry_count=2 -> 共尝试3次
        let job = seed_job(&store, JobType::Http, 2).await;
        let job_log = engine
            .execute(job, Some(1), 1, Utc::now(), registration())
            .await
            .unwrap();

        assert_eq!(executor.attempts(), 3);
        assert_eq!(job_log.status, JobLogStatus::Failed);
        assert_eq!(job_log.retry_count, 2);
        assert!(job_log.error_info.is_some());
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let store = Arc::new(MemoryTaskStore::new());
        let executor = Arc::new(MockJobExecutor::new(JobType::Http, true));
        let engine = JobExecutionEngine::new(store.clone(), vec![executor.clone()]);

        let job = seed_job(&store, JobType::Http, 2).await;
        let job_log = engine
            .execute(job, Some(1), 1, Utc::now(), registration())
            .await
            .unwrap();

        assert_eq!(executor.attempts(), 1);
        assert_eq!(job_log.status, JobLogStatus::Success);
        assert_eq!(job_log.retry_count, 0);
        assert!(job_log.end_time.is_some());
    }

    #[tokio::test]
    async fn test_unsupported_job_type_fails_fast() {
        let store = Arc::new(MemoryTaskStore::new());
        let engine = JobExecutionEngine::new(store.clone(), vec![]);

        let job = seed_job(&store, JobType::Script, 5).await;
        let job_log = engine
            .execute(job, Some(1), 1, Utc::now(), registration())
            .await
            .unwrap();

        // 无执行器命中时快速失败，不做重试
        assert_eq!(job_log.status, JobLogStatus::Failed);
        assert_eq!(job_log.retry_count, 0);
        assert!(job_log.error_info.unwrap().contains("暂不支持的任务类型"));
    }

    #[tokio::test]
    async fn test_executor_resolution_order_first_match_wins() {
        let store = Arc::new(MemoryTaskStore::new());
        let preferred = Arc::new(MockJobExecutor::with_order(JobType::Http, true, 1));
        let fallback = Arc::new(MockJobExecutor::with_order(JobType::Http, false, 10));
        // 注册顺序与优先级相反，引擎按order()升序解析
        let engine = JobExecutionEngine::new(
            store.clone(),
            vec![
                fallback.clone() as Arc<dyn JobExecutor>,
                preferred.clone() as Arc<dyn JobExecutor>,
            ],
        );

        let job = seed_job(&store, JobType::Http, 0).await;
        let job_log = engine
            .execute(job, Some(1), 1, Utc::now(), registration())
            .await
            .unwrap();

        assert_eq!(job_log.status, JobLogStatus::Success);
        assert_eq!(preferred.attempts(), 1);
        assert_eq!(fallback.attempts(), 0);
    }

    #[tokio::test]
    async fn test_job_data_written_back_when_update_enabled() {
        let store = Arc::new(MemoryTaskStore::new());
        let registry = Arc::new(NativeCallableRegistry::new());
        registry.register_fn("bump_counter", |ctx| {
            Box::pin(async move {
                let count = ctx
                    .get_data("count")
                    .and_then(|value| value.as_i64())
                    .unwrap_or(0);
                ctx.set_data("count", json!(count + 1));
                ctx.info(format!("counter bumped to {}", count + 1)).await?;
                Ok(())
            })
        });
        let engine = JobExecutionEngine::new(
            store.clone(),
            vec![Arc::new(NativeJobExecutor::new(registry))],
        );

        let mut job = Job::new("default", "counter_job", JobType::Native);
        job.is_update_data = true;
        job.job_data = json!({"count": 1});
        let job = store.save_job(&job).await.unwrap();
        store
            .save_job_detail(
                "default",
                job.id,
                &JobDetail::Native {
                    callable: "bump_counter".to_string(),
                },
            )
            .await
            .unwrap();

        let job_log = engine
            .execute(job.clone(), Some(1), 1, Utc::now(), registration())
            .await
            .unwrap();

        assert_eq!(job_log.status, JobLogStatus::Success);
        // 变更后的任务数据对后续触发可见
        let updated = store.get_job("default", job.id).await.unwrap().unwrap();
        assert_eq!(updated.job_data, json!({"count": 2}));
        assert_eq!(job_log.after_job_data.unwrap(), json!({"count": 2}).to_string());
    }

    #[tokio::test]
    async fn test_job_data_not_written_back_by_default() {
        let store = Arc::new(MemoryTaskStore::new());
        let registry = Arc::new(NativeCallableRegistry::new());
        registry.register_fn("set_flag", |ctx| {
            Box::pin(async move {
                ctx.set_data("flag", json!(true));
                Ok(())
            })
        });
        let engine = JobExecutionEngine::new(
            store.clone(),
            vec![Arc::new(NativeJobExecutor::new(registry))],
        );

        let mut job = Job::new("default", "flag_job", JobType::Native);
        job.job_data = json!({});
        let job = store.save_job(&job).await.unwrap();
        store
            .save_job_detail(
                "default",
                job.id,
                &JobDetail::Native {
                    callable: "set_flag".to_string(),
                },
            )
            .await
            .unwrap();

        engine
            .execute(job.clone(), Some(1), 1, Utc::now(), registration())
            .await
            .unwrap();

        // is_update_data=false，任务行数据保持不变
        let unchanged = store.get_job("default", job.id).await.unwrap().unwrap();
        assert_eq!(unchanged.job_data, json!({}));
    }

    #[tokio::test]
    async fn test_console_log_lines_strictly_increasing() {
        let store = Arc::new(MemoryTaskStore::new());
        let registry = Arc::new(NativeCallableRegistry::new());
        registry.register_fn("chatty", |ctx| {
            Box::pin(async move {
                ctx.debug("step 1").await?;
                ctx.info("step 2").await?;
                ctx.warn("step 3").await?;
                ctx.error("step 4").await?;
                ctx.info("step 5").await?;
                Ok(())
            })
        });
        let engine = JobExecutionEngine::new(
            store.clone(),
            vec![Arc::new(NativeJobExecutor::new(registry))],
        );

        let job = seed_job(&store, JobType::Native, 0).await;
        store
            .save_job_detail(
                "default",
                job.id,
                &JobDetail::Native {
                    callable: "chatty".to_string(),
                },
            )
            .await
            .unwrap();

        let job_log = engine
            .execute(job, Some(1), 1, Utc::now(), registration())
            .await
            .unwrap();

        // 不同级别交错写入，行号仍然从1开始严格递增无空洞
        let lines = store.console_lines(job_log.id).await;
        assert_eq!(lines.len(), 5);
        for (index, line) in lines.iter().enumerate() {
            assert_eq!(line.line_num, index as u32 + 1);
        }
    }

    #[tokio::test]
    async fn test_run_count_incremented_per_execution() {
        let store = Arc::new(MemoryTaskStore::new());
        let executor = Arc::new(MockJobExecutor::new(JobType::Http, true));
        let engine = JobExecutionEngine::new(store.clone(), vec![executor]);

        let job = seed_job(&store, JobType::Http, 0).await;
        for expected in 1..=3 {
            let current = store.get_job("default", job.id).await.unwrap().unwrap();
            let job_log = engine
                .execute(current, Some(1), 1, Utc::now(), registration())
                .await
                .unwrap();
            assert_eq!(job_log.run_count, expected);
        }
    }
}
