use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::info;

use tasker_core::models::{JobDetail, JobType};
use tasker_core::traits::JobExecutor;
use tasker_core::{JobContext, Result, SchedulerError};

/// HTTP任务执行器
pub struct HttpJobExecutor {
    client: reqwest::Client,
}

/// 未指定超时时间时的默认请求超时(秒)
const DEFAULT_HTTP_TIMEOUT_SECONDS: u64 = 300;

impl HttpJobExecutor {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpJobExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobExecutor for HttpJobExecutor {
    fn support(&self, job_type: JobType) -> bool {
        job_type == JobType::Http
    }

    fn name(&self) -> &str {
        "http"
    }

    async fn exec(&self, ctx: &JobContext) -> Result<()> {
        let Some(JobDetail::Http {
            method,
            url,
            headers,
            body,
            timeout_seconds,
        }) = ctx.detail()
        else {
            return Err(SchedulerError::JobDetailNotFound {
                job_id: ctx.job().id,
            });
        };

        let mut request = match method.to_uppercase().as_str() {
            "GET" => self.client.get(url),
            "POST" => self.client.post(url),
            "PUT" => self.client.put(url),
            "DELETE" => self.client.delete(url),
            "PATCH" => self.client.patch(url),
            "HEAD" => self.client.head(url),
            other => {
                return Err(SchedulerError::InvalidJobParams(format!(
                    "不支持的HTTP方法: {other}"
                )));
            }
        };
        request = request.timeout(Duration::from_secs(
            timeout_seconds.unwrap_or(DEFAULT_HTTP_TIMEOUT_SECONDS),
        ));
        for (key, value) in headers {
            request = request.header(key.as_str(), value.as_str());
        }
        if let Some(body) = body {
            request = request.body(body.clone());
        }

        ctx.info(format!("HTTP请求开始: {method} {url}")).await?;
        let response = request
            .send()
            .await
            .map_err(|e| SchedulerError::JobExecution(format!("HTTP请求失败: {e}")))?;
        let status = response.status();
        let response_body = response
            .text()
            .await
            .unwrap_or_else(|e| format!("读取响应体失败: {e}"));
        ctx.info(format!("HTTP响应: status={status}")).await?;
        ctx.set_data("last_http_status", status.as_u16().into());

        if status.is_success() {
            ctx.info(response_body).await?;
            Ok(())
        } else {
            ctx.error(response_body).await?;
            Err(SchedulerError::JobExecution(format!(
                "HTTP请求返回非成功状态码: {status}"
            )))
        }
    }
}

/// Shell任务执行器
///
/// 把脚本内容写入工作目录下的临时脚本文件再交给对应的解释器执行，
/// stdout/stderr逐行写入控制台日志。超时由shell任务自己的timeout参数控制。
pub struct ShellJobExecutor {
    working_dir: PathBuf,
}

impl ShellJobExecutor {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
        }
    }
}

#[async_trait]
impl JobExecutor for ShellJobExecutor {
    fn support(&self, job_type: JobType) -> bool {
        job_type == JobType::Shell
    }

    fn name(&self) -> &str {
        "shell"
    }

    async fn exec(&self, ctx: &JobContext) -> Result<()> {
        let Some(JobDetail::Shell {
            shell_type,
            content,
            timeout_seconds,
        }) = ctx.detail()
        else {
            return Err(SchedulerError::JobDetailNotFound {
                job_id: ctx.job().id,
            });
        };

        std::fs::create_dir_all(&self.working_dir)
            .map_err(|e| SchedulerError::JobExecution(format!("创建工作目录失败: {e}")))?;
        let mut script = tempfile::Builder::new()
            .prefix("job-")
            .suffix(shell_type.file_suffix())
            .tempfile_in(&self.working_dir)
            .map_err(|e| SchedulerError::JobExecution(format!("创建脚本文件失败: {e}")))?;
        script
            .write_all(content.as_bytes())
            .map_err(|e| SchedulerError::JobExecution(format!("写入脚本文件失败: {e}")))?;
        script
            .flush()
            .map_err(|e| SchedulerError::JobExecution(format!("写入脚本文件失败: {e}")))?;

        let command_parts = shell_type.command();
        let mut command = Command::new(command_parts[0]);
        command.args(&command_parts[1..]);
        command.arg(script.path());
        command.current_dir(&self.working_dir);
        command.stdout(std::process::Stdio::piped());
        command.stderr(std::process::Stdio::piped());
        command.kill_on_drop(true);

        ctx.info(format!("执行shell脚本: type={shell_type:?}")).await?;
        let mut child = command
            .spawn()
            .map_err(|e| SchedulerError::JobExecution(format!("启动shell进程失败: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SchedulerError::JobExecution("无法获取stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| SchedulerError::JobExecution("无法获取stderr".to_string()))?;

        // stdout/stderr逐行捕获到控制台日志
        let capture_stdout = async {
            let mut reader = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = reader.next_line().await {
                ctx.info(line).await?;
            }
            Ok::<(), SchedulerError>(())
        };
        let capture_stderr = async {
            let mut reader = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = reader.next_line().await {
                ctx.error(line).await?;
            }
            Ok::<(), SchedulerError>(())
        };

        let wait_child = async {
            match timeout_seconds {
                Some(seconds) => {
                    match tokio::time::timeout(Duration::from_secs(*seconds), child.wait()).await {
                        Ok(status) => status
                            .map_err(|e| SchedulerError::JobExecution(format!("等待进程结束失败: {e}"))),
                        Err(_) => {
                            // 超时，尽力终止子进程
                            let _ = child.kill().await;
                            Err(SchedulerError::JobExecution(format!(
                                "shell脚本执行超时({seconds}秒)，已终止进程"
                            )))
                        }
                    }
                }
                None => child
                    .wait()
                    .await
                    .map_err(|e| SchedulerError::JobExecution(format!("等待进程结束失败: {e}"))),
            }
        };

        let (stdout_result, stderr_result, exit_status) =
            tokio::join!(capture_stdout, capture_stderr, wait_child);
        stdout_result?;
        stderr_result?;
        let exit_status = exit_status?;

        if exit_status.success() {
            Ok(())
        } else {
            Err(SchedulerError::JobExecution(format!(
                "shell脚本执行失败，退出码: {:?}",
                exit_status.code()
            )))
        }
    }
}

/// 进程内可调用对象，native任务的执行目标
pub type NativeCallable =
    Arc<dyn for<'a> Fn(&'a JobContext) -> BoxFuture<'a, Result<()>> + Send + Sync>;

/// 进程内可调用对象目录，由外部协作方在启动时注册
#[derive(Default)]
pub struct NativeCallableRegistry {
    callables: RwLock<HashMap<String, NativeCallable>>,
}

impl NativeCallableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以闭包形式注册可调用对象
    pub fn register_fn<F>(&self, name: impl Into<String>, callable: F)
    where
        F: for<'a> Fn(&'a JobContext) -> BoxFuture<'a, Result<()>> + Send + Sync + 'static,
    {
        self.register(name, Arc::new(callable));
    }

    pub fn register(&self, name: impl Into<String>, callable: NativeCallable) {
        let name = name.into();
        info!("注册native可调用对象: {name}");
        self.callables
            .write()
            .expect("callables锁中毒")
            .insert(name, callable);
    }

    pub fn get(&self, name: &str) -> Option<NativeCallable> {
        self.callables
            .read()
            .expect("callables锁中毒")
            .get(name)
            .cloned()
    }
}

/// Native任务执行器，调用进程内注册的可调用对象
pub struct NativeJobExecutor {
    registry: Arc<NativeCallableRegistry>,
}

impl NativeJobExecutor {
    pub fn new(registry: Arc<NativeCallableRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl JobExecutor for NativeJobExecutor {
    fn support(&self, job_type: JobType) -> bool {
        job_type == JobType::Native
    }

    fn name(&self) -> &str {
        "native"
    }

    async fn exec(&self, ctx: &JobContext) -> Result<()> {
        let Some(JobDetail::Native { callable }) = ctx.detail() else {
            return Err(SchedulerError::JobDetailNotFound {
                job_id: ctx.job().id,
            });
        };
        let target = self.registry.get(callable).ok_or_else(|| {
            SchedulerError::JobExecution(format!("未注册的native可调用对象: {callable}"))
        })?;
        ctx.debug(format!("调用native可调用对象: {callable}")).await?;
        target(ctx).await
    }
}

/// Mock任务执行器(测试用)
pub struct MockJobExecutor {
    job_type: JobType,
    should_succeed: bool,
    order: i32,
    attempts: AtomicU32,
}

impl MockJobExecutor {
    pub fn new(job_type: JobType, should_succeed: bool) -> Self {
        Self {
            job_type,
            should_succeed,
            order: 0,
            attempts: AtomicU32::new(0),
        }
    }

    pub fn with_order(job_type: JobType, should_succeed: bool, order: i32) -> Self {
        Self {
            job_type,
            should_succeed,
            order,
            attempts: AtomicU32::new(0),
        }
    }

    /// 累计被调用的次数
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobExecutor for MockJobExecutor {
    fn support(&self, job_type: JobType) -> bool {
        job_type == self.job_type
    }

    fn order(&self) -> i32 {
        self.order
    }

    fn name(&self) -> &str {
        "mock"
    }

    async fn exec(&self, ctx: &JobContext) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        ctx.info(format!("mock执行: job={}", ctx.job().name)).await?;
        if self.should_succeed {
            Ok(())
        } else {
            Err(SchedulerError::JobExecution("mock执行失败".to_string()))
        }
    }
}
