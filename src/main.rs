use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Arg, Command};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tasker_core::traits::JobExecutor;
use tasker_core::SchedulerConfig;
use tasker_dispatcher::SchedulerCoordinator;
use tasker_infrastructure::MemoryTaskStore;
use tasker_worker::{HttpJobExecutor, NativeCallableRegistry, NativeJobExecutor, ShellJobExecutor};

#[tokio::main]
async fn main() -> Result<()> {
    // 解析命令行参数
    let matches = Command::new("tasker")
        .version("1.0.0")
        .about("分布式定时任务调度系统")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径"),
        )
        .arg(
            Arg::new("namespace")
                .short('n')
                .long("namespace")
                .value_name("NAMESPACE")
                .help("命名空间(覆盖配置文件)"),
        )
        .arg(
            Arg::new("instance-name")
                .long("instance-name")
                .value_name("NAME")
                .help("实例名(覆盖配置文件)"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别")
                .value_parser(["trace", "debug", "info", "warn", "error"])
                .default_value("info"),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式")
                .value_parser(["json", "pretty"])
                .default_value("pretty"),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config");
    let log_level = matches.get_one::<String>("log-level").unwrap();
    let log_format = matches.get_one::<String>("log-format").unwrap();

    // 初始化日志系统
    init_logging(log_level, log_format)?;

    // 加载配置
    let mut config = SchedulerConfig::load(config_path.map(|path| path.as_str()))
        .with_context(|| format!("加载配置失败: {config_path:?}"))?;
    if let Some(namespace) = matches.get_one::<String>("namespace") {
        config.namespace = namespace.clone();
    }
    if let Some(instance_name) = matches.get_one::<String>("instance-name") {
        config.instance_name = instance_name.clone();
    }

    info!("启动分布式定时任务调度系统");
    info!(
        "namespace={} | instance_name={}",
        config.namespace, config.instance_name
    );

    // 嵌入式部署: 使用内存存储，单进程即可运行；
    // 集群部署时由外部协作方提供共享存储的TaskStore实现
    let store = Arc::new(MemoryTaskStore::new());
    let native_registry = Arc::new(NativeCallableRegistry::new());
    let executors: Vec<Arc<dyn JobExecutor>> = vec![
        Arc::new(HttpJobExecutor::new()),
        Arc::new(ShellJobExecutor::new(config.shell_working_dir.clone())),
        Arc::new(NativeJobExecutor::new(native_registry)),
    ];
    let coordinator = SchedulerCoordinator::new(config, store, executors);
    coordinator.clone().start().await.context("启动调度器失败")?;

    // 等待关闭信号
    wait_for_shutdown_signal().await;
    info!("收到关闭信号，开始优雅关闭...");
    if let Err(e) = coordinator.stop() {
        warn!("停止调度器失败: {e}");
    }
    // 给在途任务一点完成时间
    tokio::time::sleep(Duration::from_millis(500)).await;

    info!("分布式定时任务调度系统已退出");
    Ok(())
}

/// 初始化日志系统
fn init_logging(log_level: &str, log_format: &str) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let registry = tracing_subscriber::registry().with(env_filter);
    match log_format {
        "json" => {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
                .context("初始化JSON日志格式失败")?;
        }
        "pretty" => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty())
                .try_init()
                .context("初始化Pretty日志格式失败")?;
        }
        _ => {
            return Err(anyhow::anyhow!("不支持的日志格式: {log_format}"));
        }
    }
    Ok(())
}

/// 等待关闭信号
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("安装Ctrl+C信号处理器失败");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("安装SIGTERM信号处理器失败")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("收到Ctrl+C信号");
        },
        _ = terminate => {
            info!("收到SIGTERM信号");
        },
    }
}
