use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 任务定义
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub namespace: String,
    pub name: String,
    pub job_type: JobType,
    /// 当前节点允许的最大重入执行数量
    pub max_reentry: i32,
    /// 是否允许多节点并发执行，禁止时使用存储层的原子认领实现互斥
    pub allow_concurrent: bool,
    /// 执行失败后的最大重试次数(不含首次执行)
    pub max_retry_count: i32,
    pub route_strategy: RouteStrategy,
    pub load_balance: LoadBalance,
    /// 执行结束后是否把job_data回写到任务行
    pub is_update_data: bool,
    /// 跨执行传递的任务数据(JSON对象)
    pub job_data: serde_json::Value,
    pub disable: bool,
    /// 任务执行总次数(持久化计数器，轮询/随机策略的种子)
    pub run_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 任务类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Http,
    Native,
    Script,
    Shell,
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            JobType::Http => "http",
            JobType::Native => "native",
            JobType::Script => "script",
            JobType::Shell => "shell",
        };
        write!(f, "{text}")
    }
}

/// 路由策略，控制任务允许在哪些调度器节点上执行
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", content = "instances", rename_all = "snake_case")]
pub enum RouteStrategy {
    /// 不启用
    #[default]
    None,
    /// 指定节点优先，集合内无在线节点时回退到全部在线节点
    FirstPreferred(Vec<String>),
    /// 固定节点白名单，交集为空时本轮无可执行节点(下次轮询重试)
    Whitelist(Vec<String>),
    /// 固定节点黑名单
    Blacklist(Vec<String>),
}

/// 负载均衡策略，在候选节点中选出唯一的执行节点
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalance {
    /// 抢占，全部候选节点通过存储层原子认领竞争
    #[default]
    Preemptive,
    /// 随机(以run_count为种子，保证各节点计算结果一致)
    Random,
    /// 轮询(基于持久化的run_count计数器)
    RoundRobin,
    /// 一致性HASH
    ConsistentHash,
}

/// 任务类型相关的详情数据，每次执行时解析一次
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobDetail {
    Http {
        method: String,
        url: String,
        headers: HashMap<String, String>,
        body: Option<String>,
        timeout_seconds: Option<u64>,
    },
    Native {
        /// 进程内已注册的可调用对象名称
        callable: String,
    },
    Shell {
        shell_type: ShellType,
        content: String,
        timeout_seconds: Option<u64>,
    },
}

/// shell脚本类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShellType {
    Bash,
    Sh,
    Ash,
    Powershell,
    Cmd,
    Python,
    Node,
    Php,
}

impl ShellType {
    /// 脚本类型对应的command命令
    pub fn command(&self) -> Vec<&'static str> {
        match self {
            ShellType::Bash => vec!["/bin/bash"],
            ShellType::Sh => vec!["/bin/sh"],
            ShellType::Ash => vec!["/bin/ash"],
            ShellType::Powershell => vec!["powershell"],
            ShellType::Cmd => vec!["cmd", "/q", "/c"],
            ShellType::Python => vec!["python"],
            ShellType::Node => vec!["node"],
            ShellType::Php => vec!["php"],
        }
    }

    /// 脚本类型对应的文件后缀
    pub fn file_suffix(&self) -> &'static str {
        match self {
            ShellType::Bash | ShellType::Sh | ShellType::Ash => ".sh",
            ShellType::Powershell => ".ps1",
            ShellType::Cmd => ".bat",
            ShellType::Python => ".py",
            ShellType::Node => ".js",
            ShellType::Php => ".php",
        }
    }
}

impl Job {
    /// 创建新任务
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, job_type: JobType) -> Self {
        let now = Utc::now();
        Self {
            id: 0, // 由存储层生成
            namespace: namespace.into(),
            name: name.into(),
            job_type,
            max_reentry: 0,
            allow_concurrent: false,
            max_retry_count: 0,
            route_strategy: RouteStrategy::None,
            load_balance: LoadBalance::Preemptive,
            is_update_data: false,
            job_data: serde_json::Value::Object(serde_json::Map::new()),
            disable: false,
            run_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// 检查任务是否可调度
    pub fn is_enabled(&self) -> bool {
        !self.disable
    }

    /// 当前节点允许的重入上限，禁止多节点并发执行时为0
    pub fn reentry_limit(&self) -> i32 {
        if self.allow_concurrent {
            self.max_reentry.max(0)
        } else {
            0
        }
    }
}
