/// Localized terminal output for the judgewatch CLI.
/// Locale can be selected via the `--locale` CLI flag (e.g. `--locale zh`).

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Locale {
    #[default]
    En,
    Zh,
}

impl Locale {
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "zh" | "zh-cn" | "zh_cn" | "zh-hans" | "zh-tw" | "zh_tw" => Self::Zh,
            _ => Self::En,
        }
    }
}

pub struct Messages {
    pub run_started: &'static str,
    pub enqueued: &'static str,
    pub watching: &'static str,
    pub nothing_to_evaluate: &'static str,
    pub processing_complete: &'static str,
    pub run_failed: &'static str,
    pub monitoring_failed: &'static str,
    pub stopped: &'static str,
    pub finished_label: &'static str,
    pub pending_label: &'static str,
    pub running_label: &'static str,
    pub done_label: &'static str,
    pub failed_label: &'static str,
    pub total_label: &'static str,
    pub progress_label: &'static str,
    pub complete_label: &'static str,
    pub yes: &'static str,
    pub no: &'static str,
    pub status_unavailable: &'static str,
    pub error_prefix: &'static str,
    pub info_prefix: &'static str,
    pub state_prefix: &'static str,
}

pub static EN: Messages = Messages {
    run_started: "Run requested for queue",
    enqueued: "jobs enqueued, monitoring",
    watching: "Watching queue",
    nothing_to_evaluate: "Nothing to evaluate",
    processing_complete: "Processing complete",
    run_failed: "Run failed",
    monitoring_failed: "Monitoring failed",
    stopped: "Stopped",
    finished_label: "finished",
    pending_label: "pending",
    running_label: "running",
    done_label: "done",
    failed_label: "failed",
    total_label: "total",
    progress_label: "progress",
    complete_label: "complete",
    yes: "yes",
    no: "no",
    status_unavailable: "Job status unavailable",
    error_prefix: "ERR",
    info_prefix: "INFO",
    state_prefix: "STATE",
};

pub static ZH: Messages = Messages {
    run_started: "已请求运行队列",
    enqueued: "个任务已入队，正在监控",
    watching: "正在监控队列",
    nothing_to_evaluate: "没有需要评测的任务",
    processing_complete: "处理完成",
    run_failed: "运行失败",
    monitoring_failed: "监控失败",
    stopped: "已停止",
    finished_label: "已结束",
    pending_label: "等待中",
    running_label: "运行中",
    done_label: "完成",
    failed_label: "失败",
    total_label: "总数",
    progress_label: "进度",
    complete_label: "全部结束",
    yes: "是",
    no: "否",
    status_unavailable: "无法获取任务状态",
    error_prefix: "错误",
    info_prefix: "信息",
    state_prefix: "状态",
};

pub fn get_messages(locale: Locale) -> &'static Messages {
    match locale {
        Locale::En => &EN,
        Locale::Zh => &ZH,
    }
}
