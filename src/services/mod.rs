pub mod activity_aggregation;
pub mod git_platforms;
pub mod llm;
pub mod notifier;
pub mod pagination;
pub mod report_formatter;
pub mod report_scheduler;
pub mod reporter;
