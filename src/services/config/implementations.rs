// 設定管理の具象実装

use crate::core::{CompletionStrategy, PipelineConfig, RetryPolicy};

/// デフォルト設定実装
#[derive(Debug, Clone)]
pub struct DefaultPipelineConfig {
    workers: usize,
    channel_capacity: usize,
    flush_threshold: usize,
    block_size: usize,
    progress_interval: usize,
    completion: CompletionStrategy,
    retry: RetryPolicy,
}

impl DefaultPipelineConfig {
    pub const DEFAULT_FLUSH_THRESHOLD: usize = 100;
    pub const DEFAULT_BLOCK_SIZE: usize = 1000;
    pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;
    pub const DEFAULT_PROGRESS_INTERVAL: usize = 1000;

    pub fn new(workers: usize) -> Self {
        Self {
            workers,
            channel_capacity: Self::DEFAULT_CHANNEL_CAPACITY,
            flush_threshold: Self::DEFAULT_FLUSH_THRESHOLD,
            block_size: Self::DEFAULT_BLOCK_SIZE,
            progress_interval: Self::DEFAULT_PROGRESS_INTERVAL,
            completion: CompletionStrategy::default(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    pub fn with_flush_threshold(mut self, threshold: usize) -> Self {
        self.flush_threshold = threshold;
        self
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_progress_interval(mut self, interval: usize) -> Self {
        self.progress_interval = interval;
        self
    }

    pub fn with_completion_strategy(mut self, strategy: CompletionStrategy) -> Self {
        self.completion = strategy;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

impl Default for DefaultPipelineConfig {
    fn default() -> Self {
        Self::new(num_cpus::get().max(1))
    }
}

impl PipelineConfig for DefaultPipelineConfig {
    fn worker_count(&self) -> usize {
        self.workers
    }

    fn channel_capacity(&self) -> usize {
        self.channel_capacity
    }

    fn flush_threshold(&self) -> usize {
        self.flush_threshold
    }

    fn block_size(&self) -> usize {
        self.block_size
    }

    fn progress_interval(&self) -> usize {
        self.progress_interval
    }

    fn completion_strategy(&self) -> CompletionStrategy {
        self.completion
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry.clone()
    }
}
