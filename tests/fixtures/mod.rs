// 統合テスト用のルックアップ・集約・データ生成ヘルパー
#![allow(dead_code)]

use async_trait::async_trait;
use immunopep::core::{Aggregate, Lookup, LookupError, LookupFactory, WorkItem};
use std::time::Duration;

/// ペイロードを大文字にして返すルックアップ（任意で遅延）
pub struct UppercaseLookup {
    delay: Duration,
}

#[async_trait]
impl Lookup for UppercaseLookup {
    type Payload = String;
    type Value = String;

    async fn lookup(&mut self, payload: &String) -> Result<String, LookupError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(payload.to_uppercase())
    }
}

pub struct UppercaseFactory {
    pub delay: Duration,
}

impl UppercaseFactory {
    pub fn new() -> Self {
        Self {
            delay: Duration::ZERO,
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl LookupFactory for UppercaseFactory {
    type Lookup = UppercaseLookup;

    async fn open(&self, _worker_id: usize) -> anyhow::Result<UppercaseLookup> {
        Ok(UppercaseLookup { delay: self.delay })
    }
}

/// `key\tvalue` 行を出力し、件数を返す集約
#[derive(Default)]
pub struct KeyValueAggregate {
    merged: usize,
}

impl Aggregate<String> for KeyValueAggregate {
    type Output = usize;

    fn header(&self) -> &str {
        "key\tvalue"
    }

    fn merge(&mut self, key: &str, value: String) -> Vec<String> {
        self.merged += 1;
        vec![format!("{key}\t{value}")]
    }

    fn finish(self) -> usize {
        self.merged
    }
}

/// `t0..t{n-1}` のタスク列
pub fn tasks(count: usize) -> Vec<WorkItem<String>> {
    (0..count)
        .map(|i| WorkItem::new(format!("t{i}"), format!("payload-{i}")))
        .collect()
}

/// ソート済みの出力行
pub fn sorted(mut rows: Vec<String>) -> Vec<String> {
    rows.sort();
    rows
}

pub const ALLELES: [&str; 7] = [
    "HLA-A01:01",
    "HLA-A02:01",
    "HLA-B07:02",
    "HLA-B08:01",
    "HLA-C07:01",
    "HLA-C07:02",
    "HLA-C04:01",
];

/// 結合ペプチドのフラットファイル（アレルごと）
pub fn binder_flat_files() -> Vec<(&'static str, &'static str)> {
    vec![
        ("HLA-A01:01", "MKTAYIAKQ\nKTAYIAKQR\n"),
        ("HLA-A02:01", "KTAYIAKQR\nSIINFEKL\n"),
        ("HLA-B07:02", "SIINFEKL\nGILGFVFTL\n"),
        ("HLA-B08:01", "GILGFVFTL\n"),
        ("HLA-C07:01", "NLVPMVATV\n"),
        ("HLA-C07:02", "NLVPMVATV\nYLQPRTFLL\n"),
        ("HLA-C04:01", "AAAAAAAAA\n"),
    ]
}
