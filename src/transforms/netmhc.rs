// 結合予測ツール出力からIC50列を抽出

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use tracing::{info, warn};

/// IC50が入っている列（0始まり）
pub const IC50_COLUMN: usize = 12;

/// 予測ブロックの開始行の先頭語
const BLOCK_START: &str = "Pos";

/// 区切り線
const RULE_PREFIX: &str = "---";

/// 予測出力を1行ずつ読み、IC50値を順に返す
///
/// 予測ブロックは `Pos` で始まるヘッダー行の次から空行までで、区切り線は無視する。
pub fn extract_ic50_values<R: BufRead>(reader: R) -> Result<Vec<String>> {
    let mut values = Vec::new();
    let mut in_block = false;
    for (line_index, line) in reader.lines().enumerate() {
        let line = line.context("予測出力の読み込みに失敗しました")?;
        if in_block {
            if line.trim().is_empty() {
                in_block = false;
            } else if !line.starts_with(RULE_PREFIX) {
                match line.split_whitespace().nth(IC50_COLUMN) {
                    Some(value) => values.push(value.to_string()),
                    None => warn!(line = line_index + 1, "列数が不足している予測行をスキップします"),
                }
            }
        } else if line.trim().starts_with(BLOCK_START) {
            in_block = true;
        }
    }
    Ok(values)
}

/// 予測出力ファイルを解析し、IC50値を1行1件で書き出す
pub fn parse_netmhc_file(input: &Path, output: &Path) -> Result<usize> {
    let file = File::open(input)
        .with_context(|| format!("予測出力ファイルを開けません: {}", input.display()))?;
    let values = extract_ic50_values(BufReader::new(file))?;

    let file = File::create(output)
        .with_context(|| format!("出力ファイルを作成できません: {}", output.display()))?;
    let mut writer = BufWriter::new(file);
    for value in &values {
        writeln!(writer, "{value}")?;
    }
    writer.flush().context("出力ファイルの書き込みに失敗しました")?;

    info!(file = %input.display(), values = values.len(), "予測出力を解析しました");
    Ok(values.len())
}
