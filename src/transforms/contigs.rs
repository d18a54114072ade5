// ユニークなn-merをn-1文字の重なりで連結してコンティグを作る

use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use tracing::{info, warn};

/// 連結結果の統計
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ContigStats {
    pub nmers: usize,
    pub contigs: usize,
    pub mean_length: f64,
    pub min_length: usize,
    pub max_length: usize,
}

/// 貪欲法によるコンティグ組み立て
///
/// 保持中の配列は `nterm`（先頭n-1文字 → 残り）と `cterm`（末尾n-1文字 → 残り）の
/// 両方に登録される。
#[derive(Debug)]
pub struct ContigAssembler {
    overlap: usize,
    nterm: HashMap<String, Vec<String>>,
    cterm: HashMap<String, Vec<String>>,
    added: usize,
}

fn remove_value(index: &mut HashMap<String, Vec<String>>, key: &str, value: &str) {
    if let Some(values) = index.get_mut(key) {
        if let Some(position) = values.iter().position(|v| v == value) {
            values.remove(position);
        }
        if values.is_empty() {
            index.remove(key);
        }
    }
}

fn take_first(index: &mut HashMap<String, Vec<String>>, key: &str) -> Option<String> {
    let values = index.get_mut(key)?;
    let first = (!values.is_empty()).then(|| values.remove(0));
    if values.is_empty() {
        index.remove(key);
    }
    first
}

impl ContigAssembler {
    pub fn new(n: usize) -> Result<Self> {
        if n < 2 {
            bail!("n-merの長さは2以上である必要があります");
        }
        Ok(Self {
            overlap: n - 1,
            nterm: HashMap::new(),
            cterm: HashMap::new(),
            added: 0,
        })
    }

    /// n-merを1件追加し、連結できる相手がいなくなるまで繰り返し連結する
    pub fn add(&mut self, nmer: &str) -> Result<()> {
        if !nmer.is_ascii() || nmer.len() <= self.overlap {
            bail!("n-merが不正です: {nmer}");
        }
        self.added += 1;

        let overlap = self.overlap;
        let mut sequence = nmer.to_string();
        loop {
            let split = sequence.len() - overlap;
            let head = &sequence[..overlap];
            let tail = &sequence[split..];

            if let Some(prefix) = take_first(&mut self.cterm, head) {
                // 相手の末尾と自分の先頭が重なる
                let partner = format!("{prefix}{head}");
                remove_value(&mut self.nterm, &partner[..overlap], &partner[overlap..]);
                sequence = format!("{prefix}{sequence}");
            } else if let Some(suffix) = take_first(&mut self.nterm, tail) {
                // 自分の末尾と相手の先頭が重なる
                let partner = format!("{tail}{suffix}");
                let partner_split = partner.len() - overlap;
                remove_value(
                    &mut self.cterm,
                    &partner[partner_split..],
                    &partner[..partner_split],
                );
                sequence.push_str(&suffix);
            } else {
                let (head, rest) = sequence.split_at(overlap);
                let (body, tail) = sequence.split_at(split);
                self.nterm
                    .entry(head.to_string())
                    .or_default()
                    .push(rest.to_string());
                self.cterm
                    .entry(tail.to_string())
                    .or_default()
                    .push(body.to_string());
                return Ok(());
            }
        }
    }

    /// 組み立て済みコンティグ（辞書順）
    pub fn contigs(&self) -> Vec<String> {
        let mut contigs: Vec<String> = self
            .nterm
            .iter()
            .flat_map(|(head, rests)| rests.iter().map(move |rest| format!("{head}{rest}")))
            .collect();
        contigs.sort();
        contigs
    }

    pub fn stats(&self) -> ContigStats {
        let lengths: Vec<usize> = self.contigs().iter().map(String::len).collect();
        let total: usize = lengths.iter().sum();
        ContigStats {
            nmers: self.added,
            contigs: lengths.len(),
            mean_length: if lengths.is_empty() {
                0.0
            } else {
                total as f64 / lengths.len() as f64
            },
            min_length: lengths.iter().copied().min().unwrap_or(0),
            max_length: lengths.iter().copied().max().unwrap_or(0),
        }
    }
}

/// ユニークなn-merファイルからコンティグを作り、1行1件で書き出す
pub fn assemble_contigs(input: &Path, n: usize, output: &Path) -> Result<ContigStats> {
    let mut assembler = ContigAssembler::new(n)?;
    let file = File::open(input)
        .with_context(|| format!("入力ファイルを開けません: {}", input.display()))?;
    for (line_index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.context("入力ファイルの読み込みに失敗しました")?;
        let nmer = line.trim_end();
        if nmer.is_empty() {
            continue;
        }
        if let Err(e) = assembler.add(nmer) {
            warn!(line = line_index + 1, error = %e, "不正な行をスキップします");
        }
    }

    let contigs = assembler.contigs();
    let file = File::create(output)
        .with_context(|| format!("出力ファイルを作成できません: {}", output.display()))?;
    let mut writer = BufWriter::new(file);
    for contig in &contigs {
        writeln!(writer, "{contig}")?;
    }
    writer.flush().context("出力ファイルの書き込みに失敗しました")?;

    let stats = assembler.stats();
    info!(
        nmers = stats.nmers,
        contigs = stats.contigs,
        mean = %format!("{:.2}", stats.mean_length),
        min = stats.min_length,
        max = stats.max_length,
        "コンティグの作成が完了しました"
    );
    Ok(stats)
}
