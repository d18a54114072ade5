// プロテオームからのユニークなn-mer抽出

use anyhow::{bail, Context, Result};
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// 抽出結果の統計
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KmerStats {
    pub total: usize,
    pub unique: usize,
}

/// ユニークなn-merの集合
#[derive(Debug, Clone)]
pub struct KmerSet {
    n: usize,
    kmers: BTreeSet<String>,
    total: usize,
}

impl KmerSet {
    pub fn new(n: usize) -> Result<Self> {
        if n == 0 {
            bail!("n-merの長さは1以上である必要があります");
        }
        Ok(Self {
            n,
            kmers: BTreeSet::new(),
            total: 0,
        })
    }

    /// 1本の配列からn-merを切り出す（nより短い配列は何も追加しない）
    pub fn add_sequence(&mut self, sequence: &str) {
        let residues: Vec<char> = sequence.chars().collect();
        for window in residues.windows(self.n) {
            self.kmers.insert(window.iter().collect());
            self.total += 1;
        }
    }

    /// FASTAを読み、ヘッダー行（`>`）で区切られた配列ごとに処理
    pub fn add_fasta<R: BufRead>(&mut self, reader: R) -> Result<()> {
        let mut sequence = String::new();
        for line in reader.lines() {
            let line = line.context("FASTAの読み込みに失敗しました")?;
            if line.starts_with('>') {
                self.add_sequence(&sequence);
                sequence.clear();
            } else {
                sequence.push_str(line.trim_end());
            }
        }
        self.add_sequence(&sequence);
        Ok(())
    }

    pub fn stats(&self) -> KmerStats {
        KmerStats {
            total: self.total,
            unique: self.kmers.len(),
        }
    }

    /// 辞書順のn-mer
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.kmers.iter().map(String::as_str)
    }
}

/// FASTAファイル群からユニークなn-merを抽出し、1行1件で書き出す
pub fn extract_unique_kmers(fasta_files: &[PathBuf], n: usize, output: &Path) -> Result<KmerStats> {
    let mut set = KmerSet::new(n)?;
    for path in fasta_files {
        let file = File::open(path)
            .with_context(|| format!("FASTAファイルを開けません: {}", path.display()))?;
        set.add_fasta(BufReader::new(file))
            .with_context(|| format!("FASTAファイルの処理に失敗しました: {}", path.display()))?;
        debug!(file = %path.display(), unique = set.kmers.len(), "FASTAファイルを処理しました");
    }

    let file = File::create(output)
        .with_context(|| format!("出力ファイルを作成できません: {}", output.display()))?;
    let mut writer = BufWriter::new(file);
    for kmer in set.iter() {
        writeln!(writer, "{kmer}")?;
    }
    writer.flush().context("出力ファイルの書き込みに失敗しました")?;

    let stats = set.stats();
    info!(n, total = stats.total, unique = stats.unique, "n-merの抽出が完了しました");
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_zero_length_rejected() {
        assert!(KmerSet::new(0).is_err());
    }

    #[test]
    fn test_add_sequence_counts_total_and_unique() {
        let mut set = KmerSet::new(3).unwrap();
        set.add_sequence("ABCABC");
        set.add_sequence("AB");

        assert_eq!(set.stats(), KmerStats { total: 4, unique: 3 });
        assert_eq!(set.iter().collect::<Vec<_>>(), vec!["ABC", "BCA", "CAB"]);
    }

    #[test]
    fn test_fasta_records_are_not_joined() {
        let mut set = KmerSet::new(3).unwrap();
        set.add_fasta(">p1\nAB\nC\n>p2\nDE\n".as_bytes()).unwrap();

        // "ABC" は行をまたいで連結されるが、p1とp2は連結されない
        assert_eq!(set.iter().collect::<Vec<_>>(), vec!["ABC"]);
        assert_eq!(set.stats().total, 1);
    }

    #[test]
    fn test_extract_unique_kmers_writes_sorted_output() {
        let temp_dir = TempDir::new().unwrap();
        let first = temp_dir.path().join("a.fasta");
        let second = temp_dir.path().join("b.fasta");
        let output = temp_dir.path().join("kmers.txt");
        fs::write(&first, ">p1\nMKTAY\n").unwrap();
        fs::write(&second, ">p2\nKTAYM\n").unwrap();

        let stats = extract_unique_kmers(&[first, second], 4, &output).unwrap();

        assert_eq!(stats, KmerStats { total: 4, unique: 3 });
        assert_eq!(fs::read_to_string(&output).unwrap(), "KTAY\nMKTA\nTAYM\n");
    }

    #[test]
    fn test_extract_missing_file_fails() {
        let temp_dir = TempDir::new().unwrap();
        let result = extract_unique_kmers(
            &[temp_dir.path().join("missing.fasta")],
            3,
            &temp_dir.path().join("out.txt"),
        );

        assert!(result.is_err());
    }
}
