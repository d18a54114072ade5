// 書き出しバッファ - 行をブロックサイズ単位にまとめる

/// Collectorの書き出しバッファ
///
/// ブロックサイズに達した時点で1ブロックを取り出せる。
#[derive(Debug)]
pub struct BlockBuffer {
    rows: Vec<String>,
    block_size: usize,
}

impl BlockBuffer {
    pub fn new(block_size: usize) -> Self {
        let block_size = block_size.max(1);
        Self {
            rows: Vec::with_capacity(block_size),
            block_size,
        }
    }

    /// 行を追加し、ブロックサイズに達した場合はそのブロックを返す
    pub fn push(&mut self, row: String) -> Option<Vec<String>> {
        self.rows.push(row);
        if self.rows.len() >= self.block_size {
            Some(self.take())
        } else {
            None
        }
    }

    /// 残りの行をすべて取り出す（空の場合はNone）
    pub fn take_remaining(&mut self) -> Option<Vec<String>> {
        if self.rows.is_empty() {
            None
        } else {
            Some(self.take())
        }
    }

    /// 未書き出しの行を破棄し、その件数を返す
    pub fn discard(&mut self) -> usize {
        let discarded = self.rows.len();
        self.rows.clear();
        discarded
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn take(&mut self) -> Vec<String> {
        std::mem::replace(&mut self.rows, Vec::with_capacity(self.block_size))
    }
}
