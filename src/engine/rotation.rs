// Rotation - ワーカー間の巡回順序

/// 0..len を巡回するカーソル
///
/// Dispatcherの配信先決定と、Collectorの待機順序のタイブレークに使う。
#[derive(Debug, Clone)]
pub struct Rotation {
    len: usize,
    cursor: usize,
}

impl Rotation {
    pub fn new(len: usize) -> Self {
        Self { len, cursor: 0 }
    }

    /// 現在のカーソル位置
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// 現在位置を返してカーソルを1つ進める
    pub fn next_index(&mut self) -> usize {
        let index = self.cursor;
        self.advance_past(index);
        index
    }

    /// `index` の次の位置へカーソルを移す
    pub fn advance_past(&mut self, index: usize) {
        if self.len > 0 {
            self.cursor = (index + 1) % self.len;
        }
    }

    /// カーソル位置から始まる一巡分の順序
    pub fn order(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.len).map(move |offset| (self.cursor + offset) % self.len)
    }
}
