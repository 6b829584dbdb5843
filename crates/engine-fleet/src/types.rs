use std::fmt;

/// プールへ投入する1件分の仕事。
///
/// `index` は投入順の通し番号で、結果の並べ直しはこれだけを頼りに行う。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub index: usize,
    pub position: String,
    /// テストスイートでの正解手（いずれかに一致すれば合格）
    pub expected: Option<Vec<String>>,
    /// EPD の `id` ラベル
    pub label: Option<String>,
}

impl WorkItem {
    pub fn new(index: usize, position: impl Into<String>) -> Self {
        Self {
            index,
            position: position.into(),
            expected: None,
            label: None,
        }
    }

    pub fn with_expected(mut self, moves: Vec<String>) -> Self {
        self.expected = Some(moves);
        self
    }

    pub fn with_label(mut self, label: Option<String>) -> Self {
        self.label = label;
        self
    }

    /// 正解手集合に `answer` が含まれるか。正解手が無い仕事は常に false。
    pub fn accepts(&self, answer: &str) -> bool {
        self.expected.as_ref().is_some_and(|moves| moves.iter().any(|m| m == answer))
    }
}

/// ドライバが導出した値。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Answer {
    /// 白視点の評価値（詰みは ±mate_score）
    Score(i32),
    /// bestmove の指し手
    Move(String),
    /// テストモードで解答が得られなかった
    None,
}

impl Answer {
    pub fn score(&self) -> Option<i32> {
        match self {
            Answer::Score(v) => Some(*v),
            _ => None,
        }
    }

    pub fn best_move(&self) -> Option<&str> {
        match self {
            Answer::Move(mv) => Some(mv),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemStatus {
    Ok,
    /// 局面不正・解析失敗などで中立値に置き換えた
    Fallback(String),
    /// 1リクエストの期限切れ。ワーカーはエンジンを再起動済み
    TimedOut,
    /// エンジンの出力が途絶えた（異常終了など）
    EngineLost(String),
}

impl ItemStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, ItemStatus::Ok)
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemStatus::Ok => f.write_str("ok"),
            ItemStatus::Fallback(reason) => write!(f, "fallback ({reason})"),
            ItemStatus::TimedOut => f.write_str("timed out"),
            ItemStatus::EngineLost(reason) => write!(f, "engine lost ({reason})"),
        }
    }
}

/// 1件の WorkItem に対してちょうど1回生成される結果。
#[derive(Debug, Clone)]
pub struct ItemResult {
    pub index: usize,
    /// `bestmove` 行から取り出した生の指し手トークン
    pub raw_answer: Option<String>,
    pub value: Answer,
    /// go 以降に受信した行（受信順）
    pub diagnostic: Vec<String>,
    pub status: ItemStatus,
}

impl ItemResult {
    /// 探索結果が得られなかった場合の中立値。評価モードなら 0 点。
    pub fn fallback(index: usize, evaluate: bool, status: ItemStatus) -> Self {
        Self {
            index,
            raw_answer: None,
            value: if evaluate {
                Answer::Score(0)
            } else {
                Answer::None
            },
            diagnostic: Vec::new(),
            status,
        }
    }

    /// 最後から2番目の受信行を PV 行とみなし、` pv` 以降を落として返す。
    pub fn pv_summary(&self) -> &str {
        match self.diagnostic.len().checked_sub(2).and_then(|i| self.diagnostic.get(i)) {
            Some(line) => line.split(" pv").next().unwrap_or_default(),
            None => "",
        }
    }
}
