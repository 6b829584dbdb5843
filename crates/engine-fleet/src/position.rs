//! FEN / EPD 行の検証と正規化。
//!
//! 合法手判定は行わない。エンジンへ渡す前に表記として壊れていないこと、
//! および手番（評価値の符号変換に必要）を確認するだけに留める。

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PositionError {
    #[error("empty position")]
    Empty,
    #[error("expected 4 or 6 fields, got {0}")]
    FieldCount(usize),
    #[error("expected 8 ranks, got {0}")]
    RankCount(usize),
    #[error("rank {rank} describes {squares} squares")]
    RankWidth { rank: usize, squares: u32 },
    #[error("invalid piece character '{0}'")]
    Piece(char),
    #[error("invalid side to move '{0}'")]
    Side(String),
    #[error("invalid castling field '{0}'")]
    Castling(String),
    #[error("invalid en passant square '{0}'")]
    EnPassant(String),
    #[error("invalid move counter '{0}'")]
    Counter(String),
    #[error("missing 'bm' operation")]
    MissingBestMove,
    #[error("'bm' operation lists no moves")]
    EmptyBestMove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    White,
    Black,
}

/// 検証済みの FEN。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fen {
    fields: Vec<String>,
    pub side_to_move: Side,
}

impl Fen {
    pub fn parse(text: &str) -> Result<Self, PositionError> {
        let fields: Vec<String> = text.split_whitespace().map(str::to_string).collect();
        match fields.len() {
            0 => return Err(PositionError::Empty),
            4 | 6 => {}
            n => return Err(PositionError::FieldCount(n)),
        }
        validate_placement(&fields[0])?;
        let side_to_move = match fields[1].as_str() {
            "w" => Side::White,
            "b" => Side::Black,
            other => return Err(PositionError::Side(other.to_string())),
        };
        let castling = &fields[2];
        if castling != "-" && !castling.chars().all(|c| "KQkq".contains(c)) {
            return Err(PositionError::Castling(castling.clone()));
        }
        let ep = &fields[3];
        if ep != "-" {
            let bytes = ep.as_bytes();
            let valid = bytes.len() == 2
                && (b'a'..=b'h').contains(&bytes[0])
                && (bytes[1] == b'3' || bytes[1] == b'6');
            if !valid {
                return Err(PositionError::EnPassant(ep.clone()));
            }
        }
        for counter in fields.iter().skip(4) {
            if counter.parse::<u32>().is_err() {
                return Err(PositionError::Counter(counter.clone()));
            }
        }
        Ok(Self {
            fields,
            side_to_move,
        })
    }

    /// `position fen` に渡す6フィールド形式。EPD の4フィールドには `0 1` を補う。
    pub fn canonical(&self) -> String {
        let mut out = self.fields.join(" ");
        if self.fields.len() == 4 {
            out.push_str(" 0 1");
        }
        out
    }
}

fn validate_placement(placement: &str) -> Result<(), PositionError> {
    let ranks: Vec<&str> = placement.split('/').collect();
    if ranks.len() != 8 {
        return Err(PositionError::RankCount(ranks.len()));
    }
    for (i, rank) in ranks.iter().enumerate() {
        let mut squares = 0u32;
        for c in rank.chars() {
            match c {
                '1'..='8' => squares += c.to_digit(10).unwrap_or_default(),
                'p' | 'n' | 'b' | 'r' | 'q' | 'k' | 'P' | 'N' | 'B' | 'R' | 'Q' | 'K' => {
                    squares += 1
                }
                other => return Err(PositionError::Piece(other)),
            }
        }
        if squares != 8 {
            return Err(PositionError::RankWidth {
                rank: 8 - i,
                squares,
            });
        }
    }
    Ok(())
}

/// 行末の `[...]` 注記（対局結果など）を取り除く。
pub fn strip_annotation(line: &str) -> &str {
    line.split('[').next().unwrap_or_default().trim()
}

/// EPD テストスイートの1行。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuiteEntry {
    pub position: String,
    pub best_moves: Vec<String>,
    pub label: Option<String>,
}

/// `<fen> bm <m1> [<m2> ...]; id "<label>";` を分解する。
///
/// 局面部は先頭4トークン（続く2トークンが数値なら手数カウンタも含める）。
/// 残りは `;` 区切りのオペレーションで、`bm` と `id` 以外は読み捨てる。
pub fn parse_suite_line(line: &str) -> Result<SuiteEntry, PositionError> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() < 4 {
        return Err(PositionError::FieldCount(tokens.len()));
    }
    let mut fen_len = 4;
    if tokens.len() >= 6 && tokens[4..6].iter().all(|t| t.parse::<u32>().is_ok()) {
        fen_len = 6;
    }
    let position = tokens[..fen_len].join(" ");
    Fen::parse(&position)?;

    let mut best_moves = None;
    let mut label = None;
    let operations = tokens[fen_len..].join(" ");
    for op in operations.split(';') {
        let op = op.trim();
        let (opcode, operands) = op.split_once(' ').unwrap_or((op, ""));
        match opcode {
            "bm" => {
                best_moves =
                    Some(operands.split_whitespace().map(str::to_string).collect::<Vec<_>>());
            }
            "id" => {
                let text = operands.trim().trim_matches('"');
                if !text.is_empty() {
                    label = Some(text.to_string());
                }
            }
            _ => {}
        }
    }
    let best_moves = best_moves.ok_or(PositionError::MissingBestMove)?;
    if best_moves.is_empty() {
        return Err(PositionError::EmptyBestMove);
    }
    Ok(SuiteEntry {
        position,
        best_moves,
        label,
    })
}
