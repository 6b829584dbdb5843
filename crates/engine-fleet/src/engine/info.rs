/// 探索中の `info` 行から最新の評価値を保持する。
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InfoSnapshot {
    pub score_cp: Option<i32>,
    pub score_mate: Option<i32>,
    pub depth: Option<u32>,
    pub pv: Vec<String>,
    /// 数値にならなかった score トークン（最後に見たもの）
    pub malformed: Option<String>,
}

impl InfoSnapshot {
    /// info 行を解析し、multipv=1 の情報を保持する。
    pub fn update_from_line(&mut self, line: &str) {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.first().copied() != Some("info") {
            return;
        }
        // `info string` 以降は自由文
        if tokens.get(1).copied() == Some("string") {
            return;
        }
        let multipv = tokens
            .windows(2)
            .find(|w| w[0] == "multipv")
            .map_or(1, |w| w[1].parse::<u32>().unwrap_or(1));
        if multipv != 1 {
            return;
        }
        let mut i = 1;
        while i < tokens.len() {
            match tokens[i] {
                "depth" => {
                    if i + 1 < tokens.len() {
                        self.depth = tokens[i + 1].parse::<u32>().ok();
                        i += 1;
                    }
                }
                "score" => {
                    if i + 2 < tokens.len() {
                        let raw = tokens[i + 2];
                        let value = raw.parse::<i32>();
                        match (tokens[i + 1], value) {
                            ("cp", Ok(v)) => {
                                self.score_cp = Some(v);
                                self.score_mate = None;
                                self.malformed = None;
                            }
                            ("mate", Ok(v)) => {
                                self.score_mate = Some(v);
                                self.score_cp = None;
                                self.malformed = None;
                            }
                            ("cp" | "mate", Err(_)) => {
                                self.malformed = Some(line.to_string());
                            }
                            _ => {}
                        }
                        i += 2;
                    } else {
                        self.malformed = Some(line.to_string());
                    }
                }
                "pv" => {
                    let pv: Vec<String> = tokens[i + 1..].iter().map(|t| t.to_string()).collect();
                    if !pv.is_empty() {
                        self.pv = pv;
                    }
                    break;
                }
                _ => {}
            }
            i += 1;
        }
    }

    pub fn has_score(&self) -> bool {
        self.score_cp.is_some() || self.score_mate.is_some()
    }
}
