// 该文件是 Chepai （车牌闸口） 项目的一部分。
// src/model/normalize.rs - 车牌文本清洗与校验
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// 默认车牌语法：两位字母、1-2 位数字、1-2 位字母、3-4 位数字
pub const DEFAULT_PLATE_GRAMMAR: &str = r"^[A-Z]{2}[0-9]{1,2}[A-Z]{1,2}[0-9]{3,4}$";

/// OCR 常把车牌边框上的印刷字读出来
pub const DEFAULT_REJECT_PHRASES: [&str; 4] =
  ["NUMBER PLATE", "NUMPER PLATE", "NUNBER PLATE", "TUMBER PLATE"];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NormalizeError {
  #[error("车牌语法无效: {0}")]
  InvalidGrammar(String),
  #[error("清洗后文本为空")]
  Empty,
  #[error("文本包含屏蔽词 '{phrase}': {raw}")]
  RejectedPhrase { phrase: String, raw: String },
  #[error("文本不符合车牌语法: {0}")]
  GrammarMismatch(String),
}

/// 通过语法校验的车牌字符串
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlateString(String);

impl PlateString {
  pub fn as_str(&self) -> &str {
    &self.0
  }

  pub fn into_inner(self) -> String {
    self.0
  }
}

impl fmt::Display for PlateString {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl AsRef<str> for PlateString {
  fn as_ref(&self) -> &str {
    &self.0
  }
}

/// 修正规则作用的位置范围
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Span {
  /// 开头 n 个字符
  Leading(usize),
  /// 结尾 n 个字符
  Trailing(usize),
  Anywhere,
}

impl Span {
  pub fn contains(&self, index: usize, len: usize) -> bool {
    match *self {
      Span::Leading(n) => index < n,
      Span::Trailing(n) => index + n >= len,
      Span::Anywhere => true,
    }
  }
}

/// 一条易混字符修正：在 span 内把 from 替换为 to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Correction {
  pub span: Span,
  pub from: char,
  pub to: char,
}

impl Correction {
  pub const fn new(span: Span, from: char, to: char) -> Self {
    Self { span, from, to }
  }
}

const LETTER_REGION: Span = Span::Leading(2);
const DIGIT_REGION: Span = Span::Trailing(3);

const DEFAULT_CORRECTIONS: [Correction; 17] = [
  Correction::new(LETTER_REGION, '0', 'O'),
  Correction::new(LETTER_REGION, '1', 'I'),
  Correction::new(LETTER_REGION, '2', 'Z'),
  Correction::new(LETTER_REGION, '4', 'A'),
  Correction::new(LETTER_REGION, '5', 'S'),
  Correction::new(LETTER_REGION, '6', 'G'),
  Correction::new(LETTER_REGION, '8', 'B'),
  Correction::new(DIGIT_REGION, 'O', '0'),
  Correction::new(DIGIT_REGION, 'Q', '0'),
  Correction::new(DIGIT_REGION, 'D', '0'),
  Correction::new(DIGIT_REGION, 'I', '1'),
  Correction::new(DIGIT_REGION, 'L', '1'),
  Correction::new(DIGIT_REGION, 'Z', '2'),
  Correction::new(DIGIT_REGION, 'S', '5'),
  Correction::new(DIGIT_REGION, 'G', '6'),
  Correction::new(DIGIT_REGION, 'B', '8'),
  Correction::new(DIGIT_REGION, 'T', '7'),
];

/// 按位置生效的易混字符表，同一位置取第一条匹配的规则
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfusionTable {
  entries: Vec<Correction>,
}

impl Default for ConfusionTable {
  fn default() -> Self {
    Self {
      entries: DEFAULT_CORRECTIONS.to_vec(),
    }
  }
}

impl ConfusionTable {
  pub fn new(entries: Vec<Correction>) -> Self {
    Self { entries }
  }

  pub fn empty() -> Self {
    Self {
      entries: Vec::new(),
    }
  }

  pub fn entries(&self) -> &[Correction] {
    &self.entries
  }

  pub fn lookup(&self, index: usize, len: usize, c: char) -> Option<char> {
    self
      .entries
      .iter()
      .find(|e| e.from == c && e.span.contains(index, len))
      .map(|e| e.to)
  }

  pub fn apply(&self, text: &str) -> String {
    let len = text.chars().count();
    text
      .chars()
      .enumerate()
      .map(|(i, c)| self.lookup(i, len, c).unwrap_or(c))
      .collect()
  }
}

/// 车牌文本规范化器
#[derive(Debug, Clone)]
pub struct PlateNormalizer {
  grammar: Regex,
  corrections: ConfusionTable,
  reject_phrases: Vec<String>,
}

impl Default for PlateNormalizer {
  fn default() -> Self {
    Self {
      grammar: Regex::new(DEFAULT_PLATE_GRAMMAR).expect("默认车牌语法无效"),
      corrections: ConfusionTable::default(),
      reject_phrases: DEFAULT_REJECT_PHRASES.iter().map(|s| s.to_string()).collect(),
    }
  }
}

impl PlateNormalizer {
  pub fn new(
    grammar: &str,
    corrections: ConfusionTable,
    reject_phrases: Vec<String>,
  ) -> Result<Self, NormalizeError> {
    let grammar =
      Regex::new(grammar).map_err(|e| NormalizeError::InvalidGrammar(e.to_string()))?;
    Ok(Self {
      grammar,
      corrections,
      reject_phrases: reject_phrases.into_iter().map(|p| p.to_uppercase()).collect(),
    })
  }

  pub fn grammar(&self) -> &str {
    self.grammar.as_str()
  }

  /// 大写并去掉所有非字母数字字符
  pub fn clean(raw: &str) -> String {
    raw
      .chars()
      .filter(|c| c.is_ascii_alphanumeric())
      .map(|c| c.to_ascii_uppercase())
      .collect()
  }

  pub fn normalize(&self, raw: &str) -> Result<PlateString, NormalizeError> {
    let upper = raw.to_uppercase();
    if let Some(phrase) = self.reject_phrases.iter().find(|p| upper.contains(p.as_str())) {
      return Err(NormalizeError::RejectedPhrase {
        phrase: phrase.clone(),
        raw: raw.to_string(),
      });
    }

    let cleaned = Self::clean(raw);
    if cleaned.is_empty() {
      return Err(NormalizeError::Empty);
    }

    let corrected = self.corrections.apply(&cleaned);
    debug!("文本规范化: '{}' -> '{}' -> '{}'", raw, cleaned, corrected);

    if self.grammar.is_match(&corrected) {
      Ok(PlateString(corrected))
    } else {
      Err(NormalizeError::GrammarMismatch(corrected))
    }
  }

  /// 不做修正，只判断是否已是合法车牌
  pub fn validate(&self, text: &str) -> Option<PlateString> {
    self
      .grammar
      .is_match(text)
      .then(|| PlateString(text.to_string()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn strips_spaces_and_punctuation() {
    let normalizer = PlateNormalizer::default();
    let plate = normalizer.normalize(" ka 01; ab,12]34 ").unwrap();
    assert_eq!(plate.as_str(), "KA01AB1234");
  }

  #[test]
  fn corrects_digits_in_letter_region() {
    let normalizer = PlateNormalizer::default();
    assert_eq!(normalizer.normalize("8A01AB1234").unwrap().as_str(), "BA01AB1234");
    assert_eq!(normalizer.normalize("K401AB1234").unwrap().as_str(), "KA01AB1234");
  }

  #[test]
  fn corrects_letters_in_trailing_digits() {
    let normalizer = PlateNormalizer::default();
    assert_eq!(normalizer.normalize("KA01AB12O4").unwrap().as_str(), "KA01AB1204");
    assert_eq!(normalizer.normalize("KA01AB1Z3S").unwrap().as_str(), "KA01AB1235");
  }

  #[test]
  fn middle_characters_are_not_corrected() {
    let table = ConfusionTable::default();
    // 位置 2、3 既可能是数字也可能是字母，不做替换
    assert_eq!(table.apply("KA0OAB1234"), "KA0OAB1234");
    assert_eq!(table.lookup(2, 10, '0'), None);
    assert_eq!(table.lookup(0, 10, '0'), Some('O'));
    assert_eq!(table.lookup(9, 10, 'O'), Some('0'));
  }

  #[test]
  fn normalization_is_idempotent() {
    let normalizer = PlateNormalizer::default();
    for raw in ["KA01AB1234", "KA05XY1111", "MH2A123", "DL8CA5031"] {
      let once = normalizer.normalize(raw).unwrap();
      let twice = normalizer.normalize(once.as_str()).unwrap();
      assert_eq!(once, twice);
      assert_eq!(once.as_str(), raw);
    }
  }

  #[test]
  fn rejects_grammar_mismatch() {
    let normalizer = PlateNormalizer::default();
    assert!(matches!(
      normalizer.normalize("HELLO"),
      Err(NormalizeError::GrammarMismatch(_))
    ));
    assert_eq!(normalizer.normalize("!@#$"), Err(NormalizeError::Empty));
  }

  #[test]
  fn rejects_frame_caption_phrases() {
    let normalizer = PlateNormalizer::default();
    assert!(matches!(
      normalizer.normalize("Number Plate KA01AB1234"),
      Err(NormalizeError::RejectedPhrase { .. })
    ));
  }

  #[test]
  fn custom_table_from_toml() {
    #[derive(Deserialize)]
    struct Wrapper {
      corrections: ConfusionTable,
    }
    let parsed: Wrapper = toml::from_str(
      r#"
      [[corrections]]
      span = { leading = 1 }
      from = "7"
      to = "T"
      "#,
    )
    .unwrap();
    assert_eq!(parsed.corrections.apply("77"), "T7");
  }

  #[test]
  fn plates_starting_with_wl_are_accepted() {
    let n = PlateNormalizer::default();
    assert_eq!(n.normalize("WL 01 AB 1234").unwrap().as_str(), "WL01AB1234");
  }
}
