//! テキストユーティリティ
//!
//! 列は文字（Unicodeスカラー値）単位で数える。
//! バイト位置との変換と行分割をまとめる

/// 文字数を返す
pub fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// 文字インデックスをバイト位置に変換（範囲外は末尾）
pub fn byte_offset(s: &str, col: usize) -> usize {
    s.char_indices().nth(col).map(|(idx, _)| idx).unwrap_or(s.len())
}

/// 文字単位のスライス
pub fn char_slice(s: &str, from: usize, to: usize) -> &str {
    let start = byte_offset(s, from);
    let end = byte_offset(s, to.max(from));
    &s[start..end]
}

/// 先頭から `col` 文字
pub fn prefix(s: &str, col: usize) -> &str {
    &s[..byte_offset(s, col)]
}

/// `col` 文字目以降
pub fn suffix(s: &str, col: usize) -> &str {
    &s[byte_offset(s, col)..]
}

/// テキストを行に分割
///
/// 区切りが指定されていなければ `\r\n`, `\r`, `\n` のいずれでも分割する。
/// 常に1要素以上を返す。
pub fn split_lines(text: &str, separator: Option<&str>) -> Vec<String> {
    if let Some(sep) = separator.filter(|s| !s.is_empty()) {
        return text.split(sep).map(str::to_string).collect();
    }

    let mut lines = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                lines.push(std::mem::take(&mut current));
            }
            '\n' => lines.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }
    lines.push(current);
    lines
}
