//! 输出解析函数

use super::models::{HomebrewInfo, SearchResults};
use super::types::PackageId;
use crate::error::BrewError;

/// `brew search` 无结果时 stderr 的固定前缀
pub const NO_SEARCH_RESULTS_PREFIX: &str = "Error: No formulae or casks found for";

/// 清理终端输出中的 ANSI 转义序列和控制字符，并合并连续空行
pub fn clean_terminal_output(input: &str) -> String {
    let mut text = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            // CSI 序列：ESC [ ... 字母
            '\x1b' if chars.peek() == Some(&'[') => {
                chars.next();
                for next in chars.by_ref() {
                    if next.is_ascii_alphabetic() {
                        break;
                    }
                }
            }
            '\x1b' => {}
            '\r' if chars.peek() != Some(&'\n') && !text.ends_with('\n') => text.push('\n'),
            c if c.is_control() && c != '\n' && c != '\t' => {}
            _ => text.push(c),
        }
    }

    let mut lines: Vec<&str> = Vec::new();
    for line in text.lines() {
        let blank = line.trim().is_empty();
        if blank && lines.last().is_some_and(|prev| prev.trim().is_empty()) {
            continue;
        }
        lines.push(line);
    }
    lines.join("\n")
}

/// 解析 `brew info --json=v2` 的输出
pub fn parse_info(stdout: &[u8]) -> Result<HomebrewInfo, BrewError> {
    serde_json::from_slice(stdout).map_err(|e| BrewError::DecodeFailed(e.to_string()))
}

#[derive(Clone, Copy, PartialEq)]
enum SearchSection {
    Formulae,
    Casks,
}

/// 解析 `brew search` 的纯文本输出
///
/// 输出按 `==> Formulae` / `==> Casks` 分段，每行一个 ID；
/// 段标题之前的行、带前导空白的行以及空行都忽略。
pub fn parse_search_output(output: &str) -> SearchResults {
    let mut results = SearchResults::default();
    let mut section = None;

    for line in output.lines() {
        let line = clean_terminal_output(line);
        let line = line.trim_end();
        match line {
            "==> Formulae" => section = Some(SearchSection::Formulae),
            "==> Casks" => section = Some(SearchSection::Casks),
            _ if line.is_empty() || line.starts_with("==>") => {}
            _ if line.starts_with(char::is_whitespace) => {}
            _ => {
                let id = PackageId::from(line);
                match section {
                    Some(SearchSection::Formulae) => results.formulae.push(id),
                    Some(SearchSection::Casks) => results.casks.push(id),
                    None => {}
                }
            }
        }
    }

    results
}

/// stderr 是否表示“没有搜索结果”（视为成功的空结果）
pub fn is_no_results(stderr: &str) -> bool {
    clean_terminal_output(stderr)
        .trim_start()
        .starts_with(NO_SEARCH_RESULTS_PREFIX)
}
