//! Parser for `iptables -L <chain> -n --line-numbers` output.
//!
//! Rule lines start with a decimal line number. Rules created by portkeeper
//! carry a comment of the form `Docker <name>[<short id>]`, which iptables
//! prints as `/* Docker web[abc123def456] */`. Header lines and anything
//! else that does not start with a number are ignored.

/// One rule line from a chain listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedRule {
    /// 1-based position of the rule in its chain.
    pub line_number: u32,
    /// Content of the last `[...]` group in the rule's comment, if any.
    pub tag: Option<String>,
}

impl ListedRule {
    /// Whether this rule was created for the container with `short_id`.
    pub fn belongs_to(&self, short_id: &str) -> bool {
        self.tag.as_deref() == Some(short_id)
    }
}

/// Parses a chain listing into numbered rules.
pub fn parse_rule_listing(output: &str) -> Vec<ListedRule> {
    output.lines().filter_map(parse_line).collect()
}

fn parse_line(line: &str) -> Option<ListedRule> {
    let line = line.trim_start();
    let digits = line.find(|c: char| !c.is_ascii_digit()).unwrap_or(line.len());
    if digits == 0 {
        return None;
    }
    let line_number: u32 = line[..digits].parse().ok()?;
    let rest = &line[digits..];

    // 번호 뒤에는 공백이 와야 함 ("10.0.0.1" 같은 줄 제외)
    if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
        return None;
    }

    let scope = comment_of(rest).unwrap_or(rest);
    Some(ListedRule {
        line_number,
        tag: last_bracket_group(scope),
    })
}

fn comment_of(text: &str) -> Option<&str> {
    let start = text.find("/*")? + 2;
    let end = text[start..].find("*/")? + start;
    Some(&text[start..end])
}

fn last_bracket_group(text: &str) -> Option<String> {
    let close = text.rfind(']')?;
    let open = text[..close].rfind('[')?;
    let tag = text[open + 1..close].trim();
    (!tag.is_empty()).then(|| tag.to_owned())
}
