//! Per-tool output truncation, ported from `attractor_agent.tools.truncation`.
//! Pure functions operating on strings; no I/O, no dependencies.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TruncationMode {
    /// Keep the first half and the last half, with a marker in between.
    HeadTail,
    /// Keep only the suffix.
    Tail,
}

#[derive(Debug, Clone)]
pub struct TruncationResult {
    pub text: String,
    pub was_truncated: bool,
    pub original_chars: usize,
    pub original_lines: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct ToolLimits {
    pub char_limit: usize,
    pub line_limit: usize,
    pub mode: TruncationMode,
}

const DEFAULT_LIMITS: ToolLimits = ToolLimits { char_limit: 30000, line_limit: 500, mode: TruncationMode::HeadTail };

/// Per-tool char/line caps, pinned from the limits table. `shell` uses
/// tail mode (the useful part of a command's output is almost always the
/// end); every other tool uses head-tail collapse.
pub fn limits_for(tool_name: &str) -> ToolLimits {
    match tool_name {
        "read_file" => ToolLimits { char_limit: 50000, line_limit: 500, mode: TruncationMode::HeadTail },
        "shell" => ToolLimits { char_limit: 30000, line_limit: 256, mode: TruncationMode::Tail },
        "grep" => ToolLimits { char_limit: 20000, line_limit: 200, mode: TruncationMode::HeadTail },
        "glob" => ToolLimits { char_limit: 20000, line_limit: 500, mode: TruncationMode::HeadTail },
        "edit_file" => ToolLimits { char_limit: 10000, line_limit: 500, mode: TruncationMode::HeadTail },
        "apply_patch" => ToolLimits { char_limit: 10000, line_limit: 500, mode: TruncationMode::HeadTail },
        "write_file" => ToolLimits { char_limit: 1000, line_limit: 500, mode: TruncationMode::HeadTail },
        "spawn_agent" => ToolLimits { char_limit: 20000, line_limit: 500, mode: TruncationMode::HeadTail },
        _ => DEFAULT_LIMITS,
    }
}

fn truncate_chars(text: &str, limit: usize, mode: TruncationMode) -> (String, bool) {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= limit {
        return (text.to_string(), false);
    }
    let omitted = chars.len() - limit;
    let marker = format!("\n…[truncated {} chars]…\n", omitted);
    match mode {
        TruncationMode::Tail => {
            let suffix: String = chars[chars.len() - limit..].iter().collect();
            (format!("{}{}", marker, suffix), true)
        }
        TruncationMode::HeadTail => {
            let half = limit / 2;
            let head: String = chars[..half].iter().collect();
            let tail: String = chars[chars.len() - (limit - half)..].iter().collect();
            (format!("{}{}{}", head, marker, tail), true)
        }
    }
}

fn truncate_lines(text: &str, limit: usize, mode: TruncationMode) -> (String, bool) {
    let lines: Vec<&str> = text.lines().collect();
    if lines.len() <= limit {
        return (text.to_string(), false);
    }
    let omitted = lines.len() - limit;
    let marker = format!("…[truncated {} lines]…", omitted);
    match mode {
        TruncationMode::Tail => {
            let suffix = lines[lines.len() - limit..].join("\n");
            (format!("{}\n{}", marker, suffix), true)
        }
        TruncationMode::HeadTail => {
            let half = limit / 2;
            let head = lines[..half].join("\n");
            let tail = lines[lines.len() - (limit - half)..].join("\n");
            (format!("{}\n{}\n{}", head, marker, tail), true)
        }
    }
}

/// Applies the character cap first, then the line cap, matching the
/// teacher's general layered-limit philosophy but specific to this ported
/// algorithm.
pub fn truncate(text: &str, tool_name: &str) -> TruncationResult {
    let limits = limits_for(tool_name);
    let original_chars = text.chars().count();
    let original_lines = text.lines().count();

    let (after_chars, truncated_by_chars) = truncate_chars(text, limits.char_limit, limits.mode);
    let (final_text, truncated_by_lines) = truncate_lines(&after_chars, limits.line_limit, limits.mode);

    TruncationResult {
        text: final_text,
        was_truncated: truncated_by_chars || truncated_by_lines,
        original_chars,
        original_lines,
    }
}
