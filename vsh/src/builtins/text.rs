//! Text builtins
//!
//! Commands that can run forever on their input (`grep`, `head`, `tee`,
//! `yes`) work line by line or chunk by chunk so they stay responsive in a
//! pipeline. The rest read their whole input first.

use std::cmp::Ordering;
use std::collections::VecDeque;

use async_trait::async_trait;
use regex::{Regex, RegexBuilder};

use crate::process::{ExitStatus, STREAM_CHUNK_SIZE};
use crate::registry::{CommandContext, CommandError, CommandProvider, CommandResult};
use crate::vfs::WriteMode;

use super::{read_sources, Flags};

pub struct TextBuiltins;

#[async_trait]
impl CommandProvider for TextBuiltins {
    async fn execute(&self, argv: &[String], ctx: &mut CommandContext) -> CommandResult {
        let Some((name, args)) = argv.split_first() else {
            return Ok(ExitStatus::FAILURE);
        };
        match name.as_str() {
            "echo" => cmd_echo(args, ctx).await,
            "printf" => cmd_printf(args, ctx).await,
            "grep" => cmd_grep(args, ctx).await,
            "wc" => cmd_wc(args, ctx).await,
            "head" => cmd_head(args, ctx).await,
            "tail" => cmd_tail(args, ctx).await,
            "sort" => cmd_sort(args, ctx).await,
            "uniq" => cmd_uniq(args, ctx).await,
            "tee" => cmd_tee(args, ctx).await,
            "seq" => cmd_seq(args, ctx).await,
            "yes" => cmd_yes(args, ctx).await,
            other => Err(CommandError::with_code(
                format!("vsh: {other}: command not found"),
                127,
            )),
        }
    }
}

/// Backslash escapes of `echo -e` and `printf`. Returns the text and whether
/// a `\c` asked to stop all further output.
pub(crate) fn interpret_escape_sequences(s: &str) -> (String, bool) {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            result.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => result.push('\n'),
            Some('t') => result.push('\t'),
            Some('r') => result.push('\r'),
            Some('\\') => result.push('\\'),
            Some('0') => result.push('\0'),
            Some('a') => result.push('\x07'),
            Some('b') => result.push('\x08'),
            Some('f') => result.push('\x0C'),
            Some('v') => result.push('\x0B'),
            Some('e') => result.push('\x1B'),
            Some('c') => return (result, true),
            Some(other) => {
                result.push('\\');
                result.push(other);
            }
            None => result.push('\\'),
        }
    }
    (result, false)
}

async fn cmd_echo(args: &[String], ctx: &mut CommandContext) -> CommandResult {
    let mut escapes = false;
    let mut newline = true;
    let mut rest = args;
    // Only words made entirely of n, e and E are options
    while let Some((first, tail)) = rest.split_first() {
        let Some(letters) = first.strip_prefix('-') else {
            break;
        };
        if letters.is_empty() || !letters.chars().all(|c| matches!(c, 'n' | 'e' | 'E')) {
            break;
        }
        for c in letters.chars() {
            match c {
                'n' => newline = false,
                'e' => escapes = true,
                _ => escapes = false,
            }
        }
        rest = tail;
    }

    let mut output = rest.join(" ");
    if escapes {
        let (text, stop) = interpret_escape_sequences(&output);
        output = text;
        if stop {
            newline = false;
        }
    }
    if newline {
        output.push('\n');
    }
    ctx.write_out(&output).await?;
    Ok(ExitStatus::SUCCESS)
}

#[derive(Default)]
struct FormatSpec {
    left: bool,
    zero: bool,
    plus: bool,
    width: usize,
    precision: Option<usize>,
}

impl FormatSpec {
    fn pad(&self, body: String, numeric: bool) -> String {
        let len = body.chars().count();
        if len >= self.width {
            return body;
        }
        let fill = self.width - len;
        if self.left {
            format!("{body}{}", " ".repeat(fill))
        } else if self.zero && numeric {
            let (sign, digits) = match body.strip_prefix(['-', '+']) {
                Some(digits) => (&body[..1], digits),
                None => ("", body.as_str()),
            };
            format!("{sign}{}{digits}", "0".repeat(fill))
        } else {
            format!("{}{body}", " ".repeat(fill))
        }
    }
}

/// Widths and precisions beyond this are clamped.
const MAX_FIELD_WIDTH: usize = 4096;

fn field_digit(value: usize, digit: u32) -> usize {
    value
        .saturating_mul(10)
        .saturating_add(digit as usize)
        .min(MAX_FIELD_WIDTH)
}

fn printf_number(arg: &str) -> i64 {
    let arg = arg.trim();
    if let Some(c) = arg.strip_prefix(['\'', '"']).and_then(|s| s.chars().next()) {
        return i64::from(u32::from(c));
    }
    arg.parse().unwrap_or(0)
}

/// Render `format` once, consuming arguments from `next` on.
fn printf_once(format: &str, args: &[String], next: &mut usize, out: &mut String) -> bool {
    let mut chars = format.chars().peekable();
    let take = |next: &mut usize| {
        let arg = args.get(*next).cloned().unwrap_or_default();
        *next += 1;
        arg
    };
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                let mut escape = String::from('\\');
                if let Some(e) = chars.next() {
                    escape.push(e);
                }
                let (text, stop) = interpret_escape_sequences(&escape);
                out.push_str(&text);
                if stop {
                    return true;
                }
            }
            '%' => {
                let mut spec = FormatSpec::default();
                while let Some(&flag) = chars.peek() {
                    match flag {
                        '-' => spec.left = true,
                        '0' => spec.zero = true,
                        '+' => spec.plus = true,
                        _ => break,
                    }
                    chars.next();
                }
                while let Some(d) = chars.peek().and_then(|c| c.to_digit(10)) {
                    spec.width = field_digit(spec.width, d);
                    chars.next();
                }
                if chars.peek() == Some(&'.') {
                    chars.next();
                    let mut precision = 0;
                    while let Some(d) = chars.peek().and_then(|c| c.to_digit(10)) {
                        precision = field_digit(precision, d);
                        chars.next();
                    }
                    spec.precision = Some(precision);
                }
                match chars.next() {
                    Some('%') => out.push('%'),
                    Some('s') => {
                        let mut arg = take(next);
                        if let Some(p) = spec.precision {
                            arg = arg.chars().take(p).collect();
                        }
                        out.push_str(&spec.pad(arg, false));
                    }
                    Some('b') => {
                        let (text, stop) = interpret_escape_sequences(&take(next));
                        out.push_str(&spec.pad(text, false));
                        if stop {
                            return true;
                        }
                    }
                    Some('c') => {
                        let arg: String = take(next).chars().take(1).collect();
                        out.push_str(&spec.pad(arg, false));
                    }
                    Some('d' | 'i') => {
                        let n = printf_number(&take(next));
                        let body = if spec.plus && n >= 0 {
                            format!("+{n}")
                        } else {
                            n.to_string()
                        };
                        out.push_str(&spec.pad(body, true));
                    }
                    Some('x') => {
                        let body = format!("{:x}", printf_number(&take(next)));
                        out.push_str(&spec.pad(body, true));
                    }
                    Some('f') => {
                        let n: f64 = take(next).trim().parse().unwrap_or(0.0);
                        let body = format!("{n:.*}", spec.precision.unwrap_or(6));
                        out.push_str(&spec.pad(body, true));
                    }
                    Some(other) => {
                        out.push('%');
                        out.push(other);
                    }
                    None => out.push('%'),
                }
            }
            _ => out.push(c),
        }
    }
    false
}

/// The format is reused while arguments remain.
pub(crate) fn render_printf(format: &str, args: &[String]) -> String {
    let mut out = String::new();
    let mut next = 0;
    loop {
        let before = next;
        if printf_once(format, args, &mut next, &mut out) {
            break;
        }
        if next >= args.len() || next == before {
            break;
        }
    }
    out
}

async fn cmd_printf(args: &[String], ctx: &mut CommandContext) -> CommandResult {
    let Some((format, rest)) = args.split_first() else {
        return Err(CommandError::usage("printf: usage: printf format [arguments]"));
    };
    ctx.write_out(&render_printf(format, rest)).await?;
    Ok(ExitStatus::SUCCESS)
}

struct Grep {
    regex: Regex,
    invert: bool,
    numbers: bool,
    count_only: bool,
    quiet: bool,
    show_names: bool,
    matched: usize,
}

impl Grep {
    /// Returns true when the search can stop.
    async fn line(
        &mut self,
        ctx: &CommandContext,
        name: Option<&str>,
        number: usize,
        line: &str,
    ) -> Result<bool, CommandError> {
        if self.regex.is_match(line) == self.invert {
            return Ok(false);
        }
        self.matched += 1;
        if self.quiet {
            return Ok(true);
        }
        if self.count_only {
            return Ok(false);
        }
        let mut out = String::new();
        if let (true, Some(name)) = (self.show_names, name) {
            out.push_str(name);
            out.push(':');
        }
        if self.numbers {
            out.push_str(&format!("{number}:"));
        }
        out.push_str(line);
        ctx.writeln(&out).await?;
        Ok(false)
    }
}

async fn cmd_grep(args: &[String], ctx: &mut CommandContext) -> CommandResult {
    let flags = Flags::parse("grep", args, "ivncqEF")?;
    let Some((pattern, files)) = flags.operands.split_first() else {
        return Err(CommandError::usage("usage: grep [-ivncqEF] PATTERN [FILE...]"));
    };
    let pattern = if flags.has('F') {
        regex::escape(pattern)
    } else {
        pattern.clone()
    };
    let regex = RegexBuilder::new(&pattern)
        .case_insensitive(flags.has('i'))
        .build()
        .map_err(|err| CommandError::with_code(format!("grep: invalid pattern: {err}"), 2))?;

    let mut grep = Grep {
        regex,
        invert: flags.has('v'),
        numbers: flags.has('n'),
        count_only: flags.has('c'),
        quiet: flags.has('q'),
        show_names: files.len() > 1,
        matched: 0,
    };

    let mut status = 0;
    if files.is_empty() {
        let mut number = 0;
        while let Some(line) = ctx.stdin.read_line().await {
            number += 1;
            if grep.line(ctx, None, number, &line).await? {
                break;
            }
        }
        if grep.count_only && !grep.quiet {
            ctx.writeln(&grep.matched.to_string()).await?;
        }
    } else {
        let (sources, read_status) = read_sources("grep", files, ctx).await;
        status = read_status * 2;
        'files: for source in &sources {
            let before = grep.matched;
            for (index, line) in source.text.lines().enumerate() {
                if grep.line(ctx, source.name.as_deref(), index + 1, line).await? {
                    break 'files;
                }
            }
            if grep.count_only && !grep.quiet {
                let count = grep.matched - before;
                match (&source.name, grep.show_names) {
                    (Some(name), true) => ctx.writeln(&format!("{name}:{count}")).await?,
                    _ => ctx.writeln(&count.to_string()).await?,
                }
            }
        }
    }

    if grep.matched > 0 && (status == 0 || grep.quiet) {
        Ok(ExitStatus::SUCCESS)
    } else if status != 0 {
        Ok(ExitStatus::code(status))
    } else {
        Ok(ExitStatus::FAILURE)
    }
}

async fn cmd_wc(args: &[String], ctx: &mut CommandContext) -> CommandResult {
    let flags = Flags::parse("wc", args, "lwc")?;
    let mut fields: Vec<char> = ['l', 'w', 'c'].into_iter().filter(|f| flags.has(*f)).collect();
    if fields.is_empty() {
        fields = vec!['l', 'w', 'c'];
    }

    let (sources, status) = read_sources("wc", &flags.operands, ctx).await;
    let mut rows: Vec<(Vec<usize>, Option<String>)> = sources
        .iter()
        .map(|source| {
            let counts = fields
                .iter()
                .map(|f| match f {
                    'l' => source.text.matches('\n').count(),
                    'w' => source.text.split_whitespace().count(),
                    _ => source.text.len(),
                })
                .collect();
            (counts, source.name.clone())
        })
        .collect();
    if rows.len() > 1 {
        let totals: Vec<usize> = (0..fields.len())
            .map(|i| rows.iter().map(|(counts, _)| counts[i]).sum::<usize>())
            .collect();
        rows.push((totals, Some("total".to_string())));
    }

    let from_stdin = flags.operands.is_empty();
    let width = if from_stdin {
        if fields.len() == 1 {
            1
        } else {
            7
        }
    } else {
        rows.iter()
            .flat_map(|(counts, _)| counts.iter())
            .map(|n| n.to_string().len())
            .max()
            .unwrap_or(1)
    };

    let mut out = String::new();
    for (counts, name) in rows {
        let line: Vec<String> = counts.iter().map(|n| format!("{n:>width$}")).collect();
        out.push_str(&line.join(" "));
        if let Some(name) = name {
            out.push(' ');
            out.push_str(&name);
        }
        out.push('\n');
    }
    ctx.write_out(&out).await?;
    Ok(ExitStatus::code(status))
}

/// `-n N`, `-nN` or `-N`. `+N` is kept as given for `tail`.
fn line_count(cmd: &str, args: &[String]) -> Result<(String, Vec<String>), CommandError> {
    let mut count = "10".to_string();
    let mut operands = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == "-n" {
            count = iter
                .next()
                .cloned()
                .ok_or_else(|| CommandError::usage(format!("{cmd}: option requires an argument -- 'n'")))?;
        } else if let Some(n) = arg.strip_prefix("-n") {
            count = n.to_string();
        } else if arg.len() > 1 && arg.starts_with('-') && arg[1..].chars().all(|c| c.is_ascii_digit()) {
            count = arg[1..].to_string();
        } else {
            operands.push(arg.clone());
        }
    }
    Ok((count, operands))
}

fn parse_count(cmd: &str, count: &str) -> Result<usize, CommandError> {
    count
        .parse()
        .map_err(|_| CommandError::usage(format!("{cmd}: invalid number of lines: '{count}'")))
}

async fn cmd_head(args: &[String], ctx: &mut CommandContext) -> CommandResult {
    let (count, operands) = line_count("head", args)?;
    let count = parse_count("head", &count)?;

    if operands.is_empty() {
        let mut written = 0;
        while written < count {
            let Some(line) = ctx.stdin.read_line().await else {
                break;
            };
            ctx.writeln(&line).await?;
            written += 1;
        }
        return Ok(ExitStatus::SUCCESS);
    }

    let (sources, status) = read_sources("head", &operands, ctx).await;
    let many = sources.len() > 1;
    let mut out = String::new();
    for (index, source) in sources.iter().enumerate() {
        if many {
            if index > 0 {
                out.push('\n');
            }
            out.push_str(&format!("==> {} <==\n", source.name.as_deref().unwrap_or("-")));
        }
        for line in source.text.lines().take(count) {
            out.push_str(line);
            out.push('\n');
        }
    }
    ctx.write_out(&out).await?;
    Ok(ExitStatus::code(status))
}

async fn cmd_tail(args: &[String], ctx: &mut CommandContext) -> CommandResult {
    let (count, operands) = line_count("tail", args)?;
    let from_start = count.strip_prefix('+').map(|n| parse_count("tail", n)).transpose()?;
    let count = match from_start {
        Some(_) => 0,
        None => parse_count("tail", &count)?,
    };

    let (sources, status) = read_sources("tail", &operands, ctx).await;
    let many = sources.len() > 1;
    let mut out = String::new();
    for (index, source) in sources.iter().enumerate() {
        if many {
            if index > 0 {
                out.push('\n');
            }
            out.push_str(&format!("==> {} <==\n", source.name.as_deref().unwrap_or("-")));
        }
        let lines: Vec<&str> = match from_start {
            Some(start) => source.text.lines().skip(start.saturating_sub(1)).collect(),
            None => {
                let mut window = VecDeque::with_capacity(count);
                for line in source.text.lines() {
                    if window.len() == count {
                        window.pop_front();
                    }
                    if count > 0 {
                        window.push_back(line);
                    }
                }
                window.into_iter().collect()
            }
        };
        for line in lines {
            out.push_str(line);
            out.push('\n');
        }
    }
    ctx.write_out(&out).await?;
    Ok(ExitStatus::code(status))
}

/// Leading number of a line for `sort -n`; lines without one sort as 0.
fn numeric_key(line: &str) -> f64 {
    let trimmed = line.trim_start();
    let end = trimmed
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || c == '.' || (i == 0 && c == '-')))
        .map_or(trimmed.len(), |(i, _)| i);
    trimmed[..end].parse().unwrap_or(0.0)
}

async fn cmd_sort(args: &[String], ctx: &mut CommandContext) -> CommandResult {
    let flags = Flags::parse("sort", args, "rnu")?;
    let (sources, status) = read_sources("sort", &flags.operands, ctx).await;
    let mut lines: Vec<&str> = sources.iter().flat_map(|s| s.text.lines()).collect();

    let numeric = flags.has('n');
    let key_order = |a: &&str, b: &&str| {
        if numeric {
            numeric_key(a)
                .partial_cmp(&numeric_key(b))
                .unwrap_or(Ordering::Equal)
        } else {
            a.cmp(b)
        }
    };
    lines.sort_by(|a, b| key_order(a, b).then_with(|| a.cmp(b)));
    if flags.has('u') {
        lines.dedup_by(|a, b| key_order(&*a, &*b) == Ordering::Equal);
    }
    if flags.has('r') {
        lines.reverse();
    }

    let mut out = String::new();
    for line in lines {
        out.push_str(line);
        out.push('\n');
    }
    ctx.write_out(&out).await?;
    Ok(ExitStatus::code(status))
}

async fn cmd_uniq(args: &[String], ctx: &mut CommandContext) -> CommandResult {
    let flags = Flags::parse("uniq", args, "c")?;
    let (sources, status) = read_sources("uniq", &flags.operands, ctx).await;

    let mut groups: Vec<(&str, usize)> = Vec::new();
    for line in sources.iter().flat_map(|s| s.text.lines()) {
        match groups.last_mut() {
            Some((last, count)) if *last == line => *count += 1,
            _ => groups.push((line, 1)),
        }
    }

    let mut out = String::new();
    for (line, count) in groups {
        if flags.has('c') {
            out.push_str(&format!("{count:>7} {line}\n"));
        } else {
            out.push_str(line);
            out.push('\n');
        }
    }
    ctx.write_out(&out).await?;
    Ok(ExitStatus::code(status))
}

async fn cmd_tee(args: &[String], ctx: &mut CommandContext) -> CommandResult {
    let flags = Flags::parse("tee", args, "a")?;
    let mode = if flags.has('a') {
        WriteMode::Append
    } else {
        WriteMode::Truncate
    };

    let mut status = ExitStatus::SUCCESS;
    let mut paths = Vec::with_capacity(flags.operands.len());
    for operand in &flags.operands {
        let path = ctx.resolve_path(operand);
        match ctx.fs.write_file(&path, b"", mode).await {
            Ok(()) => paths.push(path),
            Err(err) => {
                ctx.write_err(&format!("tee: {operand}: {err}")).await;
                status = ExitStatus::FAILURE;
            }
        }
    }

    while let Some(chunk) = ctx.stdin.read_chunk().await {
        for path in &paths {
            ctx.fs.write_file(path, &chunk, WriteMode::Append).await?;
        }
        ctx.stdout.write(chunk).await?;
    }
    Ok(status)
}

async fn cmd_seq(args: &[String], ctx: &mut CommandContext) -> CommandResult {
    let numbers = args
        .iter()
        .map(|arg| {
            arg.parse::<i64>().map_err(|_| {
                CommandError::failed(format!("seq: invalid integer argument: '{arg}'"))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    let (first, step, last) = match numbers.as_slice() {
        [last] => (1, 1, *last),
        [first, last] => (*first, 1, *last),
        [first, step, last] => (*first, *step, *last),
        _ => return Err(CommandError::usage("usage: seq [FIRST [INCREMENT]] LAST")),
    };
    if step == 0 {
        return Err(CommandError::failed("seq: invalid Zero increment value: '0'"));
    }

    let mut buffer = String::new();
    let mut n = first;
    while (step > 0 && n <= last) || (step < 0 && n >= last) {
        buffer.push_str(&n.to_string());
        buffer.push('\n');
        if buffer.len() >= STREAM_CHUNK_SIZE {
            ctx.write_out(&std::mem::take(&mut buffer)).await?;
        }
        let Some(next) = n.checked_add(step) else {
            break;
        };
        n = next;
    }
    ctx.write_out(&buffer).await?;
    Ok(ExitStatus::SUCCESS)
}

/// Repeats until its reader goes away or a signal arrives.
async fn cmd_yes(args: &[String], ctx: &mut CommandContext) -> CommandResult {
    let line = if args.is_empty() {
        "y".to_string()
    } else {
        args.join(" ")
    };
    loop {
        if let Some(signal) = ctx.signals.received() {
            return Ok(ExitStatus::from_signal(signal));
        }
        ctx.writeln(&line).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_escape_sequences() {
        assert_eq!(interpret_escape_sequences(r"a\tb\n"), ("a\tb\n".to_string(), false));
        assert_eq!(interpret_escape_sequences(r"keep\q"), (r"keep\q".to_string(), false));
        assert_eq!(interpret_escape_sequences(r"stop\chere"), ("stop".to_string(), true));
    }

    #[test]
    fn test_printf_conversions() {
        assert_eq!(render_printf(r"%s=%d\n", &args(&["x", "42"])), "x=42\n");
        assert_eq!(render_printf("%5s|%-5s|", &args(&["ab", "cd"])), "   ab|cd   |");
        assert_eq!(render_printf("%03d %+d", &args(&["7", "3"])), "007 +3");
        assert_eq!(render_printf("%.2f %x %%", &args(&["3.14159", "255"])), "3.14 ff %");
        assert_eq!(render_printf("%05d", &args(&["-42"])), "-0042");
    }

    #[test]
    fn test_printf_reuses_format() {
        assert_eq!(render_printf(r"%s\n", &args(&["a", "b", "c"])), "a\nb\nc\n");
        assert_eq!(render_printf("plain", &args(&["ignored"])), "plain");
        assert_eq!(render_printf("%s-%s,", &args(&["1", "2", "3"])), "1-2,3-,");
    }

    #[test]
    fn test_printf_huge_width_is_clamped() {
        let out = render_printf("%99999999999999999999s|", &args(&["x"]));
        assert_eq!(out.len(), MAX_FIELD_WIDTH + 1);
        assert!(out.ends_with("x|"));
        let out = render_printf("%.99999999999999999999s|", &args(&["abc"]));
        assert_eq!(out, "abc|");
    }

    #[test]
    fn test_line_count_forms() {
        assert_eq!(line_count("head", &args(&["-n", "3", "f"])).unwrap(), ("3".into(), args(&["f"])));
        assert_eq!(line_count("head", &args(&["-5"])).unwrap().0, "5");
        assert_eq!(line_count("tail", &args(&["-n+2"])).unwrap().0, "+2");
        assert!(line_count("head", &args(&["-n"])).is_err());
    }

    #[test]
    fn test_numeric_key() {
        assert_eq!(numeric_key("10 apples"), 10.0);
        assert_eq!(numeric_key("  -2.5x"), -2.5);
        assert_eq!(numeric_key("abc"), 0.0);
    }
}
