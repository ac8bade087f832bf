//! Builtins that act on the session rather than on data

use std::time::Duration;

use async_trait::async_trait;

use crate::environment::{is_valid_name, read_env, write_env};
use crate::eval::ExitArgs;
use crate::process::ExitStatus;
use crate::registry::{CommandContext, CommandError, CommandProvider, CommandResult, ScriptRequest};
use crate::vfs::FsError;

pub struct ShellBuiltins;

#[async_trait]
impl CommandProvider for ShellBuiltins {
    async fn execute(&self, argv: &[String], ctx: &mut CommandContext) -> CommandResult {
        let Some((name, args)) = argv.split_first() else {
            return Ok(ExitStatus::FAILURE);
        };
        match name.as_str() {
            "true" => Ok(ExitStatus::SUCCESS),
            "false" => Ok(ExitStatus::FAILURE),
            "cd" => cmd_cd(args, ctx).await,
            "pwd" => {
                let cwd = ctx.cwd.clone();
                ctx.writeln(&cwd).await?;
                Ok(ExitStatus::SUCCESS)
            }
            "export" => cmd_export(args, ctx).await,
            "unset" => cmd_unset(args, ctx).await,
            "env" => cmd_env(ctx).await,
            "test" => cmd_test(args, ctx).await,
            "[" => match args.split_last() {
                Some((last, rest)) if last == "]" => cmd_test(rest, ctx).await,
                _ => Err(CommandError::usage("[: missing `]'")),
            },
            "sleep" => cmd_sleep(args, ctx).await,
            "sh" => cmd_sh(args, ctx).await,
            "source" | "." => cmd_source(name, args, ctx).await,
            "exit" => cmd_exit(args),
            other => Err(CommandError::with_code(
                format!("vsh: {other}: command not found"),
                127,
            )),
        }
    }
}

/// `exit` as a pipeline stage ends only that stage.
fn cmd_exit(args: &[String]) -> CommandResult {
    match ExitArgs::parse(args) {
        ExitArgs::Code(code) => Ok(ExitStatus::code(code)),
        bad => Err(CommandError::usage(bad.diagnostic().unwrap_or_default())),
    }
}

async fn cmd_cd(args: &[String], ctx: &mut CommandContext) -> CommandResult {
    let back = args.first().is_some_and(|a| a == "-");
    let target = match args.first() {
        None => ctx.var("HOME").unwrap_or("/").to_string(),
        Some(_) if back => ctx
            .var("OLDPWD")
            .map(str::to_string)
            .ok_or_else(|| CommandError::failed("cd: OLDPWD not set"))?,
        Some(dir) => dir.clone(),
    };

    let path = ctx.resolve_path(&target);
    let info = ctx
        .fs
        .stat(&path)
        .await
        .map_err(|err| CommandError::failed(format!("cd: {target}: {err}")))?;
    if !info.is_dir {
        return Err(CommandError::failed(format!(
            "cd: {target}: {}",
            FsError::not_directory(&path)
        )));
    }

    write_env(&ctx.environment).set_cwd(&path);
    ctx.cwd.clone_from(&path);
    if back {
        ctx.writeln(&path).await?;
    }
    Ok(ExitStatus::SUCCESS)
}

async fn cmd_export(args: &[String], ctx: &mut CommandContext) -> CommandResult {
    if args.is_empty() {
        let mut vars: Vec<(String, String)> = read_env(&ctx.environment)
            .vars
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        vars.sort();
        for (name, value) in vars {
            ctx.writeln(&format!("export {name}=\"{value}\"")).await?;
        }
        return Ok(ExitStatus::SUCCESS);
    }

    let mut status = ExitStatus::SUCCESS;
    for arg in args {
        let (name, value) = match arg.split_once('=') {
            Some((name, value)) => (name, Some(value)),
            None => (arg.as_str(), None),
        };
        if !is_valid_name(name) {
            ctx.write_err(&format!("export: `{arg}': not a valid identifier"))
                .await;
            status = ExitStatus::FAILURE;
            continue;
        }
        if let Some(value) = value {
            write_env(&ctx.environment).set_var(name, value);
            ctx.env.insert(name.to_string(), value.to_string());
        }
    }
    Ok(status)
}

async fn cmd_unset(args: &[String], ctx: &mut CommandContext) -> CommandResult {
    let mut status = ExitStatus::SUCCESS;
    for name in args {
        if !is_valid_name(name) {
            ctx.write_err(&format!("unset: `{name}': not a valid identifier"))
                .await;
            status = ExitStatus::FAILURE;
            continue;
        }
        write_env(&ctx.environment).unset_var(name);
        ctx.env.remove(name);
    }
    Ok(status)
}

async fn cmd_env(ctx: &mut CommandContext) -> CommandResult {
    let mut vars: Vec<(&String, &String)> = ctx.env.iter().collect();
    vars.sort();
    let mut out = String::new();
    for (name, value) in vars {
        out.push_str(name);
        out.push('=');
        out.push_str(value);
        out.push('\n');
    }
    ctx.write_out(&out).await?;
    Ok(ExitStatus::SUCCESS)
}

fn integer(cmd: &str, s: &str) -> Result<i64, CommandError> {
    s.trim()
        .parse()
        .map_err(|_| CommandError::usage(format!("{cmd}: {s}: integer expression expected")))
}

async fn cmd_test(args: &[String], ctx: &mut CommandContext) -> CommandResult {
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    let (negate, args) = match args.split_first() {
        Some((&"!", rest)) => (true, rest),
        _ => (false, args.as_slice()),
    };

    let result = match args {
        [] => false,
        [s] => !s.is_empty(),
        ["-n", s] => !s.is_empty(),
        ["-z", s] => s.is_empty(),
        [op @ ("-e" | "-f" | "-d" | "-s"), path] => {
            let full_path = ctx.resolve_path(path);
            match ctx.fs.stat(&full_path).await {
                Ok(info) => match *op {
                    "-f" => !info.is_dir,
                    "-d" => info.is_dir,
                    "-s" => info.size > 0,
                    _ => true,
                },
                Err(_) => false,
            }
        }
        [s1, "=" | "==", s2] => s1 == s2,
        [s1, "!=", s2] => s1 != s2,
        [n1, op @ ("-eq" | "-ne" | "-lt" | "-le" | "-gt" | "-ge"), n2] => {
            let (a, b) = (integer("test", n1)?, integer("test", n2)?);
            match *op {
                "-eq" => a == b,
                "-ne" => a != b,
                "-lt" => a < b,
                "-le" => a <= b,
                "-gt" => a > b,
                _ => a >= b,
            }
        }
        [_, op, _] => {
            return Err(CommandError::usage(format!(
                "test: {op}: binary operator expected"
            )))
        }
        _ => return Err(CommandError::usage("test: too many arguments")),
    };

    Ok(ExitStatus::from(result != negate))
}

fn parse_interval(arg: &str) -> Option<Duration> {
    let (number, scale) = match arg.char_indices().last() {
        Some((i, 's')) => (&arg[..i], 1.0),
        Some((i, 'm')) => (&arg[..i], 60.0),
        Some((i, 'h')) => (&arg[..i], 3600.0),
        Some((i, 'd')) => (&arg[..i], 86400.0),
        _ => (arg, 1.0),
    };
    let secs: f64 = number.parse().ok()?;
    Duration::try_from_secs_f64(secs * scale).ok()
}

/// Sleeps until the time is up or a signal arrives.
async fn cmd_sleep(args: &[String], ctx: &mut CommandContext) -> CommandResult {
    if args.is_empty() {
        return Err(CommandError::usage("sleep: missing operand"));
    }
    let mut total = Duration::ZERO;
    for arg in args {
        let interval = parse_interval(arg)
            .ok_or_else(|| CommandError::usage(format!("sleep: invalid time interval '{arg}'")))?;
        total = total.saturating_add(interval);
    }

    tokio::select! {
        () = tokio::time::sleep(total) => Ok(ExitStatus::SUCCESS),
        signal = ctx.signals.cancelled() => Ok(ExitStatus::from_signal(signal)),
    }
}

/// Load a script operand. A missing script counts as a missing command.
async fn load_script(path: &str, ctx: &CommandContext) -> Result<String, CommandError> {
    let full_path = ctx.resolve_path(path);
    match ctx.fs.read_file(&full_path).await {
        Ok(data) => Ok(String::from_utf8_lossy(&data).into_owned()),
        Err(FsError::NotFound(_) | FsError::NotDirectory(_)) => Err(CommandError::with_code(
            format!("vsh: {path}: command not found"),
            127,
        )),
        Err(err) => Err(CommandError::with_code(format!("sh: {path}: {err}"), 126)),
    }
}

async fn run(
    ctx: &CommandContext,
    name: String,
    source: String,
    args: Vec<String>,
    shared_env: bool,
) -> CommandResult {
    let request = ScriptRequest {
        name,
        source,
        args,
        shared_env,
        stdout: ctx.stdout.clone(),
        stderr: ctx.stderr.clone(),
        depth: ctx.depth,
    };
    Ok(ctx.host.run_script(request).await)
}

/// `sh -c CMD [NAME ARGS...]`, `sh FILE [ARGS...]`, or a script on stdin.
async fn cmd_sh(args: &[String], ctx: &mut CommandContext) -> CommandResult {
    match args.split_first() {
        None => {
            let source = ctx.stdin.read_to_string().await;
            run(ctx, "sh".to_string(), source, Vec::new(), false).await
        }
        Some((flag, rest)) if flag == "-c" => {
            let Some((command, rest)) = rest.split_first() else {
                return Err(CommandError::usage("sh: -c: option requires an argument"));
            };
            let (name, script_args) = match rest.split_first() {
                Some((name, script_args)) => (name.clone(), script_args.to_vec()),
                None => ("sh".to_string(), Vec::new()),
            };
            run(ctx, name, command.clone(), script_args, false).await
        }
        Some((path, rest)) => {
            let source = load_script(path, ctx).await?;
            run(ctx, path.clone(), source, rest.to_vec(), false).await
        }
    }
}

/// Run a script against the caller's own environment.
async fn cmd_source(name: &str, args: &[String], ctx: &mut CommandContext) -> CommandResult {
    let Some((path, rest)) = args.split_first() else {
        return Err(CommandError::usage(format!(
            "{name}: filename argument required"
        )));
    };
    let source = load_script(path, ctx).await?;
    run(ctx, path.clone(), source, rest.to_vec(), true).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_interval() {
        assert_eq!(parse_interval("2"), Some(Duration::from_secs(2)));
        assert_eq!(parse_interval("0.5"), Some(Duration::from_millis(500)));
        assert_eq!(parse_interval("1m"), Some(Duration::from_secs(60)));
        assert_eq!(parse_interval("abc"), None);
        assert_eq!(parse_interval("-1"), None);
    }
}
