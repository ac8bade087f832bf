//! Filesystem builtins: ls, cat, mkdir, rm, touch

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;

use crate::process::{ExitStatus, STREAM_CHUNK_SIZE};
use crate::registry::{CommandContext, CommandError, CommandProvider, CommandResult};
use crate::vfs::{join_path, FileInfo, FileSystem, FsError, FsResult, WriteMode};

use super::Flags;

pub struct FsBuiltins;

#[async_trait]
impl CommandProvider for FsBuiltins {
    async fn execute(&self, argv: &[String], ctx: &mut CommandContext) -> CommandResult {
        let Some((name, args)) = argv.split_first() else {
            return Ok(ExitStatus::FAILURE);
        };
        match name.as_str() {
            "ls" => cmd_ls(args, ctx).await,
            "cat" => cmd_cat(args, ctx).await,
            "mkdir" => cmd_mkdir(args, ctx).await,
            "rm" => cmd_rm(args, ctx).await,
            "touch" => cmd_touch(args, ctx).await,
            other => Err(CommandError::with_code(
                format!("vsh: {other}: command not found"),
                127,
            )),
        }
    }
}

pub(crate) fn format_mtime(mtime: u64) -> String {
    const MONTHS: [&str; 12] = [
        "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
    ];
    let is_leap = |y: u64| (y % 4 == 0 && y % 100 != 0) || y % 400 == 0;

    let mut days = mtime / 86_400;
    let time_of_day = mtime % 86_400;
    let mut year = 1970;
    loop {
        let in_year = if is_leap(year) { 366 } else { 365 };
        if days < in_year {
            break;
        }
        days -= in_year;
        year += 1;
    }
    let month_days = [31, if is_leap(year) { 29 } else { 28 }, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];
    let mut month = 0;
    while month < 11 && days >= month_days[month] {
        days -= month_days[month];
        month += 1;
    }

    format!(
        "{} {:>2} {:02}:{:02}",
        MONTHS[month],
        days + 1,
        time_of_day / 3600,
        (time_of_day % 3600) / 60
    )
}

fn format_long(info: &FileInfo) -> String {
    let mode = if info.is_dir { "drwxr-xr-x" } else { "-rw-r--r--" };
    format!(
        "{mode} {:>8} {} {}",
        info.size,
        format_mtime(info.mtime),
        info.name
    )
}

async fn cmd_ls(args: &[String], ctx: &mut CommandContext) -> CommandResult {
    let flags = Flags::parse("ls", args, "al1")?;
    let all = flags.has('a');
    let long = flags.has('l');
    let targets = if flags.operands.is_empty() {
        vec![".".to_string()]
    } else {
        flags.operands.clone()
    };

    let mut status = ExitStatus::SUCCESS;
    let mut out = String::new();
    for (index, target) in targets.iter().enumerate() {
        let path = ctx.resolve_path(target);
        let info = match ctx.fs.stat(&path).await {
            Ok(info) => info,
            Err(err) => {
                ctx.write_err(&format!("ls: cannot access '{target}': {err}"))
                    .await;
                status = ExitStatus::code(2);
                continue;
            }
        };

        if !info.is_dir {
            if long {
                out.push_str(&format_long(&FileInfo {
                    name: target.clone(),
                    ..info
                }));
            } else {
                out.push_str(target);
            }
            out.push('\n');
            continue;
        }

        if targets.len() > 1 {
            if index > 0 {
                out.push('\n');
            }
            out.push_str(target);
            out.push_str(":\n");
        }
        let entries = ctx.fs.list_directory(&path).await?;
        for entry in entries.iter().filter(|e| all || !e.name.starts_with('.')) {
            if long {
                out.push_str(&format_long(entry));
            } else {
                out.push_str(&entry.name);
            }
            out.push('\n');
        }
    }
    ctx.write_out(&out).await?;
    Ok(status)
}

async fn cmd_cat(args: &[String], ctx: &mut CommandContext) -> CommandResult {
    let flags = Flags::parse("cat", args, "")?;
    let operands = if flags.operands.is_empty() {
        vec!["-".to_string()]
    } else {
        flags.operands
    };

    let mut status = ExitStatus::SUCCESS;
    for operand in &operands {
        if operand == "-" {
            while let Some(chunk) = ctx.stdin.read_chunk().await {
                ctx.stdout.write(chunk).await?;
            }
            continue;
        }
        let path = ctx.resolve_path(operand);
        match ctx.fs.read_file(&path).await {
            Ok(data) => {
                let mut offset = 0;
                while offset < data.len() {
                    let end = (offset + STREAM_CHUNK_SIZE).min(data.len());
                    ctx.stdout.write(data.slice(offset..end)).await?;
                    offset = end;
                }
            }
            Err(err) => {
                ctx.write_err(&format!("cat: {operand}: {err}")).await;
                status = ExitStatus::FAILURE;
            }
        }
    }
    Ok(status)
}

async fn create_parents(fs: &dyn FileSystem, path: &str) -> FsResult<()> {
    let mut current = String::from("/");
    for part in path.split('/').filter(|p| !p.is_empty()) {
        current = join_path(&current, part);
        match fs.stat(&current).await {
            Ok(info) if info.is_dir => {}
            Ok(_) => return Err(FsError::not_directory(&current)),
            Err(_) => fs.create_dir(&current).await?,
        }
    }
    Ok(())
}

async fn cmd_mkdir(args: &[String], ctx: &mut CommandContext) -> CommandResult {
    let flags = Flags::parse("mkdir", args, "p")?;
    if flags.operands.is_empty() {
        return Err(CommandError::usage("mkdir: missing operand"));
    }

    let mut status = ExitStatus::SUCCESS;
    for operand in &flags.operands {
        let path = ctx.resolve_path(operand);
        let result = if flags.has('p') {
            create_parents(ctx.fs.as_ref(), &path).await
        } else {
            ctx.fs.create_dir(&path).await
        };
        if let Err(err) = result {
            ctx.write_err(&format!("mkdir: cannot create directory '{operand}': {err}"))
                .await;
            status = ExitStatus::FAILURE;
        }
    }
    Ok(status)
}

fn remove_tree<'a>(
    fs: &'a dyn FileSystem,
    path: &'a str,
) -> Pin<Box<dyn Future<Output = FsResult<()>> + Send + 'a>> {
    Box::pin(async move {
        if fs.stat(path).await?.is_dir {
            for entry in fs.list_directory(path).await? {
                remove_tree(fs, &join_path(path, &entry.name)).await?;
            }
        }
        fs.remove(path).await
    })
}

async fn cmd_rm(args: &[String], ctx: &mut CommandContext) -> CommandResult {
    let flags = Flags::parse("rm", args, "rRf")?;
    let recursive = flags.has('r') || flags.has('R');
    let force = flags.has('f');
    if flags.operands.is_empty() && !force {
        return Err(CommandError::usage("rm: missing operand"));
    }

    let mut status = ExitStatus::SUCCESS;
    for operand in &flags.operands {
        let path = ctx.resolve_path(operand);
        let result = match ctx.fs.stat(&path).await {
            _ if path == "/" => Err("refusing to remove '/'".to_string()),
            Err(_) if force => continue,
            Err(err) => Err(err.to_string()),
            Ok(info) if info.is_dir && !recursive => Err(FsError::is_directory(&path).to_string()),
            Ok(_) => remove_tree(ctx.fs.as_ref(), &path)
                .await
                .map_err(|err| err.to_string()),
        };
        if let Err(reason) = result {
            ctx.write_err(&format!("rm: cannot remove '{operand}': {reason}"))
                .await;
            status = ExitStatus::FAILURE;
        }
    }
    Ok(status)
}

async fn cmd_touch(args: &[String], ctx: &mut CommandContext) -> CommandResult {
    let flags = Flags::parse("touch", args, "")?;
    if flags.operands.is_empty() {
        return Err(CommandError::usage("touch: missing file operand"));
    }

    let mut status = ExitStatus::SUCCESS;
    for operand in &flags.operands {
        let path = ctx.resolve_path(operand);
        // Appending nothing creates the file or refreshes its mtime
        if let Err(err) = ctx.fs.write_file(&path, b"", WriteMode::Append).await {
            ctx.write_err(&format!("touch: cannot touch '{operand}': {err}"))
                .await;
            status = ExitStatus::FAILURE;
        }
    }
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_mtime() {
        assert_eq!(format_mtime(0), "Jan  1 00:00");
        // 2024-02-29 13:45 UTC
        assert_eq!(format_mtime(1_709_214_300), "Feb 29 13:45");
    }

    #[test]
    fn test_format_long() {
        let info = FileInfo {
            path: "/a".into(),
            name: "a".into(),
            size: 12,
            is_dir: false,
            mtime: 0,
        };
        assert_eq!(format_long(&info), "-rw-r--r--       12 Jan  1 00:00 a");
    }
}
