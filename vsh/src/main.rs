use clap::Parser;
use std::io::Write;
use std::path::{Path, PathBuf};
use vsh::{OutputCallbacks, Shell, ShellBuilder, Signal};
use vsh_config::{LogFormat, LoggingConfig, VshConfig};

/// vsh - POSIX-style shell over an in-memory virtual filesystem
#[derive(Parser, Debug)]
#[command(name = "vsh", version, about)]
struct Args {
    /// Execute command and exit
    #[arg(short = 'c')]
    command: Option<String>,

    /// Config file layered over the default locations
    #[arg(long, env = "VSH_CONFIG")]
    config: Option<PathBuf>,

    /// Host directory copied into the home directory before start
    #[arg(long)]
    seed_dir: Option<PathBuf>,

    /// Print the parsed script as JSON instead of running it
    #[arg(long)]
    ast: bool,

    /// Script file to execute
    script: Option<PathBuf>,

    /// Arguments passed to the script as $1, $2, ...
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let loader = match &args.config {
        Some(path) => vsh_config::ConfigLoader::new().with_file(path),
        None => vsh_config::ConfigLoader::new(),
    };
    let config = match loader.load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("vsh: config: {e}");
            VshConfig::default()
        }
    };
    init_logging(&config.logging);

    if args.ast {
        let source = match (&args.command, &args.script) {
            (Some(command), _) => command.clone(),
            (None, Some(path)) => std::fs::read_to_string(path)?,
            (None, None) => {
                eprintln!("vsh: --ast needs -c or a script");
                std::process::exit(2);
            }
        };
        match vsh::parse(&source) {
            Ok(script) => println!("{}", serde_json::to_string_pretty(&script)?),
            Err(e) => {
                eprintln!("vsh: {e}");
                std::process::exit(e.exit_code());
            }
        }
        return Ok(());
    }

    let mut builder = Shell::builder().config(&config);
    if let Some(dir) = &args.seed_dir {
        builder = seed_from_host(builder, dir, &config.shell.home)?;
    }

    if let Some(command) = args.command {
        let shell = builder.build();
        let (code, _) = run_line(&shell, &command).await;
        std::process::exit(code);
    } else if let Some(script_path) = args.script {
        let content = match std::fs::read(&script_path) {
            Ok(content) => content,
            Err(e) => {
                eprintln!("vsh: {}: {}", script_path.display(), e);
                std::process::exit(127);
            }
        };
        let name = script_path
            .file_name()
            .map_or_else(|| "script".into(), |n| n.to_string_lossy().into_owned());
        let vfs_path = format!("{}/{}", config.shell.home.trim_end_matches('/'), name);
        let shell = builder.seed(vfs_path.clone(), content).build();

        let mut line = format!("sh {}", quote(&vfs_path));
        for arg in &args.args {
            line.push(' ');
            line.push_str(&quote(arg));
        }
        let (code, _) = run_line(&shell, &line).await;
        std::process::exit(code);
    } else {
        let shell = builder.build();
        run_repl(&shell, &config).await?;
    }

    Ok(())
}

fn init_logging(config: &LoggingConfig) {
    let mut directives = config.level.as_str().to_string();
    if !config.filter.is_empty() {
        directives.push(',');
        directives.push_str(&config.filter);
    }
    let builder = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(directives)),
        )
        .with_writer(std::io::stderr);
    match config.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.pretty().init(),
        LogFormat::Compact => builder.compact().init(),
    }
}

/// Single-quote `arg` for the shell's own parser.
fn quote(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', "'\\''"))
}

/// Queue every file under `dir` as a seed below `home`.
fn seed_from_host(
    mut builder: ShellBuilder,
    dir: &Path,
    home: &str,
) -> std::io::Result<ShellBuilder> {
    let mut pending = vec![(dir.to_path_buf(), home.trim_end_matches('/').to_string())];
    while let Some((host_dir, vfs_dir)) = pending.pop() {
        for entry in std::fs::read_dir(&host_dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let vfs_path = format!("{vfs_dir}/{name}");
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                pending.push((entry.path(), vfs_path));
            } else if file_type.is_file() {
                tracing::debug!(host = %entry.path().display(), vfs = %vfs_path, "seeding");
                builder = builder.seed(vfs_path, std::fs::read(entry.path())?);
            }
        }
    }
    Ok(builder)
}

fn stream_callbacks() -> OutputCallbacks {
    OutputCallbacks::new()
        .on_stdout(|chunk| {
            let mut out = std::io::stdout().lock();
            let _ = out.write_all(chunk.as_bytes());
            let _ = out.flush();
        })
        .on_stderr(|chunk| {
            let mut err = std::io::stderr().lock();
            let _ = err.write_all(chunk.as_bytes());
            let _ = err.flush();
        })
}

/// Run `line` with output streamed to the terminal. Ctrl-C interrupts the
/// running job instead of the process. Returns the status and whether the
/// line ran `exit`.
async fn run_line(shell: &Shell, line: &str) -> (i32, bool) {
    let callbacks = stream_callbacks();
    let run = shell.run_with(line, Some(&callbacks));
    tokio::pin!(run);
    let result = loop {
        tokio::select! {
            result = &mut run => break result,
            _ = tokio::signal::ctrl_c() => {
                shell.signal(Signal::Interrupt);
            }
        }
    };
    match result {
        Ok(result) => (result.code, result.exited),
        Err(e) => {
            eprintln!("vsh: {e}");
            (e.exit_code(), false)
        }
    }
}

fn render_prompt(template: &str, shell: &Shell, status: i32) -> String {
    let cwd = shell.cwd();
    let cwd = match shell.var("HOME") {
        Some(home) if cwd == home => "~".to_string(),
        Some(home) if cwd.starts_with(&format!("{home}/")) => format!("~{}", &cwd[home.len()..]),
        _ => cwd,
    };
    template
        .replace("{cwd}", &cwd)
        .replace("{status}", &status.to_string())
        .replace(
            "{user}",
            &std::env::var("USER").unwrap_or_else(|_| "user".to_string()),
        )
}

async fn run_repl(shell: &Shell, config: &VshConfig) -> Result<(), Box<dyn std::error::Error>> {
    use rustyline::error::ReadlineError;
    use rustyline::{Config, DefaultEditor};

    let history = &config.shell.history;
    let rl_config = Config::builder()
        .max_history_size(history.max_entries)?
        .history_ignore_dups(true)?
        .history_ignore_space(true)
        .build();
    let mut rl = DefaultEditor::with_config(rl_config)?;

    let history_path = history.path();
    if history.enabled {
        let _ = rl.load_history(&history_path);
    }

    println!("vsh v{}", env!("CARGO_PKG_VERSION"));
    println!("Type 'exit' to quit.");
    println!();

    let mut last_exit_code = 0;

    loop {
        let prompt = render_prompt(&config.shell.prompt, shell, last_exit_code);
        match rl.readline(&prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if history.enabled {
                    let _ = rl.add_history_entry(line);
                }
                let (code, exited) = run_line(shell, line).await;
                last_exit_code = code;
                if exited {
                    break;
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("exit");
                break;
            }
            Err(err) => {
                eprintln!("Error: {err:?}");
                break;
            }
        }
    }

    if history.enabled {
        let _ = rl.save_history(&history_path);
    }

    if last_exit_code != 0 {
        std::process::exit(last_exit_code);
    }
    Ok(())
}
