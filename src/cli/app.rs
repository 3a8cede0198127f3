//! Main CLI application

use crate::config::{load_store, load_store_auto, ConfigStore};
use crate::error::{AssetlineError, ConfigError, Result};
use crate::plugin::PluginRegistry;
use crate::runner::{Context, PlannedStep, Runner, Verbosity};
use crate::watch::{watch_roots, ConsoleReload, FileWatcher, WatchSession};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use clap_complete::Shell;
use colored::Colorize;
use std::io;
use std::path::PathBuf;
use std::sync::{mpsc, Arc};
use tracing_subscriber::filter::EnvFilter;

/// Environment variable holding a tracing filter directive
pub const LOG_ENV: &str = "ASSETLINE_LOG";

/// CLI application
pub struct App {
    /// The loaded configuration
    store: ConfigStore,
    /// Config file path
    config_path: PathBuf,
    verbosity: Verbosity,
}

impl App {
    /// Load the configuration found from the current directory upward
    pub fn new(verbosity: Verbosity) -> Result<Self> {
        let (store, config_path) = load_store_auto()?;
        Ok(App {
            store,
            config_path,
            verbosity,
        })
    }

    /// Load a specific config file
    pub fn with_config_file(path: PathBuf, verbosity: Verbosity) -> Result<Self> {
        let store = load_store(&path)?;
        Ok(App {
            store,
            config_path: path,
            verbosity,
        })
    }

    fn context(&self) -> Context {
        Context::new()
            .with_config_path(self.config_path.clone())
            .with_verbosity(self.verbosity)
    }

    fn runner(&self) -> Runner {
        let registry = PluginRegistry::with_builtins()
            .timeout(self.store.settings().plugin_timeout)
            .build();
        Runner::new(self.store.clone(), Arc::new(registry)).with_context(self.context())
    }

    /// Run (or with `dry_run`, only resolve) a sequence
    pub fn run_sequence(&self, name: &str, dry_run: bool) -> Result<()> {
        let mut runner = self.runner();
        if dry_run {
            let planned = runner.plan(name, &[name.to_string()])?;
            print_plan(&planned)?;
            return Ok(());
        }

        let report = runner.run_sequence(name)?;
        let context = runner.context();
        context.print_info(&format!(
            "{} '{}' finished ({} steps)",
            "Done".green().bold(),
            report.sequence,
            report.steps.len()
        ));
        for artifact in report.artifacts() {
            context.print_debug(&format!("artifact: {}", artifact.display()));
        }
        Ok(())
    }

    /// Watch the configured rules until interrupted
    pub fn watch(&self) -> Result<()> {
        if self.store.watch_rules().is_empty() {
            return Err(ConfigError::Invalid("no watch rules are configured".to_string()).into());
        }

        let runner = self.runner();
        let context = runner.context().clone();
        let debounce = self.store.settings().debounce;
        let sink = Arc::new(ConsoleReload::new(context.clone()));

        let mut session = WatchSession::from_config(runner, sink)?;
        let dispatcher = session.dispatcher();
        let roots = watch_roots(dispatcher.root(), session.rules());
        let watcher = FileWatcher::start(dispatcher, roots, debounce)?;

        let (tx, rx) = mpsc::channel();
        ctrlc::set_handler(move || {
            let _ = tx.send(());
        })
        .map_err(io::Error::other)?;

        context.print_info("Watching for changes (Ctrl-C to stop)");
        let _ = rx.recv();

        context.print_info("Stopping");
        watcher.stop();
        session.stop();
        Ok(())
    }

    /// Print sequences, tasks, environments and watch rules
    pub fn list(&self) {
        println!("{}", "Sequences:".bold());
        for (name, steps) in self.store.sequences() {
            println!("  {:<20} {}", name.cyan(), steps.join(", "));
        }

        println!("{}", "Tasks:".bold());
        for task in self.store.tasks() {
            let targets: Vec<&str> = task.targets.keys().map(String::as_str).collect();
            println!(
                "  {:<20} [{}] {}",
                task.name.cyan(),
                task.plugin,
                targets.join(", ")
            );
        }

        println!("{}", "Environments:".bold());
        for env in self.store.environments() {
            println!("  {}", env.name.cyan());
        }

        if !self.store.watch_rules().is_empty() {
            println!("{}", "Watch rules:".bold());
            for rule in self.store.watch_rules() {
                let reload = if rule.livereload { " (livereload)" } else { "" };
                println!("  {:<20} {}{}", rule.name.cyan(), rule.tasks.join(", "), reload);
            }
        }
    }
}

fn print_plan(planned: &[PlannedStep]) -> Result<()> {
    for (index, step) in planned.iter().enumerate() {
        let plugin = step.plugin.as_deref().unwrap_or("-");
        println!("{}. {} ({})", index, step.step.to_string().cyan(), plugin);
        if step.options.is_empty() {
            continue;
        }
        let yaml = serde_yaml::to_string(step.options.as_map()).map_err(ConfigError::Yaml)?;
        for line in yaml.lines() {
            println!("     {}", line);
        }
    }
    Ok(())
}

/// Build the clap command
pub fn build_cli() -> Command {
    Command::new("assetline")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Configuration-driven asset build pipelines")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("file")
                .short('f')
                .long("file")
                .value_name("FILE")
                .value_parser(value_parser!(PathBuf))
                .help("Path to assetline.yml config file")
                .global(true),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .help("Only print plugin output and errors")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .arg(
            Arg::new("silent")
                .short('s')
                .long("silent")
                .help("Print no output")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Print verbose output")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .subcommand(
            Command::new("run")
                .about("Run a sequence, task or task:target")
                .arg(
                    Arg::new("sequence")
                        .value_name("SEQUENCE")
                        .required(true)
                        .help("Sequence name, task name or task:target"),
                )
                .arg(
                    Arg::new("dry-run")
                        .long("dry-run")
                        .action(ArgAction::SetTrue)
                        .help("Resolve every step and print its options without running it"),
                ),
        )
        .subcommand(Command::new("watch").about("Run watch rules when their files change"))
        .subcommand(
            Command::new("list")
                .about("List sequences, tasks, environments and watch rules"),
        )
        .subcommand(
            Command::new("completions")
                .about("Generate shell completions")
                .arg(
                    Arg::new("shell")
                        .value_name("SHELL")
                        .required(true)
                        .value_parser(value_parser!(Shell)),
                ),
        )
}

/// Get verbosity level from matches
fn get_verbosity(matches: &ArgMatches) -> Verbosity {
    if matches.get_flag("silent") {
        Verbosity::Silent
    } else if matches.get_flag("quiet") {
        Verbosity::Quiet
    } else if matches.get_flag("verbose") {
        Verbosity::Verbose
    } else {
        Verbosity::Normal
    }
}

/// Install the tracing subscriber; `ASSETLINE_LOG` overrides the level
fn init_tracing(verbosity: Verbosity) {
    let level = match verbosity {
        Verbosity::Verbose => "debug",
        Verbosity::Normal => "warn",
        Verbosity::Quiet | Verbosity::Silent => "error",
    };
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

/// Run the CLI application with the process arguments
pub fn run() -> Result<()> {
    run_from(std::env::args_os())
}

/// Run the CLI application with the given arguments
pub fn run_from<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let matches = match build_cli().try_get_matches_from(args) {
        Ok(matches) => matches,
        // --help and --version
        Err(err) if !err.use_stderr() => err.exit(),
        Err(err) => return Err(err.into()),
    };
    let verbosity = get_verbosity(&matches);
    init_tracing(verbosity);

    if let Some(("completions", sub)) = matches.subcommand() {
        if let Some(shell) = sub.get_one::<Shell>("shell").copied() {
            let mut command = build_cli();
            clap_complete::generate(shell, &mut command, "assetline", &mut io::stdout());
        }
        return Ok(());
    }

    let app = match matches.get_one::<PathBuf>("file") {
        Some(path) => App::with_config_file(path.clone(), verbosity)?,
        None => App::new(verbosity)?,
    };

    match matches.subcommand() {
        Some(("run", sub)) => {
            let name = sub
                .get_one::<String>("sequence")
                .ok_or_else(|| ConfigError::Invalid("a sequence name is required".to_string()))?;
            app.run_sequence(name, sub.get_flag("dry-run"))
        }
        Some(("watch", _)) => app.watch(),
        Some(("list", _)) => {
            app.list();
            Ok(())
        }
        _ => Err(AssetlineError::Config(ConfigError::Invalid(
            "unknown command".to_string(),
        ))),
    }
}
