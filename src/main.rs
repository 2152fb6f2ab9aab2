use asyncplate::{
    diagnostics::{report_config_error, report_render_error},
    Config, Environment, Value,
};
use std::{env, fs, path::PathBuf, process};
use tracing_subscriber::filter::LevelFilter;

const USAGE: &str =
    "Usage: asyncplate <template> [--root DIR] [--context FILE.json] [--config FILE.toml] [--sync]";

struct Args {
    template: String,
    root: Option<PathBuf>,
    context: Option<PathBuf>,
    config: Option<PathBuf>,
    sync: bool,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Args, String> {
    let mut template = None;
    let mut root = None;
    let mut context = None;
    let mut config = None;
    let mut sync = false;
    while let Some(arg) = args.next() {
        if !arg.starts_with("--") {
            if template.is_some() {
                return Err(format!("Unexpected argument `{arg}`"));
            }
            template = Some(arg);
            continue;
        }
        match arg.as_str() {
            "--root" => root = Some(PathBuf::from(value_for(&arg, args.next())?)),
            "--context" => context = Some(PathBuf::from(value_for(&arg, args.next())?)),
            "--config" => config = Some(PathBuf::from(value_for(&arg, args.next())?)),
            "--sync" => sync = true,
            flag => return Err(format!("Unknown flag `{flag}`")),
        }
    }
    let template = template.ok_or_else(|| "Missing template name".to_string())?;
    Ok(Args {
        template,
        root,
        context,
        config,
        sync,
    })
}

fn value_for(flag: &str, value: Option<String>) -> Result<String, String> {
    value.ok_or_else(|| format!("`{flag}` expects a value"))
}

fn init_tracing() {
    let level = env::var("ASYNCPLATE_LOG")
        .ok()
        .and_then(|level| level.parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::WARN);
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_context(path: &PathBuf) -> Result<Vec<(String, Value)>, String> {
    let content = fs::read_to_string(path)
        .map_err(|err| format!("Failed to read {}: {}", path.display(), err))?;
    let json: serde_json::Value = serde_json::from_str(&content)
        .map_err(|err| format!("Invalid context {}: {}", path.display(), err))?;
    match Value::from(json) {
        Value::Map(entries) => Ok(entries
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()),
        other => Err(format!(
            "Context {} must be a JSON object, found {}",
            path.display(),
            other.type_name()
        )),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    init_tracing();

    let args = match parse_args(env::args().skip(1)) {
        Ok(args) => args,
        Err(message) => {
            eprintln!("{message}");
            eprintln!("{USAGE}");
            process::exit(2);
        }
    };

    let mut config = match &args.config {
        Some(path) => match Config::load(path) {
            Ok(config) => config,
            Err(err) => {
                report_config_error(&err);
                process::exit(1);
            }
        },
        None => Config::default(),
    };
    config.apply_env();
    if let Some(root) = args.root {
        config.template_root = Some(root);
    }
    if config.template_root.is_none() {
        config.template_root = Some(PathBuf::from("."));
    }
    if args.sync {
        config.async_mode = false;
    }

    let vars = match &args.context {
        Some(path) => match load_context(path) {
            Ok(vars) => vars,
            Err(message) => {
                eprintln!("{message}");
                process::exit(1);
            }
        },
        None => Vec::new(),
    };

    let env = Environment::new(config);
    match env.render(&args.template, vars).await {
        Ok(output) => print!("{output}"),
        Err(err) => {
            report_render_error(&err);
            process::exit(1);
        }
    }
}
