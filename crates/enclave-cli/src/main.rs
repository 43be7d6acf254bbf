//! Enclave CLI - Run scripts against sandboxed contexts
//!
//! Usage:
//!   enclave run <script>...   Run script files against a sandbox
//!   enclave eval <source>     Evaluate source in the default context

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use enclave_engine::{to_json_lossy, Engine, Interpreter, JsResult, ObjectRef, PropertyKey, Value};
use enclave_sandbox::{ContextHandle, SandboxConfig, SandboxRuntime};
use serde_json::{json, Value as Json};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "enclave")]
#[command(author, version, about = "Run scripts against sandboxed global objects")]
#[command(
    long_about = "Enclave - evaluate scripts against a sandbox object.\n\n\
    Every global the script writes lands in the sandbox, which is printed afterwards."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// JSON configuration file (origin name, limits, access policy)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run script files against a sandbox context
    Run {
        /// Script files, run in order
        #[arg(required = true)]
        scripts: Vec<PathBuf>,

        /// Initial sandbox contents as a JSON object
        #[arg(long, conflicts_with = "sandbox_file")]
        sandbox: Option<String>,

        /// Read the initial sandbox contents from a JSON file
        #[arg(long)]
        sandbox_file: Option<PathBuf>,

        /// Give every script its own fresh sandbox
        #[arg(long)]
        fresh: bool,
    },

    /// Evaluate source in the default (unsandboxed) context
    Eval {
        /// Script source
        source: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = load_config(cli.config.as_deref()).await?;

    match cli.command {
        Commands::Run {
            scripts,
            sandbox,
            sandbox_file,
            fresh,
        } => {
            let seed = load_seed(sandbox.as_deref(), sandbox_file.as_deref()).await?;
            let mut sources = Vec::with_capacity(scripts.len());
            for path in &scripts {
                let source = tokio::fs::read_to_string(path)
                    .await
                    .with_context(|| format!("reading script {}", path.display()))?;
                sources.push((path.display().to_string(), source));
            }
            let mut runtime = SandboxRuntime::new(config);
            run_batch(&mut runtime, &sources, &seed, fresh, |report| {
                println!("{}", pretty(&report));
            })?;
        }

        Commands::Eval { source } => {
            let mut runtime = SandboxRuntime::new(config);
            let value = eval(&mut runtime, &source)?;
            println!("{}", pretty(&to_json_lossy(&value)));
        }
    }

    Ok(())
}

/// Reads the configuration file. No file means defaults.
async fn load_config(path: Option<&Path>) -> anyhow::Result<SandboxConfig> {
    let Some(path) = path else {
        return Ok(SandboxConfig::default());
    };
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading config {}", path.display()))?;
    let config = serde_json::from_str(&raw)
        .with_context(|| format!("parsing config {}", path.display()))?;
    info!(path = %path.display(), "loaded configuration");
    Ok(config)
}

/// Initial sandbox contents: inline JSON, a JSON file, or an empty object.
async fn load_seed(inline: Option<&str>, file: Option<&Path>) -> anyhow::Result<Json> {
    let raw = match (inline, file) {
        (Some(inline), _) => inline.to_string(),
        (None, Some(path)) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading sandbox {}", path.display()))?,
        (None, None) => return Ok(json!({})),
    };
    serde_json::from_str(&raw).context("sandbox is not valid JSON")
}

/// Compiles every script once, then runs each against the shared sandbox
/// (or a fresh one per script). Emits one report per script. A fresh
/// sandbox is forgotten once the next one replaces it, and every script is
/// forgotten after its run.
fn run_batch(
    runtime: &mut SandboxRuntime,
    sources: &[(String, String)],
    seed: &Json,
    fresh: bool,
    mut emit: impl FnMut(Json),
) -> anyhow::Result<()> {
    let mut compiled = Vec::with_capacity(sources.len());
    for (origin, source) in sources {
        let id = runtime.compile_script(source, Some(origin.as_str()))?;
        compiled.push((origin, id));
    }

    let mut shared: Option<ContextHandle> = None;
    for (origin, id) in compiled {
        let context = match shared {
            Some(context) if !fresh => context,
            previous => {
                if let Some(previous) = previous {
                    runtime.forget_context(previous);
                }
                let context = new_sandbox(runtime, seed)?;
                shared = Some(context);
                context
            }
        };
        debug!(%origin, %context, "running script");
        let value = runtime
            .run_script(id, Some(context))
            .map_err(|err| anyhow!("{}: {}", origin, err))?;
        let snapshot = runtime
            .snapshot(context)
            .map_err(|err| anyhow!("{}: {}", origin, err))?;
        emit(json!({
            "script": origin,
            "result": to_json_lossy(&value),
            "sandbox": snapshot,
        }));
        runtime.forget_script(id);
    }
    Ok(())
}

/// A sandbox seeded from JSON, with a non-enumerable `console`.
fn new_sandbox(runtime: &mut SandboxRuntime, seed: &Json) -> anyhow::Result<ContextHandle> {
    let handle = runtime.create_sandbox_from_json(seed)?;
    let store = runtime
        .sandbox(handle)
        .map_err(|err| anyhow!("{}", err))?;
    store.define_own(
        PropertyKey::from("console"),
        Value::Object(console(runtime.engine())),
        false,
    );
    Ok(handle)
}

fn eval(runtime: &mut SandboxRuntime, source: &str) -> anyhow::Result<Value> {
    let engine = runtime.engine().clone();
    let global = engine.global(engine.default_context())?;
    global.define_own(
        PropertyKey::from("console"),
        Value::Object(console(&engine)),
        false,
    );
    let id = runtime.compile_script(source, None)?;
    runtime.run_script(id, None).map_err(|err| anyhow!("{}", err))
}

fn console(engine: &Engine) -> ObjectRef {
    let console = engine.new_object();
    let log = engine.new_function("log", console_log);
    console.set_own(PropertyKey::from("log"), Value::Object(log));
    console
}

fn console_log(_: &mut Interpreter<'_>, _: &Value, args: &[Value]) -> JsResult<Value> {
    let line: Vec<String> = args.iter().map(format_console_arg).collect();
    println!("{}", line.join(" "));
    Ok(Value::Undefined)
}

fn format_console_arg(value: &Value) -> String {
    match value {
        Value::String(s) => s.to_string(),
        Value::Object(obj) => match obj.function() {
            Some(function) => format!("[Function: {}]", function.name()),
            None => to_json_lossy(value).to_string(),
        },
        other => other.to_display_string(),
    }
}

fn pretty(json: &Json) -> String {
    serde_json::to_string_pretty(json).unwrap_or_else(|_| json.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sources(scripts: &[&str]) -> Vec<(String, String)> {
        scripts
            .iter()
            .enumerate()
            .map(|(i, s)| (format!("script{}.js", i), s.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"origin_name": "cli", "limits": {{"max_steps": 99}}, "denied_globals": ["secret"]}}"#
        )
        .unwrap();
        let config = load_config(Some(file.path())).await.unwrap();
        assert_eq!(config.origin_name, "cli");
        assert_eq!(config.limits.max_steps, 99);
        assert_eq!(config.denied_globals, vec!["secret".to_string()]);
        assert!(config.read_only_globals.is_empty());
    }

    #[tokio::test]
    async fn test_missing_config_flag_means_defaults() {
        let config = load_config(None).await.unwrap();
        assert_eq!(config, SandboxConfig::default());
    }

    #[tokio::test]
    async fn test_invalid_config_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(load_config(Some(file.path())).await.is_err());
    }

    #[tokio::test]
    async fn test_seed_sources() {
        assert_eq!(load_seed(None, None).await.unwrap(), json!({}));
        assert_eq!(load_seed(Some(r#"{"a": 1}"#), None).await.unwrap(), json!({"a": 1}));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"b": [true]}}"#).unwrap();
        assert_eq!(
            load_seed(None, Some(file.path())).await.unwrap(),
            json!({"b": [true]})
        );
    }

    #[test]
    fn test_shared_sandbox_accumulates() {
        let mut runtime = SandboxRuntime::default();
        let mut reports = Vec::new();
        run_batch(
            &mut runtime,
            &sources(&["x = 1", "y = x + 41"]),
            &json!({}),
            false,
            |report| reports.push(report),
        )
        .unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[1]["result"], json!(42));
        assert_eq!(reports[1]["sandbox"], json!({"x": 1, "y": 42}));
    }

    #[test]
    fn test_fresh_sandboxes_are_independent() {
        let mut runtime = SandboxRuntime::default();
        let mut reports = Vec::new();
        run_batch(
            &mut runtime,
            &sources(&["x = seed", "typeof x"]),
            &json!({"seed": 5}),
            true,
            |report| reports.push(report),
        )
        .unwrap();
        assert_eq!(reports[0]["sandbox"], json!({"seed": 5, "x": 5}));
        assert_eq!(reports[1]["result"], json!("undefined"));
        assert_eq!(reports[1]["sandbox"], json!({"seed": 5}));
    }

    #[test]
    fn test_fresh_batch_keeps_one_live_context() {
        let mut runtime = SandboxRuntime::default();
        let mut reports = Vec::new();
        run_batch(
            &mut runtime,
            &sources(&["a = 1", "b = 2", "c = 3", "d = 4"]),
            &json!({}),
            true,
            |report| reports.push(report),
        )
        .unwrap();
        assert_eq!(reports.len(), 4);
        assert_eq!(reports[3]["sandbox"], json!({"d": 4}));
        assert_eq!(runtime.registry().live_contexts(), 1);
        assert_eq!(runtime.registry().context_count(), 1);
        assert_eq!(runtime.registry().script_count(), 0);
    }

    #[test]
    fn test_script_errors_name_the_script() {
        let mut runtime = SandboxRuntime::default();
        let err = run_batch(
            &mut runtime,
            &sources(&["throw new TypeError('nope')"]),
            &json!({}),
            false,
            |_| {},
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "script0.js: Uncaught TypeError: nope");
    }

    #[test]
    fn test_eval_runs_unsandboxed() {
        let mut runtime = SandboxRuntime::default();
        let value = eval(&mut runtime, "var g = 2; g * 21").unwrap();
        assert_eq!(value.as_number(), Some(42.0));
        let engine = runtime.engine();
        let global = engine.global(engine.default_context()).unwrap();
        assert!(global.has_own(&PropertyKey::from("g")));
    }

    #[test]
    fn test_console_formatting() {
        assert_eq!(format_console_arg(&Value::from("plain")), "plain");
        assert_eq!(format_console_arg(&Value::from(1.5)), "1.5");
        let engine = Engine::new();
        let obj = engine.value_from_json(&json!({"k": [1, "v"]}));
        assert_eq!(format_console_arg(&obj), r#"{"k":[1,"v"]}"#);
        let log = Value::Object(console(&engine));
        assert_eq!(format_console_arg(&log), r#"{"log":null}"#);
    }
}
