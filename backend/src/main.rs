//! Stepflow CLI - validate and run step pipelines
//!
//! ```bash
//! stepflow validate workflow.json               # Check a workflow or step list
//! stepflow run workflow.json --payload in.csv   # Run once
//! stepflow shape to.entity                      # JSON Schema of a step part
//! stepflow coerce "yes" boolean                 # Try a coercion
//! stepflow serve                                # Start HTTP server (port 3000)
//! ```
//!
//! Settings come from the environment (`.env` is loaded when present);
//! flags override them.

use clap::{Parser, Subcommand};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use stepflow::dsl::STEP_TYPES;
use stepflow::parser::{decode_content, detect_encoding, encoding_for_label};
use stepflow::{
    coerce, decode_workflow, preview_step_shape, schedulable, validate_raw,
    validate_workflow_value, ApiPayload, EngineConfig, FieldType, MemoryStore, Pipeline,
    RegistrySnapshot, RunRequest, RunState, RunTrigger, ValidationReport,
};

#[derive(Parser)]
#[command(name = "stepflow")]
#[command(about = "Validate and run declarative step pipelines", long_about = None)]
struct Cli {
    /// Entity definition directory (overrides STEPFLOW_REGISTRY_DIR)
    #[arg(long, global = true)]
    registry: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a workflow (or a bare JSON array of steps)
    Validate {
        /// Workflow JSON file
        input: PathBuf,
    },

    /// Run a workflow once
    Run {
        /// Workflow JSON file
        input: PathBuf,

        /// Payload for api sources (JSON, CSV or any text)
        #[arg(short, long)]
        payload: Option<PathBuf>,

        /// What triggers the run: manual, schedule or api
        #[arg(short, long, default_value = "manual")]
        trigger: RunTrigger,

        /// Directory for download outputs (overrides STEPFLOW_OUTPUT_DIR)
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Write the api output here (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the JSON Schema of a step part
    Shape {
        /// Step part, e.g. "to.entity" (see `stepflow shape list`)
        step_type: String,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Coerce a value to an entity field type
    Coerce {
        /// Value (parsed as JSON when possible, otherwise a string)
        value: String,

        /// Field type, e.g. integer, boolean, float, object
        field_type: String,
    },

    /// Start HTTP server
    Serve {
        /// Port to listen on (overrides STEPFLOW_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() {
    // Load .env file (if present)
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let result = match load_config(cli.registry) {
        Ok(config) => match cli.command {
            Commands::Validate { input } => cmd_validate(&config, &input),
            Commands::Run {
                input,
                payload,
                trigger,
                output_dir,
                output,
            } => {
                cmd_run(
                    config,
                    &input,
                    payload.as_deref(),
                    trigger,
                    output_dir,
                    output.as_deref(),
                )
                .await
            }
            Commands::Shape { step_type, output } => cmd_shape(&step_type, output.as_deref()),
            Commands::Coerce { value, field_type } => cmd_coerce(&value, &field_type),
            Commands::Serve { port } => cmd_serve(config, port).await,
        },
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        eprintln!("❌ Error: {}", e);
        std::process::exit(1);
    }
}

fn load_config(registry: Option<PathBuf>) -> Result<EngineConfig, Box<dyn std::error::Error>> {
    let mut config = EngineConfig::from_env()?;
    if let Some(dir) = registry {
        config.registry_dir = dir;
    }
    Ok(config)
}

fn load_registry(config: &EngineConfig) -> RegistrySnapshot {
    let registry = RegistrySnapshot::with_dir(&config.registry_dir);
    eprintln!(
        "📚 {} entity definition(s) from {}",
        registry.len(),
        config.registry_dir.display()
    );
    registry
}

fn cmd_validate(config: &EngineConfig, input: &Path) -> Result<(), Box<dyn std::error::Error>> {
    eprintln!("✔️  Validating: {}", input.display());

    let registry = load_registry(config);
    let raw: Value = serde_json::from_str(&fs::read_to_string(input)?)?;

    let report = match &raw {
        Value::Array(steps) => validate_raw(steps, &registry),
        _ => validate_workflow_value(&raw, &registry),
    };
    print_report(&report);

    if !report.valid {
        std::process::exit(1);
    }

    if raw.is_object() {
        let workflow = decode_workflow(&raw)?;
        if schedulable(&workflow.config.steps) {
            match &workflow.schedule_cron {
                Some(cron) => eprintln!("   ⏰ Scheduled: {}", cron),
                None => eprintln!("   ⏰ Schedulable (no cron set)"),
            }
        } else {
            eprintln!("   📥 On demand only (api source or api output)");
        }
    }
    Ok(())
}

fn print_report(report: &ValidationReport) {
    if report.valid {
        eprintln!("✅ Valid");
        return;
    }
    eprintln!("❌ {} violation(s):", report.violations.len());
    for violation in &report.violations {
        eprintln!("   - {}", violation);
    }
}

async fn cmd_run(
    mut config: EngineConfig,
    input: &Path,
    payload: Option<&Path>,
    trigger: RunTrigger,
    output_dir: Option<PathBuf>,
    output: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    eprintln!("📄 Running: {}", input.display());

    if let Some(dir) = output_dir {
        config.output_dir = dir;
    }

    let registry = Arc::new(load_registry(&config));
    let store = MemoryStore::new(registry.clone());

    let raw: Value = serde_json::from_str(&fs::read_to_string(input)?)?;
    let workflow = decode_workflow(&raw)?;

    let mut request = RunRequest::new(trigger);
    if let Some(path) = payload {
        request = request.with_payload(read_payload(path)?);
    }

    let result = Pipeline::new(registry.as_ref(), &store)
        .with_config(&config)
        .save_downloads_to(config.output_dir.clone())
        .run(&workflow, request)
        .await?;

    eprintln!("\n📊 Run {}", result.run_id);
    eprintln!("   Status:    {}", result.status);
    eprintln!("   Processed: {}", result.processed_items);
    eprintln!("   Failed:    {}", result.failed_items);
    if !store.is_empty() {
        eprintln!("   Entities:  {}", store.len());
    }
    for failure in result.failures.iter().take(config.max_logged_failures) {
        eprintln!("   - {}", failure);
    }
    for download in result.downloads() {
        if let Some(path) = &download.saved_to {
            eprintln!("   💾 Download saved to: {}", path);
        }
    }

    if let Some(api) = result.api_output() {
        write_output(&api.body, output)?;
    }

    match (result.status, result.error) {
        (RunState::Failed, Some(e)) => Err(e.into()),
        (RunState::Failed, None) => Err("Run failed".into()),
        _ => {
            eprintln!("\n✨ Done!");
            Ok(())
        }
    }
}

/// JSON files become JSON payloads; anything else is decoded text.
fn read_payload(path: &Path) -> Result<ApiPayload, Box<dyn std::error::Error>> {
    let bytes = fs::read(path)?;
    let encoding = encoding_for_label(&detect_encoding(&bytes)).unwrap_or(encoding_rs::UTF_8);
    let text = decode_content(&bytes, encoding);

    Ok(match serde_json::from_str::<Value>(&text) {
        Ok(Value::String(_)) | Err(_) => ApiPayload::Text(text),
        Ok(value) => ApiPayload::Json(value),
    })
}

fn cmd_shape(step_type: &str, output: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    if step_type == "list" {
        for name in STEP_TYPES {
            println!("{}", name);
        }
        return Ok(());
    }

    let shape = preview_step_shape(step_type).ok_or_else(|| {
        format!(
            "Unknown step type '{}'; expected one of: {}",
            step_type,
            STEP_TYPES.join(", ")
        )
    })?;
    write_output(&serde_json::to_string_pretty(&shape)?, output)
}

fn cmd_coerce(value: &str, field_type: &str) -> Result<(), Box<dyn std::error::Error>> {
    let input = serde_json::from_str::<Value>(value).unwrap_or_else(|_| Value::String(value.to_string()));
    let field_type = FieldType::parse(field_type);
    let coerced = coerce(&input, &field_type);

    eprintln!("   {} as {}", input, field_type);
    println!("{}", coerced);
    Ok(())
}

async fn cmd_serve(mut config: EngineConfig, port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(port) = port {
        config.port = port;
    }
    stepflow::server::start_server(config).await
}

fn write_output(content: &str, path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    match path {
        Some(p) => {
            fs::write(p, content)?;
            eprintln!("💾 Output written to: {}", p.display());
        }
        None => {
            println!("{}", content);
        }
    }
    Ok(())
}
