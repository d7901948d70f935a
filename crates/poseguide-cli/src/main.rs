use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use poseguide_core::{
    evaluate, DeviceAngle, FaceObservation, GuidanceConfig, GuidanceSession, RuleCatalog,
};
use std::path::PathBuf;

mod simulate;

#[derive(Parser)]
#[command(name = "poseguide", about = "Poseguide capture guidance CLI")]
struct Cli {
    /// Rule catalog to use instead of the built-in one
    #[arg(long, global = true)]
    rules: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the rule catalog as JSON
    Rules,
    /// Evaluate one step against a device angle and optional face observation
    Check {
        /// Step id (e.g. "front", "right45")
        #[arg(short, long)]
        step: String,
        /// Device angle JSON, e.g. '{"roll": 84, "pitch": 0, "z_axis": 0}'
        #[arg(short, long)]
        angle: String,
        /// Face observation JSON
        #[arg(short, long)]
        face: Option<String>,
        /// Face coverage of the guide, percent
        #[arg(short, long)]
        coverage: Option<f32>,
    },
    /// Replay a scripted scenario and print emitted events as JSON lines
    Simulate {
        /// Scenario JSON file
        scenario: PathBuf,
        /// Calibration TOML overriding the default constants
        #[arg(long)]
        calibration: Option<PathBuf>,
    },
    /// Show daemon status
    Status,
    /// Print the daemon's current guidance snapshot
    Snapshot,
}

#[zbus::proxy(
    interface = "org.poseguide.Guidance1",
    default_service = "org.poseguide.Guidance1",
    default_path = "/org/poseguide/Guidance1"
)]
trait Guidance {
    async fn status(&self) -> zbus::Result<String>;
    async fn get_guidance_snapshot(&self) -> zbus::Result<String>;
}

fn load_catalog(path: Option<&PathBuf>) -> Result<RuleCatalog> {
    let catalog = match path {
        Some(p) => RuleCatalog::from_path(p)?,
        None => RuleCatalog::builtin()?,
    };
    Ok(catalog)
}

async fn daemon_proxy() -> Result<GuidanceProxy<'static>> {
    let connection = zbus::Connection::session()
        .await
        .context("failed to connect to the session bus")?;
    Ok(GuidanceProxy::new(&connection).await?)
}

fn print_pretty(raw: &str) -> Result<()> {
    let value: serde_json::Value = serde_json::from_str(raw)?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Rules => {
            let catalog = load_catalog(cli.rules.as_ref())?;
            println!("{}", serde_json::to_string_pretty(catalog.rules())?);
        }
        Commands::Check {
            step,
            angle,
            face,
            coverage,
        } => {
            let catalog = load_catalog(cli.rules.as_ref())?;
            let rule = catalog.get(&step)?;
            let angle: DeviceAngle =
                serde_json::from_str(&angle).context("invalid --angle JSON")?;
            let face: Option<FaceObservation> = face
                .as_deref()
                .map(|raw| serde_json::from_str::<FaceObservation>(raw))
                .transpose()
                .context("invalid --face JSON")?;
            let result = evaluate(rule, &angle, face.as_ref(), coverage);
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Simulate {
            scenario,
            calibration,
        } => {
            let catalog = load_catalog(cli.rules.as_ref())?;
            let config = match calibration {
                Some(path) => GuidanceConfig::from_path(path)?,
                None => GuidanceConfig::default(),
            };
            let scenario = simulate::load(&scenario)?;
            let mut session = GuidanceSession::new(catalog, config);
            for emitted in simulate::run(&mut session, scenario)? {
                println!("{}", serde_json::to_string(&emitted)?);
            }
            let snapshot = session.snapshot();
            let taken = snapshot.steps.iter().filter(|s| s.photo_taken).count();
            eprintln!(
                "{taken}/{} photos captured, session {}",
                snapshot.step_count,
                if snapshot.is_complete { "complete" } else { "incomplete" }
            );
        }
        Commands::Status => {
            let proxy = daemon_proxy().await?;
            print_pretty(&proxy.status().await?)?;
        }
        Commands::Snapshot => {
            let proxy = daemon_proxy().await?;
            print_pretty(&proxy.get_guidance_snapshot().await?)?;
        }
    }

    Ok(())
}
