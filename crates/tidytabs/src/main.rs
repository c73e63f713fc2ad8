//
// main.rs
//
// Command-line entry point
//

use std::env;
use std::path::PathBuf;

use tidytabs::config::EngineConfig;
use tidytabs::replay;

fn print_usage() {
    println!(
        "tidytabs {}, a tab deduplication, merge and sort engine.",
        env!("CARGO_PKG_VERSION")
    );
    print!(
        r#"
Usage: tidytabs replay <SCRIPT> [OPTIONS]

Runs a session script against an in-memory browser and prints the final
windows as JSON.

Available options:

--settings <FILE>            Load engine settings from a JSON file
--version                    Print the version
--help                       Print this help message

"#
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut argv = env::args();
    argv.next(); // skip executable name

    let mut replay_requested = false;
    let mut script: Option<PathBuf> = None;
    let mut settings: Option<PathBuf> = None;

    while let Some(arg) = argv.next() {
        match arg.as_str() {
            "replay" => replay_requested = true,
            "--settings" => {
                let path = argv
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--settings requires a file argument"))?;
                settings = Some(PathBuf::from(path));
            }
            "--version" => {
                println!("tidytabs {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" => {
                print_usage();
                return Ok(());
            }
            other if other.starts_with("--") => {
                return Err(anyhow::anyhow!("Unknown argument: '{other}'"));
            }
            other if replay_requested && script.is_none() => {
                script = Some(PathBuf::from(other));
            }
            other => {
                return Err(anyhow::anyhow!("Unknown argument: '{other}'"));
            }
        }
    }

    let Some(script) = script.filter(|_| replay_requested) else {
        print_usage();
        return Ok(());
    };

    env_logger::init();

    let config = match settings {
        Some(path) => replay::load_settings(&path)?,
        None => EngineConfig::default(),
    };
    let script = replay::load_script(&script)?;
    let outcome = replay::run_script(&script, config).await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}
