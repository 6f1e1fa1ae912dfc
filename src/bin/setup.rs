//! Non-interactive config-file writer (§1 Out-of-scope, §6): writes a
//! syntactically valid `dirscansync.json` from CLI flags, for test fixtures
//! and local bring-up. The conversational setup wizard (account creation,
//! relationship prompts) described in the reference tooling is not
//! reproduced here.

use std::path::PathBuf;

use clap::Parser;
use serde_json::json;

use dirscansync::config::Config;
use dirscansync::error::ScanError;

#[derive(Parser, Debug)]
#[command(name = "setup", version)]
struct Cli {
    /// Where to write the config file
    #[arg(short = 'c', long = "config", default_value = "dirscansync.json")]
    config: PathBuf,

    /// Cloudant account name
    #[arg(long = "account")]
    cloudant_account: String,

    /// Cloudant user
    #[arg(long = "user")]
    cloudant_user: String,

    /// base64 `user:pass` string
    #[arg(long = "auth")]
    cloudant_auth: String,

    /// Relationship document id
    #[arg(long = "relationship")]
    relationship: String,

    /// This host's id
    #[arg(long = "host-id")]
    host_id: String,

    /// Batch-flush threshold
    #[arg(long = "threshold", default_value_t = 2000)]
    threshold: u32,
}

fn main() {
    let cli = Cli::parse();
    match run(cli) {
        Ok(path) => println!("wrote {}", path.display()),
        Err(e) => {
            eprintln!("fatal: {e}");
            std::process::exit(e.exit_code());
        }
    }
}

fn run(cli: Cli) -> Result<PathBuf, ScanError> {
    let doc = json!({
        "cloudant_account": cli.cloudant_account,
        "cloudant_user": cli.cloudant_user,
        "cloudant_auth": cli.cloudant_auth,
        "relationship": cli.relationship,
        "host_id": cli.host_id,
        "threshold": cli.threshold,
    });
    let body = serde_json::to_string_pretty(&doc).expect("config value always serializes");
    std::fs::write(&cli.config, body).map_err(|e| ScanError::Config {
        detail: format!("write {}: {e}", cli.config.display()),
    })?;

    // Round-trip through the real loader so a bad --auth value is caught
    // here rather than surfacing later inside dirscan.
    Config::load(&cli.config)?;
    Ok(cli.config)
}
