//! meshcas-ctl — command-line interface for the meshcas daemon. Each
//! invocation makes one request against the control API and exits;
//! there is no interactive mode.

use anyhow::{Context, Result};

mod cmd;
mod exit;

const DEFAULT_PORT: u16 = 7420;

fn print_usage() {
    println!("Usage: meshcas-ctl [--port <port>] <command>");
    println!();
    println!("Daemon");
    println!("  status                          Node id, uptime, routing table, cache stats");
    println!("  peers                           List the routing table");
    println!("  manifests                       List locally known files");
    println!();
    println!("File Transfer");
    println!("  store <path>                    Chunk, erasure-code, and store a local file");
    println!("  retrieve <hash> <out>           Reassemble a locally-known file to <out>");
    println!("  download <hash> <out>           Resolve holders via the DHT and fetch a file");
    println!();
    println!(
        "Options:\n  --port <port>                   API port (default: {})",
        DEFAULT_PORT
    );
    println!();
    println!("Examples:");
    println!("  meshcas-ctl status");
    println!("  meshcas-ctl store ./report.pdf");
    println!("  meshcas-ctl download 3fa9c1...  ./report.pdf");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut port = DEFAULT_PORT;
    let mut remaining: Vec<String> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        if args[i] == "--port" {
            i += 1;
            port = args
                .get(i)
                .context("--port requires a value")?
                .parse()
                .context("--port must be a number")?;
        } else {
            remaining.push(args[i].clone());
        }
        i += 1;
    }

    let remaining_refs: Vec<&str> = remaining.iter().map(|s| s.as_str()).collect();

    let code = match remaining_refs.as_slice() {
        ["status"] | [] => {
            cmd::status::cmd_status(port).await?;
            exit::OK
        }
        ["peers"] => {
            cmd::status::cmd_peers(port).await?;
            exit::OK
        }
        ["manifests"] => {
            cmd::status::cmd_manifests(port).await?;
            exit::OK
        }
        ["store", path] => cmd::files::cmd_store(port, path).await?,
        ["retrieve", hash, out] => cmd::files::cmd_retrieve(port, hash, out).await?,
        ["download", hash, out] => cmd::files::cmd_download(port, hash, out).await?,
        ["help"] | ["--help"] | ["-h"] => {
            print_usage();
            exit::OK
        }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            exit::USER_ERROR
        }
    };

    std::process::exit(code);
}
