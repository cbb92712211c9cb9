//! Send command implementation for Ramen CLI.
//!
//! Pushes one script to the live-link server and reports the verdict.

use std::io::Read;
use std::path::Path;
use std::time::{Duration, Instant};

use ramen_core::{LiveLinkClient, Response};

use crate::colors;

/// Execute the send command. Fails if the server answers with an error.
pub fn execute(script: &str, client: &LiveLinkClient) -> anyhow::Result<()> {
    let source = read_script(script)?;

    let start = Instant::now();
    let response = client.send(&source)?;
    report(&response, start.elapsed());

    if let Response::Error(_) = response {
        anyhow::bail!("Script failed on {}", client.addr());
    }
    Ok(())
}

/// Read a script from a path, or from stdin when `script` is `-`.
pub fn read_script(script: &str) -> anyhow::Result<String> {
    if script == "-" {
        let mut source = String::new();
        std::io::stdin().read_to_string(&mut source)?;
        return Ok(source);
    }

    let path = Path::new(script);
    let source = std::fs::read_to_string(path).map_err(|source| ramen_core::Error::File {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(source)
}

/// Print a server response.
pub fn report(response: &Response, elapsed: Duration) {
    match response {
        Response::Ok => {
            println!(
                "{}✓ OK{} ({:.2}ms)",
                colors::GREEN,
                colors::RESET,
                elapsed.as_secs_f64() * 1000.0
            );
        }
        Response::Error(message) => {
            eprintln!("{}✗ ERROR{}", colors::RED, colors::RESET);
            for line in message.lines() {
                eprintln!("  {line}");
            }
        }
    }
}
