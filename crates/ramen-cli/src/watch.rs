//! Watch command implementation for Ramen CLI.
//!
//! Sends a script, then re-sends it whenever the file changes.

use std::path::Path;
use std::time::Instant;

use ramen_core::LiveLinkClient;

use crate::colors;
use crate::send::{read_script, report};
use crate::watcher::{ScriptEvent, ScriptWatcher};

/// Execute the watch command.
pub async fn execute(script: &str, client: LiveLinkClient, clear_screen: bool) -> anyhow::Result<()> {
    let path = Path::new(script);
    if !path.exists() {
        anyhow::bail!("Script not found: {}", script);
    }

    let abs_path = path.canonicalize()?;
    let script_name = path
        .file_name()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string();

    println!(
        "\n{}Ramen Watch{} - {}{}{} → {}",
        colors::BOLD,
        colors::RESET,
        colors::CYAN,
        script_name,
        colors::RESET,
        client.addr()
    );
    println!("{}", "─".repeat(50));

    let mut watcher = ScriptWatcher::new(&abs_path)?;

    if clear_screen {
        clear_terminal();
    }
    push(&client, &abs_path);

    while let Some(event) = watcher.recv().await {
        match event {
            ScriptEvent::Modified(_) => {
                if clear_screen {
                    clear_terminal();
                }
                println!(
                    "\n{}File changed, sending...{}",
                    colors::YELLOW,
                    colors::RESET
                );
                push(&client, &abs_path);
            }
            ScriptEvent::Removed(path) => {
                eprintln!(
                    "\n{}Warning:{} Script removed: {}",
                    colors::YELLOW,
                    colors::RESET,
                    path.display()
                );
            }
        }
    }

    Ok(())
}

/// Clear the terminal screen.
fn clear_terminal() {
    print!("\x1B[2J\x1B[1;1H");
    colors::flush_stdout();
}

/// Send the script once. Failures are printed, never fatal.
fn push(client: &LiveLinkClient, path: &Path) {
    let start = Instant::now();
    let sent = path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Script path is not valid UTF-8: {}", path.display()))
        .and_then(read_script)
        .and_then(|source| Ok(client.send(&source)?));

    match sent {
        Ok(response) => report(&response, start.elapsed()),
        Err(e) => {
            let e = crate::with_hint(e);
            eprintln!("{}Error:{} {}", colors::RED, colors::RESET, e);
        }
    }

    println!(
        "{}Watching for changes... (Ctrl+C to stop){}",
        colors::DIM,
        colors::RESET
    );
}
