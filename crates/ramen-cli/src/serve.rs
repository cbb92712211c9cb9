//! Serve command implementation for Ramen CLI.
//!
//! Runs the live-link server with a local interpreter standing in for the
//! host application, until Ctrl+C.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use ramen_core::{CommandEngine, HostLoop, ScriptEngine, cooperative};
use ramen_server::{ServerConfig, ServerError, registry};

use crate::colors;

/// How long the host loop waits for work before re-checking for shutdown.
const HOST_PUMP_INTERVAL: Duration = Duration::from_millis(50);

/// Start the server and block until Ctrl+C.
pub async fn execute(
    host: &str,
    port: u16,
    interpreter: Option<&str>,
    timeout_secs: f64,
) -> anyhow::Result<()> {
    let timeout = crate::parse_timeout(timeout_secs)?;

    let engine = match interpreter {
        Some(program) => CommandEngine::new(program)?,
        None => CommandEngine::python()?,
    };
    let program = engine.program().display().to_string();

    let (scheduler, mut host_loop) = cooperative(engine);
    let config = ServerConfig::default()
        .with_host(host)
        .with_port(port)
        .with_execution_timeout(timeout);

    let addr = registry::install(config, Arc::new(scheduler)).map_err(|e| match e {
        ServerError::Bind { .. } => anyhow::anyhow!(
            "{}\n  hint: Another live-link server may already be listening; pick a different --port.",
            e
        ),
        other => other.into(),
    })?;

    println!(
        "\n{}Ramen Live-Link{} - Local Host",
        colors::BOLD,
        colors::RESET
    );
    println!("{}", "─".repeat(50));
    println!("{}  ◆ Listening:{} {}", colors::CYAN, colors::RESET, addr);
    println!("{}  ◆ Interpreter:{} {}", colors::CYAN, colors::RESET, program);
    println!(
        "{}  ◆ Timeout:{} {:.1}s",
        colors::CYAN,
        colors::RESET,
        timeout.as_secs_f64()
    );
    println!("{}", "─".repeat(50));
    println!("{}Press Ctrl+C to stop{}", colors::GREEN, colors::RESET);
    println!();

    let stop = Arc::new(AtomicBool::new(false));
    let host_task = tokio::task::spawn_blocking({
        let stop = stop.clone();
        move || pump_until_stopped(&mut host_loop, &stop)
    });

    tokio::signal::ctrl_c().await?;

    println!("\n{}Shutting down...{}", colors::YELLOW, colors::RESET);
    registry::shutdown();
    stop.store(true, Ordering::SeqCst);

    let executed = host_task.await?;
    println!(
        "{}Stopped{} after running {} script(s)",
        colors::GREEN,
        colors::RESET,
        executed
    );

    Ok(())
}

/// Run host jobs until `stop` is set or every scheduler handle is gone.
/// Returns the number of scripts run.
fn pump_until_stopped<E: ScriptEngine>(host_loop: &mut HostLoop<E>, stop: &AtomicBool) -> u64 {
    while !stop.load(Ordering::SeqCst) {
        if host_loop.pump(HOST_PUMP_INTERVAL).is_none() {
            break;
        }
    }
    host_loop.executed()
}
