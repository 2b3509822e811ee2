//! Application entry point.
//!
//! Parses command-line arguments and dispatches to the supervisor, the curl
//! transport or the signal registry.

use std::{
    io::{self, Write},
    process::ExitCode,
    sync::atomic::{AtomicI32, Ordering},
    time::Duration,
};

use anyhow::{Context, Result};
use clap::Parser;
use qel::{
    cli::{Cli, Commands, ExecArgs, HttpArgs},
    http::{CurlClient, FetchOptions, HttpResponse},
    kill::KillOptions,
    process::{ProcessState, StreamEvent, Supervisor, run_sync},
    signals::{self, RestoreHandler, SigHandler, Signal, SignalInfo, install_handler},
};
use tracing::{Level, debug, error};
use tracing_subscriber::fmt;

/// Exit status for invalid user input.
const EXIT_USAGE: u8 = 2;

/// Signal received by the parent and not yet forwarded to the child.
static PENDING_SIGNAL: AtomicI32 = AtomicI32::new(0);

extern "C" fn record_signal(signal: i32) {
    PENDING_SIGNAL.store(signal, Ordering::SeqCst);
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let max_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::ERROR
    };
    fmt().with_writer(io::stderr).with_max_level(max_level).init();
    match run(&cli) {
        Ok(code) => code,
        Err(err) => {
            error!("qel failed: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<ExitCode> {
    match &cli.command {
        Commands::Exec(args) if args.sync => exec_sync(args),
        Commands::Exec(args) => exec_streaming(args),
        Commands::Http(args) => http(args),
        Commands::Signals { signal } => Ok(list_signals(signal.as_deref())),
    }
}

fn exit_code(state: &ProcessState) -> ExitCode {
    ExitCode::from(u8::try_from(state.shell_exit_code()).unwrap_or(1))
}

fn write_out(mut sink: impl Write, data: &str) {
    if let Err(err) = sink.write_all(data.as_bytes()).and_then(|()| sink.flush()) {
        debug!(%err, "failed to forward output");
    }
}

fn exec_sync(args: &ExecArgs) -> Result<ExitCode> {
    let spec = args.to_spec().context("invalid command")?;
    let output = run_sync(&spec).context("failed to run command")?;
    write_out(io::stdout().lock(), &output.stdout);
    write_out(io::stderr().lock(), &output.stderr);
    Ok(exit_code(&output.state))
}

fn forward(line_buffered: bool, to_stderr: bool) -> impl FnMut(&StreamEvent) + Send + 'static {
    move |event| {
        let mut data = event.data.clone();
        if line_buffered {
            data.push('\n');
        }
        if to_stderr {
            write_out(io::stderr().lock(), &data);
        } else {
            write_out(io::stdout().lock(), &data);
        }
    }
}

fn install_forwarding() -> Result<Vec<RestoreHandler>> {
    [Signal::SIGINT, Signal::SIGTERM]
        .into_iter()
        .map(|signal| {
            install_handler(signal, SigHandler::Handler(record_signal))
                .with_context(|| format!("failed to install {signal} handler"))
        })
        .collect()
}

fn exec_streaming(args: &ExecArgs) -> Result<ExitCode> {
    let spec = args.to_spec().context("invalid command")?;
    let line_buffered = spec.line_buffered();
    let supervisor = Supervisor::new(spec);
    supervisor.on_stdout(forward(line_buffered, false));
    supervisor.on_stderr(forward(line_buffered, true));

    let restore = install_forwarding()?;
    let completion = supervisor.run().context("failed to start command")?;
    let state = loop {
        if let Some(state) = completion.wait_timeout(Duration::from_millis(50)) {
            break state;
        }
        let pending = PENDING_SIGNAL.swap(0, Ordering::SeqCst);
        if let Ok(signal) = Signal::try_from(pending) {
            debug!(%signal, "forwarding signal to command tree");
            supervisor
                .kill(KillOptions::recursive(signal))
                .context("failed to forward signal")?;
        }
    };
    for handler in restore {
        handler.restore().context("failed to restore signal handler")?;
    }
    Ok(exit_code(&state))
}

fn render_head(response: &HttpResponse) -> String {
    let mut head = String::new();
    if let Some(status) = &response.status {
        head.push_str(&format!("HTTP {status}\n"));
    }
    for (name, value) in &response.headers {
        for item in value.values() {
            head.push_str(&format!("{name}: {item}\n"));
        }
    }
    head.push('\n');
    head
}

fn http(args: &HttpArgs) -> Result<ExitCode> {
    let client = CurlClient::from_env();
    let response = client
        .fetch(&args.to_request(), FetchOptions::default())
        .with_context(|| format!("request to {} failed", args.url))?;
    let mut stdout = io::stdout().lock();
    if args.include {
        write_out(&mut stdout, &render_head(&response));
    }
    if let Some(body) = &response.body {
        write_out(&mut stdout, &body.to_text());
    }
    Ok(ExitCode::SUCCESS)
}

fn describe(info: &SignalInfo) -> String {
    let mut traits = Vec::new();
    if info.termination {
        traits.push("termination");
    }
    if !info.catchable {
        traits.push("uncatchable");
    }
    let line = format!("{:>2} {:<10} {}", info.number, info.name, traits.join(" "));
    format!("{}\n", line.trim_end())
}

fn list_signals(query: Option<&str>) -> ExitCode {
    let mut stdout = io::stdout().lock();
    let Some(query) = query else {
        for info in signals::registry() {
            write_out(&mut stdout, &describe(&info));
        }
        return ExitCode::SUCCESS;
    };
    match signals::signal_from_name(query) {
        Some(signal) => {
            write_out(&mut stdout, &describe(&SignalInfo::of(signal)));
            ExitCode::SUCCESS
        }
        None => {
            error!(signal = query, "unknown signal");
            ExitCode::from(EXIT_USAGE)
        }
    }
}
