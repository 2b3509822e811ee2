//! Tests for the blocking runner.

use std::{fs::File, io::Read, sync::Arc, time::Duration};

use anyhow::{Result, ensure};
use qel::process::{
    EXIT_NOT_EXECUTABLE, EXIT_NOT_FOUND, NOT_FOUND_MESSAGE, ProcessError, ProcessSpec,
    StderrPolicy, StdoutSink, run_sync,
};
use rstest::rstest;
use test_support::write_exec;

#[test]
fn input_round_trips_through_cat_and_is_trimmed() -> Result<()> {
    let output = run_sync(&ProcessSpec::new(["cat"])?.with_input("hello\n").with_trim(true))?;
    ensure!(output.stdout == "hello");
    ensure!(output.stderr.is_empty());
    ensure!(output.state.exit_code == Some(0));
    Ok(())
}

#[rstest]
#[case(StderrPolicy::Intercept, false)]
#[case(StderrPolicy::RedirectToStdout, true)]
fn missing_program_reports_not_found(
    #[case] policy: StderrPolicy,
    #[case] on_stdout: bool,
) -> Result<()> {
    let output = run_sync(&ProcessSpec::new(["qel-no-such-binary"])?.with_stderr(policy))?;
    ensure!(output.state.exit_code == Some(EXIT_NOT_FOUND));
    let (message, other) = if on_stdout {
        (&output.stdout, &output.stderr)
    } else {
        (&output.stderr, &output.stdout)
    };
    ensure!(message == NOT_FOUND_MESSAGE, "got {output:?}");
    ensure!(other.is_empty());
    Ok(())
}

#[test]
fn non_executable_program_reports_126() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("plain");
    std::fs::write(&path, "#!/bin/sh\necho nope\n")?;
    let output = run_sync(&ProcessSpec::new([path.to_string_lossy().into_owned()])?)?;
    ensure!(output.state.exit_code == Some(EXIT_NOT_EXECUTABLE));
    Ok(())
}

#[test]
fn stub_executable_exits_cleanly() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let root = camino::Utf8Path::from_path(dir.path()).ok_or_else(|| anyhow::anyhow!("utf8"))?;
    let stub = write_exec(root, "noop")?;
    let output = run_sync(&ProcessSpec::new([stub.as_str()])?)?;
    ensure!(output.state.success());
    ensure!(output.stdout.is_empty());
    Ok(())
}

#[test]
fn timeout_stops_the_child() -> Result<()> {
    let output = run_sync(
        &ProcessSpec::new(["sleep", "30"])?.with_timeout(Duration::from_millis(200)),
    )?;
    ensure!(output.state.timed_out);
    ensure!(output.state.exit_code == Some(-15));
    ensure!(output.state.signal.as_deref() == Some("SIGTERM"));
    Ok(())
}

#[test]
fn fast_child_is_not_marked_timed_out() -> Result<()> {
    let output = run_sync(&ProcessSpec::new(["true"])?.with_timeout(Duration::from_secs(5)))?;
    ensure!(!output.state.timed_out);
    ensure!(output.state.exit_code == Some(0));
    Ok(())
}

#[test]
fn blank_lines_skipped_and_output_trimmed() -> Result<()> {
    let spec = ProcessSpec::new(["/bin/sh", "-c", "printf '\\n a \\n\\n b \\n\\n'"])?
        .with_skip_blank_lines(true)
        .with_trim(true);
    let output = run_sync(&spec)?;
    ensure!(output.stdout == "a \n b", "got {:?}", output.stdout);
    Ok(())
}

#[test]
fn stderr_and_exit_code_are_reported() -> Result<()> {
    let spec = ProcessSpec::new(["/bin/sh", "-c", "echo bad >&2; exit 3"])?;
    let output = run_sync(&spec)?;
    ensure!(output.state.exit_code == Some(3));
    ensure!(output.stderr == "bad\n");
    ensure!(output.stdout.is_empty());
    Ok(())
}

#[test]
fn merged_stderr_lands_on_stdout() -> Result<()> {
    let spec = ProcessSpec::new(["/bin/sh", "-c", "echo out; echo err >&2"])?
        .with_stderr(StderrPolicy::RedirectToStdout);
    let output = run_sync(&spec)?;
    ensure!(output.stdout == "out\nerr\n");
    ensure!(output.stderr.is_empty());
    Ok(())
}

#[test]
fn external_file_receives_output() -> Result<()> {
    let file = Arc::new(tempfile::tempfile()?);
    let spec = ProcessSpec::new(["echo", "kept"])?.with_stdout(StdoutSink::File(Arc::clone(&file)));
    let output = run_sync(&spec)?;
    ensure!(output.stdout.is_empty());
    let mut text = String::new();
    let mut handle: &File = &file;
    handle.read_to_string(&mut text)?;
    ensure!(text == "kept\n");
    Ok(())
}

#[test]
fn shell_command_line_is_wrapped() -> Result<()> {
    let output = run_sync(
        &ProcessSpec::parse("echo $((2 + 3))")?
            .with_shell(true)
            .with_trim(true),
    )?;
    ensure!(output.stdout == "5");
    Ok(())
}

#[rstest]
#[case("echo 'unterminated")]
#[case("echo \"half")]
fn unbalanced_quotes_are_rejected(#[case] command: &str) -> Result<()> {
    ensure!(matches!(
        ProcessSpec::parse(command),
        Err(ProcessError::UnbalancedQuotes { .. })
    ));
    Ok(())
}

#[test]
fn empty_command_is_rejected() -> Result<()> {
    ensure!(matches!(
        ProcessSpec::parse("   "),
        Err(ProcessError::EmptyCommand)
    ));
    Ok(())
}
