//! Update command - run a full check, download and install cycle.

use std::time::Duration;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use dlcsync::{DownloadProgressCallback, UpdateResult};

use super::{format_size, print_packages};
use crate::error::CliError;
use crate::runner::CliRunner;

/// Resolution of the progress bar; fractions are scaled to this many steps.
const PROGRESS_STEPS: u64 = 1000;

fn progress_bar() -> ProgressBar {
    let bar = ProgressBar::new(PROGRESS_STEPS);
    let style = ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {percent:>3}% {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("=> ");
    bar.set_style(style);
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

/// Run the update command.
pub fn run(runner: &CliRunner) -> Result<(), CliError> {
    runner.log_startup("update");
    let mut system = runner.build_system()?;

    let result = runner.runtime().block_on(system.check_for_updates());
    match result {
        UpdateResult::NotAvailable => {
            println!("{}", style("Content is up to date.").green());
            return Ok(());
        }
        UpdateResult::CheckFailed | UpdateResult::CheckFailedBlocking => {
            return Err(CliError::CheckFailed {
                blocking: result.is_blocking(),
            });
        }
        UpdateResult::Available | UpdateResult::AvailableBlocking => {}
    }

    if !system.pending_packages().is_empty() {
        println!(
            "Downloading {} package(s), {}",
            system.pending_packages().len(),
            format_size(u64::from(system.running_total_to_download()))
        );
        print_packages(system.pending_packages());
    }

    let bar = progress_bar();
    let sink = bar.clone();
    let on_progress: DownloadProgressCallback = Box::new(move |id: &str, fraction: f32| {
        sink.set_message(id.to_string());
        sink.set_position((f64::from(fraction) * PROGRESS_STEPS as f64) as u64);
    });

    let downloaded = runner
        .runtime()
        .block_on(system.download_updates(Some(on_progress)));
    if !downloaded.is_success() {
        bar.abandon_with_message("failed");
        return Err(CliError::DownloadFailed);
    }
    bar.finish_with_message("downloaded");

    let stale = system.stale_packages().len();
    if !system.install_updates().is_success() {
        return Err(CliError::InstallFailed);
    }

    println!("{}", style("Update installed.").green().bold());
    if stale > 0 {
        println!("Removed {} stale package(s)", stale);
    }
    Ok(())
}
