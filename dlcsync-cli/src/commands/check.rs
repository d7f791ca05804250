//! Check command - report available updates without downloading.

use console::style;
use dlcsync::UpdateResult;

use super::{format_size, print_packages};
use crate::error::CliError;
use crate::runner::CliRunner;

/// Run the check command.
pub fn run(runner: &CliRunner) -> Result<(), CliError> {
    runner.log_startup("check");
    let mut system = runner.build_system()?;

    let result = runner.runtime().block_on(system.check_for_updates());
    match result {
        UpdateResult::NotAvailable => {
            println!("{}", style("Content is up to date.").green());
        }
        UpdateResult::Available | UpdateResult::AvailableBlocking => {
            if result.is_blocking() {
                println!(
                    "{}",
                    style("Installed content is missing; this update is required.")
                        .yellow()
                        .bold()
                );
            }
            println!(
                "{} package(s) to download ({}), {} to remove",
                system.pending_packages().len(),
                format_size(u64::from(system.running_total_to_download())),
                system.stale_packages().len()
            );
            print_packages(system.pending_packages());
            for id in system.stale_packages() {
                println!("  {} {}", style("-").red(), id);
            }
        }
        UpdateResult::CheckFailed | UpdateResult::CheckFailedBlocking => {
            return Err(CliError::CheckFailed {
                blocking: result.is_blocking(),
            });
        }
    }

    Ok(())
}
