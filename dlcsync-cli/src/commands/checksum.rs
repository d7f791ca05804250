//! Checksum command - compute manifest checksums.
//!
//! Useful when authoring manifests: the output is exactly what a `Checksum`
//! attribute must contain.

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use dlcsync::checksum::checksum_reader;
use dlcsync::ChecksumAlgorithm;

use crate::error::CliError;
use crate::runner::CliRunner;

/// Arguments for the checksum command.
pub struct ChecksumArgs {
    pub files: Vec<PathBuf>,
    pub algorithm: Option<String>,
    pub dlc: bool,
}

/// Run the checksum command.
pub fn run(runner: &CliRunner, args: ChecksumArgs) -> Result<(), CliError> {
    if args.dlc {
        return run_dlc(runner, &args.files);
    }

    let algorithm: ChecksumAlgorithm = match args.algorithm {
        Some(name) => name.parse().map_err(CliError::Config)?,
        None => runner.config().content.checksum_algorithm,
    };

    for path in &args.files {
        let mut reader = BufReader::new(File::open(path)?);
        let checksum = checksum_reader(algorithm, &mut reader)?;
        println!("{}  {}", checksum, path.display());
    }

    Ok(())
}

/// Checksum files inside the DLC cache through the pipeline itself.
fn run_dlc(runner: &CliRunner, files: &[PathBuf]) -> Result<(), CliError> {
    let system = runner.build_system()?;

    for path in files {
        let relative = path.to_string_lossy().replace('\\', "/");
        let checksum = system.manifest_checksum_for_file(&relative);
        if checksum.is_empty() {
            return Err(CliError::Config(format!(
                "Cannot read {} in the DLC cache",
                relative
            )));
        }
        println!("{}  {}", checksum, relative);
    }

    Ok(())
}
