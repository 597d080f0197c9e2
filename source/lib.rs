pub mod config;
pub mod confusables;
pub mod decode;
pub mod dispatch;
pub mod driver;
pub mod normalize;
pub mod pipeline;
pub mod score;
pub mod strip;
pub mod substitute;
pub mod telemetry;

use std::path;

#[derive(clap::Args)]
#[group(skip)]
pub struct Arguments {
  #[arg(long = "config", help = "Path to the configuration file")]
  pub config: path::PathBuf,
}

/// Check the process holds the OS privilege level the packet driver needs. The production driver
/// is an external collaborator this crate doesn't open directly, but the check belongs here
/// because every backend behind the [`driver::PacketDriver`] boundary requires it.
pub fn require_elevated() -> anyhow::Result<()> {
  // SAFETY: geteuid takes no arguments, reads only process credentials, and cannot fail.
  check_elevated(unsafe { libc::geteuid() })
}

fn check_elevated(euid: u32) -> anyhow::Result<()> {
  anyhow::ensure!(euid == 0, "must run elevated (euid 0) to open the packet driver");
  Ok(())
}

/// Check elevation, then construct and run the dispatcher against `driver` with the already
/// loaded configuration. Split from config loading so a caller (`main`) can use the loaded
/// `log_directory` to set up logging before this blocks for the lifetime of the process.
pub fn run<D: driver::PacketDriver>(loaded: config::Loaded, driver: D) -> anyhow::Result<()> {
  require_elevated()?;
  let dispatcher = dispatch::Dispatcher::new(driver, loaded.config, loaded.scorer);
  dispatcher.run()
}
