use clap::Parser as _;
use kwall::driver::testing::LoopbackDriver;
use std::{fs, io::BufRead as _, path, sync, thread};

#[derive(clap::Parser)]
struct Arguments {
  #[clap(flatten)]
  arguments: kwall::Arguments,
  #[arg(
    long = "dry-run",
    help = "Use an in-process loopback driver fed from stdin instead of the OS packet driver",
    default_value_t = false
  )]
  dry_run: bool,
  #[clap(flatten)]
  verbose: clap_verbosity_flag::Verbosity<clap_verbosity_flag::InfoLevel>,
}

fn main() -> anyhow::Result<()> {
  let arguments = Arguments::parse();

  let text = fs::read_to_string(&arguments.arguments.config)?;
  let loaded = kwall::config::load(&text)?;

  let encoder = Box::new(log4rs::encode::pattern::PatternEncoder::new(
    "{d(%F %T)} {l} {t} - {m}{n}",
  ));
  log4rs::init_config(
    log4rs::config::Config::builder()
      .appender(
        log4rs::config::Appender::builder()
          .filter(Box::new(log4rs::filter::threshold::ThresholdFilter::new(
            log::LevelFilter::Trace,
          )))
          .build(
            "file",
            Box::new(
              log4rs::append::file::FileAppender::builder()
                .encoder(encoder.clone())
                .build(path::Path::new(&loaded.config.log_directory).join("kwall.log"))?,
            ),
          ),
      )
      .appender(
        log4rs::config::Appender::builder()
          .filter(Box::new(log4rs::filter::threshold::ThresholdFilter::new(
            arguments.verbose.log_level_filter(),
          )))
          .build(
            "console",
            Box::new(
              log4rs::append::console::ConsoleAppender::builder()
                .encoder(encoder)
                .build(),
            ),
          ),
      )
      .build(
        log4rs::config::Root::builder()
          .appenders(["console", "file"])
          .build(log::LevelFilter::Trace),
      )?,
  )?;

  if !arguments.dry_run {
    anyhow::bail!(
      "no OS packet-interception backend is built into this crate; rerun with --dry-run to \
       exercise the dispatcher against lines read from stdin"
    );
  }

  let driver = sync::Arc::new(LoopbackDriver::new());
  let feeder = {
    let driver = sync::Arc::clone(&driver);
    thread::spawn(move || {
      let stdin = std::io::stdin();
      for line in stdin.lock().lines().map_while(Result::ok) {
        driver.inject(line.into_bytes());
      }
      driver.shut();
    })
  };

  let result = kwall::run(loaded, sync::Arc::clone(&driver));
  feeder.join().ok();
  result
}
