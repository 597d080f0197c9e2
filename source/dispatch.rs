use crate::{
  config::Config,
  confusables::ConfusableMap,
  driver::{self, Layer, PacketDriver, Param},
  pipeline,
  score::{FailureHook, Scorer},
  telemetry,
};
use anyhow::Context as _;
use std::{
  collections, panic,
  sync::{self, atomic},
  thread, time,
};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum State {
  Uninitialised,
  Configuring,
  Running,
  Draining,
  Stopped,
}

/// Test-only fault injection, keyed by worker thread id, mirroring the dispatcher's own
/// thread-keyed interruption table discipline used elsewhere for deterministic test failures.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Interruption {
  FailScoreSlot(usize),
}

static INTERRUPTIONS: once_cell::sync::Lazy<
  sync::Mutex<collections::HashMap<thread::ThreadId, Interruption>>,
> = once_cell::sync::Lazy::new(|| sync::Mutex::new(collections::HashMap::new()));

pub fn interrupt(name: Option<Interruption>) {
  match (name, INTERRUPTIONS.lock().unwrap().entry(thread::current().id())) {
    (Some(interruption), collections::hash_map::Entry::Occupied(mut occupied)) => {
      occupied.insert(interruption);
    }
    (Some(interruption), collections::hash_map::Entry::Vacant(vacant)) => {
      vacant.insert(interruption);
    }
    (None, collections::hash_map::Entry::Occupied(occupied)) => {
      occupied.remove();
    }
    (None, collections::hash_map::Entry::Vacant(_)) => (),
  }
}

fn interrupted() -> Option<Interruption> {
  INTERRUPTIONS.lock().unwrap().get(&thread::current().id()).copied()
}

fn failure_hook() -> FailureHook {
  sync::Arc::new(|slot| matches!(interrupted(), Some(Interruption::FailScoreSlot(index)) if index == slot))
}

pub struct Dispatcher<D: PacketDriver> {
  driver: D,
  config: Config,
  scorer: Scorer,
  confusables: ConfusableMap,
  sink: telemetry::Sink,
  passed: atomic::AtomicU64,
  dropped: atomic::AtomicU64,
  stop: atomic::AtomicBool,
  bypass: atomic::AtomicBool,
  state: sync::Mutex<State>,
}

impl<D: PacketDriver> Dispatcher<D> {
  pub fn new(driver: D, config: Config, scorer: Scorer) -> Self {
    Self {
      driver,
      config,
      scorer,
      confusables: ConfusableMap::new(),
      sink: telemetry::Sink::new(),
      passed: atomic::AtomicU64::new(0),
      dropped: atomic::AtomicU64::new(0),
      stop: atomic::AtomicBool::new(false),
      bypass: atomic::AtomicBool::new(false),
      state: sync::Mutex::new(State::Uninitialised),
    }
  }

  pub fn state(&self) -> State {
    *self.state.lock().unwrap()
  }

  pub fn passed(&self) -> u64 {
    self.passed.load(atomic::Ordering::Relaxed)
  }

  pub fn dropped(&self) -> u64 {
    self.dropped.load(atomic::Ordering::Relaxed)
  }

  /// Request a cooperative shutdown: workers finish their in-flight packet and exit.
  pub fn stop(&self) {
    self.stop.store(true, atomic::Ordering::Relaxed);
  }

  /// Forward every subsequent packet unscored, without incrementing either counter.
  pub fn set_bypass(&self, bypass: bool) {
    self.bypass.store(bypass, atomic::Ordering::Relaxed);
  }

  fn set_state(&self, next: State) {
    *self.state.lock().unwrap() = next;
  }

  fn enter_draining(&self) {
    let mut state = self.state.lock().unwrap();
    if *state == State::Running {
      *state = State::Draining;
    }
  }

  /// Build the filter, open the driver with the queue parameters §4.6 specifies, spawn the
  /// worker pool, and block until every worker has exited (driven by [`Self::stop`]). A
  /// configuration/open failure transitions straight to `Stopped` and is reported.
  pub fn run(&self) -> anyhow::Result<()> {
    self.set_state(State::Configuring);
    let outcome = self.configure_and_run();
    if outcome.is_err() {
      self.set_state(State::Stopped);
    }
    outcome
  }

  fn configure_and_run(&self) -> anyhow::Result<()> {
    let filter = driver::build_filter(&self.config);
    anyhow::ensure!(
      self.driver.check_filter(&filter, Layer::Network),
      "driver rejected filter {filter:?}"
    );
    let handle = self
      .driver
      .open(&filter, Layer::Network, 0)
      .with_context(|| format!("couldn't open packet driver with filter {filter:?}"))?;
    self
      .driver
      .set_param(&handle, Param::QueueLength, driver::QUEUE_LENGTH)
      .context("couldn't set queue length")?;
    self
      .driver
      .set_param(&handle, Param::QueueTime, driver::QUEUE_TIME_MS)
      .context("couldn't set queue time")?;

    self.set_state(State::Running);
    // The fault-injection table is keyed by thread id; a test registers an interruption on its
    // own thread before calling `run`, so inherit it into every spawned worker explicitly.
    let inherited = interrupted();
    let result = crossbeam_utils::thread::scope(|scope| {
      for worker_id in 0..self.config.threads {
        let handle = &handle;
        scope.spawn(move |_| {
          if let Some(value) = inherited {
            interrupt(Some(value));
          }
          self.worker_loop(handle, worker_id)
        });
      }
    });
    result.map_err(|_| anyhow::anyhow!("a worker thread panicked"))?;

    self.driver.close(handle);
    self.set_state(State::Stopped);
    Ok(())
  }

  fn worker_loop(&self, handle: &D::Handle, worker_id: usize) {
    let mut buf = vec![0u8; 65536];
    loop {
      if self.stop.load(atomic::Ordering::Relaxed) {
        self.enter_draining();
        log::debug!("worker {worker_id} draining");
        return;
      }
      match self.driver.recv(handle, &mut buf) {
        Ok((len, address)) => {
          if self.bypass.load(atomic::Ordering::Relaxed) {
            if let Err(error) = self.driver.send(handle, &buf[..len], &address) {
              log::warn!("re-inject failed during bypass: {error}");
            }
            continue;
          }
          if !self.process_packet(handle, &buf[..len], &address) {
            self.stop.store(true, atomic::Ordering::Relaxed);
            self.enter_draining();
            return;
          }
        }
        Err(crate::driver::DriverError::Closed) => {
          self.enter_draining();
          return;
        }
        Err(error) => log::warn!("recv failed: {error}"),
      }
    }
  }

  /// Returns `false` on an unhandled pipeline exception, the only condition that should stop the
  /// whole dispatcher rather than just this packet.
  fn process_packet(&self, handle: &D::Handle, buf: &[u8], address: &D::Address) -> bool {
    let payload = pipeline::payload(buf, self.config.ignore_start);
    let hook = failure_hook();
    let started = time::Instant::now();
    let outcome = panic::catch_unwind(panic::AssertUnwindSafe(|| {
      pipeline::clean_and_score_with_hook(payload, &self.config, &self.confusables, &self.scorer, Some(&hook))
    }));
    let (verdict, cleaned) = match outcome {
      Ok(result) => result,
      Err(_) => {
        log::error!("unhandled pipeline exception, stopping");
        return false;
      }
    };
    let elapsed = started.elapsed();
    self.sink.emit(&telemetry::record(&verdict, elapsed, &cleaned));
    if verdict.drop() {
      self.dropped.fetch_add(1, atomic::Ordering::Relaxed);
    } else if let Err(error) = self.driver.send(handle, buf, address) {
      log::warn!("re-inject failed: {error}");
    } else {
      self.passed.fetch_add(1, atomic::Ordering::Relaxed);
    }
    true
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{config, driver::testing::LoopbackDriver};
  use std::thread;

  fn run_against(config_text: &str, packets: &[&[u8]]) -> (sync::Arc<LoopbackDriver>, u64, u64) {
    let loaded = config::load(config_text).unwrap();
    let driver = sync::Arc::new(LoopbackDriver::new());
    for packet in packets {
      driver.inject(packet.to_vec());
    }
    let dispatcher = sync::Arc::new(Dispatcher::new(sync::Arc::clone(&driver), loaded.config, loaded.scorer));
    let runner = {
      let dispatcher = sync::Arc::clone(&dispatcher);
      thread::spawn(move || dispatcher.run())
    };
    thread::sleep(time::Duration::from_millis(50));
    driver.shut();
    runner.join().unwrap().unwrap();
    (driver, dispatcher.passed(), dispatcher.dropped())
  }

  #[test]
  fn single_slot_drops_matching_packet() {
    let (driver, passed, dropped) =
      run_against("skeletonize=true\nregex1=^buy.*gold$\nweight1=100\n", &[b"buy gold"]);
    assert_eq!(dropped, 1);
    assert_eq!(passed, 0);
    assert!(driver.sent().is_empty());
  }

  #[test]
  fn confusable_lookalikes_still_drop() {
    let (driver, passed, dropped) = run_against(
      "skeletonize=true\nregex1=^buy.*gold$\nweight1=100\n",
      &["b\u{00dc}y g\u{00d6}ld".as_bytes()],
    );
    assert_eq!(dropped, 1);
    assert_eq!(passed, 0);
    assert!(driver.sent().is_empty());
  }

  #[test]
  fn non_matching_packet_is_forwarded() {
    let (driver, passed, dropped) =
      run_against("skeletonize=true\nregex1=^buy.*gold$\nweight1=100\n", &[b"buy silver"]);
    assert_eq!(passed, 1);
    assert_eq!(dropped, 0);
    assert_eq!(driver.sent(), vec![b"buy silver".to_vec()]);
  }

  #[test]
  fn two_slots_summed_past_threshold_drops() {
    let (_, passed, dropped) = run_against(
      "regex1=gold\nweight1=60\nregex2=cheap\nweight2=50\n",
      &[b"cheap gold!"],
    );
    assert_eq!(dropped, 1);
    assert_eq!(passed, 0);
  }

  #[test]
  fn bypass_forwards_without_touching_counters() {
    let loaded = config::load("regex1=gold\nweight1=100\n").unwrap();
    let driver = sync::Arc::new(LoopbackDriver::new());
    driver.inject(b"gold".to_vec());
    let dispatcher = sync::Arc::new(Dispatcher::new(sync::Arc::clone(&driver), loaded.config, loaded.scorer));
    dispatcher.set_bypass(true);
    let runner = {
      let dispatcher = sync::Arc::clone(&dispatcher);
      thread::spawn(move || dispatcher.run())
    };
    thread::sleep(time::Duration::from_millis(50));
    driver.shut();
    runner.join().unwrap().unwrap();
    assert_eq!(dispatcher.passed(), 0);
    assert_eq!(dispatcher.dropped(), 0);
    assert_eq!(driver.sent(), vec![b"gold".to_vec()]);
  }

  #[test]
  fn failure_hook_zeroes_only_the_interrupted_slot() {
    let loaded = config::load("regex1=gold\nweight1=60\nregex2=cheap\nweight2=50\n").unwrap();
    let driver = sync::Arc::new(LoopbackDriver::new());
    driver.inject(b"cheap gold".to_vec());
    let dispatcher = sync::Arc::new(Dispatcher::new(sync::Arc::clone(&driver), loaded.config, loaded.scorer));
    let runner = {
      let dispatcher = sync::Arc::clone(&dispatcher);
      thread::spawn(move || {
        interrupt(Some(Interruption::FailScoreSlot(1)));
        let result = dispatcher.run();
        interrupt(None);
        result
      })
    };
    thread::sleep(time::Duration::from_millis(50));
    driver.shut();
    runner.join().unwrap().unwrap();
    assert_eq!(dispatcher.passed(), 1);
    assert_eq!(dispatcher.dropped(), 0);
  }

  #[test]
  fn state_reaches_stopped_after_run_returns() {
    let loaded = config::load("threads=1\n").unwrap();
    let driver = sync::Arc::new(LoopbackDriver::new());
    let dispatcher = Dispatcher::new(driver.clone(), loaded.config, loaded.scorer);
    assert_eq!(dispatcher.state(), State::Uninitialised);
    driver.shut();
    dispatcher.run().unwrap();
    assert_eq!(dispatcher.state(), State::Stopped);
  }
}
