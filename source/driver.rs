use crate::config::Config;
use std::{error, fmt, net, sync};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Protocol {
  Tcp,
  Udp,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FilterGroup {
  pub protocol: Protocol,
  pub ip: net::IpAddr,
  pub port: Option<u16>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Param {
  QueueLength,
  QueueTime,
}

pub const QUEUE_LENGTH: u32 = 8192;
pub const QUEUE_TIME_MS: u32 = 2048;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Layer {
  Network,
}

#[derive(Debug)]
pub enum DriverError {
  Open(String),
  SetParam(Param, String),
  Recv(String),
  /// The handle was closed out from under a blocked `recv`; a worker seeing this exits normally
  /// rather than logging a warning and retrying.
  Closed,
  Send(String),
  InvalidFilter(String),
}

impl fmt::Display for DriverError {
  fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
    match self {
      DriverError::Open(reason) => write!(formatter, "couldn't open packet driver: {reason}"),
      DriverError::SetParam(param, reason) => {
        write!(formatter, "couldn't set {param:?}: {reason}")
      }
      DriverError::Recv(reason) => write!(formatter, "recv failed: {reason}"),
      DriverError::Closed => write!(formatter, "driver handle closed"),
      DriverError::Send(reason) => write!(formatter, "send failed: {reason}"),
      DriverError::InvalidFilter(filter) => write!(formatter, "invalid filter {filter:?}"),
    }
  }
}

impl error::Error for DriverError {}

/// The vendor packet-interception handle, abstracted at the boundary the dispatcher
/// (source/dispatch.rs) is built against. The production backend (a platform-specific divert
/// driver) is an external collaborator outside this crate; this trait plus an in-process
/// reference implementation (`testing::LoopbackDriver`) is what's built here.
pub trait PacketDriver: Send + Sync {
  type Handle: Send + Sync;
  type Address: Send;

  fn open(&self, filter: &str, layer: Layer, priority: i16) -> Result<Self::Handle, DriverError>;
  fn set_param(&self, handle: &Self::Handle, param: Param, value: u32) -> Result<(), DriverError>;
  fn recv(&self, handle: &Self::Handle, buf: &mut [u8]) -> Result<(usize, Self::Address), DriverError>;
  fn send(&self, handle: &Self::Handle, buf: &[u8], address: &Self::Address) -> Result<(), DriverError>;
  fn close(&self, handle: Self::Handle);
  fn check_filter(&self, filter: &str, layer: Layer) -> bool;
}

/// Forward the trait through a shared handle, so a driver can be handed to both the dispatcher
/// and an out-of-band feeder (see `testing::LoopbackDriver::inject`) without requiring a second,
/// dispatcher-specific sharing mechanism.
impl<T: PacketDriver + ?Sized> PacketDriver for sync::Arc<T> {
  type Handle = T::Handle;
  type Address = T::Address;

  fn open(&self, filter: &str, layer: Layer, priority: i16) -> Result<Self::Handle, DriverError> {
    (**self).open(filter, layer, priority)
  }

  fn set_param(&self, handle: &Self::Handle, param: Param, value: u32) -> Result<(), DriverError> {
    (**self).set_param(handle, param, value)
  }

  fn recv(&self, handle: &Self::Handle, buf: &mut [u8]) -> Result<(usize, Self::Address), DriverError> {
    (**self).recv(handle, buf)
  }

  fn send(&self, handle: &Self::Handle, buf: &[u8], address: &Self::Address) -> Result<(), DriverError> {
    (**self).send(handle, buf, address)
  }

  fn close(&self, handle: Self::Handle) {
    (**self).close(handle)
  }

  fn check_filter(&self, filter: &str, layer: Layer) -> bool {
    (**self).check_filter(filter, layer)
  }
}

/// Render the configured `protocol/ip/port` groups into a BPF-like filter string:
/// `inbound and (<group> or <group> …)`, each group `(ip.SrcAddr == <ip> [and ip.DestPort ==
/// <port>] and (tcp.PayloadLength > 0 | udp.PayloadLength > 0))`.
pub fn build_filter(config: &Config) -> String {
  let groups: Vec<String> = config
    .groups
    .iter()
    .map(|group| {
      let payload = match group.protocol {
        Protocol::Tcp => "tcp.PayloadLength > 0",
        Protocol::Udp => "udp.PayloadLength > 0",
      };
      match group.port {
        Some(port) => format!(
          "(ip.SrcAddr == {} and ip.DestPort == {port} and ({payload}))",
          group.ip
        ),
        None => format!("(ip.SrcAddr == {} and ({payload}))", group.ip),
      }
    })
    .collect();
  if groups.is_empty() {
    "inbound and (tcp.PayloadLength > 0 or udp.PayloadLength > 0)".to_string()
  } else {
    format!("inbound and ({})", groups.join(" or "))
  }
}

/// An in-process, channel-backed `PacketDriver` used by the test suite and by a local dry-run
/// harness: packets are injected through [`LoopbackDriver::inject`], `recv` drains them, and
/// re-injected/sent packets land in [`LoopbackDriver::sent`] for the caller to assert on. Nothing
/// here touches the OS network stack.
pub mod testing {
  use super::{DriverError, Layer, Param, PacketDriver};
  use std::{collections::VecDeque, sync};

  #[derive(Default)]
  struct State {
    inbound: VecDeque<Vec<u8>>,
    sent: Vec<Vec<u8>>,
    closed: bool,
  }

  pub struct LoopbackDriver {
    state: sync::Mutex<State>,
    ready: sync::Condvar,
  }

  impl LoopbackDriver {
    pub fn new() -> Self {
      Self {
        state: sync::Mutex::new(State::default()),
        ready: sync::Condvar::new(),
      }
    }

    /// Hand a raw packet to the driver as though it had just arrived inbound.
    pub fn inject(&self, packet: Vec<u8>) {
      let mut state = self.state.lock().unwrap();
      state.inbound.push_back(packet);
      self.ready.notify_all();
    }

    /// Every packet handed to `send`, in the order it was sent.
    pub fn sent(&self) -> Vec<Vec<u8>> {
      self.state.lock().unwrap().sent.clone()
    }

    /// Unblock any worker parked in `recv` with nothing left to deliver; mirrors closing the
    /// handle during shutdown, after which a pending receive is a normal exit, not a failure.
    pub fn shut(&self) {
      let mut state = self.state.lock().unwrap();
      state.closed = true;
      self.ready.notify_all();
    }
  }

  impl Default for LoopbackDriver {
    fn default() -> Self {
      Self::new()
    }
  }

  impl PacketDriver for LoopbackDriver {
    type Handle = ();
    type Address = ();

    fn open(&self, filter: &str, _layer: Layer, _priority: i16) -> Result<(), DriverError> {
      if !self.check_filter(filter, Layer::Network) {
        return Err(DriverError::InvalidFilter(filter.to_string()));
      }
      Ok(())
    }

    fn set_param(&self, _handle: &(), _param: Param, _value: u32) -> Result<(), DriverError> {
      Ok(())
    }

    fn recv(&self, _handle: &(), buf: &mut [u8]) -> Result<(usize, ()), DriverError> {
      let mut state = self.state.lock().unwrap();
      loop {
        if let Some(packet) = state.inbound.pop_front() {
          let len = packet.len().min(buf.len());
          buf[..len].copy_from_slice(&packet[..len]);
          return Ok((len, ()));
        }
        if state.closed {
          return Err(DriverError::Closed);
        }
        state = self.ready.wait(state).unwrap();
      }
    }

    fn send(&self, _handle: &(), buf: &[u8], _address: &()) -> Result<(), DriverError> {
      self.state.lock().unwrap().sent.push(buf.to_vec());
      Ok(())
    }

    fn close(&self, _handle: ()) {
      self.shut();
    }

    fn check_filter(&self, filter: &str, _layer: Layer) -> bool {
      filter.contains("inbound") && balanced_parens(filter)
    }
  }

  fn balanced_parens(filter: &str) -> bool {
    let mut depth = 0i32;
    for c in filter.chars() {
      match c {
        '(' => depth += 1,
        ')' => {
          depth -= 1;
          if depth < 0 {
            return false;
          }
        }
        _ => (),
      }
    }
    depth == 0
  }

  #[cfg(test)]
  mod tests {
    use super::*;

    #[test]
    fn inject_then_recv_round_trips_bytes() {
      let driver = LoopbackDriver::new();
      driver.inject(b"hello".to_vec());
      let mut buf = [0u8; 16];
      let (len, _) = driver.recv(&(), &mut buf).unwrap();
      assert_eq!(&buf[..len], b"hello");
    }

    #[test]
    fn send_is_observable_through_sent() {
      let driver = LoopbackDriver::new();
      driver.send(&(), b"forwarded", &()).unwrap();
      assert_eq!(driver.sent(), vec![b"forwarded".to_vec()]);
    }

    #[test]
    fn shut_unblocks_a_pending_recv_with_an_error() {
      let driver = sync::Arc::new(LoopbackDriver::new());
      let waiting = sync::Arc::clone(&driver);
      let handle = std::thread::spawn(move || {
        let mut buf = [0u8; 16];
        waiting.recv(&(), &mut buf)
      });
      std::thread::sleep(std::time::Duration::from_millis(20));
      driver.shut();
      assert!(handle.join().unwrap().is_err());
    }

    #[test]
    fn check_filter_rejects_unbalanced_parens() {
      let driver = LoopbackDriver::new();
      assert!(!driver.check_filter("inbound and (tcp.PayloadLength > 0", Layer::Network));
    }

    #[test]
    fn check_filter_rejects_missing_inbound() {
      let driver = LoopbackDriver::new();
      assert!(!driver.check_filter("outbound and (tcp.PayloadLength > 0)", Layer::Network));
    }
  }
}
