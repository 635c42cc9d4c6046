//! link.rs
//! Request/response framing for the haptic device wire protocol.
//! - commands are newline-free ASCII: a keyword plus optional numeric
//!   arguments (`set spring_Y pos [0,-0.35,0.05]`)
//! - responses are semicolon-delimited ASCII; an application-level failure is
//!   flagged by a literal error marker inside the response text
//! - the round trip is blocking and carries no per-request timeout: a request
//!   that never returns stalls the tick (known limitation)

use std::fmt;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::vec3::Vec3;

/// Literal substring flagging a device-reported failure in a response.
pub const ERROR_MARKER: &str = "--- ERROR";

const RESPONSE_BUF_LEN: usize = 4096;

/// Blocking request/response channel to the device.
pub trait Transport {
    fn roundtrip(&mut self, command: &str) -> io::Result<String>;
}

/// A failed request: either the transport could not deliver it, or the device
/// echoed the error marker back.
#[derive(Debug)]
pub enum LinkError {
    Transport(io::Error),
    Device(String),
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkError::Transport(e) => write!(f, "transport failure: {e}"),
            LinkError::Device(response) => write!(f, "device reported error: {response}"),
        }
    }
}

impl std::error::Error for LinkError {}

impl From<io::Error> for LinkError {
    fn from(e: io::Error) -> Self {
        LinkError::Transport(e)
    }
}

/// TCP transport to the device controller at a fixed network address.
pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    pub fn connect(address: &str) -> io::Result<Self> {
        let stream = TcpStream::connect(address)?;
        // The protocol is one short request, one short response; Nagle only
        // adds latency to the tick.
        stream.set_nodelay(true)?;
        Ok(Self { stream })
    }
}

impl Transport for TcpTransport {
    fn roundtrip(&mut self, command: &str) -> io::Result<String> {
        self.stream.write_all(command.as_bytes())?;
        let mut buf = [0u8; RESPONSE_BUF_LEN];
        let n = self.stream.read(&mut buf)?;
        Ok(String::from_utf8_lossy(&buf[..n]).into_owned())
    }
}

/// Command formatting and error detection over a [`Transport`].
///
/// One method per argument shape, mirroring the command grammar: bare
/// keyword, single scalar, bracketed triple, bracketed quadruple.
pub struct DeviceLink<T> {
    transport: T,
}

impl<T: Transport> DeviceLink<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    /// Send a raw command string and check the echoed response for the error
    /// marker. All other request methods funnel through here.
    pub fn request(&mut self, command: &str) -> Result<String, LinkError> {
        let response = self.transport.roundtrip(command)?;
        if response.contains(ERROR_MARKER) {
            return Err(LinkError::Device(response));
        }
        Ok(response)
    }

    pub fn request_scalar(&mut self, command: &str, value: f64) -> Result<String, LinkError> {
        self.request(&format!("{command} {value}"))
    }

    pub fn request_triple(
        &mut self,
        command: &str,
        a: f64,
        b: f64,
        c: f64,
    ) -> Result<String, LinkError> {
        self.request(&format!("{command} [{a},{b},{c}]"))
    }

    pub fn request_quad(
        &mut self,
        command: &str,
        a: f64,
        b: f64,
        c: f64,
        d: f64,
    ) -> Result<String, LinkError> {
        self.request(&format!("{command} [{a},{b},{c},{d}]"))
    }

    pub fn request_vector(&mut self, command: &str, v: Vec3) -> Result<String, LinkError> {
        self.request_triple(command, v[0], v[1], v[2])
    }
}

// ============================================================================
// In-memory transport (tests and benches)
// ============================================================================

/// Kinematic state and command log backing a [`LoopbackTransport`].
#[derive(Debug, Default)]
pub struct LoopbackState {
    pub position: Vec3,
    pub velocity: Vec3,
    pub acceleration: Vec3,
    pub force: Vec3,
    /// Every command the transport saw, in order.
    pub sent: Vec<String>,
    /// When set, the next request gets an error-marked response.
    pub fail_next: bool,
    /// Canned responses consumed front-first before the default replies.
    pub scripted: Vec<String>,
}

/// Transport that answers from a programmable in-memory state instead of a
/// live device. Kinematic queries report `LoopbackState` vectors; everything
/// else is acknowledged. Shared behind a mutex so a test can steer the
/// "device" between ticks.
#[derive(Clone)]
pub struct LoopbackTransport {
    state: Arc<Mutex<LoopbackState>>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(LoopbackState::default())),
        }
    }

    pub fn state(&self) -> Arc<Mutex<LoopbackState>> {
        self.state.clone()
    }
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn fmt_vec(v: Vec3) -> String {
    format!("[{},{},{}]", v[0], v[1], v[2])
}

impl Transport for LoopbackTransport {
    fn roundtrip(&mut self, command: &str) -> io::Result<String> {
        let mut state = self.state.lock();
        state.sent.push(command.to_string());

        if state.fail_next {
            state.fail_next = false;
            return Ok(format!("{ERROR_MARKER}: refused;"));
        }
        if !state.scripted.is_empty() {
            return Ok(state.scripted.remove(0));
        }

        let response = if command.starts_with("get modelpos") {
            format!(
                "{};{};{};{};",
                fmt_vec(state.position),
                fmt_vec(state.velocity),
                fmt_vec(state.acceleration),
                fmt_vec(state.force),
            )
        } else if command == "get position_calibrated" {
            "true;".to_string()
        } else if command == "get emergencybuttonpushed" || command == "get emergencyrelay" {
            "false;".to_string()
        } else if command == "get state" {
            "force;".to_string()
        } else {
            "ok;".to_string()
        };
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo {
        last: Option<String>,
        reply: String,
    }

    impl Transport for Echo {
        fn roundtrip(&mut self, command: &str) -> io::Result<String> {
            self.last = Some(command.to_string());
            Ok(self.reply.clone())
        }
    }

    #[test]
    fn scalar_command_appends_one_token() {
        let mut link = DeviceLink::new(Echo {
            last: None,
            reply: "ok;".into(),
        });
        link.request_scalar("set inertia", 3.5).unwrap();
        assert_eq!(link.transport.last.as_deref(), Some("set inertia 3.5"));
    }

    #[test]
    fn vector_command_brackets_components() {
        let mut link = DeviceLink::new(Echo {
            last: None,
            reply: "ok;".into(),
        });
        link.request_vector("set spring_Y pos", [0.0, -0.5, 0.05]).unwrap();
        assert_eq!(
            link.transport.last.as_deref(),
            Some("set spring_Y pos [0,-0.5,0.05]")
        );
    }

    #[test]
    fn quad_command_brackets_four_components() {
        let mut link = DeviceLink::new(Echo {
            last: None,
            reply: "ok;".into(),
        });
        link.request_quad("set plane", 1.0, 2.0, 3.0, 4.0).unwrap();
        assert_eq!(link.transport.last.as_deref(), Some("set plane [1,2,3,4]"));
    }

    #[test]
    fn error_marker_in_response_fails_the_request() {
        let mut link = DeviceLink::new(Echo {
            last: None,
            reply: "--- ERROR: no such object;".into(),
        });
        match link.request("set nothing enable") {
            Err(LinkError::Device(resp)) => assert!(resp.contains(ERROR_MARKER)),
            other => panic!("expected device error, got {other:?}"),
        }
    }

    #[test]
    fn loopback_reports_programmed_kinematics() {
        let mut transport = LoopbackTransport::new();
        transport.state().lock().position = [0.0, 0.25, 0.05];
        let response = transport
            .roundtrip("get modelpos; get modelvel; get modelacc; get measforce")
            .unwrap();
        assert!(response.starts_with("[0,0.25,0.05];"));
    }
}
