//! Protocol server: framed request decoding and sequential dispatch.
//!
//! One client, one thread, blocking transfers. Every valid request gets
//! exactly one response frame; framing errors (bad magic, wrong version,
//! oversized or short payloads at the transport level) terminate the
//! connection without a reply. Recoverable errors map to a status code and
//! never poison the session.

use std::io::{Read, Write};
use std::net::{Ipv4Addr, SocketAddr, TcpListener};

use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, info, warn};

use vstbridge_protocol::{
    decode_midi_events, encode_param_changes, CmdInitAudio, CmdLoadPlugin, Command, ParamValue,
    RequestHeader, ResponseHeader, Status, MAX_PAYLOAD, PORT_BASE, PORT_MAX, PROTOCOL_VERSION,
    REQUEST_MAGIC,
};

use crate::error::Result;
use crate::session::PluginSession;

/// Binds the loopback listener on the first free port of the announced
/// range, with address reuse enabled and a backlog of one.
pub fn bind_loopback() -> Result<TcpListener> {
    for port in PORT_BASE..=PORT_MAX {
        let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        if socket.bind(&addr.into()).is_ok() {
            socket.listen(1)?;
            return Ok(socket.into());
        }
    }
    Err(std::io::Error::new(
        std::io::ErrorKind::AddrInUse,
        format!("no free port in {PORT_BASE}..={PORT_MAX}"),
    )
    .into())
}

enum Flow {
    Continue,
    Shutdown,
}

/// Serves one client connection until shutdown or disconnect.
pub struct ProtocolServer {
    session: PluginSession,
}

impl ProtocolServer {
    pub fn new() -> Self {
        Self {
            session: PluginSession::new(),
        }
    }

    /// Runs the dispatch loop over a connected stream. On exit the plugin
    /// is unloaded, cascading editor close and audio teardown.
    pub fn run<S: Read + Write>(&mut self, mut stream: S) -> Result<()> {
        loop {
            let mut head = [0u8; RequestHeader::SIZE];
            if let Err(e) = stream.read_exact(&mut head) {
                info!(reason = %e, "client disconnected");
                break;
            }
            let header = RequestHeader::from_bytes(&head);

            if header.magic != REQUEST_MAGIC {
                warn!("bad request magic {:#010x}", header.magic);
                break;
            }
            if header.version != PROTOCOL_VERSION {
                warn!(version = header.version, "unsupported protocol version");
                break;
            }
            if header.payload_size > MAX_PAYLOAD {
                warn!(size = header.payload_size, "payload exceeds bound");
                break;
            }

            let mut payload = vec![0u8; header.payload_size as usize];
            if let Err(e) = stream.read_exact(&mut payload) {
                warn!(reason = %e, "short payload read");
                break;
            }

            debug!(command = header.command, payload = header.payload_size, "request");
            let (status, body, flow) = self.dispatch(header.command, &payload);

            let response = ResponseHeader::new(status, body.len() as u32);
            if stream.write_all(&response.to_bytes()).is_err()
                || stream.write_all(&body).is_err()
            {
                warn!("response write failed");
                break;
            }

            if matches!(flow, Flow::Shutdown) {
                info!("shutdown requested");
                break;
            }
        }

        self.session.unload();
        Ok(())
    }

    fn dispatch(&mut self, command: u32, payload: &[u8]) -> (Status, Vec<u8>, Flow) {
        let command = match Command::try_from(command) {
            Ok(command) => command,
            Err(other) => {
                warn!(command = other, "unknown command");
                return (Status::Error, Vec::new(), Flow::Continue);
            }
        };

        let (status, body) = match command {
            Command::Ping => (Status::Ok, Vec::new()),

            Command::LoadPlugin => match CmdLoadPlugin::decode(payload) {
                Some(cmd) => reply(self.session.load(&cmd.path, cmd.class_index)),
                None => (Status::InvalidParam, Vec::new()),
            },

            Command::UnloadPlugin => {
                self.session.unload();
                (Status::Ok, Vec::new())
            }

            Command::GetInfo => match self.session.info() {
                Ok(info) => (Status::Ok, info.encode()),
                Err(e) => reply(Err(e)),
            },

            Command::LegacyInit | Command::InitAudio => match CmdInitAudio::decode(payload) {
                Some(cmd) => reply(self.session.init_audio(&cmd)),
                None => (Status::InvalidParam, Vec::new()),
            },

            Command::LegacyProcess | Command::ProcessAudio => {
                if payload.len() < 4 {
                    (Status::InvalidParam, Vec::new())
                } else {
                    let n = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
                    reply(self.session.process_audio(n))
                }
            }

            Command::GetParamCount => match self.session.param_count() {
                Ok(count) => (Status::Ok, count.to_le_bytes().to_vec()),
                Err(e) => reply(Err(e)),
            },

            Command::GetParamInfo => {
                if payload.len() < 4 {
                    (Status::InvalidParam, Vec::new())
                } else {
                    let index =
                        u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
                    match self.session.param_info(index) {
                        Ok(info) => (Status::Ok, info.encode()),
                        Err(e) => reply(Err(e)),
                    }
                }
            }

            Command::GetParam => match ParamValue::decode(payload) {
                Some(cmd) => match self.session.get_param(cmd.param_id) {
                    Ok(value) => (
                        Status::Ok,
                        ParamValue {
                            param_id: cmd.param_id,
                            value,
                        }
                        .encode()
                        .to_vec(),
                    ),
                    Err(e) => reply(Err(e)),
                },
                None => (Status::InvalidParam, Vec::new()),
            },

            Command::SetParam => match ParamValue::decode(payload) {
                Some(cmd) => reply(self.session.set_param(cmd.param_id, cmd.value)),
                None => (Status::InvalidParam, Vec::new()),
            },

            Command::SendMidi => match decode_midi_events(payload) {
                Some(events) => reply(self.session.send_midi(&events)),
                None => (Status::InvalidParam, Vec::new()),
            },

            // Reserved; state transfer is not part of this protocol core.
            Command::GetState | Command::SetState => (Status::Error, Vec::new()),

            Command::OpenEditor => match self.session.open_editor() {
                Ok(info) => (Status::Ok, info.encode().to_vec()),
                Err(e) => reply(Err(e)),
            },

            Command::CloseEditor => {
                self.session.close_editor();
                (Status::Ok, Vec::new())
            }

            Command::GetEditorSize => match self.session.editor_size() {
                Ok(size) => (Status::Ok, size.encode().to_vec()),
                Err(e) => reply(Err(e)),
            },

            Command::GetParamChanges => match self.session.drain_param_changes() {
                Ok(changes) => (Status::Ok, encode_param_changes(&changes)),
                Err(e) => reply(Err(e)),
            },

            Command::Shutdown => return (Status::Ok, Vec::new(), Flow::Shutdown),
        };

        (status, body, Flow::Continue)
    }

}

fn reply(result: Result<()>) -> (Status, Vec<u8>) {
    match result {
        Ok(()) => (Status::Ok, Vec::new()),
        Err(e) => {
            warn!(error = %e, "command failed");
            (e.status(), Vec::new())
        }
    }
}

impl Default for ProtocolServer {
    fn default() -> Self {
        Self::new()
    }
}
