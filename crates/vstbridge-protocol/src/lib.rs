//! Wire protocol for the vstbridge host process.
//!
//! Everything the host and the native-side client must agree on
//! byte-for-byte lives here: request/response framing, command and status
//! codes, the fixed-size payload records, and the shared-memory audio
//! region layout. All multi-byte integers are little-endian; strings are
//! NUL-terminated within fixed-length slots.
//!
//! This crate is dependency-free so a client can embed it directly.

pub mod frame;
pub mod payload;
pub mod shm;

pub use frame::{
    Command, RequestHeader, ResponseHeader, Status, PROTOCOL_VERSION, REQUEST_MAGIC,
    RESPONSE_MAGIC,
};
pub use payload::{
    decode_midi_events, decode_param_changes, encode_midi_events, encode_param_changes,
    CmdInitAudio, CmdLoadPlugin, MidiEvent, ParamChange, ParamValue, RespEditorInfo,
    RespEditorSize, RespParamInfo, RespPluginInfo,
};
pub use shm::{ShmHeader, SHM_MAGIC};

/// First port the host tries to bind; it scans upward from here.
pub const PORT_BASE: u16 = 47100;
/// Last port in the scan range (inclusive).
pub const PORT_MAX: u16 = 47199;

/// Upper bound on audio channels per direction.
pub const MAX_CHANNELS: u32 = 8;
/// Upper bound on the audio block size in samples.
pub const MAX_BLOCK_SIZE: u32 = 4096;

/// Upper bound on a single request payload. Anything larger is treated as a
/// framing error and terminates the connection.
pub const MAX_PAYLOAD: u32 = 1024 * 1024;
