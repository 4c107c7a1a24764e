//! Request/response framing.
//!
//! Every request starts with a 16-byte [`RequestHeader`], every response
//! with a 12-byte [`ResponseHeader`], each followed by `payload_size` bytes.

/// Request magic; the bytes `"RWNH"` on the wire.
pub const REQUEST_MAGIC: u32 = 0x484E_5752;
/// Response magic; the bytes `"RWNR"` on the wire.
pub const RESPONSE_MAGIC: u32 = 0x524E_5752;
/// Protocol version carried in every request header.
pub const PROTOCOL_VERSION: u32 = 1;

/// Command codes. The values are wire-stable and must never be renumbered.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Ping = 1,
    LoadPlugin = 2,
    UnloadPlugin = 3,
    GetInfo = 4,
    /// Legacy initialisation; routed to [`Command::InitAudio`].
    LegacyInit = 5,
    /// Legacy block trigger; routed to [`Command::ProcessAudio`].
    LegacyProcess = 6,
    GetParamCount = 7,
    GetParamInfo = 8,
    GetParam = 9,
    SetParam = 10,
    SendMidi = 11,
    /// Reserved; the host replies [`Status::Error`].
    GetState = 12,
    /// Reserved; the host replies [`Status::Error`].
    SetState = 13,
    OpenEditor = 14,
    CloseEditor = 15,
    GetEditorSize = 16,
    GetParamChanges = 17,
    InitAudio = 20,
    ProcessAudio = 21,
    Shutdown = 99,
}

impl TryFrom<u32> for Command {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, u32> {
        Ok(match value {
            1 => Command::Ping,
            2 => Command::LoadPlugin,
            3 => Command::UnloadPlugin,
            4 => Command::GetInfo,
            5 => Command::LegacyInit,
            6 => Command::LegacyProcess,
            7 => Command::GetParamCount,
            8 => Command::GetParamInfo,
            9 => Command::GetParam,
            10 => Command::SetParam,
            11 => Command::SendMidi,
            12 => Command::GetState,
            13 => Command::SetState,
            14 => Command::OpenEditor,
            15 => Command::CloseEditor,
            16 => Command::GetEditorSize,
            17 => Command::GetParamChanges,
            20 => Command::InitAudio,
            21 => Command::ProcessAudio,
            99 => Command::Shutdown,
            other => return Err(other),
        })
    }
}

/// Response status codes.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok = 0,
    Error = 1,
    NotLoaded = 2,
    NotInitialized = 3,
    InvalidParam = 4,
}

impl From<u32> for Status {
    fn from(value: u32) -> Self {
        match value {
            0 => Status::Ok,
            1 => Status::Error,
            2 => Status::NotLoaded,
            3 => Status::NotInitialized,
            4 => Status::InvalidParam,
            _ => Status::Error,
        }
    }
}

/// Header preceding every request.
#[derive(Debug, Clone, Copy)]
pub struct RequestHeader {
    pub magic: u32,
    pub version: u32,
    pub command: u32,
    pub payload_size: u32,
}

impl RequestHeader {
    pub const SIZE: usize = 16;

    pub fn new(command: Command, payload_size: u32) -> Self {
        Self {
            magic: REQUEST_MAGIC,
            version: PROTOCOL_VERSION,
            command: command as u32,
            payload_size,
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.magic.to_le_bytes());
        buf[4..8].copy_from_slice(&self.version.to_le_bytes());
        buf[8..12].copy_from_slice(&self.command.to_le_bytes());
        buf[12..16].copy_from_slice(&self.payload_size.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8; Self::SIZE]) -> Self {
        Self {
            magic: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            version: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
            command: u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]),
            payload_size: u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]),
        }
    }
}

/// Header preceding every response.
#[derive(Debug, Clone, Copy)]
pub struct ResponseHeader {
    pub magic: u32,
    pub status: u32,
    pub payload_size: u32,
}

impl ResponseHeader {
    pub const SIZE: usize = 12;

    pub fn new(status: Status, payload_size: u32) -> Self {
        Self {
            magic: RESPONSE_MAGIC,
            status: status as u32,
            payload_size,
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.magic.to_le_bytes());
        buf[4..8].copy_from_slice(&self.status.to_le_bytes());
        buf[8..12].copy_from_slice(&self.payload_size.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8; Self::SIZE]) -> Self {
        Self {
            magic: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            status: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
            payload_size: u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]),
        }
    }

    pub fn status(&self) -> Status {
        Status::from(self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_magic_spells_rwnh_on_the_wire() {
        let header = RequestHeader::new(Command::Ping, 0);
        let bytes = header.to_bytes();
        assert_eq!(&bytes[0..4], b"RWNH");
        assert_eq!(&bytes[4..8], &1u32.to_le_bytes());
        assert_eq!(&bytes[8..12], &1u32.to_le_bytes());
        assert_eq!(&bytes[12..16], &0u32.to_le_bytes());
    }

    #[test]
    fn response_magic_spells_rwnr_on_the_wire() {
        let header = ResponseHeader::new(Status::Ok, 0);
        let bytes = header.to_bytes();
        assert_eq!(&bytes[0..4], b"RWNR");
        assert_eq!(&bytes[4..8], &0u32.to_le_bytes());
    }

    #[test]
    fn header_roundtrip() {
        let header = RequestHeader::new(Command::InitAudio, 80);
        let decoded = RequestHeader::from_bytes(&header.to_bytes());
        assert_eq!(decoded.magic, REQUEST_MAGIC);
        assert_eq!(decoded.command, 20);
        assert_eq!(decoded.payload_size, 80);
    }

    #[test]
    fn command_values_are_stable() {
        for (value, command) in [
            (1, Command::Ping),
            (2, Command::LoadPlugin),
            (3, Command::UnloadPlugin),
            (4, Command::GetInfo),
            (5, Command::LegacyInit),
            (6, Command::LegacyProcess),
            (7, Command::GetParamCount),
            (8, Command::GetParamInfo),
            (9, Command::GetParam),
            (10, Command::SetParam),
            (11, Command::SendMidi),
            (12, Command::GetState),
            (13, Command::SetState),
            (14, Command::OpenEditor),
            (15, Command::CloseEditor),
            (16, Command::GetEditorSize),
            (17, Command::GetParamChanges),
            (20, Command::InitAudio),
            (21, Command::ProcessAudio),
            (99, Command::Shutdown),
        ] {
            assert_eq!(Command::try_from(value), Ok(command));
            assert_eq!(command as u32, value);
        }
        assert_eq!(Command::try_from(18), Err(18));
        assert_eq!(Command::try_from(0), Err(0));
    }

    #[test]
    fn unknown_status_decodes_as_error() {
        assert_eq!(Status::from(7), Status::Error);
        assert_eq!(Status::from(2), Status::NotLoaded);
    }
}
