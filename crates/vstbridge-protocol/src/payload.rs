//! Fixed-size payload records.
//!
//! Each record mirrors a packed C struct: fixed field widths, little-endian
//! integers, strings NUL-terminated inside fixed-length slots. Decoders
//! return `None` on short input; the caller maps that to `InvalidParam`.

fn read_cstr(data: &[u8]) -> String {
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    String::from_utf8_lossy(&data[..end]).into_owned()
}

fn write_cstr(slot: &mut [u8], s: &str) {
    let bytes = s.as_bytes();
    let len = bytes.len().min(slot.len() - 1);
    slot[..len].copy_from_slice(&bytes[..len]);
}

fn read_u32(data: &[u8]) -> u32 {
    u32::from_le_bytes([data[0], data[1], data[2], data[3]])
}

fn read_f64(data: &[u8]) -> f64 {
    f64::from_le_bytes([
        data[0], data[1], data[2], data[3], data[4], data[5], data[6], data[7],
    ])
}

/// `LoadPlugin` payload: a bundle path slot and the audio-module class index.
#[derive(Debug, Clone)]
pub struct CmdLoadPlugin {
    pub path: String,
    pub class_index: u32,
}

impl CmdLoadPlugin {
    pub const SIZE: usize = 1024 + 4;

    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() < Self::SIZE {
            return None;
        }
        Some(Self {
            path: read_cstr(&data[..1024]),
            class_index: read_u32(&data[1024..]),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; Self::SIZE];
        write_cstr(&mut buf[..1024], &self.path);
        buf[1024..].copy_from_slice(&self.class_index.to_le_bytes());
        buf
    }
}

/// `InitAudio` payload: the audio configuration and the backing-file name of
/// the client-created shared-memory region.
#[derive(Debug, Clone)]
pub struct CmdInitAudio {
    pub sample_rate: u32,
    pub block_size: u32,
    pub num_inputs: u32,
    pub num_outputs: u32,
    pub shm_name: String,
}

impl CmdInitAudio {
    pub const SIZE: usize = 16 + 64;

    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() < Self::SIZE {
            return None;
        }
        Some(Self {
            sample_rate: read_u32(&data[0..]),
            block_size: read_u32(&data[4..]),
            num_inputs: read_u32(&data[8..]),
            num_outputs: read_u32(&data[12..]),
            shm_name: read_cstr(&data[16..80]),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.sample_rate.to_le_bytes());
        buf[4..8].copy_from_slice(&self.block_size.to_le_bytes());
        buf[8..12].copy_from_slice(&self.num_inputs.to_le_bytes());
        buf[12..16].copy_from_slice(&self.num_outputs.to_le_bytes());
        write_cstr(&mut buf[16..80], &self.shm_name);
        buf
    }
}

/// `GetParam`/`SetParam` payload and the `GetParam` response: a parameter id
/// with a normalised value. `GetParam` requests leave `value` at zero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamValue {
    pub param_id: u32,
    pub value: f64,
}

impl ParamValue {
    pub const SIZE: usize = 12;

    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() < Self::SIZE {
            return None;
        }
        Some(Self {
            param_id: read_u32(&data[0..]),
            value: read_f64(&data[4..]),
        })
    }

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.param_id.to_le_bytes());
        buf[4..12].copy_from_slice(&self.value.to_le_bytes());
        buf
    }
}

/// One MIDI-style note event on the wire. `data` holds the status byte,
/// two data bytes, and one reserved byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MidiEvent {
    pub sample_offset: u32,
    pub data: [u8; 4],
}

impl MidiEvent {
    pub const SIZE: usize = 8;

    pub fn new(sample_offset: u32, status: u8, data1: u8, data2: u8) -> Self {
        Self {
            sample_offset,
            data: [status, data1, data2, 0],
        }
    }

    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() < Self::SIZE {
            return None;
        }
        Some(Self {
            sample_offset: read_u32(&data[0..]),
            data: [data[4], data[5], data[6], data[7]],
        })
    }

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.sample_offset.to_le_bytes());
        buf[4..8].copy_from_slice(&self.data);
        buf
    }
}

/// Decodes a `SendMidi` payload: a `num_events` count followed by that many
/// [`MidiEvent`] records. Rejects counts that disagree with the payload
/// length.
pub fn decode_midi_events(data: &[u8]) -> Option<Vec<MidiEvent>> {
    if data.len() < 4 {
        return None;
    }
    let count = read_u32(data) as usize;
    let body = &data[4..];
    if body.len() < count * MidiEvent::SIZE {
        return None;
    }
    (0..count)
        .map(|i| MidiEvent::decode(&body[i * MidiEvent::SIZE..]))
        .collect()
}

/// Encodes a `SendMidi` payload.
pub fn encode_midi_events(events: &[MidiEvent]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 + events.len() * MidiEvent::SIZE);
    buf.extend_from_slice(&(events.len() as u32).to_le_bytes());
    for event in events {
        buf.extend_from_slice(&event.encode());
    }
    buf
}

/// One GUI-originated parameter edit in a `GetParamChanges` response.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamChange {
    pub param_id: u32,
    pub value: f64,
}

impl ParamChange {
    pub const SIZE: usize = 12;
}

/// Encodes a `GetParamChanges` response: `num_changes` followed by the
/// packed change records.
pub fn encode_param_changes(changes: &[ParamChange]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 + changes.len() * ParamChange::SIZE);
    buf.extend_from_slice(&(changes.len() as u32).to_le_bytes());
    for change in changes {
        buf.extend_from_slice(&change.param_id.to_le_bytes());
        buf.extend_from_slice(&change.value.to_le_bytes());
    }
    buf
}

/// Decodes a `GetParamChanges` response body.
pub fn decode_param_changes(data: &[u8]) -> Option<Vec<ParamChange>> {
    if data.len() < 4 {
        return None;
    }
    let count = read_u32(data) as usize;
    let body = &data[4..];
    if body.len() < count * ParamChange::SIZE {
        return None;
    }
    Some(
        (0..count)
            .map(|i| {
                let at = &body[i * ParamChange::SIZE..];
                ParamChange {
                    param_id: read_u32(at),
                    value: read_f64(&at[4..]),
                }
            })
            .collect(),
    )
}

/// `GetInfo` response.
#[derive(Debug, Clone, Default)]
pub struct RespPluginInfo {
    pub name: String,
    pub vendor: String,
    pub category: String,
    pub uid: String,
    pub num_params: u32,
    pub num_audio_inputs: u32,
    pub num_audio_outputs: u32,
    pub flags: u32,
}

impl RespPluginInfo {
    pub const SIZE: usize = 256 + 256 + 128 + 64 + 16;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; Self::SIZE];
        write_cstr(&mut buf[0..256], &self.name);
        write_cstr(&mut buf[256..512], &self.vendor);
        write_cstr(&mut buf[512..640], &self.category);
        write_cstr(&mut buf[640..704], &self.uid);
        buf[704..708].copy_from_slice(&self.num_params.to_le_bytes());
        buf[708..712].copy_from_slice(&self.num_audio_inputs.to_le_bytes());
        buf[712..716].copy_from_slice(&self.num_audio_outputs.to_le_bytes());
        buf[716..720].copy_from_slice(&self.flags.to_le_bytes());
        buf
    }

    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() < Self::SIZE {
            return None;
        }
        Some(Self {
            name: read_cstr(&data[0..256]),
            vendor: read_cstr(&data[256..512]),
            category: read_cstr(&data[512..640]),
            uid: read_cstr(&data[640..704]),
            num_params: read_u32(&data[704..]),
            num_audio_inputs: read_u32(&data[708..]),
            num_audio_outputs: read_u32(&data[712..]),
            flags: read_u32(&data[716..]),
        })
    }
}

/// `GetParamInfo` response. The range is normalised, so `min_value` and
/// `max_value` are always 0 and 1.
#[derive(Debug, Clone, Default)]
pub struct RespParamInfo {
    pub id: u32,
    pub name: String,
    pub units: String,
    pub default_value: f64,
    pub min_value: f64,
    pub max_value: f64,
    pub flags: u32,
}

impl RespParamInfo {
    pub const SIZE: usize = 4 + 128 + 32 + 24 + 4;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.id.to_le_bytes());
        write_cstr(&mut buf[4..132], &self.name);
        write_cstr(&mut buf[132..164], &self.units);
        buf[164..172].copy_from_slice(&self.default_value.to_le_bytes());
        buf[172..180].copy_from_slice(&self.min_value.to_le_bytes());
        buf[180..188].copy_from_slice(&self.max_value.to_le_bytes());
        buf[188..192].copy_from_slice(&self.flags.to_le_bytes());
        buf
    }

    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() < Self::SIZE {
            return None;
        }
        Some(Self {
            id: read_u32(&data[0..]),
            name: read_cstr(&data[4..132]),
            units: read_cstr(&data[132..164]),
            default_value: read_f64(&data[164..]),
            min_value: read_f64(&data[172..]),
            max_value: read_f64(&data[180..]),
            flags: read_u32(&data[188..]),
        })
    }
}

/// `OpenEditor` response: the native window id the client reparents, plus
/// the view size in pixels.
#[derive(Debug, Clone, Copy, Default)]
pub struct RespEditorInfo {
    pub window_id: u32,
    pub width: u32,
    pub height: u32,
}

impl RespEditorInfo {
    pub const SIZE: usize = 12;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.window_id.to_le_bytes());
        buf[4..8].copy_from_slice(&self.width.to_le_bytes());
        buf[8..12].copy_from_slice(&self.height.to_le_bytes());
        buf
    }

    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() < Self::SIZE {
            return None;
        }
        Some(Self {
            window_id: read_u32(&data[0..]),
            width: read_u32(&data[4..]),
            height: read_u32(&data[8..]),
        })
    }
}

/// `GetEditorSize` response.
#[derive(Debug, Clone, Copy, Default)]
pub struct RespEditorSize {
    pub width: u32,
    pub height: u32,
}

impl RespEditorSize {
    pub const SIZE: usize = 8;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.width.to_le_bytes());
        buf[4..8].copy_from_slice(&self.height.to_le_bytes());
        buf
    }

    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() < Self::SIZE {
            return None;
        }
        Some(Self {
            width: read_u32(&data[0..]),
            height: read_u32(&data[4..]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_plugin_roundtrip() {
        let cmd = CmdLoadPlugin {
            path: "Z:\\plugins\\SynthX.vst3".into(),
            class_index: 1,
        };
        let bytes = cmd.encode();
        assert_eq!(bytes.len(), 1028);
        let decoded = CmdLoadPlugin::decode(&bytes).unwrap();
        assert_eq!(decoded.path, "Z:\\plugins\\SynthX.vst3");
        assert_eq!(decoded.class_index, 1);
    }

    #[test]
    fn load_plugin_truncates_overlong_path() {
        let cmd = CmdLoadPlugin {
            path: "x".repeat(2000),
            class_index: 0,
        };
        let decoded = CmdLoadPlugin::decode(&cmd.encode()).unwrap();
        assert_eq!(decoded.path.len(), 1023);
    }

    #[test]
    fn init_audio_layout() {
        let cmd = CmdInitAudio {
            sample_rate: 48000,
            block_size: 512,
            num_inputs: 2,
            num_outputs: 2,
            shm_name: "/tmp/bridge-audio-7".into(),
        };
        let bytes = cmd.encode();
        assert_eq!(bytes.len(), 80);
        assert_eq!(&bytes[0..4], &48000u32.to_le_bytes());
        let decoded = CmdInitAudio::decode(&bytes).unwrap();
        assert_eq!(decoded.block_size, 512);
        assert_eq!(decoded.shm_name, "/tmp/bridge-audio-7");
    }

    #[test]
    fn short_payloads_are_rejected() {
        assert!(CmdInitAudio::decode(&[0u8; 79]).is_none());
        assert!(CmdLoadPlugin::decode(&[0u8; 100]).is_none());
        assert!(ParamValue::decode(&[0u8; 11]).is_none());
        assert!(MidiEvent::decode(&[0u8; 7]).is_none());
    }

    #[test]
    fn midi_batch_roundtrip() {
        let events = vec![
            MidiEvent::new(10, 0x90, 60, 100),
            MidiEvent::new(64, 0x80, 60, 0),
        ];
        let bytes = encode_midi_events(&events);
        assert_eq!(bytes.len(), 4 + 16);
        assert_eq!(decode_midi_events(&bytes).unwrap(), events);
    }

    #[test]
    fn midi_batch_rejects_inflated_count() {
        let mut bytes = encode_midi_events(&[MidiEvent::new(0, 0x90, 60, 100)]);
        bytes[0..4].copy_from_slice(&9u32.to_le_bytes());
        assert!(decode_midi_events(&bytes).is_none());
    }

    #[test]
    fn plugin_info_layout() {
        let info = RespPluginInfo {
            name: "SynthX".into(),
            vendor: "AcmeDSP".into(),
            category: "Instrument|Synth".into(),
            uid: "0123456789ABCDEF0123456789ABCDEF".into(),
            num_params: 12,
            num_audio_inputs: 2,
            num_audio_outputs: 2,
            flags: 0,
        };
        let bytes = info.encode();
        assert_eq!(bytes.len(), 720);
        let decoded = RespPluginInfo::decode(&bytes).unwrap();
        assert_eq!(decoded.name, "SynthX");
        assert_eq!(decoded.vendor, "AcmeDSP");
        assert_eq!(decoded.num_audio_inputs, 2);
        assert_eq!(decoded.num_audio_outputs, 2);
    }

    #[test]
    fn param_info_layout() {
        let info = RespParamInfo {
            id: 3,
            name: "Cutoff".into(),
            units: "Hz".into(),
            default_value: 0.5,
            min_value: 0.0,
            max_value: 1.0,
            flags: 1,
        };
        let bytes = info.encode();
        assert_eq!(bytes.len(), 192);
        let decoded = RespParamInfo::decode(&bytes).unwrap();
        assert_eq!(decoded.name, "Cutoff");
        assert_eq!(decoded.default_value, 0.5);
        assert_eq!(decoded.max_value, 1.0);
    }

    #[test]
    fn param_changes_roundtrip() {
        let changes = vec![
            ParamChange { param_id: 1, value: 0.25 },
            ParamChange { param_id: 2, value: 0.75 },
        ];
        let bytes = encode_param_changes(&changes);
        assert_eq!(bytes.len(), 4 + 24);
        assert_eq!(decode_param_changes(&bytes).unwrap(), changes);
    }
}
