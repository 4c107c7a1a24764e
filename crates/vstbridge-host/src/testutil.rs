//! Helpers for tests that play the client's role: creating, sizing and
//! initialising shared-memory regions the way the native side does.

use std::io::{Seek, SeekFrom, Write};

use vstbridge_protocol::shm::ShmHeader;
use vstbridge_protocol::CmdInitAudio;

/// Creates a client-initialised backing file and returns the `InitAudio`
/// command that names it.
pub(crate) fn client_region(
    dir: &tempfile::TempDir,
    name: &str,
    sample_rate: u32,
    block_size: u32,
    num_inputs: u32,
    num_outputs: u32,
) -> CmdInitAudio {
    let path = dir.path().join(name);
    let header = ShmHeader::for_config(sample_rate, block_size, num_inputs, num_outputs);
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(&header.to_bytes()).unwrap();
    file.set_len(header.required_len() as u64).unwrap();
    CmdInitAudio {
        sample_rate,
        block_size,
        num_inputs,
        num_outputs,
        shm_name: path.to_string_lossy().into_owned(),
    }
}

/// Writes one input channel's samples into the backing file, as the client
/// does before each block.
pub(crate) fn write_input_channel(cmd: &CmdInitAudio, channel: u32, samples: &[f32]) {
    let header = ShmHeader::for_config(
        cmd.sample_rate,
        cmd.block_size,
        cmd.num_inputs,
        cmd.num_outputs,
    );
    let offset = header.input_offset + channel * header.channel_bytes();
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .open(&cmd.shm_name)
        .unwrap();
    file.seek(SeekFrom::Start(offset as u64)).unwrap();
    for s in samples {
        file.write_all(&s.to_le_bytes()).unwrap();
    }
}

/// Pre-fills one output channel with a marker value, to observe zeroing.
pub(crate) fn write_output_channel(cmd: &CmdInitAudio, channel: u32, samples: &[f32]) {
    let header = ShmHeader::for_config(
        cmd.sample_rate,
        cmd.block_size,
        cmd.num_inputs,
        cmd.num_outputs,
    );
    let offset = header.output_offset + channel * header.channel_bytes();
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .open(&cmd.shm_name)
        .unwrap();
    file.seek(SeekFrom::Start(offset as u64)).unwrap();
    for s in samples {
        file.write_all(&s.to_le_bytes()).unwrap();
    }
}
