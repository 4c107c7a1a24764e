//! Host side of the shared-memory audio region.
//!
//! The client creates, sizes and initialises the backing file; the host
//! only opens it, maps it read-write and validates the header against the
//! negotiated configuration. The header is never rewritten here.

use std::cell::UnsafeCell;
use std::fs::OpenOptions;
use std::path::Path;

use memmap2::MmapMut;
use tracing::debug;

use vstbridge_protocol::shm::{ShmHeader, SHM_MAGIC};
use vstbridge_protocol::{CmdInitAudio, MAX_BLOCK_SIZE, MAX_CHANNELS, PROTOCOL_VERSION};

use crate::error::{HostError, Result};

/// A mapped audio exchange region.
///
/// Holds the mapping in an `UnsafeCell` because both sides write the region
/// through shared mappings; within this process the dispatch thread is the
/// only accessor, and input and output spans never overlap (validated
/// against the header's layout invariant on open).
pub struct SharedAudioRegion {
    mmap: UnsafeCell<MmapMut>,
    header: ShmHeader,
    name: String,
}

impl SharedAudioRegion {
    /// Opens an existing region by its backing-file name and validates it
    /// against the requested configuration. Missing file, wrong magic or
    /// version, mismatched configuration, broken layout invariant or a
    /// too-short mapping all fail without touching the region.
    pub fn open(cmd: &CmdInitAudio) -> Result<Self> {
        if cmd.num_inputs > MAX_CHANNELS || cmd.num_outputs > MAX_CHANNELS {
            return Err(HostError::InvalidParam(format!(
                "channel count exceeds {MAX_CHANNELS}"
            )));
        }
        if cmd.block_size == 0 || cmd.block_size > MAX_BLOCK_SIZE {
            return Err(HostError::InvalidParam(format!(
                "block size must be 1..={MAX_BLOCK_SIZE}"
            )));
        }

        let shm_err =
            |reason: String| HostError::SharedMemory(format!("{}: {reason}", cmd.shm_name));

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(Path::new(&cmd.shm_name))
            .map_err(|e| shm_err(e.to_string()))?;
        let mmap =
            unsafe { MmapMut::map_mut(&file) }.map_err(|e| shm_err(e.to_string()))?;

        let header = ShmHeader::from_bytes(&mmap)
            .ok_or_else(|| shm_err("region shorter than header".into()))?;

        if header.magic != SHM_MAGIC {
            return Err(shm_err(format!("bad magic {:#010x}", header.magic)));
        }
        if header.version != PROTOCOL_VERSION {
            return Err(shm_err(format!("unsupported version {}", header.version)));
        }
        if header.num_inputs != cmd.num_inputs
            || header.num_outputs != cmd.num_outputs
            || header.block_size != cmd.block_size
        {
            return Err(shm_err(format!(
                "header {}x{}@{} disagrees with request {}x{}@{}",
                header.num_inputs,
                header.num_outputs,
                header.block_size,
                cmd.num_inputs,
                cmd.num_outputs,
                cmd.block_size,
            )));
        }
        if header.output_offset != header.expected_output_offset() {
            return Err(shm_err("output offset violates the layout invariant".into()));
        }
        if mmap.len() < header.required_len() {
            return Err(shm_err(format!(
                "mapped {} bytes, layout needs {}",
                mmap.len(),
                header.required_len()
            )));
        }

        debug!(
            name = %cmd.shm_name,
            inputs = header.num_inputs,
            outputs = header.num_outputs,
            block = header.block_size,
            "audio region mapped"
        );

        Ok(Self {
            mmap: UnsafeCell::new(mmap),
            header,
            name: cmd.shm_name.clone(),
        })
    }

    pub fn header(&self) -> &ShmHeader {
        &self.header
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn channel_offset(&self, base: u32, channel: u32) -> usize {
        (base + channel * self.header.channel_bytes()) as usize
    }

    /// Raw pointer to an input channel's first sample.
    pub fn input_ptr(&self, channel: u32) -> *mut f32 {
        debug_assert!(channel < self.header.num_inputs);
        let offset = self.channel_offset(self.header.input_offset, channel);
        // SAFETY: offset validated against the mapping length on open.
        unsafe { (*self.mmap.get()).as_mut_ptr().add(offset) as *mut f32 }
    }

    /// Raw pointer to an output channel's first sample.
    pub fn output_ptr(&self, channel: u32) -> *mut f32 {
        debug_assert!(channel < self.header.num_outputs);
        let offset = self.channel_offset(self.header.output_offset, channel);
        // SAFETY: offset validated against the mapping length on open.
        unsafe { (*self.mmap.get()).as_mut_ptr().add(offset) as *mut f32 }
    }

    /// The first `n` samples of an input channel.
    pub fn input_channel(&self, channel: u32, n: usize) -> &[f32] {
        debug_assert!(n as u32 <= self.header.block_size);
        // SAFETY: span lies inside the validated mapping; no &mut alias is
        // handed out for input spans.
        unsafe { std::slice::from_raw_parts(self.input_ptr(channel), n) }
    }

    /// The first `n` samples of an output channel.
    pub fn output_channel_mut(&self, channel: u32, n: usize) -> &mut [f32] {
        debug_assert!(n as u32 <= self.header.block_size);
        // SAFETY: output spans are disjoint per channel and disjoint from
        // the input spans by the layout invariant; the dispatch thread is
        // the only in-process accessor.
        unsafe { std::slice::from_raw_parts_mut(self.output_ptr(channel), n) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::client_region;

    #[test]
    fn opens_and_validates_a_client_region() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = client_region(&dir, "audio", 48000, 512, 2, 2);
        let region = SharedAudioRegion::open(&cmd).unwrap();
        assert_eq!(region.header().sample_rate, 48000);
        assert_eq!(region.header().output_offset, 56 + 2 * 512 * 4);
    }

    #[test]
    fn missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = CmdInitAudio {
            sample_rate: 48000,
            block_size: 512,
            num_inputs: 2,
            num_outputs: 2,
            shm_name: dir.path().join("nope").to_string_lossy().into_owned(),
        };
        assert!(matches!(
            SharedAudioRegion::open(&cmd),
            Err(HostError::SharedMemory(_))
        ));
    }

    #[test]
    fn bad_magic_fails() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = client_region(&dir, "audio", 48000, 512, 2, 2);
        let path = dir.path().join("audio");
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[0] = 0;
        std::fs::write(&path, &bytes).unwrap();
        assert!(SharedAudioRegion::open(&cmd).is_err());
    }

    #[test]
    fn config_mismatch_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut cmd = client_region(&dir, "audio", 48000, 512, 2, 2);
        cmd.num_outputs = 4;
        assert!(SharedAudioRegion::open(&cmd).is_err());
    }

    #[test]
    fn truncated_region_fails() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = client_region(&dir, "audio", 48000, 512, 2, 2);
        let path = dir.path().join("audio");
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(100).unwrap();
        assert!(SharedAudioRegion::open(&cmd).is_err());
    }

    #[test]
    fn out_of_range_config_is_invalid_param() {
        let dir = tempfile::tempdir().unwrap();
        let mut cmd = client_region(&dir, "audio", 48000, 512, 2, 2);
        cmd.num_inputs = 9;
        assert!(matches!(
            SharedAudioRegion::open(&cmd),
            Err(HostError::InvalidParam(_))
        ));

        let mut cmd = client_region(&dir, "audio2", 48000, 512, 2, 2);
        cmd.block_size = 8192;
        assert!(matches!(
            SharedAudioRegion::open(&cmd),
            Err(HostError::InvalidParam(_))
        ));
    }

    #[test]
    fn channel_spans_follow_the_layout() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = client_region(&dir, "audio", 48000, 4, 2, 2);
        let region = SharedAudioRegion::open(&cmd).unwrap();

        region.output_channel_mut(0, 4).copy_from_slice(&[1.0, 2.0, 3.0, 4.0]);
        region.output_channel_mut(1, 4).copy_from_slice(&[5.0, 6.0, 7.0, 8.0]);
        assert_eq!(region.output_channel_mut(0, 4), &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(region.input_channel(0, 4), &[0.0; 4]);
    }
}
