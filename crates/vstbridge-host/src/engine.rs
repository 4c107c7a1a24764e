//! Audio engine: the activate/processing state machine and per-block
//! marshalling between the shared-memory region and the plugin's process
//! call.
//!
//! The audio half of a session moves `Cold → BusesActive → Processing` when
//! audio is initialised and back down on teardown. A plugin without an
//! audio-processor interface runs in passthrough mode: input channels are
//! copied to output channels, extra outputs are zeroed.

use std::cell::UnsafeCell;
use std::ptr::null_mut;

use smallvec::SmallVec;
use tracing::{debug, warn};

use vst3::Steinberg::Vst::BusDirections_::{kInput, kOutput};
use vst3::Steinberg::Vst::Event_::EventTypes_::{
    kNoteOffEvent, kNoteOnEvent, kPolyPressureEvent,
};
use vst3::Steinberg::Vst::MediaTypes_::kAudio;
use vst3::Steinberg::Vst::ProcessModes_::kRealtime;
use vst3::Steinberg::Vst::SpeakerArr::kStereo;
use vst3::Steinberg::Vst::SymbolicSampleSizes_::kSample32;
use vst3::Steinberg::Vst::{
    AudioBusBuffers, AudioBusBuffers__type0, Event, Event__type0, IAudioProcessor,
    IAudioProcessorTrait as _, IComponent, IComponentTrait as _, IEventList, IEventListTrait,
    NoteOffEvent, NoteOnEvent, PolyPressureEvent, ProcessContext, ProcessData, ProcessSetup,
    SpeakerArrangement,
};
use vst3::Steinberg::{int32, kResultOk, tresult};
use vst3::{Class, ComPtr, ComWrapper};

use vstbridge_protocol::MidiEvent as WireMidiEvent;

use crate::audio::SharedAudioRegion;
use crate::error::{HostError, Result};

type EventVec = SmallVec<[Event; 256]>;

/// Host-owned input event list handed to the plugin through `ProcessData`.
/// Events are staged by `SendMidi` and cleared after every process call.
pub struct HostEventList {
    events: UnsafeCell<EventVec>,
}

impl Class for HostEventList {
    type Interfaces = (IEventList,);
}

impl IEventListTrait for HostEventList {
    unsafe fn getEventCount(&self) -> int32 {
        unsafe { (*self.events.get()).len() as int32 }
    }

    unsafe fn getEvent(&self, index: int32, e: *mut Event) -> tresult {
        unsafe {
            let events = &*self.events.get();
            if let Some(event) = events.get(index as usize) {
                *e = *event;
                kResultOk
            } else {
                vst3::Steinberg::kResultFalse
            }
        }
    }

    unsafe fn addEvent(&self, _e: *mut Event) -> tresult {
        vst3::Steinberg::kResultFalse
    }
}

fn note_on_event(channel: i16, pitch: i16, velocity: f32, sample_offset: i32) -> Event {
    Event {
        busIndex: 0,
        sampleOffset: sample_offset,
        ppqPosition: 0.0,
        flags: 0,
        r#type: kNoteOnEvent as u16,
        __field0: Event__type0 {
            noteOn: NoteOnEvent {
                channel,
                pitch,
                tuning: 0.0,
                velocity,
                length: 0,
                noteId: -1,
            },
        },
    }
}

fn note_off_event(channel: i16, pitch: i16, velocity: f32, sample_offset: i32) -> Event {
    Event {
        busIndex: 0,
        sampleOffset: sample_offset,
        ppqPosition: 0.0,
        flags: 0,
        r#type: kNoteOffEvent as u16,
        __field0: Event__type0 {
            noteOff: NoteOffEvent {
                channel,
                pitch,
                velocity,
                noteId: -1,
                tuning: 0.0,
            },
        },
    }
}

fn poly_pressure_event(channel: i16, pitch: i16, pressure: f32, sample_offset: i32) -> Event {
    Event {
        busIndex: 0,
        sampleOffset: sample_offset,
        ppqPosition: 0.0,
        flags: 0,
        r#type: kPolyPressureEvent as u16,
        __field0: Event__type0 {
            polyPressure: PolyPressureEvent {
                channel,
                pitch,
                pressure,
                noteId: -1,
            },
        },
    }
}

/// Translates one wire MIDI record into the plugin's event form.
///
/// Note-on with velocity zero arrives as note-off. Only note-on, note-off
/// and poly-pressure translate; other channel messages are dropped (the
/// hosted ABI conveys those through the parameter surface).
pub fn translate_midi_event(event: &WireMidiEvent) -> Option<Event> {
    let status = event.data[0];
    let channel = (status & 0x0F) as i16;
    let pitch = event.data[1] as i16;
    let strength = event.data[2] as f32 / 127.0;
    let offset = event.sample_offset as i32;

    match status & 0xF0 {
        0x90 if event.data[2] == 0 => Some(note_off_event(channel, pitch, 0.0, offset)),
        0x90 => Some(note_on_event(channel, pitch, strength, offset)),
        0x80 => Some(note_off_event(channel, pitch, strength, offset)),
        0xA0 => Some(poly_pressure_event(channel, pitch, strength, offset)),
        _ => None,
    }
}

/// The session's audio half. Owns the mapped region, the staged event list
/// and the processing state; holds its own references on the component and
/// processor for the duration.
pub struct AudioEngine {
    region: SharedAudioRegion,
    component: Option<ComPtr<IComponent>>,
    processor: Option<ComPtr<IAudioProcessor>>,
    event_list: ComWrapper<HostEventList>,
    input_ptrs: Vec<*mut f32>,
    output_ptrs: Vec<*mut f32>,
    processing: bool,
}

impl AudioEngine {
    /// Runs the `Cold → BusesActive → Processing` transitions over a freshly
    /// mapped region. With no processor the bus and processing calls are
    /// skipped and the engine serves passthrough blocks.
    pub fn start(
        region: SharedAudioRegion,
        component: Option<ComPtr<IComponent>>,
        processor: Option<ComPtr<IAudioProcessor>>,
    ) -> Result<Self> {
        let header = *region.header();

        if let Some(proc) = &processor {
            let mut input_arr: SpeakerArrangement = kStereo;
            let mut output_arr: SpeakerArrangement = kStereo;
            let result =
                unsafe { proc.setBusArrangements(&mut input_arr, 1, &mut output_arr, 1) };
            if result != kResultOk {
                warn!(code = result, "setBusArrangements rejected stereo/stereo");
            }

            let mut setup = ProcessSetup {
                processMode: kRealtime as i32,
                symbolicSampleSize: kSample32 as i32,
                maxSamplesPerBlock: header.block_size as i32,
                sampleRate: header.sample_rate as f64,
            };
            let result = unsafe { proc.setupProcessing(&mut setup) };
            if result != kResultOk {
                warn!(code = result, "setupProcessing returned non-ok");
            }
        }

        if let Some(comp) = &component {
            unsafe {
                comp.activateBus(kAudio as i32, kInput as i32, 0, 1);
                comp.activateBus(kAudio as i32, kOutput as i32, 0, 1);
            }
            let result = unsafe { comp.setActive(1) };
            if result != kResultOk {
                return Err(HostError::Audio(format!(
                    "setActive(true) failed with code {result:#x}"
                )));
            }
        }

        if let Some(proc) = &processor {
            let result = unsafe { proc.setProcessing(1) };
            if result != kResultOk {
                warn!(code = result, "setProcessing(true) returned non-ok");
            }
        }

        debug!(
            inputs = header.num_inputs,
            outputs = header.num_outputs,
            block = header.block_size,
            rate = header.sample_rate,
            passthrough = processor.is_none(),
            "audio engine started"
        );

        Ok(Self {
            region,
            component,
            processor,
            event_list: ComWrapper::new(HostEventList {
                events: UnsafeCell::new(SmallVec::new()),
            }),
            input_ptrs: Vec::with_capacity(header.num_inputs as usize),
            output_ptrs: Vec::with_capacity(header.num_outputs as usize),
            processing: true,
        })
    }

    pub fn region(&self) -> &SharedAudioRegion {
        &self.region
    }

    /// Whether the audio half reached the Processing state.
    pub fn is_processing(&self) -> bool {
        self.processing
    }

    /// Stages wire MIDI events for the next block. Untranslatable messages
    /// are dropped silently.
    pub fn queue_midi(&self, events: &[WireMidiEvent]) {
        // SAFETY: staged list is only touched from the dispatch thread; the
        // plugin reads it re-entrantly inside process(), never concurrently.
        let staged = unsafe { &mut *self.event_list.events.get() };
        staged.extend(events.iter().filter_map(translate_midi_event));
    }

    fn clear_events(&self) {
        // SAFETY: see queue_midi.
        unsafe { (*self.event_list.events.get()).clear() };
    }

    #[cfg(test)]
    fn staged_event_count(&self) -> usize {
        unsafe { (*self.event_list.events.get()).len() }
    }

    /// Processes one block of `num_samples ≤ block_size` samples in place in
    /// the shared region.
    pub fn process_block(&mut self, num_samples: u32) -> Result<()> {
        let header = *self.region.header();
        if num_samples == 0 || num_samples > header.block_size {
            return Err(HostError::InvalidParam(format!(
                "num_samples {num_samples} outside 1..={}",
                header.block_size
            )));
        }
        let n = num_samples as usize;

        let Some(processor) = self.processor.clone() else {
            run_passthrough(&self.region, n);
            self.clear_events();
            return Ok(());
        };

        self.input_ptrs.clear();
        for ch in 0..header.num_inputs {
            self.input_ptrs.push(self.region.input_ptr(ch));
        }
        self.output_ptrs.clear();
        for ch in 0..header.num_outputs {
            self.output_ptrs.push(self.region.output_ptr(ch));
        }

        let mut input_bus = AudioBusBuffers {
            numChannels: header.num_inputs as i32,
            silenceFlags: 0,
            __field0: AudioBusBuffers__type0 {
                channelBuffers32: self.input_ptrs.as_mut_ptr(),
            },
        };
        let mut output_bus = AudioBusBuffers {
            numChannels: header.num_outputs as i32,
            silenceFlags: 0,
            __field0: AudioBusBuffers__type0 {
                channelBuffers32: self.output_ptrs.as_mut_ptr(),
            },
        };

        let mut context: ProcessContext = unsafe { std::mem::zeroed() };
        context.sampleRate = header.sample_rate as f64;

        let event_list_ptr = self
            .event_list
            .as_com_ref::<IEventList>()
            .map(|r| r.as_ptr())
            .unwrap_or(null_mut());

        let mut data = ProcessData {
            processMode: kRealtime as i32,
            symbolicSampleSize: kSample32 as i32,
            numSamples: n as i32,
            numInputs: 1,
            numOutputs: 1,
            inputs: &mut input_bus,
            outputs: &mut output_bus,
            inputParameterChanges: null_mut(),
            outputParameterChanges: null_mut(),
            inputEvents: event_list_ptr,
            outputEvents: null_mut(),
            processContext: &mut context,
        };

        let result = unsafe { processor.process(&mut data) };

        // Next block starts with empty event lists either way.
        self.clear_events();

        if result != kResultOk {
            return Err(HostError::ProcessFailed(result));
        }
        Ok(())
    }

    /// Reverses the state transitions: Processing → BusesActive → Cold.
    fn stop(&mut self) {
        if !self.processing {
            return;
        }
        if let Some(proc) = &self.processor {
            unsafe {
                proc.setProcessing(0);
            }
        }
        if let Some(comp) = &self.component {
            unsafe {
                comp.setActive(0);
                comp.activateBus(kAudio as i32, kOutput as i32, 0, 0);
                comp.activateBus(kAudio as i32, kInput as i32, 0, 0);
            }
        }
        self.processing = false;
        debug!("audio engine stopped");
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The documented passthrough: the first `min(inputs, outputs)` output
/// channels mirror the inputs sample-for-sample, the rest are zeroed.
fn run_passthrough(region: &SharedAudioRegion, n: usize) {
    let header = region.header();
    let shared = header.num_inputs.min(header.num_outputs);
    for ch in 0..shared {
        region
            .output_channel_mut(ch, n)
            .copy_from_slice(region.input_channel(ch, n));
    }
    for ch in shared..header.num_outputs {
        region.output_channel_mut(ch, n).fill(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::SharedAudioRegion;
    use crate::testutil::{client_region, write_input_channel, write_output_channel};

    fn wire(offset: u32, status: u8, d1: u8, d2: u8) -> WireMidiEvent {
        WireMidiEvent::new(offset, status, d1, d2)
    }

    #[test]
    fn passthrough_copies_inputs_to_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = client_region(&dir, "audio", 48000, 4, 2, 2);
        write_input_channel(&cmd, 0, &[1.0, 2.0, 3.0, 4.0]);
        write_input_channel(&cmd, 1, &[5.0, 6.0, 7.0, 8.0]);

        let region = SharedAudioRegion::open(&cmd).unwrap();
        let mut engine = AudioEngine::start(region, None, None).unwrap();
        engine.process_block(4).unwrap();

        assert_eq!(engine.region().output_channel_mut(0, 4), &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(engine.region().output_channel_mut(1, 4), &[5.0, 6.0, 7.0, 8.0]);
    }

    #[test]
    fn passthrough_zeroes_extra_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = client_region(&dir, "audio", 48000, 4, 1, 2);
        write_input_channel(&cmd, 0, &[0.5, -0.5, 0.25, -0.25]);
        write_output_channel(&cmd, 1, &[9.0, 9.0, 9.0, 9.0]);

        let region = SharedAudioRegion::open(&cmd).unwrap();
        let mut engine = AudioEngine::start(region, None, None).unwrap();
        engine.process_block(4).unwrap();

        assert_eq!(engine.region().output_channel_mut(0, 4), &[0.5, -0.5, 0.25, -0.25]);
        assert_eq!(engine.region().output_channel_mut(1, 4), &[0.0; 4]);
    }

    #[test]
    fn partial_blocks_only_touch_the_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = client_region(&dir, "audio", 48000, 4, 1, 1);
        write_input_channel(&cmd, 0, &[1.0, 2.0, 3.0, 4.0]);
        write_output_channel(&cmd, 0, &[9.0, 9.0, 9.0, 9.0]);

        let region = SharedAudioRegion::open(&cmd).unwrap();
        let mut engine = AudioEngine::start(region, None, None).unwrap();
        engine.process_block(2).unwrap();

        assert_eq!(engine.region().output_channel_mut(0, 4), &[1.0, 2.0, 9.0, 9.0]);
    }

    #[test]
    fn oversized_block_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = client_region(&dir, "audio", 48000, 4, 1, 1);
        let region = SharedAudioRegion::open(&cmd).unwrap();
        let mut engine = AudioEngine::start(region, None, None).unwrap();

        assert!(matches!(
            engine.process_block(5),
            Err(HostError::InvalidParam(_))
        ));
        assert!(matches!(
            engine.process_block(0),
            Err(HostError::InvalidParam(_))
        ));
    }

    #[test]
    fn staged_events_are_cleared_after_a_block() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = client_region(&dir, "audio", 48000, 4, 1, 1);
        let region = SharedAudioRegion::open(&cmd).unwrap();
        let mut engine = AudioEngine::start(region, None, None).unwrap();

        engine.queue_midi(&[wire(10, 0x90, 60, 100), wire(12, 0x80, 60, 0)]);
        assert_eq!(engine.staged_event_count(), 2);
        engine.process_block(4).unwrap();
        assert_eq!(engine.staged_event_count(), 0);
    }

    #[test]
    fn note_on_translates_with_scaled_velocity() {
        let event = translate_midi_event(&wire(10, 0x90, 60, 100)).unwrap();
        assert_eq!(event.r#type, kNoteOnEvent as u16);
        assert_eq!(event.sampleOffset, 10);
        let note_on = unsafe { event.__field0.noteOn };
        assert_eq!(note_on.pitch, 60);
        assert!((note_on.velocity - 100.0 / 127.0).abs() < 1e-6);
    }

    #[test]
    fn note_on_velocity_zero_becomes_note_off() {
        let event = translate_midi_event(&wire(0, 0x90, 64, 0)).unwrap();
        assert_eq!(event.r#type, kNoteOffEvent as u16);
        let note_off = unsafe { event.__field0.noteOff };
        assert_eq!(note_off.pitch, 64);
        assert_eq!(note_off.velocity, 0.0);
    }

    #[test]
    fn note_off_and_poly_pressure_translate() {
        let off = translate_midi_event(&wire(3, 0x81, 72, 40)).unwrap();
        assert_eq!(off.r#type, kNoteOffEvent as u16);
        let body = unsafe { off.__field0.noteOff };
        assert_eq!(body.channel, 1);

        let pressure = translate_midi_event(&wire(7, 0xA5, 72, 64)).unwrap();
        assert_eq!(pressure.r#type, kPolyPressureEvent as u16);
        let body = unsafe { pressure.__field0.polyPressure };
        assert_eq!(body.channel, 5);
        assert!((body.pressure - 64.0 / 127.0).abs() < 1e-6);
    }

    #[test]
    fn other_channel_messages_are_dropped() {
        for status in [0xB0u8, 0xC0, 0xD0, 0xE0, 0xF0, 0x70] {
            assert!(
                translate_midi_event(&wire(0, status, 1, 2)).is_none(),
                "status {status:#x} must not translate"
            );
        }
    }

    #[test]
    fn a_second_engine_supersedes_the_first_region() {
        let dir = tempfile::tempdir().unwrap();
        let first = client_region(&dir, "audio-a", 48000, 4, 1, 1);
        let second = client_region(&dir, "audio-b", 48000, 4, 1, 1);
        write_input_channel(&second, 0, &[1.0, 1.0, 1.0, 1.0]);

        let stale =
            AudioEngine::start(SharedAudioRegion::open(&first).unwrap(), None, None).unwrap();
        drop(stale);
        let mut engine =
            AudioEngine::start(SharedAudioRegion::open(&second).unwrap(), None, None).unwrap();

        engine.process_block(4).unwrap();
        assert_eq!(engine.region().name(), second.shm_name);
        assert_eq!(engine.region().output_channel_mut(0, 4), &[1.0; 4]);

        // First region was never written by the passthrough.
        let untouched = SharedAudioRegion::open(&first).unwrap();
        assert_eq!(untouched.output_channel_mut(0, 4), &[0.0; 4]);
    }
}
