//! End-to-end MML -> sequencer -> PCM integration test, driving the
//! whole pipeline instead of a single module. The reference stream is
//! generated by the compiler itself, within the test.

use atinysynth_core::mixer::PolySynth;
use atinysynth_core::mml::MmlCompiler;
use atinysynth_core::sequencer::{self, FrameStream, SequencerPlayer, StreamFrameSource};

const SAMPLE_RATE: u32 = 8_000;

#[test]
fn cdefg_compiles_to_five_frames_on_one_channel() {
    // S4: with defaults, "cdefg" emits five frames, all on channel A.
    let compiler = MmlCompiler::new(SAMPLE_RATE);
    let map = compiler.compile("cdefg").unwrap();
    assert_eq!(map.channel_count(), 1);

    let stream = sequencer::compile(&map, SAMPLE_RATE);
    assert_eq!(stream.header.voices, 1);
    assert_eq!(stream.header.frame_count, 5);
}

#[test]
fn two_channel_score_compiles_in_fetch_order_not_channel_order() {
    let compiler = MmlCompiler::new(SAMPLE_RATE);
    // Channel A gets two short notes, channel B one long note. In
    // authoring (channel) order that's [c, d, e]; but B's long note
    // frees its slot only once A's short notes have already cycled
    // twice, so fetch order is [c, e, d].
    let map = compiler.compile("Al16 c d\nBl1 e").unwrap();
    assert_eq!(map.channel_count(), 2);

    let stream = sequencer::compile(&map, SAMPLE_RATE);
    assert_eq!(stream.header.voices, 2);
    assert_eq!(stream.header.frame_count, 3);

    // Waveform (frequency) depends only on note/octave, not on the
    // duration in effect when it was parsed, so isolated single-note
    // compiles are directly comparable to frames pulled out of the
    // interleaved score above.
    let d_alone = compiler.compile("d").unwrap();
    let e_alone = compiler.compile("e").unwrap();
    let stream_d = sequencer::compile(&d_alone, SAMPLE_RATE);
    let stream_e = sequencer::compile(&e_alone, SAMPLE_RATE);

    assert_eq!(stream.frames[1].waveform, stream_e.frames[0].waveform);
    assert_eq!(stream.frames[2].waveform, stream_d.frames[0].waveform);
}

#[test]
fn compiled_stream_round_trips_through_bytes() {
    let compiler = MmlCompiler::new(SAMPLE_RATE);
    let map = compiler.compile("cdefg").unwrap();
    let stream = sequencer::compile(&map, SAMPLE_RATE);

    let bytes = stream.to_bytes();
    let parsed = FrameStream::from_bytes(&bytes).unwrap();
    assert_eq!(parsed.header, stream.header);
    assert_eq!(parsed.frames, stream.frames);
}

/// Property 7: replaying a compiled stream through a live
/// `SequencerPlayer`, feeding before the mixer runs each sample (§4.5),
/// reproduces bit-for-bit the PCM trace the offline compiler itself
/// produced while simulating the same frame map.
#[test]
fn sequencer_replay_fidelity() {
    let compiler = MmlCompiler::new(SAMPLE_RATE);
    let map = compiler.compile("cdefgab").unwrap();

    // Reference: the trace `compile` recorded while it simulated the
    // map offline — not reproduced by any code under test here.
    let (stream, reference_pcm) = sequencer::compile_with_pcm(&map, SAMPLE_RATE);
    let voices = stream.header.voices as usize;

    // Live: an independent synth fed from the serialized stream,
    // feeding one frame before each sample's mix, matching the order
    // `compile_with_pcm` used to build `reference_pcm`.
    let bytes = stream.to_bytes();
    let stream = FrameStream::from_bytes(&bytes).unwrap();
    let mut live_synth = PolySynth::new(voices);
    let mut live_player =
        SequencerPlayer::load_header(stream.header, SAMPLE_RATE, &mut live_synth).unwrap();
    let mut live_source = StreamFrameSource::new(&stream);
    let mut live_pcm = Vec::new();
    for _ in 0..reference_pcm.len() {
        live_player.feed(&mut live_synth, &mut live_source);
        live_pcm.push(live_synth.next());
    }

    assert_eq!(reference_pcm, live_pcm);
    // The score is not silent throughout.
    assert!(live_pcm.iter().any(|&s| s != 0));
}

#[test]
fn player_rejects_stream_compiled_for_a_different_rate() {
    let compiler = MmlCompiler::new(SAMPLE_RATE);
    let map = compiler.compile("c").unwrap();
    let stream = sequencer::compile(&map, SAMPLE_RATE);

    let mut synth = PolySynth::new(stream.header.voices as usize);
    let result = SequencerPlayer::load_header(stream.header, 44_100, &mut synth);
    assert!(result.is_err());
}
