//! WebM writer/reader agreement on files written to disk.

use screenrec_lib::webm::{TrackKind, WebmError, WebmReader, WebmWriter, CODEC_OPUS, CODEC_VP8};
use tempfile::TempDir;

const MS: u64 = 1_000_000;

/// 3 s of 30 fps video with a keyframe each second, plus 20 ms audio packets.
fn write_av(path: &std::path::Path) {
    let mut writer = WebmWriter::create(path).unwrap();
    writer.set_writing_app("container-test");
    let video = writer.add_video_track(64, 48, CODEC_VP8).unwrap();
    let audio = writer.add_audio_track(48_000.0, 2, CODEC_OPUS).unwrap();
    writer.set_codec_private(audio, b"OpusHead").unwrap();

    // (timestamp, track, keyframe, payload byte); video first on ties
    let mut packets: Vec<(u64, u64, bool, u8)> = (0..90u64)
        .map(|i| (i * 1_000_000_000 / 30, video, i % 30 == 0, i as u8))
        .chain((0..150u64).map(|i| (i * 20 * MS, audio, true, 0xA5)))
        .collect();
    packets.sort_by_key(|&(ts, track, _, _)| (ts, track));

    for (ts, track, key, byte) in packets {
        let len = if track == video { 24 } else { 6 };
        writer.add_frame(track, &vec![byte; len], ts, key).unwrap();
    }
    assert_eq!(writer.blocks_written(), 240);
    writer.finalize().unwrap();
}

#[test]
fn header_describes_both_tracks() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("av.webm");
    write_av(&path);

    let reader = WebmReader::open(&path).unwrap();
    assert_eq!(reader.doc_type(), "webm");
    assert_eq!(reader.info().timecode_scale, 1_000_000);
    assert_eq!(reader.info().writing_app.as_deref(), Some("container-test"));
    assert!(reader.info().duration_secs().unwrap() > 2.9);

    let tracks = reader.tracks();
    assert_eq!(tracks.len(), 2);
    assert!(tracks[0].is_video());
    assert_eq!(tracks[0].codec_id, CODEC_VP8);
    assert!(matches!(tracks[0].kind, TrackKind::Video { width: 64, height: 48 }));
    assert!(tracks[1].is_audio());
    assert_eq!(tracks[1].codec_id, CODEC_OPUS);
    assert!(matches!(tracks[1].kind, TrackKind::Audio { channels: 2, .. }));
    assert_eq!(tracks[1].codec_private.as_deref(), Some(&b"OpusHead"[..]));
}

#[test]
fn blocks_come_back_in_order() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("av.webm");
    write_av(&path);

    let mut reader = WebmReader::open(&path).unwrap();
    let blocks: Vec<_> = reader.blocks().map(|b| b.unwrap()).collect();
    assert_eq!(blocks.len(), 240);
    assert!(blocks.windows(2).all(|w| w[0].timestamp_ns <= w[1].timestamp_ns));

    let video: Vec<_> = blocks.iter().filter(|b| b.track == 1).collect();
    assert_eq!(video.len(), 90);
    assert!(video.windows(2).all(|w| w[0].timestamp_ns < w[1].timestamp_ns));
    let keys: Vec<i64> = video.iter().filter(|b| b.is_key).map(|b| b.timestamp_ns).collect();
    assert_eq!(keys, vec![0, 1_000_000_000, 2_000_000_000]);
    assert_eq!(video[30].data, vec![30u8; 24]);
    assert_eq!(blocks.iter().filter(|b| b.track == 2).count(), 150);
}

#[test]
fn rewind_restarts_block_iteration() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("av.webm");
    write_av(&path);

    let mut reader = WebmReader::open(&path).unwrap();
    let first = reader.next_block().unwrap().unwrap();
    let _ = reader.next_block().unwrap();
    reader.rewind().unwrap();
    let again = reader.next_block().unwrap().unwrap();
    assert_eq!(first, again);
    assert_eq!(reader.blocks().count(), 239);
}

#[test]
fn oversized_header_size_is_an_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("crafted.webm");

    // EBML magic followed by an eight-byte size of 2^48 and nothing behind it
    let mut bytes = vec![0x1A, 0x45, 0xDF, 0xA3, 0x01, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00];
    bytes.resize(28, 0);
    std::fs::write(&path, &bytes).unwrap();

    assert!(WebmReader::open(&path).is_err());
}

#[test]
fn truncated_file_is_an_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("av.webm");
    write_av(&path);

    let bytes = std::fs::read(&path).unwrap();
    let cut = dir.path().join("cut.webm");
    std::fs::write(&cut, &bytes[..20]).unwrap();
    let err = WebmReader::open(&cut).err().unwrap();
    assert!(matches!(err, WebmError::Demux(_) | WebmError::Io(_)));
}
