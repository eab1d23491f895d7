// WebM reader
//
// Header metadata is copied out of the demuxer when the file is opened and
// frames are then pulled one at a time. Laced blocks come back as one
// `Block` per frame. Rewinding reopens the file.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use matroska_demuxer::{Frame, Info, MatroskaFile, TrackEntry, TrackType};

use super::{Result, SegmentInfo, TrackInfo, TrackKind, WebmError};

/// One frame read from a cluster
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub track: u64,
    pub timestamp_ns: i64,
    pub is_key: bool,
    pub data: Vec<u8>,
}

pub struct WebmReader {
    path: PathBuf,
    file: MatroskaFile<BufReader<File>>,
    doc_type: String,
    info: SegmentInfo,
    tracks: Vec<TrackInfo>,
    frame: Frame,
}

fn open_demuxer(path: &Path) -> Result<MatroskaFile<BufReader<File>>> {
    let file = File::open(path)?;
    Ok(MatroskaFile::open(BufReader::new(file))?)
}

fn segment_info(info: &Info) -> SegmentInfo {
    let app = |s: &str| (!s.is_empty()).then(|| s.to_string());
    SegmentInfo {
        timecode_scale: info.timestamp_scale().get(),
        duration: info.duration(),
        muxing_app: app(info.muxing_app()),
        writing_app: app(info.writing_app()),
    }
}

fn track_info(entry: &TrackEntry) -> TrackInfo {
    let kind = match (entry.track_type(), entry.video(), entry.audio()) {
        (TrackType::Video, Some(video), _) => TrackKind::Video {
            width: video.pixel_width().get(),
            height: video.pixel_height().get(),
        },
        (TrackType::Audio, _, Some(audio)) => TrackKind::Audio {
            sampling_rate: audio.sampling_frequency(),
            channels: audio.channels().get(),
            bit_depth: audio.bit_depth().map(|d| d.get()),
        },
        _ => TrackKind::Other,
    };
    TrackInfo {
        number: entry.track_number().get(),
        uid: entry.track_uid().get(),
        codec_id: entry.codec_id().to_string(),
        codec_private: entry.codec_private().map(<[u8]>::to_vec),
        default_duration: entry.default_duration().map(|d| d.get()),
        kind,
    }
}

impl WebmReader {
    /// Open a WebM (or Matroska) file and read its header.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = open_demuxer(&path)?;

        let doc_type = file.ebml_header().doc_type().to_string();
        if doc_type != "webm" && doc_type != "matroska" {
            return Err(WebmError::DocType(doc_type));
        }
        let info = segment_info(file.info());
        let tracks = file.tracks().iter().map(track_info).collect();
        log::trace!("Opened {:?} ({}), timecode scale {}", path, doc_type, info.timecode_scale);

        Ok(Self {
            path,
            file,
            doc_type,
            info,
            tracks,
            frame: Frame::default(),
        })
    }

    pub fn doc_type(&self) -> &str {
        &self.doc_type
    }

    pub fn info(&self) -> &SegmentInfo {
        &self.info
    }

    pub fn tracks(&self) -> &[TrackInfo] {
        &self.tracks
    }

    pub fn first_track(&self) -> Option<&TrackInfo> {
        self.tracks.first()
    }

    /// Start reading blocks from the first cluster again.
    pub fn rewind(&mut self) -> Result<()> {
        self.file = open_demuxer(&self.path)?;
        Ok(())
    }

    pub fn blocks(&mut self) -> BlockCursor<'_> {
        BlockCursor { reader: self }
    }

    /// Next block in file order, or `None` after the last cluster.
    pub fn next_block(&mut self) -> Result<Option<Block>> {
        if !self.file.next_frame(&mut self.frame)? {
            return Ok(None);
        }
        let ticks = self.frame.timestamp as i64;
        Ok(Some(Block {
            track: self.frame.track,
            timestamp_ns: ticks * self.info.timecode_scale as i64,
            is_key: self.frame.is_keyframe.unwrap_or(false),
            data: std::mem::take(&mut self.frame.data),
        }))
    }
}

/// Iterator over the remaining blocks of a reader
pub struct BlockCursor<'a> {
    reader: &'a mut WebmReader,
}

impl Iterator for BlockCursor<'_> {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        self.reader.next_block().transpose()
    }
}
