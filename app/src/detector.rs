use anyhow::{Context, Result};
use handsign::{HandPose, Landmark};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// One camera frame as seen by the detector: the landmarks of the hand in
/// it, if there was one.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub index: usize,
    pub hand: Option<Vec<Landmark>>,
}

/// A stream of frames, read one per capture cycle.
pub trait FrameSource {
    /// The next frame, or `None` once the stream is exhausted.
    fn next_frame(&mut self) -> Result<Option<Frame>>;
}

/// The pose-detection engine.
pub trait PoseDetector {
    /// Detects at most one hand in `frame`. Timestamps must increase from
    /// call to call.
    fn detect(&mut self, frame: &Frame, timestamp_ms: u64) -> Option<HandPose>;
}

/// Replays a recorded session from a JSON Lines file.
///
/// Every non-empty line is one frame: `null` when no hand was visible,
/// otherwise an array of 21 landmarks, each either `{"x":..,"y":..,"z":..}`
/// or `[x, y, z]`.
pub struct ReplayDetector<R> {
    lines: std::io::Lines<R>,
    next_index: usize,
    last_timestamp: Option<u64>,
}

impl ReplayDetector<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open frame recording {}", path.display()))?;
        Ok(Self::from_reader(BufReader::new(file)))
    }
}

impl<R: BufRead> ReplayDetector<R> {
    pub fn from_reader(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            next_index: 0,
            last_timestamp: None,
        }
    }
}

impl<R: BufRead> FrameSource for ReplayDetector<R> {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        for line in self.lines.by_ref() {
            let line = line.context("Failed to read frame recording")?;
            if line.trim().is_empty() {
                continue;
            }
            let index = self.next_index;
            self.next_index += 1;
            let hand: Option<Vec<Landmark>> = serde_json::from_str(&line)
                .with_context(|| format!("Frame {index} is not a landmark list"))?;
            return Ok(Some(Frame { index, hand }));
        }
        Ok(None)
    }
}

impl<R: BufRead> PoseDetector for ReplayDetector<R> {
    fn detect(&mut self, frame: &Frame, timestamp_ms: u64) -> Option<HandPose> {
        if self.last_timestamp.is_some_and(|last| timestamp_ms <= last) {
            tracing::warn!(
                "Frame {} timestamp {}ms is not after the previous one; skipping",
                frame.index,
                timestamp_ms
            );
            return None;
        }
        self.last_timestamp = Some(timestamp_ms);

        let landmarks = frame.hand.as_deref()?;
        match HandPose::from_slice(landmarks) {
            Ok(pose) => Some(pose),
            Err(err) => {
                tracing::warn!("Frame {}: {}", frame.index, err);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn hand_line() -> String {
        let points: Vec<[f32; 3]> = (0..21).map(|i| [i as f32 * 0.01, 0.5, 0.0]).collect();
        serde_json::to_string(&points).unwrap()
    }

    #[test]
    fn test_replay_reads_frames_in_order() {
        let text = format!("null\n\n{}\nnull\n", hand_line());
        let mut replay = ReplayDetector::from_reader(Cursor::new(text));

        let first = replay.next_frame().unwrap().unwrap();
        assert_eq!(first.index, 0);
        assert!(replay.detect(&first, 33).is_none());

        let second = replay.next_frame().unwrap().unwrap();
        assert_eq!(second.index, 1);
        let pose = replay.detect(&second, 66).unwrap();
        assert_eq!(pose.landmarks()[3].x, 3.0f32 * 0.01);

        assert_eq!(replay.next_frame().unwrap().unwrap().hand, None);
        assert!(replay.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_partial_hand_is_not_a_pose() {
        let mut replay = ReplayDetector::from_reader(Cursor::new("[[0,0,0],[1,1,1]]\n"));
        let frame = replay.next_frame().unwrap().unwrap();
        assert_eq!(frame.hand.as_ref().map(Vec::len), Some(2));
        assert!(replay.detect(&frame, 1).is_none());
    }

    #[test]
    fn test_stale_timestamp_is_rejected() {
        let text = format!("{}\n{}\n", hand_line(), hand_line());
        let mut replay = ReplayDetector::from_reader(Cursor::new(text));
        let a = replay.next_frame().unwrap().unwrap();
        let b = replay.next_frame().unwrap().unwrap();
        assert!(replay.detect(&a, 100).is_some());
        assert!(replay.detect(&b, 100).is_none());
    }

    #[test]
    fn test_garbage_line_is_an_error() {
        let mut replay = ReplayDetector::from_reader(Cursor::new("not json\n"));
        assert!(replay.next_frame().is_err());
    }
}
