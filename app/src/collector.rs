use crate::detector::{FrameSource, PoseDetector};
use crate::operator::OperatorInput;
use anyhow::Result;
use handsign::{CaptureOutcome, CaptureProgress, CaptureSession};

/// Drives one capture session until the operator finishes, every label is
/// done or the frame stream runs dry.
///
/// Each cycle reads a frame, runs detection on it and then applies whatever
/// command the operator gave.
pub fn run_session<C, I>(
    mut session: CaptureSession,
    camera: &mut C,
    input: &mut I,
    frame_interval_ms: u64,
) -> Result<CaptureSession>
where
    C: FrameSource + PoseDetector + ?Sized,
    I: OperatorInput + ?Sized,
{
    println!("{}", status_line(&session.progress()));
    let mut timestamp_ms = 0u64;
    while !session.is_finished() {
        let Some(frame) = camera.next_frame()? else {
            tracing::info!("Frame stream ended");
            session.finish();
            break;
        };
        timestamp_ms += frame_interval_ms;
        let pose = camera.detect(&frame, timestamp_ms);

        let Some(command) = input.poll()? else {
            continue;
        };
        match session.apply(command, pose.as_ref()) {
            CaptureOutcome::NoPose => println!("No hand detected! Position your hand clearly."),
            CaptureOutcome::Finished | CaptureOutcome::Closed => {}
            _ => println!("{}", status_line(&session.progress())),
        }
    }
    Ok(session)
}

/// The operator status line, e.g. `Letter: B (2/3) | Samples: 12/30`.
pub fn status_line(progress: &CaptureProgress) -> String {
    match &progress.label {
        Some(label) => format!(
            "Letter: {} ({}/{}) | Samples: {}/{}",
            label,
            progress.label_index + 1,
            progress.label_count,
            progress.samples,
            progress.target
        ),
        None => "All letters collected".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::ReplayDetector;
    use crate::operator::LineInput;
    use handsign::LabelSet;
    use std::io::Cursor;

    fn recording(frames: &[bool]) -> String {
        let hand: Vec<[f32; 3]> = (0..21).map(|i| [0.4 + i as f32 * 0.01, 0.5, 0.0]).collect();
        let hand = serde_json::to_string(&hand).unwrap();
        frames
            .iter()
            .map(|&visible| if visible { hand.clone() } else { "null".to_string() })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn session() -> CaptureSession {
        CaptureSession::new(LabelSet::new(["A", "B"]).unwrap(), 2).unwrap()
    }

    #[test]
    fn test_session_collects_every_label() {
        let mut replay = ReplayDetector::from_reader(Cursor::new(recording(&[true; 6])));
        let mut input = LineInput::new(Cursor::new("c\n\nc\nc\nc\n"));
        let session = run_session(session(), &mut replay, &mut input, 33).unwrap();
        assert!(session.is_finished());
        assert_eq!(session.dataset().class_counts(), vec![2, 2]);
    }

    #[test]
    fn test_missing_hand_and_skip() {
        let mut replay = ReplayDetector::from_reader(Cursor::new(recording(&[
            false, true, true, true,
        ])));
        let mut input = LineInput::new(Cursor::new("c\nc\nn\nc\n"));
        let session = run_session(session(), &mut replay, &mut input, 33).unwrap();
        assert!(session.is_finished());
        assert_eq!(session.dataset().class_counts(), vec![1, 1]);
    }

    #[test]
    fn test_stream_end_finishes_session() {
        let mut replay = ReplayDetector::from_reader(Cursor::new(recording(&[true])));
        let mut input = LineInput::new(Cursor::new("c\nc\nc\n"));
        let session = run_session(session(), &mut replay, &mut input, 33).unwrap();
        assert!(session.is_finished());
        assert_eq!(session.dataset().len(), 1);
        assert_eq!(session.state(), (0, 1));
    }

    #[test]
    fn test_status_line() {
        let progress = session().progress();
        assert_eq!(status_line(&progress), "Letter: A (1/2) | Samples: 0/2");
    }
}
