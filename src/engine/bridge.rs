//! External recognizer bridge
//!
//! Recognition inference runs in a separate process. The bridge command gets a
//! single JSON request on stdin and answers with one JSON record per line on
//! stdout, in line order:
//!
//! ```json
//! {"prediction": "text", "cuts": [[x1, y1, x2, y2], ...], "confidences": [0.98, ...]}
//! ```
//!
//! The page image is handed over as a temporary PNG file.

use std::io::{BufRead, BufReader, Lines, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};

use image::DynamicImage;
use serde::Serialize;
use uuid::Uuid;

use super::{EngineError, OcrRecord, RecognizeOptions, Recognizer, RecordIter, Segmentation};
use crate::geometry::Corners;

/// Request sent to the bridge on stdin
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BridgeRequest<'a> {
    model: &'a Path,
    image: &'a Path,
    text_direction: &'a str,
    lines: &'a [Corners],
    padding: u32,
    normalize: bool,
    bidi_reorder: bool,
}

/// Command line of the external recognizer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognizerCommand {
    program: String,
    args: Vec<String>,
}

impl RecognizerCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Split a whitespace-separated command line
    pub fn parse(command_line: &str) -> Option<Self> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self::new(program, parts.collect()))
    }

    /// Start recognition of `bounds` and return a lazy record stream
    pub(super) fn run(
        &self,
        recognizer: &Recognizer,
        image: &DynamicImage,
        bounds: &Segmentation,
        options: &RecognizeOptions,
    ) -> Result<RecordIter, EngineError> {
        let image_path = std::env::temp_dir().join(format!("mocri_page_{}.png", Uuid::new_v4()));
        image
            .save_with_format(&image_path, image::ImageFormat::Png)
            .map_err(|e| EngineError::Recognition(format!("Failed to write page image: {}", e)))?;

        // From here on the temp file is owned by the record stream (or removed on error)
        let mut pending = PendingImage(Some(image_path.clone()));

        let request = BridgeRequest {
            model: recognizer.model_path(),
            image: &image_path,
            text_direction: &bounds.text_direction,
            lines: &bounds.boxes,
            padding: options.padding,
            normalize: options.normalize,
            bidi_reorder: options.bidi_reorder,
        };
        let payload = serde_json::to_vec(&request)
            .map_err(|e| EngineError::Recognition(format!("Failed to encode request: {}", e)))?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| {
                EngineError::Unavailable(format!("Failed to run {}: {}", self.program, e))
            })?;

        // The bridge may answer before it has read the whole request
        if let Some(mut stdin) = child.stdin.take() {
            std::thread::spawn(move || {
                if let Err(e) = stdin.write_all(&payload) {
                    tracing::debug!("Recognizer stopped reading its request: {}", e);
                }
            });
        }

        let Some(stdout) = child.stdout.take() else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(EngineError::Recognition("Recognizer stdout unavailable".to_string()));
        };

        tracing::debug!(
            program = %self.program,
            model = %recognizer.model_path().display(),
            lines = bounds.boxes.len(),
            "Started recognizer"
        );

        Ok(Box::new(BridgeRecords {
            child: Some(child),
            lines: BufReader::new(stdout).lines(),
            image_path: pending.take(),
        }))
    }
}

/// Removes the page image unless ownership moves elsewhere
struct PendingImage(Option<PathBuf>);

impl PendingImage {
    fn take(&mut self) -> Option<PathBuf> {
        self.0.take()
    }
}

impl Drop for PendingImage {
    fn drop(&mut self) {
        if let Some(path) = self.0.take() {
            let _ = std::fs::remove_file(path);
        }
    }
}

/// Records read from a running bridge process
struct BridgeRecords {
    child: Option<Child>,
    lines: Lines<BufReader<ChildStdout>>,
    image_path: Option<PathBuf>,
}

impl BridgeRecords {
    /// Reap the process once stdout is exhausted
    fn finish(&mut self) -> Option<Result<OcrRecord, EngineError>> {
        let mut child = self.child.take()?;
        match child.wait() {
            Ok(status) if status.success() => None,
            Ok(status) => Some(Err(EngineError::Recognition(format!(
                "Recognizer exited with {}",
                status
            )))),
            Err(e) => Some(Err(EngineError::Io(e))),
        }
    }

    fn abort(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

impl Iterator for BridgeRecords {
    type Item = Result<OcrRecord, EngineError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.child.as_ref()?;

        loop {
            match self.lines.next() {
                Some(Ok(line)) if line.trim().is_empty() => continue,
                Some(Ok(line)) => {
                    return match serde_json::from_str::<OcrRecord>(&line) {
                        Ok(record) => Some(Ok(record)),
                        Err(e) => {
                            self.abort();
                            Some(Err(EngineError::InvalidOutput(format!(
                                "Unparseable recognizer record: {}",
                                e
                            ))))
                        }
                    };
                }
                Some(Err(e)) => {
                    self.abort();
                    return Some(Err(EngineError::Io(e)));
                }
                None => return self.finish(),
            }
        }
    }
}

impl Drop for BridgeRecords {
    fn drop(&mut self) {
        self.abort();
        if let Some(path) = self.image_path.take() {
            let _ = std::fs::remove_file(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command_line() {
        let command = RecognizerCommand::parse("  python3 -m mocri_bridge --gpu ").unwrap();
        assert_eq!(command.program, "python3");
        assert_eq!(command.args, vec!["-m", "mocri_bridge", "--gpu"]);

        assert!(RecognizerCommand::parse("   ").is_none());
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use image::{GrayImage, Luma};

        fn sh(script: &str) -> RecognizerCommand {
            RecognizerCommand::new("sh", vec!["-c".to_string(), script.to_string()])
        }

        fn run(command: &RecognizerCommand) -> Result<Vec<Result<OcrRecord, EngineError>>, EngineError> {
            run_lines(command, vec![Corners::new(0, 0, 4, 2)])
        }

        fn run_lines(
            command: &RecognizerCommand,
            boxes: Vec<Corners>,
        ) -> Result<Vec<Result<OcrRecord, EngineError>>, EngineError> {
            let image = DynamicImage::ImageLuma8(GrayImage::from_pixel(4, 4, Luma([255])));
            let bounds = Segmentation {
                text_direction: "left-to-right".to_string(),
                boxes,
            };
            let options = RecognizeOptions {
                padding: 16,
                normalize: true,
                bidi_reorder: true,
            };
            let recognizer = Recognizer::new("/models/test.clstm", 7);
            Ok(command.run(&recognizer, &image, &bounds, &options)?.collect())
        }

        #[test]
        fn test_records_in_order() {
            let command = sh(concat!(
                "cat > /dev/null; ",
                "echo '{\"prediction\": \"ab\", \"cuts\": [[0,0,2,2],[2,0,4,2]], \"confidences\": [0.9, 0.8]}'; ",
                "echo ''; ",
                "echo '{\"prediction\": \"c\", \"cuts\": [[0,2,1,4]], \"confidences\": [0.5]}'"
            ));

            let records = run(&command).unwrap();
            assert_eq!(records.len(), 2);

            let first = records[0].as_ref().unwrap();
            assert_eq!(first.prediction, "ab");
            assert_eq!(first.cuts, vec![Corners::new(0, 0, 2, 2), Corners::new(2, 0, 4, 2)]);
            assert_eq!(records[1].as_ref().unwrap().prediction, "c");
        }

        #[test]
        fn test_request_reaches_bridge() {
            // Echo the request's direction back as the prediction
            let command = sh(concat!(
                "req=$(cat); ",
                "case \"$req\" in *'\"textDirection\":\"left-to-right\"'*) t=ltr;; *) t=other;; esac; ",
                "echo \"{\\\"prediction\\\": \\\"$t\\\", \\\"cuts\\\": [], \\\"confidences\\\": []}\""
            ));

            let records = run(&command).unwrap();
            assert_eq!(records.len(), 1);
            assert_eq!(records[0].as_ref().unwrap().prediction, "ltr");
        }

        #[test]
        fn test_failing_bridge_reports_error_after_records() {
            let command = sh(concat!(
                "cat > /dev/null; ",
                "echo '{\"prediction\": \"ok\", \"cuts\": [], \"confidences\": []}'; ",
                "exit 3"
            ));

            let records = run(&command).unwrap();
            assert_eq!(records.len(), 2);
            assert!(records[0].is_ok());
            assert!(matches!(records[1], Err(EngineError::Recognition(_))));
        }

        #[test]
        fn test_bridge_answering_before_reading_request() {
            // Both the request and the answer overflow a pipe buffer
            let command = sh(concat!(
                "i=0; while [ $i -lt 2000 ]; do ",
                "echo '{\"prediction\": \"x\", \"cuts\": [], \"confidences\": []}'; ",
                "i=$((i+1)); done; ",
                "cat > /dev/null"
            ));
            let boxes = vec![Corners::new(0, 0, 4, 2); 10_000];

            let records = run_lines(&command, boxes).unwrap();
            assert_eq!(records.len(), 2000);
            assert!(records.iter().all(Result::is_ok));
        }

        #[test]
        fn test_bridge_ignoring_request() {
            let command = sh("echo '{\"prediction\": \"x\", \"cuts\": [], \"confidences\": []}'");
            let boxes = vec![Corners::new(0, 0, 4, 2); 10_000];

            let records = run_lines(&command, boxes).unwrap();
            assert_eq!(records.len(), 1);
            assert!(records[0].is_ok());
        }

        #[test]
        fn test_garbage_output() {
            let command = sh("cat > /dev/null; echo 'not json'");
            let records = run(&command).unwrap();
            assert_eq!(records.len(), 1);
            assert!(matches!(records[0], Err(EngineError::InvalidOutput(_))));
        }

        #[test]
        fn test_missing_program() {
            let command = RecognizerCommand::new("/nonexistent/mocri-bridge", Vec::new());
            assert!(matches!(run(&command), Err(EngineError::Unavailable(_))));
        }
    }
}
